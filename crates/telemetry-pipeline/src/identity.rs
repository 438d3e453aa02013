// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde_json::{json, Value};
use uuid::Uuid;

/// Supplies the session/identity context stamped onto records that arrive
/// without one.
///
/// Injected at orchestrator construction; the pipeline never reads identity
/// from ambient storage.
pub trait IdentityProvider: Send + Sync {
    fn context(&self) -> Value;
}

/// Fixed context captured at construction time.
pub struct StaticIdentity {
    context: Value,
}

impl StaticIdentity {
    pub fn new(context: Value) -> Self {
        Self { context }
    }

    /// An anonymous session with a random id, generated once per process.
    pub fn anonymous() -> Self {
        Self {
            context: json!({ "session": Uuid::new_v4().to_string() }),
        }
    }
}

impl IdentityProvider for StaticIdentity {
    fn context(&self) -> Value {
        self.context.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_identity_returns_fixed_context() {
        let identity = StaticIdentity::new(json!({"user": "u-1"}));
        assert_eq!(identity.context()["user"], "u-1");
    }

    #[test]
    fn test_anonymous_identity_is_stable_per_instance() {
        let identity = StaticIdentity::anonymous();
        assert_eq!(identity.context(), identity.context());
    }
}
