// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors that can occur when working with the durable store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("failed to encode record payload: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("unknown record kind: {0}")]
    UnknownKind(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = StoreError::UnknownKind("metric".to_string());
        assert_eq!(error.to_string(), "unknown record kind: metric");
    }
}
