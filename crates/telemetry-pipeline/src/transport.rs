// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pure delivery I/O. Transports send one batch body and report the
//! outcome; retry and backoff live in the retry executor, never here.

use async_trait::async_trait;
use bytes::Bytes;
use std::io::Write;
use std::time::Duration;
use tracing::debug;

use crate::error::{PipelineError, TransportFailure};

/// One-way batch delivery to the configured DSN.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, body: Bytes) -> Result<(), PipelineError>;
}

/// Classify an HTTP status per the egress contract: 2xx is success, 408/429
/// and 5xx are retryable, any other status is a permanent failure.
fn classify_status(status: u16) -> Result<(), PipelineError> {
    if (200..300).contains(&status) {
        return Ok(());
    }
    Err(PipelineError::transport(
        TransportFailure::Status(status),
        format!("collector answered {status}"),
    ))
}

/// Standard request/response transport: JSON array body, explicit timeout,
/// response status classification.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
    compress: bool,
}

impl HttpTransport {
    pub fn new(
        endpoint: impl Into<String>,
        timeout: Duration,
        compress: bool,
    ) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| PipelineError::InvalidConfig(format!("failed to build client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            timeout,
            compress,
        })
    }
}

fn gzip(body: &[u8]) -> Result<Vec<u8>, PipelineError> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(body)
        .and_then(|_| encoder.finish())
        .map_err(|e| PipelineError::InvalidConfig(format!("failed to compress payload: {e}")))
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, body: Bytes) -> Result<(), PipelineError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .timeout(self.timeout);

        let payload = if self.compress {
            request = request.header(reqwest::header::CONTENT_ENCODING, "gzip");
            Bytes::from(gzip(&body)?)
        } else {
            body
        };

        match request.body(payload).send().await {
            Ok(response) => classify_status(response.status().as_u16()),
            Err(e) if e.is_timeout() => Err(PipelineError::transport(
                TransportFailure::Timeout,
                e.to_string(),
            )),
            Err(e) => Err(PipelineError::transport(
                TransportFailure::Network,
                e.to_string(),
            )),
        }
    }
}

/// Fire-and-forget transport for host teardown.
///
/// The request is spawned and never awaited; no response is observed.
/// `send` returning `Ok` means the attempt was started, not that delivery
/// was confirmed; callers must not credit it as a confirmed success.
pub struct UnloadTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl UnloadTransport {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| PipelineError::InvalidConfig(format!("failed to build client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl Transport for UnloadTransport {
    async fn send(&self, body: Bytes) -> Result<(), PipelineError> {
        let request = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body);

        tokio::spawn(async move {
            if let Err(e) = request.send().await {
                debug!("Unload send was not confirmed: {e}");
            }
        });

        Ok(())
    }
}
