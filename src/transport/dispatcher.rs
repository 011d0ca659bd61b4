// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Turns a [`Request`] into one HTTP call and judges the response.
//!
//! Encoding, signing, method choice and response validation live here so
//! both transports behave the same.

use std::sync::Arc;

use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, error};

use super::traits::{HttpRequest, Method, Transport, TransportError};
use crate::config::SdkConfig;
use crate::record::{param_text, Request};

/// Payloads this long or longer go out as POST.
pub const GET_PAYLOAD_LIMIT: usize = 2000;

/// Dispatch name used for queue delivery. Failures under this name are
/// recorded in the health counters.
pub const QUEUE_DISPATCH: &str = "send_request_queue";

/// What a valid response body must look like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// A JSON object with a truthy `result` field.
    Object,
    /// Any JSON object or array.
    ObjectOrArray,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchFailure {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Http response status code [{code}] is not within the expected range")]
    Status { code: u16, body: String },
    #[error("Invalid response body: {reason}")]
    InvalidBody { status: u16, body: String, reason: String },
}

impl DispatchFailure {
    /// HTTP status of the failure, if a response arrived.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport(_) => None,
            Self::Status { code, .. } => Some(*code),
            Self::InvalidBody { status, .. } => Some(*status),
        }
    }

    /// Response body of the failure, if a response arrived.
    #[must_use]
    pub fn body(&self) -> Option<&str> {
        match self {
            Self::Transport(_) => None,
            Self::Status { body, .. } | Self::InvalidBody { body, .. } => Some(body),
        }
    }
}

/// Result of one dispatch, carrying the original parameters back.
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub name: String,
    pub params: Request,
    /// Response body on success.
    pub result: Result<String, DispatchFailure>,
}

impl DispatchReport {
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.result.is_err()
    }

    /// Parsed response body, when the dispatch succeeded.
    #[must_use]
    pub fn json(&self) -> Option<Value> {
        self.result
            .as_ref()
            .ok()
            .and_then(|body| serde_json::from_str(body).ok())
    }
}

/// `k=v` pairs, values percent-encoded, joined by `&`, in parameter order.
#[must_use]
pub fn encode_params(params: &Request) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(&param_text(v))))
        .collect::<Vec<_>>()
        .join("&")
}

/// Hex SHA-256 of `data` followed by `salt`.
#[must_use]
pub fn checksum(data: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Check status and body shape of a response.
pub fn validate_response(status: u16, body: &str, shape: ResponseShape) -> Result<(), DispatchFailure> {
    if !(200..300).contains(&status) {
        return Err(DispatchFailure::Status {
            code: status,
            body: body.to_string(),
        });
    }

    let invalid = |reason: &str| DispatchFailure::InvalidBody {
        status,
        body: body.to_string(),
        reason: reason.to_string(),
    };

    let parsed: Value = serde_json::from_str(body).map_err(|e| invalid(&format!("not JSON: {e}")))?;
    match (shape, &parsed) {
        (ResponseShape::Object, Value::Object(map)) => {
            if map.get("result").is_some_and(is_truthy) {
                Ok(())
            } else {
                Err(invalid("missing result"))
            }
        }
        (ResponseShape::Object, _) => Err(invalid("not a JSON object")),
        (ResponseShape::ObjectOrArray, Value::Object(_) | Value::Array(_)) => Ok(()),
        (ResponseShape::ObjectOrArray, _) => Err(invalid("not a JSON object nor array")),
    }
}

pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    salt: Option<String>,
    force_post: bool,
    headers: Vec<(String, String)>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, config: &SdkConfig) -> Self {
        Self {
            transport,
            salt: config.salt.clone().filter(|s| !s.is_empty()),
            force_post: config.force_post,
            headers: config.headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }

    #[must_use]
    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// Encoded payload, with `checksum256` appended when a salt is set.
    pub async fn prepare_params(&self, params: &Request) -> String {
        let data = encode_params(params);
        let Some(ref salt) = self.salt else { return data };

        let (d, s) = (data.clone(), salt.clone());
        let digest = match tokio::task::spawn_blocking(move || checksum(&d, &s)).await {
            Ok(digest) => digest,
            Err(_) => checksum(&data, salt),
        };
        format!("{}&checksum256={}", data, digest)
    }

    #[must_use]
    pub fn choose_method(&self, payload: &str) -> Method {
        if self.force_post || payload.len() >= GET_PAYLOAD_LIMIT {
            Method::Post
        } else {
            Method::Get
        }
    }

    #[must_use]
    pub fn build_request(&self, url: &str, payload: String) -> HttpRequest {
        let method = self.choose_method(&payload);
        let mut headers = self.headers.clone();
        let (url, body) = match method {
            Method::Get => (format!("{}?{}", url, payload), None),
            Method::Post => {
                headers.push((
                    "Content-Type".to_string(),
                    "application/x-www-form-urlencoded".to_string(),
                ));
                (url.to_string(), Some(payload))
            }
        };
        HttpRequest { method, url, body, headers }
    }

    /// Send `params` to `url` and validate the response against `shape`.
    #[tracing::instrument(skip(self, params), fields(transport = self.transport.name()))]
    pub async fn send(&self, name: &str, url: &str, params: Request, shape: ResponseShape) -> DispatchReport {
        let _timer = crate::metrics::DispatchTimer::new(name);
        let payload = self.prepare_params(&params).await;
        let request = self.build_request(url, payload);
        debug!(method = %request.method, "dispatching");

        let result = match self.transport.execute(request).await {
            Ok(response) => validate_response(response.status, &response.body, shape).map(|()| response.body),
            Err(e) => Err(DispatchFailure::Transport(e)),
        };

        match result {
            Ok(_) => crate::metrics::record_dispatch(name, "success"),
            Err(ref e) => {
                error!(error = %e, "{} failed", name);
                crate::metrics::record_dispatch(name, "failure");
            }
        }

        DispatchReport {
            name: name.to_string(),
            params,
            result,
        }
    }
}
