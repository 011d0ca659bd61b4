// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Event-driven transport.
//!
//! [`CallbackTransport::start`] fires the request on the blocking pool and
//! invokes a completion callback when it finishes. The [`Transport`] impl
//! bridges that callback into a future with a oneshot channel.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::blocking::Client;
use tokio::sync::oneshot;
use tracing::trace;

use super::fetch::map_reqwest_error;
use super::traits::{HttpRequest, HttpResponse, Method, Transport, TransportError};

#[derive(Debug, Clone)]
pub struct CallbackTransport {
    timeout: Duration,
    client: Arc<OnceLock<Client>>,
}

impl CallbackTransport {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            client: Arc::new(OnceLock::new()),
        }
    }

    /// Send `request` in the background and call `on_complete` with the result.
    pub fn start<F>(&self, request: HttpRequest, on_complete: F)
    where
        F: FnOnce(Result<HttpResponse, TransportError>) + Send + 'static,
    {
        let timeout = self.timeout;
        let cell = Arc::clone(&self.client);
        tokio::task::spawn_blocking(move || {
            let result = shared_client(&cell, timeout).and_then(|client| perform(client, request));
            on_complete(result);
        });
    }
}

// The blocking client owns its own runtime and may not be built inside an
// async context, so the first blocking call builds it and later calls reuse it.
fn shared_client(cell: &OnceLock<Client>, timeout: Duration) -> Result<&Client, TransportError> {
    if let Some(client) = cell.get() {
        return Ok(client);
    }
    let client = Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| TransportError::Network(format!("http client build failed: {e}")))?;
    Ok(cell.get_or_init(|| client))
}

fn perform(client: &Client, request: HttpRequest) -> Result<HttpResponse, TransportError> {
    let mut builder = match request.method {
        Method::Get => client.get(&request.url),
        Method::Post => client.post(&request.url).body(request.body.unwrap_or_default()),
    };
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    let response = builder.send().map_err(map_reqwest_error)?;
    let status = response.status().as_u16();
    let body = response.text().map_err(map_reqwest_error)?;
    trace!(status, "callback transport completed");
    Ok(HttpResponse { status, body })
}

#[async_trait]
impl Transport for CallbackTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let (tx, rx) = oneshot::channel();
        self.start(request, move |result| {
            let _ = tx.send(result);
        });
        rx.await.map_err(|_| TransportError::Cancelled)?
    }

    fn name(&self) -> &'static str {
        "callback"
    }
}
