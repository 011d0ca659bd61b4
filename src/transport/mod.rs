//! Network dispatch.
//!
//! One [`Transport`] trait with two implementations picked at build time:
//! [`FetchTransport`] (async) and [`CallbackTransport`] (event-driven on the
//! blocking pool). [`Dispatcher`] wraps whichever is chosen.

pub mod traits;
pub mod fetch;
pub mod callback;
pub mod dispatcher;

use std::sync::Arc;
use std::time::Duration;

use crate::config::{SdkConfig, TransportKind};

pub use callback::CallbackTransport;
pub use dispatcher::{DispatchFailure, DispatchReport, Dispatcher, ResponseShape};
pub use fetch::FetchTransport;
pub use traits::{HttpRequest, HttpResponse, Method, Transport, TransportError};

/// Build the transport named by the config.
pub fn from_config(config: &SdkConfig) -> Result<Arc<dyn Transport>, TransportError> {
    let timeout = Duration::from_secs(config.request_timeout_secs);
    Ok(match config.transport {
        TransportKind::Fetch => Arc::new(FetchTransport::new(timeout)?),
        TransportKind::Callback => Arc::new(CallbackTransport::new(timeout)),
    })
}
