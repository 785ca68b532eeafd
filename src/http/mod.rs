//! HTTP client module with timeouts and error classification.

mod client;
mod error;

pub use client::HttpClient;
pub use error::{ForgeError, classify_error, classify_status};
