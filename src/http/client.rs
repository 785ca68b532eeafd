//! HTTP client with per-request timeouts and error classification.
//!
//! Every call is a single attempt. Failures surface to the caller as a
//! [`ForgeError`] so the caller can decide whether to fall back.

use anyhow::{Context, Result};
use log::debug;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::io::Write;
use std::time::Duration;

use super::error::{ForgeError, classify_error, classify_status};

#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// GET `url` and deserialize the JSON body. Any non-2xx status is an error.
    #[tracing::instrument(skip(self))]
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<T, ForgeError> {
        self.get_json_with_query(url, &[], timeout).await
    }

    /// GET `url` with query parameters and deserialize the JSON body.
    #[tracing::instrument(skip(self, query))]
    pub async fn get_json_with_query<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<T, ForgeError> {
        debug!("GET JSON from {} with query {:?}...", url, query);

        let response = self
            .client
            .get(url)
            .query(query)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_error(url, e))?;

        if let Some(err) = classify_status(url, response.status()) {
            return Err(err);
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ForgeError::transport(url, format!("invalid JSON response: {}", e)))
    }

    /// Like [`get_json`](Self::get_json), but a 404 yields `Ok(None)`.
    #[tracing::instrument(skip(self))]
    pub async fn get_optional_json<T: DeserializeOwned>(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<Option<T>, ForgeError> {
        match self.get_json(url, timeout).await {
            Ok(value) => Ok(Some(value)),
            Err(ForgeError::NotFound(_)) => {
                debug!("{} returned 404", url);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Streams `url` into the writer produced by `create_writer`.
    ///
    /// The writer is only created once the server answered with a success
    /// status, so a failed request leaves nothing behind. `timeout` bounds the
    /// whole transfer, body included.
    #[tracing::instrument(skip(self, create_writer))]
    pub async fn download_file<W, F>(
        &self,
        url: &str,
        timeout: Duration,
        create_writer: F,
    ) -> Result<u64>
    where
        W: Write,
        F: Fn() -> Result<W>,
    {
        debug!("Downloading file from {}...", url);

        let mut response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_error(url, e))?;

        if let Some(err) = classify_status(url, response.status()) {
            return Err(err.into());
        }

        let mut writer = create_writer()?;
        let mut downloaded_bytes: u64 = 0;

        while let Some(chunk) = response
            .chunk()
            .await
            .context("Failed to read chunk from download stream")?
        {
            writer
                .write_all(&chunk)
                .context("Failed to write chunk to file")?;
            downloaded_bytes += chunk.len() as u64;
        }
        writer.flush().context("Failed to flush downloaded file")?;

        debug!(
            "Downloaded {:.2} MB",
            downloaded_bytes as f64 / (1024.0 * 1024.0)
        );

        Ok(downloaded_bytes)
    }
}
