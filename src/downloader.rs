/*============================================================
  Synavera Project: Syn-Upd
  Module: synupd_core::downloader
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Retrieve catalogs and package files over HTTP(S).

  Security / Safety Notes:
    Performs read-only GET requests. No credentials are sent
    beyond whatever the feed URL itself carries.

  Dependencies:
    reqwest (streaming bodies), futures-util for the byte
    stream, tokio for async file writes, tokio-util for
    cancellation.

  Operational Scope:
    Used by the feed reader for RELEASES and by the fetch
    pipeline for package bodies.

  Revision History:
    2024-11-04 COD  Implemented asynchronous HTTP client.
    2025-11-17 COD  Generalized into the package downloader.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Streaming writes with bounded memory
    - Cancellation checked between every chunk
============================================================*/

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::config::HttpConfig;
use crate::error::{Result, SynupdError};
use crate::progress::Progress;

/// Transport used to fetch catalogs and packages.
#[async_trait]
pub trait PackageDownloader: Send + Sync {
    /// Fetch a whole resource into memory.
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>>;

    /// Stream a resource into `dest`, reporting `0..=100` as bytes arrive.
    async fn fetch_to_file(
        &self,
        url: &str,
        dest: &Path,
        progress: Progress,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// reqwest-backed downloader.
#[derive(Clone)]
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|err| SynupdError::Network(format!("Failed to build HTTP client: {err}")))?;
        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let response =
            self.client.get(url).send().await.map_err(|err| {
                SynupdError::Network(format!("Request to {url} failed: {err}"))
            })?;
        if !response.status().is_success() {
            return Err(SynupdError::Network(format!(
                "Request to {url} failed with status {}",
                response.status()
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl PackageDownloader for HttpDownloader {
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.get(url).await?;
        let body = response
            .bytes()
            .await
            .map_err(|err| SynupdError::Network(format!("Failed to read body of {url}: {err}")))?;
        Ok(body.to_vec())
    }

    async fn fetch_to_file(
        &self,
        url: &str,
        dest: &Path,
        progress: Progress,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SynupdError::Cancelled),
            response = self.get(url) => response?,
        };
        let total = response.content_length();

        let mut file = tokio::fs::File::create(dest).await.map_err(|err| {
            SynupdError::Filesystem(format!("Failed to create {}: {err}", dest.display()))
        })?;
        let mut stream = response.bytes_stream();
        let mut received: u64 = 0;

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    drop(file);
                    let _ = tokio::fs::remove_file(dest).await;
                    return Err(SynupdError::Cancelled);
                }
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else {
                break;
            };
            let chunk = chunk
                .map_err(|err| SynupdError::Network(format!("Download of {url} failed: {err}")))?;
            file.write_all(&chunk).await.map_err(|err| {
                SynupdError::Filesystem(format!("Failed to write {}: {err}", dest.display()))
            })?;

            received = received.saturating_add(chunk.len() as u64);
            if let Some(total) = total.filter(|total| *total > 0) {
                progress((received.min(total) * 100 / total) as u8);
            }
        }

        file.flush().await.map_err(|err| {
            SynupdError::Filesystem(format!("Failed to flush {}: {err}", dest.display()))
        })?;
        progress(100);
        Ok(())
    }
}
