//! Upstream annotation service client
//!
//! Two endpoints are consumed:
//! - `GET {base}/sessions/{session}/variants/summary` - line-delimited JSON
//!   summary stream (metadata record, then one gene record per line)
//! - `GET {base}/sessions/{session}/genes/{symbol}/variants` - JSON
//!   document with the full variant list of one gene

use crate::models::{SessionId, Variant};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

const USER_AGENT: &str = concat!("gvr-cache/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Gene detail documents are small; summary streams get no overall timeout
const DETAIL_TIMEOUT: Duration = Duration::from_secs(30);

/// Upstream transport errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Upstream returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid upstream URL: {0}")]
    InvalidUrl(String),
}

/// Raw summary stream bytes, in transport chunks
pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Source of summary streams and gene detail
#[async_trait]
pub trait UpstreamSource: Send + Sync {
    /// URL of the summary stream for `session`
    fn summary_url(&self, session: &SessionId) -> String;

    /// Issue the summary request; non-success status is an error
    async fn open_stream(&self, url: &str) -> Result<ByteStream, TransportError>;

    /// Full variant list of one gene
    async fn fetch_gene_variants(
        &self,
        session: &SessionId,
        gene: &str,
    ) -> Result<Vec<Variant>, TransportError>;
}

#[derive(Debug, Deserialize)]
struct GeneDetailResponse {
    #[serde(default)]
    gene: Option<String>,
    variants: Vec<Variant>,
}

/// HTTP implementation of [`UpstreamSource`]
pub struct HttpUpstream {
    http_client: reqwest::Client,
    base_url: Url,
}

impl HttpUpstream {
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        let base_url =
            Url::parse(base_url).map_err(|e| TransportError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(TransportError::InvalidUrl(base_url.to_string()));
        }

        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url,
        })
    }

    /// Base URL with percent-encoded path segments appended
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // cannot_be_a_base was rejected in new()
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    pub fn gene_detail_url(&self, session: &SessionId, gene: &str) -> String {
        self.endpoint(&["sessions", session.as_str(), "genes", gene, "variants"])
            .to_string()
    }

    async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl UpstreamSource for HttpUpstream {
    fn summary_url(&self, session: &SessionId) -> String {
        self.endpoint(&["sessions", session.as_str(), "variants", "summary"])
            .to_string()
    }

    async fn open_stream(&self, url: &str) -> Result<ByteStream, TransportError> {
        tracing::debug!(url = %url, "Opening summary stream");

        let response = self
            .http_client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/x-ndjson")
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let response = Self::error_for_status(response).await?;

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| TransportError::Network(e.to_string())))
            .boxed())
    }

    async fn fetch_gene_variants(
        &self,
        session: &SessionId,
        gene: &str,
    ) -> Result<Vec<Variant>, TransportError> {
        let url = self.gene_detail_url(session, gene);
        tracing::debug!(session = %session, gene = %gene, "Fetching gene detail");

        let response = self
            .http_client
            .get(&url)
            .timeout(DETAIL_TIMEOUT)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let response = Self::error_for_status(response).await?;

        let detail: GeneDetailResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;

        if let Some(returned) = detail.gene.as_deref() {
            if returned != gene {
                return Err(TransportError::Decode(format!(
                    "Requested gene {} but upstream returned {}",
                    gene, returned
                )));
            }
        }

        Ok(detail.variants)
    }
}
