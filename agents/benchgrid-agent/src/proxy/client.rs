//! Proxy Transport Client
//!
//! Moves blobs and telemetry batches between an agent and the proxy endpoint
//! fronting durable storage. Downloads are chunked via HTTP range requests so
//! a failed chunk retries in place instead of restarting the whole transfer.

use bytes::Bytes;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_TYPE, RANGE};
use reqwest::{Response, Url};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::error::ApiError;
use crate::api::rest::{error_for_status, RestClient};
use crate::api::retry::RetryPolicy;
use crate::proxy::blobs::BlobDescriptor;
use crate::proxy::telemetry::TelemetryMessage;

/// Route for the proxy telemetry endpoint.
pub const TELEMETRY_API_ROUTE: &str = "/api/telemetry";

/// Download chunk size: 1 MiB. The final chunk of a transfer is sized by
/// `min(chunk, total - start)`.
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Errors surfaced by the proxy transport client.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Range mode was selected but the HEAD response carried no length;
    /// chunk-loop termination is impossible without it. Terminal: retrying
    /// cannot produce missing metadata.
    #[error("the 'Content-Length' header was not present in the response from '{url}'")]
    MissingContentLength { url: String },

    /// One chunk exhausted its retries. Identifies the byte range that
    /// failed so operators do not have to guess.
    #[error("download of byte range {start}-{end} from '{url}' failed")]
    ChunkFailed {
        url: String,
        start: u64,
        end: u64,
        #[source]
        source: Box<ApiError>,
    },

    /// The peer answered a range request with an empty body; advancing is
    /// impossible and looping would never terminate.
    #[error("empty body for byte range {start}-{end} of '{url}'")]
    EmptyChunk { url: String, start: u64, end: u64 },

    #[error("failed writing downloaded content: {0}")]
    Io(#[from] std::io::Error),
}

/// Client for the proxy blob and telemetry endpoints.
#[derive(Debug, Clone)]
pub struct ProxyApiClient {
    rest: RestClient,
    base_url: Url,
    chunk_size: u64,
    get_policy: RetryPolicy,
    post_policy: RetryPolicy,
}

impl ProxyApiClient {
    pub fn new(rest: RestClient, base_url: Url) -> Self {
        Self {
            rest,
            base_url,
            chunk_size: DEFAULT_CHUNK_SIZE,
            get_policy: RetryPolicy::proxy_get(),
            post_policy: RetryPolicy::proxy_post(),
        }
    }

    /// Override the download chunk size. Intended for tests and constrained
    /// links; the default suits production transfers.
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// The chunk size range downloads use.
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Upload a blob. The route is a pure function of the descriptor, so a
    /// retried or repeated upload overwrites the same logical blob.
    pub async fn upload_blob(
        &self,
        descriptor: &BlobDescriptor,
        content: Bytes,
        cancel: &CancellationToken,
        retry_policy: Option<&RetryPolicy>,
    ) -> Result<(), ProxyError> {
        let url = descriptor.api_route(&self.base_url);
        let content_type = descriptor.content_type.clone();

        let response = self
            .rest
            .execute(url.as_str(), retry_policy.unwrap_or(&self.post_policy), cancel, |client| {
                client
                    .post(url.clone())
                    .header(CONTENT_TYPE, content_type.clone())
                    .body(content.clone())
            })
            .await?;

        error_for_status("POST", url.as_str(), &response)?;
        Ok(())
    }

    /// Download a blob into `writer`.
    ///
    /// Probes with HEAD first: when the server advertises `Accept-Ranges`,
    /// the body is pulled in fixed-size range chunks and each failed chunk is
    /// retried in place; otherwise the whole body streams from a single GET.
    pub async fn download_blob<W>(
        &self,
        descriptor: &BlobDescriptor,
        writer: &mut W,
        cancel: &CancellationToken,
        retry_policy: Option<&RetryPolicy>,
    ) -> Result<(), ProxyError>
    where
        W: AsyncWrite + Unpin,
    {
        let url = descriptor.api_route(&self.base_url);
        let policy = retry_policy.unwrap_or(&self.get_policy);

        let head = self
            .rest
            .execute(url.as_str(), policy, cancel, |client| client.head(url.clone()))
            .await?;
        error_for_status("HEAD", url.as_str(), &head)?;

        if !range_enabled(&head) {
            self.download_whole(&url, writer, cancel, policy).await?;
        } else {
            let total = content_length(&head).ok_or_else(|| ProxyError::MissingContentLength {
                url: url.to_string(),
            })?;
            self.download_chunked(&url, total, writer, cancel, policy).await?;
        }

        writer.flush().await?;
        Ok(())
    }

    /// Upload a batch of telemetry messages. The batch is atomic from the
    /// caller's perspective: there is no partial-batch acknowledgment, so a
    /// failed call is retried or failed as a whole.
    pub async fn upload_telemetry(
        &self,
        messages: &[TelemetryMessage],
        cancel: &CancellationToken,
        retry_policy: Option<&RetryPolicy>,
    ) -> Result<(), ProxyError> {
        let mut url = self.base_url.clone();
        url.set_path(TELEMETRY_API_ROUTE);

        let response = self
            .rest
            .execute(url.as_str(), retry_policy.unwrap_or(&self.post_policy), cancel, |client| {
                client.post(url.clone()).json(messages)
            })
            .await?;

        error_for_status("POST", url.as_str(), &response)?;
        Ok(())
    }

    async fn download_whole<W>(
        &self,
        url: &Url,
        writer: &mut W,
        cancel: &CancellationToken,
        policy: &RetryPolicy,
    ) -> Result<(), ProxyError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut response = self
            .rest
            .execute(url.as_str(), policy, cancel, |client| client.get(url.clone()))
            .await?;
        error_for_status("GET", url.as_str(), &response)?;

        while let Some(chunk) = response.chunk().await.map_err(|source| ApiError::InvalidBody {
            url: url.to_string(),
            source,
        })? {
            writer.write_all(&chunk).await?;
        }

        Ok(())
    }

    async fn download_chunked<W>(
        &self,
        url: &Url,
        total: u64,
        writer: &mut W,
        cancel: &CancellationToken,
        policy: &RetryPolicy,
    ) -> Result<(), ProxyError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut start: u64 = 0;

        while start < total {
            let len = chunk_len(total, start, self.chunk_size);
            let end = start + len - 1;
            let range = format!("bytes={}-{}", start, end);

            let chunk_error = |source: ApiError| ProxyError::ChunkFailed {
                url: url.to_string(),
                start,
                end,
                source: Box::new(source),
            };

            let response = self
                .rest
                .execute(url.as_str(), policy, cancel, |client| {
                    client.get(url.clone()).header(RANGE, range.clone())
                })
                .await
                .map_err(|source| chunk_error(source))?;
            error_for_status("GET", url.as_str(), &response).map_err(|source| chunk_error(source))?;

            let bytes = response.bytes().await.map_err(|source| {
                chunk_error(ApiError::InvalidBody {
                    url: url.to_string(),
                    source,
                })
            })?;

            if bytes.is_empty() {
                return Err(ProxyError::EmptyChunk {
                    url: url.to_string(),
                    start,
                    end,
                });
            }

            writer.write_all(&bytes).await?;
            start += bytes.len() as u64;
            debug!(url = %url, downloaded = start, total, "Downloaded blob chunk");
        }

        Ok(())
    }
}

/// Size of the next chunk: the nominal size, or whatever remains for the
/// final chunk.
fn chunk_len(total: u64, start: u64, chunk_size: u64) -> u64 {
    chunk_size.min(total - start)
}

fn range_enabled(response: &Response) -> bool {
    response
        .headers()
        .get(ACCEPT_RANGES)
        .map(|value| !value.is_empty())
        .unwrap_or(false)
}

fn content_length(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
}
