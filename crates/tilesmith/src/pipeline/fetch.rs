//! Stage 1 transport: streaming the source image to local storage.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::error::FetchError;

/// Called with `(bytes_received, content_length)` as data arrives.
pub type ByteProgress<'a> = &'a (dyn Fn(u64, Option<u64>) + Send + Sync);

/// Downloads a source URL into a local file.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Streams `url` into `dest`, returning the number of bytes written.
    ///
    /// `dest` may be left partially written on error.
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        progress: ByteProgress<'_>,
    ) -> Result<u64, FetchError>;
}

/// [`SourceFetcher`] over a shared `reqwest` client.
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// `connect_timeout` bounds connection setup; `timeout` bounds the whole
    /// transfer including the body.
    pub fn new(connect_timeout: Duration, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .user_agent(concat!("tilesmith/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Http(e.to_string()))?;

        Ok(Self { client })
    }

    async fn send(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        let parsed =
            reqwest::Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl(url.to_string()));
        }

        let response = self.client.get(parsed).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        progress: ByteProgress<'_>,
    ) -> Result<u64, FetchError> {
        let response = self.send(url).await?;
        let total = response.content_length().filter(|len| *len > 0);

        let write_err = |source| FetchError::Write {
            path: dest.to_path_buf(),
            source,
        };

        let mut file = tokio::fs::File::create(dest).await.map_err(write_err)?;
        let mut stream = response.bytes_stream();
        let mut received = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await.map_err(write_err)?;
            received += chunk.len() as u64;
            progress(received, total);
        }

        file.flush().await.map_err(write_err)?;
        file.sync_all().await.map_err(write_err)?;

        Ok(received)
    }
}
