use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use spinup_fs::{self as fs, FsError};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_stream::StreamExt;
use tracing::{debug, info};
use url::Url;

const REQUEST_TIMEOUT_SEC: u64 = 30;

const PROGRESS_TEMPLATE: &str = "{msg}\n{spinner:.green} [{bar:40.green/black}] {bytes:>11.green}/{total_bytes:<11.green} {bytes_per_sec:>13.red} eta {eta:.blue}";

#[derive(Error, Debug)]
pub enum HttpError {
    #[error("Failed to build HTTP client: {0}")]
    BuildClient(#[source] reqwest::Error),

    #[error("HTTP request error: {0}")]
    Request(#[source] reqwest::Error),

    #[error("HTTP status error for '{url}': {source}")]
    Status {
        url: Url,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP stream error: {0}")]
    Stream(#[source] reqwest::Error),

    #[error("File write error for '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Fs(#[from] FsError),
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    progress: bool,
}

impl HttpClient {
    pub fn new() -> Result<Self, HttpError> {
        let client = Client::builder()
            .read_timeout(Duration::from_secs(REQUEST_TIMEOUT_SEC))
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(HttpError::BuildClient)?;
        Ok(HttpClient {
            client,
            progress: true,
        })
    }

    /// Toggle the terminal progress bar shown while downloading.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Stream `url` into `file_path`.
    ///
    /// The body lands in a `.tmp` sibling first and is renamed into place once
    /// complete, so an interrupted download never looks like a finished one.
    pub async fn download_file<P: AsRef<Path>>(
        &self,
        url: &Url,
        file_path: P,
    ) -> Result<(), HttpError> {
        let file_path = file_path.as_ref();
        let temp_file = temp_path(file_path);

        if fs::path_exists(&temp_file).await? {
            fs::remove_file(&temp_file).await?;
        }

        info!("downloading {url}");

        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(HttpError::Request)?
            .error_for_status()
            .map_err(|source| HttpError::Status {
                url: url.clone(),
                source,
            })?;

        let progress = self.progress_bar(resp.content_length(), url);

        let mut file = fs::create_file(&temp_file).await?;

        let mut stream = resp.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(HttpError::Stream)?;
            file.write_all(&bytes)
                .await
                .map_err(|source| HttpError::Write {
                    path: temp_file.clone(),
                    source,
                })?;
            progress.inc(bytes.len() as u64);
        }

        // Ensure all data is flushed before renaming
        file.flush().await.map_err(|source| HttpError::Write {
            path: temp_file.clone(),
            source,
        })?;

        progress.finish_with_message(format!("Downloaded {url}"));

        fs::rename_file(&temp_file, file_path).await?;

        debug!("saved {url} to {}", file_path.display());

        Ok(())
    }

    fn progress_bar(&self, length: Option<u64>, url: &Url) -> ProgressBar {
        if !self.progress {
            return ProgressBar::hidden();
        }
        let progress = match length {
            Some(length) => {
                let progress = ProgressBar::new(length);
                if let Ok(style) = ProgressStyle::default_bar().template(PROGRESS_TEMPLATE) {
                    progress.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
                }
                progress
            }
            None => ProgressBar::new_spinner(),
        };
        progress.set_message(format!("Downloading {url}"));
        progress
    }
}

fn temp_path(file_path: &Path) -> PathBuf {
    let mut name = file_path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}
