use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use spinup_cmd::{Command, CommandError};
use spinup_fs::{self as fs, FsError};
use spinup_http::{HttpClient, HttpError};
use spinup_system::{OsType, OsVariant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};
use url::Url;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("failed to load image table: {0}")]
    Table(#[from] toml::de::Error),

    #[error("no base image for {os_type} {os_variant}")]
    NoImage { os_type: OsType, os_variant: OsVariant },

    #[error("decompressing {} did not produce {}", archive.display(), image.display())]
    Decompress { archive: PathBuf, image: PathBuf },

    #[error("image cache has shut down")]
    CacheClosed,

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Fs(#[from] FsError),
}

/// What a caller gets back. Failures are shared by every caller asking for the same image.
pub type ImageResult = Result<PathBuf, Arc<ImageError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageKey {
    pub os_type: OsType,
    pub os_variant: OsVariant,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImageSource {
    pub os_type: OsType,
    pub os_variant: OsVariant,
    pub url: Url,
    /// Name of the usable image inside the images directory.
    pub file: String,
}

impl ImageSource {
    pub fn key(&self) -> ImageKey {
        ImageKey {
            os_type: self.os_type,
            os_variant: self.os_variant,
        }
    }

    pub fn compression(&self) -> Compression {
        Compression::from_url(&self.url)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageTable {
    #[serde(rename = "image")]
    images: Vec<ImageSource>,
}

impl ImageTable {
    pub fn builtin() -> Result<Self, ImageError> {
        let table = include_str!("../images.toml");
        Ok(toml::from_str(table)?)
    }

    pub fn find(&self, key: ImageKey) -> Option<&ImageSource> {
        self.images.iter().find(|image| image.key() == key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Xz,
    Gzip,
    Bzip2,
}

impl Compression {
    pub fn from_url(url: &Url) -> Self {
        let path = url.path();
        if path.ends_with(".xz") {
            Compression::Xz
        } else if path.ends_with(".gz") {
            Compression::Gzip
        } else if path.ends_with(".bz2") {
            Compression::Bzip2
        } else {
            Compression::None
        }
    }

    fn extension(&self) -> Option<&'static str> {
        match self {
            Compression::None => None,
            Compression::Xz => Some("xz"),
            Compression::Gzip => Some("gz"),
            Compression::Bzip2 => Some("bz2"),
        }
    }

    fn program(&self) -> Option<&'static str> {
        match self {
            Compression::None => None,
            Compression::Xz => Some("xz"),
            Compression::Gzip => Some("gzip"),
            Compression::Bzip2 => Some("bzip2"),
        }
    }

    /// Where the download lands before decompression.
    pub fn archive_path(&self, image: &Path) -> PathBuf {
        match self.extension() {
            None => image.to_path_buf(),
            Some(ext) => {
                let mut name = image.as_os_str().to_owned();
                name.push(".");
                name.push(ext);
                PathBuf::from(name)
            }
        }
    }
}

/// Puts a base image at a path.
#[async_trait]
pub trait ImageFetcher: Send + Sync + 'static {
    async fn fetch(&self, source: &ImageSource, target: &Path) -> Result<(), ImageError>;
}

/// Downloads over HTTP and decompresses in place.
#[derive(Debug, Clone)]
pub struct HttpImageFetcher {
    http: HttpClient,
}

impl HttpImageFetcher {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, source: &ImageSource, target: &Path) -> Result<(), ImageError> {
        let compression = source.compression();
        let archive = compression.archive_path(target);

        self.http.download_file(&source.url, &archive).await?;

        let Some(program) = compression.program() else {
            return Ok(());
        };

        info!("decompressing {}", archive.display());
        Command::new(program)
            .args(["-d", "-f"])
            .arg(&archive)
            .run()
            .await?;

        if !fs::path_exists(target).await? {
            return Err(ImageError::Decompress {
                archive,
                image: target.to_path_buf(),
            });
        }
        Ok(())
    }
}

#[derive(Debug)]
enum CacheMessage {
    Fetch {
        key: ImageKey,
        reply: oneshot::Sender<ImageResult>,
    },
    Shutdown,
}

/// Cheap handle for talking to the image cache task.
#[derive(Debug, Clone)]
pub struct ImageCache {
    sender: mpsc::UnboundedSender<CacheMessage>,
}

impl ImageCache {
    /// Start the cache task. It serves requests one at a time until [`ImageCache::shutdown`].
    pub fn spawn<F: ImageFetcher>(
        images_dir: PathBuf,
        table: ImageTable,
        fetcher: F,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = ImageWorker {
            images_dir,
            table,
            fetcher,
            results: HashMap::new(),
        };
        let task = tokio::spawn(worker.run(receiver));
        (Self { sender }, task)
    }

    /// Path to the base image for this os, fetching it first if needed.
    pub async fn get_image(&self, os_type: OsType, os_variant: OsVariant) -> ImageResult {
        let (reply, response) = oneshot::channel();
        let key = ImageKey {
            os_type,
            os_variant,
        };
        self.sender
            .send(CacheMessage::Fetch { key, reply })
            .map_err(|_| Arc::new(ImageError::CacheClosed))?;
        response
            .await
            .map_err(|_| Arc::new(ImageError::CacheClosed))?
    }

    /// Ask the task to stop after the requests already queued.
    pub fn shutdown(&self) {
        if self.sender.send(CacheMessage::Shutdown).is_err() {
            debug!("image cache already stopped");
        }
    }
}

struct ImageWorker<F> {
    images_dir: PathBuf,
    table: ImageTable,
    fetcher: F,
    results: HashMap<ImageKey, ImageResult>,
}

impl<F: ImageFetcher> ImageWorker<F> {
    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<CacheMessage>) {
        while let Some(message) = receiver.recv().await {
            let (key, reply) = match message {
                CacheMessage::Fetch { key, reply } => (key, reply),
                CacheMessage::Shutdown => break,
            };

            let result = match self.results.get(&key) {
                Some(result) => {
                    debug!("image cache hit for {} {}", key.os_type, key.os_variant);
                    result.clone()
                }
                None => {
                    let result = self.resolve(key).await.map_err(Arc::new);
                    self.results.insert(key, result.clone());
                    result
                }
            };

            if reply.send(result).is_err() {
                debug!("image requester went away");
            }
        }
        debug!("image cache stopped");
    }

    #[instrument(skip(self), fields(os = %key.os_variant))]
    async fn resolve(&self, key: ImageKey) -> Result<PathBuf, ImageError> {
        let source = self.table.find(key).ok_or(ImageError::NoImage {
            os_type: key.os_type,
            os_variant: key.os_variant,
        })?;
        let target = self.images_dir.join(&source.file);

        if fs::path_exists(&target).await? {
            info!("using cached image {}", target.display());
            return Ok(target);
        }

        fs::setup_directory_access(&self.images_dir).await?;
        let _lock = fs::lock_path(self.images_dir.join(format!("{}.lock", source.file))).await?;

        // Another invocation may have finished the download while we waited.
        if fs::path_exists(&target).await? {
            info!("using cached image {}", target.display());
            return Ok(target);
        }

        info!("fetching image {}", source.url);
        self.fetcher.fetch(source, &target).await?;
        Ok(target)
    }
}
