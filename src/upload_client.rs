//! Client side of the upload flow.
//!
//! `submit_file` checks the file locally, asks the server for a signed grant, then
//! streams the file straight to the CDN as a multipart form and reports progress as
//! bytes are handed to the transport. One client runs one upload at a time; there
//! are no automatic retries, a failed upload is simply submitted again.

use bytes::Bytes;
use futures::stream::{self, Stream, TryStreamExt};
use reqwest::{
    multipart::{Form, Part},
    Body, Response,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    io,
    path::{Path, PathBuf},
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use thiserror::Error;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::{
    config::DEFAULT_UPLOAD_ENDPOINT,
    models::{UploadGrant, UploadResult, Video},
};

/// 100 MiB
pub const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

const CHUNK_SIZE: usize = 64 * 1024;

type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + Sync>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Image,
    Video,
    Audio,
    Document,
}

#[derive(Clone, Debug)]
pub enum FileSource {
    Memory(Bytes),
    Path(PathBuf),
}

/// A file picked for upload: its name, declared media type and where the bytes live.
#[derive(Clone, Debug)]
pub struct SelectedFile {
    pub name: String,
    pub media_type: String,
    size: u64,
    source: FileSource,
}

impl SelectedFile {
    pub fn from_bytes(
        name: impl Into<String>,
        media_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        let data = data.into();
        Self {
            name: name.into(),
            media_type: media_type.into(),
            size: data.len() as u64,
            source: FileSource::Memory(data),
        }
    }

    /// Only reads metadata; the media type is guessed from the extension.
    pub async fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{:?} is not a file", path),
            ));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let media_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        Ok(Self {
            name,
            media_type,
            size: metadata.len(),
            source: FileSource::Path(path.to_path_buf()),
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    async fn into_stream(self) -> io::Result<ByteStream> {
        match self.source {
            FileSource::Memory(data) => {
                let chunks: Vec<io::Result<Bytes>> = (0..data.len())
                    .step_by(CHUNK_SIZE)
                    .map(|start| Ok(data.slice(start..(start + CHUNK_SIZE).min(data.len()))))
                    .collect();
                Ok(Box::pin(stream::iter(chunks)))
            }
            FileSource::Path(path) => {
                let file = tokio::fs::File::open(path).await?;
                Ok(Box::pin(ReaderStream::with_capacity(file, CHUNK_SIZE)))
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("an upload is already in progress")]
    Busy,
    #[error("{0}")]
    Validation(String),
    #[error("could not obtain upload authorization: {0}")]
    Authorization(String),
    #[error("upload failed: {message}")]
    Upload {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },
    #[error("could not publish video: {0}")]
    Publish(String),
}

impl UploadError {
    fn upload(message: impl Into<String>, source: Option<reqwest::Error>) -> Self {
        Self::Upload {
            message: message.into(),
            source,
        }
    }

    /// Whether submitting again may succeed without changing the input.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Validation(_))
    }
}

/// Local checks that run before any network call.
pub fn validate(file: &SelectedFile, file_type: FileType) -> Result<(), UploadError> {
    if file_type == FileType::Video && !file.media_type.starts_with("video/") {
        return Err(UploadError::Validation("invalid file type".to_string()));
    }
    if file.size > MAX_FILE_SIZE {
        return Err(UploadError::Validation("file too large".to_string()));
    }
    Ok(())
}

#[derive(Clone, Debug)]
pub struct UploadClientConfig {
    /// Base URL of the video-share server, e.g. `http://localhost:3000`.
    pub api_base: String,
    pub upload_endpoint: String,
    pub public_key: String,
    pub folder: String,
    pub use_unique_file_name: bool,
    pub session_token: Option<String>,
    pub timeout: Duration,
}

impl UploadClientConfig {
    pub fn new(api_base: impl Into<String>, public_key: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            upload_endpoint: DEFAULT_UPLOAD_ENDPOINT.to_string(),
            public_key: public_key.into(),
            folder: "/videos".to_string(),
            use_unique_file_name: true,
            session_token: None,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Integer percentages, reported only when they grow.
struct ProgressTracker {
    total: u64,
    sent: u64,
    last: Option<u8>,
    callback: Arc<dyn Fn(u8) + Send + Sync>,
}

impl ProgressTracker {
    fn new(total: u64, callback: Arc<dyn Fn(u8) + Send + Sync>) -> Self {
        Self {
            total,
            sent: 0,
            last: None,
            callback,
        }
    }

    fn advance(&mut self, bytes: u64) {
        self.sent = self.sent.saturating_add(bytes);
        let percent = if self.total == 0 {
            100
        } else {
            (self.sent.min(self.total) * 100 / self.total) as u8
        };
        self.report(percent);
    }

    fn finish(&mut self) {
        self.report(100);
    }

    fn report(&mut self, percent: u8) {
        if self.last.map_or(true, |last| percent > last) {
            self.last = Some(percent);
            (self.callback)(percent);
        }
    }
}

/// Clears the in-flight flag however the upload ends, including when its future is dropped.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct UploadClient {
    http: reqwest::Client,
    config: UploadClientConfig,
    in_flight: Arc<AtomicBool>,
}

impl UploadClient {
    pub fn new(config: UploadClientConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            config,
            in_flight: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn set_session_token(&mut self, token: impl Into<String>) {
        self.config.session_token = Some(token.into());
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
    }

    fn with_session(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.session_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Validate, authorize and upload one file. `on_progress` receives increasing
    /// percentages and ends at 100 on success.
    pub async fn submit_file<F>(
        &self,
        file: SelectedFile,
        file_type: FileType,
        on_progress: F,
    ) -> Result<UploadResult, UploadError>
    where
        F: Fn(u8) + Send + Sync + 'static,
    {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("[upload] Rejected {}: another upload is in progress", file.name);
            return Err(UploadError::Busy);
        }
        let _guard = BusyGuard(self.in_flight.clone());

        validate(&file, file_type)?;

        let grant = self.request_grant().await?;
        self.upload(file, &grant, Arc::new(on_progress)).await
    }

    async fn request_grant(&self) -> Result<UploadGrant, UploadError> {
        let request = self.with_session(self.http.get(self.api_url("/api/auth/imagekit-auth")));
        let response = request
            .send()
            .await
            .map_err(|e| UploadError::Authorization(e.to_string()))?;

        if !response.status().is_success() {
            let message = error_message(response).await;
            return Err(UploadError::Authorization(message));
        }

        response
            .json::<UploadGrant>()
            .await
            .map_err(|e| UploadError::Authorization(format!("invalid grant response: {}", e)))
    }

    async fn upload(
        &self,
        file: SelectedFile,
        grant: &UploadGrant,
        on_progress: Arc<dyn Fn(u8) + Send + Sync>,
    ) -> Result<UploadResult, UploadError> {
        let name = file.name.clone();
        let media_type = file.media_type.clone();
        let size = file.size;

        let tracker = Arc::new(Mutex::new(ProgressTracker::new(size, on_progress)));
        let stream_tracker = tracker.clone();
        let stream = file
            .into_stream()
            .await
            .map_err(|e| UploadError::upload(format!("could not read {}: {}", name, e), None))?
            .inspect_ok(move |chunk| {
                if let Ok(mut tracker) = stream_tracker.lock() {
                    tracker.advance(chunk.len() as u64);
                }
            });

        let mut part = Part::stream_with_length(Body::wrap_stream(stream), size).file_name(name.clone());
        if media_type.parse::<mime_guess::mime::Mime>().is_ok() {
            part = part
                .mime_str(&media_type)
                .map_err(|e| UploadError::upload("invalid media type", Some(e)))?;
        }

        let form = Form::new()
            .part("file", part)
            .text("fileName", name.clone())
            .text("publicKey", self.config.public_key.clone())
            .text("signature", grant.signature.clone())
            .text("expire", grant.expires_at.to_string())
            .text("token", grant.token.clone())
            .text("folder", self.config.folder.clone())
            .text(
                "useUniqueFileName",
                self.config.use_unique_file_name.to_string(),
            );

        info!("[upload] 📤 Uploading {} ({} bytes)", name, size);

        let response = self
            .http
            .post(&self.config.upload_endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                let message = if e.is_timeout() {
                    "request to CDN timed out".to_string()
                } else {
                    e.to_string()
                };
                UploadError::upload(message, Some(e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = error_message(response).await;
            warn!("[upload] ❌ CDN rejected {}: {} {}", name, status, message);
            return Err(UploadError::upload(
                format!("CDN responded {}: {}", status.as_u16(), message),
                None,
            ));
        }

        let result = response
            .json::<UploadResult>()
            .await
            .map_err(|e| UploadError::upload("invalid CDN response", Some(e)))?;

        if let Ok(mut tracker) = tracker.lock() {
            tracker.finish();
        }
        info!("[upload] ✅ Uploaded {} -> {}", name, result.url);
        Ok(result)
    }

    /// Store metadata for a finished upload on the server.
    pub async fn publish(
        &self,
        result: UploadResult,
        title: &str,
        description: &str,
    ) -> Result<Video, UploadError> {
        if title.trim().is_empty() {
            return Err(UploadError::Validation("title is required".to_string()));
        }
        let request = result.into_video_request(title, description);

        let response = self
            .with_session(self.http.post(self.api_url("/api/video")))
            .json(&request)
            .send()
            .await
            .map_err(|e| UploadError::Publish(e.to_string()))?;

        if !response.status().is_success() {
            return Err(UploadError::Publish(error_message(response).await));
        }

        let video = response
            .json::<Video>()
            .await
            .map_err(|e| UploadError::Publish(format!("invalid response: {}", e)))?;
        debug!("[publish] Video {} published", video.id);
        Ok(video)
    }
}

/// `error` or `message` from a JSON error body, else the raw text, else the status reason.
async fn error_message(response: Response) -> String {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    message_from_body(&text).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("unexpected status")
            .to_string()
    })
}

fn message_from_body(text: &str) -> Option<String> {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        for key in ["error", "message"] {
            if let Some(message) = value.get(key).and_then(Value::as_str) {
                return Some(message.to_string());
            }
        }
    }
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}
