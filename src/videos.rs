use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tracing::{error, info};

use crate::{
    datastore::{with_timeout, Datastore, DatastoreError, Document, Sort},
    error::ApiError,
    models::{CreateVideoRequest, Video},
};

pub const VIDEOS: &str = "videos";

#[derive(Clone)]
pub struct VideoRepository {
    store: Arc<dyn Datastore>,
    timeout: Duration,
}

impl VideoRepository {
    pub fn new(store: Arc<dyn Datastore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Persist metadata for an upload the client reports as finished.
    pub async fn create_video(&self, request: CreateVideoRequest) -> Result<Video, ApiError> {
        self.create_video_at(request, Utc::now()).await
    }

    pub async fn create_video_at(
        &self,
        request: CreateVideoRequest,
        created_at: DateTime<Utc>,
    ) -> Result<Video, ApiError> {
        let title = request.title.trim();
        if title.is_empty() {
            return Err(ApiError::Validation("title is required".to_string()));
        }
        let video_url = request.video_url.trim();
        if video_url.is_empty() {
            return Err(ApiError::Validation("videoUrl is required".to_string()));
        }
        let thumbnail_url = request
            .thumbnail_url
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(video_url);

        let mut doc = Document::new();
        doc.insert("title".into(), json!(title));
        doc.insert("description".into(), json!(request.description));
        doc.insert("videoUrl".into(), json!(video_url));
        doc.insert("thumbnailUrl".into(), json!(thumbnail_url));
        doc.insert("createdAt".into(), json!(created_at));

        let stored = with_timeout(self.timeout, self.store.create(VIDEOS, doc))
            .await
            .map_err(|e| ApiError::persistence("Failed to create video", e))?;
        let video = decode(stored).map_err(|e| ApiError::persistence("Failed to create video", e))?;

        info!("[POST /api/video] ✅ Video {} created: {:?}", video.id, video.title);
        Ok(video)
    }

    /// Every video, newest first. Read failures degrade to an empty list.
    pub async fn list_videos(&self) -> Vec<Video> {
        let docs = match with_timeout(
            self.timeout,
            self.store.find_all(VIDEOS, &Sort::descending("createdAt")),
        )
        .await
        {
            Ok(docs) => docs,
            Err(e) => {
                error!("Error fetching videos: {}", e);
                return Vec::new();
            }
        };

        match docs.into_iter().map(decode).collect::<Result<Vec<_>, _>>() {
            Ok(videos) => videos,
            Err(e) => {
                error!("Error decoding videos: {}", e);
                Vec::new()
            }
        }
    }
}

fn decode(doc: Document) -> Result<Video, DatastoreError> {
    Ok(serde_json::from_value(Value::Object(doc))?)
}
