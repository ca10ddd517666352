use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    access::AccessPolicy, auth::SessionAuth, config::Config, datastore::Datastore,
    grant::GrantIssuer, videos::VideoRepository,
};

/// Signed, self-expiring authorization for one direct upload to the CDN.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadGrant {
    pub token: String,
    #[serde(alias = "expire")]
    pub expires_at: i64,
    pub signature: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub video_url: String,
    pub thumbnail_url: String,
    pub created_at: DateTime<Utc>,
}

/// Body of `POST /api/video`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateVideoRequest {
    pub title: String,
    pub description: String,
    pub video_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

/// What the CDN answers after a successful upload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub url: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl UploadResult {
    pub fn into_video_request(self, title: &str, description: &str) -> CreateVideoRequest {
        let thumbnail_url = self
            .thumbnail_url
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| self.url.clone());
        CreateVideoRequest {
            title: title.to_string(),
            description: description.to_string(),
            video_url: self.url,
            thumbnail_url: Some(thumbnail_url),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    /// argon2 PHC string
    pub password: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsRequest {
    pub email: String,
    pub password: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: String,
    pub email: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub token: String,
    pub expires_at: i64,
    pub user: SessionUser,
}

#[derive(Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub struct AppState {
    pub config: Config,
    pub grants: GrantIssuer,
    pub videos: VideoRepository,
    pub auth: SessionAuth,
    pub access: AccessPolicy,
}

impl AppState {
    pub fn new(config: Config, datastore: Arc<dyn Datastore>) -> Self {
        let grants = GrantIssuer::new(config.imagekit.private_key.clone());
        let videos = VideoRepository::new(datastore.clone(), config.datastore_timeout);
        let auth = SessionAuth::new(datastore, &config);
        Self {
            config,
            grants,
            videos,
            auth,
            access: AccessPolicy::default(),
        }
    }
}
