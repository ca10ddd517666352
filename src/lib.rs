//! Backend and upload client for a small video-sharing site.
//!
//! Uploads go straight from the client to the media CDN under a short-lived signed
//! grant issued here; the server only stores the metadata afterwards.

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

pub mod access;
pub mod auth;
pub mod config;
pub mod datastore;
pub mod error;
pub mod grant;
pub mod handlers;
pub mod models;
pub mod system_info;
pub mod upload_client;
pub mod videos;

pub use config::Config;
pub use datastore::{Datastore, LazyDatastore};
pub use error::ApiError;
pub use grant::{GrantIssuer, GRANT_TTL_SECS};
pub use models::{AppState, CreateVideoRequest, UploadGrant, UploadResult, Video};
pub use upload_client::{FileType, SelectedFile, UploadClient, UploadClientConfig, UploadError};

use handlers::{
    create_video_handler, list_videos_handler, login_handler, register_handler,
    signout_handler, upload_auth_handler,
};

pub fn router(state: Arc<AppState>) -> Router {
    let request_timeout = state.config.request_timeout;

    Router::new()
        .route("/api/auth/imagekit-auth", get(upload_auth_handler))
        .route("/api/auth/register", post(register_handler))
        .route("/api/auth/login", post(login_handler))
        .route("/api/auth/signout", get(signout_handler).post(signout_handler))
        .route("/api/video", post(create_video_handler))
        .route("/api/videos", get(list_videos_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            access::enforce,
        ))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(TimeoutLayer::new(request_timeout)),
        )
        .with_state(state)
}
