use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderName, StatusCode},
    response::Json,
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    auth::cleared_session_cookie,
    error::ApiError,
    models::{
        AppState, CreateVideoRequest, CredentialsRequest, MessageResponse, SessionResponse,
        UploadGrant, Video,
    },
};

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value).map_err(|rejection| {
        warn!("Malformed request body: {}", rejection.body_text());
        ApiError::Validation(rejection.body_text())
    })
}

/// Issue a signed grant for one direct upload to the CDN
pub async fn upload_auth_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<UploadGrant>, ApiError> {
    let grant = state.grants.issue()?;
    info!("[GET /api/auth/imagekit-auth] ✅ Upload grant generated");
    Ok(Json(grant))
}

/// Store title/description for an upload that already reached the CDN
pub async fn create_video_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreateVideoRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Video>), ApiError> {
    let request = json_body(body)?;
    let video = state.videos.create_video(request).await?;
    Ok((StatusCode::CREATED, Json(video)))
}

/// All videos, newest first
pub async fn list_videos_handler(State(state): State<Arc<AppState>>) -> Json<Vec<Video>> {
    Json(state.videos.list_videos().await)
}

pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CredentialsRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    let request = json_body(body)?;
    state.auth.register(&request.email, &request.password).await?;
    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            message: "User created!".to_string(),
        }),
    ))
}

type SetCookie = [(HeaderName, String); 1];

/// The token goes back in the body for API clients and as a cookie for browsers
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CredentialsRequest>, JsonRejection>,
) -> Result<(SetCookie, Json<SessionResponse>), ApiError> {
    let request = json_body(body)?;
    let session = state
        .auth
        .authenticate(&request.email, &request.password)
        .await?;
    let cookie = state.auth.session_cookie(&session.token);
    Ok(([(header::SET_COOKIE, cookie)], Json(session)))
}

pub async fn signout_handler() -> (SetCookie, Json<MessageResponse>) {
    info!("[/api/auth/signout] Session cookie cleared");
    (
        [(header::SET_COOKIE, cleared_session_cookie())],
        Json(MessageResponse {
            message: "Signed out".to_string(),
        }),
    )
}
