#![allow(dead_code)]

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::Json,
    routing::post,
    Router,
};
use bytes::Bytes;
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::{collections::HashMap, convert::Infallible, sync::Arc, time::Duration};
use tokio::{net::TcpListener, sync::Mutex};
use video_share::{
    config::ConfigFile,
    datastore::MemoryDatastore,
    grant,
    models::{SessionResponse, UploadGrant},
    router, AppState, Config, UploadClient, UploadClientConfig,
};

pub const PRIVATE_KEY: &str = "private_integration_key";
pub const PUBLIC_KEY: &str = "public_integration_key";

pub struct TestApp {
    pub base_url: String,
    pub state: Arc<AppState>,
    pub http: reqwest::Client,
}

impl TestApp {
    pub async fn spawn(private_key: Option<&str>) -> Self {
        let mut file = ConfigFile::default();
        file.imagekit.private_key = private_key.map(str::to_string);
        file.imagekit.public_key = Some(PUBLIC_KEY.to_string());
        file.auth.session_secret = Some("integration-secret".to_string());
        let config = Config::from_sources(file, |_| None);

        let state = Arc::new(AppState::new(config, Arc::new(MemoryDatastore::new())));
        let app = router(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
            http: reqwest::Client::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Register and sign in, returning the session token.
    pub async fn sign_in(&self, email: &str, password: &str) -> String {
        let credentials = json!({"email": email, "password": password});
        let response = self
            .http
            .post(self.url("/api/auth/register"))
            .json(&credentials)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 201);

        let response = self
            .http
            .post(self.url("/api/auth/login"))
            .json(&credentials)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        response.json::<SessionResponse>().await.unwrap().token
    }

    pub fn client(&self, cdn: &MockCdn, token: Option<String>) -> UploadClient {
        let mut config = UploadClientConfig::new(self.base_url.clone(), PUBLIC_KEY);
        config.upload_endpoint = cdn.upload_url();
        config.session_token = token;
        config.timeout = Duration::from_secs(10);
        UploadClient::new(config).unwrap()
    }
}

#[derive(Clone, Debug)]
pub struct ReceivedUpload {
    pub fields: HashMap<String, String>,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

pub struct MockCdnState {
    pub private_key: String,
    pub delay: Duration,
    pub base_url: String,
    pub uploads: Mutex<Vec<ReceivedUpload>>,
}

/// Stands in for the CDN's upload API: checks the grant like the real service would
/// and answers with an ImageKit-shaped result.
pub struct MockCdn {
    pub state: Arc<MockCdnState>,
}

impl MockCdn {
    pub async fn spawn(private_key: &str, delay: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(MockCdnState {
            private_key: private_key.to_string(),
            delay,
            base_url: format!("http://{}", addr),
            uploads: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/api/v1/files/upload", post(upload))
            .with_state(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { state }
    }

    pub fn upload_url(&self) -> String {
        format!("{}/api/v1/files/upload", self.state.base_url)
    }

    pub async fn uploads(&self) -> Vec<ReceivedUpload> {
        self.state.uploads.lock().await.clone()
    }
}

async fn upload(
    State(state): State<Arc<MockCdnState>>,
    request: Request<Body>,
) -> (StatusCode, Json<Value>) {
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let boundary = match multer::parse_boundary(&content_type) {
        Ok(boundary) => boundary,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"message": format!("Invalid multipart request: {}", e)})),
            )
        }
    };

    let body_bytes = request.into_body().collect().await.unwrap().to_bytes();
    let mut multipart = multer::Multipart::new(
        futures::stream::once(async move { Ok::<Bytes, Infallible>(body_bytes) }),
        boundary,
    );

    let mut received = ReceivedUpload {
        fields: HashMap::new(),
        file_name: None,
        content_type: None,
        data: Bytes::new(),
    };
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or("").to_string();
        if name == "file" {
            received.file_name = field.file_name().map(str::to_string);
            received.content_type = field.content_type().map(|m| m.to_string());
            received.data = field.bytes().await.unwrap();
        } else {
            received.fields.insert(name, field.text().await.unwrap());
        }
    }

    tokio::time::sleep(state.delay).await;

    let grant = UploadGrant {
        token: received.fields.get("token").cloned().unwrap_or_default(),
        expires_at: received
            .fields
            .get("expire")
            .and_then(|e| e.parse().ok())
            .unwrap_or_default(),
        signature: received.fields.get("signature").cloned().unwrap_or_default(),
    };
    if !grant::verify(&state.private_key, &grant, Utc::now().timestamp()) {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"message": "Your request contains invalid signature", "help": ""})),
        );
    }

    let file_name = received
        .fields
        .get("fileName")
        .cloned()
        .unwrap_or_else(|| "upload".to_string());
    let folder = received
        .fields
        .get("folder")
        .cloned()
        .unwrap_or_default();
    let size = received.data.len();
    state.uploads.lock().await.push(received);

    (
        StatusCode::OK,
        Json(json!({
            "fileId": "file_1",
            "name": file_name,
            "size": size,
            "filePath": format!("{}/{}", folder.trim_end_matches('/'), file_name),
            "url": format!("{}/media{}/{}", state.base_url, folder.trim_end_matches('/'), file_name),
            "fileType": "non-image"
        })),
    )
}
