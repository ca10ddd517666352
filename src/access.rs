//! Which routes need a signed-in user.
//!
//! Rules are checked in order and the first match decides. Paths no rule covers
//! require a session.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::debug;

use crate::{error::ApiError, models::AppState};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Public,
    Session,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathMatcher {
    Exact(String),
    /// Matches the path itself and anything below it, segment-wise.
    Prefix(String),
}

impl PathMatcher {
    pub fn matches(&self, path: &str) -> bool {
        match self {
            Self::Exact(expected) => path == expected,
            Self::Prefix(prefix) => {
                let prefix = prefix.trim_end_matches('/');
                match path.strip_prefix(prefix) {
                    Some(rest) => rest.is_empty() || rest.starts_with('/'),
                    None => false,
                }
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessRule {
    pub matcher: PathMatcher,
    pub access: Access,
}

impl AccessRule {
    pub fn exact(path: &str, access: Access) -> Self {
        Self {
            matcher: PathMatcher::Exact(path.to_string()),
            access,
        }
    }

    pub fn prefix(path: &str, access: Access) -> Self {
        Self {
            matcher: PathMatcher::Prefix(path.to_string()),
            access,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AccessPolicy {
    rules: Vec<AccessRule>,
}

impl AccessPolicy {
    pub fn new(rules: Vec<AccessRule>) -> Self {
        Self { rules }
    }

    pub fn access_for(&self, path: &str) -> Access {
        self.rules
            .iter()
            .find(|rule| rule.matcher.matches(path))
            .map(|rule| rule.access)
            .unwrap_or(Access::Session)
    }
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self::new(vec![
            AccessRule::exact("/api/auth/imagekit-auth", Access::Session),
            AccessRule::prefix("/api/auth", Access::Public),
            AccessRule::exact("/", Access::Public),
            AccessRule::prefix("/api/videos", Access::Public),
        ])
    }
}

/// Middleware: resolve the session, reject non-public routes without one.
pub async fn enforce(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let session = state.auth.session_from_headers(request.headers());

    if state.access.access_for(&path) == Access::Session && session.is_none() {
        debug!("[access] {} {} needs a session", request.method(), path);
        return ApiError::Unauthorized("Authentication required".to_string()).into_response();
    }

    if let Some(session) = session {
        request.extensions_mut().insert(session);
    }
    next.run(request).await
}
