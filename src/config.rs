use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_UPLOAD_ENDPOINT: &str = "https://upload.imagekit.io/api/v1/files/upload";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub port: Option<u16>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageKitSection {
    pub private_key: Option<String>,
    pub public_key: Option<String>,
    pub upload_endpoint: Option<String>,
    pub folder: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub session_secret: Option<String>,
    pub session_max_age_secs: Option<u64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub server: ServerSection,
    pub imagekit: ImageKitSection,
    pub database: DatabaseSection,
    pub auth: AuthSection,
}

#[derive(Clone, Debug)]
pub struct ImageKitConfig {
    pub private_key: Option<String>,
    pub public_key: Option<String>,
    pub upload_endpoint: String,
    pub folder: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub request_timeout: Duration,
    pub imagekit: ImageKitConfig,
    pub database_url: String,
    pub datastore_timeout: Duration,
    pub session_secret: Option<String>,
    pub session_max_age: Duration,
}

impl Config {
    /// Read `config.toml` (or `$CONFIG_PATH`) if present, then let the environment override it.
    pub fn load() -> anyhow::Result<Self> {
        let base_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

        let config_path = std::env::var("CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| base_dir.join("config.toml"));
        let config_file = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Some(toml::from_str::<ConfigFile>(&content)?)
        } else {
            None
        };

        Ok(Self::from_sources(config_file.unwrap_or_default(), |name| {
            std::env::var(name).ok()
        }))
    }

    pub fn from_sources<F>(file: ConfigFile, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        // Blank values count as unset everywhere.
        let env = |name: &str| env(name).filter(|v| !v.trim().is_empty());
        let text = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

        let port = env("PORT")
            .and_then(|p| p.parse().ok())
            .or(file.server.port)
            .unwrap_or(3000);

        let request_timeout_secs = env("REQUEST_TIMEOUT_SECS")
            .and_then(|v| v.parse().ok())
            .or(file.server.request_timeout_secs)
            .unwrap_or(30);

        let imagekit = ImageKitConfig {
            private_key: env("IMAGEKIT_PRIVATE_KEY").or(text(file.imagekit.private_key)),
            public_key: env("IMAGEKIT_PUBLIC_KEY").or(text(file.imagekit.public_key)),
            upload_endpoint: env("IMAGEKIT_UPLOAD_URL")
                .or(text(file.imagekit.upload_endpoint))
                .unwrap_or_else(|| DEFAULT_UPLOAD_ENDPOINT.to_string()),
            folder: env("UPLOAD_FOLDER")
                .or(text(file.imagekit.folder))
                .unwrap_or_else(|| "/videos".to_string()),
        };

        let database_url = env("DATABASE_URL")
            .or(text(file.database.url))
            .unwrap_or_else(|| "memory:".to_string());

        let datastore_timeout_secs = env("DATASTORE_TIMEOUT_SECS")
            .and_then(|v| v.parse().ok())
            .or(file.database.timeout_secs)
            .unwrap_or(10);

        let session_secret = env("SESSION_SECRET").or(text(file.auth.session_secret));

        let session_max_age_secs = env("SESSION_MAX_AGE_SECS")
            .and_then(|v| v.parse().ok())
            .or(file.auth.session_max_age_secs)
            .unwrap_or(30 * 24 * 60 * 60);

        Self {
            port,
            request_timeout: Duration::from_secs(request_timeout_secs),
            imagekit,
            database_url,
            datastore_timeout: Duration::from_secs(datastore_timeout_secs),
            session_secret,
            session_max_age: Duration::from_secs(session_max_age_secs),
        }
    }

    // Backward compatibility
    pub fn from_env() -> Self {
        Self::load().unwrap_or_else(|e| {
            eprintln!("Warning: Failed to load config: {}. Using defaults.", e);
            Self::default()
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_sources(ConfigFile::default(), |_| None)
    }
}
