use forgery_core::BackendKind;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const INSECURE_DEV_SECRET: &str = "insecure_dev_key_change_me";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid FORGERY_INFERENCE: {0}")]
    Inference(String),
}

/// Daemon configuration: defaults, then the optional TOML file named by
/// `FORGERY_CONFIG`, then `FORGERY_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address (default: 0.0.0.0:8000).
    pub bind: String,
    /// Root for uploads and analysis artifacts.
    pub storage_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory holding the ONNX checkpoints; retraining writes here too.
    pub model_dir: PathBuf,
    /// Backend selection: auto, onnx or mock.
    pub inference: BackendKind,
    /// Fixed RNG seed for the mock backend.
    pub mock_seed: Option<u64>,
    /// HS256 signing secret for access tokens.
    pub secret_key: String,
    pub token_ttl_minutes: u64,
    /// Origins allowed by CORS.
    pub cors_origins: Vec<String>,
    /// Training command; `--data_dir` and `--checkpoint_dir` are appended.
    pub train_command: Option<String>,
    pub train_data_dir: PathBuf,
    pub max_upload_bytes: usize,
    /// Serve the storage directory under `/files` without auth.
    pub serve_files: bool,
}

/// Shape of the TOML config file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    bind: Option<String>,
    storage_dir: Option<PathBuf>,
    db_path: Option<PathBuf>,
    model_dir: Option<PathBuf>,
    inference: Option<BackendKind>,
    mock_seed: Option<u64>,
    secret_key: Option<String>,
    token_ttl_minutes: Option<u64>,
    cors_origins: Option<Vec<String>>,
    train_command: Option<String>,
    train_data_dir: Option<PathBuf>,
    max_upload_bytes: Option<usize>,
    serve_files: Option<bool>,
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("forgery")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
            storage_dir: PathBuf::from("storage/uploads"),
            db_path: default_data_dir().join("forgery.db"),
            model_dir: PathBuf::from("ml/checkpoints"),
            inference: BackendKind::Auto,
            mock_seed: None,
            secret_key: INSECURE_DEV_SECRET.to_string(),
            token_ttl_minutes: 60,
            cors_origins: vec!["http://localhost:3000".to_string()],
            train_command: None,
            train_data_dir: PathBuf::from("../dataset"),
            max_upload_bytes: 10 * 1024 * 1024,
            serve_files: true,
        }
    }
}

impl Config {
    /// Load configuration from `FORGERY_CONFIG` and `FORGERY_*` variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(path) = std::env::var("FORGERY_CONFIG") {
            config.apply_file(load_file(Path::new(&path))?);
        }
        config.apply_env()?;

        if config.uses_insecure_secret() {
            tracing::warn!("FORGERY_SECRET_KEY not set, using the insecure development key");
        }
        Ok(config)
    }

    /// Defaults plus the given TOML file, without reading the environment.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_file(load_file(path)?);
        Ok(config)
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(v) = file.bind {
            self.bind = v;
        }
        if let Some(v) = file.storage_dir {
            self.storage_dir = v;
        }
        if let Some(v) = file.db_path {
            self.db_path = v;
        }
        if let Some(v) = file.model_dir {
            self.model_dir = v;
        }
        if let Some(v) = file.inference {
            self.inference = v;
        }
        if file.mock_seed.is_some() {
            self.mock_seed = file.mock_seed;
        }
        if let Some(v) = file.secret_key {
            self.secret_key = v;
        }
        if let Some(v) = file.token_ttl_minutes {
            self.token_ttl_minutes = v;
        }
        if let Some(v) = file.cors_origins {
            self.cors_origins = v;
        }
        if file.train_command.is_some() {
            self.train_command = file.train_command;
        }
        if let Some(v) = file.train_data_dir {
            self.train_data_dir = v;
        }
        if let Some(v) = file.max_upload_bytes {
            self.max_upload_bytes = v;
        }
        if let Some(v) = file.serve_files {
            self.serve_files = v;
        }
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.bind = env_string("FORGERY_BIND", &self.bind);
        self.storage_dir = env_path("FORGERY_STORAGE_DIR", &self.storage_dir);
        self.db_path = env_path("FORGERY_DB_PATH", &self.db_path);
        self.model_dir = env_path("FORGERY_MODEL_DIR", &self.model_dir);
        if let Ok(v) = std::env::var("FORGERY_INFERENCE") {
            self.inference = v.parse().map_err(ConfigError::Inference)?;
        }
        if let Some(seed) = std::env::var("FORGERY_MOCK_SEED").ok().and_then(|v| v.parse().ok()) {
            self.mock_seed = Some(seed);
        }
        self.secret_key = env_string("FORGERY_SECRET_KEY", &self.secret_key);
        self.token_ttl_minutes = env_u64("FORGERY_TOKEN_TTL_MINUTES", self.token_ttl_minutes);
        if let Ok(v) = std::env::var("FORGERY_CORS_ORIGINS") {
            self.cors_origins = parse_origins(&v);
        }
        if let Ok(v) = std::env::var("FORGERY_TRAIN_COMMAND") {
            self.train_command = Some(v).filter(|c| !c.trim().is_empty());
        }
        self.train_data_dir = env_path("FORGERY_TRAIN_DATA_DIR", &self.train_data_dir);
        self.max_upload_bytes = env_usize("FORGERY_MAX_UPLOAD_BYTES", self.max_upload_bytes);
        self.serve_files = env_bool("FORGERY_SERVE_FILES", self.serve_files);
        Ok(())
    }

    pub fn uses_insecure_secret(&self) -> bool {
        self.secret_key == INSECURE_DEV_SECRET
    }

    /// Path to the DenseNet-121 classifier.
    pub fn densenet_model_path(&self) -> PathBuf {
        self.model_dir.join(forgery_core::DENSENET_MODEL_FILE)
    }

    /// Path to the MobileNetV2 classifier.
    pub fn mobilenet_model_path(&self) -> PathBuf {
        self.model_dir.join(forgery_core::MOBILENET_MODEL_FILE)
    }

    /// Path to the SCRFD face detector.
    pub fn face_model_path(&self) -> PathBuf {
        self.model_dir.join(forgery_core::FACE_MODEL_FILE)
    }
}

fn load_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let display = path.display().to_string();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read { path: display.clone(), source })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse { path: display, source })
}

fn parse_origins(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(String::from)
        .collect()
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_path(key: &str, default: &Path) -> PathBuf {
    std::env::var(key)
        .map(PathBuf::from)
        .unwrap_or_else(|_| default.to_path_buf())
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| parse_bool(&v))
        .unwrap_or(default)
}
