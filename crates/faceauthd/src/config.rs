use faceauth_core::MatchPolicy;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

const DEFAULT_PORT: u16 = 5001;
const DEFAULT_TOLERANCE: f32 = 1.0;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_ENGINE_QUEUE: usize = 4;

/// Which [`FaceStore`](crate::store::FaceStore) backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to listen on (default: 0.0.0.0).
    pub bind: IpAddr,
    /// Port to listen on (default: 5001).
    pub port: u16,
    /// Registration backend (default: sqlite).
    pub store: StoreBackend,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Maximum Euclidean distance for a positive match.
    pub tolerance: f32,
    /// Which in-tolerance registration wins (default: first).
    pub match_policy: MatchPolicy,
    /// Directory where uploads are staged for the duration of an encode.
    pub upload_dir: PathBuf,
    /// Request body cap for the multipart endpoints.
    pub max_upload_bytes: usize,
    /// Depth of the encoder engine's request queue.
    pub engine_queue: usize,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = faceauth_core::encoder::data_home().join("faceauth");
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            store: StoreBackend::Sqlite,
            db_path: data_dir.join("faces.db"),
            model_dir: faceauth_core::default_model_dir(),
            tolerance: DEFAULT_TOLERANCE,
            match_policy: MatchPolicy::First,
            upload_dir: std::env::temp_dir().join("faceauth-uploads"),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            engine_queue: DEFAULT_ENGINE_QUEUE,
        }
    }
}

impl Config {
    /// Load configuration from `FACEAUTH_*` environment variables with defaults.
    ///
    /// Values that fail to parse are logged and replaced by their default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let store = match get("FACEAUTH_STORE").map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            None | Some("sqlite") => StoreBackend::Sqlite,
            Some("memory") => StoreBackend::Memory,
            Some(other) => {
                tracing::warn!(value = other, "unknown FACEAUTH_STORE; using sqlite");
                StoreBackend::Sqlite
            }
        };

        let tolerance = parse_or(&get, &["FACEAUTH_TOLERANCE", "FACE_RECOGNITION_TOLERANCE"], defaults.tolerance);
        let tolerance = if tolerance.is_finite() && tolerance >= 0.0 {
            tolerance
        } else {
            tracing::warn!(tolerance, "tolerance must be a non-negative number; using default");
            defaults.tolerance
        };

        Self {
            bind: parse_or(&get, &["FACEAUTH_BIND"], defaults.bind),
            port: parse_or(&get, &["FACEAUTH_PORT", "PORT"], defaults.port),
            store,
            db_path: get("FACEAUTH_DB_PATH").map(PathBuf::from).unwrap_or(defaults.db_path),
            model_dir: get("FACEAUTH_MODEL_DIR").map(PathBuf::from).unwrap_or(defaults.model_dir),
            tolerance,
            match_policy: parse_or(&get, &["FACEAUTH_MATCH_POLICY"], defaults.match_policy),
            upload_dir: get("FACEAUTH_UPLOAD_DIR").map(PathBuf::from).unwrap_or(defaults.upload_dir),
            max_upload_bytes: parse_or(&get, &["FACEAUTH_MAX_UPLOAD_BYTES"], defaults.max_upload_bytes),
            engine_queue: parse_or(&get, &["FACEAUTH_ENGINE_QUEUE"], defaults.engine_queue).max(1),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

/// First key that is set wins; unparsable values fall back to `default`.
fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, keys: &[&str], default: T) -> T
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let Some((key, raw)) = keys.iter().find_map(|k| get(k).map(|v| (*k, v))) else {
        return default;
    };
    match raw.trim().parse() {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(key, value = %raw, error = %e, "invalid value; using default");
            default
        }
    }
}
