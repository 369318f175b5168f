//! Configuration management for the multipart upload server

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::upload::delay::{
    poll_interval_or_default, retention_from_str, DEFAULT_POLL_INTERVAL, DEFAULT_RETENTION,
};
use crate::upload::ResourceClass;

/// Default maximum size of a single chunk: 10 MiB
pub const DEFAULT_MAX_CHUNK_SIZE: u64 = 10 << 20;

/// Default maximum size of a single-shot upload: 5 MiB
pub const DEFAULT_MAX_FILE_SIZE: u64 = 5 << 20;

/// Default accepted file extensions
pub const DEFAULT_ACCEPT_SUFFIXES: &str = ".jpg,.jpeg,.png,.zip,.csv,.json,.atlas,.xls,.xlsx";

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub kv: KvConfig,
    pub keys: KeyConfig,
    pub storage: StorageConfig,
    pub upload: UploadConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvBackend {
    Redis,
    Memory,
}

#[derive(Debug, Clone)]
pub struct KvConfig {
    pub backend: KvBackend,
    pub redis_url: String,
}

/// Key namespace parts shared by every key the server writes
#[derive(Debug, Clone)]
pub struct KeyConfig {
    pub platform: String,
    pub service_name: String,
    pub tenant_name: String,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Staging root, every upload lands here first
    pub upload_path: PathBuf,
    /// Final root for relocated files
    pub final_path: PathBuf,
    /// Final root for the `document` class
    pub download_path: PathBuf,
    /// Suffix appended to generated upload ids
    pub node_name: String,
}

/// Size and extension limits of one resource class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassLimits {
    pub max_file_size: u64,
    pub max_chunk_size: u64,
    pub accept_suffixes: Vec<String>,
}

impl Default for ClassLimits {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            accept_suffixes: parse_suffixes(DEFAULT_ACCEPT_SUFFIXES),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// How long staged files and session state survive
    pub retention: Duration,
    /// Sweep interval of the deletion scheduler
    pub poll_interval: Duration,
    pub check_size: bool,
    pub check_content: bool,
    pub default_limits: ClassLimits,
    pub class_limits: HashMap<ResourceClass, ClassLimits>,
}

impl UploadConfig {
    pub fn limits_for(&self, class: ResourceClass) -> &ClassLimits {
        self.class_limits
            .get(&class)
            .unwrap_or(&self.default_limits)
    }

    /// Largest request body any class may send
    pub fn max_body_size(&self) -> u64 {
        std::iter::once(&self.default_limits)
            .chain(self.class_limits.values())
            .map(|l| l.max_file_size.max(l.max_chunk_size))
            .max()
            .unwrap_or(DEFAULT_MAX_CHUNK_SIZE)
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            poll_interval: DEFAULT_POLL_INTERVAL,
            check_size: false,
            check_content: false,
            default_limits: ClassLimits::default(),
            class_limits: HashMap::new(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            kv: KvConfig {
                backend: KvBackend::Redis,
                redis_url: "redis://127.0.0.1:6379".to_string(),
            },
            keys: KeyConfig {
                platform: "platform".to_string(),
                service_name: "upload".to_string(),
                tenant_name: "platform".to_string(),
            },
            storage: StorageConfig {
                upload_path: PathBuf::from("./data/upload"),
                final_path: PathBuf::from("./data/cdn"),
                download_path: PathBuf::from("./data/download"),
                node_name: "1".to_string(),
            },
            upload: UploadConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        let defaults = Config::default();

        let global_limits = ClassLimits {
            max_file_size: env_u64("UPLOAD_MAX_SIZE", DEFAULT_MAX_FILE_SIZE),
            max_chunk_size: env_u64("MULTIPART_CHECK_SIZE_MAX", DEFAULT_MAX_CHUNK_SIZE),
            accept_suffixes: parse_suffixes(
                &env::var("UPLOAD_ACCEPT_SUFFIXES")
                    .unwrap_or_else(|_| DEFAULT_ACCEPT_SUFFIXES.to_string()),
            ),
        };

        let mut class_limits = HashMap::new();
        for class in ResourceClass::ALL {
            let name = class.as_str().to_uppercase();
            let limits = ClassLimits {
                max_file_size: env_u64(
                    &format!("UPLOAD_{}_MAX_SIZE", name),
                    global_limits.max_file_size,
                ),
                max_chunk_size: env_u64(
                    &format!("UPLOAD_{}_MAX_CHUNK_SIZE", name),
                    global_limits.max_chunk_size,
                ),
                accept_suffixes: env::var(format!("UPLOAD_{}_ACCEPT_SUFFIXES", name))
                    .map(|s| parse_suffixes(&s))
                    .unwrap_or_else(|_| global_limits.accept_suffixes.clone()),
            };
            if limits != global_limits {
                class_limits.insert(class, limits);
            }
        }

        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: env::var("SERVER_PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(defaults.server.port),
            },
            kv: KvConfig {
                backend: match env::var("KV_BACKEND")
                    .unwrap_or_else(|_| "redis".to_string())
                    .as_str()
                {
                    "memory" => KvBackend::Memory,
                    _ => KvBackend::Redis,
                },
                redis_url: env::var("REDIS_URL").unwrap_or(defaults.kv.redis_url),
            },
            keys: KeyConfig {
                platform: env::var("APP_PLATFORM").unwrap_or(defaults.keys.platform),
                service_name: env::var("SERVICE_NAME").unwrap_or(defaults.keys.service_name),
                tenant_name: env::var("TENANT_NAME").unwrap_or(defaults.keys.tenant_name),
            },
            storage: StorageConfig {
                upload_path: env::var("UPLOAD_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.upload_path),
                final_path: env::var("FINAL_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.final_path),
                download_path: env::var("DOWNLOAD_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.download_path),
                node_name: env::var("NODE_NAME")
                    .or_else(|_| env::var("HOSTNAME"))
                    .unwrap_or(defaults.storage.node_name),
            },
            upload: UploadConfig {
                retention: env::var("STORAGE_DELAY_DELETE_DURATION")
                    .map(|s| retention_from_str(&s))
                    .unwrap_or(DEFAULT_RETENTION),
                poll_interval: poll_interval_or_default(Duration::from_secs(env_u64(
                    "DELAY_POLL_INTERVAL_SECS",
                    DEFAULT_POLL_INTERVAL.as_secs(),
                ))),
                check_size: env_bool("MULTIPART_CHECK_SIZE_ENABLED", false),
                check_content: env_bool("MULTIPART_CHECK_CONTENT_ENABLED", false),
                default_limits: global_limits,
                class_limits,
            },
        })
    }
}

/// Split a comma separated extension list, dropping blanks
pub fn parse_suffixes(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_suffixes() {
        assert_eq!(
            parse_suffixes(" .png, .jpg,,"),
            vec![".png".to_string(), ".jpg".to_string()]
        );
        assert!(parse_suffixes("").is_empty());
    }

    #[test]
    fn test_limits_fall_back_to_defaults() {
        let mut upload = UploadConfig::default();
        assert_eq!(upload.limits_for(ResourceClass::Image).max_chunk_size, 10 << 20);

        upload.class_limits.insert(
            ResourceClass::Archive,
            ClassLimits {
                max_file_size: 1,
                max_chunk_size: 2,
                accept_suffixes: vec![".zip".to_string()],
            },
        );
        assert_eq!(upload.limits_for(ResourceClass::Archive).max_chunk_size, 2);
        assert_eq!(upload.limits_for(ResourceClass::Icon).max_file_size, 5 << 20);
        assert_eq!(upload.max_body_size(), 10 << 20);
    }
}
