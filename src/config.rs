use anyhow::Result;
use std::env;
use std::path::PathBuf;

pub const DB_ENV: &str = "COACHLOG_DB";
pub const USER_ENV: &str = "COACHLOG_USER";
pub const ENCRYPTION_KEY_ENV: &str = "COACHLOG_ENCRYPTION_KEY";

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    /// Email of the coach acting on this invocation.
    pub user_email: Option<String>,
    /// Base64 key used to encrypt stored API keys.
    pub encryption_key: Option<String>,
}

impl Config {
    /// Resolve configuration: CLI flags win over environment, environment
    /// wins over the platform data directory.
    pub fn load(db_flag: Option<PathBuf>, user_flag: Option<String>) -> Result<Self> {
        let data_dir = Self::default_data_dir();

        let db_path = match db_flag.or_else(|| env::var_os(DB_ENV).map(PathBuf::from)) {
            Some(path) => path,
            None => data_dir.join("coachlog.db"),
        };

        let user_email = user_flag
            .or_else(|| env::var(USER_ENV).ok())
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty());

        let encryption_key = env::var(ENCRYPTION_KEY_ENV)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        Ok(Self {
            data_dir,
            db_path,
            user_email,
            encryption_key,
        })
    }

    fn default_data_dir() -> PathBuf {
        // Use XDG data directory or fallback
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "coachlog") {
            proj_dirs.data_dir().to_path_buf()
        } else {
            PathBuf::from(".")
        }
    }

    /// Directory holding stored copies of uploaded context documents.
    pub fn documents_dir(&self) -> PathBuf {
        self.data_dir.join("context-documents")
    }

    #[cfg(test)]
    pub fn for_tests(data_dir: PathBuf) -> Self {
        Self {
            db_path: data_dir.join("coachlog.db"),
            data_dir,
            user_email: Some("coach@example.com".to_string()),
            encryption_key: Some(crate::crypto::generate_key()),
        }
    }
}
