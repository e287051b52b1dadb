use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::error::{TinyError, TinyResult};

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the log file. Created on open.
    pub data_dir: String,
    /// Log file name, relative to `data_dir`.
    pub wal_file: String,
    /// Whether to fsync after every record (default: false)
    pub sync_on_write: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".into(),
            wal_file: "data.log".into(),
            sync_on_write: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
}

impl Config {
    /// Config rooted at `data_dir`, everything else default.
    pub fn with_data_dir<P: AsRef<Path>>(data_dir: P) -> Self {
        let mut cfg = Self::default();
        cfg.storage.data_dir = data_dir.as_ref().to_string_lossy().into_owned();
        cfg
    }

    /// Load config from a TOML file, with environment variable overrides.
    /// Falls back to defaults if the file is not found. TINYSQL_CONFIG overrides the path.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> TinyResult<Self> {
        let cfg_path = env::var("TINYSQL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| path.as_ref().to_path_buf());

        let mut cfg = match fs::read_to_string(&cfg_path) {
            Ok(s) => toml::from_str(&s).map_err(|e| {
                TinyError::Config(format!("{}: {}", cfg_path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(e) => return Err(e.into()),
        };

        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// Full path of the write-ahead log.
    pub fn wal_path(&self) -> PathBuf {
        Path::new(&self.storage.data_dir).join(&self.storage.wal_file)
    }

    /// Apply TINYSQL_* environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("TINYSQL_DATA_DIR") {
            self.storage.data_dir = v;
        }

        if let Ok(v) = env::var("TINYSQL_WAL_FILE") {
            self.storage.wal_file = v;
        }

        if let Ok(v) = env::var("TINYSQL_SYNC_ON_WRITE")
            && let Ok(b) = v.parse::<bool>()
        {
            self.storage.sync_on_write = b;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tempfile::tempdir;

    // Tests that call load_from_path read process-wide environment variables
    static ENV_LOCK: Mutex<()> = parking_lot::const_mutex(());

    const ENV_VARS: [&str; 4] = [
        "TINYSQL_CONFIG",
        "TINYSQL_DATA_DIR",
        "TINYSQL_WAL_FILE",
        "TINYSQL_SYNC_ON_WRITE",
    ];

    #[test]
    fn test_parse_partial_toml() {
        let cfg: Config = toml::from_str(
            r#"
            [storage]
            data_dir = "/var/lib/tinysql"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.storage.data_dir, "/var/lib/tinysql");
        assert_eq!(cfg.storage.wal_file, "data.log");
        assert!(!cfg.storage.sync_on_write);
    }

    #[test]
    fn test_wal_path() {
        let cfg = Config::with_data_dir("/tmp/db");
        assert_eq!(cfg.wal_path(), PathBuf::from("/tmp/db/data.log"));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tinysql.toml");
        fs::write(&path, "[storage\n").unwrap();

        let _guard = ENV_LOCK.lock();
        match Config::load_from_path(&path) {
            Err(TinyError::Config(_)) => {}
            other => panic!("Expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_env_overrides() {
        let _guard = ENV_LOCK.lock();
        let saved: Vec<_> = ENV_VARS.iter().map(|k| (*k, env::var(k).ok())).collect();

        let dir = tempdir().unwrap();
        let file_path = dir.path().join("tinysql.toml");
        fs::write(
            &file_path,
            "[storage]\ndata_dir = \"/from/file\"\nwal_file = \"file.log\"\n",
        )
        .unwrap();

        // SAFETY: ENV_LOCK serializes every test that touches these variables
        unsafe {
            env::set_var("TINYSQL_CONFIG", &file_path);
            env::remove_var("TINYSQL_DATA_DIR");
            env::remove_var("TINYSQL_WAL_FILE");
            env::remove_var("TINYSQL_SYNC_ON_WRITE");
        }

        // The path argument is ignored in favour of TINYSQL_CONFIG
        let cfg = Config::load_from_path(dir.path().join("missing.toml")).unwrap();
        assert_eq!(cfg.storage.data_dir, "/from/file");
        assert_eq!(cfg.storage.wal_file, "file.log");
        assert!(!cfg.storage.sync_on_write);

        unsafe {
            env::set_var("TINYSQL_DATA_DIR", "/from/env");
            env::set_var("TINYSQL_WAL_FILE", "env.log");
            env::set_var("TINYSQL_SYNC_ON_WRITE", "true");
        }

        let cfg = Config::load_from_path("unused.toml").unwrap();
        assert_eq!(cfg.storage.data_dir, "/from/env");
        assert_eq!(cfg.storage.wal_file, "env.log");
        assert!(cfg.storage.sync_on_write);
        assert_eq!(cfg.wal_path(), PathBuf::from("/from/env/env.log"));

        // Unparseable booleans leave the file value in place
        unsafe {
            env::set_var("TINYSQL_SYNC_ON_WRITE", "sometimes");
        }
        assert!(!Config::load_from_path("unused.toml").unwrap().storage.sync_on_write);

        for (key, value) in saved {
            unsafe {
                match value {
                    Some(v) => env::set_var(key, v),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
