pub mod config;

use std::{
    env, fs, io,
    net::SocketAddr,
    path::PathBuf,
};

pub use config::{AppConfig, ConfigError, DnsConfig, Environment, PlatformConfig, PushConfig};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

/// Reads `.env` into the process environment. A missing file is not an error.
pub fn load_env_file() {
    let _ = dotenvy::dotenv();
}

/// Resolves `APP_BIND_ADDR`, falling back to [`DEFAULT_BIND_ADDR`].
pub fn server_bind_address() -> Result<SocketAddr, std::net::AddrParseError> {
    env::var("APP_BIND_ADDR")
        .unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string())
        .parse()
}

/// Extracts the file path of a `sqlite://` URL.
///
/// Returns `None` for other schemes and for in-memory databases.
pub fn sqlite_file_path(database_url: &str) -> Option<PathBuf> {
    let rest = database_url.strip_prefix("sqlite://")?;
    let path = rest.split('?').next().unwrap_or_default();
    if path.is_empty() || path.starts_with(':') {
        return None;
    }
    Some(PathBuf::from(path))
}

/// Creates the directory holding the SQLite file so `mode=rwc` can create it.
pub fn ensure_database_dir(database_url: &str) -> io::Result<()> {
    let Some(path) = sqlite_file_path(database_url) else {
        return Ok(());
    };
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// True when the URL points at a file that already exists.
pub fn database_exists(database_url: &str) -> bool {
    sqlite_file_path(database_url)
        .map(|path| path.exists())
        .unwrap_or(false)
}
