pub mod config;

use std::{env, net::SocketAddr, path::PathBuf};

pub use config::{AppConfig, ConfigError, Environment};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:18080";
pub const DEFAULT_DATA_FILE: &str = "data.json";

/// Loads environment variables from `.env` when available.
///
/// Missing files are ignored so the function is safe in production builds
/// where dotenv files are not deployed.
pub fn load_env_file() {
    let _ = dotenvy::dotenv();
}

/// Returns the address the HTTP server should bind to.
///
/// The value is resolved from the `APP_BIND_ADDR` environment variable and
/// falls back to [`DEFAULT_BIND_ADDR`] when the variable is not set.
pub fn server_bind_address() -> Result<SocketAddr, std::net::AddrParseError> {
    let value = env::var("APP_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
    value.parse()
}

/// Returns the path of the poll snapshot file.
///
/// Reads `APP_DATA_FILE`, defaulting to [`DEFAULT_DATA_FILE`] in the working
/// directory. `None` is returned when the variable is set but blank.
pub fn data_file_path() -> Option<PathBuf> {
    match env::var("APP_DATA_FILE") {
        Ok(value) if value.trim().is_empty() => None,
        Ok(value) => Some(PathBuf::from(value)),
        Err(_) => Some(PathBuf::from(DEFAULT_DATA_FILE)),
    }
}

/// Returns the admin token guarding question creation, if one is configured.
pub fn admin_token() -> Option<String> {
    env::var("APP_ADMIN_TOKEN")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
