//! Process configuration sourced from environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use labinv_auth::MIN_SECRET_LEN;
use labinv_core::LocationId;

/// Root ("Container Area") id used when `ROOT_LOCATION_ID` is unset.
pub const DEFAULT_ROOT_LOCATION_ID: &str = "00000000-0000-7000-8000-000000000001";
pub const ROOT_LOCATION_LABEL: &str = "Container Area";

const DEV_AUTH_SECRET: &str = "labinv-insecure-development-secret-change-me";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub database_url: Option<String>,
    pub use_persistent_stores: bool,
    pub db_max_connections: u32,
    pub auth_secret: String,
    pub root_location_id: LocationId,
    pub runtime_dir: PathBuf,
    pub app_name: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_addr = get("LABINV_BIND_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8080".to_string())
            .parse()
            .with_context(|| "parse LABINV_BIND_ADDR")?;

        let use_persistent_stores = match get("USE_PERSISTENT_STORES") {
            Some(raw) => parse_flag(&raw).with_context(|| format!("parse USE_PERSISTENT_STORES: {raw}"))?,
            None => false,
        };
        let database_url = get("DATABASE_URL");
        if use_persistent_stores && database_url.is_none() {
            bail!("DATABASE_URL must be set when USE_PERSISTENT_STORES=true");
        }
        let db_max_connections = get("LABINV_DB_MAX_CONNECTIONS")
            .unwrap_or_else(|| "10".to_string())
            .parse()
            .with_context(|| "parse LABINV_DB_MAX_CONNECTIONS")?;

        let auth_secret = match get("AUTH_SECRET") {
            Some(secret) if secret.len() >= MIN_SECRET_LEN => secret,
            Some(_) => bail!("AUTH_SECRET must be at least {MIN_SECRET_LEN} bytes"),
            None => {
                tracing::warn!("AUTH_SECRET not set; using insecure dev default");
                DEV_AUTH_SECRET.to_string()
            }
        };

        let root_location_id = get("ROOT_LOCATION_ID")
            .unwrap_or_else(|| DEFAULT_ROOT_LOCATION_ID.to_string())
            .parse()
            .with_context(|| "parse ROOT_LOCATION_ID (must be a UUID)")?;

        let runtime_dir = PathBuf::from(get("LABINV_RUNTIME_DIR").unwrap_or_else(|| "runtime".to_string()));
        let app_name = get("APP_NAME").unwrap_or_else(|| "Lab Inventory".to_string());

        Ok(Self {
            bind_addr,
            database_url,
            use_persistent_stores,
            db_max_connections,
            auth_secret,
            root_location_id,
            runtime_dir,
            app_name,
        })
    }
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected a boolean, got {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let env: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_are_usable() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.bind_addr.port(), 8080);
        assert!(!cfg.use_persistent_stores);
        assert!(cfg.auth_secret.len() >= MIN_SECRET_LEN);
        assert_eq!(cfg.root_location_id.to_string(), DEFAULT_ROOT_LOCATION_ID);
    }

    #[test]
    fn short_secret_is_rejected() {
        assert!(config(&[("AUTH_SECRET", "short")]).is_err());
    }

    #[test]
    fn persistent_stores_need_a_database_url() {
        assert!(config(&[("USE_PERSISTENT_STORES", "true")]).is_err());
        let cfg = config(&[("USE_PERSISTENT_STORES", "1"), ("DATABASE_URL", "postgres://localhost/lab")]).unwrap();
        assert!(cfg.use_persistent_stores);
    }

    #[test]
    fn root_id_must_be_a_uuid() {
        assert!(config(&[("ROOT_LOCATION_ID", "PUT-YOUR-ROOT-UUID-HERE")]).is_err());
    }
}
