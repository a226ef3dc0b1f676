use std::env;
use std::path::PathBuf;

use chrono_tz::Tz;
use send_messages_module::{DEFAULT_LINE_API_BASE, DEFAULT_LINE_DATA_API_BASE};

use crate::extraction::{DEFAULT_EXTRACTION_MODEL, DEFAULT_OPENAI_URL};

pub const DEFAULT_INBOUND_BODY_MAX_BYTES: usize = 25 * 1024 * 1024;
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Asia::Taipei;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" | "test" => AppEnv::Development,
            _ => AppEnv::Production,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required config: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub app_env: AppEnv,
    /// LINE channel access token for reply/push/content calls
    pub line_channel_access_token: Option<String>,
    /// LINE channel secret for webhook signatures
    pub line_channel_secret: Option<String>,
    pub line_api_base_url: String,
    pub line_data_api_base_url: String,
    pub openai_api_key: Option<String>,
    pub openai_api_url: String,
    pub extraction_model: String,
    pub database_path: PathBuf,
    pub file_storage_root: PathBuf,
    /// Base URL for management deep links in replies
    pub frontend_base_url: Option<String>,
    pub default_timezone: Tz,
    pub inbound_body_max_bytes: usize,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let host = env_value("SERVICE_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = match env_value("SERVICE_PORT") {
            Some(value) => value.parse::<u16>().map_err(|_| ConfigError::Invalid {
                name: "SERVICE_PORT",
                value,
            })?,
            None => 9300,
        };
        let default_timezone = match env_value("DEFAULT_TIMEZONE") {
            Some(value) => value.parse::<Tz>().map_err(|_| ConfigError::Invalid {
                name: "DEFAULT_TIMEZONE",
                value,
            })?,
            None => DEFAULT_TIMEZONE,
        };
        let inbound_body_max_bytes = env_value("INBOUND_BODY_MAX_BYTES")
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_INBOUND_BODY_MAX_BYTES);

        Ok(Self {
            host,
            port,
            app_env: env_value("APP_ENV")
                .map(|value| AppEnv::parse(&value))
                .unwrap_or(AppEnv::Production),
            line_channel_access_token: env_value("LINE_CHANNEL_ACCESS_TOKEN"),
            line_channel_secret: env_value("LINE_CHANNEL_SECRET"),
            line_api_base_url: env_value("LINE_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_LINE_API_BASE.to_string()),
            line_data_api_base_url: env_value("LINE_DATA_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_LINE_DATA_API_BASE.to_string()),
            openai_api_key: env_value("OPENAI_API_KEY"),
            openai_api_url: env_value("OPENAI_API_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string()),
            extraction_model: env_value("EXTRACTION_MODEL")
                .unwrap_or_else(|| DEFAULT_EXTRACTION_MODEL.to_string()),
            database_path: env_value("CALENDAR_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("state").join("calendar.db")),
            file_storage_root: env_value("FILE_STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("state").join("files")),
            frontend_base_url: env_value("FRONTEND_BASE_URL")
                .map(|value| value.trim_end_matches('/').to_string()),
            default_timezone,
            inbound_body_max_bytes,
        })
    }

    pub fn is_development(&self) -> bool {
        self.app_env == AppEnv::Development
    }

    /// Development without a channel secret accepts unsigned webhooks.
    pub fn skip_signature_verification(&self) -> bool {
        self.is_development() && self.line_channel_secret.is_none()
    }

    /// Settings the webhook path cannot run without.
    pub fn require_webhook(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        if self.line_channel_access_token.is_none() {
            missing.push("LINE_CHANNEL_ACCESS_TOKEN");
        }
        if self.line_channel_secret.is_none() && !self.is_development() {
            missing.push("LINE_CHANNEL_SECRET");
        }
        if self.openai_api_key.is_none() {
            missing.push("OPENAI_API_KEY");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Missing(missing))
        }
    }

    /// Settings the RPC path cannot run without.
    pub fn require_rpc(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        if self.line_api_base_url.trim().is_empty() {
            missing.push("LINE_API_BASE_URL");
        }
        if self.database_path.as_os_str().is_empty() {
            missing.push("CALENDAR_DB_PATH");
        }
        if self.file_storage_root.as_os_str().is_empty() {
            missing.push("FILE_STORAGE_ROOT");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Missing(missing))
        }
    }
}

fn env_value(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    struct EnvGuard {
        saved: Vec<(&'static str, Option<String>)>,
    }

    impl EnvGuard {
        fn set(vars: &[(&'static str, Option<&str>)]) -> Self {
            let saved = vars
                .iter()
                .map(|(name, _)| (*name, env::var(name).ok()))
                .collect();
            for (name, value) in vars {
                match value {
                    Some(value) => env::set_var(name, value),
                    None => env::remove_var(name),
                }
            }
            Self { saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(value) => env::set_var(name, value),
                    None => env::remove_var(name),
                }
            }
        }
    }

    #[test]
    #[serial]
    fn defaults_apply_when_unset() {
        let _guard = EnvGuard::set(&[
            ("SERVICE_HOST", None),
            ("SERVICE_PORT", None),
            ("APP_ENV", None),
            ("DEFAULT_TIMEZONE", None),
            ("CALENDAR_DB_PATH", None),
            ("FRONTEND_BASE_URL", Some("https://cal.example.com/")),
        ]);
        let config = ServiceConfig::from_env().unwrap();
        assert_eq!(config.port, 9300);
        assert_eq!(config.app_env, AppEnv::Production);
        assert_eq!(config.default_timezone, chrono_tz::Asia::Taipei);
        assert_eq!(config.database_path, PathBuf::from("state/calendar.db"));
        assert_eq!(
            config.frontend_base_url.as_deref(),
            Some("https://cal.example.com")
        );
    }

    #[test]
    #[serial]
    fn invalid_timezone_is_rejected() {
        let _guard = EnvGuard::set(&[("DEFAULT_TIMEZONE", Some("Mars/Olympus"))]);
        assert!(matches!(
            ServiceConfig::from_env(),
            Err(ConfigError::Invalid {
                name: "DEFAULT_TIMEZONE",
                ..
            })
        ));
    }

    #[test]
    #[serial]
    fn webhook_requirements_depend_on_environment() {
        let _guard = EnvGuard::set(&[
            ("LINE_CHANNEL_ACCESS_TOKEN", Some("token")),
            ("LINE_CHANNEL_SECRET", None),
            ("OPENAI_API_KEY", Some("sk")),
            ("APP_ENV", Some("production")),
            ("DEFAULT_TIMEZONE", None),
            ("SERVICE_PORT", None),
        ]);
        let mut config = ServiceConfig::from_env().unwrap();
        match config.require_webhook() {
            Err(ConfigError::Missing(missing)) => assert_eq!(missing, vec!["LINE_CHANNEL_SECRET"]),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(!config.skip_signature_verification());

        config.app_env = AppEnv::Development;
        assert!(config.require_webhook().is_ok());
        assert!(config.skip_signature_verification());
        assert!(config.require_rpc().is_ok());
    }
}
