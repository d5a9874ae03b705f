use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RelayConfig {
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

/// Connection settings for the conversational-AI backend (Dify).
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL including the API version segment, e.g. `https://api.dify.ai/v1`
    pub api_url: String,
    /// App key sent as `Authorization: Bearer <app_key>`
    pub app_key: String,
    /// Used when the browser does not identify itself
    pub default_user: String,
    /// Whole-request ceiling; a streamed answer must finish within it
    pub timeout_seconds: u64,
    pub connect_timeout_seconds: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            app_key: String::new(),
            default_user: "lexrelay-user".to_string(),
            timeout_seconds: 600,
            connect_timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

impl RelayConfig {
    /// Load from an optional TOML file, then `LEXRELAY__SECTION__KEY`
    /// environment variables, then the bare `API_URL` / `APP_KEY` variables.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("LEXRELAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("upstream.api_url", std::env::var("API_URL").ok())?
            .set_override_option("upstream.app_key", std::env::var("APP_KEY").ok())?
            .build()?;
        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp_toml(contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("lexrelay-{}.toml", uuid::Uuid::new_v4()));
        let mut f = std::fs::File::create(&path).expect("create temp config");
        f.write_all(contents.as_bytes()).expect("write temp config");
        path
    }

    #[test]
    fn test_defaults_when_sections_missing() {
        let config = RelayConfig::default();
        assert_eq!(config.http.host, "127.0.0.1");
        assert_eq!(config.http.port, 8787);
        assert_eq!(config.upstream.default_user, "lexrelay-user");
        assert_eq!(config.upstream.timeout_seconds, 600);
        assert!(config.upstream.app_key.is_empty());
    }

    #[test]
    fn test_load_reads_toml_file() {
        let path = write_temp_toml(
            r#"
            [upstream]
            api_url = "http://dify.internal/v1"
            app_key = "app-test"
            default_user = "counsel-desk"

            [http]
            port = 9900
            "#,
        );

        let config = RelayConfig::load(path.to_str().unwrap()).expect("config should load");
        std::fs::remove_file(&path).ok();

        assert_eq!(config.upstream.default_user, "counsel-desk");
        assert_eq!(config.upstream.connect_timeout_seconds, 10);
        assert_eq!(config.http.port, 9900);
        assert_eq!(config.http.host, "127.0.0.1");
        if std::env::var("API_URL").is_err() {
            assert_eq!(config.upstream.api_url, "http://dify.internal/v1");
        }
    }

    #[test]
    fn test_load_missing_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join(format!("absent-{}", uuid::Uuid::new_v4()));
        let config = RelayConfig::load(path.to_str().unwrap()).expect("missing file is optional");
        assert_eq!(config.http.port, 8787);
    }
}
