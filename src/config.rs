//! Configuration types for the proxy.
//!
//! Config is loaded once at startup from a TOML file and validated before the
//! server opens its port. Invalid configs are rejected with a clear error
//! rather than silently falling back to defaults. Secrets (the proxy's own
//! access token, the upstream API key, the OAuth client secret) are read from
//! environment variables named by the config, keeping the TOML file itself
//! safe to check in.
//!
//! # Example
//! ```toml
//! [server]
//! port = 5000
//!
//! [upstream]
//! target_endpoint = "https://api.openai.com/v1"
//! target_api_key_env = "TARGET_API_KEY"
//!
//! [models]
//! default_max_tokens = 16384
//! mapping = ["claude-3-5-haiku-20241022=gpt-4o-mini"]
//!
//! [oauth]
//! token_endpoint_env = "OAUTH_TOKEN_ENDPOINT"
//! client_id_env = "OAUTH_CLIENT_ID"
//! client_secret_env = "OAUTH_CLIENT_SECRET"
//! ```

use std::path::Path;

use anyhow::Context;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Top-level proxy configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub models: ModelConfig,
    #[serde(default)]
    pub oauth: Option<OAuthConfig>,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: Self = toml::from_str(&content).context("parsing config TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the proxy's own client-facing access token.
    ///
    /// Read from `server.access_token_env` if set; otherwise auto-generated
    /// once per process, following the reference implementation's
    /// `"cc-launcher-" + 64 hex chars` shape.
    pub fn proxy_access_token(&self) -> SecretString {
        self.server
            .access_token_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(generate_access_token)
            .into()
    }

    fn validate(&self) -> anyhow::Result<()> {
        if let Some(oauth) = &self.oauth {
            oauth.validate()?;
        }
        anyhow::ensure!(
            self.models.default_max_tokens > 0,
            "models.default_max_tokens must be positive"
        );
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            upstream: UpstreamConfig::default(),
            models: ModelConfig::default(),
            oauth: None,
        }
    }
}

/// `cc-launcher-<64 hex chars>`, matching the reference implementation's
/// `secrets.token_hex(32)` shape. Built from two UUID v4s rather than pulling
/// in a dedicated RNG crate — their combined randomness source is the OS CSPRNG
/// either way.
fn generate_access_token() -> String {
    format!(
        "cc-launcher-{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    )
}

/// Inbound HTTP server settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Port the `/v1/messages` endpoint listens on.
    #[serde(default = "defaults::port")]
    pub port: u16,

    /// Environment variable holding the proxy's client-facing access token.
    ///
    /// Clients must present this value via `x-api-key` or
    /// `Authorization: Bearer`. Leave unset to auto-generate a token at
    /// startup (logged once, not persisted).
    #[serde(default)]
    pub access_token_env: Option<String>,

    /// Serve a canned response/stream instead of contacting upstream.
    /// Useful for smoke-testing a client integration without burning quota.
    #[serde(default)]
    pub use_placeholder_mode: bool,

    /// Bypasses OAuth and uses a static mock bearer (`dev-mock-token`)
    /// for the upstream `Authorization` header. Never combine with a
    /// production `target_endpoint`.
    #[serde(default)]
    pub dev_mode: bool,

    /// Disable TLS certificate verification on the upstream client.
    /// Only ever meant for internal/self-signed test endpoints.
    #[serde(default)]
    pub skip_ssl_verify: bool,

    /// Number of recent requests to keep in the in-memory traffic log.
    #[serde(default = "defaults::traffic_log_capacity")]
    pub traffic_log_capacity: usize,

    /// Environment variable whose value is the Bearer token required for the
    /// admin traffic endpoint. Leave unset to disable admin authentication
    /// (only recommended when that surface is firewalled).
    #[serde(default)]
    pub admin_token_env: Option<String>,

    /// Admin port (traffic introspection). Separate from `port` so it can be
    /// firewalled independently of the client-facing listener.
    #[serde(default = "defaults::admin_port")]
    pub admin_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: defaults::port(),
            access_token_env: None,
            use_placeholder_mode: false,
            dev_mode: false,
            skip_ssl_verify: false,
            traffic_log_capacity: defaults::traffic_log_capacity(),
            admin_token_env: None,
            admin_port: defaults::admin_port(),
        }
    }
}

/// Upstream (OpenAI-compatible chat-completions) connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Base URL of the upstream OpenAI-compatible server. `/chat/completions`
    /// is appended by the dispatcher.
    #[serde(default = "defaults::target_endpoint")]
    pub target_endpoint: String,

    /// Environment variable holding a static upstream API key, used when
    /// OAuth is not configured (or as the fallback below it in priority).
    #[serde(default)]
    pub target_api_key_env: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self { target_endpoint: defaults::target_endpoint(), target_api_key_env: None }
    }
}

impl UpstreamConfig {
    pub fn target_api_key(&self) -> Option<SecretString> {
        self.target_api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|k| !k.is_empty())
            .map(SecretString::from)
    }
}

/// Model-name mapping and default generation parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelConfig {
    /// `source=target` pairs, e.g. `"claude-3-5-haiku-20241022=gpt-4o-mini"`.
    #[serde(default)]
    pub mapping: Vec<String>,

    /// Injected when the client omits `max_tokens` — upstream requires it.
    #[serde(default = "defaults::default_max_tokens")]
    pub default_max_tokens: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self { mapping: Vec::new(), default_max_tokens: defaults::default_max_tokens() }
    }
}

/// OAuth 2.0 client-credentials grant settings for the upstream connection.
///
/// All fields are required together — `Config::validate` rejects a partial
/// OAuth block so a typo doesn't silently disable token refresh.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OAuthConfig {
    pub token_endpoint_env: String,
    pub client_id_env: String,
    pub client_secret_env: String,
    #[serde(default)]
    pub scope_env: Option<String>,
    /// Margin subtracted from the token's declared expiry, guaranteeing the
    /// token is still valid for the duration of a downstream request.
    #[serde(default = "defaults::oauth_refresh_buffer_minutes")]
    pub refresh_buffer_minutes: i64,
}

impl OAuthConfig {
    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.token_endpoint_env.is_empty()
                && !self.client_id_env.is_empty()
                && !self.client_secret_env.is_empty(),
            "oauth block must set token_endpoint_env, client_id_env and client_secret_env together"
        );
        Ok(())
    }

    pub fn token_endpoint(&self) -> anyhow::Result<String> {
        std::env::var(&self.token_endpoint_env)
            .with_context(|| format!("reading ${}", self.token_endpoint_env))
    }

    pub fn client_id(&self) -> anyhow::Result<String> {
        std::env::var(&self.client_id_env).with_context(|| format!("reading ${}", self.client_id_env))
    }

    pub fn client_secret(&self) -> anyhow::Result<SecretString> {
        std::env::var(&self.client_secret_env)
            .map(SecretString::from)
            .with_context(|| format!("reading ${}", self.client_secret_env))
    }

    pub fn scope(&self) -> Option<String> {
        self.scope_env.as_deref().and_then(|var| std::env::var(var).ok())
    }
}

mod defaults {
    pub fn port() -> u16 {
        5000
    }
    pub fn admin_port() -> u16 {
        5001
    }
    pub fn traffic_log_capacity() -> usize {
        500
    }
    pub fn target_endpoint() -> String {
        "https://api.openai.com/v1".to_string()
    }
    pub fn default_max_tokens() -> u64 {
        16384
    }
    pub fn oauth_refresh_buffer_minutes() -> i64 {
        5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_file_is_minimal() {
        let config: Config = toml::from_str("").expect("empty config should parse");
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.upstream.target_endpoint, "https://api.openai.com/v1");
        assert_eq!(config.models.default_max_tokens, 16384);
        assert!(config.oauth.is_none());
    }

    #[test]
    fn validation_rejects_zero_default_max_tokens() {
        let mut config = Config::default();
        config.models.default_max_tokens = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn oauth_block_requires_all_env_names() {
        let oauth = OAuthConfig {
            token_endpoint_env: "X".into(),
            client_id_env: String::new(),
            client_secret_env: "Z".into(),
            scope_env: None,
            refresh_buffer_minutes: 5,
        };
        assert!(oauth.validate().is_err());
    }

    #[test]
    fn proxy_access_token_is_generated_when_env_unset() {
        let config = Config::default();
        use secrecy::ExposeSecret;
        let token = config.proxy_access_token();
        assert!(token.expose_secret().starts_with("cc-launcher-"));
    }

    #[test]
    fn parse_full_example_config() {
        let content = r#"
            [server]
            port = 5000

            [upstream]
            target_endpoint = "https://api.openai.com/v1"
            target_api_key_env = "TARGET_API_KEY"

            [models]
            default_max_tokens = 16384
            mapping = ["claude-3-5-haiku-20241022=gpt-4o-mini"]

            [oauth]
            token_endpoint_env = "OAUTH_TOKEN_ENDPOINT"
            client_id_env = "OAUTH_CLIENT_ID"
            client_secret_env = "OAUTH_CLIENT_SECRET"
        "#;
        let config: Config = toml::from_str(content).expect("example config should parse");
        config.validate().expect("example config should be valid");
        assert_eq!(config.models.mapping.len(), 1);
        assert!(config.oauth.is_some());
    }
}
