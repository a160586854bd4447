//! OAuth 2.0 client-credentials token cache with proactive refresh.
//!
//! Mirrors the concurrency shape the top-level design calls for: the token
//! cache is the only contended object on the request path, and the refresh
//! critical section holds its lock across the network call so concurrent
//! callers never issue parallel refresh requests — losers simply wait for
//! the lock and read whatever the winner stored.

use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::config::OAuthConfig;

struct CachedToken {
    access_token: SecretString,
    expires_at: DateTime<Utc>,
}

/// A process-wide token cache, owned by the dispatcher and handed out by
/// reference rather than accessed through a true global — see the top-level
/// design notes on why this stays an explicitly constructed object.
pub struct TokenCache {
    client: reqwest::Client,
    config: OAuthConfig,
    entry: Mutex<Option<CachedToken>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

impl TokenCache {
    pub fn new(client: reqwest::Client, config: OAuthConfig) -> Self {
        Self { client, config, entry: Mutex::new(None) }
    }

    /// Return a cached token if still valid, otherwise refresh.
    ///
    /// Returns `None` (never an error) on refresh failure — the caller falls
    /// back to the next auth priority rather than failing the request, and
    /// any prior valid entry is left intact for the next caller to try.
    pub async fn get_token(&self) -> Option<String> {
        let mut guard = self.entry.lock().await;

        // Double-checked: another caller may have refreshed while we waited
        // for the lock, so re-validate before hitting the network.
        if let Some(cached) = guard.as_ref() {
            if Utc::now() < cached.expires_at {
                return Some(cached.access_token.expose_secret().to_string());
            }
            // Expired: discard it so a refresh failure below can't fall
            // through to serving it back out.
            *guard = None;
        }

        match self.refresh().await {
            Ok(token) => {
                let access_token = token.access_token.expose_secret().to_string();
                *guard = Some(token);
                Some(access_token)
            }
            Err(e) => {
                tracing::error!(error = %e, "OAuth token refresh failed");
                None
            }
        }
    }

    async fn refresh(&self) -> anyhow::Result<CachedToken> {
        let endpoint = self.config.token_endpoint()?;
        let client_id = self.config.client_id()?;
        let client_secret = self.config.client_secret()?;

        let mut form = vec![("grant_type", "client_credentials".to_string())];
        if let Some(scope) = self.config.scope() {
            form.push(("scope", scope));
        }

        let response = self
            .client
            .post(&endpoint)
            .basic_auth(client_id, Some(client_secret.expose_secret()))
            .form(&form)
            .send()
            .await
            .with_context(|| format!("POST {endpoint}"))?;

        let status = response.status();
        let text = response.text().await.context("reading OAuth token response body")?;

        anyhow::ensure!(status.is_success(), "OAuth token endpoint returned HTTP {status}: {text}");

        let parsed: TokenResponse =
            serde_json::from_str(&text).with_context(|| format!("parsing OAuth token response: {text}"))?;

        let buffer = Duration::from_secs((self.config.refresh_buffer_minutes.max(0) as u64) * 60);
        let expires_at =
            Utc::now() + chrono::Duration::seconds(parsed.expires_in) - chrono::Duration::from_std(buffer)?;

        Ok(CachedToken { access_token: parsed.access_token.into(), expires_at })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn oauth_config(endpoint: String) -> OAuthConfig {
        // SAFETY: tests run single-threaded per-process by default for env mutation;
        // unique var names per test avoid cross-test interference.
        unsafe {
            std::env::set_var("OAUTH_TEST_ENDPOINT", &endpoint);
            std::env::set_var("OAUTH_TEST_CLIENT_ID", "test-client");
            std::env::set_var("OAUTH_TEST_CLIENT_SECRET", "test-secret");
        }
        OAuthConfig {
            token_endpoint_env: "OAUTH_TEST_ENDPOINT".into(),
            client_id_env: "OAUTH_TEST_CLIENT_ID".into(),
            client_secret_env: "OAUTH_TEST_CLIENT_SECRET".into(),
            scope_env: None,
            refresh_buffer_minutes: 5,
        }
    }

    #[tokio::test]
    async fn fetches_and_caches_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "access_token": "tok-1", "expires_in": 3600 })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let cache = TokenCache::new(reqwest::Client::new(), oauth_config(format!("{}/token", server.uri())));

        assert_eq!(cache.get_token().await.as_deref(), Some("tok-1"));
        // Second call within the refresh buffer must not hit the network again
        // (wiremock's `.expect(1)` above asserts this on drop).
        assert_eq!(cache.get_token().await.as_deref(), Some("tok-1"));
    }

    #[tokio::test]
    async fn refresh_failure_returns_none_without_prior_entry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let cache = TokenCache::new(reqwest::Client::new(), oauth_config(format!("{}/token", server.uri())));
        assert_eq!(cache.get_token().await, None);
    }

    #[tokio::test]
    async fn expired_token_triggers_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "access_token": "tok-expired", "expires_in": 1 })),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "access_token": "tok-fresh", "expires_in": 3600 })),
            )
            .mount(&server)
            .await;

        let mut config = oauth_config(format!("{}/token", server.uri()));
        config.refresh_buffer_minutes = 0;
        let cache = TokenCache::new(reqwest::Client::new(), config);

        assert_eq!(cache.get_token().await.as_deref(), Some("tok-expired"));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(cache.get_token().await.as_deref(), Some("tok-fresh"));
    }

    #[tokio::test]
    async fn expired_entry_then_refresh_failure_returns_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "access_token": "tok-expired", "expires_in": 1 })),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST")).and(path("/token")).respond_with(ResponseTemplate::new(500)).mount(&server).await;

        let mut config = oauth_config(format!("{}/token", server.uri()));
        config.refresh_buffer_minutes = 0;
        let cache = TokenCache::new(reqwest::Client::new(), config);

        assert_eq!(cache.get_token().await.as_deref(), Some("tok-expired"));
        tokio::time::sleep(Duration::from_secs(2)).await;
        // Refresh now fails; the expired token must not be served back out.
        assert_eq!(cache.get_token().await, None);
    }
}
