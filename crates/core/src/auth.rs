use crate::config::Settings;
use crate::domain::Session;
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Turns a bearer credential into a caller identity.
#[async_trait::async_trait]
pub trait SessionProvider: Send + Sync {
    /// `Ok(None)` when the credential is not (or no longer) valid.
    async fn resolve(&self, access_token: &str) -> anyhow::Result<Option<Session>>;
}

/// Session lookup against the hosted store's auth endpoint.
#[derive(Debug, Clone)]
pub struct SupabaseAuth {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: Uuid,
    #[serde(default)]
    email: Option<String>,
}

impl SupabaseAuth {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let base_url = settings.require_supabase_url()?.to_string();
        let api_key = settings.require_supabase_api_key()?.to_string();

        let timeout_secs = std::env::var("AUTH_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build auth http client")?;

        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }
}

#[async_trait::async_trait]
impl SessionProvider for SupabaseAuth {
    async fn resolve(&self, access_token: &str) -> anyhow::Result<Option<Session>> {
        let mut headers = HeaderMap::new();
        headers.insert("apikey", HeaderValue::from_str(&self.api_key)?);
        headers.insert(
            "authorization",
            HeaderValue::from_str(&format!("Bearer {access_token}"))?,
        );

        let url = format!("{}/auth/v1/user", self.base_url.trim_end_matches('/'));
        let res = self
            .http
            .get(url)
            .headers(headers)
            .send()
            .await
            .context("auth user request failed")?;

        let status = res.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Ok(None);
        }

        let text = res
            .text()
            .await
            .context("failed to read auth user response")?;
        if !status.is_success() {
            anyhow::bail!("auth user HTTP {status}: {text}");
        }

        let user = serde_json::from_str::<AuthUser>(&text)
            .context("failed to parse auth user response")?;
        Ok(Some(Session {
            user_id: user.id,
            email: user.email,
            access_token: access_token.to_string(),
        }))
    }
}

/// Credential from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    let (scheme, token) = header?.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bearer_tokens() {
        assert_eq!(bearer_token(Some("Bearer abc.def")), Some("abc.def"));
        assert_eq!(bearer_token(Some("bearer   xyz ")), Some("xyz"));
        assert_eq!(bearer_token(Some("Basic dXNlcg==")), None);
        assert_eq!(bearer_token(Some("Bearer ")), None);
        assert_eq!(bearer_token(Some("Bearer")), None);
        assert_eq!(bearer_token(None), None);
    }

    #[test]
    fn parses_auth_user_payload() {
        let v = serde_json::json!({
            "id": Uuid::from_u128(9),
            "email": "ops@example.com",
            "role": "authenticated",
            "aud": "authenticated"
        });
        let user: AuthUser = serde_json::from_value(v).unwrap();
        assert_eq!(user.id, Uuid::from_u128(9));
        assert_eq!(user.email.as_deref(), Some("ops@example.com"));
    }
}
