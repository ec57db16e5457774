//! Session/token provider.
//!
//! `AuthServiceTrait` is what the rest of the crate sees of the identity
//! service: the current session, a feed of session changes, and the
//! OAuth code flow. `HttpAuthService` talks to the hosted backend's
//! `/auth/v1` endpoints.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;
use zeroize::Zeroizing;

use crate::services::pkce;
use crate::services::record_store::error_message;
use crate::types::errors::AuthError;
use crate::types::session::{Session, User};
use crate::types::settings::AppConfig;

/// Sessions this close to expiry are refreshed before being handed out.
pub const EXPIRY_LEEWAY_SECS: i64 = 60;

/// Trait defining the session/token provider.
#[async_trait]
pub trait AuthServiceTrait: Send + Sync {
    /// Returns the current session, refreshing it first if it is about to expire.
    async fn current_session(&self) -> Result<Option<Session>, AuthError>;

    /// Subscribes to session changes (sign-in, refresh, sign-out).
    /// Dropping the receiver unsubscribes.
    fn watch_session(&self) -> watch::Receiver<Option<Session>>;

    /// Installs a previously persisted session without contacting the service.
    fn restore(&self, session: Session);

    /// Starts a sign-in and returns the URL the user must visit.
    fn authorize_url(&self) -> Result<String, AuthError>;

    /// Completes a sign-in with the code from the OAuth redirect.
    async fn exchange_code(&self, code: &str) -> Result<Session, AuthError>;

    /// Trades the refresh token for a new session.
    async fn refresh_session(&self) -> Result<Session, AuthError>;

    /// Ends the session. The local session is cleared even if the remote call fails.
    async fn sign_out(&self) -> Result<(), AuthError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: User,
}

impl TokenResponse {
    fn into_session(self, now: i64) -> Session {
        let expires_at = self
            .expires_at
            .or_else(|| self.expires_in.map(|secs| now + secs));
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        }
    }
}

/// Identity service client over HTTP.
pub struct HttpAuthService {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
    provider: String,
    redirect_url: String,
    state: watch::Sender<Option<Session>>,
    pending_verifier: Mutex<Option<Zeroizing<String>>>,
}

impl HttpAuthService {
    pub fn new(config: &AppConfig) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| AuthError::Network(e.to_string()))?;
        let (state, _) = watch::channel(None);

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
            provider: config.oauth_provider.clone(),
            redirect_url: config.redirect_url.clone(),
            state,
            pending_verifier: Mutex::new(None),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    async fn token_request(&self, grant_type: &str, body: serde_json::Value) -> Result<Session, AuthError> {
        let resp = self
            .client
            .post(self.endpoint("token"))
            .query(&[("grant_type", grant_type)])
            .header("apikey", &self.anon_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                message: error_message(&text, status),
            });
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| AuthError::Decode(e.to_string()))?;
        Ok(token.into_session(Self::now()))
    }

    fn publish(&self, session: Option<Session>) {
        match &session {
            Some(s) => log::info!("auth: session for user {} updated", s.user_id()),
            None => log::info!("auth: signed out"),
        }
        self.state.send_replace(session);
    }
}

#[async_trait]
impl AuthServiceTrait for HttpAuthService {
    async fn current_session(&self) -> Result<Option<Session>, AuthError> {
        let current = self.state.borrow().clone();
        match current {
            Some(session) if session.is_expired(Self::now(), EXPIRY_LEEWAY_SECS) => {
                if session.refresh_token.is_none() {
                    log::warn!("auth: session expired and no refresh token is available");
                    self.publish(None);
                    return Ok(None);
                }
                match self.refresh_session().await {
                    Ok(fresh) => Ok(Some(fresh)),
                    Err(AuthError::Network(e)) => Err(AuthError::Network(e)),
                    Err(e) => {
                        log::warn!("auth: refresh of expired session failed: {}", e);
                        self.publish(None);
                        Ok(None)
                    }
                }
            }
            other => Ok(other),
        }
    }

    fn watch_session(&self) -> watch::Receiver<Option<Session>> {
        self.state.subscribe()
    }

    fn restore(&self, session: Session) {
        self.publish(Some(session));
    }

    fn authorize_url(&self) -> Result<String, AuthError> {
        let pair = pkce::generate()
            .map_err(|_| AuthError::InvalidCallback("failed to generate PKCE verifier".to_string()))?;

        let mut url = Url::parse(&self.endpoint("authorize"))
            .map_err(|e| AuthError::InvalidCallback(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("provider", &self.provider)
            .append_pair("redirect_to", &self.redirect_url)
            .append_pair("code_challenge", &pair.challenge)
            .append_pair("code_challenge_method", "s256");

        let mut pending = match self.pending_verifier.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *pending = Some(pair.verifier);
        Ok(url.to_string())
    }

    async fn exchange_code(&self, code: &str) -> Result<Session, AuthError> {
        if code.trim().is_empty() {
            return Err(AuthError::InvalidCallback("empty code".to_string()));
        }
        let verifier = {
            let mut pending = match self.pending_verifier.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            pending
                .take()
                .ok_or_else(|| AuthError::InvalidCallback("no sign-in in progress".to_string()))?
        };

        let body = json!({ "auth_code": code, "code_verifier": verifier.as_str() });
        let session = self.token_request("pkce", body).await?;
        self.publish(Some(session.clone()));
        Ok(session)
    }

    async fn refresh_session(&self) -> Result<Session, AuthError> {
        let refresh_token = self
            .state
            .borrow()
            .as_ref()
            .and_then(|s| s.refresh_token.clone())
            .ok_or(AuthError::NoSession)?;
        let refresh_token = Zeroizing::new(refresh_token);

        let body = json!({ "refresh_token": refresh_token.as_str() });
        let session = self.token_request("refresh_token", body).await?;
        self.publish(Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let token = self.state.borrow().as_ref().map(|s| s.access_token.clone());
        if let Some(token) = token.map(Zeroizing::new) {
            let result = self
                .client
                .post(self.endpoint("logout"))
                .header("apikey", &self.anon_key)
                .bearer_auth(token.as_str())
                .send()
                .await;
            match result {
                Ok(resp) if !resp.status().is_success() => {
                    log::warn!("auth: remote sign-out returned {}", resp.status());
                }
                Err(e) => log::warn!("auth: remote sign-out failed: {}", e),
                Ok(_) => {}
            }
        }
        self.publish(None);
        Ok(())
    }
}

/// Extracts the authorization code from an OAuth redirect URL.
///
/// Provider errors (`error_description` / `error`) are reported as
/// [`AuthError::InvalidCallback`].
pub fn parse_callback_code(redirect: &str) -> Result<String, AuthError> {
    let url = Url::parse(redirect).map_err(|e| AuthError::InvalidCallback(e.to_string()))?;
    let mut code = None;
    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "error_description" => error = Some(value.into_owned()),
            "error" if error.is_none() => error = Some(value.into_owned()),
            _ => {}
        }
    }
    if let Some(err) = error {
        return Err(AuthError::InvalidCallback(err));
    }
    code.filter(|c| !c.is_empty())
        .ok_or_else(|| AuthError::InvalidCallback("missing code".to_string()))
}
