//! Credential storage and refresh.
//!
//! The orchestrator reads the current credential before every attempt and
//! calls [`CredentialProvider::refresh`] when the server answers 401.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{
    error::{TransportError, TransportResult},
    transport::{Request, Transport},
};

/// Source of the bearer credential attached to outgoing requests.
#[async_trait]
pub trait CredentialProvider: Send + Sync + 'static {
    /// The credential to use right now, if any.
    fn credential(&self) -> Option<String>;

    /// Obtain and store a new credential.
    async fn refresh(&self) -> TransportResult<String>;

    /// Called once the session can no longer be recovered, e.g. to send the
    /// user back to a login screen.
    fn on_session_invalidated(&self) {}
}

#[async_trait]
impl<P: CredentialProvider + ?Sized> CredentialProvider for Arc<P> {
    fn credential(&self) -> Option<String> {
        (**self).credential()
    }

    async fn refresh(&self) -> TransportResult<String> {
        (**self).refresh().await
    }

    fn on_session_invalidated(&self) {
        (**self).on_session_invalidated()
    }
}

/// No credential at all.
#[derive(Debug, Clone, Default)]
pub struct NoCredentials;

#[async_trait]
impl CredentialProvider for NoCredentials {
    fn credential(&self) -> Option<String> {
        None
    }

    async fn refresh(&self) -> TransportResult<String> {
        Err(TransportError::auth("no refresh mechanism configured"))
    }
}

/// A fixed token that cannot be refreshed.
#[derive(Clone)]
pub struct StaticCredentials {
    token: String,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("token", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    fn credential(&self) -> Option<String> {
        Some(self.token.clone())
    }

    async fn refresh(&self) -> TransportResult<String> {
        Err(TransportError::auth("static credentials cannot be refreshed"))
    }
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Default)]
struct TokenPair {
    access: Option<String>,
    refresh: Option<String>,
}

type InvalidationHook = Box<dyn Fn() + Send + Sync>;

/// Access/refresh token pair renewed against a refresh endpoint.
///
/// A refresh posts `{"refresh_token": ..}` and expects
/// `{"access_token": .., "refresh_token"?: ..}` back. When the refresh is
/// rejected both tokens are dropped before the error is returned.
pub struct RefreshingCredentials {
    tokens: RwLock<TokenPair>,
    refresh_url: String,
    transport: Arc<dyn Transport>,
    on_invalidated: Option<InvalidationHook>,
}

impl RefreshingCredentials {
    pub fn new(
        transport: Arc<dyn Transport>,
        refresh_url: impl Into<String>,
        access_token: Option<String>,
        refresh_token: Option<String>,
    ) -> Self {
        Self {
            tokens: RwLock::new(TokenPair {
                access: access_token,
                refresh: refresh_token,
            }),
            refresh_url: refresh_url.into(),
            transport,
            on_invalidated: None,
        }
    }

    /// Run `hook` when the session is invalidated.
    #[must_use]
    pub fn on_invalidated(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_invalidated = Some(Box::new(hook));
        self
    }

    /// Replace both tokens, e.g. after an interactive login.
    pub fn set_tokens(&self, access_token: String, refresh_token: Option<String>) {
        let mut tokens = self.tokens.write();
        tokens.access = Some(access_token);
        tokens.refresh = refresh_token;
    }

    pub fn clear(&self) {
        *self.tokens.write() = TokenPair::default();
    }

    fn refresh_token(&self) -> Option<String> {
        self.tokens.read().refresh.clone()
    }
}

impl fmt::Debug for RefreshingCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tokens = self.tokens.read();
        f.debug_struct("RefreshingCredentials")
            .field("refresh_url", &self.refresh_url)
            .field("has_access_token", &tokens.access.is_some())
            .field("has_refresh_token", &tokens.refresh.is_some())
            .finish()
    }
}

#[async_trait]
impl CredentialProvider for RefreshingCredentials {
    fn credential(&self) -> Option<String> {
        self.tokens.read().access.clone()
    }

    async fn refresh(&self) -> TransportResult<String> {
        let Some(refresh_token) = self.refresh_token() else {
            return Err(TransportError::auth("no refresh token available"));
        };

        let request = Request::post(self.refresh_url.clone()).json(&RefreshRequest {
            refresh_token: &refresh_token,
        })?;
        let response = self.transport.send(request).await?;
        if !response.is_success() {
            self.clear();
            return Err(TransportError::auth(format!(
                "refresh rejected with status {}",
                response.status
            )));
        }

        let renewed: RefreshResponse = response.json().map_err(|e| {
            self.clear();
            e
        })?;
        let mut tokens = self.tokens.write();
        tokens.access = Some(renewed.access_token.clone());
        if let Some(rotated) = renewed.refresh_token {
            tokens.refresh = Some(rotated);
        }
        Ok(renewed.access_token)
    }

    fn on_session_invalidated(&self) {
        self.clear();
        if let Some(hook) = &self.on_invalidated {
            hook();
        }
    }
}
