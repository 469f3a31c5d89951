use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, RwLock};

use crate::error::AppError;

pub const ACCESS_TOKEN_COOKIE: &str = "accessToken";
pub const REFRESH_TOKEN_COOKIE: &str = "refreshToken";
pub const CSRF_TOKEN_COOKIE: &str = "csrfToken";

/// Service-account login pair sent to the upstream login endpoint.
#[derive(Clone)]
pub struct Credentials {
    pub identity: String,
    pub secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct TokenSet {
    pub session_token: String,
    pub renewal_token: String,
    pub anti_forgery_token: String,
}

impl TokenSet {
    /// Builds a set from extracted cookies, failing unless all three are present.
    pub fn from_cookies(cookies: &HashMap<String, String>) -> Result<Self, AppError> {
        let get = |name: &str| cookies.get(name).cloned().unwrap_or_default();
        let tokens = Self {
            session_token: get(ACCESS_TOKEN_COOKIE),
            renewal_token: get(REFRESH_TOKEN_COOKIE),
            anti_forgery_token: get(CSRF_TOKEN_COOKIE),
        };

        if !tokens.is_valid() {
            return Err(AppError::Authentication(format!(
                "failed to extract authentication tokens: {}={}, {}={}, {}={}",
                ACCESS_TOKEN_COOKIE,
                !tokens.session_token.is_empty(),
                REFRESH_TOKEN_COOKIE,
                !tokens.renewal_token.is_empty(),
                CSRF_TOKEN_COOKIE,
                !tokens.anti_forgery_token.is_empty(),
            )));
        }

        Ok(tokens)
    }

    pub fn is_valid(&self) -> bool {
        !self.session_token.is_empty()
            && !self.renewal_token.is_empty()
            && !self.anti_forgery_token.is_empty()
    }

    pub fn cookie_header(&self) -> String {
        format!(
            "{}={}; {}={}",
            ACCESS_TOKEN_COOKIE, self.session_token, REFRESH_TOKEN_COOKIE, self.renewal_token
        )
    }
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("session_token_len", &self.session_token.len())
            .field("renewal_token_len", &self.renewal_token.len())
            .field("anti_forgery_token_len", &self.anti_forgery_token.len())
            .finish()
    }
}

#[derive(Default)]
struct Flight {
    last_error: Option<AppError>,
}

/// Shared session-token set with single-flight login.
///
/// Readers take the read lock and always see a complete set or an empty one:
/// a set is only ever replaced whole, under the write lock. Logins are
/// serialized by the flight mutex; callers that queued behind a login reuse
/// its tokens on success and its error on failure instead of logging in
/// again.
#[derive(Default)]
pub struct CredentialStore {
    tokens: RwLock<TokenSet>,
    flight: Mutex<Flight>,
    generation: AtomicU64,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn current(&self) -> TokenSet {
        self.tokens.read().await.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.tokens.read().await.is_valid()
    }

    pub async fn clear(&self) {
        *self.tokens.write().await = TokenSet::default();
    }

    /// Returns the current set, logging in first if it is not valid.
    pub async fn ensure<F, Fut>(&self, login: F) -> Result<TokenSet, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<TokenSet, AppError>>,
    {
        let current = self.current().await;
        if current.is_valid() {
            return Ok(current);
        }
        self.single_flight(TokenSet::is_valid, login).await
    }

    /// Replaces `stale` with a fresh set. Does not log in again when another
    /// caller already replaced it.
    pub async fn renew<F, Fut>(&self, stale: &TokenSet, login: F) -> Result<TokenSet, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<TokenSet, AppError>>,
    {
        self.single_flight(|tokens| tokens.is_valid() && tokens != stale, login)
            .await
    }

    async fn single_flight<S, F, Fut>(&self, satisfied: S, login: F) -> Result<TokenSet, AppError>
    where
        S: Fn(&TokenSet) -> bool,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<TokenSet, AppError>>,
    {
        let observed = self.generation.load(Ordering::Acquire);
        let mut flight = self.flight.lock().await;

        {
            let tokens = self.tokens.read().await;
            if satisfied(&*tokens) {
                return Ok(tokens.clone());
            }
        }

        if self.generation.load(Ordering::Acquire) != observed {
            if let Some(err) = &flight.last_error {
                return Err(err.clone());
            }
        }

        let result = match login().await {
            Ok(tokens) if tokens.is_valid() => {
                *self.tokens.write().await = tokens.clone();
                flight.last_error = None;
                Ok(tokens)
            }
            Ok(_) => {
                let err = AppError::Authentication("login returned an incomplete token set".into());
                flight.last_error = Some(err.clone());
                Err(err)
            }
            Err(err) => {
                flight.last_error = Some(err.clone());
                Err(err)
            }
        };

        self.generation.fetch_add(1, Ordering::Release);
        result
    }
}
