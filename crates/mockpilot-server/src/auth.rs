//! Handshake credential checks.
//!
//! A client proves it may join a session with a JWT whose `sub` is the
//! session id. Tokens are minted by an external issuer; [`issue_token`]
//! exists for development and tests. Each failure maps to a WebSocket close
//! code so clients can tell a bad request from a stale credential.

use std::str::FromStr;
use std::time::Duration;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use mockpilot_core::SessionId;
use mockpilot_settings::AuthSettings;
use serde::{Deserialize, Serialize};

/// Longest accepted session id.
pub const MAX_SESSION_ID_LEN: usize = 128;

/// Handshake rejection.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Malformed handshake, e.g. an unusable session id.
    #[error("bad handshake: {0}")]
    BadHandshake(String),

    /// No credential presented.
    #[error("missing credential")]
    MissingToken,

    /// Credential could not be verified.
    #[error("invalid credential: {0}")]
    InvalidToken(String),

    /// Credential is past its expiry.
    #[error("credential expired")]
    Expired,

    /// Valid credential that does not grant this session.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Verifier misconfigured.
    #[error("auth configuration error: {0}")]
    Config(String),
}

impl AuthError {
    /// WebSocket close code for this rejection.
    #[must_use]
    pub fn close_code(&self) -> u16 {
        match self {
            Self::BadHandshake(_) => 4400,
            Self::MissingToken | Self::InvalidToken(_) => 4401,
            Self::Expired | Self::Forbidden(_) => 4403,
            Self::Config(_) => 1011,
        }
    }

    /// Short label for close frames and metrics.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::BadHandshake(_) => "bad_handshake",
            Self::MissingToken => "unauthenticated",
            Self::InvalidToken(_) => "invalid_token",
            Self::Expired => "expired",
            Self::Forbidden(_) => "forbidden",
            Self::Config(_) => "server_error",
        }
    }
}

/// Claims carried by a session credential.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Session the bearer may join.
    pub sub: String,
    /// Expiry, seconds since the Unix epoch.
    pub exp: u64,
    /// Issued at, seconds since the Unix epoch.
    #[serde(default)]
    pub iat: u64,
    /// Issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Granted scopes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
}

/// Verifies that a credential grants access to a session.
pub trait CredentialVerifier: Send + Sync + 'static {
    /// Check `token` against `session_id`.
    fn verify(&self, session_id: &SessionId, token: &str) -> Result<SessionClaims, AuthError>;
}

/// HMAC JWT verifier.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("algorithms", &self.validation.algorithms)
            .finish_non_exhaustive()
    }
}

impl JwtVerifier {
    /// Build from auth settings.
    pub fn from_settings(settings: &AuthSettings) -> Result<Self, AuthError> {
        let algorithm = hmac_algorithm(&settings.jwt_algorithm)?;
        let mut validation = Validation::new(algorithm);
        validation.leeway = settings.leeway_secs;
        validation.set_required_spec_claims(&["exp", "sub"]);
        if let Some(issuer) = &settings.issuer {
            validation.set_issuer(&[issuer]);
        }
        Ok(Self {
            key: DecodingKey::from_secret(settings.jwt_secret.as_bytes()),
            validation,
        })
    }
}

impl CredentialVerifier for JwtVerifier {
    fn verify(&self, session_id: &SessionId, token: &str) -> Result<SessionClaims, AuthError> {
        if token.trim().is_empty() {
            return Err(AuthError::MissingToken);
        }
        let data = jsonwebtoken::decode::<SessionClaims>(token, &self.key, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                ErrorKind::InvalidIssuer => AuthError::Forbidden("issuer not accepted".into()),
                _ => AuthError::InvalidToken(e.to_string()),
            })?;
        if data.claims.sub != session_id.as_str() {
            return Err(AuthError::Forbidden(format!(
                "credential is not valid for session {session_id}"
            )));
        }
        Ok(data.claims)
    }
}

/// Mint a credential for `session_id` valid for `ttl`.
pub fn issue_token(
    settings: &AuthSettings,
    session_id: &SessionId,
    ttl: Duration,
) -> Result<String, AuthError> {
    let algorithm = hmac_algorithm(&settings.jwt_algorithm)?;
    let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0);
    let claims = SessionClaims {
        sub: session_id.to_string(),
        exp: now + ttl.as_secs(),
        iat: now,
        iss: settings.issuer.clone(),
        scopes: vec!["session:join".into()],
    };
    jsonwebtoken::encode(
        &Header::new(algorithm),
        &claims,
        &EncodingKey::from_secret(settings.jwt_secret.as_bytes()),
    )
    .map_err(|e| AuthError::Config(e.to_string()))
}

/// Check a session id taken from the handshake path.
pub fn parse_session_id(raw: &str) -> Result<SessionId, AuthError> {
    if raw.is_empty() {
        return Err(AuthError::BadHandshake("empty session id".into()));
    }
    if raw.len() > MAX_SESSION_ID_LEN {
        return Err(AuthError::BadHandshake(format!(
            "session id longer than {MAX_SESSION_ID_LEN} bytes"
        )));
    }
    if let Some(c) = raw
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')))
    {
        return Err(AuthError::BadHandshake(format!(
            "invalid character {c:?} in session id"
        )));
    }
    Ok(SessionId::from(raw))
}

fn hmac_algorithm(name: &str) -> Result<Algorithm, AuthError> {
    let algorithm = Algorithm::from_str(name).map_err(|e| AuthError::Config(e.to_string()))?;
    match algorithm {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Ok(algorithm),
        other => Err(AuthError::Config(format!("{other:?} needs a key pair, only HMAC is supported"))),
    }
}
