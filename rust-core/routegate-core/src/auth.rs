//! # Authentication
//!
//! Per-route auth enforcement. A route declares one [`AuthType`]; the
//! [`Authenticator`] checks the live request against it:
//!
//! - `none`: always passes
//! - `jwt`: RS256 bearer token, `timestamp` claim required, claims bound to
//!   an object-shaped request body
//! - `static_tokens`: shared secret from a configured set
//! - recognized but unimplemented schemes: 501
//!
//! Every JWT failure is a distinct [`AuthFailure`] for logging; the caller
//! only ever sees a uniform 401.

use crate::error::{Error, Result};
use crate::request::GatewayRequest;
use crate::route::AuthType;
use crate::settings::{AuthSettings, JwtSettings};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Claim names left out of the claim-body comparison (case-insensitive)
pub const IGNORED_CLAIMS: [&str; 8] = ["timestamp", "iat", "exp", "nbf", "iss", "aud", "sub", "jti"];

/// Why a request failed authentication
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthFailure {
    /// No `Bearer` token in the auth header
    #[error("missing bearer token")]
    MissingJwtToken,
    /// No public key configured
    #[error("no JWT public key configured")]
    MissingKeyMaterial,
    /// `exp` is in the past
    #[error("token has expired")]
    Expired,
    /// Signature does not verify
    #[error("token signature is invalid")]
    BadSignature,
    /// Token cannot be decoded or fails another standard check
    #[error("token rejected: {0}")]
    Malformed(String),
    /// No `timestamp` claim
    #[error("token has no timestamp claim")]
    MissingTimestamp,
    /// Claims and body disagree
    #[error("claims do not match body: {0}")]
    ClaimMismatch(String),
    /// No `Static` token in the auth header
    #[error("missing static token")]
    MissingStaticToken,
    /// Token is not in the configured set
    #[error("static token is not recognized")]
    InvalidStaticToken,
    /// Verification did not finish in time
    #[error("verification timed out after {0:?}")]
    Timeout(Duration),
    /// Verification task died
    #[error("verification aborted: {0}")]
    Aborted(String),
    /// Route declares a scheme with no implementation
    #[error("auth scheme '{0}' is not supported")]
    Unsupported(AuthType),
}

impl AuthFailure {
    /// HTTP status returned to the caller
    #[must_use]
    pub const fn status(&self) -> u16 {
        match self {
            Self::Unsupported(_) => 501,
            Self::Aborted(_) => 500,
            _ => 401,
        }
    }

    /// Machine-readable error code
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::MissingJwtToken => "missing_jwt_token",
            Self::MissingStaticToken => "missing_static_token",
            Self::InvalidStaticToken => "invalid_static_token",
            Self::Unsupported(_) => "selected_auth_not_supported",
            Self::Aborted(_) => "internal_server_error",
            Self::MissingKeyMaterial
            | Self::Expired
            | Self::BadSignature
            | Self::Malformed(_)
            | Self::MissingTimestamp
            | Self::ClaimMismatch(_)
            | Self::Timeout(_) => "invalid_jwt_token",
        }
    }

    /// Message returned to the caller
    #[must_use]
    pub const fn public_message(&self) -> &'static str {
        match self {
            Self::MissingJwtToken => "Missing JWT token",
            Self::MissingStaticToken => "Missing static token",
            Self::InvalidStaticToken => "Invalid static token",
            Self::Unsupported(_) => "Selected auth type is not supported",
            Self::Aborted(_) => "Something went wrong. Please try again later.",
            _ => "Invalid JWT token",
        }
    }

    /// Failures that point at the deployment rather than the caller
    #[must_use]
    pub const fn is_operator_error(&self) -> bool {
        matches!(
            self,
            Self::MissingKeyMaterial | Self::Unsupported(_) | Self::Aborted(_)
        )
    }
}

/// RS256 token verifier with claim-body binding
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("algorithms", &self.validation.algorithms)
            .field("leeway", &self.validation.leeway)
            .finish_non_exhaustive()
    }
}

impl JwtVerifier {
    /// Build a verifier from a PEM-encoded RSA public key
    ///
    /// `exp` and `nbf` are checked when present, with `leeway_secs` of skew.
    /// Audience and issuer are not checked.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the key does not parse or `algorithms` is
    /// empty.
    pub fn from_pem(pem: &str, algorithms: &[Algorithm], leeway_secs: u64) -> Result<Self> {
        let key = DecodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| Error::Config {
            origin: "auth.jwt.publicKey".to_string(),
            reason: e.to_string(),
        })?;
        let Some(first) = algorithms.first() else {
            return Err(Error::Config {
                origin: "auth.jwt.algorithms".to_string(),
                reason: "at least one algorithm is required".to_string(),
            });
        };

        let mut validation = Validation::new(*first);
        validation.algorithms = algorithms.to_vec();
        validation.leeway = leeway_secs;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.validate_aud = false;
        validation.set_required_spec_claims::<&str>(&[]);

        Ok(Self { key, validation })
    }

    /// Build from the `auth.jwt` settings section
    ///
    /// Returns `Ok(None)` when no public key is configured.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an unparsable key or algorithm name.
    pub fn from_settings(settings: &JwtSettings) -> Result<Option<Self>> {
        let Some(pem) = settings.public_key.as_deref().filter(|p| !p.trim().is_empty()) else {
            return Ok(None);
        };
        let algorithms = settings
            .algorithms
            .iter()
            .map(|name| {
                Algorithm::from_str(name).map_err(|e| Error::Config {
                    origin: "auth.jwt.algorithms".to_string(),
                    reason: format!("{name}: {e}"),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_pem(pem, &algorithms, settings.leeway_secs).map(Some)
    }

    /// Verify a token and bind it to the request body
    ///
    /// Returns the decoded claims.
    ///
    /// # Errors
    ///
    /// Returns the specific [`AuthFailure`] reason.
    pub fn verify(&self, token: &str, body: Option<&Value>) -> std::result::Result<Value, AuthFailure> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthFailure::Malformed("empty token".to_string()));
        }

        let data = decode::<Value>(token, &self.key, &self.validation).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthFailure::Expired,
            ErrorKind::InvalidSignature => AuthFailure::BadSignature,
            _ => AuthFailure::Malformed(e.to_string()),
        })?;

        let Value::Object(claims) = &data.claims else {
            return Err(AuthFailure::Malformed("claims are not an object".to_string()));
        };
        if !claims.keys().any(|k| k.eq_ignore_ascii_case("timestamp")) {
            return Err(AuthFailure::MissingTimestamp);
        }

        if let Some(Value::Object(body)) = body {
            claims_match_body(claims, body).map_err(AuthFailure::ClaimMismatch)?;
        }

        Ok(data.claims)
    }
}

fn without_ignored(map: &Map<String, Value>) -> HashMap<String, &Value> {
    map.iter()
        .filter(|(k, _)| !IGNORED_CLAIMS.iter().any(|c| c.eq_ignore_ascii_case(k)))
        .map(|(k, v)| (k.to_lowercase(), v))
        .collect()
}

/// Compare token claims with a request body
///
/// Ignored claims are dropped from both sides and top-level names compare
/// case-insensitively. Both sides must then have the same number of fields
/// and every body field needs an equal claim. Values compare deeply: object
/// keys exactly and in any order, arrays in order, numbers by literal text.
///
/// # Errors
///
/// Returns a description of the first difference.
pub fn claims_match_body(
    claims: &Map<String, Value>,
    body: &Map<String, Value>,
) -> std::result::Result<(), String> {
    let claims = without_ignored(claims);
    let body = without_ignored(body);

    if claims.len() != body.len() {
        return Err(format!(
            "field count mismatch: token has {}, body has {}",
            claims.len(),
            body.len()
        ));
    }

    for (name, value) in &body {
        match claims.get(name) {
            None => return Err(format!("field '{name}' is not in the token")),
            Some(claim) if claim != value => return Err(format!("field '{name}' differs")),
            Some(_) => {}
        }
    }
    Ok(())
}

/// Configured shared-secret tokens
#[derive(Debug, Clone, Default)]
pub struct StaticTokens {
    tokens: HashSet<String>,
}

impl StaticTokens {
    /// Build from token values; empty values are ignored
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens
                .into_iter()
                .map(Into::into)
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    /// Check a presented token
    ///
    /// # Errors
    ///
    /// Returns `AuthFailure::InvalidStaticToken` when the token is unknown.
    pub fn verify(&self, token: &str) -> std::result::Result<(), AuthFailure> {
        if self.tokens.contains(token.trim()) {
            Ok(())
        } else {
            Err(AuthFailure::InvalidStaticToken)
        }
    }

    /// Number of configured tokens
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether no tokens are configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Where a scheme looks for its credential
#[derive(Debug, Clone)]
struct Credential {
    header: String,
    prefix: String,
}

impl Credential {
    fn new(header: &str, prefix: &str) -> Self {
        Self {
            header: header.to_ascii_lowercase(),
            prefix: prefix.to_string(),
        }
    }

    /// Text after the prefix, if the header carries it
    fn extract<'a>(&self, request: &'a GatewayRequest) -> Option<&'a str> {
        let value = request.header(&self.header)?;
        let head = value.get(..self.prefix.len())?;
        head.eq_ignore_ascii_case(&self.prefix)
            .then(|| &value[self.prefix.len()..])
    }
}

/// Enforces the auth scheme a route declares
#[derive(Debug, Clone)]
pub struct Authenticator {
    jwt: Option<Arc<JwtVerifier>>,
    jwt_credential: Credential,
    timeout: Duration,
    static_tokens: StaticTokens,
    static_credential: Credential,
}

impl Default for Authenticator {
    fn default() -> Self {
        let jwt = JwtSettings::default();
        Self {
            jwt: None,
            jwt_credential: Credential::new(&jwt.header, &jwt.prefix),
            timeout: Duration::from_millis(jwt.timeout_ms),
            static_tokens: StaticTokens::default(),
            static_credential: Credential::new("authorization", "Static "),
        }
    }
}

impl Authenticator {
    /// Build from the `auth` settings section
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when the JWT key or algorithms are invalid.
    pub fn from_settings(settings: &AuthSettings) -> Result<Self> {
        let jwt = JwtVerifier::from_settings(&settings.jwt)?.map(Arc::new);
        if jwt.is_none() {
            tracing::warn!("No JWT public key configured; jwt routes will answer 401");
        }
        let statics = &settings.static_tokens;

        Ok(Self {
            jwt,
            jwt_credential: Credential::new(&settings.jwt.header, &settings.jwt.prefix),
            timeout: Duration::from_millis(settings.jwt.timeout_ms),
            static_tokens: StaticTokens::new(statics.tokens.values().cloned()),
            static_credential: Credential::new(&statics.header, &statics.prefix),
        })
    }

    /// Use this JWT verifier
    #[must_use]
    pub fn with_jwt(mut self, verifier: JwtVerifier) -> Self {
        self.jwt = Some(Arc::new(verifier));
        self
    }

    /// Use this token set
    #[must_use]
    pub fn with_static_tokens(mut self, tokens: StaticTokens) -> Self {
        self.static_tokens = tokens;
        self
    }

    /// Bound JWT verification time
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enforce `auth` against a request
    ///
    /// Returns the verified claims for `jwt` routes and `None` otherwise.
    /// JWT verification runs on the blocking pool under a timeout; a timeout
    /// is reported like any other verification failure.
    ///
    /// # Errors
    ///
    /// Returns the [`AuthFailure`] that stopped the request.
    pub async fn enforce(
        &self,
        auth: AuthType,
        request: &GatewayRequest,
        body: Option<&Value>,
    ) -> std::result::Result<Option<Value>, AuthFailure> {
        match auth {
            AuthType::None => Ok(None),
            AuthType::StaticTokens => {
                let token = self
                    .static_credential
                    .extract(request)
                    .ok_or(AuthFailure::MissingStaticToken)?;
                self.static_tokens.verify(token).map(|()| None)
            }
            AuthType::Jwt => {
                let token = self
                    .jwt_credential
                    .extract(request)
                    .ok_or(AuthFailure::MissingJwtToken)?
                    .to_string();
                let verifier = self.jwt.clone().ok_or(AuthFailure::MissingKeyMaterial)?;
                let body = body.cloned();

                let task = tokio::task::spawn_blocking(move || verifier.verify(&token, body.as_ref()));
                match tokio::time::timeout(self.timeout, task).await {
                    Err(_) => Err(AuthFailure::Timeout(self.timeout)),
                    Ok(Err(join)) => Err(AuthFailure::Aborted(join.to_string())),
                    Ok(Ok(result)) => result.map(Some),
                }
            }
            AuthType::OAuth2 | AuthType::Basic | AuthType::ApiKey => Err(AuthFailure::Unsupported(auth)),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_keys {
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    use serde_json::Value;

    pub const PRIVATE_PEM: &str = include_str!("../testdata/jwt_test_private.pem");
    pub const PUBLIC_PEM: &str = include_str!("../testdata/jwt_test_public.pem");
    pub const OTHER_PUBLIC_PEM: &str = include_str!("../testdata/jwt_other_public.pem");

    pub fn sign(claims: &Value) -> String {
        let key = EncodingKey::from_rsa_pem(PRIVATE_PEM.as_bytes()).unwrap();
        encode(&Header::new(Algorithm::RS256), claims, &key).unwrap()
    }

    pub fn now() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }
}
