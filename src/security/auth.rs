//! Bearer credential verification.
//!
//! Tokens are HMAC-signed JWTs issued by the auth service. Only the HMAC
//! family (HS256/HS384/HS512) is accepted; the header's `alg` is checked
//! before any signature work so that `none` or asymmetric algorithms can
//! never be used to forge a token.

use axum::http::{header::AUTHORIZATION, Request};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use jsonwebtoken::{errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::AuthConfig;

const ALLOWED_ALGORITHMS: [Algorithm; 3] = [Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

/// Why a credential was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("missing authorization header")]
    MissingHeader,
    #[error("invalid authorization header format")]
    MalformedHeader,
    #[error("token is malformed")]
    MalformedToken,
    #[error("token signing algorithm is not allowed")]
    DisallowedAlgorithm,
    #[error("invalid token signature")]
    InvalidSignature,
    #[error("token has expired")]
    Expired,
    #[error("invalid token claims")]
    MalformedClaims,
}

impl AuthError {
    /// Stable label for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::MissingHeader => "missing_header",
            AuthError::MalformedHeader => "malformed_header",
            AuthError::MalformedToken => "malformed_token",
            AuthError::DisallowedAlgorithm => "disallowed_algorithm",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::Expired => "expired",
            AuthError::MalformedClaims => "malformed_claims",
        }
    }
}

/// Subject identifier; the auth service issues numeric ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubjectId {
    Numeric(i64),
    Text(String),
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectId::Numeric(id) => write!(f, "{}", id),
            SubjectId::Text(id) => f.write_str(id),
        }
    }
}

/// Claims carried by an access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(alias = "sub")]
    pub user_id: SubjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
}

/// Identity of an authenticated caller, attached to the request's extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: SubjectId,
    pub email: Option<String>,
    pub expires_at: u64,
}

#[derive(Deserialize)]
struct RawHeader {
    alg: String,
}

/// Verifies bearer tokens against a pre-shared secret.
pub struct Authenticator {
    key: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator")
            .field("algorithms", &self.validation.algorithms)
            .finish_non_exhaustive()
    }
}

impl Authenticator {
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = ALLOWED_ALGORITHMS.to_vec();
        validation.leeway = config.leeway_secs;
        validation.validate_exp = true;

        Self {
            key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
        }
    }

    /// Authenticate `request` from its `Authorization: Bearer <token>` header.
    pub fn authenticate<B>(&self, request: &Request<B>) -> Result<AuthContext, AuthError> {
        let header = request
            .headers()
            .get(AUTHORIZATION)
            .ok_or(AuthError::MissingHeader)?
            .to_str()
            .map_err(|_| AuthError::MalformedHeader)?;

        if header.is_empty() {
            return Err(AuthError::MissingHeader);
        }

        let parts: Vec<&str> = header.split(' ').collect();
        let token = match parts.as_slice() {
            ["Bearer", token] if !token.is_empty() => *token,
            _ => return Err(AuthError::MalformedHeader),
        };

        self.verify(token)
    }

    /// Verify a raw token and extract its identity claims.
    pub fn verify(&self, token: &str) -> Result<AuthContext, AuthError> {
        check_algorithm(token)?;

        let data = jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| classify(e.kind()))?;

        Ok(AuthContext {
            user_id: data.claims.user_id,
            email: data.claims.email,
            expires_at: data.claims.exp,
        })
    }
}

/// Reject anything but the HMAC family by reading `alg` directly, so that
/// algorithms the decoder does not know (e.g. `none`) are classified too.
fn check_algorithm(token: &str) -> Result<(), AuthError> {
    let mut segments = token.split('.');
    let (Some(header), Some(_), Some(_), None) =
        (segments.next(), segments.next(), segments.next(), segments.next())
    else {
        return Err(AuthError::MalformedToken);
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(header)
        .map_err(|_| AuthError::MalformedToken)?;
    let header: RawHeader = serde_json::from_slice(&bytes).map_err(|_| AuthError::MalformedToken)?;

    match header.alg.as_str() {
        "HS256" | "HS384" | "HS512" => Ok(()),
        _ => Err(AuthError::DisallowedAlgorithm),
    }
}

fn classify(kind: &ErrorKind) -> AuthError {
    match kind {
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
            AuthError::DisallowedAlgorithm
        }
        ErrorKind::Json(_)
        | ErrorKind::MissingRequiredClaim(_)
        | ErrorKind::ImmatureSignature
        | ErrorKind::InvalidIssuer
        | ErrorKind::InvalidAudience
        | ErrorKind::InvalidSubject => AuthError::MalformedClaims,
        _ => AuthError::MalformedToken,
    }
}
