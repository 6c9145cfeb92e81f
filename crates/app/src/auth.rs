use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
};
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::problem::ProblemResponse;
use crate::router::AppState;

/// Validates bearer tokens issued by the identity provider.
#[derive(Clone)]
pub struct TokenValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenValidator {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.required_spec_claims.clear();
        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Decodes the token and checks its time window against `now`.
    pub fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<AccessClaims, TokenError> {
        let claims = decode::<AccessClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|err| TokenError::Invalid(format!("{err}")))?
            .claims;

        if claims.sub.trim().is_empty() {
            return Err(TokenError::Invalid("missing_subject".to_string()));
        }
        let now_ts = now.timestamp();
        if let Some(nbf) = claims.nbf {
            if now_ts < nbf {
                return Err(TokenError::NotYetValid);
            }
        }
        if now_ts >= claims.exp {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    User,
    Admin,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AccessClaims {
    pub sub: String,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(default)]
    pub role: Role,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid token: {0}")]
    Invalid(String),
    #[error("token expired")]
    Expired,
    #[error("token not yet valid")]
    NotYetValid,
}

impl TokenError {
    fn reason(&self) -> &'static str {
        match self {
            Self::Invalid(_) => "invalid",
            Self::Expired => "expired",
            Self::NotYetValid => "not_yet_valid",
        }
    }
}

/// Authenticated user behind the current request.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: String,
    pub role: Role,
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = ProblemResponse;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|raw| raw.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                counter!("auth_rejections_total", "reason" => "missing").increment(1);
                ProblemResponse::new(
                    StatusCode::UNAUTHORIZED,
                    "missing_token",
                    "a bearer token is required",
                )
            })?;

        let claims = state
            .token_validator()
            .validate(token, state.now())
            .map_err(|err| {
                debug!(stage = "auth", error = %err, "rejected bearer token");
                counter!("auth_rejections_total", "reason" => err.reason()).increment(1);
                ProblemResponse::new(StatusCode::UNAUTHORIZED, "invalid_token", err.to_string())
            })?;

        Ok(Self {
            user_id: claims.sub,
            role: claims.role,
        })
    }
}

/// Caller that carries the admin role; everyone else gets 403.
#[derive(Debug, Clone)]
pub struct AdminCaller(pub Caller);

#[async_trait]
impl FromRequestParts<AppState> for AdminCaller {
    type Rejection = ProblemResponse;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let caller = Caller::from_request_parts(parts, state).await?;
        if !caller.is_admin() {
            counter!("auth_rejections_total", "reason" => "not_admin").increment(1);
            return Err(ProblemResponse::new(
                StatusCode::FORBIDDEN,
                "admin_required",
                "this endpoint requires the admin role",
            ));
        }
        Ok(Self(caller))
    }
}
