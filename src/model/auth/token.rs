use std::marker::PhantomData;

use chrono::{serde::ts_seconds, DateTime, Utc};
use jsonwebtoken::{errors::Error as JwtError, Algorithm, DecodingKey, Validation};
use log::debug;
use rocket::{
    http::Status,
    request::{self, FromRequest},
    Request,
};
use serde::{Deserialize, Serialize};

use crate::{
    config::Config,
    error::Error,
    model::{api::ApiId, db::vote::Caller, mongodb::Id},
};

use super::role::{Rights, Role};

pub const AUTH_TOKEN_COOKIE: &str = "auth_token";

/// An authentication token representing a specific user acting in role `U`.
///
/// Tokens are issued elsewhere; we only verify the signature and expiry and
/// then trust the claims.
pub struct AuthToken<U> {
    claims: Claims,
    phantom: PhantomData<U>,
}

/// Token claims, as signed by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    sub: ApiId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(rename = "rgt")]
    rights: Rights,
    #[serde(rename = "exp", with = "ts_seconds")]
    expire_at: DateTime<Utc>,
}

impl<U> AuthToken<U> {
    /// Get the user ID.
    pub fn id(&self) -> Id {
        *self.claims.sub
    }

    /// Get the user's email, if the identity provider supplied one.
    pub fn email(&self) -> Option<&str> {
        self.claims.email.as_deref()
    }

    /// Get the user's rights.
    pub fn rights(&self) -> Rights {
        self.claims.rights
    }

    /// Does this token permit the given rights?
    pub fn permits(&self, target: Rights) -> bool {
        self.claims.rights >= target
    }

    /// The caller's identity, for matching against rosters.
    pub fn caller(&self) -> Caller<'_> {
        Caller {
            user_id: self.id(),
            email: self.email(),
        }
    }

    /// Verify and decode a raw token.
    pub fn decode(raw: &str, secret: &[u8]) -> Result<Self, JwtError> {
        jsonwebtoken::decode::<Claims>(
            raw,
            &DecodingKey::from_secret(secret),
            &Validation::new(Algorithm::HS256),
        )
        .map(|data| Self {
            claims: data.claims,
            phantom: PhantomData,
        })
    }
}

/// The raw token, from the `Authorization` header or else the cookie.
fn raw_token(req: &Request<'_>) -> Option<String> {
    let bearer = req
        .headers()
        .get_one("Authorization")
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string());
    bearer.or_else(|| {
        req.cookies()
            .get(AUTH_TOKEN_COOKIE)
            .map(|cookie| cookie.value().to_string())
    })
}

#[rocket::async_trait]
impl<'r, U> FromRequest<'r> for AuthToken<U>
where
    U: Role,
{
    type Error = Error;

    /// Get an AuthToken from the request and verify that it has the rights
    /// needed for this role.
    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let Some(config) = req.rocket().state::<Config>() else {
            return request::Outcome::Error((
                Status::InternalServerError,
                Error::Unauthorized("identity verification is not configured".to_string()),
            ));
        };

        let Some(raw) = raw_token(req) else {
            return request::Outcome::Error((
                Status::Unauthorized,
                Error::Unauthorized("missing identity token".to_string()),
            ));
        };

        let token = match Self::decode(&raw, config.jwt_secret()) {
            Ok(token) => token,
            Err(e) => {
                debug!("Rejected identity token: {e}");
                return request::Outcome::Error((Status::Unauthorized, e.into()));
            }
        };

        if token.permits(U::RIGHTS) {
            request::Outcome::Success(token)
        } else {
            request::Outcome::Error((
                Status::Forbidden,
                Error::Forbidden(format!("{} rights required", U::RIGHTS)),
            ))
        }
    }
}

/// Token minting for tests; in production tokens come from the identity provider.
#[cfg(test)]
pub mod examples {
    use chrono::Duration;
    use jsonwebtoken::{EncodingKey, Header};

    use super::*;

    pub fn mint(user_id: Id, email: Option<&str>, rights: Rights, secret: &[u8]) -> String {
        mint_expiring(user_id, email, rights, secret, Utc::now() + Duration::hours(1))
    }

    pub fn mint_expiring(
        user_id: Id,
        email: Option<&str>,
        rights: Rights,
        secret: &[u8],
        expire_at: DateTime<Utc>,
    ) -> String {
        let claims = Claims {
            sub: user_id.into(),
            email: email.map(str::to_string),
            rights,
            expire_at,
        };
        jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret),
        )
        .unwrap()
    }
}
