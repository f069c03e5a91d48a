use std::time::Duration;

use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;

use crate::{auth::claims::Claims, config::JwtConfig, error::ServiceError, state::AppState};

/// Lifetime of every issued token. Fixed, not configurable.
pub const TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

/// Who a token is issued for.
#[derive(Debug, Clone, Copy)]
pub struct Identity<'a> {
    pub id: i64,
    pub username: &'a str,
}

/// HS256 signing and verification keys derived from the process secret.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        state.jwt.clone()
    }
}

impl JwtKeys {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.secret.as_bytes()),
        }
    }

    pub fn issue(&self, identity: Identity<'_>) -> Result<String, ServiceError> {
        self.issue_at(identity, OffsetDateTime::now_utc())
    }

    pub(crate) fn issue_at(
        &self,
        identity: Identity<'_>,
        issued_at: OffsetDateTime,
    ) -> Result<String, ServiceError> {
        let exp = issued_at + TimeDuration::seconds(TOKEN_TTL.as_secs() as i64);
        let claims = Claims {
            id: identity.id,
            username: identity.username.to_string(),
            iat: issued_at.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        debug!(user_id = identity.id, "jwt signed");
        Ok(token)
    }

    /// Accepts the token up to its `exp` second with no leeway.
    pub fn verify(&self, token: &str) -> Result<Claims, ServiceError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        debug!(user_id = data.claims.id, "jwt verified");
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_keys(secret: &str) -> JwtKeys {
        JwtKeys::new(&JwtConfig {
            secret: secret.into(),
        })
    }

    fn alice() -> Identity<'static> {
        Identity {
            id: 7,
            username: "alice",
        }
    }

    #[test]
    fn sign_and_verify_carries_identity() {
        let keys = make_keys("dev-secret");
        let token = keys.issue(alice()).expect("sign");
        let claims = keys.verify(&token).expect("verify");
        assert_eq!(claims.id, 7);
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn token_is_valid_just_before_one_hour() {
        let keys = make_keys("dev-secret");
        let issued = OffsetDateTime::now_utc() - TimeDuration::seconds(3600 - 30);
        let token = keys.issue_at(alice(), issued).unwrap();
        assert!(keys.verify(&token).is_ok());
    }

    #[test]
    fn token_is_rejected_after_one_hour() {
        let keys = make_keys("dev-secret");
        let issued = OffsetDateTime::now_utc() - TimeDuration::seconds(3600 + 1);
        let token = keys.issue_at(alice(), issued).unwrap();
        let err = keys.verify(&token).unwrap_err();
        match err {
            ServiceError::Token(e) => assert!(matches!(
                e.kind(),
                jsonwebtoken::errors::ErrorKind::ExpiredSignature
            )),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn verify_rejects_other_secret() {
        let token = make_keys("one").issue(alice()).unwrap();
        assert!(make_keys("two").verify(&token).is_err());
    }

    #[test]
    fn verify_rejects_tampered_token() {
        let keys = make_keys("dev-secret");
        let mut token = keys.issue(alice()).unwrap();
        token.push('x');
        assert!(keys.verify(&token).is_err());
    }
}
