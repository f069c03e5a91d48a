use std::sync::Arc;

use axum::extract::FromRef;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::{
    auth::{
        jwt::{Identity, JwtKeys},
        password::{hash_password_blocking, verify_password_blocking},
    },
    error::ServiceError,
    state::AppState,
    users::{
        repo::UserStore,
        repo_types::{NewUser, User, UserChanges, UserField},
    },
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

const DUMMY_PASSWORD: &str = "no-such-user-placeholder";

fn required(field: &str, value: Option<String>) -> Result<String, ServiceError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ServiceError::Validation(format!("{field} is required"))),
    }
}

fn not_blank(field: &str, value: Option<String>) -> Result<Option<String>, ServiceError> {
    match value {
        Some(v) if v.trim().is_empty() => {
            Err(ServiceError::Validation(format!("{field} must not be empty")))
        }
        other => Ok(other),
    }
}

fn normalize_email(raw: &str) -> Result<String, ServiceError> {
    let email = raw.trim().to_lowercase();
    if !is_valid_email(&email) {
        return Err(ServiceError::Validation("Invalid email".into()));
    }
    Ok(email)
}

/// Validated input for registration and direct creation.
#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl Registration {
    /// Missing or blank fields are rejected here, before any hashing happens.
    pub fn parse(
        username: Option<String>,
        email: Option<String>,
        password: Option<String>,
    ) -> Result<Self, ServiceError> {
        let username = required("username", username)?.trim().to_string();
        let email = normalize_email(&required("email", email)?)?;
        let password = required("password", password)?;
        Ok(Self {
            username,
            email,
            password,
        })
    }
}

/// Validated partial update. Only fields that are present are touched.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

impl ProfileUpdate {
    pub fn parse(
        username: Option<String>,
        email: Option<String>,
        password: Option<String>,
    ) -> Result<Self, ServiceError> {
        let username = not_blank("username", username)?.map(|u| u.trim().to_string());
        let email = not_blank("email", email)?
            .map(|e| normalize_email(&e))
            .transpose()?;
        let password = not_blank("password", password)?;
        Ok(Self {
            username,
            email,
            password,
        })
    }
}

/// Every operation that sees a plaintext password goes through here.
#[derive(Clone)]
pub struct CredentialService {
    users: Arc<dyn UserStore>,
    keys: JwtKeys,
    // verified against when the username is unknown, so both login failures cost one hash
    dummy_hash: Arc<str>,
}

impl FromRef<AppState> for CredentialService {
    fn from_ref(state: &AppState) -> Self {
        state.credentials.clone()
    }
}

impl CredentialService {
    pub fn new(users: Arc<dyn UserStore>, keys: JwtKeys, dummy_hash: String) -> Self {
        Self {
            users,
            keys,
            dummy_hash: dummy_hash.into(),
        }
    }

    /// Hashes the placeholder used for unknown usernames on the blocking pool.
    pub async fn build(users: Arc<dyn UserStore>, keys: JwtKeys) -> Result<Self, ServiceError> {
        let dummy_hash = hash_password_blocking(DUMMY_PASSWORD.to_string()).await?;
        Ok(Self::new(users, keys, dummy_hash))
    }

    /// Rejects a taken email before hashing; the store constraint covers the
    /// race between that check and the insert.
    pub async fn register_user(&self, input: Registration) -> Result<User, ServiceError> {
        if self
            .users
            .find_by_field(UserField::Email, &input.email)
            .await?
            .is_some()
        {
            warn!(email = %input.email, "email already registered");
            return Err(ServiceError::Duplicate);
        }

        let password_hash = hash_password_blocking(input.password).await?;
        let user = self
            .users
            .create(NewUser {
                username: input.username,
                email: input.email,
                password_hash,
            })
            .await?;

        info!(user_id = user.id, username = %user.username, "user created");
        Ok(user)
    }

    /// Existence is checked first so a missing id never costs a hash.
    pub async fn update_user(&self, id: i64, update: ProfileUpdate) -> Result<User, ServiceError> {
        if self.users.find_by_id(id).await?.is_none() {
            return Err(ServiceError::NotFound);
        }
        let password_hash = match update.password {
            Some(plain) => Some(hash_password_blocking(plain).await?),
            None => None,
        };
        let user = self
            .users
            .update(
                id,
                UserChanges {
                    username: update.username,
                    email: update.email,
                    password_hash,
                },
            )
            .await?
            .ok_or(ServiceError::NotFound)?;

        info!(user_id = user.id, "user updated");
        Ok(user)
    }

    /// Returns a signed token. An unknown username and a wrong password give
    /// the same error.
    pub async fn login(
        &self,
        username: Option<String>,
        password: Option<String>,
    ) -> Result<String, ServiceError> {
        let username = required("username", username)?.trim().to_string();
        let password = required("password", password)?;

        let Some(user) = self
            .users
            .find_by_field(UserField::Username, &username)
            .await?
        else {
            let _ = verify_password_blocking(password, self.dummy_hash.to_string()).await;
            warn!(username = %username, "login unknown username");
            return Err(ServiceError::InvalidCredentials);
        };

        if !verify_password_blocking(password, user.password_hash.clone()).await? {
            warn!(user_id = user.id, "login invalid password");
            return Err(ServiceError::InvalidCredentials);
        }

        let token = self.keys.issue(Identity {
            id: user.id,
            username: &user.username,
        })?;
        debug!(user_id = user.id, "login token issued");
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::JwtConfig, users::memory::MemoryUserStore};

    async fn service() -> (CredentialService, JwtKeys, Arc<MemoryUserStore>) {
        let store = Arc::new(MemoryUserStore::new());
        let keys = JwtKeys::new(&JwtConfig {
            secret: "test-secret".into(),
        });
        let svc = CredentialService::build(store.clone(), keys.clone())
            .await
            .expect("build service");
        (svc, keys, store)
    }

    fn registration(username: &str, email: &str, password: &str) -> Registration {
        Registration::parse(
            Some(username.into()),
            Some(email.into()),
            Some(password.into()),
        )
        .expect("valid registration")
    }

    #[test]
    fn email_validation() {
        assert!(is_valid_email("a@x.com"));
        assert!(!is_valid_email("a@x"));
        assert!(!is_valid_email("not an email"));
    }

    #[test]
    fn registration_requires_every_field() {
        let err = Registration::parse(None, Some("a@x.com".into()), Some("pw".into())).unwrap_err();
        assert_eq!(err.to_string(), "username is required");

        let err =
            Registration::parse(Some("alice".into()), Some("a@x.com".into()), Some("".into()))
                .unwrap_err();
        assert_eq!(err.to_string(), "password is required");

        let err = Registration::parse(Some("alice".into()), Some("   ".into()), Some("pw".into()))
            .unwrap_err();
        assert_eq!(err.to_string(), "email is required");
    }

    #[test]
    fn registration_normalizes_email() {
        let reg = registration(" alice ", "  A@X.com ", "pw");
        assert_eq!(reg.username, "alice");
        assert_eq!(reg.email, "a@x.com");
    }

    #[test]
    fn update_rejects_blank_fields_but_allows_absent_ones() {
        assert!(ProfileUpdate::parse(None, None, None).is_ok());
        assert!(ProfileUpdate::parse(Some("".into()), None, None).is_err());
        assert!(ProfileUpdate::parse(None, Some("bad".into()), None).is_err());
        assert!(ProfileUpdate::parse(None, None, Some(" ".into())).is_err());
    }

    #[tokio::test]
    async fn register_hashes_before_storing() {
        let (svc, _, store) = service().await;
        let user = svc
            .register_user(registration("alice", "a@x.com", "secret1"))
            .await
            .unwrap();
        let stored = store.find_by_id(user.id).await.unwrap().unwrap();
        assert_ne!(stored.password_hash, "secret1");
        assert!(stored.password_hash.starts_with("$argon2"));
    }

    #[tokio::test]
    async fn second_registration_with_same_email_is_duplicate() {
        let (svc, _, store) = service().await;
        svc.register_user(registration("alice", "a@x.com", "secret1"))
            .await
            .unwrap();
        let err = svc
            .register_user(registration("bob", "A@x.com", "secret2"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Duplicate));
        assert_eq!(store.find_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_username_is_caught_by_store() {
        let (svc, _, _) = service().await;
        svc.register_user(registration("alice", "a@x.com", "secret1"))
            .await
            .unwrap();
        let err = svc
            .register_user(registration("alice", "other@x.com", "secret1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Duplicate));
    }

    #[tokio::test]
    async fn login_issues_verifiable_token() {
        let (svc, keys, _) = service().await;
        let user = svc
            .register_user(registration("alice", "a@x.com", "secret1"))
            .await
            .unwrap();
        let token = svc
            .login(Some("alice".into()), Some("secret1".into()))
            .await
            .unwrap();
        let claims = keys.verify(&token).unwrap();
        assert_eq!(claims.id, user.id);
        assert_eq!(claims.username, "alice");
    }

    #[tokio::test]
    async fn login_failures_are_indistinguishable() {
        let (svc, _, _) = service().await;
        svc.register_user(registration("alice", "a@x.com", "secret1"))
            .await
            .unwrap();

        let wrong_pw = svc
            .login(Some("alice".into()), Some("wrong".into()))
            .await
            .unwrap_err();
        let unknown = svc
            .login(Some("nobody".into()), Some("secret1".into()))
            .await
            .unwrap_err();
        assert!(matches!(wrong_pw, ServiceError::InvalidCredentials));
        assert!(matches!(unknown, ServiceError::InvalidCredentials));
        assert_eq!(wrong_pw.to_string(), unknown.to_string());
    }

    #[tokio::test]
    async fn update_rehashes_password() {
        let (svc, _, store) = service().await;
        let user = svc
            .register_user(registration("alice", "a@x.com", "secret1"))
            .await
            .unwrap();
        let before = store.find_by_id(user.id).await.unwrap().unwrap().password_hash;

        svc.update_user(
            user.id,
            ProfileUpdate::parse(None, None, Some("secret2".into())).unwrap(),
        )
        .await
        .unwrap();

        let after = store.find_by_id(user.id).await.unwrap().unwrap().password_hash;
        assert_ne!(before, after);
        assert_ne!(after, "secret2");
        assert!(svc
            .login(Some("alice".into()), Some("secret2".into()))
            .await
            .is_ok());
        assert!(svc
            .login(Some("alice".into()), Some("secret1".into()))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn update_missing_user_is_not_found() {
        let (svc, _, _) = service().await;
        let err = svc
            .update_user(42, ProfileUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound));
    }

    /// Store with no users whose write paths must never be reached.
    struct EmptyStore;

    #[async_trait::async_trait]
    impl UserStore for EmptyStore {
        async fn find_all(&self) -> Result<Vec<User>, crate::users::repo::StoreError> {
            Ok(Vec::new())
        }
        async fn find_by_id(&self, _id: i64) -> Result<Option<User>, crate::users::repo::StoreError> {
            Ok(None)
        }
        async fn find_by_field(
            &self,
            _field: UserField,
            _value: &str,
        ) -> Result<Option<User>, crate::users::repo::StoreError> {
            Ok(None)
        }
        async fn create(&self, _new_user: NewUser) -> Result<User, crate::users::repo::StoreError> {
            unreachable!("create must not be called")
        }
        async fn update(
            &self,
            _id: i64,
            _changes: UserChanges,
        ) -> Result<Option<User>, crate::users::repo::StoreError> {
            unreachable!("update must not be called for a missing id")
        }
        async fn delete(&self, _id: i64) -> Result<bool, crate::users::repo::StoreError> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn update_of_missing_user_stops_before_hashing_or_writing() {
        let keys = JwtKeys::new(&JwtConfig {
            secret: "test-secret".into(),
        });
        let svc = CredentialService::new(Arc::new(EmptyStore), keys, "unused".into());
        let err = svc
            .update_user(
                5,
                ProfileUpdate::parse(None, None, Some("secret2".into())).unwrap(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound));
    }

    #[tokio::test]
    async fn build_precomputes_a_usable_placeholder_hash() {
        let (svc, _, _) = service().await;
        assert!(svc.dummy_hash.starts_with("$argon2"));
        assert!(crate::auth::password::verify_password(DUMMY_PASSWORD, &svc.dummy_hash).unwrap());
    }
}
