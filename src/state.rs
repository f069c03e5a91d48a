use std::sync::Arc;

use anyhow::Context;

use crate::auth::{jwt::JwtKeys, password::hash_password, services::CredentialService};
use crate::config::{AppConfig, JwtConfig, StoreBackend};
use crate::users::{
    memory::MemoryUserStore,
    repo::{PgUserStore, UserStore},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserStore>,
    pub jwt: JwtKeys,
    pub credentials: CredentialService,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let users = match &config.store {
            StoreBackend::Postgres {
                database_url,
                max_connections,
            } => {
                let db = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(*max_connections)
                    .connect(database_url)
                    .await
                    .context("connect to database")?;

                // Run migrations if present
                if let Err(e) = sqlx::migrate!("./migrations").run(&db).await {
                    tracing::warn!(error = %e, "migration failed; continuing");
                }

                Arc::new(PgUserStore::new(db)) as Arc<dyn UserStore>
            }
            StoreBackend::Memory => {
                tracing::warn!("using in-memory user store; data is lost on restart");
                Arc::new(MemoryUserStore::new()) as Arc<dyn UserStore>
            }
        };

        let jwt = JwtKeys::new(&config.jwt);
        let credentials = CredentialService::build(users.clone(), jwt.clone())
            .await
            .context("prepare credential service")?;
        Ok(Self::from_parts(Arc::new(config), users, jwt, credentials))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        users: Arc<dyn UserStore>,
        jwt: JwtKeys,
        credentials: CredentialService,
    ) -> Self {
        Self {
            config,
            users,
            jwt,
            credentials,
        }
    }

    /// Memory-backed state with a fixed test secret.
    pub fn fake() -> Self {
        let config = Arc::new(AppConfig {
            store: StoreBackend::Memory,
            jwt: JwtConfig {
                secret: "test".into(),
            },
            host: "127.0.0.1".into(),
            port: 0,
            request_timeout_secs: 30,
        });
        let users = Arc::new(MemoryUserStore::new()) as Arc<dyn UserStore>;
        let jwt = JwtKeys::new(&config.jwt);
        let placeholder = hash_password("fake-placeholder").expect("argon2 hash ok");
        let credentials = CredentialService::new(users.clone(), jwt.clone(), placeholder);
        Self::from_parts(config, users, jwt, credentials)
    }
}
