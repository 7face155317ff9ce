#![allow(dead_code)]

use anyhow::{Context, Result};
use secrecy::SecretString;
use sigma::{
    accounts::Registration,
    api::AppState,
    auth::AuthConfig,
    clock::{Clock, ManualClock},
    crypto::{password::MIN_ITERATIONS, CredentialHasher, EnvelopeCipher},
    model::{Identity, Role},
    recovery::LogTokenSender,
    store::MemoryStore,
};
use std::sync::Arc;

pub const PASSWORD: &str = "correct horse battery";
pub const MASTER_SECRET: &str = "integration-master-secret-for-tests";

pub struct Harness {
    pub state: Arc<AppState>,
    pub store: MemoryStore,
    pub clock: ManualClock,
}

impl Harness {
    pub fn new() -> Result<Self> {
        Self::with_config(AuthConfig::default())
    }

    pub fn with_config(config: AuthConfig) -> Result<Self> {
        let clock = ManualClock::default();
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let store = MemoryStore::new(shared_clock.clone());
        let cipher = EnvelopeCipher::from_master_secret(&SecretString::from(
            MASTER_SECRET.to_string(),
        ))
        .context("Failed to derive test cipher")?;
        let state = AppState::from_store(
            Arc::new(store.clone()),
            shared_clock,
            Arc::new(cipher),
            config,
            CredentialHasher::new(MIN_ITERATIONS),
            Arc::new(LogTokenSender),
            false,
        );
        Ok(Self {
            state: Arc::new(state),
            store,
            clock,
        })
    }

    pub async fn register(&self, username: &str, role: Role) -> Result<Identity> {
        self.state
            .accounts
            .register(Registration {
                username: username.to_string(),
                email: format!("{username}@example.com"),
                password: PASSWORD.to_string(),
                display_name: None,
                role: Some(role),
            })
            .await
            .with_context(|| format!("Failed to register {username}"))
    }
}
