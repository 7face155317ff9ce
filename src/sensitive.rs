//! Protected personal fields: national ids and phone numbers.
//!
//! Values are validated and normalized before they are sealed or hashed, so a
//! formatted and an unformatted input land on the same search hash. Decryption
//! only exists for one record at a time, behind the manager level, and is
//! always audited.

use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    audit::AuditLogger,
    crypto::{EnvelopeCipher, SealedValue, SearchHash},
    error::Result,
    guard::PermissionGuard,
    model::{AccessLevel, AuditAction},
    validators::{normalize_national_id, normalize_phone},
};

/// Who is touching a protected field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Actor {
    pub account_id: Option<Uuid>,
    pub ip: Option<String>,
}

/// The record a protected value belongs to.
#[derive(Debug, Clone, Copy)]
pub struct EntityRef<'a> {
    pub entity_type: &'a str,
    pub entity_id: Option<&'a str>,
}

impl<'a> EntityRef<'a> {
    #[must_use]
    pub fn new(entity_type: &'a str, entity_id: Option<&'a str>) -> Self {
        Self {
            entity_type,
            entity_id,
        }
    }
}

#[derive(Clone)]
pub struct SensitiveFields {
    cipher: Arc<EnvelopeCipher>,
    guard: PermissionGuard,
    audit: AuditLogger,
}

impl std::fmt::Debug for SensitiveFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensitiveFields").finish_non_exhaustive()
    }
}

impl SensitiveFields {
    #[must_use]
    pub fn new(cipher: Arc<EnvelopeCipher>, guard: PermissionGuard, audit: AuditLogger) -> Self {
        Self {
            cipher,
            guard,
            audit,
        }
    }

    /// Validate and seal a national id. `action` is `Create` or `Update`.
    ///
    /// # Errors
    /// `Validation` for bad check digits, `Encryption` on cipher failure.
    pub async fn seal_national_id(
        &self,
        raw: &str,
        action: AuditAction,
        entity: EntityRef<'_>,
        actor: &Actor,
    ) -> Result<SealedValue> {
        let digits = normalize_national_id(raw)?;
        self.seal(&digits, action, entity, actor).await
    }

    /// # Errors
    /// `Validation` for malformed numbers, `Encryption` on cipher failure.
    pub async fn seal_phone(
        &self,
        raw: &str,
        action: AuditAction,
        entity: EntityRef<'_>,
        actor: &Actor,
    ) -> Result<SealedValue> {
        let digits = normalize_phone(raw)?;
        self.seal(&digits, action, entity, actor).await
    }

    async fn seal(
        &self,
        digits: &str,
        action: AuditAction,
        entity: EntityRef<'_>,
        actor: &Actor,
    ) -> Result<SealedValue> {
        let sealed = self.cipher.encrypt_and_hash(digits)?;
        self.audit
            .log_sensitive_access(
                action,
                entity.entity_type,
                entity.entity_id,
                actor.account_id,
                actor.ip.as_deref(),
                Some(sealed.search_hash()),
            )
            .await;
        Ok(sealed)
    }

    /// Search key for a national id. Never decrypts anything.
    ///
    /// # Errors
    /// `Validation` for bad check digits.
    pub async fn search_hash_national_id(
        &self,
        raw: &str,
        entity_type: &str,
        actor: &Actor,
    ) -> Result<SearchHash> {
        let digits = normalize_national_id(raw)?;
        Ok(self
            .search(&digits, AuditAction::SearchNationalId, entity_type, actor)
            .await)
    }

    /// # Errors
    /// `Validation` for malformed numbers.
    pub async fn search_hash_phone(
        &self,
        raw: &str,
        entity_type: &str,
        actor: &Actor,
    ) -> Result<SearchHash> {
        let digits = normalize_phone(raw)?;
        Ok(self
            .search(&digits, AuditAction::SearchPhone, entity_type, actor)
            .await)
    }

    async fn search(
        &self,
        digits: &str,
        action: AuditAction,
        entity_type: &str,
        actor: &Actor,
    ) -> SearchHash {
        let hash = self.cipher.hash(digits);
        self.audit
            .log_sensitive_access(
                action,
                entity_type,
                None,
                actor.account_id,
                actor.ip.as_deref(),
                Some(&hash),
            )
            .await;
        hash
    }

    /// Whether `raw` is the value behind `sealed`, compared on the search hash.
    #[must_use]
    pub fn matches_national_id(&self, raw: &str, sealed: &SealedValue) -> bool {
        normalize_national_id(raw)
            .is_ok_and(|digits| self.cipher.verify_hash(&digits, sealed.search_hash().as_str()))
    }

    /// Decrypt one sealed value for a single record.
    ///
    /// # Errors
    /// `Forbidden` below manager level or for inactive actors; `Decryption`
    /// when the ciphertext does not open under the current key.
    pub async fn disclose(
        &self,
        actor_id: Uuid,
        actor_ip: Option<&str>,
        entity: EntityRef<'_>,
        sealed: &SealedValue,
    ) -> Result<String> {
        self.guard.require(actor_id, AccessLevel::MANAGER).await?;

        let plaintext = self.cipher.decrypt(sealed.ciphertext());
        self.audit
            .log_sensitive_access(
                AuditAction::Decrypt,
                entity.entity_type,
                entity.entity_id,
                Some(actor_id),
                actor_ip,
                Some(sealed.search_hash()),
            )
            .await;

        match plaintext {
            Ok(plaintext) => {
                info!(%actor_id, entity_type = entity.entity_type, "Sensitive value disclosed");
                Ok(plaintext)
            }
            Err(err) => {
                warn!(%actor_id, entity_type = entity.entity_type, "Sealed value could not be decrypted");
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{
        clock::{Clock, SystemClock},
        error::Error,
        model::{NewAccount, Role},
        store::{AccountStore, MemoryStore},
    };
    use secrecy::SecretString;
    use std::time::Duration;

    const NATIONAL_ID: &str = "529.982.247-25";

    async fn fixture(role: Role) -> (SensitiveFields, MemoryStore, Uuid) {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = MemoryStore::new(clock.clone());
        let account = AccountStore::create(
            &store,
            NewAccount {
                username: "officer".to_string(),
                email: "officer@example.com".to_string(),
                display_name: None,
                password_hash: String::new(),
                role,
            },
        )
        .await
        .unwrap();
        let shared = Arc::new(store.clone());
        let cipher = EnvelopeCipher::from_master_secret(&SecretString::from(
            "a-long-master-secret-used-only-in-tests".to_string(),
        ))
        .unwrap();
        let fields = SensitiveFields::new(
            Arc::new(cipher),
            PermissionGuard::new(shared.clone(), Duration::from_secs(1)),
            AuditLogger::new(shared, clock, Duration::from_secs(1)),
        );
        (fields, store, account.id)
    }

    #[tokio::test]
    async fn formatted_and_plain_inputs_share_a_search_hash() {
        let (fields, store, actor_id) = fixture(Role::Operator).await;
        let actor = Actor {
            account_id: Some(actor_id),
            ip: None,
        };
        let sealed = fields
            .seal_national_id(
                NATIONAL_ID,
                AuditAction::Create,
                EntityRef::new("person", Some("42")),
                &actor,
            )
            .await
            .unwrap();
        let hash = fields
            .search_hash_national_id("52998224725", "person", &actor)
            .await
            .unwrap();
        assert_eq!(&hash, sealed.search_hash());
        assert!(fields.matches_national_id("52998224725", &sealed));
        assert!(!sealed.ciphertext().contains("52998224725"));

        let actions: Vec<_> = store
            .sensitive_accesses()
            .iter()
            .map(|access| access.action)
            .collect();
        assert_eq!(actions, vec![AuditAction::Create, AuditAction::SearchNationalId]);
    }

    #[tokio::test]
    async fn invalid_values_are_rejected_before_sealing() {
        let (fields, store, _) = fixture(Role::Operator).await;
        let err = fields
            .seal_phone(
                "(01) 2345-6789",
                AuditAction::Create,
                EntityRef::new("person", None),
                &Actor::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(store.sensitive_accesses().is_empty());
    }

    #[tokio::test]
    async fn disclosure_requires_manager_and_is_audited() {
        let (fields, store, operator) = fixture(Role::Operator).await;
        let sealed = fields
            .seal_phone(
                "(11) 98765-4321",
                AuditAction::Create,
                EntityRef::new("person", Some("7")),
                &Actor::default(),
            )
            .await
            .unwrap();
        let entity = EntityRef::new("person", Some("7"));
        assert!(matches!(
            fields.disclose(operator, None, entity, &sealed).await,
            Err(Error::Forbidden)
        ));

        store.set_role(operator, Role::Manager).await.unwrap();
        let plaintext = fields
            .disclose(operator, Some("10.1.1.1"), entity, &sealed)
            .await
            .unwrap();
        assert_eq!(plaintext, "11987654321");
        let last = store.sensitive_accesses().pop().unwrap();
        assert_eq!(last.action, AuditAction::Decrypt);
        assert_eq!(last.actor_id, Some(operator));
        assert_eq!(last.value_hash.as_ref(), Some(sealed.search_hash()));
    }

    #[tokio::test]
    async fn corrupted_ciphertext_is_a_recoverable_error() {
        let (fields, _, actor) = fixture(Role::Manager).await;
        let sealed = SealedValue::from_stored("not-a-token".to_string(), SearchHash::of("x"));
        let err = fields
            .disclose(actor, None, EntityRef::new("person", None), &sealed)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Decryption(_)));
    }
}
