mod common;

use anyhow::{ensure, Context, Result};
use common::{Harness, PASSWORD};
use sigma::{
    audit::ClientInfo,
    guard::PermissionGuard,
    model::{AccessLevel, AuditAction, Role},
    sensitive::{Actor, EntityRef},
    Error,
};
use std::{sync::Arc, time::Duration};

fn guard(h: &Harness) -> PermissionGuard {
    PermissionGuard::new(Arc::new(h.store.clone()), Duration::from_secs(1))
}

#[tokio::test]
async fn guard_is_monotonic_across_every_role() -> Result<()> {
    let h = Harness::new()?;
    let guard = guard(&h);
    for role in Role::ALL {
        let identity = h.register(role.as_str(), role).await?;
        for level in 1..=5_u8 {
            let required = AccessLevel::new(level).context("level in range")?;
            let allowed = guard.require(identity.account_id, required).await.is_ok();
            ensure!(
                allowed == (role.level() >= required),
                "{role} vs level {level}: allowed={allowed}"
            );
        }
    }
    Ok(())
}

#[tokio::test]
async fn promotion_takes_effect_on_the_next_check() -> Result<()> {
    let h = Harness::new()?;
    let admin = h.register("root", Role::Admin).await?;
    let operator = h.register("otto", Role::Operator).await?;
    let guard = guard(&h);

    ensure!(matches!(
        guard.require(operator.account_id, AccessLevel::ANALYST).await,
        Err(Error::Forbidden)
    ));

    h.state
        .accounts
        .set_role(admin.account_id, operator.account_id, Role::Analyst)
        .await?;

    let authorized = guard
        .require(operator.account_id, AccessLevel::ANALYST)
        .await
        .context("promoted operator must pass")?;
    ensure!(authorized.level == AccessLevel::ANALYST);
    Ok(())
}

#[tokio::test]
async fn promotion_applies_to_an_already_open_session() -> Result<()> {
    let h = Harness::new()?;
    let admin = h.register("root", Role::Admin).await?;
    h.register("olga", Role::Operator).await?;
    let guard = guard(&h);
    let grant = h
        .state
        .auth
        .login("olga", PASSWORD, &ClientInfo::new(None, None))
        .await?;
    let token = grant.tokens.session_token;

    let resolved = h
        .state
        .auth
        .resolve_session(&token)
        .await?
        .context("fresh session must resolve")?;
    ensure!(matches!(
        guard
            .require(resolved.identity.account_id, AccessLevel::ANALYST)
            .await,
        Err(Error::Forbidden)
    ));

    h.state
        .accounts
        .set_role(admin.account_id, resolved.identity.account_id, Role::Analyst)
        .await?;

    let again = h
        .state
        .auth
        .resolve_session(&token)
        .await?
        .context("session must survive a role change")?;
    ensure!(again.session.id == resolved.session.id);
    let authorized = guard
        .require(again.identity.account_id, AccessLevel::ANALYST)
        .await
        .context("promoted session must pass")?;
    ensure!(authorized.level == AccessLevel::ANALYST);
    Ok(())
}

#[tokio::test]
async fn deactivation_cuts_an_open_session() -> Result<()> {
    let h = Harness::new()?;
    let admin = h.register("root", Role::Admin).await?;
    let user = h.register("uma", Role::Manager).await?;
    let client = ClientInfo::new(None, None);
    let grant = h.state.auth.login("uma", PASSWORD, &client).await?;

    let revoked = h
        .state
        .accounts
        .deactivate(admin.account_id, user.account_id)
        .await?;
    ensure!(revoked == 1);
    ensure!(h.state.auth.resolve(&grant.tokens.session_token).await?.is_none());
    ensure!(matches!(
        guard(&h).require(user.account_id, AccessLevel::VIEWER).await,
        Err(Error::Forbidden)
    ));
    Ok(())
}

#[tokio::test]
async fn non_admins_cannot_administer() -> Result<()> {
    let h = Harness::new()?;
    let manager = h.register("mia", Role::Manager).await?;
    let viewer = h.register("vera", Role::Viewer).await?;

    ensure!(matches!(
        h.state
            .accounts
            .set_role(manager.account_id, viewer.account_id, Role::Admin)
            .await,
        Err(Error::Forbidden)
    ));
    ensure!(matches!(
        h.state
            .accounts
            .recent_attempts(manager.account_id, viewer.account_id, 10)
            .await,
        Err(Error::Forbidden)
    ));
    Ok(())
}

#[tokio::test]
async fn disclosure_is_gated_at_manager_and_audited() -> Result<()> {
    let h = Harness::new()?;
    let analyst = h.register("ana", Role::Analyst).await?;
    let manager = h.register("max", Role::Manager).await?;
    let fields = &h.state.sensitive;
    let entity = EntityRef::new("person", Some("17"));

    let sealed = fields
        .seal_national_id(
            "529.982.247-25",
            AuditAction::Create,
            entity,
            &Actor {
                account_id: Some(analyst.account_id),
                ip: Some("203.0.113.5".to_string()),
            },
        )
        .await?;

    ensure!(matches!(
        fields
            .disclose(analyst.account_id, None, entity, &sealed)
            .await,
        Err(Error::Forbidden)
    ));
    let plaintext = fields
        .disclose(manager.account_id, Some("203.0.113.6"), entity, &sealed)
        .await?;
    ensure!(plaintext == "52998224725");

    let actions: Vec<_> = h
        .store
        .sensitive_accesses()
        .into_iter()
        .map(|access| (access.action, access.actor_id))
        .collect();
    ensure!(
        actions
            == vec![
                (AuditAction::Create, Some(analyst.account_id)),
                (AuditAction::Decrypt, Some(manager.account_id)),
            ],
        "{actions:?}"
    );
    Ok(())
}
