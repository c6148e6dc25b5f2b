use crate::modules::autorole::errors::{AutoroleError, PlatformError};
use crate::modules::autorole::ledger::Ledger;
use crate::modules::autorole::platform::Platform;
use crate::modules::autorole::reconcile::reconcile_guild;
use crate::Error;
use futures::future::join_all;
use poise::serenity_prelude as serenity;
use tracing::{error, info, warn};

#[derive(Debug, Default)]
pub struct SweepReport {
    /// Guilds the bot left, their configs are gone.
    pub cleared: Vec<serenity::GuildId>,
    pub reconciled: Vec<serenity::GuildId>,
    /// Guilds where autorole got disabled during reconciliation.
    pub disabled: Vec<serenity::GuildId>,
    pub failed: Vec<serenity::GuildId>,
}

enum GuildSweep {
    Cleared,
    Reconciled(Option<AutoroleError>),
}

async fn sweep_guild(
    ledger: &Ledger,
    platform: &dyn Platform,
    guild_id: serenity::GuildId,
) -> Result<GuildSweep, Error> {
    let member = match platform.is_member(guild_id).await {
        Ok(member) => member,
        Err(PlatformError::PermissionDenied) => false,
        Err(PlatformError::Other(e)) => {
            return Err(e.context(format!("Failed to check membership of guild {}", guild_id)));
        }
    };

    if !member {
        ledger.clear(guild_id).await?;
        return Ok(GuildSweep::Cleared);
    }

    let report = reconcile_guild(ledger, platform, guild_id).await?;
    Ok(GuildSweep::Reconciled(report.condition))
}

/// Startup pass over every stored guild.
///
/// Configs of guilds the bot is no longer in are cleared, the others are
/// reconciled. Guilds run concurrently and a failure in one never stops another.
pub async fn sweep(ledger: &Ledger, platform: &dyn Platform) -> Result<SweepReport, Error> {
    let guild_ids = ledger.guild_ids().await?;
    info!("Checking autorole state of {} guilds", guild_ids.len());

    let results = join_all(
        guild_ids
            .iter()
            .map(|guild_id| sweep_guild(ledger, platform, *guild_id)),
    )
    .await;

    let mut report = SweepReport::default();
    for (guild_id, result) in guild_ids.into_iter().zip(results) {
        match result {
            Ok(GuildSweep::Cleared) => {
                info!("Bot left guild {}, autorole config cleared", guild_id);
                report.cleared.push(guild_id);
            }
            Ok(GuildSweep::Reconciled(None)) => report.reconciled.push(guild_id),
            Ok(GuildSweep::Reconciled(Some(condition))) => {
                warn!("Guild {}: {}", guild_id, condition);
                report.disabled.push(guild_id);
            }
            Err(e) => {
                let snapshot = ledger.get(guild_id).await.ok();
                error!(
                    "Autorole sweep failed for guild {}: {:?} (config: {:?})",
                    guild_id, e, snapshot
                );
                report.failed.push(guild_id);
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::autorole::ledger::{GuildAutoroleConfig, InviteKey, RoleMerge};
    use crate::modules::autorole::testing::{FakePlatform, MemoryStore};
    use std::sync::Arc;

    fn config_with(key: InviteKey, uses: u64) -> GuildAutoroleConfig {
        let mut config = GuildAutoroleConfig {
            enabled: true,
            ..Default::default()
        };
        config.upsert_invite(key.clone(), &[serenity::RoleId::new(1)], RoleMerge::Extend);
        config.set_uses(&key, uses);
        config
    }

    #[tokio::test]
    async fn departed_guilds_are_cleared_and_others_reconciled() {
        let stayed = serenity::GuildId::new(1);
        let left = serenity::GuildId::new(2);
        let denied = serenity::GuildId::new(3);

        let store = MemoryStore::with(stayed, config_with(InviteKey::Real("a".into()), 0));
        let store = Arc::new(store);
        let ledger = Ledger::new(store.clone());
        ledger
            .upsert_invite(left, InviteKey::Main, &[serenity::RoleId::new(2)], RoleMerge::Extend)
            .await
            .unwrap();
        ledger
            .upsert_invite(
                denied,
                InviteKey::Real("b".into()),
                &[serenity::RoleId::new(3)],
                RoleMerge::Extend,
            )
            .await
            .unwrap();
        ledger.set_enabled(denied, true).await.unwrap();

        let platform = FakePlatform::new()
            .with_invite(stayed, "a", 2)
            .with_invites_denied(denied)
            .departed_from(left);

        let report = sweep(&ledger, &platform).await.unwrap();

        assert_eq!(report.cleared, vec![left]);
        assert_eq!(report.reconciled, vec![stayed]);
        assert_eq!(report.disabled, vec![denied]);
        assert!(report.failed.is_empty());

        assert_eq!(ledger.get(left).await.unwrap(), GuildAutoroleConfig::default());
        let stayed_config = ledger.get(stayed).await.unwrap();
        assert_eq!(
            stayed_config.get(&InviteKey::Real("a".into())).unwrap().uses,
            Some(2)
        );
        assert!(!ledger.get(denied).await.unwrap().enabled);
        assert_eq!(ledger.guild_ids().await.unwrap(), vec![stayed, denied]);
    }

    #[tokio::test]
    async fn empty_store_sweeps_nothing() {
        let ledger = Ledger::new(Arc::new(MemoryStore::default()));
        let platform = FakePlatform::new();

        let report = sweep(&ledger, &platform).await.unwrap();

        assert!(report.cleared.is_empty() && report.reconciled.is_empty());
        assert_eq!(platform.invite_fetches(), 0);
    }
}
