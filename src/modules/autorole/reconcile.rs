use crate::modules::autorole::errors::{AutoroleError, PlatformError};
use crate::modules::autorole::ledger::{GuildAutoroleConfig, GuildLedger, InviteKey, Ledger};
use crate::modules::autorole::platform::{LiveInvite, Platform};
use crate::modules::autorole::policy::{GrantFlow, RoleGranter};
use crate::Error;
use anyhow::Context as _;
use poise::serenity_prelude as serenity;
use tracing::debug;

/// Change to apply to one tracked invite after a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InviteChange {
    /// The invite no longer exists on Discord.
    Deleted(String),
    Uses { code: String, uses: u64 },
}

/// Compares every tracked invite with the live list.
///
/// Only invites whose count actually moved produce a `Uses` change.
pub fn plan_reconciliation(config: &GuildAutoroleConfig, live: &[LiveInvite]) -> Vec<InviteChange> {
    let mut changes = vec![];

    for record in config.real_invites() {
        let code = record.code.as_str();
        match live.iter().find(|i| i.code == code) {
            None => changes.push(InviteChange::Deleted(code.to_string())),
            Some(invite) if record.uses != Some(invite.uses) => changes.push(InviteChange::Uses {
                code: code.to_string(),
                uses: invite.uses,
            }),
            Some(_) => {}
        }
    }

    changes
}

fn apply_changes(config: &mut GuildAutoroleConfig, changes: &[InviteChange]) {
    for change in changes {
        match change {
            InviteChange::Deleted(code) => {
                config.drop_invite(&InviteKey::Real(code.clone()));
            }
            InviteChange::Uses { code, uses } => {
                config.set_uses(&InviteKey::Real(code.clone()), *uses);
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// No real invites are tracked, nothing was fetched.
    pub skipped: bool,
    pub removed: Vec<String>,
    pub updated: Vec<String>,
    pub condition: Option<AutoroleError>,
}

/// Brings every tracked use count in line with Discord and forgets deleted invites.
///
/// Losing the invite permission disables autorole for the guild and is reported
/// in the returned report, not as an error.
pub async fn reconcile_guild(
    ledger: &Ledger,
    platform: &dyn Platform,
    guild_id: serenity::GuildId,
) -> Result<ReconcileReport, Error> {
    let mut guild_ledger = ledger.begin(guild_id).await?;

    if !guild_ledger.config().has_real_invites() {
        return Ok(ReconcileReport {
            skipped: true,
            ..Default::default()
        });
    }

    let live = match platform.fetch_live_invites(guild_id).await {
        Ok(live) => live,
        Err(PlatformError::PermissionDenied) => {
            guild_ledger.config_mut().enabled = false;
            guild_ledger.commit().await?;
            return Ok(ReconcileReport {
                condition: Some(AutoroleError::CannotGetInvites { guild_id }),
                ..Default::default()
            });
        }
        Err(PlatformError::Other(e)) => {
            return Err(e.context(format!("Failed to fetch invites of guild {}", guild_id)));
        }
    };

    let changes = plan_reconciliation(guild_ledger.config(), &live);
    apply_changes(guild_ledger.config_mut(), &changes);
    guild_ledger.commit().await?;

    let mut report = ReconcileReport::default();
    for change in changes {
        match change {
            InviteChange::Deleted(code) => report.removed.push(code),
            InviteChange::Uses { code, .. } => report.updated.push(code),
        }
    }
    Ok(report)
}

/// The tracked invite whose use count went up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaInvite {
    pub code: String,
    pub url: String,
    pub uses: u64,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct DeltaScan {
    /// Tracked invites seen missing before the delta was found.
    pub deleted: Vec<String>,
    pub delta: Option<DeltaInvite>,
}

/// Walks tracked invites in stored order and stops at the first one that was used.
pub fn find_delta(config: &GuildAutoroleConfig, live: &[LiveInvite]) -> DeltaScan {
    let mut scan = DeltaScan::default();

    for record in config.real_invites() {
        let code = record.code.as_str();
        let Some(invite) = live.iter().find(|i| i.code == code) else {
            scan.deleted.push(code.to_string());
            continue;
        };

        if invite.uses > record.uses.unwrap_or(0) {
            scan.delta = Some(DeltaInvite {
                code: code.to_string(),
                url: invite.url.clone(),
                uses: invite.uses,
            });
            break;
        }
    }

    scan
}

/// Where a join was attributed. Never more than one per join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribution {
    Invite(String),
    Main,
}

/// Result of handling one join.
#[derive(Debug, Default)]
pub struct JoinOutcome {
    /// `None` when autorole is disabled or was disabled before attribution.
    pub attribution: Option<Attribution>,
    pub granted: Vec<serenity::RoleId>,
    pub conditions: Vec<AutoroleError>,
}

/// Grants the roles a newly joined member is entitled to.
///
/// Default roles always come first. Then the member is attributed to the tracked
/// invite whose use count increased, or to the main roles when none did. The
/// guild stays locked from load to commit, so concurrent joins cannot steal
/// each other's delta.
pub async fn handle_member_join(
    ledger: &Ledger,
    platform: &dyn Platform,
    guild_id: serenity::GuildId,
    user_id: serenity::UserId,
) -> Result<JoinOutcome, Error> {
    let mut guild_ledger = ledger.begin(guild_id).await?;
    let mut outcome = JoinOutcome::default();

    if !guild_ledger.config().enabled {
        debug!("Autorole disabled in guild {}, ignoring join of {}", guild_id, user_id);
        return Ok(outcome);
    }

    let mut granter = RoleGranter::new(platform, guild_id, user_id);
    let result = attribute_and_grant(&mut guild_ledger, platform, &mut granter, &mut outcome).await;

    // Heals, disables and use counts gathered so far are kept even if a grant failed.
    guild_ledger
        .commit()
        .await
        .with_context(|| format!("Failed to save autorole state of guild {}", guild_id))?;

    result.map(|()| outcome)
}

async fn attribute_and_grant(
    guild_ledger: &mut GuildLedger,
    platform: &dyn Platform,
    granter: &mut RoleGranter<'_>,
    outcome: &mut JoinOutcome,
) -> Result<(), Error> {
    let guild_id = guild_ledger.guild_id();

    let flow = granter
        .grant(guild_ledger.config_mut(), &InviteKey::Default, None, outcome)
        .await?;
    if flow == GrantFlow::Halt {
        return Ok(());
    }

    if !guild_ledger.config().has_real_invites() {
        outcome.attribution = Some(Attribution::Main);
        granter
            .grant(guild_ledger.config_mut(), &InviteKey::Main, None, outcome)
            .await?;
        return Ok(());
    }

    let live = match platform.fetch_live_invites(guild_id).await {
        Ok(live) => live,
        Err(PlatformError::PermissionDenied) => {
            guild_ledger.config_mut().enabled = false;
            outcome
                .conditions
                .push(AutoroleError::CannotGetInvites { guild_id });
            return Ok(());
        }
        Err(PlatformError::Other(e)) => {
            return Err(e.context(format!("Failed to fetch invites of guild {}", guild_id)));
        }
    };

    let scan = find_delta(guild_ledger.config(), &live);
    let config = guild_ledger.config_mut();
    for code in &scan.deleted {
        config.drop_invite(&InviteKey::Real(code.clone()));
    }

    match scan.delta {
        Some(delta) => {
            let key = InviteKey::Real(delta.code.clone());
            config.set_uses(&key, delta.uses);
            outcome.attribution = Some(Attribution::Invite(delta.code));
            granter
                .grant(config, &key, Some(&delta.url), outcome)
                .await?;
        }
        None => {
            outcome.attribution = Some(Attribution::Main);
            granter
                .grant(config, &InviteKey::Main, None, outcome)
                .await?;
        }
    }

    Ok(())
}
