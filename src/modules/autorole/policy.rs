use crate::modules::autorole::errors::{AutoroleError, PlatformError, RoleFailure};
use crate::modules::autorole::ledger::{
    GuildAutoroleConfig, InviteKey, Ledger, RemovedLink, RoleMerge,
};
use crate::modules::autorole::platform::{LiveInvite, Platform, RoleHierarchy};
use crate::modules::autorole::reconcile::{self, JoinOutcome, ReconcileReport};
use crate::services::confirm::{ConfirmPrompt, Confirmation};
use crate::Error;
use anyhow::Context as _;
use poise::serenity_prelude as serenity;
use tracing::{debug, info};

/// Roles to attempt for a key, in stored order. Empty if the key is not linked.
pub fn resolve_roles(config: &GuildAutoroleConfig, key: &InviteKey) -> Vec<serenity::RoleId> {
    config.roles_for(key).to_vec()
}

/// Audit log reason attached to each grant.
pub fn grant_reason(key: &InviteKey, invite_url: Option<&str>) -> String {
    let detail = match key {
        InviteKey::Default => "Default roles given.".to_string(),
        InviteKey::Main => "Joined with an unknown invite, main roles given.".to_string(),
        InviteKey::Real(code) => format!("Joined with {}", invite_url.unwrap_or(code)),
    };
    format!("Roleinvite autorole. {}", detail)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantFlow {
    Continue,
    /// Autorole was disabled mid-join, no further grants for this member.
    Halt,
}

/// Hands out the roles linked to a key to one joining member.
///
/// The role hierarchy is fetched lazily, so keys without roles cost no request.
pub struct RoleGranter<'a> {
    platform: &'a dyn Platform,
    guild_id: serenity::GuildId,
    user_id: serenity::UserId,
    hierarchy: Option<RoleHierarchy>,
}

impl<'a> RoleGranter<'a> {
    pub fn new(
        platform: &'a dyn Platform,
        guild_id: serenity::GuildId,
        user_id: serenity::UserId,
    ) -> Self {
        Self {
            platform,
            guild_id,
            user_id,
            hierarchy: None,
        }
    }

    async fn hierarchy(&mut self) -> Result<&RoleHierarchy, Error> {
        if self.hierarchy.is_none() {
            let fetched = self
                .platform
                .role_hierarchy(self.guild_id)
                .await
                .with_context(|| format!("Failed to fetch roles of guild {}", self.guild_id))?;
            self.hierarchy = Some(fetched);
        }
        Ok(self.hierarchy.get_or_insert_with(RoleHierarchy::default))
    }

    /// Grants every role linked to `key`.
    ///
    /// Roles that vanished are skipped. Roles at or above the bot are unlinked
    /// and reported, the remaining roles are still attempted. A refused grant is
    /// re-checked: only a lost Manage Roles disables autorole and halts.
    pub async fn grant(
        &mut self,
        config: &mut GuildAutoroleConfig,
        key: &InviteKey,
        invite_url: Option<&str>,
        outcome: &mut JoinOutcome,
    ) -> Result<GrantFlow, Error> {
        let roles = resolve_roles(config, key);
        if roles.is_empty() {
            return Ok(GrantFlow::Continue);
        }

        let reason = grant_reason(key, invite_url);
        let guild_id = self.guild_id;
        let user_id = self.user_id;

        for role_id in roles {
            let hierarchy = self.hierarchy().await?;
            if !hierarchy.exists(role_id) {
                debug!("Role {} linked to {} no longer exists", role_id, key.as_str());
                continue;
            }
            if !hierarchy.can_grant(role_id) {
                config.retain_roles(key, |r| *r != role_id);
                outcome.conditions.push(AutoroleError::CannotAddRole {
                    role_id,
                    cause: RoleFailure::Hierarchy,
                });
                continue;
            }

            let granted = self
                .platform
                .grant_role(guild_id, user_id, role_id, &reason)
                .await;
            match granted {
                Ok(()) => outcome.granted.push(role_id),
                Err(PlatformError::PermissionDenied) => {
                    // A 403 alone does not tell why; look at the guild again.
                    self.hierarchy = None;
                    let hierarchy = self.hierarchy().await?;

                    if !hierarchy.bot_can_manage_roles {
                        config.enabled = false;
                        outcome.conditions.push(AutoroleError::CannotAddRole {
                            role_id,
                            cause: RoleFailure::PermissionLost,
                        });
                        return Ok(GrantFlow::Halt);
                    }

                    let cause = if hierarchy.can_grant(role_id) {
                        RoleFailure::Refused
                    } else {
                        config.retain_roles(key, |r| *r != role_id);
                        RoleFailure::Hierarchy
                    };
                    outcome
                        .conditions
                        .push(AutoroleError::CannotAddRole { role_id, cause });
                }
                Err(PlatformError::Other(e)) => {
                    return Err(e.context(format!(
                        "Failed to add role {} to member {} in guild {}",
                        role_id, user_id, guild_id
                    )));
                }
            }
        }

        Ok(GrantFlow::Continue)
    }
}

async fn live_invites_for_admin(
    platform: &dyn Platform,
    guild_id: serenity::GuildId,
) -> Result<Vec<LiveInvite>, Error> {
    match platform.fetch_live_invites(guild_id).await {
        Ok(invites) => Ok(invites),
        Err(PlatformError::PermissionDenied) => {
            Err(AutoroleError::CannotGetInvites { guild_id }.into())
        }
        Err(PlatformError::Other(e)) => Err(e),
    }
}

async fn live_uses(
    platform: &dyn Platform,
    guild_id: serenity::GuildId,
    code: &str,
) -> Result<u64, Error> {
    live_invites_for_admin(platform, guild_id)
        .await?
        .iter()
        .find(|i| i.code == code)
        .map(|i| i.uses)
        .ok_or_else(|| AutoroleError::InviteNotFound(code.to_string()).into())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// `appended` is set when the key already had other roles.
    Linked { appended: bool },
    Cancelled,
}

/// Links `role_id` to `key` on behalf of an admin.
pub async fn link_role(
    ledger: &Ledger,
    platform: &dyn Platform,
    confirm: &dyn Confirmation,
    guild_id: serenity::GuildId,
    key: InviteKey,
    role_id: serenity::RoleId,
) -> Result<LinkOutcome, Error> {
    let hierarchy = platform
        .role_hierarchy(guild_id)
        .await
        .with_context(|| format!("Failed to fetch roles of guild {}", guild_id))?;

    if !hierarchy.can_grant(role_id) {
        return Err(AutoroleError::RoleAboveBot(role_id).into());
    }

    match &key {
        InviteKey::Real(code) => {
            live_uses(platform, guild_id, code).await?;
        }
        InviteKey::Main => {
            // Main roles are only useful if invites can be compared at join time.
            live_invites_for_admin(platform, guild_id).await?;
        }
        InviteKey::Default => {}
    }

    let config = ledger.get(guild_id).await?;
    let existing: Vec<serenity::RoleId> = config
        .roles_for(&key)
        .iter()
        .copied()
        .filter(|r| hierarchy.exists(*r))
        .collect();

    if existing.contains(&role_id) {
        return Err(AutoroleError::RoleAlreadyLinked(role_id, key).into());
    }

    let appended = !existing.is_empty();
    if appended {
        let prompt = ConfirmPrompt::AppendRole {
            key: key.clone(),
            existing,
            role_id,
        };
        if !confirm.confirm(&prompt).await? {
            return Ok(LinkOutcome::Cancelled);
        }
    }

    let mut guild_ledger = ledger.begin(guild_id).await?;
    guild_ledger
        .config_mut()
        .retain_roles(&key, |r| hierarchy.exists(*r));

    // Live count must be read under the guild lock, joins bump it concurrently.
    let seed_uses = match &key {
        InviteKey::Real(code) if guild_ledger.config().get(&key).is_none() => {
            Some(live_uses(platform, guild_id, code).await?)
        }
        _ => None,
    };

    let config = guild_ledger.config_mut();
    config.upsert_invite(key.clone(), &[role_id], RoleMerge::Extend);
    if let Some(uses) = seed_uses {
        config.set_uses(&key, uses);
    }
    guild_ledger.commit().await?;

    info!("Linked role {} to {} in guild {}", role_id, key.as_str(), guild_id);
    Ok(LinkOutcome::Linked { appended })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlinkOutcome {
    RemovedInvite,
    RemovedRole,
    Cancelled,
}

/// Unlinks one role from `key`, or the whole key when no role is given or only one remains.
pub async fn unlink(
    ledger: &Ledger,
    confirm: &dyn Confirmation,
    guild_id: serenity::GuildId,
    key: InviteKey,
    role_id: Option<serenity::RoleId>,
) -> Result<UnlinkOutcome, Error> {
    let config = ledger.get(guild_id).await?;
    let record = config
        .get(&key)
        .ok_or_else(|| AutoroleError::InviteNotFound(key.as_str().to_string()))?;

    let single = match role_id {
        Some(role_id) if record.roles.len() > 1 => {
            if !record.roles.contains(&role_id) {
                return Err(AutoroleError::InviteNotFound(key.as_str().to_string()).into());
            }
            Some(role_id)
        }
        _ => None,
    };

    let prompt = match single {
        None => ConfirmPrompt::RemoveInvite {
            key: key.clone(),
            roles: record.roles.clone(),
        },
        Some(role_id) => ConfirmPrompt::UnlinkRole {
            key: key.clone(),
            role_id,
        },
    };

    if !confirm.confirm(&prompt).await? {
        return Ok(UnlinkOutcome::Cancelled);
    }

    let removed = match single {
        None => ledger.remove_invite(guild_id, &key, None).await?,
        Some(role_id) => {
            ledger
                .remove_invite(guild_id, &key, Some(std::slice::from_ref(&role_id)))
                .await?
        }
    };

    info!("Unlinked {} in guild {} ({:?})", key.as_str(), guild_id, removed);
    Ok(match removed {
        RemovedLink::Invite => UnlinkOutcome::RemovedInvite,
        RemovedLink::Roles(_) => UnlinkOutcome::RemovedRole,
    })
}

/// Current links after dropping invites that were deleted on Discord.
pub async fn list_links(
    ledger: &Ledger,
    platform: &dyn Platform,
    guild_id: serenity::GuildId,
) -> Result<(GuildAutoroleConfig, ReconcileReport), Error> {
    let report = reconcile::reconcile_guild(ledger, platform, guild_id).await?;
    let config = ledger.get(guild_id).await?;
    Ok((config, report))
}

/// Flips `enabled`. Enabling requires Manage Roles. Returns the new state.
pub async fn toggle_enabled(
    ledger: &Ledger,
    platform: &dyn Platform,
    guild_id: serenity::GuildId,
) -> Result<bool, Error> {
    let mut guild_ledger = ledger.begin(guild_id).await?;
    let enable = !guild_ledger.config().enabled;

    if enable {
        let hierarchy = platform
            .role_hierarchy(guild_id)
            .await
            .with_context(|| format!("Failed to fetch roles of guild {}", guild_id))?;
        if !hierarchy.bot_can_manage_roles {
            return Err(AutoroleError::MissingManageRoles.into());
        }
    }

    guild_ledger.config_mut().enabled = enable;
    guild_ledger.commit().await?;
    Ok(enable)
}
