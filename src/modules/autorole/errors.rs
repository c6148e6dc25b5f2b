use crate::modules::autorole::ledger::InviteKey;
use poise::serenity_prelude as serenity;
use std::fmt;

/// Conditions raised by the autorole module.
///
/// None of these are fatal to the process. Join-time conditions are collected
/// into outcomes and logged, admin-time ones are shown to the invoking admin.
#[derive(Debug, thiserror::Error)]
pub enum AutoroleError {
    #[error("I lost the permission to list invites in guild {guild_id}. Autorole is now disabled there.")]
    CannotGetInvites { guild_id: serenity::GuildId },

    #[error("Cannot add role {role_id}: {cause}")]
    CannotAddRole {
        role_id: serenity::RoleId,
        cause: RoleFailure,
    },

    #[error("That invite cannot be found: `{0}`")]
    InviteNotFound(String),

    #[error("Role <@&{0}> is higher than mine. I can't add it to new members.")]
    RoleAboveBot(serenity::RoleId),

    #[error("Role <@&{0}> is already linked to {1}.")]
    RoleAlreadyLinked(serenity::RoleId, InviteKey),

    #[error("I lack the `Manage Roles` permission.")]
    MissingManageRoles,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleFailure {
    /// The role sits at or above the bot's highest role. The link was removed.
    Hierarchy,
    /// The bot lost Manage Roles. Autorole was disabled for the guild.
    PermissionLost,
    /// Discord refused the grant for another reason, e.g. a managed role.
    Refused,
}

impl fmt::Display for RoleFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleFailure::Hierarchy => {
                write!(f, "role is too high in the hierarchy, now removed from the list")
            }
            RoleFailure::PermissionLost => {
                write!(f, "the Manage Roles permission was lost, autorole is now disabled")
            }
            RoleFailure::Refused => {
                write!(f, "Discord refused to add it, the role may be managed by an integration")
            }
        }
    }
}

/// Failure reported by the platform client.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("missing permissions")]
    PermissionDenied,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
