use crate::modules::autorole::errors::PlatformError;
use poise::serenity_prelude as serenity;
use std::collections::HashMap;
use std::sync::Arc;

/// An invite as currently reported by Discord.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveInvite {
    pub code: String,
    pub url: String,
    pub uses: u64,
}

/// Role positions of a guild as seen from the bot.
#[derive(Debug, Clone, Default)]
pub struct RoleHierarchy {
    pub ranks: HashMap<serenity::RoleId, u16>,
    /// Position of the bot's highest role.
    pub bot_top: u16,
    pub bot_can_manage_roles: bool,
}

impl RoleHierarchy {
    /// `None` if the role no longer exists.
    pub fn rank(&self, role_id: serenity::RoleId) -> Option<u16> {
        self.ranks.get(&role_id).copied()
    }

    pub fn exists(&self, role_id: serenity::RoleId) -> bool {
        self.ranks.contains_key(&role_id)
    }

    /// Whether Discord would let the bot hand out this role.
    pub fn can_grant(&self, role_id: serenity::RoleId) -> bool {
        self.rank(role_id).is_some_and(|rank| rank < self.bot_top)
    }
}

/// What the autorole core needs from Discord.
#[async_trait::async_trait]
pub trait Platform: Send + Sync {
    async fn fetch_live_invites(
        &self,
        guild_id: serenity::GuildId,
    ) -> Result<Vec<LiveInvite>, PlatformError>;

    async fn role_hierarchy(&self, guild_id: serenity::GuildId)
    -> Result<RoleHierarchy, PlatformError>;

    async fn grant_role(
        &self,
        guild_id: serenity::GuildId,
        user_id: serenity::UserId,
        role_id: serenity::RoleId,
        reason: &str,
    ) -> Result<(), PlatformError>;

    /// Whether the bot is still in the guild.
    async fn is_member(&self, guild_id: serenity::GuildId) -> Result<bool, PlatformError>;
}

/// [`Platform`] over serenity's HTTP client.
pub struct SerenityPlatform {
    http: Arc<serenity::Http>,
    bot_id: serenity::UserId,
}

impl SerenityPlatform {
    pub fn new(http: Arc<serenity::Http>, bot_id: serenity::UserId) -> Self {
        Self { http, bot_id }
    }

    pub fn from_context(ctx: &serenity::Context) -> Self {
        let bot_id = ctx.cache.current_user().id;
        Self::new(ctx.http.clone(), bot_id)
    }
}

fn status_code(err: &serenity::Error) -> Option<u16> {
    match err {
        serenity::Error::Http(e) => e.status_code().map(|s| s.as_u16()),
        _ => None,
    }
}

fn classify(err: serenity::Error) -> PlatformError {
    match status_code(&err) {
        Some(403) => PlatformError::PermissionDenied,
        _ => PlatformError::Other(err.into()),
    }
}

#[async_trait::async_trait]
impl Platform for SerenityPlatform {
    async fn fetch_live_invites(
        &self,
        guild_id: serenity::GuildId,
    ) -> Result<Vec<LiveInvite>, PlatformError> {
        let invites = self
            .http
            .get_guild_invites(guild_id)
            .await
            .map_err(classify)?;

        Ok(invites
            .into_iter()
            .map(|invite| LiveInvite {
                url: invite.url(),
                code: invite.code,
                uses: invite.uses,
            })
            .collect())
    }

    async fn role_hierarchy(
        &self,
        guild_id: serenity::GuildId,
    ) -> Result<RoleHierarchy, PlatformError> {
        let guild = self.http.get_guild(guild_id).await.map_err(classify)?;
        let me = self
            .http
            .get_member(guild_id, self.bot_id)
            .await
            .map_err(classify)?;

        let bot_top = me
            .roles
            .iter()
            .filter_map(|r| guild.roles.get(r))
            .map(|r| r.position)
            .max()
            .unwrap_or(0);

        // @everyone shares the guild's id and applies to every member.
        let everyone = serenity::RoleId::new(guild_id.get());
        let permissions = me
            .roles
            .iter()
            .chain(std::iter::once(&everyone))
            .filter_map(|r| guild.roles.get(r))
            .fold(serenity::Permissions::empty(), |acc, r| acc | r.permissions);

        let bot_can_manage_roles = guild.owner_id == self.bot_id
            || permissions.administrator()
            || permissions.manage_roles();

        Ok(RoleHierarchy {
            ranks: guild.roles.iter().map(|(id, r)| (*id, r.position)).collect(),
            bot_top,
            bot_can_manage_roles,
        })
    }

    async fn grant_role(
        &self,
        guild_id: serenity::GuildId,
        user_id: serenity::UserId,
        role_id: serenity::RoleId,
        reason: &str,
    ) -> Result<(), PlatformError> {
        self.http
            .add_member_role(guild_id, user_id, role_id, Some(reason))
            .await
            .map_err(classify)
    }

    async fn is_member(&self, guild_id: serenity::GuildId) -> Result<bool, PlatformError> {
        match self.http.get_guild(guild_id).await {
            Ok(_) => Ok(true),
            Err(e) => match status_code(&e) {
                Some(403) | Some(404) => Ok(false),
                _ => Err(PlatformError::Other(e.into())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_at_or_above_the_bot_cannot_be_granted() {
        let hierarchy = RoleHierarchy {
            ranks: HashMap::from([
                (serenity::RoleId::new(1), 3),
                (serenity::RoleId::new(2), 5),
                (serenity::RoleId::new(3), 7),
            ]),
            bot_top: 5,
            bot_can_manage_roles: true,
        };

        assert!(hierarchy.can_grant(serenity::RoleId::new(1)));
        assert!(!hierarchy.can_grant(serenity::RoleId::new(2)));
        assert!(!hierarchy.can_grant(serenity::RoleId::new(3)));
        assert!(!hierarchy.can_grant(serenity::RoleId::new(4)));
        assert!(!hierarchy.exists(serenity::RoleId::new(4)));
    }
}
