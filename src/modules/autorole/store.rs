use crate::db::entities::autorole_configs;
use crate::modules::autorole::ledger::{GuildAutoroleConfig, InviteRecord};
use crate::Error;
use anyhow::Context as _;
use poise::serenity_prelude as serenity;
use sea_orm::sea_query::OnConflict;
use sea_orm::{DatabaseConnection, EntityTrait, Set};

/// Durable per-guild storage for autorole configs.
///
/// Writes are field-level so a concurrent change to `enabled` is never
/// clobbered by a write of `invites`, and the other way around.
#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    async fn load(&self, guild_id: serenity::GuildId) -> Result<GuildAutoroleConfig, Error>;

    async fn save_invites(
        &self,
        guild_id: serenity::GuildId,
        invites: &[InviteRecord],
    ) -> Result<(), Error>;

    async fn save_enabled(&self, guild_id: serenity::GuildId, enabled: bool) -> Result<(), Error>;

    async fn clear(&self, guild_id: serenity::GuildId) -> Result<(), Error>;

    async fn guild_ids(&self) -> Result<Vec<serenity::GuildId>, Error>;
}

pub struct DbLedgerStore {
    db: DatabaseConnection,
}

impl DbLedgerStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl LedgerStore for DbLedgerStore {
    async fn load(&self, guild_id: serenity::GuildId) -> Result<GuildAutoroleConfig, Error> {
        let row = autorole_configs::Entity::find_by_id(guild_id.get() as i64)
            .one(&self.db)
            .await?;

        match row {
            Some(m) => {
                let invites: Vec<InviteRecord> = serde_json::from_value(m.invites)
                    .with_context(|| format!("Corrupt autorole invites for guild {}", guild_id))?;
                Ok(GuildAutoroleConfig {
                    enabled: m.enabled,
                    invites,
                })
            }
            None => Ok(GuildAutoroleConfig::default()),
        }
    }

    async fn save_invites(
        &self,
        guild_id: serenity::GuildId,
        invites: &[InviteRecord],
    ) -> Result<(), Error> {
        let row = autorole_configs::ActiveModel {
            guild_id: Set(guild_id.get() as i64),
            enabled: Set(false),
            invites: Set(serde_json::to_value(invites)?),
        };

        autorole_configs::Entity::insert(row)
            .on_conflict(
                OnConflict::column(autorole_configs::Column::GuildId)
                    .update_column(autorole_configs::Column::Invites)
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        Ok(())
    }

    async fn save_enabled(&self, guild_id: serenity::GuildId, enabled: bool) -> Result<(), Error> {
        let row = autorole_configs::ActiveModel {
            guild_id: Set(guild_id.get() as i64),
            enabled: Set(enabled),
            invites: Set(serde_json::json!([])),
        };

        autorole_configs::Entity::insert(row)
            .on_conflict(
                OnConflict::column(autorole_configs::Column::GuildId)
                    .update_column(autorole_configs::Column::Enabled)
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        Ok(())
    }

    async fn clear(&self, guild_id: serenity::GuildId) -> Result<(), Error> {
        autorole_configs::Entity::delete_by_id(guild_id.get() as i64)
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn guild_ids(&self) -> Result<Vec<serenity::GuildId>, Error> {
        let rows = autorole_configs::Entity::find().all(&self.db).await?;
        Ok(rows
            .into_iter()
            .map(|m| serenity::GuildId::new(m.guild_id as u64))
            .collect())
    }
}
