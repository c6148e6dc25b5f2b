use crate::modules::autorole::errors::AutoroleError;
use crate::modules::autorole::store::LedgerStore;
use crate::services::locks::GuildLocks;
use crate::Error;
use poise::serenity_prelude as serenity;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

/// Key of a ledger record: a tracked invite code or one of the two reserved role sets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InviteKey {
    /// Roles given when the used invite is not tracked.
    Main,
    /// Roles always given, whatever invite was used.
    Default,
    Real(String),
}

impl InviteKey {
    /// Parses admin input: `main`, `default`, an invite link or a bare code.
    pub fn parse(input: &str) -> Result<Self, AutoroleError> {
        let input = input.trim();
        if input.eq_ignore_ascii_case("main") {
            return Ok(InviteKey::Main);
        }
        if input.eq_ignore_ascii_case("default") {
            return Ok(InviteKey::Default);
        }

        let code = input
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default();

        if code.is_empty() {
            return Err(AutoroleError::InviteNotFound(input.to_string()));
        }

        Ok(InviteKey::Real(code.to_string()))
    }

    pub fn is_real(&self) -> bool {
        matches!(self, InviteKey::Real(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            InviteKey::Main => "main",
            InviteKey::Default => "default",
            InviteKey::Real(code) => code,
        }
    }
}

impl From<String> for InviteKey {
    fn from(value: String) -> Self {
        match value.as_str() {
            "main" => InviteKey::Main,
            "default" => InviteKey::Default,
            _ => InviteKey::Real(value),
        }
    }
}

impl From<InviteKey> for String {
    fn from(key: InviteKey) -> Self {
        match key {
            InviteKey::Real(code) => code,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for InviteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InviteKey::Main => write!(f, "the main autorole"),
            InviteKey::Default => write!(f, "the default autorole"),
            InviteKey::Real(code) => write!(f, "invite `{}`", code),
        }
    }
}

/// Roles linked to one key, plus the last observed use count for real invites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteRecord {
    pub code: InviteKey,
    #[serde(with = "role_ids")]
    pub roles: Vec<serenity::RoleId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uses: Option<u64>,
}

/// Role ids persisted as plain JSON numbers.
mod role_ids {
    use poise::serenity_prelude as serenity;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(roles: &[serenity::RoleId], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(roles.iter().map(|r| r.get()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<serenity::RoleId>, D::Error> {
        let ids = Vec::<u64>::deserialize(d)?;
        Ok(ids
            .into_iter()
            .filter(|id| *id != 0)
            .map(serenity::RoleId::new)
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleMerge {
    Replace,
    Extend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovedLink {
    /// The whole record is gone.
    Invite,
    /// Only some roles were unlinked, the record remains.
    Roles(usize),
}

/// Autorole state of a single guild.
///
/// Records keep their insertion order; join attribution scans them in that order.
/// A record never holds an empty role list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuildAutoroleConfig {
    pub enabled: bool,
    pub invites: Vec<InviteRecord>,
}

impl GuildAutoroleConfig {
    pub fn get(&self, key: &InviteKey) -> Option<&InviteRecord> {
        self.invites.iter().find(|r| &r.code == key)
    }

    fn position(&self, key: &InviteKey) -> Option<usize> {
        self.invites.iter().position(|r| &r.code == key)
    }

    pub fn roles_for(&self, key: &InviteKey) -> &[serenity::RoleId] {
        self.get(key).map(|r| r.roles.as_slice()).unwrap_or(&[])
    }

    pub fn real_invites(&self) -> impl Iterator<Item = &InviteRecord> {
        self.invites.iter().filter(|r| r.code.is_real())
    }

    pub fn has_real_invites(&self) -> bool {
        self.real_invites().next().is_some()
    }

    /// Links roles to a key, creating the record when needed.
    /// New real invites start at zero uses; sentinels never carry a count.
    pub fn upsert_invite(&mut self, key: InviteKey, roles: &[serenity::RoleId], merge: RoleMerge) {
        match self.position(&key) {
            Some(idx) => {
                let record = &mut self.invites[idx];
                if merge == RoleMerge::Replace {
                    record.roles.clear();
                }
                for role in roles {
                    if !record.roles.contains(role) {
                        record.roles.push(*role);
                    }
                }
                if record.roles.is_empty() {
                    self.invites.remove(idx);
                }
            }
            None => {
                let mut linked: Vec<serenity::RoleId> = Vec::with_capacity(roles.len());
                for role in roles {
                    if !linked.contains(role) {
                        linked.push(*role);
                    }
                }
                if linked.is_empty() {
                    return;
                }
                let uses = key.is_real().then_some(0);
                self.invites.push(InviteRecord {
                    code: key,
                    roles: linked,
                    uses,
                });
            }
        }
    }

    /// Removes the whole record, or only `roles` from it when given.
    pub fn remove_invite(
        &mut self,
        key: &InviteKey,
        roles: Option<&[serenity::RoleId]>,
    ) -> Result<RemovedLink, AutoroleError> {
        let idx = self
            .position(key)
            .ok_or_else(|| AutoroleError::InviteNotFound(key.as_str().to_string()))?;

        let Some(roles) = roles else {
            self.invites.remove(idx);
            return Ok(RemovedLink::Invite);
        };

        let record = &mut self.invites[idx];
        let before = record.roles.len();
        record.roles.retain(|r| !roles.contains(r));
        let removed = before - record.roles.len();

        if record.roles.is_empty() {
            self.invites.remove(idx);
            return Ok(RemovedLink::Invite);
        }

        Ok(RemovedLink::Roles(removed))
    }

    /// Drops a record if present. Returns whether anything was removed.
    pub fn drop_invite(&mut self, key: &InviteKey) -> bool {
        match self.position(key) {
            Some(idx) => {
                self.invites.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Keeps only the roles matching `keep`, deleting the record if none remain.
    pub fn retain_roles(&mut self, key: &InviteKey, keep: impl Fn(&serenity::RoleId) -> bool) {
        if let Some(idx) = self.position(key) {
            self.invites[idx].roles.retain(|r| keep(r));
            if self.invites[idx].roles.is_empty() {
                self.invites.remove(idx);
            }
        }
    }

    pub fn set_uses(&mut self, key: &InviteKey, uses: u64) {
        if !key.is_real() {
            return;
        }
        if let Some(idx) = self.position(key) {
            self.invites[idx].uses = Some(uses);
        }
    }
}

/// Per-guild autorole ledger backed by a [`LedgerStore`].
///
/// Every mutation goes through [`GuildLedger`], which holds the guild's lock
/// for its whole lifetime.
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    locks: GuildLocks,
}

impl Ledger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            locks: GuildLocks::new(),
        }
    }

    /// Current config, or the default one if the guild was never seen.
    pub async fn get(&self, guild_id: serenity::GuildId) -> Result<GuildAutoroleConfig, Error> {
        self.store.load(guild_id).await
    }

    /// Locks the guild and loads its config for a read-modify-write.
    pub async fn begin(&self, guild_id: serenity::GuildId) -> Result<GuildLedger, Error> {
        let guard = self.locks.lock(guild_id).await;
        let config = self.store.load(guild_id).await?;

        Ok(GuildLedger {
            guild_id,
            loaded: config.clone(),
            config,
            store: self.store.clone(),
            _guard: guard,
        })
    }

    pub async fn upsert_invite(
        &self,
        guild_id: serenity::GuildId,
        key: InviteKey,
        roles: &[serenity::RoleId],
        merge: RoleMerge,
    ) -> Result<(), Error> {
        let mut ledger = self.begin(guild_id).await?;
        ledger.config_mut().upsert_invite(key, roles, merge);
        ledger.commit().await
    }

    pub async fn remove_invite(
        &self,
        guild_id: serenity::GuildId,
        key: &InviteKey,
        roles: Option<&[serenity::RoleId]>,
    ) -> Result<RemovedLink, Error> {
        let mut ledger = self.begin(guild_id).await?;
        let removed = ledger.config_mut().remove_invite(key, roles)?;
        ledger.commit().await?;
        Ok(removed)
    }

    pub async fn set_enabled(&self, guild_id: serenity::GuildId, enabled: bool) -> Result<(), Error> {
        let mut ledger = self.begin(guild_id).await?;
        ledger.config_mut().enabled = enabled;
        ledger.commit().await
    }

    pub async fn clear(&self, guild_id: serenity::GuildId) -> Result<(), Error> {
        let _guard = self.locks.lock(guild_id).await;
        self.store.clear(guild_id).await
    }

    pub async fn guild_ids(&self) -> Result<Vec<serenity::GuildId>, Error> {
        self.store.guild_ids().await
    }
}

/// A locked, loaded guild config. Changes are written back by [`GuildLedger::commit`].
pub struct GuildLedger {
    guild_id: serenity::GuildId,
    loaded: GuildAutoroleConfig,
    config: GuildAutoroleConfig,
    store: Arc<dyn LedgerStore>,
    _guard: OwnedMutexGuard<()>,
}

impl GuildLedger {
    pub fn guild_id(&self) -> serenity::GuildId {
        self.guild_id
    }

    pub fn config(&self) -> &GuildAutoroleConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut GuildAutoroleConfig {
        &mut self.config
    }

    /// Persists the fields that changed since the config was loaded, then releases the lock.
    pub async fn commit(self) -> Result<(), Error> {
        if self.config.invites != self.loaded.invites {
            self.store
                .save_invites(self.guild_id, &self.config.invites)
                .await?;
        }
        if self.config.enabled != self.loaded.enabled {
            self.store
                .save_enabled(self.guild_id, self.config.enabled)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::autorole::testing::MemoryStore;

    fn role(id: u64) -> serenity::RoleId {
        serenity::RoleId::new(id)
    }

    fn guild() -> serenity::GuildId {
        serenity::GuildId::new(10)
    }

    #[test]
    fn parses_sentinels_links_and_codes() {
        assert_eq!(InviteKey::parse("main").unwrap(), InviteKey::Main);
        assert_eq!(InviteKey::parse(" Default ").unwrap(), InviteKey::Default);
        assert_eq!(
            InviteKey::parse("https://discord.gg/laggron").unwrap(),
            InviteKey::Real("laggron".into())
        );
        assert_eq!(
            InviteKey::parse("discord.gg/abc/").unwrap(),
            InviteKey::Real("abc".into())
        );
        assert_eq!(InviteKey::parse("xyz").unwrap(), InviteKey::Real("xyz".into()));
        assert!(matches!(
            InviteKey::parse("   "),
            Err(AutoroleError::InviteNotFound(_))
        ));
    }

    #[test]
    fn sentinels_never_carry_uses() {
        let mut config = GuildAutoroleConfig::default();
        config.upsert_invite(InviteKey::Default, &[role(1)], RoleMerge::Extend);
        config.upsert_invite(InviteKey::Real("abc".into()), &[role(2)], RoleMerge::Extend);
        config.set_uses(&InviteKey::Default, 5);

        assert_eq!(config.get(&InviteKey::Default).unwrap().uses, None);
        assert_eq!(config.get(&InviteKey::Real("abc".into())).unwrap().uses, Some(0));
    }

    #[test]
    fn upsert_extends_or_replaces() {
        let key = InviteKey::Real("abc".into());
        let mut config = GuildAutoroleConfig::default();
        config.upsert_invite(key.clone(), &[role(1)], RoleMerge::Extend);
        config.upsert_invite(key.clone(), &[role(2), role(1)], RoleMerge::Extend);
        assert_eq!(config.roles_for(&key), &[role(1), role(2)]);

        config.upsert_invite(key.clone(), &[role(3)], RoleMerge::Replace);
        assert_eq!(config.roles_for(&key), &[role(3)]);

        config.upsert_invite(key.clone(), &[], RoleMerge::Replace);
        assert!(config.get(&key).is_none());
    }

    #[test]
    fn removing_the_last_role_deletes_the_record() {
        let key = InviteKey::Real("abc".into());
        let mut config = GuildAutoroleConfig::default();
        config.upsert_invite(key.clone(), &[role(1), role(2)], RoleMerge::Extend);

        assert_eq!(
            config.remove_invite(&key, Some(&[role(1)][..])).unwrap(),
            RemovedLink::Roles(1)
        );
        assert_eq!(
            config.remove_invite(&key, Some(&[role(2)][..])).unwrap(),
            RemovedLink::Invite
        );
        assert!(config.invites.is_empty());
        assert!(matches!(
            config.remove_invite(&key, None),
            Err(AutoroleError::InviteNotFound(_))
        ));
    }

    #[test]
    fn persisted_layout_uses_plain_codes() {
        let record = InviteRecord {
            code: InviteKey::Main,
            roles: vec![role(7)],
            uses: None,
        };
        let value = serde_json::to_value(vec![record.clone()]).unwrap();
        assert_eq!(value[0]["code"], "main");
        assert_eq!(value[0]["roles"], serde_json::json!([7]));
        assert!(value[0].get("uses").is_none());

        let back: Vec<InviteRecord> = serde_json::from_value(value).unwrap();
        assert_eq!(back, vec![record]);
    }

    #[tokio::test]
    async fn commit_writes_only_changed_fields() {
        let store = Arc::new(MemoryStore::default());
        let ledger = Ledger::new(store.clone());

        ledger.set_enabled(guild(), true).await.unwrap();
        assert_eq!(store.enabled_writes(), 1);
        assert_eq!(store.invite_writes(), 0);

        ledger
            .upsert_invite(guild(), InviteKey::Default, &[role(1)], RoleMerge::Extend)
            .await
            .unwrap();
        assert_eq!(store.enabled_writes(), 1);
        assert_eq!(store.invite_writes(), 1);

        let config = ledger.get(guild()).await.unwrap();
        assert!(config.enabled);
        assert_eq!(config.roles_for(&InviteKey::Default), &[role(1)]);

        // Nothing changed, nothing written.
        ledger.begin(guild()).await.unwrap().commit().await.unwrap();
        assert_eq!(store.invite_writes(), 1);
    }

    #[tokio::test]
    async fn clear_resets_to_default() {
        let store = Arc::new(MemoryStore::default());
        let ledger = Ledger::new(store);
        ledger
            .upsert_invite(guild(), InviteKey::Main, &[role(1)], RoleMerge::Extend)
            .await
            .unwrap();
        ledger.clear(guild()).await.unwrap();

        assert_eq!(ledger.get(guild()).await.unwrap(), GuildAutoroleConfig::default());
        assert!(ledger.guild_ids().await.unwrap().is_empty());
    }
}
