//! In-memory doubles for the store, the platform and the confirmation prompt.

use crate::modules::autorole::errors::PlatformError;
use crate::modules::autorole::ledger::{GuildAutoroleConfig, InviteRecord};
use crate::modules::autorole::platform::{LiveInvite, Platform, RoleHierarchy};
use crate::modules::autorole::store::LedgerStore;
use crate::services::confirm::{ConfirmPrompt, Confirmation};
use crate::Error;
use dashmap::DashMap;
use poise::serenity_prelude as serenity;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryStore {
    rows: DashMap<u64, GuildAutoroleConfig>,
    invite_writes: AtomicUsize,
    enabled_writes: AtomicUsize,
}

impl MemoryStore {
    pub fn with(guild_id: serenity::GuildId, config: GuildAutoroleConfig) -> Self {
        let store = Self::default();
        store.rows.insert(guild_id.get(), config);
        store
    }

    pub fn invite_writes(&self) -> usize {
        self.invite_writes.load(Ordering::SeqCst)
    }

    pub fn enabled_writes(&self) -> usize {
        self.enabled_writes.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl LedgerStore for MemoryStore {
    async fn load(&self, guild_id: serenity::GuildId) -> Result<GuildAutoroleConfig, Error> {
        Ok(self
            .rows
            .get(&guild_id.get())
            .map(|c| c.clone())
            .unwrap_or_default())
    }

    async fn save_invites(
        &self,
        guild_id: serenity::GuildId,
        invites: &[InviteRecord],
    ) -> Result<(), Error> {
        self.invite_writes.fetch_add(1, Ordering::SeqCst);
        self.rows.entry(guild_id.get()).or_default().invites = invites.to_vec();
        Ok(())
    }

    async fn save_enabled(&self, guild_id: serenity::GuildId, enabled: bool) -> Result<(), Error> {
        self.enabled_writes.fetch_add(1, Ordering::SeqCst);
        self.rows.entry(guild_id.get()).or_default().enabled = enabled;
        Ok(())
    }

    async fn clear(&self, guild_id: serenity::GuildId) -> Result<(), Error> {
        self.rows.remove(&guild_id.get());
        Ok(())
    }

    async fn guild_ids(&self) -> Result<Vec<serenity::GuildId>, Error> {
        let mut ids: Vec<_> = self
            .rows
            .iter()
            .map(|r| serenity::GuildId::new(*r.key()))
            .collect();
        ids.sort();
        Ok(ids)
    }
}

/// Scripted Discord. Every guild shares the same role hierarchy.
pub struct FakePlatform {
    invites: Mutex<HashMap<serenity::GuildId, Vec<LiveInvite>>>,
    invites_denied: Mutex<HashSet<serenity::GuildId>>,
    departed: HashSet<serenity::GuildId>,
    hierarchy: RoleHierarchy,
    grants_denied: bool,
    denied_roles: HashSet<serenity::RoleId>,
    granted: Mutex<Vec<(serenity::UserId, serenity::RoleId, String)>>,
    invite_fetches: AtomicUsize,
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self {
            invites: Mutex::default(),
            invites_denied: Mutex::default(),
            departed: HashSet::new(),
            hierarchy: RoleHierarchy {
                ranks: HashMap::new(),
                bot_top: 10,
                bot_can_manage_roles: true,
            },
            grants_denied: false,
            denied_roles: HashSet::new(),
            granted: Mutex::default(),
            invite_fetches: AtomicUsize::new(0),
        }
    }
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_role(mut self, role_id: u64, rank: u16) -> Self {
        self.hierarchy.ranks.insert(serenity::RoleId::new(role_id), rank);
        self
    }

    pub fn with_bot_top(mut self, rank: u16) -> Self {
        self.hierarchy.bot_top = rank;
        self
    }

    pub fn without_manage_roles(mut self) -> Self {
        self.hierarchy.bot_can_manage_roles = false;
        self
    }

    pub fn with_invite(self, guild_id: serenity::GuildId, code: &str, uses: u64) -> Self {
        self.set_uses(guild_id, code, uses);
        self
    }

    pub fn with_invites_denied(self, guild_id: serenity::GuildId) -> Self {
        self.invites_denied.lock().unwrap().insert(guild_id);
        self
    }

    pub fn with_grants_denied(mut self) -> Self {
        self.grants_denied = true;
        self
    }

    /// Discord refuses this one role, the bot keeps its permissions.
    pub fn with_grant_denied(mut self, role_id: u64) -> Self {
        self.denied_roles.insert(serenity::RoleId::new(role_id));
        self
    }

    pub fn departed_from(mut self, guild_id: serenity::GuildId) -> Self {
        self.departed.insert(guild_id);
        self
    }

    /// Creates or updates a live invite.
    pub fn set_uses(&self, guild_id: serenity::GuildId, code: &str, uses: u64) {
        let mut invites = self.invites.lock().unwrap();
        let list = invites.entry(guild_id).or_default();
        match list.iter_mut().find(|i| i.code == code) {
            Some(invite) => invite.uses = uses,
            None => list.push(LiveInvite {
                code: code.to_string(),
                url: format!("https://discord.gg/{}", code),
                uses,
            }),
        }
    }

    pub fn delete_invite(&self, guild_id: serenity::GuildId, code: &str) {
        if let Some(list) = self.invites.lock().unwrap().get_mut(&guild_id) {
            list.retain(|i| i.code != code);
        }
    }

    pub fn granted_roles(&self) -> Vec<serenity::RoleId> {
        self.granted.lock().unwrap().iter().map(|(_, r, _)| *r).collect()
    }

    pub fn grant_reasons(&self) -> Vec<String> {
        self.granted
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, reason)| reason.clone())
            .collect()
    }

    pub fn invite_fetches(&self) -> usize {
        self.invite_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Platform for FakePlatform {
    async fn fetch_live_invites(
        &self,
        guild_id: serenity::GuildId,
    ) -> Result<Vec<LiveInvite>, PlatformError> {
        self.invite_fetches.fetch_add(1, Ordering::SeqCst);
        if self.invites_denied.lock().unwrap().contains(&guild_id) {
            return Err(PlatformError::PermissionDenied);
        }
        Ok(self
            .invites
            .lock()
            .unwrap()
            .get(&guild_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn role_hierarchy(
        &self,
        _guild_id: serenity::GuildId,
    ) -> Result<RoleHierarchy, PlatformError> {
        Ok(self.hierarchy.clone())
    }

    async fn grant_role(
        &self,
        _guild_id: serenity::GuildId,
        user_id: serenity::UserId,
        role_id: serenity::RoleId,
        reason: &str,
    ) -> Result<(), PlatformError> {
        if self.grants_denied || self.denied_roles.contains(&role_id) {
            return Err(PlatformError::PermissionDenied);
        }
        self.granted
            .lock()
            .unwrap()
            .push((user_id, role_id, reason.to_string()));
        Ok(())
    }

    async fn is_member(&self, guild_id: serenity::GuildId) -> Result<bool, PlatformError> {
        Ok(!self.departed.contains(&guild_id))
    }
}

/// Answers every prompt the same way and remembers what was asked.
pub struct ScriptedAnswer {
    answer: bool,
    prompts: Mutex<Vec<ConfirmPrompt>>,
}

impl ScriptedAnswer {
    pub fn yes() -> Self {
        Self {
            answer: true,
            prompts: Mutex::default(),
        }
    }

    pub fn no() -> Self {
        Self {
            answer: false,
            prompts: Mutex::default(),
        }
    }

    pub fn prompts(&self) -> Vec<ConfirmPrompt> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Confirmation for ScriptedAnswer {
    async fn confirm(&self, prompt: &ConfirmPrompt) -> Result<bool, Error> {
        self.prompts.lock().unwrap().push(prompt.clone());
        Ok(self.answer)
    }
}
