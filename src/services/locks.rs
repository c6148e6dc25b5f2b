use dashmap::DashMap;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per guild, created on first use.
#[derive(Default)]
pub struct GuildLocks {
    // Map: GuildID -> lock
    locks: DashMap<u64, Arc<Mutex<()>>>,
}

impl GuildLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to the guild. Other guilds are never blocked.
    pub async fn lock(&self, guild_id: serenity::GuildId) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(guild_id.get()).or_default().clone();
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_guild_waits_other_guild_does_not() {
        let locks = Arc::new(GuildLocks::new());
        let a = serenity::GuildId::new(1);
        let b = serenity::GuildId::new(2);

        let held = locks.lock(a).await;

        let other = tokio::time::timeout(Duration::from_millis(50), locks.lock(b)).await;
        assert!(other.is_ok());

        let same = tokio::time::timeout(Duration::from_millis(50), locks.lock(a)).await;
        assert!(same.is_err());

        drop(held);
        let same = tokio::time::timeout(Duration::from_millis(50), locks.lock(a)).await;
        assert!(same.is_ok());
    }
}
