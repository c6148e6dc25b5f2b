use crate::modules::autorole::lifecycle;
use crate::modules::autorole::platform::SerenityPlatform;
use crate::modules::autorole::reconcile::{self, Attribution};
use crate::{Data, Error};
use poise::serenity_prelude as serenity;
use std::sync::atomic::Ordering;
use tracing::{debug, error, info, warn};

pub fn handler<'a>(
    ctx: &'a serenity::Context,
    event: &'a serenity::FullEvent,
    data: &'a Data,
) -> poise::BoxFuture<'a, Result<(), Error>> {
    Box::pin(async move { handle_event(ctx, event, data).await })
}

async fn handle_event(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    data: &Data,
) -> Result<(), Error> {
    match event {
        serenity::FullEvent::Ready { data_about_bot, .. } => {
            // Ready fires again on every reconnect and for every shard.
            if data.sweep_started.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
            let platform = SerenityPlatform::new(ctx.http.clone(), data_about_bot.user.id);
            handle_startup(&platform, data).await?;
        }
        serenity::FullEvent::GuildMemberAddition { new_member, .. } => {
            handle_member_join(ctx, new_member, data).await?;
        }
        _ => {}
    }

    Ok(())
}

async fn handle_startup(platform: &SerenityPlatform, data: &Data) -> Result<(), Error> {
    let report = lifecycle::sweep(&data.ledger, platform).await?;
    info!(
        "Autorole sweep done: {} reconciled, {} cleared, {} disabled, {} failed",
        report.reconciled.len(),
        report.cleared.len(),
        report.disabled.len(),
        report.failed.len()
    );
    Ok(())
}

async fn handle_member_join(
    ctx: &serenity::Context,
    member: &serenity::Member,
    data: &Data,
) -> Result<(), Error> {
    let guild_id = member.guild_id;
    let platform = SerenityPlatform::from_context(ctx);

    let outcome =
        match reconcile::handle_member_join(&data.ledger, &platform, guild_id, member.user.id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let snapshot = data.ledger.get(guild_id).await.ok();
                error!(
                    "Autorole failed for member {} in guild {}: {:?} (config: {:?})",
                    member.user.id, guild_id, e, snapshot
                );
                return Ok(());
            }
        };

    for condition in &outcome.conditions {
        warn!("Guild {}: {}", guild_id, condition);
    }

    match outcome.attribution {
        Some(Attribution::Invite(code)) => debug!(
            "Member {} joined guild {} with {}, granted {:?}",
            member.user.id, guild_id, code, outcome.granted
        ),
        Some(Attribution::Main) => debug!(
            "Member {} joined guild {} with an untracked invite, granted {:?}",
            member.user.id, guild_id, outcome.granted
        ),
        None => {}
    }

    Ok(())
}
