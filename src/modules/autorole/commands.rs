use crate::modules::autorole::ledger::{GuildAutoroleConfig, InviteKey};
use crate::modules::autorole::platform::SerenityPlatform;
use crate::modules::autorole::policy::{self, LinkOutcome, UnlinkOutcome};
use crate::services::confirm::ButtonConfirmation;
use crate::{Context, Error};
use anyhow::Context as _;
use poise::serenity_prelude as serenity;

/// Link roles to invites so new members get them automatically
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "ADMINISTRATOR",
    subcommands("add", "remove", "list", "enable"),
    subcommand_required
)]
pub async fn roleset(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

fn guild_of(ctx: &Context<'_>) -> Result<serenity::GuildId, Error> {
    ctx.guild_id().context("This command only works in a server")
}

fn platform_of(ctx: &Context<'_>) -> SerenityPlatform {
    SerenityPlatform::from_context(ctx.serenity_context())
}

/// Link a role to an invite, or to `main` / `default`
///
/// `main` roles are given when the member joined with an invite that isn't linked.
/// `default` roles are always given.
#[poise::command(slash_command, prefix_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn add(
    ctx: Context<'_>,
    #[description = "Invite link or code, `main` or `default`"] invite: String,
    #[description = "Role to give"] role: serenity::Role,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let key = InviteKey::parse(&invite)?;
    ctx.defer().await?;

    let platform = platform_of(&ctx);
    let confirm = ButtonConfirmation::new(ctx);
    let outcome = policy::link_role(
        &ctx.data().ledger,
        &platform,
        &confirm,
        guild_id,
        key.clone(),
        role.id,
    )
    .await?;

    let reply = match (outcome, &key) {
        (LinkOutcome::Cancelled, _) => return Ok(()),
        (_, InviteKey::Main) => format!(
            "The role `{}` is now linked to the main autorole. New members joining with an unlinked invite will get it.",
            role.name
        ),
        (_, InviteKey::Default) => format!(
            "The role `{}` is now linked to the default autorole. Every new member will get it.",
            role.name
        ),
        (_, InviteKey::Real(code)) => format!(
            "The role `{}` is now linked to the invite `{}`.",
            role.name, code
        ),
    };
    ctx.say(reply).await?;

    if !ctx.data().ledger.get(guild_id).await?.enabled {
        ctx.say("**Info:** autorole is disabled here. Type `/roleset enable` to turn it on.")
            .await?;
    }

    Ok(())
}

/// Unlink a role from an invite, or remove the invite entirely
#[poise::command(slash_command, prefix_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn remove(
    ctx: Context<'_>,
    #[description = "Invite link or code, `main` or `default`"] invite: String,
    #[description = "Role to unlink. Leave empty to remove every role"] role: Option<
        serenity::Role,
    >,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let key = InviteKey::parse(&invite)?;
    ctx.defer().await?;

    let confirm = ButtonConfirmation::new(ctx);
    let outcome = policy::unlink(
        &ctx.data().ledger,
        &confirm,
        guild_id,
        key.clone(),
        role.as_ref().map(|r| r.id),
    )
    .await?;

    match outcome {
        UnlinkOutcome::Cancelled => {}
        UnlinkOutcome::RemovedInvite => {
            ctx.say(format!("Every role is now unlinked from {}.", key)).await?;
        }
        UnlinkOutcome::RemovedRole => {
            let name = role.map(|r| r.name).unwrap_or_default();
            ctx.say(format!("The role `{}` is unlinked from {}.", name, key))
                .await?;
        }
    }

    Ok(())
}

fn render_links(config: &GuildAutoroleConfig) -> String {
    let mut response = String::from("**Invites linked to an autorole on this server:**\n");

    for record in &config.invites {
        let roles = record
            .roles
            .iter()
            .map(|r| format!("<@&{}>", r))
            .collect::<Vec<_>>()
            .join(", ");
        let line = match &record.code {
            InviteKey::Main => format!("**main** (unlinked invites): {}\n", roles),
            InviteKey::Default => format!("**default** (every member): {}\n", roles),
            InviteKey::Real(code) => format!("`{}`: {}\n", code, roles),
        };
        response.push_str(&line);
    }

    if !config.enabled {
        response.push_str(
            "\n**Info:** autorole is currently disabled and won't give roles on member join. \
             Type `/roleset enable` to enable it.",
        );
    }

    response
}

/// List every invite linked to an autorole
#[poise::command(slash_command, prefix_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn list(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    ctx.defer().await?;

    let platform = platform_of(&ctx);
    let (config, report) = policy::list_links(&ctx.data().ledger, &platform, guild_id).await?;

    if let Some(condition) = report.condition {
        ctx.say(condition.to_string()).await?;
    }

    if config.invites.is_empty() {
        ctx.say("There is nothing set up yet. Type `/roleset add` to link a role to an invite.")
            .await?;
        return Ok(());
    }

    ctx.send(
        poise::CreateReply::default()
            .content(render_links(&config))
            .allowed_mentions(serenity::CreateAllowedMentions::new()),
    )
    .await?;

    Ok(())
}

/// Enable or disable autorole on this server
///
/// If it got disabled on its own, the bot lost the `Manage Roles` or the `Manage Server` permission.
#[poise::command(slash_command, prefix_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn enable(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let platform = platform_of(&ctx);

    let enabled = policy::toggle_enabled(&ctx.data().ledger, &platform, guild_id).await?;

    if enabled {
        ctx.say(
            "Autorole is now enabled on this server.\n\
             Type `/roleset list` to see the current links.\n\
             If I lose the `Manage Roles` permission, autorole will be disabled.",
        )
        .await?;
    } else {
        ctx.say(
            "Autorole is now disabled on this server.\n\
             The settings are kept and can still be edited, new members are just ignored.",
        )
        .await?;
    }

    Ok(())
}

pub fn commands() -> Vec<poise::Command<crate::Data, Error>> {
    vec![roleset()]
}
