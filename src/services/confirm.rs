use crate::modules::autorole::ledger::InviteKey;
use crate::{Context, Error};
use poise::serenity_prelude as serenity;
use std::fmt;
use std::time::Duration;

/// How long an admin has to answer a prompt.
pub const CONFIRM_TIMEOUT: Duration = Duration::from_secs(120);

/// A yes/no question put to the admin before a destructive or widening change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmPrompt {
    AppendRole {
        key: InviteKey,
        existing: Vec<serenity::RoleId>,
        role_id: serenity::RoleId,
    },
    RemoveInvite {
        key: InviteKey,
        roles: Vec<serenity::RoleId>,
    },
    UnlinkRole {
        key: InviteKey,
        role_id: serenity::RoleId,
    },
}

fn mentions(roles: &[serenity::RoleId]) -> String {
    roles
        .iter()
        .map(|r| format!("<@&{}>", r))
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for ConfirmPrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfirmPrompt::AppendRole {
                key,
                existing,
                role_id,
            } => write!(
                f,
                "**WARNING**: {} is already linked to {}.\nIf you continue, new members will get all {} roles, including <@&{}>. Proceed?",
                key,
                mentions(existing),
                existing.len() + 1,
                role_id
            ),
            ConfirmPrompt::RemoveInvite { key, roles } => write!(
                f,
                "You're about to remove all roles linked to {}: {}. Proceed?",
                key,
                mentions(roles)
            ),
            ConfirmPrompt::UnlinkRole { key, role_id } => write!(
                f,
                "You're about to unlink <@&{}> from {}. Proceed?",
                role_id, key
            ),
        }
    }
}

/// Asks the admin to confirm an action. `Ok(false)` means declined or timed out.
#[async_trait::async_trait]
pub trait Confirmation: Send + Sync {
    async fn confirm(&self, prompt: &ConfirmPrompt) -> Result<bool, Error>;
}

/// Yes/No buttons answered by the invoking admin in the invoking channel.
pub struct ButtonConfirmation<'a> {
    ctx: Context<'a>,
}

impl<'a> ButtonConfirmation<'a> {
    pub fn new(ctx: Context<'a>) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Confirmation for ButtonConfirmation<'_> {
    async fn confirm(&self, prompt: &ConfirmPrompt) -> Result<bool, Error> {
        let ctx = self.ctx;
        let yes_id = format!("confirm-{}-yes", ctx.id());
        let no_id = format!("confirm-{}-no", ctx.id());

        let buttons = serenity::CreateActionRow::Buttons(vec![
            serenity::CreateButton::new(yes_id.clone())
                .label("Yes")
                .style(serenity::ButtonStyle::Danger),
            serenity::CreateButton::new(no_id.clone())
                .label("No")
                .style(serenity::ButtonStyle::Secondary),
        ]);

        let reply = ctx
            .send(
                poise::CreateReply::default()
                    .content(prompt.to_string())
                    .components(vec![buttons]),
            )
            .await?;

        let (filter_yes, filter_no) = (yes_id.clone(), no_id);
        let press = serenity::ComponentInteractionCollector::new(ctx.serenity_context())
            .author_id(ctx.author().id)
            .channel_id(ctx.channel_id())
            .timeout(CONFIRM_TIMEOUT)
            .filter(move |mci| mci.data.custom_id == filter_yes || mci.data.custom_id == filter_no)
            .await;

        let Some(press) = press else {
            reply
                .edit(
                    ctx,
                    poise::CreateReply::default()
                        .content("Request timed out.")
                        .components(vec![]),
                )
                .await?;
            return Ok(false);
        };

        let accepted = press.data.custom_id == yes_id;
        press
            .create_response(
                ctx.serenity_context(),
                serenity::CreateInteractionResponse::UpdateMessage(
                    serenity::CreateInteractionResponseMessage::new()
                        .content(if accepted { prompt.to_string() } else { "Aborting...".to_string() })
                        .components(vec![]),
                ),
            )
            .await?;

        Ok(accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompts_mention_every_role() {
        let prompt = ConfirmPrompt::AppendRole {
            key: InviteKey::Real("xyz".into()),
            existing: vec![serenity::RoleId::new(4)],
            role_id: serenity::RoleId::new(3),
        };
        let text = prompt.to_string();
        assert!(text.contains("<@&4>"));
        assert!(text.contains("<@&3>"));
        assert!(text.contains("all 2 roles"));
    }
}
