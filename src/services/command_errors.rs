use crate::modules::autorole::errors::AutoroleError;
use crate::{Data, Error};
use tracing::error;

/// Framework error hook.
///
/// Autorole conditions are explained to the admin. Anything else is logged with
/// the guild's config and answered with a generic message.
pub async fn on_error(error: poise::FrameworkError<'_, Data, Error>) {
    match error {
        poise::FrameworkError::Command { error, ctx, .. } => {
            let reply = match error.downcast_ref::<AutoroleError>() {
                Some(condition) => condition.to_string(),
                None => {
                    let snapshot = match ctx.guild_id() {
                        Some(guild_id) => ctx.data().ledger.get(guild_id).await.ok(),
                        None => None,
                    };
                    error!(
                        "Command `{}` failed in guild {:?}: {:?} (config: {:?})",
                        ctx.command().qualified_name,
                        ctx.guild_id(),
                        error,
                        snapshot
                    );
                    "Something went wrong while running this command.".to_string()
                }
            };

            if let Err(e) = ctx.say(reply).await {
                error!("Failed to report command error: {:?}", e);
            }
        }
        other => {
            if let Err(e) = poise::builtins::on_error(other).await {
                error!("Error while handling error: {:?}", e);
            }
        }
    }
}
