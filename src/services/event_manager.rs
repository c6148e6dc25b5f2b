use crate::modules::EventHandler;
use crate::{Data, Error};
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use tracing::{error, info};

/// Fans gateway events out to every module's event handlers.
pub struct EventManager {
    handlers: Vec<(&'static str, EventHandler)>,
}

impl EventManager {
    pub fn new() -> Self {
        let handlers = crate::modules::get_modules()
            .into_iter()
            .flat_map(|module| {
                let module_id = module.definition.id;
                info!(
                    "Loaded module {} ({}): {}",
                    module.definition.name, module_id, module.definition.description
                );
                module
                    .event_handlers
                    .into_iter()
                    .map(move |handler| (module_id, handler))
            })
            .collect();

        Self { handlers }
    }

    pub async fn dispatch(
        &self,
        ctx: &serenity::Context,
        event: &serenity::FullEvent,
        data: &Data,
    ) -> Result<(), Error> {
        match event {
            serenity::FullEvent::Ready { data_about_bot, .. } => {
                info!("Logged in as {}", data_about_bot.user.name);
            }
            serenity::FullEvent::GuildCreate { guild, is_new, .. } => {
                if is_new.unwrap_or(false) {
                    info!("Joined new guild: {} ({})", guild.name, guild.id);
                }
            }
            serenity::FullEvent::GuildDelete { incomplete, .. } => {
                info!("Left guild: {}", incomplete.id);
            }
            _ => {}
        }

        // Every handler gets its own task so a slow guild never holds up the gateway.
        let event = Arc::new(event.clone());

        for (module_id, handler) in &self.handlers {
            let ctx = ctx.clone();
            let event = event.clone();
            let data = data.clone();
            let handler = *handler;
            let module_id = *module_id;

            tokio::spawn(async move {
                if let Err(e) = handler(&ctx, event.as_ref(), &data).await {
                    error!("Error in event handler for module {}: {:?}", module_id, e);
                }
            });
        }

        Ok(())
    }
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new()
    }
}
