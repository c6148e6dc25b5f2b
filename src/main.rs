use anyhow::Context as _;
use clap::Parser as _;
use dotenvy::dotenv;
use poise::serenity_prelude as serenity;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod db;
mod modules;
mod services;

#[derive(clap::Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Publish commands. If no guild ID is provided, publish globally.
    #[arg(long, num_args = 0..)]
    publish: Option<Vec<u64>>,

    /// Clear all commands instead of publishing them.
    #[arg(long)]
    clear: bool,

    /// Rollback the specified number of migrations and run all migrations again.
    #[arg(long, num_args = 0..=1, default_missing_value = "1")]
    refresh_migrations: Option<u32>,
}

// Custom user data passed to all command functions and event handlers
#[derive(Clone)]
pub struct Data {
    pub ledger: Arc<modules::autorole::ledger::Ledger>,
    pub events: Arc<services::event_manager::EventManager>,
    /// Set by the first Ready event, the startup sweep runs once per process.
    pub sweep_started: Arc<AtomicBool>,
}

pub type Error = anyhow::Error;
pub type Context<'a> = poise::Context<'a, Data, Error>;

async fn publish_commands(
    token: &str,
    guild_ids: Vec<u64>,
    clear: bool,
    commands: &[poise::Command<Data, Error>],
) -> Result<(), Error> {
    let http = serenity::HttpBuilder::new(token).build();
    let application_id = http
        .get_current_application_info()
        .await
        .context("Failed to fetch application info")?
        .id;

    info!("Fetched Application ID: {}", application_id);

    let http = serenity::HttpBuilder::new(token)
        .application_id(application_id)
        .build();

    let empty_commands = vec![];
    let commands = if clear { &empty_commands[..] } else { commands };

    if guild_ids.is_empty() {
        if clear {
            info!("Clearing commands globally...");
        } else {
            info!("Registering commands globally...");
        }

        if let Err(e) = poise::builtins::register_globally(&http, commands).await {
            error!("Failed to register commands globally: {}", e);
        } else {
            info!("Global command operation successful");
        }
        return Ok(());
    }

    for guild_id in guild_ids {
        if clear {
            info!("Clearing commands in guild {}...", guild_id);
        } else {
            info!("Registering commands in guild {}...", guild_id);
        }

        if let Err(e) =
            poise::builtins::register_in_guild(&http, commands, serenity::GuildId::new(guild_id))
                .await
        {
            error!("Failed to register commands in guild {}: {}", guild_id, e);
        } else {
            info!("Guild command operation successful for guild {}", guild_id);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging, RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting invite autorole bot...");

    let database_url = std::env::var("DATABASE_URL").context("missing DATABASE_URL")?;
    let db = db::establish_connection(&database_url)
        .await
        .context("Failed to connect to database")?;

    // Run migrations
    use sea_orm_migration::MigratorTrait;
    if let Some(depth) = args.refresh_migrations {
        info!("Refreshing migrations (down {}, then up)...", depth);
        db::migrations::Migrator::down(&db, Some(depth))
            .await
            .context("Failed to rollback migration")?;
    }

    db::migrations::Migrator::up(&db, None)
        .await
        .context("Failed to run migrations")?;

    if args.refresh_migrations.is_some() {
        info!("Migrations refreshed successfully.");
        return Ok(());
    }

    let token = std::env::var("DISCORD_TOKEN").context("missing DISCORD_TOKEN")?;
    let prefix = std::env::var("BOT_PREFIX").unwrap_or_else(|_| "!".to_string());

    let commands = modules::commands();

    // Handle command registration if requested
    if let Some(guild_ids) = args.publish {
        return publish_commands(&token, guild_ids, args.clear, &commands).await;
    }

    let store = modules::autorole::store::DbLedgerStore::new(db);
    let data = Data {
        ledger: Arc::new(modules::autorole::ledger::Ledger::new(Arc::new(store))),
        events: Arc::new(services::event_manager::EventManager::new()),
        sweep_started: Arc::new(AtomicBool::new(false)),
    };

    let framework_options = poise::FrameworkOptions {
        commands,
        prefix_options: poise::PrefixFrameworkOptions {
            prefix: Some(prefix),
            ..Default::default()
        },
        on_error: |error| Box::pin(services::command_errors::on_error(error)),
        event_handler: |ctx, event, _framework, data| {
            Box::pin(data.events.dispatch(ctx, event, data))
        },
        ..Default::default()
    };

    let framework = poise::Framework::builder()
        .options(framework_options)
        .setup(move |_ctx, ready, _framework| {
            Box::pin(async move {
                info!("Serving {} guilds", ready.guilds.len());
                Ok(data)
            })
        })
        .build();

    // Member joins need the privileged GUILD_MEMBERS intent, prefix commands need MESSAGE_CONTENT.
    let intents = serenity::GatewayIntents::non_privileged()
        | serenity::GatewayIntents::GUILD_MEMBERS
        | serenity::GatewayIntents::MESSAGE_CONTENT;

    let mut client = serenity::ClientBuilder::new(&token, intents)
        .framework(framework)
        .await
        .context("Failed to create client")?;

    info!("Bot is ready!");
    client.start_autosharded().await.context("Client error")?;

    Ok(())
}
