use anyhow::Result;
use log::{error, info, warn};
use std::process;
use std::sync::Arc;
use tokio::time::{interval, Duration};

use guardbot::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables and initialize logging
    dotenv::dotenv().ok();
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    info!("Starting guardbot v{}", guardbot::VERSION);

    // Missing credentials are fatal; there is nothing to retry
    let discord_config = match DiscordConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            process::exit(1);
        }
    };

    let settings = BotSettings::from_env();
    let defaults = Defaults::from_env();
    let patterns = PatternLibrary::new(defaults.ban_words.as_slice())?;
    info!(
        "Default word combo {:?} within {}s, {} banned word patterns",
        defaults.words,
        defaults.window,
        patterns.banned_patterns().len()
    );

    let config_store = Arc::new(ConfigStore::load(&settings.config_path, defaults).await);
    let lyrics_provider = Arc::new(LrcLibClient::new(&settings.lyrics_user_agent)?);

    let mut bot = ChatBot::new(&settings, Arc::clone(&config_store), patterns, lyrics_provider);

    let discord = DiscordConnection::new(discord_config);
    let actions = discord.actions();
    bot.add_connection(Box::new(discord), actions).await;

    if let Err(e) = bot.start().await {
        error!("Failed to start bot: {:#}", e);
        return Err(e);
    }

    let mut health_interval = interval(Duration::from_secs(60));
    health_interval.tick().await;

    loop {
        tokio::select! {
            _ = health_interval.tick() => {
                let health = bot.health_check().await;
                if health.values().any(|healthy| !healthy) {
                    let restored = bot.reconnect_unhealthy().await;
                    if restored == 0 {
                        warn!("No dropped connection could be restored");
                    }
                }
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for shutdown signal: {}", e);
                }
                info!("Shutdown requested, exiting main loop");
                break;
            }
        }
    }

    bot.shutdown().await?;
    Ok(())
}
