//! Bot initialization and command definitions

use reqwest::ClientBuilder;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

use crate::core::config;

/// Bot commands enum with descriptions
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Commands:")]
pub enum Command {
    #[command(description = "welcome message")]
    Start,
    #[command(description = "how to use the bot")]
    Help,
    #[command(description = "fetch only the audio of a link")]
    Audio(String),
    #[command(description = "fetch the video of a link")]
    Video(String),
    #[command(description = "bot statistics")]
    Stats,
}

/// Creates a Bot instance with a long-timeout HTTP client.
///
/// Uploads of large files take a while, the default reqwest timeout is too short.
pub fn create_bot(token: &str) -> anyhow::Result<Bot> {
    let client = ClientBuilder::new().timeout(config::network::timeout()).build()?;
    Ok(Bot::with_client(token, client))
}

/// Sets up bot commands in Telegram UI
pub async fn setup_bot_commands(bot: &Bot) -> Result<(), teloxide::RequestError> {
    bot.set_my_commands(Command::bot_commands()).await?;
    Ok(())
}
