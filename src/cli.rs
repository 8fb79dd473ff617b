use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "clipfetch")]
#[command(author, version, about = "Telegram bot that fetches media from links with yt-dlp", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the bot (default)
    Run {
        /// Use webhook mode instead of long polling (needs WEBHOOK_URL)
        #[arg(long)]
        webhook: bool,
    },

    /// Fetch one link to a local directory, without Telegram
    Download {
        /// Media URL
        url: String,

        /// Extract audio only (mp3)
        #[arg(long)]
        audio: bool,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Show media metadata without downloading
    Info {
        /// Media URL
        url: String,

        /// Print metadata as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_is_no_subcommand() {
        let cli = Cli::try_parse_from(["clipfetch"]).unwrap();
        assert_eq!(cli.command, None);
    }

    #[test]
    fn test_download_args() {
        let cli = Cli::try_parse_from(["clipfetch", "download", "https://youtu.be/x", "--audio", "-o", "/tmp/out"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Commands::Download {
                url: "https://youtu.be/x".to_string(),
                audio: true,
                output: PathBuf::from("/tmp/out"),
            })
        );
    }

    #[test]
    fn test_info_and_run_args() {
        let cli = Cli::try_parse_from(["clipfetch", "info", "https://vimeo.com/1", "--json"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Commands::Info {
                url: "https://vimeo.com/1".to_string(),
                json: true
            })
        );

        let cli = Cli::try_parse_from(["clipfetch", "run", "--webhook"]).unwrap();
        assert_eq!(cli.command, Some(Commands::Run { webhook: true }));
    }
}
