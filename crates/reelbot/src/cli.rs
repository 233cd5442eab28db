use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "reelbot")]
#[command(author, version, about = "Telegram bot that downloads videos in the format you pick", long_about = None)]
pub struct Cli {
    /// Path to a TOML config file (defaults to ./reelbot.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the bot with long polling (default)
    Run,

    /// Print the formats the bot would offer for a URL
    Formats {
        /// Video page URL
        url: String,
    },

    /// Check that yt-dlp, ffmpeg and ffprobe are runnable and print the effective config
    Check,
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
    fn test_no_subcommand_means_run() {
        let cli = Cli::try_parse_from(["reelbot"]).unwrap();
        assert_eq!(cli.command, None);
        assert_eq!(cli.config, None);
    }

    #[test]
    fn test_formats_with_config() {
        let cli = Cli::try_parse_from(["reelbot", "formats", "https://example.com/v", "--config", "bot.toml"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Commands::Formats {
                url: "https://example.com/v".to_string()
            })
        );
        assert_eq!(cli.config, Some(PathBuf::from("bot.toml")));
    }

    #[test]
    fn test_formats_requires_url() {
        assert!(Cli::try_parse_from(["reelbot", "formats"]).is_err());
    }
}
