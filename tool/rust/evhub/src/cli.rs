use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use evhub_ingest::StartingPosition;

#[derive(Parser, Debug)]
#[command(name = "evhub", version, about = "Event stream send / receive / explore tool")]
pub struct Cli {
    /// Config file path
    #[arg(short, long, global = true, env = "CONFIG_PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send a fixed number of synthetic events
    Send {
        /// Number of events to send
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,

        /// Delay between events in seconds
        #[arg(short, long, default_value = "1", value_parser = parse_secs)]
        delay: Duration,
    },
    /// Send synthetic events until interrupted
    Stream {
        /// Interval between events in seconds
        #[arg(short, long, default_value = "5", value_parser = parse_secs)]
        interval: Duration,
    },
    /// Receive and print events
    Receive {
        /// Stop after this many seconds (runs until interrupted if omitted)
        #[arg(short, long, value_parser = parse_secs)]
        duration: Option<Duration>,

        /// Where to start reading (latest, earliest, checkpoint)
        #[arg(long, default_value = "latest", value_parser = parse_position)]
        from: StartingPosition,

        /// Interval of the loopback feeder in seconds (0 disables it)
        #[arg(long, value_parser = parse_secs)]
        feed_interval: Option<Duration>,
    },
    /// Collect events, print a summary and export them to JSON
    Explore {
        /// Collection time in seconds
        #[arg(short, long, value_parser = parse_secs)]
        duration: Option<Duration>,

        /// Number of recent events to show
        #[arg(short, long)]
        recent: Option<usize>,

        /// Export file path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Where to start reading (latest, earliest, checkpoint)
        #[arg(long, default_value = "latest", value_parser = parse_position)]
        from: StartingPosition,

        /// Interval of the loopback feeder in seconds (0 disables it)
        #[arg(long, value_parser = parse_secs)]
        feed_interval: Option<Duration>,
    },
    /// Send the demo events and read them back
    Demo {
        /// Receive time in seconds
        #[arg(short, long, default_value = "10", value_parser = parse_secs)]
        duration: Duration,
    },
}

/// 秒数（小数可）を Duration に変換する。
pub fn parse_secs(value: &str) -> Result<Duration, String> {
    let secs: f64 = value
        .parse()
        .map_err(|_| format!("'{value}' is not a number of seconds"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("invalid duration '{value}': {e}"))
}

pub fn parse_position(value: &str) -> Result<StartingPosition, String> {
    match value.to_ascii_lowercase().as_str() {
        "latest" => Ok(StartingPosition::Latest),
        "earliest" => Ok(StartingPosition::Earliest),
        "checkpoint" => Ok(StartingPosition::Checkpoint),
        other => Err(format!(
            "unknown position '{other}' (expected latest, earliest or checkpoint)"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send() {
        let cli = Cli::try_parse_from(["evhub", "send", "-n", "3", "--delay", "0.5"]).unwrap();
        match cli.command {
            Commands::Send { count, delay } => {
                assert_eq!(count, 3);
                assert_eq!(delay, Duration::from_millis(500));
            }
            _ => panic!("Expected send subcommand"),
        }
    }

    #[test]
    fn test_parse_send_defaults() {
        let cli = Cli::try_parse_from(["evhub", "send"]).unwrap();
        match cli.command {
            Commands::Send { count, delay } => {
                assert_eq!(count, 10);
                assert_eq!(delay, Duration::from_secs(1));
            }
            _ => panic!("Expected send subcommand"),
        }
    }

    #[test]
    fn test_parse_explore_with_global_config() {
        let cli = Cli::try_parse_from([
            "evhub", "explore", "--duration", "30", "--recent", "5", "--output", "out.json",
            "--from", "earliest", "--config", "custom.yaml",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("custom.yaml")));
        match cli.command {
            Commands::Explore {
                duration,
                recent,
                output,
                from,
                feed_interval,
            } => {
                assert_eq!(duration, Some(Duration::from_secs(30)));
                assert_eq!(recent, Some(5));
                assert_eq!(output, Some(PathBuf::from("out.json")));
                assert_eq!(from, StartingPosition::Earliest);
                assert!(feed_interval.is_none());
            }
            _ => panic!("Expected explore subcommand"),
        }
    }

    #[test]
    fn test_parse_receive_without_duration() {
        let cli = Cli::try_parse_from(["evhub", "receive"]).unwrap();
        match cli.command {
            Commands::Receive { duration, from, .. } => {
                assert!(duration.is_none());
                assert_eq!(from, StartingPosition::Latest);
            }
            _ => panic!("Expected receive subcommand"),
        }
    }

    #[test]
    fn test_parse_demo_and_stream() {
        let cli = Cli::try_parse_from(["evhub", "demo"]).unwrap();
        assert!(matches!(cli.command, Commands::Demo { duration } if duration == Duration::from_secs(10)));

        let cli = Cli::try_parse_from(["evhub", "stream", "-i", "2"]).unwrap();
        assert!(matches!(cli.command, Commands::Stream { interval } if interval == Duration::from_secs(2)));
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(Cli::try_parse_from(["evhub", "send", "--delay", "-1"]).is_err());
        assert!(Cli::try_parse_from(["evhub", "send", "--delay", "soon"]).is_err());
        assert!(Cli::try_parse_from(["evhub", "receive", "--from", "middle"]).is_err());
        assert!(Cli::try_parse_from(["evhub"]).is_err());
    }

    #[test]
    fn test_parse_secs() {
        assert_eq!(parse_secs("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_secs("2.5").unwrap(), Duration::from_millis(2500));
        assert!(parse_secs("NaN").is_err());
    }
}
