//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// hr - hub-and-spoke RPC, events and replicated values
#[derive(Parser)]
#[command(
    name = "hr",
    about = "Correlated calls, events and replicated values through a Unix-socket hub",
    version,
    after_help = "Logs are appended to: ~/.local/share/hubrpc/logs/hubrpc.log (shared by the hub and peers)"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Override the hub socket path
    #[arg(long, global = true, value_name = "PATH")]
    pub socket: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the coordinator on the hub socket until Ctrl-C
    Hub {
        /// Host a replicated value so peers can fetch it (repeatable)
        #[arg(long = "value", value_name = "NAME")]
        values: Vec<String>,
    },

    /// Make one call and print the result
    Call {
        /// Call name
        name: String,

        /// JSON payload
        #[arg(short, long)]
        data: Option<String>,

        /// Per-attempt timeout in milliseconds
        #[arg(short, long)]
        timeout_ms: Option<u64>,

        /// Re-sends after the first attempt
        #[arg(short, long)]
        retries: Option<u32>,
    },

    /// Broadcast one event
    Emit {
        /// Event name
        name: String,

        /// JSON payload
        #[arg(short, long)]
        data: Option<String>,
    },

    /// Print every event with this name until Ctrl-C
    Listen {
        /// Event name
        name: String,
    },

    /// Operate on a replicated value
    Value {
        #[command(subcommand)]
        command: ValueCommand,
    },
}

/// Replicated value subcommands
#[derive(Debug, Subcommand)]
pub enum ValueCommand {
    /// Fetch and print the current value
    Get {
        /// Value name
        name: String,
    },

    /// Replace the value everywhere
    Set {
        /// Value name
        name: String,

        /// New value as JSON
        value: String,
    },

    /// Print the value and every change until Ctrl-C
    Watch {
        /// Value name
        name: String,
    },
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hubrpc")
        .join("logs")
        .join("hubrpc.log")
}

/// Open the shared log file for appending
///
/// The hub and every short-lived peer write to the same file, so it is never
/// truncated on open.
pub fn open_log_file(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_call_with_options() {
        let cli = Cli::try_parse_from([
            "hr",
            "--socket",
            "/tmp/h.sock",
            "call",
            "lookup",
            "--data",
            r#"{"k":1}"#,
            "--timeout-ms",
            "500",
            "--retries",
            "2",
        ])
        .unwrap();

        assert_eq!(cli.socket, Some(PathBuf::from("/tmp/h.sock")));
        match cli.command {
            Command::Call {
                name,
                data,
                timeout_ms,
                retries,
            } => {
                assert_eq!(name, "lookup");
                assert_eq!(data.as_deref(), Some(r#"{"k":1}"#));
                assert_eq!(timeout_ms, Some(500));
                assert_eq!(retries, Some(2));
            }
            other => panic!("Wrong command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_value_set() {
        let cli = Cli::try_parse_from(["hr", "-v", "value", "set", "volume", "11"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            Command::Value {
                command: ValueCommand::Set { ref name, ref value }
            } if name == "volume" && value == "11"
        ));
    }

    #[test]
    fn test_parse_hub_values() {
        let cli = Cli::try_parse_from(["hr", "hub", "--value", "volume", "--value", "mode"]).unwrap();
        match cli.command {
            Command::Hub { values } => assert_eq!(values, vec!["volume", "mode"]),
            other => panic!("Wrong command: {:?}", other),
        }
    }

    #[test]
    fn test_log_path() {
        assert!(get_log_path().ends_with("hubrpc/logs/hubrpc.log"));
    }

    #[test]
    fn test_open_log_file_appends() {
        use std::io::Write;

        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("hubrpc.log");

        let mut hub_log = open_log_file(&path).unwrap();
        writeln!(hub_log, "hub started").unwrap();

        // a second process opening the file must not wipe the first one's lines
        let mut peer_log = open_log_file(&path).unwrap();
        writeln!(peer_log, "peer called").unwrap();
        writeln!(hub_log, "hub still running").unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "hub started\npeer called\nhub still running\n");
    }
}
