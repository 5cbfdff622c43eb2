//! Command-line surface and how it layers onto the loaded config.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use ecwire_core::Config;
use ecwire_crypto::KeySchedule;

use crate::ca_cmd::CaArgs;

#[derive(Parser, Debug)]
#[command(name = "ecwire")]
#[command(version, about = "Encrypted point-to-point messaging over TCP", long_about = None)]
pub struct Cli {
    /// Config file layered over the global settings
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level for ecwire crates (overridden by RUST_LOG)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Emit JSON log lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept connections and acknowledge every message
    Serve(ChannelArgs),
    /// Connect to a server and send lines typed on stdin
    Connect(ChannelArgs),
    /// Generate a self-signed root CA certificate and key
    Ca(CaArgs),
    /// Print the resolved configuration as JSON
    Config,
}

/// Flags shared by `serve` and `connect`.
#[derive(clap::Args, Debug, Default)]
pub struct ChannelArgs {
    /// Address to listen on or connect to
    #[arg(long)]
    pub addr: Option<String>,

    /// Maximum concurrent sessions (serve only)
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Traffic key derivation; both peers must agree
    #[arg(long, value_enum)]
    pub key_schedule: Option<ScheduleArg>,

    /// Handshake timeout in seconds (0 disables)
    #[arg(long)]
    pub handshake_timeout: Option<u64>,

    /// Persist this side's ephemeral keypair as PEM
    #[arg(long)]
    pub persist_keys: bool,

    /// Write the derived session key to disk (debugging only)
    #[arg(long)]
    pub export_session_key: bool,

    /// Directory for persisted key files
    #[arg(long)]
    pub key_dir: Option<PathBuf>,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleArg {
    Directional,
    Shared,
}

impl From<ScheduleArg> for KeySchedule {
    fn from(arg: ScheduleArg) -> Self {
        match arg {
            ScheduleArg::Directional => Self::Directional,
            ScheduleArg::Shared => Self::Shared,
        }
    }
}

impl Cli {
    /// Apply global flags; they win over every other layer.
    pub fn apply_globals(&self, config: &mut Config) {
        if let Some(level) = &self.log_level {
            config.logging.level.clone_from(level);
        }
        if self.log_json {
            config.logging.json = true;
        }
    }
}

impl ChannelArgs {
    /// Apply per-command flags; they win over every other layer.
    pub fn apply(&self, config: &mut Config) {
        if let Some(addr) = &self.addr {
            config.network.addr.clone_from(addr);
        }
        if let Some(n) = self.max_connections {
            config.network.max_connections = n;
        }
        if let Some(schedule) = self.key_schedule {
            config.channel.key_schedule = schedule.into();
        }
        if let Some(secs) = self.handshake_timeout {
            config.channel.handshake_timeout_secs = secs;
        }
        if self.persist_keys {
            config.keys.persist_keys = true;
        }
        if self.export_session_key {
            config.keys.export_session_key = true;
        }
        if let Some(dir) = &self.key_dir {
            config.keys.dir = Some(dir.clone());
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn serve_flags_override_config() {
        let cli = Cli::try_parse_from([
            "ecwire",
            "serve",
            "--addr",
            "0.0.0.0:6000",
            "--key-schedule",
            "shared",
            "--persist-keys",
            "--log-level",
            "debug",
        ])
        .unwrap();

        let mut config = Config::default();
        cli.apply_globals(&mut config);
        let Command::Serve(args) = &cli.command else {
            panic!("expected serve");
        };
        args.apply(&mut config);

        assert_eq!(config.network.addr, "0.0.0.0:6000");
        assert_eq!(config.channel.key_schedule, KeySchedule::Shared);
        assert!(config.keys.persist_keys);
        assert!(!config.keys.export_session_key);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn absent_flags_leave_config_alone() {
        let cli = Cli::try_parse_from(["ecwire", "connect"]).unwrap();
        let mut config = Config::default();
        cli.apply_globals(&mut config);
        let Command::Connect(args) = &cli.command else {
            panic!("expected connect");
        };
        args.apply(&mut config);
        assert_eq!(config, Config::default());
    }

    #[test]
    fn global_flags_work_after_subcommand() {
        let cli = Cli::try_parse_from(["ecwire", "config", "--config", "/tmp/x.json"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/x.json")));
        assert!(matches!(cli.command, Command::Config));
    }

    #[test]
    fn unknown_schedule_is_rejected() {
        assert!(Cli::try_parse_from(["ecwire", "serve", "--key-schedule", "rotating"]).is_err());
    }

    #[test]
    fn ca_defaults() {
        let cli = Cli::try_parse_from(["ecwire", "ca"]).unwrap();
        let Command::Ca(args) = cli.command else {
            panic!("expected ca");
        };
        assert_eq!(args.days, 365);
        assert_eq!(args.out_dir, PathBuf::from("."));
        assert!(!args.force);
    }
}
