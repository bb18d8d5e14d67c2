use clap::{Parser, Subcommand};

use mb_core::models::{Condition, RuleKind};

#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "multibase", version)]
#[command(about = "Manage a fleet of self-hosted Supabase instances", long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Log at debug level
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// List all instances
    #[command(alias = "ls")]
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Create a new instance
    Create {
        /// Instance name (lowercase letters, digits and dashes)
        name: String,

        /// First port to try when allocating service ports
        #[arg(long)]
        base_port: Option<u16>,
    },

    /// Start an instance
    Start { name: String },

    /// Stop an instance
    Stop {
        name: String,

        /// Also remove the data volumes
        #[arg(long)]
        remove_volumes: bool,
    },

    /// Restart an instance
    Restart { name: String },

    /// Restart one service of an instance
    RestartService {
        name: String,

        /// Service name (e.g. "auth", "rest")
        service: String,
    },

    /// Delete an instance and its files
    #[command(alias = "rm")]
    Delete {
        name: String,

        /// Also remove the data volumes
        #[arg(long)]
        remove_volumes: bool,
    },

    /// Stop an instance, wipe its data and start it again
    Reset { name: String },

    /// Show instance details
    Status {
        name: String,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Show service health
    Health {
        name: String,

        /// Query the runtime instead of using the cached report
        #[arg(long)]
        refresh: bool,
    },

    /// Generate a new JWT secret and API keys
    RotateKeys { name: String },

    /// Change the Studio dashboard credentials
    SetDashboard {
        name: String,

        #[arg(long)]
        username: Option<String>,

        #[arg(long)]
        password: Option<String>,
    },

    /// Check an instance's configuration for insecure settings
    SecurityAudit {
        name: String,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Fix what the security audit reports
    Harden { name: String },

    /// List alert rules
    Rules {
        /// Only rules for this instance
        instance: Option<String>,
    },

    /// Add an alert rule
    AddRule {
        instance: String,

        /// high-cpu, high-memory, high-disk, service-down or slow-response
        kind: RuleKind,

        #[arg(allow_negative_numbers = true)]
        threshold: f64,

        /// Seconds the condition must hold before the alert fires
        #[arg(long = "duration", default_value_t = 0)]
        duration_secs: u64,

        /// Rule name, defaults to the kind
        #[arg(long)]
        name: Option<String>,

        /// One of >, >=, <, <=, ==
        #[arg(long, default_value = ">")]
        condition: Condition,
    },

    /// Enable an alert rule
    EnableRule { id: String },

    /// Disable an alert rule, keeping its open alerts
    DisableRule { id: String },

    /// Delete an alert rule, keeping its alert history
    DeleteRule { id: String },

    /// List alerts, newest first
    Alerts {
        /// Only alerts for this instance
        instance: Option<String>,
    },

    /// Acknowledge an active alert
    Ack { id: String },

    /// Resolve an open alert
    Resolve { id: String },

    /// Count alerts by status
    AlertStats {
        /// Only alerts for this instance
        instance: Option<String>,
    },

    /// Sample metrics and evaluate alert rules until interrupted
    Monitor,
}

impl Command {
    /// Long-running commands log at info instead of warn.
    pub fn is_long_running(&self) -> bool {
        matches!(self, Command::Monitor)
    }
}
