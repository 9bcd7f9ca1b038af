// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use std::time::Duration;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

#[derive(Parser, Debug)]
#[command(name = "kmux")]
#[command(author, version, about = "Multiplex common kubectl tasks across clusters")]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Kubernetes configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub kubeconfig: Option<String>,

    /// Kubernetes context, repeatable or comma-separated for multiplexing
    #[arg(long, global = true, value_name = "CONTEXT", value_delimiter = ',')]
    pub context: Vec<String>,

    /// Override kubernetes namespace in context
    #[arg(short = 'n', long, global = true)]
    pub namespace: Option<String>,

    /// Find resources in all namespaces
    #[arg(short = 'A', long, global = true)]
    pub all_namespaces: bool,

    /// Enable verbose logging
    #[arg(long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print version
    Version,

    /// Get all image names of containers for a given resource
    Image {
        #[arg(value_name = "TYPE")]
        kind: String,
        name: String,

        /// Filter container's name by regexp, default to all containers
        #[arg(short, long)]
        container: Option<String>,
    },

    /// Get all configured environment variables of containers for a given resource
    Env {
        #[arg(value_name = "TYPE")]
        kind: String,
        name: String,

        /// Filter container's name by regexp, default to all containers
        #[arg(short, long)]
        container: Option<String>,
    },

    /// Get logs of a given resource
    #[command(alias = "logs")]
    Log {
        #[arg(value_name = "TYPE")]
        kind: Option<String>,
        name: Option<String>,

        /// Display logs since given duration
        #[arg(short, long, default_value = "1h", value_parser = humantime::parse_duration)]
        since: Duration,

        /// Filter container's name by regexp, default to all containers
        #[arg(short, long)]
        container: Option<String>,

        /// Dry-run, print only matching pods
        #[arg(short, long)]
        dry_run: bool,

        /// Raw output, don't print context or pod prefixes
        #[arg(short, long)]
        raw_output: bool,

        /// Fetch logs once instead of following streams
        #[arg(long)]
        no_follow: bool,

        /// Labels to filter pods, as key=value pairs
        #[arg(short = 'l', long, value_delimiter = ',', value_name = "KEY=VALUE")]
        selector: Vec<String>,

        /// Regexp to filter log lines, repeatable (a line must match one)
        #[arg(short, long)]
        grep: Vec<String>,

        /// Invert the grep match
        #[arg(short = 'v', long)]
        invert_match: bool,

        /// Get logs only at or below given severity (error, warn, info, debug)
        #[arg(long, value_name = "SEVERITY")]
        grep_color: Option<String>,

        /// Keys probed for a level in JSON log lines
        #[arg(long, value_delimiter = ',', value_name = "KEY")]
        level_keys: Vec<String>,

        /// Keys probed for an HTTP status code in JSON log lines
        #[arg(long, value_delimiter = ',', value_name = "KEY")]
        status_code_keys: Vec<String>,
    },

    /// Port forward to pods of a resource through one local port
    #[command(name = "port-forward", alias = "forward")]
    PortForward {
        #[arg(value_name = "TYPE")]
        kind: String,
        name: String,

        /// Local port, optionally with a remote port or port name
        #[arg(value_name = "LOCAL[:REMOTE]")]
        ports: String,

        /// Dry-run, print the forwards without opening them
        #[arg(short, long)]
        dry_run: bool,

        /// Maximum simultaneous pod forwards, 0 for unlimited
        #[arg(short, long, default_value_t = 0)]
        limit: usize,
    },

    /// Restart the given resource
    Restart {
        #[arg(value_name = "TYPE")]
        kind: String,
        name: String,

        /// User recorded in the restartedBy annotation
        #[arg(short, long, env = "KMUX_USER")]
        user: Option<String>,
    },

    /// Scale a resource by a given factor
    Scale {
        #[arg(value_name = "TYPE")]
        kind: String,
        name: String,

        /// Scale factor, e.g. 2 to double, 0.5 to halve, 0 to stop
        #[arg(long)]
        factor: f64,

        /// Confirm scaling down to zero pods
        #[arg(long)]
        force: bool,
    },

    /// Watch all pods in the namespace
    Watch {
        /// Output format. One of: (wide)
        #[arg(short, long)]
        output: Option<String>,

        /// Labels to filter pods, as key=value pairs
        #[arg(short = 'l', long, value_delimiter = ',', value_name = "KEY=VALUE")]
        selector: Vec<String>,

        /// Label names rendered as extra columns
        #[arg(short = 'L', long, value_delimiter = ',', value_name = "LABEL")]
        label_columns: Vec<String>,

        /// Render a column with every pod label
        #[arg(long)]
        show_labels: bool,

        /// Render a column with every pod annotation
        #[arg(long)]
        show_annotations: bool,
    },

    /// Generate a shell completion script
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },

    /// List object names present in every configured cluster
    #[command(name = "complete-objects", hide = true)]
    CompleteObjects {
        #[arg(value_name = "TYPE")]
        kind: String,
    },
}
