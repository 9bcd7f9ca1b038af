// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

mod cli;
mod commands;
mod config;
mod forward;
mod kubernetes;
mod logs;
mod output;
mod tcpool;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use cli::{Args, Command};
use commands::logs::LogFlags;
use commands::watch::WatchFlags;
use kubernetes::ClientSet;
use output::{Printer, RED};

#[tokio::main]
async fn main() -> ExitCode {
    // Install rustls crypto provider (aws-lc-rs)
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("kmux=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kmux=warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Commands that never talk to a cluster skip client construction.
    match &args.command {
        Some(Command::Version) => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            return ExitCode::SUCCESS;
        }
        Some(Command::Completion { shell }) => {
            commands::completion::shell(*shell);
            return ExitCode::SUCCESS;
        }
        _ => {}
    }

    let token = CancellationToken::new();
    spawn_signal_handler(token.clone());

    let printer = Printer::start();

    let code = match run(args, &printer, &token).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", RED.apply_to(format!("{err:#}")));
            ExitCode::FAILURE
        }
    };

    printer.close().await;

    code
}

/// SIGINT/SIGTERM cancel the root token; every in-flight task derives
/// from it.
fn spawn_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(_) => return,
            };

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }

        token.cancel();
    });
}

async fn run(args: Args, printer: &Printer, token: &CancellationToken) -> Result<()> {
    let clients = ClientSet::connect(
        args.kubeconfig.as_deref(),
        &args.context,
        args.namespace.as_deref(),
        args.all_namespaces,
        printer,
    )
    .await?;

    match args.command {
        None => commands::cluster_info(&clients).await,

        Some(Command::Image {
            kind,
            name,
            container,
        }) => {
            commands::image::run(
                &clients,
                kind.parse()?,
                name,
                container.as_deref().map(regex::Regex::new).transpose()?,
            )
            .await
        }

        Some(Command::Env {
            kind,
            name,
            container,
        }) => {
            commands::env::run(
                &clients,
                kind.parse()?,
                name,
                container.as_deref().map(regex::Regex::new).transpose()?,
            )
            .await
        }

        Some(Command::Log {
            kind,
            name,
            since,
            container,
            dry_run,
            raw_output,
            no_follow,
            selector,
            grep,
            invert_match,
            grep_color,
            level_keys,
            status_code_keys,
        }) => {
            commands::logs::run(
                &clients,
                token,
                LogFlags {
                    kind,
                    name,
                    since,
                    container,
                    dry_run,
                    raw_output,
                    no_follow,
                    selector,
                    grep,
                    invert_match,
                    grep_color,
                    level_keys,
                    status_code_keys,
                },
            )
            .await
        }

        Some(Command::PortForward {
            kind,
            name,
            ports,
            dry_run,
            limit,
        }) => {
            commands::forward::run(
                &clients,
                printer,
                token,
                kind.parse()?,
                name,
                ports,
                limit,
                dry_run,
            )
            .await
        }

        Some(Command::Restart { kind, name, user }) => {
            commands::restart::run(&clients, kind.parse()?, name, user).await
        }

        Some(Command::Scale {
            kind,
            name,
            factor,
            force,
        }) => commands::scale::run(&clients, kind.parse()?, name, factor, force).await,

        Some(Command::Watch {
            output,
            selector,
            label_columns,
            show_labels,
            show_annotations,
        }) => {
            commands::watch::run(
                &clients,
                token,
                WatchFlags {
                    wide: output.as_deref() == Some("wide"),
                    selector,
                    label_columns,
                    show_labels,
                    show_annotations,
                    all_namespaces: args.all_namespaces,
                },
            )
            .await
        }

        Some(Command::CompleteObjects { kind }) => {
            commands::completion::objects(&clients, kind.parse()?).await
        }

        Some(Command::Version) | Some(Command::Completion { .. }) => unreachable!(),
    }
}
