// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use std::sync::Arc;

use anyhow::{Result, anyhow};
use tokio_util::sync::CancellationToken;

use crate::forward::Forwarder;
use crate::kubernetes::{ClientSet, ResourceKind};
use crate::output::Printer;
use crate::tcpool::Pool;

pub async fn run(
    clients: &ClientSet,
    printer: &Printer,
    token: &CancellationToken,
    kind: ResourceKind,
    name: String,
    ports: String,
    limit: usize,
    dry_run: bool,
) -> Result<()> {
    let (local_port, remote_port) = parse_port_spec(&ports)?;

    let pool = Pool::new();

    let forwarder = Arc::new(Forwarder {
        kind,
        name,
        remote_port,
        pool: Arc::clone(&pool),
        limit,
        dry_run,
    });

    // Dry-run never receives connections; starting the listener would only
    // park the command until interrupted.
    let pool_task = (!dry_run).then(|| {
        tokio::spawn(Arc::clone(&pool).serve(token.clone(), local_port, printer.outputter("")))
    });

    let exec_token = token.clone();
    clients
        .execute(move |kube| {
            let forwarder = Arc::clone(&forwarder);
            let token = exec_token.clone();
            async move { forwarder.run(kube, token).await }
        })
        .await;

    // The pool keeps dispatching until the user interrupts.
    if let Some(task) = pool_task {
        let _ = task.await;
    }

    Ok(())
}

/// `LOCAL[:REMOTE]`: the local port must be numeric; the remote part may
/// be a port number or a container port name and defaults to the local
/// port.
fn parse_port_spec(spec: &str) -> Result<(u16, String)> {
    let (local, remote) = match spec.split_once(':') {
        Some((local, remote)) if !remote.is_empty() => (local, remote.to_string()),
        Some(_) => return Err(anyhow!("invalid port spec `{spec}`")),
        None => (spec, spec.to_string()),
    };

    let local_port: u16 = local
        .parse()
        .map_err(|_| anyhow!("invalid local port `{local}`"))?;

    Ok((local_port, remote))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_port_spec_local_only() {
        assert_eq!(parse_port_spec("8080").unwrap(), (8080, "8080".to_string()));
    }

    #[test]
    fn test_parse_port_spec_with_remote() {
        assert_eq!(
            parse_port_spec("8080:9090").unwrap(),
            (8080, "9090".to_string())
        );
        assert_eq!(
            parse_port_spec("8080:http").unwrap(),
            (8080, "http".to_string())
        );
    }

    #[test]
    fn test_parse_port_spec_invalid() {
        assert!(parse_port_spec("http").is_err());
        assert!(parse_port_spec("8080:").is_err());
        assert!(parse_port_spec("70000").is_err());
    }
}
