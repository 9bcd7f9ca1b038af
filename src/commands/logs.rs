// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::kubernetes::{ClientSet, ResourceKind};
use crate::logs::Logger;
use crate::logs::color::Severity;

pub struct LogFlags {
    pub kind: Option<String>,
    pub name: Option<String>,
    pub since: Duration,
    pub container: Option<String>,
    pub dry_run: bool,
    pub raw_output: bool,
    pub no_follow: bool,
    pub selector: Vec<String>,
    pub grep: Vec<String>,
    pub invert_match: bool,
    pub grep_color: Option<String>,
    pub level_keys: Vec<String>,
    pub status_code_keys: Vec<String>,
}

pub async fn run(clients: &ClientSet, token: &CancellationToken, flags: LogFlags) -> Result<()> {
    let target = match (&flags.kind, &flags.name) {
        (Some(kind), Some(name)) => Some((kind.parse::<ResourceKind>()?, name.clone())),
        (None, None) if !flags.selector.is_empty() => None,
        _ => bail!("either labels or `TYPE NAME` args must be specified"),
    };

    let container = flags
        .container
        .as_deref()
        .map(Regex::new)
        .transpose()
        .context("container filter compile")?;

    let greps = flags
        .grep
        .iter()
        .map(|pattern| Regex::new(pattern))
        .collect::<Result<Vec<_>, _>>()
        .context("log filter compile")?;

    let config = Config::load()?;

    let severity_filter = flags
        .grep_color
        .clone()
        .or(config.grep_color)
        .map(|name| {
            Severity::parse_threshold(&name)
                .ok_or_else(|| anyhow::anyhow!("unknown severity `{name}`"))
        })
        .transpose()?;

    let mut color_keys = if flags.level_keys.is_empty() {
        config.level_keys
    } else {
        flags.level_keys
    };
    color_keys.extend(if flags.status_code_keys.is_empty() {
        config.status_code_keys
    } else {
        flags.status_code_keys
    });

    let logger = Arc::new(Logger {
        target,
        selector: flags.selector,
        since_seconds: flags.since.as_secs() as i64,
        container,
        greps,
        invert_grep: flags.invert_match,
        color_keys,
        severity_filter,
        dry_run: flags.dry_run,
        no_follow: flags.no_follow,
        raw_output: flags.raw_output,
    });

    let token = token.clone();

    clients
        .execute(move |kube| {
            let logger = Arc::clone(&logger);
            let token = token.clone();
            async move { logger.run(kube, token).await }
        })
        .await;

    Ok(())
}
