// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Shell completion: static script generation plus the hidden
//! `complete-objects` helper the scripts call to complete object names
//! with those present in every configured cluster.

use anyhow::Result;
use clap::CommandFactory;
use clap_complete::{Shell, generate};

use crate::cli::Args;
use crate::kubernetes::{ClientSet, ResourceKind, resources};

pub fn shell(shell: Shell) {
    let mut command = Args::command();
    generate(shell, &mut command, "kmux", &mut std::io::stdout());
}

/// Print one name per line, for consumption by the completion scripts.
/// Only names listed by every answering cluster qualify.
pub async fn objects(clients: &ClientSet, kind: ResourceKind) -> Result<()> {
    for name in resources::common_objects(clients, kind).await {
        println!("{name}");
    }

    Ok(())
}
