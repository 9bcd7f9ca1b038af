// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use std::sync::Arc;

use anyhow::Result;
use regex::Regex;

use crate::kubernetes::env::EnvGetter;
use crate::kubernetes::{ClientSet, ResourceKind};

/// Print the environment every selected container would see.
pub async fn run(
    clients: &ClientSet,
    kind: ResourceKind,
    name: String,
    container: Option<Regex>,
) -> Result<()> {
    let getter = Arc::new(EnvGetter {
        kind,
        name,
        container,
    });

    clients
        .execute(move |kube| {
            let getter = Arc::clone(&getter);
            async move { getter.run(kube).await }
        })
        .await;

    Ok(())
}
