// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! One module per subcommand, wiring CLI flags into the engines

pub mod completion;
pub mod env;
pub mod forward;
pub mod image;
pub mod logs;
pub mod restart;
pub mod scale;
pub mod watch;

use anyhow::{Context, Result};

use crate::kubernetes::ClientSet;

/// Default action without a subcommand: report each cluster's version and
/// resolved namespace.
pub async fn cluster_info(clients: &ClientSet) -> Result<()> {
    clients
        .execute(|kube| async move {
            let info = kube
                .client()
                .apiserver_version()
                .await
                .context("get server version")?;

            kube.std(format!(
                "Cluster version: {}\nNamespace: {}",
                info.git_version, kube.namespace
            ))
            .await;

            Ok(())
        })
        .await;

    Ok(())
}
