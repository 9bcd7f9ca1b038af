// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use std::sync::Arc;

use anyhow::{Result, bail};

use crate::kubernetes::{ClientSet, ResourceKind, resources};

/// Scale the workload to `ceil(current × factor)` through the scale
/// subresource, per cluster.
pub async fn run(
    clients: &ClientSet,
    kind: ResourceKind,
    name: String,
    factor: f64,
    force: bool,
) -> Result<()> {
    if factor < 0.0 || !factor.is_finite() {
        bail!("scale factor must be a positive number");
    }

    if factor == 0.0 && !force {
        bail!("Use `--force` to confirm downscaling to zero pods");
    }

    let name = Arc::new(name);

    clients
        .execute(move |kube| {
            let name = Arc::clone(&name);

            async move {
                let current = resources::current_replicas(&kube, kind, &name).await?;
                let target = scale_target(current, factor);

                kube.std(format!("Scale from {current} to {target}")).await;

                if target != current {
                    resources::update_scale(&kube, kind, &name, target).await?;
                }

                Ok(())
            }
        })
        .await;

    Ok(())
}

fn scale_target(current: i32, factor: f64) -> i32 {
    (f64::from(current) * factor).ceil() as i32
}
