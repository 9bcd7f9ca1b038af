// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use std::sync::Arc;

use anyhow::Result;
use regex::Regex;

use crate::kubernetes::{ClientSet, ResourceKind, resources};

/// Print every container image of the resource, init containers included.
pub async fn run(
    clients: &ClientSet,
    kind: ResourceKind,
    name: String,
    container: Option<Regex>,
) -> Result<()> {
    let name = Arc::new(name);
    let container = Arc::new(container);

    clients
        .execute(move |kube| {
            let name = Arc::clone(&name);
            let container = Arc::clone(&container);

            async move {
                let pod_spec = resources::pod_spec(&kube, kind, &name).await?;

                let containers = pod_spec
                    .init_containers
                    .iter()
                    .flatten()
                    .chain(pod_spec.containers.iter());

                for item in containers {
                    if let Some(filter) = container.as_ref() {
                        if !filter.is_match(&item.name) {
                            continue;
                        }
                    }

                    if let Some(image) = &item.image {
                        kube.std(image.clone()).await;
                    }
                }

                Ok(())
            }
        })
        .await;

    Ok(())
}
