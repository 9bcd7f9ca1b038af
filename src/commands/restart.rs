// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use std::sync::Arc;

use anyhow::{Result, anyhow};
use chrono::{SecondsFormat, Utc};
use k8s_openapi::api::batch::v1::Job;
use kube::Api;
use kube::api::{DeleteParams, PostParams};
use serde_json::{Value, json};

use crate::kubernetes::{ClientSet, Kube, ResourceKind, resources};

/// Roll the workload by stamping restart annotations on its pod template.
/// Jobs cannot be patched into a new run and are recreated instead.
pub async fn run(
    clients: &ClientSet,
    kind: ResourceKind,
    name: String,
    user: Option<String>,
) -> Result<()> {
    let patch = Arc::new(restart_patch(user.as_deref(), Utc::now()));
    let name = Arc::new(name);

    clients
        .execute(move |kube| {
            let patch = Arc::clone(&patch);
            let name = Arc::clone(&name);

            async move {
                match kind {
                    ResourceKind::DaemonSet
                    | ResourceKind::Deployment
                    | ResourceKind::StatefulSet => {
                        resources::merge_patch_workload(&kube, kind, &name, &patch).await
                    }
                    ResourceKind::Job => recreate_job(&kube, &name).await,
                    _ => Err(anyhow!("unhandled resource type `{kind}` for restart")),
                }
            }
        })
        .await;

    Ok(())
}

fn restart_patch(user: Option<&str>, now: chrono::DateTime<Utc>) -> Value {
    let mut annotations = json!({
        "kmux.vibioh.fr/restartedAt": now.to_rfc3339_opts(SecondsFormat::Secs, true),
    });

    if let Some(user) = user.filter(|user| !user.is_empty()) {
        annotations["kmux.vibioh.fr/restartedBy"] = Value::String(user.to_string());
    }

    json!({
        "spec": {
            "template": {
                "metadata": {
                    "annotations": annotations,
                }
            }
        }
    })
}

/// GET, strip the server-owned identity, DELETE, CREATE.
async fn recreate_job(kube: &Kube, name: &str) -> Result<()> {
    let jobs: Api<Job> = kube.api();

    let mut job = jobs.get(name).await?;

    if let Some(spec) = job.spec.as_mut() {
        // The controller re-derives the selector and the matching template
        // labels; carrying the old controller-uid over blocks creation.
        spec.selector = None;
        if let Some(metadata) = spec.template.metadata.as_mut() {
            metadata.labels = None;
        }
    }

    job.metadata.resource_version = None;
    job.metadata.uid = None;
    job.metadata.creation_timestamp = None;
    job.metadata.managed_fields = None;
    job.status = None;

    jobs.delete(name, &DeleteParams::default()).await?;
    jobs.create(&PostParams::default(), &job).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_restart_patch_with_user() {
        let now = Utc.with_ymd_and_hms(2025, 7, 14, 12, 30, 0).unwrap();
        let patch = restart_patch(Some("alice"), now);

        let annotations = &patch["spec"]["template"]["metadata"]["annotations"];
        assert_eq!(
            annotations["kmux.vibioh.fr/restartedAt"],
            "2025-07-14T12:30:00Z"
        );
        assert_eq!(annotations["kmux.vibioh.fr/restartedBy"], "alice");
    }

    #[test]
    fn test_restart_patch_without_user() {
        let now = Utc.with_ymd_and_hms(2025, 7, 14, 12, 30, 0).unwrap();

        for user in [None, Some("")] {
            let patch = restart_patch(user, now);
            let annotations = &patch["spec"]["template"]["metadata"]["annotations"];
            assert!(annotations.get("kmux.vibioh.fr/restartedBy").is_none());
            assert!(annotations.get("kmux.vibioh.fr/restartedAt").is_some());
        }
    }

    #[test]
    fn test_restart_patch_is_schema_stable() {
        // Two applications differ only in the timestamp value.
        let first = restart_patch(Some("alice"), Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        let second = restart_patch(Some("alice"), Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap());

        let keys = |patch: &Value| -> Vec<String> {
            patch["spec"]["template"]["metadata"]["annotations"]
                .as_object()
                .unwrap()
                .keys()
                .cloned()
                .collect()
        };

        assert_eq!(keys(&first), keys(&second));
        assert_ne!(
            first["spec"]["template"]["metadata"]["annotations"]["kmux.vibioh.fr/restartedAt"],
            second["spec"]["template"]["metadata"]["annotations"]["kmux.vibioh.fr/restartedAt"],
        );
    }
}
