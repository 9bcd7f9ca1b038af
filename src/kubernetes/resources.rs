// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Resource resolution: from a (kind, name) pair to pod-selection criteria
//!
//! Every pod-targeting command goes through [`pod_selection`], which turns
//! a workload reference into the namespace, label selector, field selector
//! and optional post-filter used for listing and watching pods. The same
//! per-kind dispatch also extracts pod templates (for `image`/`env`) and
//! drives the scale and restart subresource calls.
//!
//! Label selectors are derived from `matchLabels` only; `matchExpressions`
//! are not honoured.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use futures::future::BoxFuture;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Namespace, Node, Pod, PodSpec, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, ResourceExt};
use serde_json::json;

use super::client::{ClientSet, Kube};
use super::kind::ResourceKind;

/// Post-filter applied to listed/watched pods, when label and field
/// selectors alone cannot express the ownership relation. May call the API
/// (the CronJob filter resolves the intermediate Job).
pub type PodFilter = Arc<dyn Fn(Kube, Pod) -> BoxFuture<'static, bool> + Send + Sync>;

/// Result of resolving a (kind, name) pair against one cluster.
#[derive(Clone, Default)]
pub struct PodSelection {
    pub namespace: String,
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
    pub filter: Option<PodFilter>,
}

impl PodSelection {
    pub fn list_params(&self) -> ListParams {
        let mut params = ListParams::default();

        if let Some(labels) = &self.label_selector {
            params = params.labels(labels);
        }
        if let Some(fields) = &self.field_selector {
            params = params.fields(fields);
        }

        params
    }

    /// Run the post-filter, if any. Pods without one always pass.
    pub async fn admits(&self, kube: &Kube, pod: &Pod) -> bool {
        match &self.filter {
            Some(filter) => filter(kube.clone(), pod.clone()).await,
            None => true,
        }
    }
}

/// Resolve the pods targeted by `kind`/`name` on this cluster.
pub async fn pod_selection(kube: &Kube, kind: ResourceKind, name: &str) -> Result<PodSelection> {
    match kind {
        ResourceKind::Namespace => Ok(PodSelection {
            namespace: if name.is_empty() {
                kube.namespace.clone()
            } else {
                name.to_string()
            },
            ..Default::default()
        }),

        ResourceKind::Pod => Ok(PodSelection {
            namespace: kube.namespace.clone(),
            field_selector: Some(format!("metadata.name={name}")),
            ..Default::default()
        }),

        ResourceKind::Node => Ok(PodSelection {
            namespace: kube.namespace.clone(),
            field_selector: Some(format!("spec.nodeName={name}")),
            ..Default::default()
        }),

        ResourceKind::Service => {
            let service: Service = kube.api().get(name).await.context("get service")?;

            let selector = service
                .spec
                .and_then(|spec| spec.selector)
                .filter(|selector| !selector.is_empty())
                .ok_or_else(|| anyhow!("service `{name}` has no selector"))?;

            Ok(PodSelection {
                namespace: kube.namespace.clone(),
                label_selector: Some(selector_from_labels(&selector)),
                ..Default::default()
            })
        }

        ResourceKind::CronJob => {
            let cronjob: CronJob = kube.api().get(name).await.context("get cronjob")?;

            let uid = cronjob.metadata.uid.clone().unwrap_or_default();
            let job_namespace = cronjob
                .metadata
                .namespace
                .clone()
                .unwrap_or_else(|| kube.namespace.clone());

            Ok(PodSelection {
                namespace: kube.namespace.clone(),
                // Pods of CronJob-owned Jobs carry `job-name`; the filter
                // then walks pod -> Job -> CronJob ownership so reused
                // label values in the namespace cannot produce false
                // positives.
                label_selector: Some("job-name".to_string()),
                filter: Some(cronjob_filter(uid, job_namespace)),
                ..Default::default()
            })
        }

        ResourceKind::DaemonSet
        | ResourceKind::Deployment
        | ResourceKind::Job
        | ResourceKind::ReplicaSet
        | ResourceKind::StatefulSet => {
            let selector = workload_selector(kube, kind, name).await?;

            Ok(PodSelection {
                namespace: kube.namespace.clone(),
                label_selector: selector
                    .as_ref()
                    .map(match_labels_selector)
                    .filter(|labels| !labels.is_empty()),
                ..Default::default()
            })
        }
    }
}

async fn workload_selector(
    kube: &Kube,
    kind: ResourceKind,
    name: &str,
) -> Result<Option<LabelSelector>> {
    let selector = match kind {
        ResourceKind::DaemonSet => {
            let item: DaemonSet = kube.api().get(name).await?;
            item.spec.map(|spec| spec.selector)
        }
        ResourceKind::Deployment => {
            let item: Deployment = kube.api().get(name).await?;
            item.spec.map(|spec| spec.selector)
        }
        ResourceKind::Job => {
            let item: Job = kube.api().get(name).await?;
            item.spec.and_then(|spec| spec.selector)
        }
        ResourceKind::ReplicaSet => {
            let item: ReplicaSet = kube.api().get(name).await?;
            item.spec.map(|spec| spec.selector)
        }
        ResourceKind::StatefulSet => {
            let item: StatefulSet = kube.api().get(name).await?;
            item.spec.map(|spec| spec.selector)
        }
        _ => return Err(anyhow!("unhandled resource type `{kind}`")),
    };

    Ok(selector)
}

fn cronjob_filter(cronjob_uid: String, job_namespace: String) -> PodFilter {
    Arc::new(move |kube: Kube, pod: Pod| {
        let cronjob_uid = cronjob_uid.clone();
        let job_namespace = job_namespace.clone();

        Box::pin(async move {
            for owner in pod.owner_references() {
                if owner.kind != "Job" {
                    continue;
                }

                let jobs: Api<Job> = kube.api_in(&job_namespace);
                let job = match jobs.get(&owner.name).await {
                    Ok(job) => job,
                    Err(err) => {
                        kube.warn(format!("get job `{}`: {err}", owner.name)).await;
                        continue;
                    }
                };

                if job_owned_by(&job, &cronjob_uid) {
                    return true;
                }
            }

            false
        })
    })
}

/// Second hop of the CronJob ownership chain: does this Job belong to the
/// CronJob with the given UID?
fn job_owned_by(job: &Job, cronjob_uid: &str) -> bool {
    job.owner_references()
        .iter()
        .any(|reference| reference.uid == cronjob_uid)
}

/// Render labels as a selector string. `BTreeMap` iteration is key-ordered,
/// so repeated resolutions produce byte-identical selectors.
fn selector_from_labels(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn match_labels_selector(selector: &LabelSelector) -> String {
    selector
        .match_labels
        .as_ref()
        .map(selector_from_labels)
        .unwrap_or_default()
}

/// Pod template of any workload kind, for `image` and `env`.
pub async fn pod_spec(kube: &Kube, kind: ResourceKind, name: &str) -> Result<PodSpec> {
    let template = match kind {
        ResourceKind::CronJob => {
            let item: CronJob = kube.api().get(name).await?;
            item.spec
                .and_then(|spec| spec.job_template.spec)
                .and_then(|spec| spec.template.spec)
        }
        ResourceKind::DaemonSet => {
            let item: DaemonSet = kube.api().get(name).await?;
            item.spec.and_then(|spec| spec.template.spec)
        }
        ResourceKind::Deployment => {
            let item: Deployment = kube.api().get(name).await?;
            item.spec.and_then(|spec| spec.template.spec)
        }
        ResourceKind::Job => {
            let item: Job = kube.api().get(name).await?;
            item.spec.and_then(|spec| spec.template.spec)
        }
        ResourceKind::Pod => {
            let item: Pod = kube.api().get(name).await?;
            item.spec
        }
        ResourceKind::ReplicaSet => {
            let item: ReplicaSet = kube.api().get(name).await?;
            item.spec.and_then(|spec| spec.template.and_then(|t| t.spec))
        }
        ResourceKind::StatefulSet => {
            let item: StatefulSet = kube.api().get(name).await?;
            item.spec.and_then(|spec| spec.template.spec)
        }
        _ => return Err(anyhow!("unhandled resource type `{kind}`")),
    };

    template.ok_or_else(|| anyhow!("{kind} `{name}` has no pod template"))
}

/// Current desired replicas, defined for the scalable workload kinds only.
pub async fn current_replicas(kube: &Kube, kind: ResourceKind, name: &str) -> Result<i32> {
    let replicas = match kind {
        ResourceKind::Deployment => {
            let item: Deployment = kube.api().get(name).await?;
            item.spec.and_then(|spec| spec.replicas)
        }
        ResourceKind::ReplicaSet => {
            let item: ReplicaSet = kube.api().get(name).await?;
            item.spec.and_then(|spec| spec.replicas)
        }
        ResourceKind::StatefulSet => {
            let item: StatefulSet = kube.api().get(name).await?;
            item.spec.and_then(|spec| spec.replicas)
        }
        _ => return Err(anyhow!("unhandled resource type `{kind}` for scale")),
    };

    Ok(replicas.unwrap_or(0))
}

/// Update the scale subresource to an absolute replica count.
pub async fn update_scale(kube: &Kube, kind: ResourceKind, name: &str, replicas: i32) -> Result<()> {
    let params = PatchParams::default();
    let patch = Patch::Merge(json!({ "spec": { "replicas": replicas } }));

    match kind {
        ResourceKind::Deployment => {
            let api: Api<Deployment> = kube.api();
            api.patch_scale(name, &params, &patch).await?;
        }
        ResourceKind::ReplicaSet => {
            let api: Api<ReplicaSet> = kube.api();
            api.patch_scale(name, &params, &patch).await?;
        }
        ResourceKind::StatefulSet => {
            let api: Api<StatefulSet> = kube.api();
            api.patch_scale(name, &params, &patch).await?;
        }
        _ => return Err(anyhow!("unhandled resource type `{kind}` for scale")),
    }

    Ok(())
}

/// Merge-patch a patchable workload (restart annotations). Jobs are not
/// patchable this way and are handled by recreation in the restart command.
pub async fn merge_patch_workload(
    kube: &Kube,
    kind: ResourceKind,
    name: &str,
    body: &serde_json::Value,
) -> Result<()> {
    let params = PatchParams::default();
    let patch = Patch::Merge(body);

    match kind {
        ResourceKind::DaemonSet => {
            let api: Api<DaemonSet> = kube.api();
            api.patch(name, &params, &patch).await?;
        }
        ResourceKind::Deployment => {
            let api: Api<Deployment> = kube.api();
            api.patch(name, &params, &patch).await?;
        }
        ResourceKind::StatefulSet => {
            let api: Api<StatefulSet> = kube.api();
            api.patch(name, &params, &patch).await?;
        }
        _ => return Err(anyhow!("unhandled resource type `{kind}` for restart")),
    }

    Ok(())
}

/// List the pods selected by `kind`/`name`, post-filter applied.
pub async fn list_pods(kube: &Kube, kind: ResourceKind, name: &str) -> Result<Vec<Pod>> {
    let selection = pod_selection(kube, kind, name).await?;

    let api: Api<Pod> = kube.api_in(&selection.namespace);
    let listed = api.list(&selection.list_params()).await?;

    let mut pods = Vec::with_capacity(listed.items.len());
    for pod in listed.items {
        if selection.admits(kube, &pod).await {
            pods.push(pod);
        }
    }

    Ok(pods)
}

/// Names of every object of `kind` on this cluster, for completion.
pub async fn list_names(kube: &Kube, kind: ResourceKind) -> Result<Vec<String>> {
    async fn names_of<K>(api: Api<K>) -> Result<Vec<String>>
    where
        K: kube::Resource + Clone + std::fmt::Debug + serde::de::DeserializeOwned,
    {
        let listed = api.list(&ListParams::default()).await?;
        Ok(listed.items.iter().map(ResourceExt::name_any).collect())
    }

    match kind {
        ResourceKind::CronJob => names_of(kube.api::<CronJob>()).await,
        ResourceKind::DaemonSet => names_of(kube.api::<DaemonSet>()).await,
        ResourceKind::Deployment => names_of(kube.api::<Deployment>()).await,
        ResourceKind::Job => names_of(kube.api::<Job>()).await,
        ResourceKind::Pod => names_of(kube.api::<Pod>()).await,
        ResourceKind::ReplicaSet => names_of(kube.api::<ReplicaSet>()).await,
        ResourceKind::StatefulSet => names_of(kube.api::<StatefulSet>()).await,
        ResourceKind::Service => names_of(kube.api::<Service>()).await,
        ResourceKind::Namespace => names_of(kube.cluster_api::<Namespace>()).await,
        ResourceKind::Node => names_of(kube.cluster_api::<Node>()).await,
    }
}

/// Names present on every cluster that answered. Clusters whose listing
/// failed are excluded from the denominator rather than emptying the
/// intersection.
pub async fn common_objects(clients: &ClientSet, kind: ResourceKind) -> Vec<String> {
    let listings =
        futures::future::join_all(clients.iter().map(|kube| list_names(kube, kind))).await;

    intersection(listings.into_iter().filter_map(Result::ok).collect())
}

fn intersection(per_cluster: Vec<Vec<String>>) -> Vec<String> {
    let total = per_cluster.len();
    if total == 0 {
        return Vec::new();
    }

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();

    for names in per_cluster {
        // Dedupe within one cluster so multiplicity equals cluster count.
        let unique: HashSet<String> = names.into_iter().collect();
        for name in unique {
            *counts.entry(name).or_default() += 1;
        }
    }

    counts
        .into_iter()
        .filter(|(_, count)| *count == total)
        .map(|(name, _)| name)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

    fn owner(kind: &str, name: &str, uid: &str) -> OwnerReference {
        OwnerReference {
            api_version: "batch/v1".to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            uid: uid.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_selector_from_labels_is_key_ordered() {
        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), "web".to_string());
        labels.insert("tier".to_string(), "frontend".to_string());
        labels.insert("env".to_string(), "prod".to_string());

        let selector = selector_from_labels(&labels);
        assert_eq!(selector, "app=web,env=prod,tier=frontend");

        // Stable across repeated calls.
        assert_eq!(selector_from_labels(&labels), selector);
    }

    #[test]
    fn test_match_labels_selector_ignores_expressions() {
        let selector = LabelSelector {
            match_labels: Some(BTreeMap::from([("app".to_string(), "web".to_string())])),
            match_expressions: None,
        };
        assert_eq!(match_labels_selector(&selector), "app=web");

        let empty = LabelSelector::default();
        assert_eq!(match_labels_selector(&empty), "");
    }

    #[test]
    fn test_job_owned_by() {
        let mut job = Job::default();
        job.metadata.owner_references = Some(vec![
            owner("CronJob", "cleanup", "uid-123"),
            owner("SomethingElse", "x", "uid-999"),
        ]);

        assert!(job_owned_by(&job, "uid-123"));
        assert!(!job_owned_by(&job, "uid-456"));
        assert!(!job_owned_by(&Job::default(), "uid-123"));
    }

    #[test]
    fn test_intersection_requires_all_clusters() {
        let result = intersection(vec![
            vec!["api".to_string(), "web".to_string(), "worker".to_string()],
            vec!["web".to_string(), "api".to_string()],
        ]);
        assert_eq!(result, vec!["api", "web"]);
    }

    #[test]
    fn test_intersection_single_cluster() {
        let result = intersection(vec![vec!["api".to_string(), "api".to_string()]]);
        // Duplicates within one cluster count once.
        assert_eq!(result, vec!["api"]);
    }

    #[test]
    fn test_intersection_empty() {
        assert!(intersection(vec![]).is_empty());
        assert!(intersection(vec![vec![], vec!["api".to_string()]]).is_empty());
    }
}
