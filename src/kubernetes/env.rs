// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Environment materialiser
//!
//! Resolves what a container would see as its environment without running
//! it: `envFrom` sources are fetched once per distinct ConfigMap/Secret,
//! keyed refs are looked up in those, field refs are answered from the
//! "most live" pod of the resource, and resource refs are computed from
//! the container's limits/requests with node capacity as the limit
//! fallback.

use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use anyhow::Result;
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, EnvVar, Node, Pod, ResourceFieldSelector, Secret,
};
use regex::Regex;

use super::client::Kube;
use super::kind::ResourceKind;
use super::quantity::milli_value;
use super::resources;
use crate::output::{GREEN, YELLOW};

static ENV_LABELS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"metadata\.labels\[["']?(.*?)["']?\]"#).unwrap());
static ENV_ANNOTATIONS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"metadata\.annotations\[["']?(.*?)["']?\]"#).unwrap());

/// Fetched key/value sources, by name. `None` marks a source that could
/// not be fetched.
type Sources = BTreeMap<String, Option<BTreeMap<String, String>>>;

pub struct EnvGetter {
    pub kind: ResourceKind,
    pub name: String,
    pub container: Option<Regex>,
}

impl EnvGetter {
    pub async fn run(&self, kube: Kube) -> Result<()> {
        let pod_spec = resources::pod_spec(&kube, self.kind, &self.name).await?;
        let pods = resources::list_pods(&kube, self.kind, &self.name).await?;

        let pod = most_live_pod(&pods);

        let node = match pod.spec.as_ref().and_then(|spec| spec.node_name.as_deref()) {
            Some(node_name) if !node_name.is_empty() => {
                kube.cluster_api::<Node>().get(node_name).await?
            }
            _ => Node::default(),
        };

        let containers: Vec<&Container> = pod_spec
            .init_containers
            .iter()
            .flatten()
            .chain(pod_spec.containers.iter())
            .filter(|container| match &self.container {
                Some(filter) => filter.is_match(&container.name),
                None => true,
            })
            .collect();

        for container in &containers {
            let blocks = container_env(&kube, container, &pod, &node).await;
            if blocks.is_empty() {
                continue;
            }

            let rendered = blocks
                .iter()
                .map(EnvBlock::render)
                .collect::<Vec<_>>()
                .join("");

            let out = if containers.len() != 1 {
                kube.out().child(
                    false,
                    &GREEN.apply_to(format!("[{}]", container.name)).to_string(),
                )
            } else {
                kube.out().clone()
            };

            out.std(rendered).await;
        }

        Ok(())
    }
}

/// Representative pod for field refs, by phase priority.
fn most_live_pod(pods: &[Pod]) -> Pod {
    for phase in ["Running", "Succeeded", "Failed", "Pending", "Unknown"] {
        let found = pods.iter().find(|pod| {
            pod.status
                .as_ref()
                .and_then(|status| status.phase.as_deref())
                == Some(phase)
        });

        if let Some(pod) = found {
            return pod.clone();
        }
    }

    Pod::default()
}

struct EnvBlock {
    source: String,
    entries: BTreeMap<String, String>,
}

impl EnvBlock {
    fn render(&self) -> String {
        let mut rendered = format!("{}\n", YELLOW.apply_to(format!("# {}", self.source)));

        let mut lines: Vec<String> = self
            .entries
            .iter()
            .map(|(key, value)| format!("{key}={value}\n"))
            .collect();
        lines.sort();

        rendered.extend(lines);
        rendered
    }
}

async fn container_env(kube: &Kube, container: &Container, pod: &Pod, node: &Node) -> Vec<EnvBlock> {
    let (configmaps, secrets) = fetch_dependencies(kube, container).await;

    let mut blocks = Vec::new();

    for env_from in container.env_from.iter().flatten() {
        if let Some(reference) = &env_from.config_map_ref {
            blocks.push(source_block(
                &configmaps,
                "configmap",
                env_from.prefix.as_deref().unwrap_or_default(),
                reference.name.as_str(),
                reference.optional,
            ));
        } else if let Some(reference) = &env_from.secret_ref {
            blocks.push(source_block(
                &secrets,
                "secret",
                env_from.prefix.as_deref().unwrap_or_default(),
                reference.name.as_str(),
                reference.optional,
            ));
        }
    }

    if let Some(env) = &container.env {
        if !env.is_empty() {
            let mut inline = BTreeMap::new();

            for var in env {
                inline.insert(
                    var.name.clone(),
                    inline_value(var, pod, node, container, &configmaps, &secrets),
                );
            }

            blocks.push(EnvBlock {
                source: "inline".to_string(),
                entries: inline,
            });
        }
    }

    blocks
}

/// One GET per distinct ConfigMap/Secret referenced by the container.
async fn fetch_dependencies(kube: &Kube, container: &Container) -> (Sources, Sources) {
    let mut configmap_names = HashSet::new();
    let mut secret_names = HashSet::new();

    for var in container.env.iter().flatten() {
        if let Some(source) = &var.value_from {
            if let Some(reference) = &source.config_map_key_ref {
                configmap_names.insert(reference.name.clone());
            } else if let Some(reference) = &source.secret_key_ref {
                secret_names.insert(reference.name.clone());
            }
        }
    }

    for env_from in container.env_from.iter().flatten() {
        if let Some(reference) = &env_from.config_map_ref {
            configmap_names.insert(reference.name.clone());
        } else if let Some(reference) = &env_from.secret_ref {
            secret_names.insert(reference.name.clone());
        }
    }

    let mut configmaps = Sources::new();
    for name in configmap_names {
        let data = match kube.api::<ConfigMap>().get(&name).await {
            Ok(configmap) => Some(configmap.data.unwrap_or_default()),
            Err(err) => {
                kube.err(format!("getting configmap `{name}`: {err}")).await;
                None
            }
        };
        configmaps.insert(name, data);
    }

    let mut secrets = Sources::new();
    for name in secret_names {
        let data = match kube.api::<Secret>().get(&name).await {
            Ok(secret) => Some(
                secret
                    .data
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(key, value)| {
                        (key, String::from_utf8_lossy(&value.0).into_owned())
                    })
                    .collect(),
            ),
            Err(err) => {
                kube.err(format!("getting secret `{name}`: {err}")).await;
                None
            }
        };
        secrets.insert(name, data);
    }

    (configmaps, secrets)
}

fn source_block(
    sources: &Sources,
    kind: &str,
    prefix: &str,
    name: &str,
    optional: Option<bool>,
) -> EnvBlock {
    let source = format!("{kind} {name}");

    let Some(Some(values)) = sources.get(name) else {
        let mut entries = BTreeMap::new();
        if optional != Some(true) {
            entries.insert(
                "error".to_string(),
                format!("<{kind} not optional and not found>"),
            );
        }

        return EnvBlock { source, entries };
    };

    EnvBlock {
        source,
        entries: values
            .iter()
            .map(|(key, value)| (format!("{prefix}{key}"), value.clone()))
            .collect(),
    }
}

fn inline_value(
    var: &EnvVar,
    pod: &Pod,
    node: &Node,
    container: &Container,
    configmaps: &Sources,
    secrets: &Sources,
) -> String {
    if let Some(value) = &var.value {
        if !value.is_empty() {
            return value.clone();
        }
    }

    let Some(source) = &var.value_from else {
        return String::new();
    };

    if let Some(reference) = &source.config_map_key_ref {
        return keyed_value(
            configmaps,
            "configmap",
            reference.name.as_str(),
            &reference.key,
            reference.optional,
        );
    }

    if let Some(reference) = &source.secret_key_ref {
        return keyed_value(
            secrets,
            "secret",
            reference.name.as_str(),
            &reference.key,
            reference.optional,
        );
    }

    if let Some(field) = &source.field_ref {
        return field_value(pod, &field.field_path);
    }

    if let Some(resource) = &source.resource_field_ref {
        return resource_value(pod, node, container, resource);
    }

    String::new()
}

fn keyed_value(
    sources: &Sources,
    kind: &str,
    name: &str,
    key: &str,
    optional: Option<bool>,
) -> String {
    match sources.get(name) {
        Some(Some(values)) => values.get(key).cloned().unwrap_or_default(),
        _ if optional != Some(true) => {
            format!("<{kind} `{name}` not optional and not found>")
        }
        _ => String::new(),
    }
}

fn field_value(pod: &Pod, field_path: &str) -> String {
    if let Some(captures) = ENV_LABELS.captures(field_path) {
        return pod
            .metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(&captures[1]).cloned())
            .unwrap_or_default();
    }

    if let Some(captures) = ENV_ANNOTATIONS.captures(field_path) {
        return pod
            .metadata
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(&captures[1]).cloned())
            .unwrap_or_default();
    }

    let status = pod.status.as_ref();
    let spec = pod.spec.as_ref();

    match field_path {
        "metadata.name" => pod.metadata.name.clone().unwrap_or_default(),
        "metadata.namespace" => pod.metadata.namespace.clone().unwrap_or_default(),
        "spec.nodeName" => spec
            .and_then(|spec| spec.node_name.clone())
            .unwrap_or_default(),
        "spec.serviceAccountName" => spec
            .and_then(|spec| spec.service_account_name.clone())
            .unwrap_or_default(),
        "status.hostIP" => status
            .and_then(|status| status.host_ip.clone())
            .unwrap_or_default(),
        "status.podIP" => status
            .and_then(|status| status.pod_ip.clone())
            .unwrap_or_default(),
        "status.podIPs" => status
            .and_then(|status| status.pod_ips.as_ref())
            .map(|ips| {
                ips.iter()
                    .map(|ip| ip.ip.clone())
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .unwrap_or_default(),
        _ => format!("<`{field_path}` field ref not implemented>"),
    }
}

fn resource_value(
    pod: &Pod,
    node: &Node,
    fallback: &Container,
    selector: &ResourceFieldSelector,
) -> String {
    let containers = pod.spec.as_ref().map(|spec| &spec.containers);

    let container = containers
        .into_iter()
        .flatten()
        .find(|container| Some(container.name.as_str()) == selector.container_name.as_deref())
        .unwrap_or(fallback);

    let resources = container.resources.as_ref();
    let limits = resources.and_then(|resources| resources.limits.as_ref());
    let requests = resources.and_then(|resources| resources.requests.as_ref());
    let capacity = node
        .status
        .as_ref()
        .and_then(|status| status.capacity.as_ref());

    let mut divisor = milli_value(selector.divisor.as_ref());
    if divisor == 0 {
        divisor = 1000;
    }

    match selector.resource.as_str() {
        "limits.cpu" => limit_value(
            milli_value(limits.and_then(|limits| limits.get("cpu"))),
            milli_value(capacity.and_then(|capacity| capacity.get("cpu"))),
            divisor,
        ),
        "limits.memory" => limit_value(
            milli_value(limits.and_then(|limits| limits.get("memory"))),
            milli_value(capacity.and_then(|capacity| capacity.get("memory"))),
            divisor,
        ),
        "limits.ephemeral-storage" => limit_value(
            milli_value(limits.and_then(|limits| limits.get("ephemeral-storage"))),
            milli_value(capacity.and_then(|capacity| capacity.get("ephemeral-storage"))),
            divisor,
        ),
        "requests.cpu" => request_value(
            milli_value(requests.and_then(|requests| requests.get("cpu"))),
            divisor,
        ),
        "requests.memory" => request_value(
            milli_value(requests.and_then(|requests| requests.get("memory"))),
            divisor,
        ),
        "requests.ephemeral-storage" => request_value(
            milli_value(requests.and_then(|requests| requests.get("ephemeral-storage"))),
            divisor,
        ),
        _ => String::new(),
    }
}

/// Limits fall back to node capacity and round up.
fn limit_value(defined: i64, node_capacity: i64, divisor: i64) -> String {
    let limit = if defined == 0 { node_capacity } else { defined };

    div_ceil_i64(limit, divisor).to_string()
}

/// Stable-Rust equivalent of the still-unstable `i64::div_ceil`.
fn div_ceil_i64(lhs: i64, rhs: i64) -> i64 {
    let d = lhs / rhs;
    let r = lhs % rhs;
    if (r > 0 && rhs > 0) || (r < 0 && rhs < 0) {
        d + 1
    } else {
        d
    }
}

/// Requests round down but never below one when set.
fn request_value(defined: i64, divisor: i64) -> String {
    if defined == 0 {
        return "0".to_string();
    }

    let value = defined / divisor;
    if value == 0 {
        return "1".to_string();
    }

    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{PodStatus, ResourceRequirements};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn pod_in_phase(name: &str, phase: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_most_live_pod_prefers_running() {
        let pods = vec![
            pod_in_phase("pending", "Pending"),
            pod_in_phase("failed", "Failed"),
            pod_in_phase("running", "Running"),
        ];

        assert_eq!(
            most_live_pod(&pods).metadata.name.as_deref(),
            Some("running")
        );
    }

    #[test]
    fn test_most_live_pod_fallback_order() {
        let pods = vec![
            pod_in_phase("pending", "Pending"),
            pod_in_phase("failed", "Failed"),
        ];
        assert_eq!(most_live_pod(&pods).metadata.name.as_deref(), Some("failed"));

        assert!(most_live_pod(&[]).metadata.name.is_none());
    }

    #[test]
    fn test_field_value_paths() {
        let mut pod = pod_in_phase("web-0", "Running");
        pod.metadata.namespace = Some("prod".to_string());
        pod.metadata.labels = Some(BTreeMap::from([(
            "app".to_string(),
            "web".to_string(),
        )]));
        pod.metadata.annotations = Some(BTreeMap::from([(
            "team".to_string(),
            "platform".to_string(),
        )]));
        pod.status.as_mut().unwrap().pod_ip = Some("10.0.0.7".to_string());

        assert_eq!(field_value(&pod, "metadata.name"), "web-0");
        assert_eq!(field_value(&pod, "metadata.namespace"), "prod");
        assert_eq!(field_value(&pod, "status.podIP"), "10.0.0.7");
        assert_eq!(field_value(&pod, "metadata.labels['app']"), "web");
        assert_eq!(field_value(&pod, "metadata.annotations[\"team\"]"), "platform");
        assert_eq!(
            field_value(&pod, "status.qosClass"),
            "<`status.qosClass` field ref not implemented>"
        );
    }

    #[test]
    fn test_source_block_missing_non_optional() {
        let sources = Sources::new();

        let block = source_block(&sources, "configmap", "", "settings", None);
        assert_eq!(block.source, "configmap settings");
        assert_eq!(
            block.entries.get("error").map(String::as_str),
            Some("<configmap not optional and not found>")
        );

        let optional = source_block(&sources, "secret", "", "settings", Some(true));
        assert!(optional.entries.is_empty());
    }

    #[test]
    fn test_source_block_prefix() {
        let mut sources = Sources::new();
        sources.insert(
            "settings".to_string(),
            Some(BTreeMap::from([("PORT".to_string(), "8080".to_string())])),
        );

        let block = source_block(&sources, "configmap", "APP_", "settings", None);
        assert_eq!(block.entries.get("APP_PORT").map(String::as_str), Some("8080"));
    }

    #[test]
    fn test_keyed_value() {
        let mut sources = Sources::new();
        sources.insert(
            "creds".to_string(),
            Some(BTreeMap::from([("user".to_string(), "admin".to_string())])),
        );

        assert_eq!(keyed_value(&sources, "secret", "creds", "user", None), "admin");
        assert_eq!(keyed_value(&sources, "secret", "creds", "missing", None), "");
        assert_eq!(
            keyed_value(&sources, "secret", "absent", "user", None),
            "<secret `absent` not optional and not found>"
        );
        assert_eq!(keyed_value(&sources, "secret", "absent", "user", Some(true)), "");
    }

    fn container_with_resources() -> Container {
        Container {
            name: "app".to_string(),
            resources: Some(ResourceRequirements {
                limits: Some(BTreeMap::from([
                    ("cpu".to_string(), Quantity("500m".to_string())),
                    ("memory".to_string(), Quantity("128Mi".to_string())),
                ])),
                requests: Some(BTreeMap::from([(
                    "cpu".to_string(),
                    Quantity("250m".to_string()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_resource_value_limits_and_requests() {
        let container = container_with_resources();
        let pod = Pod::default();
        let node = Node::default();

        let selector = ResourceFieldSelector {
            resource: "limits.cpu".to_string(),
            divisor: Some(Quantity("1".to_string())),
            ..Default::default()
        };
        // ceil(500m / 1) = 1 whole cpu
        assert_eq!(resource_value(&pod, &node, &container, &selector), "1");

        let requests = ResourceFieldSelector {
            resource: "requests.cpu".to_string(),
            divisor: Some(Quantity("1".to_string())),
            ..Default::default()
        };
        // floor(250m / 1) = 0, clamped to 1
        assert_eq!(resource_value(&pod, &node, &container, &requests), "1");

        let millis = ResourceFieldSelector {
            resource: "requests.cpu".to_string(),
            divisor: Some(Quantity("1m".to_string())),
            ..Default::default()
        };
        assert_eq!(resource_value(&pod, &node, &container, &millis), "250");
    }

    #[test]
    fn test_resource_value_limit_falls_back_to_node() {
        let container = Container {
            name: "app".to_string(),
            ..Default::default()
        };
        let pod = Pod::default();

        let node = Node {
            status: Some(k8s_openapi::api::core::v1::NodeStatus {
                capacity: Some(BTreeMap::from([(
                    "cpu".to_string(),
                    Quantity("8".to_string()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        };

        let selector = ResourceFieldSelector {
            resource: "limits.cpu".to_string(),
            divisor: Some(Quantity("1".to_string())),
            ..Default::default()
        };
        assert_eq!(resource_value(&pod, &node, &container, &selector), "8");
    }

    #[test]
    fn test_unset_request_is_zero() {
        let container = Container::default();
        let selector = ResourceFieldSelector {
            resource: "requests.memory".to_string(),
            divisor: Some(Quantity("1Mi".to_string())),
            ..Default::default()
        };
        assert_eq!(
            resource_value(&Pod::default(), &Node::default(), &container, &selector),
            "0"
        );
    }

    #[test]
    fn test_block_render_sorted() {
        let block = EnvBlock {
            source: "inline".to_string(),
            entries: BTreeMap::from([
                ("ZOO".to_string(), "1".to_string()),
                ("APP".to_string(), "2".to_string()),
            ]),
        };

        let rendered = console::strip_ansi_codes(&block.render()).to_string();
        assert_eq!(rendered, "# inline\nAPP=2\nZOO=1\n");
    }
}
