// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Port-forward engine: watcher events to per-pod tunnels behind the pool
//!
//! Each eligible pod gets a worker that binds an ephemeral local listener,
//! registers it as a pool backend and opens one API port-forward tunnel per
//! accepted connection. Eligibility: the pod exposes the resolved port and,
//! when the exposing container declares a readiness probe, its status is
//! Ready. Pods leaving that state are torn down and drop out of the pool.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use k8s_openapi::api::core::v1::{Pod, Service, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::WatchEvent;
use kube::{Api, ResourceExt};
use tokio::io::copy_bidirectional;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::kubernetes::watcher::PodWatcher;
use crate::kubernetes::{Kube, ResourceKind};
use crate::output::{BLUE, GREEN};
use crate::tcpool::Pool;

pub struct Forwarder {
    pub kind: ResourceKind,
    pub name: String,
    pub remote_port: String,
    pub pool: Arc<Pool>,
    pub limit: usize,
    pub dry_run: bool,
}

impl Forwarder {
    pub async fn run(self: Arc<Self>, kube: Kube, token: CancellationToken) -> Result<()> {
        let mut remote_port = self.remote_port.clone();

        // Service specs name a service port; pods expose the target port.
        if self.kind.is_service() {
            remote_port = service_target_port(&kube, &self.name, &remote_port).await?;
        }

        let mut watcher = PodWatcher::start(
            kube.clone(),
            Some((self.kind, self.name.as_str())),
            &[],
            self.dry_run,
        )
        .await?;

        let semaphore = (self.limit > 0).then(|| Arc::new(Semaphore::new(self.limit)));
        let mut active: HashMap<String, CancellationToken> = HashMap::new();
        let mut workers = JoinSet::new();

        loop {
            tokio::select! {
                _ = token.cancelled() => break,

                event = watcher.next() => {
                    let Some(event) = event else { break };

                    let (deleted, pod) = match event {
                        WatchEvent::Added(pod) | WatchEvent::Modified(pod) => (false, pod),
                        WatchEvent::Deleted(pod) => (true, pod),
                        WatchEvent::Error(status) => {
                            kube.err(format!("watch error: {}", status.message)).await;
                            continue;
                        }
                        WatchEvent::Bookmark(_) => continue,
                    };

                    let uid = pod.uid().unwrap_or_default();
                    let pod_name = pod.name_any();

                    let Some(pod_port) = resolve_pod_port(&pod, &remote_port) else {
                        kube.err(format!("port `{remote_port}` not found on pod `{pod_name}`"))
                            .await;
                        if let Some(stop) = active.remove(&uid) {
                            stop.cancel();
                        }
                        continue;
                    };

                    let phase = pod_phase(&pod);
                    let gone = deleted || phase == "Succeeded" || phase == "Failed";

                    if gone || !port_ready(&pod, pod_port) {
                        if let Some(stop) = active.remove(&uid) {
                            stop.cancel();
                        }
                        continue;
                    }

                    if active.contains_key(&uid) || phase != "Running" {
                        continue;
                    }

                    let Ok(pod_port) = u16::try_from(pod_port) else {
                        kube.err(format!("invalid container port `{pod_port}`")).await;
                        continue;
                    };

                    let stop = token.child_token();
                    active.insert(uid, stop.clone());

                    let forwarder = Arc::clone(&self);
                    let kube = kube.clone();
                    let namespace = pod.namespace().unwrap_or_else(|| kube.namespace.clone());
                    let semaphore = semaphore.clone();

                    workers.spawn(async move {
                        forwarder
                            .forward_pod(kube, namespace, pod_name, pod_port, stop, semaphore)
                            .await;
                    });
                }
            }
        }

        watcher.stop();

        for (_, stop) in active.drain() {
            stop.cancel();
        }
        while workers.join_next().await.is_some() {}

        Ok(())
    }

    /// One pod's forwarding lifetime: permit, ephemeral listener, pool
    /// membership, tunnels.
    async fn forward_pod(
        &self,
        kube: Kube,
        namespace: String,
        pod_name: String,
        pod_port: u16,
        stop: CancellationToken,
        semaphore: Option<Arc<Semaphore>>,
    ) {
        let _permit = match semaphore {
            Some(semaphore) => {
                tokio::select! {
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(permit) => Some(permit),
                        Err(_) => return,
                    },
                    _ = stop.cancelled() => return,
                }
            }
            None => None,
        };

        let listener = match TcpListener::bind(("127.0.0.1", 0)).await {
            Ok(listener) => listener,
            Err(err) => {
                kube.err(format!("get free port: {err}")).await;
                return;
            }
        };

        let backend = match listener.local_addr() {
            Ok(addr) => format!("127.0.0.1:{}", addr.port()),
            Err(err) => {
                kube.err(format!("read local address: {err}")).await;
                return;
            }
        };

        kube.std(format!(
            "Forwarding from {} to {}...",
            BLUE.apply_to(&backend),
            GREEN.apply_to(format!("{pod_name}:{pod_port}"))
        ))
        .await;

        if self.dry_run {
            return;
        }

        self.pool.add(backend.clone());

        let api: Api<Pod> = kube.api_in(&namespace);

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,

                accepted = listener.accept() => {
                    match accepted {
                        Ok((conn, _)) => {
                            tokio::spawn(tunnel(
                                api.clone(),
                                pod_name.clone(),
                                pod_port,
                                conn,
                                kube.clone(),
                                stop.clone(),
                            ));
                        }
                        Err(err) => {
                            kube.err(format!("listener accept: {err}")).await;
                        }
                    }
                }
            }
        }

        self.pool.remove(&backend);
        kube.warn(format!("Forwarding to {pod_name} ended.")).await;
    }
}

/// Relay one local connection through an API port-forward tunnel.
async fn tunnel(
    api: Api<Pod>,
    pod_name: String,
    port: u16,
    mut conn: TcpStream,
    kube: Kube,
    stop: CancellationToken,
) {
    let mut forwarder = match api.portforward(&pod_name, &[port]).await {
        Ok(forwarder) => forwarder,
        Err(err) => {
            kube.err(format!("port-forward for {pod_name} failed: {err}"))
                .await;
            return;
        }
    };

    let Some(mut upstream) = forwarder.take_stream(port) else {
        kube.err(format!("port-forward for {pod_name}: no stream for port {port}"))
            .await;
        return;
    };

    tokio::select! {
        _ = stop.cancelled() => {}

        // Copy errors are expected when either side closes during
        // shutdown.
        copied = copy_bidirectional(&mut conn, &mut upstream) => {
            if let Err(err) = copied {
                debug!(pod = %pod_name, error = %err, "tunnel closed");
            }
        }
    }

    drop(upstream);
    if let Err(err) = forwarder.join().await {
        debug!(pod = %pod_name, error = %err, "port-forward ended");
    }
}

/// Resolve a service port spec (name or number) to the target port pods
/// actually expose. Rejects selector-less (headless/external) services.
async fn service_target_port(kube: &Kube, name: &str, port_spec: &str) -> Result<String> {
    let service: Service = kube.api().get(name).await.context("get service")?;
    let spec = service
        .spec
        .ok_or_else(|| anyhow!("service `{name}` has no spec"))?;

    if !spec.selector.as_ref().is_some_and(|s| !s.is_empty()) {
        bail!("service `{name}` has no selector");
    }

    Ok(target_port_of(&spec, port_spec).unwrap_or_else(|| port_spec.to_string()))
}

fn target_port_of(spec: &ServiceSpec, port_spec: &str) -> Option<String> {
    for port in spec.ports.iter().flatten() {
        if port.name.as_deref() == Some(port_spec) || port.port.to_string() == port_spec {
            return Some(match &port.target_port {
                Some(IntOrString::Int(target)) => target.to_string(),
                Some(IntOrString::String(target)) => target.clone(),
                None => port.port.to_string(),
            });
        }
    }

    None
}

/// Container port the requested name or number maps to, if this pod
/// exposes it.
fn resolve_pod_port(pod: &Pod, remote_port: &str) -> Option<i32> {
    let numeric: Option<i32> = remote_port.parse().ok();
    let spec = pod.spec.as_ref()?;

    for container in &spec.containers {
        for port in container.ports.iter().flatten() {
            if numeric == Some(port.container_port) || port.name.as_deref() == Some(remote_port) {
                return Some(port.container_port);
            }
        }
    }

    None
}

/// Readiness gate: a readiness probe on the exposing container must report
/// Ready; without a probe the container counts as ready.
fn port_ready(pod: &Pod, port: i32) -> bool {
    let Some(spec) = &pod.spec else { return false };

    let Some(container) = spec
        .containers
        .iter()
        .find(|container| {
            container
                .ports
                .iter()
                .flatten()
                .any(|container_port| container_port.container_port == port)
        })
    else {
        return false;
    };

    if container.readiness_probe.is_none() {
        return true;
    }

    pod.status
        .as_ref()
        .and_then(|status| status.container_statuses.as_ref())
        .into_iter()
        .flatten()
        .find(|status| status.name == container.name)
        .is_some_and(|status| status.ready)
}

fn pod_phase(pod: &Pod) -> String {
    pod.status
        .as_ref()
        .and_then(|status| status.phase.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        Container, ContainerPort, ContainerStatus, PodSpec, PodStatus, Probe, ServicePort,
    };

    fn pod_with_port(name: &str, port: i32, probe: bool, ready: Option<bool>) -> Pod {
        Pod {
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "app".to_string(),
                    ports: Some(vec![ContainerPort {
                        container_port: port,
                        name: (!name.is_empty()).then(|| name.to_string()),
                        ..Default::default()
                    }]),
                    readiness_probe: probe.then(Probe::default),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            status: ready.map(|ready| PodStatus {
                container_statuses: Some(vec![ContainerStatus {
                    name: "app".to_string(),
                    ready,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_pod_port_numeric() {
        let pod = pod_with_port("", 8080, false, None);
        assert_eq!(resolve_pod_port(&pod, "8080"), Some(8080));
        assert_eq!(resolve_pod_port(&pod, "9090"), None);
    }

    #[test]
    fn test_resolve_pod_port_by_name() {
        let pod = pod_with_port("http", 8080, false, None);
        assert_eq!(resolve_pod_port(&pod, "http"), Some(8080));
        assert_eq!(resolve_pod_port(&pod, "grpc"), None);
    }

    #[test]
    fn test_port_ready_without_probe() {
        let pod = pod_with_port("", 8080, false, None);
        assert!(port_ready(&pod, 8080));
    }

    #[test]
    fn test_port_ready_with_probe_follows_status() {
        let not_ready = pod_with_port("", 8080, true, Some(false));
        assert!(!port_ready(&not_ready, 8080));

        let ready = pod_with_port("", 8080, true, Some(true));
        assert!(port_ready(&ready, 8080));

        // Probe declared but no status reported yet.
        let no_status = pod_with_port("", 8080, true, None);
        assert!(!port_ready(&no_status, 8080));
    }

    #[test]
    fn test_port_ready_unexposed_port() {
        let pod = pod_with_port("", 8080, false, None);
        assert!(!port_ready(&pod, 9090));
    }

    fn service_spec() -> ServiceSpec {
        ServiceSpec {
            ports: Some(vec![
                ServicePort {
                    name: Some("http".to_string()),
                    port: 80,
                    target_port: Some(IntOrString::Int(8080)),
                    ..Default::default()
                },
                ServicePort {
                    name: Some("metrics".to_string()),
                    port: 9100,
                    target_port: Some(IntOrString::String("telemetry".to_string())),
                    ..Default::default()
                },
                ServicePort {
                    port: 443,
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }
    }

    #[test]
    fn test_target_port_by_name_and_number() {
        let spec = service_spec();

        assert_eq!(target_port_of(&spec, "http").as_deref(), Some("8080"));
        assert_eq!(target_port_of(&spec, "80").as_deref(), Some("8080"));
        // Named target port stays a name, to be resolved per pod.
        assert_eq!(target_port_of(&spec, "metrics").as_deref(), Some("telemetry"));
        // No target port falls back to the service port.
        assert_eq!(target_port_of(&spec, "443").as_deref(), Some("443"));
        // Unknown specs pass through unresolved.
        assert_eq!(target_port_of(&spec, "8443"), None);
    }
}
