// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! `watch`: kubectl-style incremental pod table per cluster
//!
//! Lists the namespace's pods oldest-first, renders a row per pod, then
//! follows the live watch and appends a row for every pod state not shown
//! yet. The PHASE column carries the kubectl status reason (init progress,
//! waiting/terminated reasons, Terminating) rather than the bare phase.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use console::Style;
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use kube::api::{ListParams, WatchEvent};
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;

use crate::kubernetes::watcher::PodWatcher;
use crate::kubernetes::{ClientSet, Kube};
use crate::output::table::{Cell, Table};
use crate::output::{BLUE, CYAN, GREEN, MAGENTA, RED, YELLOW};

pub struct WatchFlags {
    pub wide: bool,
    pub selector: Vec<String>,
    pub label_columns: Vec<String>,
    pub show_labels: bool,
    pub show_annotations: bool,
    pub all_namespaces: bool,
}

pub async fn run(clients: &ClientSet, token: &CancellationToken, flags: WatchFlags) -> Result<()> {
    let flags = Arc::new(flags);
    let token = token.clone();

    clients
        .execute(move |kube| {
            let flags = Arc::clone(&flags);
            let token = token.clone();
            async move { watch_cluster(kube, flags, token).await }
        })
        .await;

    Ok(())
}

async fn watch_cluster(kube: Kube, flags: Arc<WatchFlags>, token: CancellationToken) -> Result<()> {
    let api: Api<Pod> = kube.api();

    let mut params = ListParams::default();
    let selector = flags.selector.join(",");
    if !selector.is_empty() {
        params = params.labels(&selector);
    }

    let mut pods = api.list(&params).await.context("list pods")?.items;
    pods.sort_by_key(|pod| {
        pod.status
            .as_ref()
            .and_then(|status| status.start_time.as_ref())
            .map(|time| time.0)
    });

    let mut table = Table::new(default_widths(&flags));
    kube.std(table.format(&header_cells(&flags))).await;

    let mut seen: HashSet<(String, String)> = HashSet::new();

    for pod in &pods {
        kube.std(table.format(&pod_row(pod, &flags, Utc::now()))).await;
        seen.insert(pod_key(pod));
    }

    let mut watcher = PodWatcher::start(kube.clone(), None, &flags.selector, false).await?;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,

            event = watcher.next() => {
                let Some(event) = event else { break };

                let pod = match event {
                    WatchEvent::Added(pod)
                    | WatchEvent::Modified(pod)
                    | WatchEvent::Deleted(pod) => pod,
                    WatchEvent::Error(status) => {
                        kube.err(format!("watch error: {}", status.message)).await;
                        continue;
                    }
                    WatchEvent::Bookmark(_) => continue,
                };

                if seen.insert(pod_key(&pod)) {
                    kube.std(table.format(&pod_row(&pod, &flags, Utc::now()))).await;
                }
            }
        }
    }

    watcher.stop();

    Ok(())
}

/// One row per distinct pod state.
fn pod_key(pod: &Pod) -> (String, String) {
    (
        pod.uid().unwrap_or_default(),
        pod.resource_version().unwrap_or_default(),
    )
}

fn default_widths(flags: &WatchFlags) -> Vec<usize> {
    let mut widths = vec![45, 5, 8, 6, 14];

    if flags.all_namespaces {
        widths.insert(0, 15);
    }
    if flags.wide {
        widths.extend([12, 12, 14, 15]);
    }

    widths
}

fn header_cells(flags: &WatchFlags) -> Vec<Cell> {
    let mut cells = Vec::new();

    if flags.all_namespaces {
        cells.push(Cell::new("NAMESPACE"));
    }

    cells.extend([
        Cell::new("NAME"),
        Cell::new("READY"),
        Cell::new("PHASE"),
        Cell::new("AGE"),
        Cell::new("RESTARTS"),
    ]);

    if flags.wide {
        cells.extend([
            Cell::new("IP"),
            Cell::new("NODE"),
            Cell::new("NOMINATED NODE"),
            Cell::new("READINESS GATES"),
        ]);
    }

    for label in &flags.label_columns {
        cells.push(Cell::new(label.to_uppercase()));
    }
    if flags.show_labels {
        cells.push(Cell::new("LABELS"));
    }
    if flags.show_annotations {
        cells.push(Cell::new("ANNOTATIONS"));
    }

    cells
}

fn pod_row(pod: &Pod, flags: &WatchFlags, now: DateTime<Utc>) -> Vec<Cell> {
    let mut cells = Vec::new();

    if flags.all_namespaces {
        cells.push(Cell::new(pod.namespace().unwrap_or_default()));
    }

    let (reason, ready, restarts, last_restart) = pod_status(pod);

    let total = pod
        .status
        .as_ref()
        .and_then(|status| status.container_statuses.as_ref())
        .map_or(0, Vec::len);

    let age = pod
        .status
        .as_ref()
        .and_then(|status| status.start_time.as_ref())
        .map(|start| human_duration(now - start.0))
        .unwrap_or_default();

    let restart_text = match (restarts, last_restart) {
        (0, _) => String::new(),
        (count, Some(at)) => format!("{count} ({} ago)", human_duration(now - at)),
        (count, None) => count.to_string(),
    };

    let phase_style: &Style = match reason.as_str() {
        "Running" | "Succeeded" | "Completed" => &GREEN,
        "Failed" | "Error" | "CrashLoopBackOff" => &RED,
        "Pending" | "ContainerCreating" => &CYAN,
        "Terminating" => &BLUE,
        _ => &YELLOW,
    };

    let ready_style: &Style = if ready == total { &GREEN } else { &YELLOW };

    cells.extend([
        Cell::new(pod.name_any()),
        Cell::colored(format!("{ready}/{total}"), ready_style),
        Cell::colored(reason, phase_style),
        Cell::new(age),
        Cell::colored(restart_text, &MAGENTA),
    ]);

    if flags.wide {
        let (ip, node, nominated, gates) = pod_wide(pod);
        cells.extend([
            Cell::new(ip),
            Cell::new(node),
            Cell::new(nominated),
            Cell::new(gates),
        ]);
    }

    let labels = pod.labels();
    for label in &flags.label_columns {
        cells.push(Cell::new(labels.get(label).cloned().unwrap_or_default()));
    }
    if flags.show_labels {
        cells.push(Cell::new(join_map(labels)));
    }
    if flags.show_annotations {
        cells.push(Cell::new(join_map(pod.annotations())));
    }

    cells
}

fn join_map(entries: &std::collections::BTreeMap<String, String>) -> String {
    if entries.is_empty() {
        return "<none>".to_string();
    }

    entries
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Status reason, ready/restart counters and last restart time, following
/// the upstream kubectl pod printer.
fn pod_status(pod: &Pod) -> (String, usize, u32, Option<DateTime<Utc>>) {
    let status = pod.status.clone().unwrap_or_default();

    let mut reason = status.phase.clone().unwrap_or_default();
    if let Some(status_reason) = &status.reason {
        if !status_reason.is_empty() {
            reason = status_reason.clone();
        }
    }

    let mut ready = 0;
    let mut restarts: u32 = 0;
    let mut last_restart: Option<DateTime<Utc>> = None;
    let mut initializing = false;

    let init_total = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.init_containers.as_ref())
        .map_or(0, Vec::len);

    for (index, container) in status
        .init_container_statuses
        .iter()
        .flatten()
        .enumerate()
    {
        restarts += container.restart_count.max(0) as u32;

        if let Some(terminated) = container
            .last_state
            .as_ref()
            .and_then(|state| state.terminated.as_ref())
        {
            if let Some(finished) = &terminated.finished_at {
                last_restart = Some(last_restart.map_or(finished.0, |at| at.max(finished.0)));
            }
        }

        let state = container.state.as_ref();
        let terminated = state.and_then(|state| state.terminated.as_ref());
        let waiting = state.and_then(|state| state.waiting.as_ref());

        if let Some(terminated) = terminated {
            if terminated.exit_code == 0 {
                continue;
            }

            reason = match terminated.reason.as_deref() {
                Some(term_reason) if !term_reason.is_empty() => format!("Init:{term_reason}"),
                _ => match terminated.signal {
                    Some(signal) if signal != 0 => format!("Init:Signal:{signal}"),
                    _ => format!("Init:ExitCode:{}", terminated.exit_code),
                },
            };
            initializing = true;
        } else if let Some(waiting) = waiting.filter(|waiting| {
            waiting
                .reason
                .as_deref()
                .is_some_and(|wait_reason| !wait_reason.is_empty() && wait_reason != "PodInitializing")
        }) {
            reason = format!("Init:{}", waiting.reason.as_deref().unwrap_or_default());
            initializing = true;
        } else {
            reason = format!("Init:{index}/{init_total}");
            initializing = true;
        }

        break;
    }

    if !initializing {
        restarts = 0;
        let mut has_running = false;

        for container in status.container_statuses.iter().flatten().rev() {
            restarts += container.restart_count.max(0) as u32;

            if let Some(terminated) = container
                .last_state
                .as_ref()
                .and_then(|state| state.terminated.as_ref())
            {
                if let Some(finished) = &terminated.finished_at {
                    last_restart = Some(last_restart.map_or(finished.0, |at| at.max(finished.0)));
                }
            }

            let state = container.state.as_ref();
            let terminated = state.and_then(|state| state.terminated.as_ref());
            let waiting = state.and_then(|state| state.waiting.as_ref());

            if let Some(wait_reason) = waiting.and_then(|waiting| waiting.reason.as_deref()) {
                if !wait_reason.is_empty() {
                    reason = wait_reason.to_string();
                    continue;
                }
            }

            if let Some(terminated) = terminated {
                reason = match terminated.reason.as_deref() {
                    Some(term_reason) if !term_reason.is_empty() => term_reason.to_string(),
                    _ => match terminated.signal {
                        Some(signal) if signal != 0 => format!("Signal:{signal}"),
                        _ => format!("ExitCode:{}", terminated.exit_code),
                    },
                };
                continue;
            }

            if container.ready && state.is_some_and(|state| state.running.is_some()) {
                has_running = true;
                ready += 1;
            }
        }

        // At least one container still running: the pod is not Completed.
        if reason == "Completed" && has_running {
            reason = if pod_ready_condition(pod) {
                "Running".to_string()
            } else {
                "NotReady".to_string()
            };
        }
    }

    if pod.metadata.deletion_timestamp.is_some() {
        reason = if status.reason.as_deref() == Some("NodeLost") {
            "Unknown".to_string()
        } else {
            "Terminating".to_string()
        };
    }

    (reason, ready, restarts, last_restart)
}

fn pod_ready_condition(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .into_iter()
        .flatten()
        .any(|condition| condition.type_ == "Ready" && condition.status == "True")
}

fn pod_wide(pod: &Pod) -> (String, String, String, String) {
    let status = pod.status.as_ref();
    let spec = pod.spec.as_ref();

    let mut ip = status
        .and_then(|status| status.pod_ips.as_ref())
        .and_then(|ips| ips.first())
        .map(|pod_ip| pod_ip.ip.clone())
        .unwrap_or_default();
    if ip.is_empty() {
        ip = "<none>".to_string();
    }

    let mut node = spec
        .and_then(|spec| spec.node_name.clone())
        .unwrap_or_default();
    if node.is_empty() {
        node = "<none>".to_string();
    }

    let mut nominated = status
        .and_then(|status| status.nominated_node_name.clone())
        .unwrap_or_default();
    if nominated.is_empty() {
        nominated = "<none>".to_string();
    }

    let gates = spec
        .and_then(|spec| spec.readiness_gates.as_ref())
        .filter(|gates| !gates.is_empty())
        .map(|gates| {
            let conditions = status
                .and_then(|status| status.conditions.as_ref())
                .map(Vec::as_slice)
                .unwrap_or_default();

            let satisfied = gates
                .iter()
                .filter(|gate| {
                    conditions.iter().any(|condition| {
                        condition.type_ == gate.condition_type && condition.status == "True"
                    })
                })
                .count();

            format!("{satisfied}/{}", gates.len())
        })
        .unwrap_or_else(|| "<none>".to_string());

    (ip, node, nominated, gates)
}

/// Compact age rendering, following the upstream duration formatter.
fn human_duration(duration: Duration) -> String {
    let seconds = duration.num_seconds();

    if seconds < 0 {
        return "0s".to_string();
    }
    if seconds < 60 * 2 {
        return format!("{seconds}s");
    }

    let minutes = duration.num_minutes();
    if minutes < 10 {
        let remainder = seconds % 60;
        if remainder == 0 {
            return format!("{minutes}m");
        }
        return format!("{minutes}m{remainder}s");
    }
    if minutes < 60 * 3 {
        return format!("{minutes}m");
    }

    let hours = duration.num_hours();
    if hours < 8 {
        let remainder = minutes % 60;
        if remainder == 0 {
            return format!("{hours}h");
        }
        return format!("{hours}h{remainder}m");
    }
    if hours < 48 {
        return format!("{hours}h");
    }

    let days = hours / 24;
    if hours < 24 * 8 {
        let remainder = hours % 24;
        if remainder == 0 {
            return format!("{days}d");
        }
        return format!("{days}d{remainder}h");
    }
    if hours < 24 * 365 * 2 {
        return format!("{days}d");
    }

    let years = days / 365;
    if hours < 24 * 365 * 8 {
        let remainder = days % 365;
        if remainder == 0 {
            return format!("{years}y");
        }
        return format!("{years}y{remainder}d");
    }

    format!("{years}y")
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateRunning, ContainerStateTerminated, ContainerStateWaiting,
        ContainerStatus, PodCondition, PodStatus,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn running_container(name: &str, ready: bool, restart_count: i32) -> ContainerStatus {
        ContainerStatus {
            name: name.to_string(),
            ready,
            restart_count,
            state: Some(ContainerState {
                running: Some(ContainerStateRunning::default()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_pod_status_running() {
        let pod = Pod {
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                container_statuses: Some(vec![
                    running_container("app", true, 0),
                    running_container("sidecar", true, 2),
                ]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let (reason, ready, restarts, _) = pod_status(&pod);
        assert_eq!(reason, "Running");
        assert_eq!(ready, 2);
        assert_eq!(restarts, 2);
    }

    #[test]
    fn test_pod_status_waiting_reason_wins() {
        let pod = Pod {
            status: Some(PodStatus {
                phase: Some("Pending".to_string()),
                container_statuses: Some(vec![ContainerStatus {
                    name: "app".to_string(),
                    state: Some(ContainerState {
                        waiting: Some(ContainerStateWaiting {
                            reason: Some("ImagePullBackOff".to_string()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let (reason, ready, _, _) = pod_status(&pod);
        assert_eq!(reason, "ImagePullBackOff");
        assert_eq!(ready, 0);
    }

    #[test]
    fn test_pod_status_init_failure() {
        let pod = Pod {
            status: Some(PodStatus {
                phase: Some("Pending".to_string()),
                init_container_statuses: Some(vec![ContainerStatus {
                    name: "init-db".to_string(),
                    state: Some(ContainerState {
                        terminated: Some(ContainerStateTerminated {
                            exit_code: 1,
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let (reason, _, _, _) = pod_status(&pod);
        assert_eq!(reason, "Init:ExitCode:1");
    }

    #[test]
    fn test_pod_status_completed_with_running_container() {
        let pod = Pod {
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                reason: Some("Completed".to_string()),
                conditions: Some(vec![PodCondition {
                    type_: "Ready".to_string(),
                    status: "True".to_string(),
                    ..Default::default()
                }]),
                container_statuses: Some(vec![running_container("app", true, 0)]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let (reason, _, _, _) = pod_status(&pod);
        assert_eq!(reason, "Running");
    }

    #[test]
    fn test_pod_status_terminating() {
        let mut pod = Pod {
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        pod.metadata.deletion_timestamp = Some(Time(Utc::now()));

        let (reason, _, _, _) = pod_status(&pod);
        assert_eq!(reason, "Terminating");
    }

    #[test]
    fn test_human_duration() {
        assert_eq!(human_duration(Duration::seconds(5)), "5s");
        assert_eq!(human_duration(Duration::seconds(119)), "119s");
        assert_eq!(human_duration(Duration::seconds(125)), "2m5s");
        assert_eq!(human_duration(Duration::minutes(9)), "9m");
        assert_eq!(human_duration(Duration::minutes(45)), "45m");
        assert_eq!(human_duration(Duration::minutes(125)), "125m");
        assert_eq!(human_duration(Duration::hours(5)), "5h");
        assert_eq!(human_duration(Duration::minutes(5 * 60 + 30)), "5h30m");
        assert_eq!(human_duration(Duration::hours(30)), "30h");
        assert_eq!(human_duration(Duration::hours(50)), "2d2h");
        assert_eq!(human_duration(Duration::days(20)), "20d");
        assert_eq!(human_duration(Duration::days(800)), "2y70d");
        assert_eq!(human_duration(Duration::seconds(-3)), "0s");
    }

    #[test]
    fn test_join_map() {
        let mut labels = std::collections::BTreeMap::new();
        assert_eq!(join_map(&labels), "<none>");

        labels.insert("app".to_string(), "web".to_string());
        labels.insert("env".to_string(), "prod".to_string());
        assert_eq!(join_map(&labels), "app=web,env=prod");
    }
}
