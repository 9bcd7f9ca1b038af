// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Log engine: pod watcher events to per-pod log streamers
//!
//! The watcher consumer owns the pod-UID -> cancellation registry and is
//! its only writer, so "at most one active streamer per pod" needs no
//! cross-task coordination. Running pods get a following streamer,
//! terminal pods a one-shot fetch; DELETED/ERROR events and terminal
//! transitions cancel the pod's workers without touching siblings.

pub mod color;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::{AsyncBufReadExt, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{LogParams, WatchEvent};
use kube::{Api, ResourceExt};
use regex::Regex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::kubernetes::watcher::PodWatcher;
use crate::kubernetes::{Kube, ResourceKind};
use crate::output::{GREEN, Outputter, YELLOW};

use color::{Severity, classify, highlight_all, render};

pub struct Logger {
    pub target: Option<(ResourceKind, String)>,
    pub selector: Vec<String>,
    pub since_seconds: i64,
    pub container: Option<Regex>,
    pub greps: Vec<Regex>,
    pub invert_grep: bool,
    pub color_keys: Vec<String>,
    pub severity_filter: Option<Severity>,
    pub dry_run: bool,
    pub no_follow: bool,
    pub raw_output: bool,
}

impl Logger {
    pub async fn run(self: Arc<Self>, kube: Kube, token: CancellationToken) -> Result<()> {
        let target = self
            .target
            .as_ref()
            .map(|(kind, name)| (*kind, name.as_str()));

        // Both dry-run and no-follow work from a single list instead of a
        // live watch.
        let mut watcher = PodWatcher::start(
            kube.clone(),
            target,
            &self.selector,
            self.dry_run || self.no_follow,
        )
        .await
        .context("watch pods")?;

        let mut active: HashMap<String, CancellationToken> = HashMap::new();
        let mut streams = JoinSet::new();

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
                    let phase = pod_phase(&pod);
                    let terminal = phase == "Succeeded" || phase == "Failed";

                    if deleted || terminal {
                        if let Some(cancel) = active.remove(&uid) {
                            cancel.cancel();
                        } else if terminal {
                            // Pod finished before we ever streamed it:
                            // fetch its logs once.
                            Self::handle_pod(&self, &kube, pod, &mut active, &mut streams, &token)
                                .await;
                        }

                        continue;
                    }

                    if active.contains_key(&uid) || phase == "Pending" {
                        continue;
                    }

                    Self::handle_pod(&self, &kube, pod, &mut active, &mut streams, &token).await;
                }
            }
        }

        watcher.stop();

        while streams.join_next().await.is_some() {}

        Ok(())
    }

    /// Start a worker per selected container of this pod. All containers
    /// of one pod share a single derived token, registered under the pod
    /// UID, so one teardown stops them together.
    async fn handle_pod(
        logger: &Arc<Self>,
        kube: &Kube,
        pod: Pod,
        active: &mut HashMap<String, CancellationToken>,
        streams: &mut JoinSet<()>,
        token: &CancellationToken,
    ) {
        let pod_name = pod.name_any();
        let namespace = pod
            .namespace()
            .unwrap_or_else(|| kube.namespace.clone());
        let running = pod_phase(&pod) == "Running";

        let pod_token = token.child_token();
        let mut registered = false;

        for container in container_names(&pod) {
            if let Some(filter) = &logger.container {
                if !filter.is_match(&container) {
                    continue;
                }
            }

            if logger.dry_run {
                kube.std(format!(
                    "{} {}",
                    GREEN.apply_to(format!("[{pod_name}/{container}]")),
                    YELLOW.apply_to("Found!")
                ))
                .await;
                continue;
            }

            let logger = Arc::clone(logger);
            let kube = kube.clone();
            let pod_name = pod_name.clone();
            let namespace = namespace.clone();

            if running {
                if !registered {
                    active.insert(pod.uid().unwrap_or_default(), pod_token.clone());
                    registered = true;
                }

                let pod_token = pod_token.clone();
                streams.spawn(async move {
                    logger
                        .stream_container(kube, namespace, pod_name, container, pod_token)
                        .await;
                });
            } else {
                streams.spawn(async move {
                    logger
                        .fetch_container(kube, namespace, pod_name, container)
                        .await;
                });
            }
        }
    }

    /// One-shot raw fetch for pods that are not (or no longer) running.
    async fn fetch_container(
        &self,
        kube: Kube,
        namespace: String,
        pod_name: String,
        container: String,
    ) {
        let api: Api<Pod> = kube.api_in(&namespace);
        let params = LogParams {
            container: Some(container.clone()),
            since_seconds: Some(self.since_seconds),
            ..Default::default()
        };

        let content = match api.logs(&pod_name, &params).await {
            Ok(content) => content,
            Err(err) => {
                kube.err(format!("get logs: {err}")).await;
                return;
            }
        };

        let out = self.container_outputter(&kube, &pod_name, &container);

        if !self.raw_output {
            out.warn("Log...").await;
        }

        for line in content.lines() {
            if let Some(rendered) = self.process_line(line) {
                out.std(rendered).await;
            }
        }

        if !self.raw_output {
            out.warn("Log ended.").await;
        }
    }

    /// Follow one container's log stream until it ends or the pod is torn
    /// down.
    async fn stream_container(
        &self,
        kube: Kube,
        namespace: String,
        pod_name: String,
        container: String,
        stop: CancellationToken,
    ) {
        let api: Api<Pod> = kube.api_in(&namespace);
        let params = LogParams {
            follow: !self.no_follow,
            container: Some(container.clone()),
            since_seconds: Some(self.since_seconds),
            ..Default::default()
        };

        let stream = match api.log_stream(&pod_name, &params).await {
            Ok(stream) => stream,
            Err(err) => {
                kube.err(format!("stream logs: {err}")).await;
                return;
            }
        };

        let out = self.container_outputter(&kube, &pod_name, &container);

        if !self.raw_output {
            out.warn("Log...").await;
        }

        let mut lines = stream.lines();

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,

                line = lines.try_next() => match line {
                    Ok(Some(line)) => {
                        if let Some(rendered) = self.process_line(&line) {
                            out.std(rendered).await;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        kube.err(format!("read logs: {err}")).await;
                        break;
                    }
                }
            }
        }

        if !self.raw_output {
            out.warn("Log ended.").await;
        }
    }

    fn container_outputter(&self, kube: &Kube, pod_name: &str, container: &str) -> Outputter {
        kube.out().child(
            self.raw_output,
            &GREEN
                .apply_to(format!("[{pod_name}/{container}]"))
                .to_string(),
        )
    }

    /// Line pipeline: classify, severity-filter, grep, render. Returns
    /// `None` when the line is dropped.
    fn process_line(&self, line: &str) -> Option<String> {
        let severity = classify(line, &self.color_keys);

        // Drop lines strictly more severe than the threshold.
        if let Some(filter) = self.severity_filter {
            if severity > filter {
                return None;
            }
        }

        if self.greps.is_empty() {
            return Some(render(line, severity));
        }

        let matched = self.greps.iter().any(|grep| grep.is_match(line));
        if matched == self.invert_grep {
            return None;
        }

        if self.invert_grep {
            // Nothing to highlight on a line kept for not matching.
            return Some(render(line, severity));
        }

        Some(highlight_all(line, &self.greps, severity))
    }
}

fn pod_phase(pod: &Pod) -> String {
    pod.status
        .as_ref()
        .and_then(|status| status.phase.clone())
        .unwrap_or_default()
}

/// Init containers first, then regular containers: both stream.
fn container_names(pod: &Pod) -> Vec<String> {
    let Some(spec) = &pod.spec else {
        return Vec::new();
    };

    spec.init_containers
        .iter()
        .flatten()
        .chain(spec.containers.iter())
        .map(|container| container.name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, PodSpec, PodStatus};

    fn logger(greps: Vec<Regex>, invert: bool, filter: Option<Severity>) -> Logger {
        Logger {
            target: None,
            selector: Vec::new(),
            since_seconds: 3600,
            container: None,
            greps,
            invert_grep: invert,
            color_keys: vec!["level".to_string(), "status".to_string()],
            severity_filter: filter,
            dry_run: false,
            no_follow: false,
            raw_output: true,
        }
    }

    #[test]
    fn test_process_line_severity_filter_drops_more_severe() {
        let logger = logger(Vec::new(), false, Some(Severity::Warn));

        // Error exceeds the Warn threshold and is dropped.
        assert!(logger.process_line(r#"{"level":"error"}"#).is_none());
        // Warn and below pass.
        assert!(logger.process_line(r#"{"level":"warn"}"#).is_some());
        assert!(logger.process_line("plain info line").is_some());
        assert!(logger.process_line(r#"{"level":"debug"}"#).is_some());
    }

    #[test]
    fn test_process_line_grep() {
        let logger = logger(vec![Regex::new("needle").unwrap()], false, None);

        assert!(logger.process_line("with needle inside").is_some());
        assert!(logger.process_line("nothing to see").is_none());
    }

    #[test]
    fn test_process_line_grep_inverted() {
        let logger = logger(vec![Regex::new("needle").unwrap()], true, None);

        assert!(logger.process_line("with needle inside").is_none());
        assert!(logger.process_line("nothing to see").is_some());
    }

    #[test]
    fn test_process_line_multiple_greps_any_match() {
        let logger = logger(
            vec![Regex::new("alpha").unwrap(), Regex::new("beta").unwrap()],
            false,
            None,
        );

        assert!(logger.process_line("beta only").is_some());
        assert!(logger.process_line("gamma only").is_none());
    }

    #[test]
    fn test_container_names_include_init_containers() {
        let pod = Pod {
            spec: Some(PodSpec {
                init_containers: Some(vec![Container {
                    name: "init-db".to_string(),
                    ..Default::default()
                }]),
                containers: vec![
                    Container {
                        name: "app".to_string(),
                        ..Default::default()
                    },
                    Container {
                        name: "sidecar".to_string(),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }),
            ..Default::default()
        };

        assert_eq!(container_names(&pod), vec!["init-db", "app", "sidecar"]);
        assert!(container_names(&Pod::default()).is_empty());
    }

    #[test]
    fn test_pod_phase() {
        let pod = Pod {
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        assert_eq!(pod_phase(&pod), "Running");
        assert_eq!(pod_phase(&Pod::default()), "");
    }
}
