// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Pod watcher with dry-run emulation and post-filtering
//!
//! Wraps the cluster watch behind a channel of [`WatchEvent`]s. In dry-run
//! mode a single list is turned into synthetic ADDED events and the stream
//! closes; otherwise the live watch is forwarded, dropping pods rejected by
//! the selection's post-filter. The stream ends when the upstream watch
//! terminates, the root context is cancelled, or [`PodWatcher::stop`] is
//! called.

use anyhow::{Context, Result};
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use kube::api::{WatchEvent, WatchParams};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::client::Kube;
use super::kind::ResourceKind;
use super::resources::{PodSelection, pod_selection};

/// In-flight events between the watch forwarder and the consumer.
const EVENT_BUFFER: usize = 16;

pub struct PodWatcher {
    events: mpsc::Receiver<WatchEvent<Pod>>,
    stop: CancellationToken,
}

impl PodWatcher {
    /// Open a watch on the pods selected by `target` (or the whole
    /// namespace when `target` is `None`), with `extra_labels` appended to
    /// the resolved label selector.
    pub async fn start(
        kube: Kube,
        target: Option<(ResourceKind, &str)>,
        extra_labels: &[String],
        dry_run: bool,
    ) -> Result<Self> {
        let selection = match target {
            Some((kind, name)) => pod_selection(&kube, kind, name)
                .await
                .context("get pod selection")?,
            None => PodSelection {
                namespace: kube.namespace.clone(),
                ..Default::default()
            },
        };

        let mut label_selector = selection.label_selector.clone().unwrap_or_default();
        for label in extra_labels {
            if !label_selector.is_empty() {
                label_selector.push(',');
            }
            label_selector.push_str(label);
        }

        let stop = CancellationToken::new();
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        let api: Api<Pod> = kube.api_in(&selection.namespace);

        if dry_run {
            let mut params = selection.list_params();
            if !label_selector.is_empty() {
                params = params.labels(&label_selector);
            }

            let pods = api.list(&params).await.context("list pods")?;

            tokio::spawn(emit_listed(kube, selection, pods.items, tx));
        } else {
            let mut params = WatchParams::default();
            if !label_selector.is_empty() {
                params = params.labels(&label_selector);
            }
            if let Some(fields) = &selection.field_selector {
                params = params.fields(fields);
            }

            let stream = api.watch(&params, "0").await.context("watch pods")?;

            tokio::spawn(forward_watch(
                kube,
                selection,
                stream.boxed(),
                tx,
                stop.clone(),
            ));
        }

        Ok(Self { events: rx, stop })
    }

    /// Next event, or `None` once the stream has terminated.
    pub async fn next(&mut self) -> Option<WatchEvent<Pod>> {
        self.events.recv().await
    }

    /// Idempotent; closes the derived event channel.
    pub fn stop(&self) {
        self.stop.cancel();
    }
}

impl Drop for PodWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Dry-run: one synthetic ADDED per listed pod passing the post-filter.
async fn emit_listed(
    kube: Kube,
    selection: PodSelection,
    pods: Vec<Pod>,
    tx: mpsc::Sender<WatchEvent<Pod>>,
) {
    for pod in pods {
        if !selection.admits(&kube, &pod).await {
            continue;
        }

        if tx.send(WatchEvent::Added(pod)).await.is_err() {
            return;
        }
    }
}

async fn forward_watch(
    kube: Kube,
    selection: PodSelection,
    mut stream: futures::stream::BoxStream<'static, kube::Result<WatchEvent<Pod>>>,
    tx: mpsc::Sender<WatchEvent<Pod>>,
    stop: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = stop.cancelled() => return,

            next = stream.try_next() => {
                let event = match next {
                    Ok(Some(event)) => event,
                    // Upstream watch terminated.
                    Ok(None) => return,
                    Err(err) => {
                        kube.err(format!("watch: {err}")).await;
                        return;
                    }
                };

                let admitted = match &event {
                    WatchEvent::Added(pod)
                    | WatchEvent::Modified(pod)
                    | WatchEvent::Deleted(pod) => selection.admits(&kube, pod).await,
                    WatchEvent::Bookmark(_) => false,
                    WatchEvent::Error(_) => true,
                };

                if admitted && tx.send(event).await.is_err() {
                    return;
                }
            }
        }
    }
}
