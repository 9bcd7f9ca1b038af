use std::future::Future;

use anyhow::{Context, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client};
use tracing::error;

use crate::output::{Outputter, Printer};

/// Immutable handle on one cluster: context name, resolved namespace
/// (empty = all namespaces) and a typed client, plus the prefixed output
/// channel for that context. Lives for the duration of the command.
#[derive(Clone)]
pub struct Kube {
    pub name: String,
    pub namespace: String,
    client: Client,
    out: Outputter,
}

impl Kube {
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn out(&self) -> &Outputter {
        &self.out
    }

    /// Api for a namespaced resource in this client's namespace.
    pub fn api<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        self.api_in(&self.namespace)
    }

    /// Api for a namespaced resource in an explicit namespace; empty means
    /// all namespaces.
    pub fn api_in<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        if namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), namespace)
        }
    }

    /// Api for a cluster-scoped resource (nodes, namespaces).
    pub fn cluster_api<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::ClusterResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::all(self.client.clone())
    }

    pub async fn std(&self, message: impl Into<String>) {
        self.out.std(message).await;
    }

    pub async fn warn(&self, message: impl Into<String>) {
        self.out.warn(message).await;
    }

    pub async fn err(&self, message: impl Into<String>) {
        self.out.err(message).await;
    }
}

/// Ordered set of cluster clients, in the user-provided context order.
pub struct ClientSet {
    clients: Vec<Kube>,
}

impl ClientSet {
    /// Build one client per requested context. An empty context list means
    /// the kubeconfig's current context, addressed with an empty name (and
    /// therefore no output prefix).
    pub async fn connect(
        kubeconfig_path: Option<&str>,
        contexts: &[String],
        namespace: Option<&str>,
        all_namespaces: bool,
        printer: &Printer,
    ) -> Result<Self> {
        let kubeconfig = match kubeconfig_path {
            Some(path) => Kubeconfig::read_from(path)
                .with_context(|| format!("read kubeconfig `{path}`"))?,
            None => Kubeconfig::read().context("read kubeconfig")?,
        };

        let mut requested: Vec<String> = contexts.to_vec();
        if requested.is_empty() {
            requested.push(String::new());
        }

        let mut clients = Vec::with_capacity(requested.len());

        for context in requested {
            let options = KubeConfigOptions {
                context: (!context.is_empty()).then(|| context.clone()),
                ..Default::default()
            };

            let config = kube::Config::from_custom_kubeconfig(kubeconfig.clone(), &options)
                .await
                .with_context(|| match context.as_str() {
                    "" => "load current context".to_string(),
                    name => format!("load context `{name}`"),
                })?;

            let resolved_namespace = if all_namespaces {
                String::new()
            } else {
                match namespace {
                    Some(ns) => ns.to_string(),
                    None => config.default_namespace.clone(),
                }
            };

            let client = Client::try_from(config)
                .with_context(|| format!("create client for context `{context}`"))?;

            clients.push(Kube {
                out: printer.outputter(&context),
                name: context,
                namespace: resolved_namespace,
                client,
            });
        }

        Ok(Self { clients })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Kube> {
        self.clients.iter()
    }

    /// Fan an action out across every cluster and wait for all of them.
    ///
    /// Each cluster runs in its own task; an error from one is reported on
    /// that cluster's error channel and never cancels its siblings, so a
    /// broken context (expired auth, unreachable API) cannot hide results
    /// from working ones. Panics are caught at the task boundary.
    pub async fn execute<F, Fut>(&self, action: F)
    where
        F: Fn(Kube) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let mut tasks = Vec::with_capacity(self.clients.len());

        for kube in &self.clients {
            tasks.push((kube.clone(), tokio::spawn(action(kube.clone()))));
        }

        for (kube, task) in tasks {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => kube.err(format!("{err:#}")).await,
                Err(join_err) if join_err.is_panic() => {
                    let payload = join_err.into_panic();
                    let message = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic payload".to_string());

                    error!(cluster = %kube.name, panic = %message, "cluster task panicked");
                    kube.err(format!("panic: {message}")).await;
                }
                // Cancelled at shutdown; nothing to report.
                Err(_) => {}
            }
        }
    }
}
