// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Resource kinds and their CLI aliases
//!
//! Commands take a loose resource kind (`deploy`, `deployments`, ...) and a
//! name. The alias table below is process-constant; everything downstream
//! dispatches on the canonical [`ResourceKind`] so unhandled kinds fail at
//! the parse boundary instead of deep inside a command.

use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    CronJob,
    DaemonSet,
    Deployment,
    Job,
    Pod,
    ReplicaSet,
    StatefulSet,
    Service,
    Namespace,
    Node,
}

impl ResourceKind {
    /// Canonical lowercase singular name, as used in error messages.
    pub fn name(self) -> &'static str {
        match self {
            Self::CronJob => "cronjob",
            Self::DaemonSet => "daemonset",
            Self::Deployment => "deployment",
            Self::Job => "job",
            Self::Pod => "pod",
            Self::ReplicaSet => "replicaset",
            Self::StatefulSet => "statefulset",
            Self::Service => "service",
            Self::Namespace => "namespace",
            Self::Node => "node",
        }
    }

    pub fn is_service(self) -> bool {
        self == Self::Service
    }
}

impl FromStr for ResourceKind {
    type Err = anyhow::Error;

    fn from_str(kind: &str) -> Result<Self, Self::Err> {
        match kind.to_ascii_lowercase().as_str() {
            "cj" | "cronjob" | "cronjobs" => Ok(Self::CronJob),
            "ds" | "daemonset" | "daemonsets" => Ok(Self::DaemonSet),
            "deploy" | "deployment" | "deployments" => Ok(Self::Deployment),
            "job" | "jobs" => Ok(Self::Job),
            "po" | "pod" | "pods" => Ok(Self::Pod),
            "rs" | "replicaset" | "replicasets" => Ok(Self::ReplicaSet),
            "sts" | "statefulset" | "statefulsets" => Ok(Self::StatefulSet),
            "svc" | "service" | "services" => Ok(Self::Service),
            "ns" | "namespace" | "namespaces" => Ok(Self::Namespace),
            "no" | "node" | "nodes" => Ok(Self::Node),
            _ => Err(anyhow!("unhandled resource type `{kind}`")),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases_resolve() {
        for (alias, kind) in [
            ("cj", ResourceKind::CronJob),
            ("cronjobs", ResourceKind::CronJob),
            ("ds", ResourceKind::DaemonSet),
            ("deploy", ResourceKind::Deployment),
            ("Deployment", ResourceKind::Deployment),
            ("deployments", ResourceKind::Deployment),
            ("jobs", ResourceKind::Job),
            ("po", ResourceKind::Pod),
            ("rs", ResourceKind::ReplicaSet),
            ("sts", ResourceKind::StatefulSet),
            ("svc", ResourceKind::Service),
            ("ns", ResourceKind::Namespace),
            ("no", ResourceKind::Node),
        ] {
            assert_eq!(alias.parse::<ResourceKind>().unwrap(), kind, "alias {alias}");
        }
    }

    #[test]
    fn test_canonical_name_roundtrips() {
        for kind in [
            ResourceKind::CronJob,
            ResourceKind::DaemonSet,
            ResourceKind::Deployment,
            ResourceKind::Job,
            ResourceKind::Pod,
            ResourceKind::ReplicaSet,
            ResourceKind::StatefulSet,
            ResourceKind::Service,
            ResourceKind::Namespace,
            ResourceKind::Node,
        ] {
            assert_eq!(kind.name().parse::<ResourceKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let err = "ingress".parse::<ResourceKind>().unwrap_err();
        assert!(err.to_string().contains("unhandled resource type"));
    }
}
