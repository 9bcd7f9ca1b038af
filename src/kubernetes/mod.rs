// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Kubernetes integration: clients, kinds, resolution, watching, env

pub mod client;
pub mod env;
pub mod kind;
pub mod quantity;
pub mod resources;
pub mod watcher;

pub use client::{ClientSet, Kube};
pub use kind::ResourceKind;
