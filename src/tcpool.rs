// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Round-robin TCP pool in front of the per-pod port-forwards
//!
//! One local listener accepts connections and relays each to a backend
//! picked round-robin from a set that grows and shrinks as forwarded pods
//! come and go. With no backends the accepted connection is closed
//! immediately.

use std::sync::{Arc, Mutex};

use tokio::io::copy_bidirectional;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::output::Outputter;

#[derive(Default)]
struct Backends {
    addrs: Vec<String>,
    current: usize,
}

#[derive(Default)]
pub struct Pool {
    backends: Mutex<Backends>,
}

impl Pool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a backend address. Duplicates are ignored.
    pub fn add(&self, backend: impl Into<String>) {
        let backend = backend.into();
        let mut backends = self.backends.lock().expect("pool mutex poisoned");

        if !backends.addrs.contains(&backend) {
            backends.addrs.push(backend);
        }
    }

    /// Drop a backend address. The rotating index is clamped so it stays
    /// in bounds for the shrunk set.
    pub fn remove(&self, backend: &str) {
        let mut backends = self.backends.lock().expect("pool mutex poisoned");

        backends.addrs.retain(|addr| addr != backend);

        if backends.current >= backends.addrs.len() {
            backends.current = 0;
        }
    }

    /// Advance the rotation and return the backend under the new index,
    /// or `None` when the set is empty.
    fn next(&self) -> Option<String> {
        let mut backends = self.backends.lock().expect("pool mutex poisoned");

        if backends.addrs.is_empty() {
            return None;
        }

        backends.current = (backends.current + 1) % backends.addrs.len();
        Some(backends.addrs[backends.current].clone())
    }

    /// Accept loop on `127.0.0.1:<local_port>`. Returns when the token is
    /// cancelled; awaiting this call is the caller's shutdown barrier.
    pub async fn serve(self: Arc<Self>, token: CancellationToken, local_port: u16, out: Outputter) {
        let listener = match TcpListener::bind(("127.0.0.1", local_port)).await {
            Ok(listener) => listener,
            Err(err) => {
                out.err(format!("listen on 127.0.0.1:{local_port}: {err}")).await;
                return;
            }
        };

        loop {
            tokio::select! {
                _ = token.cancelled() => return,

                accepted = listener.accept() => {
                    let conn = match accepted {
                        Ok((conn, _)) => conn,
                        Err(err) => {
                            out.err(format!("listener accept: {err}")).await;
                            continue;
                        }
                    };

                    match self.next() {
                        Some(backend) => {
                            tokio::spawn(relay(conn, backend, out.clone(), token.clone()));
                        }
                        // No live forwards: refuse by closing.
                        None => drop(conn),
                    }
                }
            }
        }
    }
}

async fn relay(mut conn: TcpStream, backend: String, out: Outputter, token: CancellationToken) {
    let mut upstream = match TcpStream::connect(&backend).await {
        Ok(upstream) => upstream,
        Err(err) => {
            out.err(format!("dial {backend}: {err}")).await;
            return;
        }
    };

    tokio::select! {
        _ = token.cancelled() => {}

        // Errors here are almost always one side going away during
        // shutdown.
        copied = copy_bidirectional(&mut conn, &mut upstream) => {
            if let Err(err) = copied {
                debug!(backend = %backend, error = %err, "relay closed");
            }
        }
    }
}
