// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Serialised, prefixed output for multiplexed commands
//!
//! Every cluster (and every pod/container under it) writes through an
//! [`Outputter`] that tags messages with a prefix such as `[prod] ` or
//! `[prod] [web-0/nginx] `. All outputters feed one bounded channel drained
//! by a single printer task, so a logical message is always printed
//! atomically (prefix + body + newline) even when many streams emit at once.

pub mod table;

use std::io::Write;
use std::sync::LazyLock;

use console::Style;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub static BLUE: LazyLock<Style> = LazyLock::new(|| Style::new().blue());
pub static GREEN: LazyLock<Style> = LazyLock::new(|| Style::new().green());
pub static YELLOW: LazyLock<Style> = LazyLock::new(|| Style::new().yellow());
pub static RED: LazyLock<Style> = LazyLock::new(|| Style::new().red());
pub static CYAN: LazyLock<Style> = LazyLock::new(|| Style::new().cyan());
pub static MAGENTA: LazyLock<Style> = LazyLock::new(|| Style::new().magenta());

/// Buffered messages between emitters and the printer task. Small on
/// purpose: emitters block once the terminal stops keeping up.
const CHANNEL_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Stdout,
    Stderr,
}

struct Event {
    target: Target,
    prefix: String,
    message: String,
}

/// Owner of the printer task. Dropping every [`Outputter`] clone and then
/// calling [`Printer::close`] drains remaining events before returning.
pub struct Printer {
    tx: mpsc::Sender<Event>,
    handle: JoinHandle<()>,
}

impl Printer {
    pub fn start() -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let handle = tokio::spawn(print_loop(rx));

        Self { tx, handle }
    }

    /// Outputter for a cluster context. An empty context name (single,
    /// current-context invocations) gets no prefix at all.
    pub fn outputter(&self, context: &str) -> Outputter {
        let prefix = if context.is_empty() {
            String::new()
        } else {
            format!("{} ", BLUE.apply_to(format!("[{context}]")))
        };

        Outputter {
            tx: self.tx.clone(),
            prefix,
        }
    }

    /// Close the channel and wait for the printer task to drain it.
    pub async fn close(self) {
        drop(self.tx);
        let _ = self.handle.await;
    }
}

async fn print_loop(mut rx: mpsc::Receiver<Event>) {
    while let Some(event) = rx.recv().await {
        let message = event.message.trim_end_matches('\n');

        match event.target {
            Target::Stdout => write_lines(&mut std::io::stdout().lock(), &event.prefix, message),
            Target::Stderr => write_lines(&mut std::io::stderr().lock(), &event.prefix, message),
        }
    }
}

fn write_lines(writer: &mut impl Write, prefix: &str, message: &str) {
    for line in message.split('\n') {
        let _ = writeln!(writer, "{prefix}{line}");
    }
}

/// Prefixed handle onto the shared printer.
#[derive(Clone)]
pub struct Outputter {
    tx: mpsc::Sender<Event>,
    prefix: String,
}

impl Outputter {
    /// Derive an outputter with an extra prefix segment, e.g. a
    /// `[pod/container]` tag under the cluster tag. With `raw` set the
    /// child drops every prefix, for verbatim log piping.
    pub fn child(&self, raw: bool, prefix: &str) -> Outputter {
        let prefix = if raw {
            String::new()
        } else {
            format!("{}{} ", self.prefix, prefix)
        };

        Outputter {
            tx: self.tx.clone(),
            prefix,
        }
    }

    async fn send(&self, target: Target, message: String) {
        let _ = self
            .tx
            .send(Event {
                target,
                prefix: self.prefix.clone(),
                message,
            })
            .await;
    }

    pub async fn std(&self, message: impl Into<String>) {
        self.send(Target::Stdout, message.into()).await;
    }

    pub async fn warn(&self, message: impl Into<String>) {
        let message = YELLOW.apply_to(message.into()).to_string();
        self.send(Target::Stderr, message).await;
    }

    pub async fn err(&self, message: impl Into<String>) {
        let message = RED.apply_to(message.into()).to_string();
        self.send(Target::Stderr, message).await;
    }
}
