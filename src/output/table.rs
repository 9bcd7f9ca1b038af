// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Incremental column-aligned table rendering
//!
//! `watch` prints rows as pod events arrive, so the table cannot be laid
//! out up front. Columns start at a default width and only ever grow; a row
//! whose cell exceeds the current width widens the column for every
//! following row.

use std::fmt::Write;

use console::Style;

pub struct Cell {
    content: String,
    style: Option<Style>,
}

impl Cell {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            style: None,
        }
    }

    pub fn colored(content: impl Into<String>, style: &Style) -> Self {
        Self {
            content: content.into(),
            style: Some(style.clone()),
        }
    }
}

pub struct Table {
    widths: Vec<usize>,
}

impl Table {
    pub fn new(default_widths: Vec<usize>) -> Self {
        Self {
            widths: default_widths,
        }
    }

    /// Render one row, growing column widths as needed.
    pub fn format(&mut self, cells: &[Cell]) -> String {
        let mut row = String::new();

        for (i, cell) in cells.iter().enumerate() {
            if i > 0 {
                row.push(' ');
            }

            let content_width = cell.content.len();

            let width = if i >= self.widths.len() {
                self.widths.push(content_width);
                content_width
            } else {
                if content_width > self.widths[i] {
                    self.widths[i] = content_width;
                }
                self.widths[i]
            };

            let padded = format!("{:<width$}", cell.content);
            match &cell.style {
                Some(style) => {
                    let _ = write!(row, "{}", style.apply_to(padded));
                }
                None => row.push_str(&padded),
            }
        }

        row
    }
}
