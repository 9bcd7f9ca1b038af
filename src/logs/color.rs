// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Log line severity classification and rendering
//!
//! A line starting with `{` is probed as a one-level JSON object: walking
//! the object in document order, the first property matching any
//! configured key decides the bucket, either from a level string
//! (`error`/`critical`/`fatal`, `warn`/`warning`, `trace`/`debug`) or from
//! an HTTP status number (>=500, >=400, >=300). Everything else is Info.

use console::Style;
use regex::Regex;
use serde_json::Value;

use crate::output::{GREEN, RED, YELLOW};

/// Severity buckets, ordered. `Error > Warn > Info > Debug` holds through
/// the derived `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

impl Severity {
    /// Tint for a line of this severity; Info lines stay unstyled.
    pub fn style(self) -> Option<&'static Style> {
        match self {
            Self::Error => Some(&RED),
            Self::Warn => Some(&YELLOW),
            Self::Debug => Some(&GREEN),
            Self::Info => None,
        }
    }

    /// Parse a threshold flag/config value. Accepts severity names and the
    /// legacy colour names.
    pub fn parse_threshold(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "error" | "red" => Some(Self::Error),
            "warn" | "warning" | "yellow" => Some(Self::Warn),
            "info" | "white" => Some(Self::Info),
            "debug" | "trace" | "green" => Some(Self::Debug),
            _ => None,
        }
    }
}

/// Classify a log line. Non-JSON lines and lines without any configured
/// key fall to Info. When several configured keys are present, the one
/// appearing first in the document wins (the object map preserves
/// insertion order).
pub fn classify(line: &str, keys: &[String]) -> Severity {
    if keys.is_empty() || !line.starts_with('{') {
        return Severity::Info;
    }

    let Ok(Value::Object(object)) = serde_json::from_str::<Value>(line) else {
        return Severity::Info;
    };

    for (name, value) in &object {
        if !keys.iter().any(|key| name.eq_ignore_ascii_case(key)) {
            continue;
        }

        return match value {
            Value::String(level) => match level.to_ascii_lowercase().as_str() {
                "error" | "critical" | "fatal" => Severity::Error,
                "warn" | "warning" => Severity::Warn,
                "trace" | "debug" => Severity::Debug,
                _ => Severity::Info,
            },
            Value::Number(number) => match number.as_f64() {
                Some(status) if status >= 500.0 => Severity::Error,
                Some(status) if status >= 400.0 => Severity::Warn,
                Some(status) if status >= 300.0 => Severity::Debug,
                _ => Severity::Info,
            },
            _ => Severity::Info,
        };
    }

    Severity::Info
}

/// Tint a whole line according to its severity.
pub fn render(line: &str, severity: Severity) -> String {
    match severity.style() {
        Some(style) => style.apply_to(line).to_string(),
        None => line.to_string(),
    }
}

/// Tint a line and highlight every match of any pattern. Matches go red,
/// except on already-red lines where they go yellow. Overlapping matches
/// from different patterns are merged before rendering so styling never
/// nests.
pub fn highlight_all(line: &str, patterns: &[Regex], severity: Severity) -> String {
    let highlight: &Style = if severity == Severity::Error {
        &YELLOW
    } else {
        &RED
    };

    let mut ranges: Vec<(usize, usize)> = patterns
        .iter()
        .flat_map(|pattern| pattern.find_iter(line).map(|found| (found.start(), found.end())))
        .collect();
    ranges.sort_unstable();

    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(ranges.len());
    for (start, end) in ranges {
        match merged.last_mut() {
            Some((_, last_end)) if start <= *last_end => *last_end = (*last_end).max(end),
            _ => merged.push((start, end)),
        }
    }

    let mut rendered = String::with_capacity(line.len());
    let mut cursor = 0;

    for (start, end) in merged {
        if start > cursor {
            rendered.push_str(&render(&line[cursor..start], severity));
        }

        rendered.push_str(&highlight.apply_to(&line[start..end]).to_string());
        cursor = end;
    }

    if cursor < line.len() {
        rendered.push_str(&render(&line[cursor..], severity));
    }

    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Error > Severity::Warn);
        assert!(Severity::Warn > Severity::Info);
        assert!(Severity::Info > Severity::Debug);
    }

    #[test]
    fn test_classify_level_strings() {
        let level_keys = keys(&["level", "severity"]);

        assert_eq!(
            classify(r#"{"level":"error","msg":"boom"}"#, &level_keys),
            Severity::Error
        );
        assert_eq!(
            classify(r#"{"level":"FATAL"}"#, &level_keys),
            Severity::Error
        );
        assert_eq!(
            classify(r#"{"severity":"warning"}"#, &level_keys),
            Severity::Warn
        );
        assert_eq!(
            classify(r#"{"level":"debug"}"#, &level_keys),
            Severity::Debug
        );
        assert_eq!(classify(r#"{"level":"info"}"#, &level_keys), Severity::Info);
        // Unknown level strings fall to Info.
        assert_eq!(
            classify(r#"{"level":"notice"}"#, &level_keys),
            Severity::Info
        );
    }

    #[test]
    fn test_classify_status_codes() {
        let status_keys = keys(&["status"]);

        assert_eq!(classify(r#"{"status":500}"#, &status_keys), Severity::Error);
        assert_eq!(classify(r#"{"status":503}"#, &status_keys), Severity::Error);
        assert_eq!(classify(r#"{"status":404}"#, &status_keys), Severity::Warn);
        assert_eq!(classify(r#"{"status":301}"#, &status_keys), Severity::Debug);
        assert_eq!(classify(r#"{"status":200}"#, &status_keys), Severity::Info);
    }

    #[test]
    fn test_classify_key_matching() {
        // Keys match case-insensitively.
        assert_eq!(
            classify(r#"{"Level":"error"}"#, &keys(&["level"])),
            Severity::Error
        );

        // With several configured keys present, document order decides:
        // here the 200 status comes first and classifies the line.
        assert_eq!(
            classify(
                r#"{"status":200,"level":"error"}"#,
                &keys(&["level", "status"])
            ),
            Severity::Info
        );
        assert_eq!(
            classify(
                r#"{"level":"error","status":200}"#,
                &keys(&["level", "status"])
            ),
            Severity::Error
        );
    }

    #[test]
    fn test_classify_non_json_lines() {
        let level_keys = keys(&["level"]);

        assert_eq!(classify("plain text error", &level_keys), Severity::Info);
        assert_eq!(classify("{not json", &level_keys), Severity::Info);
        assert_eq!(classify(r#"{"level":"error"}"#, &[]), Severity::Info);
    }

    #[test]
    fn test_parse_threshold() {
        assert_eq!(Severity::parse_threshold("error"), Some(Severity::Error));
        assert_eq!(Severity::parse_threshold("red"), Some(Severity::Error));
        assert_eq!(Severity::parse_threshold("Yellow"), Some(Severity::Warn));
        assert_eq!(Severity::parse_threshold("white"), Some(Severity::Info));
        assert_eq!(Severity::parse_threshold("green"), Some(Severity::Debug));
        assert_eq!(Severity::parse_threshold("purple"), None);
    }

    #[test]
    fn test_highlight_preserves_content() {
        // Styling may be disabled off-tty; the visible text must survive
        // either way.
        let patterns = vec![Regex::new("b+").unwrap()];
        let rendered = highlight_all("aaa bbb ccc", &patterns, Severity::Info);
        assert_eq!(console::strip_ansi_codes(&rendered), "aaa bbb ccc");

        let untouched = highlight_all(
            "no match here",
            &[Regex::new("zzz").unwrap()],
            Severity::Warn,
        );
        assert_eq!(console::strip_ansi_codes(&untouched), "no match here");
    }

    #[test]
    fn test_highlight_merges_overlapping_matches() {
        let patterns = vec![Regex::new("abcd").unwrap(), Regex::new("cdef").unwrap()];
        let rendered = highlight_all("xx abcdef yy", &patterns, Severity::Info);
        assert_eq!(console::strip_ansi_codes(&rendered), "xx abcdef yy");
    }
}
