// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: log::Log backend that writes prefixed lines to the kernel debug console.
// Author: Lukas Bower

//! Console logger.
//!
//! Every line of a record is emitted as `MON|<LEVEL>: <text>`. Records are
//! rendered into a fixed buffer first so output from one record is never
//! interleaved with another; text past the buffer is replaced by `...`.

use core::fmt::{self, Write};

use ::log::{Level, LevelFilter, Log, Metadata, Record};
use heapless::String as HeaplessString;

/// Bytes rendered per record, prefixes included.
pub const RECORD_CAPACITY: usize = 512;

const TRUNCATION_MARKER: &str = "...\n";

/// Byte sink, usually the kernel's debug character output.
pub type Sink = fn(u8);

/// Logger writing to a byte sink.
pub struct MonitorLogger {
    sink: Sink,
    level: LevelFilter,
}

impl MonitorLogger {
    /// Logger emitting records at or above `level` to `sink`.
    #[must_use]
    pub const fn new(sink: Sink, level: LevelFilter) -> Self {
        Self { sink, level }
    }

    /// Maximum level passed through.
    #[must_use]
    pub fn level(&self) -> LevelFilter {
        self.level
    }
}

impl Log for MonitorLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let rendered = render::<RECORD_CAPACITY>(record.level(), *record.args());
        for byte in rendered.bytes() {
            (self.sink)(byte);
        }
    }

    fn flush(&self) {}
}

struct Prefixed<'a, const N: usize> {
    out: &'a mut HeaplessString<N>,
    level: Level,
    line_start: bool,
    truncated: bool,
}

impl<const N: usize> Prefixed<'_, N> {
    fn push(&mut self, ch: char) {
        if self.truncated {
            return;
        }
        let reserve = TRUNCATION_MARKER.len() + ch.len_utf8();
        if self.out.len() + reserve > N || self.out.push(ch).is_err() {
            self.truncated = true;
        }
    }
}

impl<const N: usize> Write for Prefixed<'_, N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for ch in s.chars() {
            if self.line_start {
                self.line_start = false;
                for prefix_ch in "MON|".chars().chain(self.level.as_str().chars()).chain(": ".chars()) {
                    self.push(prefix_ch);
                }
            }
            self.push(ch);
            if ch == '\n' {
                self.line_start = true;
            }
        }
        Ok(())
    }
}

/// Render `args` as prefixed console lines.
#[must_use]
pub fn render<const N: usize>(level: Level, args: fmt::Arguments<'_>) -> HeaplessString<N> {
    let mut out = HeaplessString::new();
    let mut writer = Prefixed {
        out: &mut out,
        level,
        line_start: true,
        truncated: false,
    };
    let _ = writer.write_fmt(args);
    let truncated = writer.truncated;
    let ended = writer.line_start;
    if truncated {
        let _ = out.push_str(TRUNCATION_MARKER);
    } else if !ended {
        let _ = out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line_gets_prefix_and_newline() {
        let line = render::<64>(Level::Info, format_args!("PD '{}' is now passive!", "net"));
        assert_eq!(line.as_str(), "MON|INFO: PD 'net' is now passive!\n");
    }

    #[test]
    fn every_line_is_prefixed() {
        let text = render::<128>(Level::Error, format_args!("first\nsecond"));
        assert_eq!(text.as_str(), "MON|ERROR: first\nMON|ERROR: second\n");
    }

    #[test]
    fn overflow_is_marked() {
        let text = render::<24>(Level::Warn, format_args!("{}", "x".repeat(40)));
        assert!(text.ends_with(TRUNCATION_MARKER), "{text}");
        assert!(text.starts_with("MON|WARN: xx"));
        assert!(text.len() <= 24);
    }

    #[test]
    fn logger_filters_by_level() {
        fn discard(_: u8) {}
        let logger = MonitorLogger::new(discard, LevelFilter::Info);
        let debug = Metadata::builder().level(Level::Debug).build();
        let error = Metadata::builder().level(Level::Error).build();
        assert!(!logger.enabled(&debug));
        assert!(logger.enabled(&error));
        assert_eq!(logger.level(), LevelFilter::Info);
    }
}
