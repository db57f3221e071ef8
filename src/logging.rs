// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tracing subscriber setup
//!
//! `RUST_LOG` is honoured; the default level is `warn`. `-v` turns on debug
//! output for the client and service targets, and `PARLEY_DEBUG` adds
//! trace-level chunk and tool-call merge diagnostics.

use tracing_subscriber::EnvFilter;

/// Environment variable enabling stream diagnostics
pub const DEBUG_ENV: &str = "PARLEY_DEBUG";

const VERBOSE_DIRECTIVES: &[&str] = &[
    "parley.llm.client=debug",
    "parley.llm.retry=debug",
    "parley.llm.lifecycle=debug",
    "parley.chat.service=debug",
    "parley.config=debug",
];

const STREAM_DEBUG_DIRECTIVES: &[&str] = &[
    "parley.llm.stream=trace",
    "parley.llm.tool_calls=trace",
];

/// Whether `PARLEY_DEBUG` is set to something other than empty, `0` or `false`
pub fn debug_enabled() -> bool {
    debug_flag(std::env::var(DEBUG_ENV).ok().as_deref())
}

fn debug_flag(value: Option<&str>) -> bool {
    match value.map(str::trim) {
        None | Some("") | Some("0") => false,
        Some(value) => !value.eq_ignore_ascii_case("false"),
    }
}

/// Base filter: `RUST_LOG` when set and valid, `warn` otherwise
fn base_filter(rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .filter(|value| !value.trim().is_empty())
        .and_then(|value| EnvFilter::try_new(value).ok())
        .unwrap_or_else(|| EnvFilter::new("warn"))
}

/// Build the filter for the given verbosity and debug toggle
pub fn build_filter(verbose: u8, debug: bool) -> EnvFilter {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    filter_with(rust_log.as_deref(), verbose, debug)
}

fn filter_with(rust_log: Option<&str>, verbose: u8, debug: bool) -> EnvFilter {
    let mut filter = base_filter(rust_log);

    let mut directives: Vec<&str> = Vec::new();
    if verbose > 0 {
        directives.extend(VERBOSE_DIRECTIVES);
    }
    if debug || verbose > 1 {
        directives.extend(STREAM_DEBUG_DIRECTIVES);
    }

    for directive in directives {
        if let Ok(parsed) = directive.parse() {
            filter = filter.add_directive(parsed);
        }
    }
    filter
}

/// Install the global subscriber, writing to stderr. Later calls are no-ops.
pub fn init(verbose: u8) {
    let filter = build_filter(verbose, debug_enabled());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
