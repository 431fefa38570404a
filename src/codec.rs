// Copyright 2017, 2018 Pit Kleyersburg <pitkley@googlemail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified or distributed
// except according to those terms.

//! Rule file codec: reads and writes the persistent rule files, one per
//! address family (spec section 4.2).

use std::fs;
use std::io::Write;
use std::path::Path;

use slog::{warn, Logger};

use crate::errors::Result;
use crate::fs as txfs;
use crate::restore;
use crate::rule::{Action, PortSpec, Protocol, Rule, RuleBuilder};
use crate::rulelist::RuleList;

const TUPLE_MARKER: &str = "### tuple ###";

/// Decode a single `### tuple ### action protocol dport dst sport src`
/// line into a `Rule`. Returns `None` (and logs a warning) on a malformed
/// line -- never fatal (spec section 4.2, section 7 `ParseWarning`).
fn decode_tuple_line(line: &str, v6: bool, logger: &Logger) -> Option<Rule> {
    let rest = line.trim_start_matches(TUPLE_MARKER).trim();
    let fields: Vec<&str> = rest.split_whitespace().collect();
    if fields.len() != 6 {
        warn!(logger, "skipping malformed tuple (bad length)"; "line" => line);
        return None;
    }

    let action = match fields[0].parse::<Action>() {
        Ok(a) => a,
        Err(_) => {
            warn!(logger, "skipping malformed tuple"; "line" => line);
            return None;
        }
    };
    let protocol = match fields[1].parse::<Protocol>() {
        Ok(p) => p,
        Err(_) => {
            warn!(logger, "skipping malformed tuple"; "line" => line);
            return None;
        }
    };
    let dport: PortSpec = fields[2].parse().unwrap();
    let dst = fields[3].to_owned();
    let sport: PortSpec = fields[4].parse().unwrap();
    let src = fields[5].to_owned();

    if action == Action::Limit && v6 {
        warn!(logger, "skipping malformed tuple: limit is IPv4-only"; "line" => line);
        return None;
    }

    Some(
        RuleBuilder::default()
            .action(action)
            .protocol(protocol)
            .dport(dport)
            .dst(dst)
            .sport(sport)
            .src(src)
            .v6(v6)
            .build()
            .unwrap(),
    )
}

/// Read a rule file, decoding every `### tuple ###` line into a `Rule` and
/// ignoring everything else (it is regenerated on write).
pub fn read_rules<P: AsRef<Path>>(path: P, v6: bool, logger: &Logger) -> Result<RuleList> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(RuleList::new());
    }

    let contents = fs::read_to_string(path)?;
    let mut rules = Vec::new();
    for line in contents.lines() {
        if line.trim_start().starts_with(TUPLE_MARKER) {
            if let Some(rule) = decode_tuple_line(line, v6, logger) {
                rules.push(rule);
            }
        }
    }

    Ok(RuleList::from_vec(rules))
}

/// Atomically replace the rule file at `path` with the rendered restore
/// script for `rules`. On dry-run, writes to a discard sink instead (spec
/// section 4.2, 4.6).
pub fn write_rules<P: AsRef<Path>>(
    path: P,
    v6: bool,
    rules: &RuleList,
    dry_run: bool,
) -> Result<()> {
    let script = restore::render_script(v6, rules);

    let mut txn = txfs::open_for_write(path, dry_run)?;
    match txn.write_all(script.as_bytes()) {
        Ok(()) => txfs::commit(txn),
        Err(e) => {
            let _ = txfs::abort(txn);
            Err(e.into())
        }
    }
}
