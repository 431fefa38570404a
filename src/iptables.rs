// Copyright 2017, 2018 Pit Kleyersburg <pitkley@googlemail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified or distributed
// except according to those terms.

//! This module holds the [`IPTables`](trait.IPTables.html) compatibility trait, allowing the
//! engine to run against the real `iptables`/`ip6tables`/`iptables-restore`/`ip6tables-restore`
//! binaries, or against an in-process [`IPTablesLogger`](struct.IPTablesLogger.html) that records
//! every call instead of touching the kernel -- used by the test suite so no real netfilter
//! table is required.
//!
//! This core only ever touches the `filter` table (spec section 1: NAT/mangle out of scope), so
//! unlike a general-purpose iptables wrapper this trait has no `table` parameter.

use std::cell::RefCell;

use crate::errors::Result;
use crate::process::ProcessRunner;

/// Identifies which address family (and hence which pair of binaries) a
/// backend talks to.
#[derive(Clone, Copy, Debug)]
pub enum IPVersion {
    IPv4,
    IPv6,
}

impl IPVersion {
    fn exe(self) -> &'static str {
        match self {
            IPVersion::IPv4 => "iptables",
            IPVersion::IPv6 => "ip6tables",
        }
    }

    fn restore_exe(self) -> &'static str {
        match self {
            IPVersion::IPv4 => "iptables-restore",
            IPVersion::IPv6 => "ip6tables-restore",
        }
    }
}

/// Compatibility trait abstracting over how the engine mutates the live
/// `filter` table. Production code uses [`IPTablesProcess`]; tests use
/// [`IPTablesLogger`].
pub trait IPTables {
    /// Appends `rule` to `chain`. Returns `true` if the kernel accepted it.
    fn append(&self, chain: &str, rule: &str) -> Result<bool>;

    /// Deletes `rule` from `chain`.
    fn delete(&self, chain: &str, rule: &str) -> Result<bool>;

    /// Returns the `-L -n` listing of `chain`, or `None` if the chain does
    /// not exist (used by status probes and `_need_reload`, spec sections
    /// 4.5.2 and 4.5.4).
    fn chain_listing(&self, chain: &str) -> Result<Option<String>>;

    /// Applies a complete iptables-restore-format script, replacing
    /// whatever it touches in one atomic operation (spec section 4.2).
    fn commit(&self, script: &str) -> Result<bool>;

    /// Flushes every chain and deletes every user-defined chain in the
    /// `filter` table (`-F` then `-X`), used by `stop()` (spec section
    /// 4.5.3).
    fn flush_and_delete_chains(&self) -> Result<bool>;
}

/// Production [`IPTables`](trait.IPTables.html) implementation: every call
/// is a real subprocess invocation of the configured binaries.
pub struct IPTablesProcess {
    version: IPVersion,
    runner: ProcessRunner,
}

impl IPTablesProcess {
    pub fn new(version: IPVersion, runner: ProcessRunner) -> IPTablesProcess {
        IPTablesProcess { version, runner }
    }
}

impl IPTables for IPTablesProcess {
    fn append(&self, chain: &str, rule: &str) -> Result<bool> {
        let mut args: Vec<&str> = vec!["-A", chain];
        args.extend(rule.split_whitespace());
        self.runner.run_checked(self.version.exe(), &args)?;
        Ok(true)
    }

    fn delete(&self, chain: &str, rule: &str) -> Result<bool> {
        let mut args: Vec<&str> = vec!["-D", chain];
        args.extend(rule.split_whitespace());
        self.runner.run_checked(self.version.exe(), &args)?;
        Ok(true)
    }

    fn chain_listing(&self, chain: &str) -> Result<Option<String>> {
        let result = self.runner.run(self.version.exe(), &["-L", chain, "-n"])?;
        if result.success {
            Ok(Some(result.output))
        } else {
            Ok(None)
        }
    }

    fn commit(&self, script: &str) -> Result<bool> {
        self.runner
            .run_pipe_checked(self.version.restore_exe(), &["-n"], script)?;
        Ok(true)
    }

    fn flush_and_delete_chains(&self) -> Result<bool> {
        self.runner.run_checked(self.version.exe(), &["-F"])?;
        self.runner.run_checked(self.version.exe(), &["-X"])?;
        Ok(true)
    }
}

/// A single recorded call, used by tests to assert exactly which kernel
/// mutations the engine attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoggedCall {
    Append { chain: String, rule: String },
    Delete { chain: String, rule: String },
    Commit { script: String },
    FlushAndDeleteChains,
}

/// [`IPTables`](trait.IPTables.html) implementation which does not
/// interact with any binary and does not modify host state. It keeps a
/// log of every call, so test code can assert on the engine's decisions
/// (append vs. delete vs. reload) without a real netfilter table.
#[derive(Default)]
pub struct IPTablesLogger {
    calls: RefCell<Vec<LoggedCall>>,
    /// Chains this logger pretends exist, for `chain_listing`/`_need_reload`
    /// probes in tests.
    existing_chains: RefCell<Vec<String>>,
}

impl IPTablesLogger {
    pub fn new() -> IPTablesLogger {
        IPTablesLogger::default()
    }

    /// Seed which chains should report as existing -- lets a test simulate
    /// "chain missing" to exercise `_need_reload` (spec section 4.5.2).
    pub fn set_existing_chains(&self, chains: Vec<String>) {
        *self.existing_chains.borrow_mut() = chains;
    }

    pub fn calls(&self) -> Vec<LoggedCall> {
        self.calls.borrow().clone()
    }
}

impl IPTables for IPTablesLogger {
    fn append(&self, chain: &str, rule: &str) -> Result<bool> {
        self.calls.borrow_mut().push(LoggedCall::Append {
            chain: chain.to_owned(),
            rule: rule.to_owned(),
        });
        Ok(true)
    }

    fn delete(&self, chain: &str, rule: &str) -> Result<bool> {
        self.calls.borrow_mut().push(LoggedCall::Delete {
            chain: chain.to_owned(),
            rule: rule.to_owned(),
        });
        Ok(true)
    }

    fn chain_listing(&self, chain: &str) -> Result<Option<String>> {
        if self
            .existing_chains
            .borrow()
            .iter()
            .any(|c| c == chain)
        {
            Ok(Some(format!(
                "Chain {} (1 references)\ntarget     prot opt source               destination\n",
                chain
            )))
        } else {
            Ok(None)
        }
    }

    fn commit(&self, script: &str) -> Result<bool> {
        self.calls.borrow_mut().push(LoggedCall::Commit {
            script: script.to_owned(),
        });
        Ok(true)
    }

    fn flush_and_delete_chains(&self) -> Result<bool> {
        self.calls.borrow_mut().push(LoggedCall::FlushAndDeleteChains);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logger_records_append_and_delete() {
        let ipt = IPTablesLogger::new();
        ipt.append("ufw-user-input", "-p tcp --dport 22 -j ACCEPT").unwrap();
        ipt.delete("ufw-user-input", "-p tcp --dport 23 -j ACCEPT").unwrap();

        assert_eq!(
            ipt.calls(),
            vec![
                LoggedCall::Append {
                    chain: "ufw-user-input".to_owned(),
                    rule: "-p tcp --dport 22 -j ACCEPT".to_owned(),
                },
                LoggedCall::Delete {
                    chain: "ufw-user-input".to_owned(),
                    rule: "-p tcp --dport 23 -j ACCEPT".to_owned(),
                },
            ]
        );
    }

    #[test]
    fn logger_chain_listing_reflects_seeded_chains() {
        let ipt = IPTablesLogger::new();
        assert!(ipt.chain_listing("ufw-user-input").unwrap().is_none());

        ipt.set_existing_chains(vec!["ufw-user-input".to_owned()]);
        assert!(ipt.chain_listing("ufw-user-input").unwrap().is_some());
        assert!(ipt.chain_listing("ufw-user-output").unwrap().is_none());
    }
}
