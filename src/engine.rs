// Copyright 2017, 2018 Pit Kleyersburg <pitkley@googlemail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified or distributed
// except according to those terms.

//! The rule engine: the state machine that mutates the in-memory rule
//! list given an intent, decides between incremental apply and full
//! reload, and serializes the result to disk and kernel (spec section
//! 4.5).

use slog::{info, Logger};

use crate::chains;
use crate::codec;
use crate::config::{Config, Defaults, Policy};
use crate::errors::{Error, Result};
use crate::iptables::{IPTables, IPTablesProcess, IPVersion};
use crate::process::ProcessRunner;
use crate::restore;
use crate::rule::{Action, Rule, RuleIntent, RuleMatch};
use crate::rulelist::RuleList;
use crate::status;

/// `on`/`off` for the logging toggle (spec section 4.5.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    On,
    Off,
}

/// The comment marker whose presence in a rule file is the sole signal
/// that logging is "off" (spec section 6). `<program>` is this crate's
/// short name.
fn comment_marker() -> String {
    "# ufwrs_comment #".to_owned()
}

pub struct Engine {
    config: Config,
    defaults: Defaults,
    rules: RuleList,
    rules6: RuleList,
    ipt4: Box<dyn IPTables>,
    ipt6: Box<dyn IPTables>,
    process: ProcessRunner,
    logger: Logger,
}

impl Engine {
    /// Construct an engine against the real `iptables`/`ip6tables`
    /// binaries, reading the persisted rule lists and defaults from disk.
    pub fn new(config: Config, logger: Logger) -> Result<Engine> {
        let ipt4: Box<dyn IPTables> = Box::new(IPTablesProcess::new(
            IPVersion::IPv4,
            ProcessRunner::new(config.dry_run, logger.clone()),
        ));
        let ipt6: Box<dyn IPTables> = Box::new(IPTablesProcess::new(
            IPVersion::IPv6,
            ProcessRunner::new(config.dry_run, logger.clone()),
        ));
        Engine::with_backends(config, logger, ipt4, ipt6)
    }

    /// Construct an engine against injected `IPTables` backends -- used by
    /// tests to swap in an [`IPTablesLogger`](../iptables/struct.IPTablesLogger.html)
    /// so the suite never needs a real netfilter table (SPEC_FULL.md
    /// section L).
    pub fn with_backends(
        config: Config,
        logger: Logger,
        ipt4: Box<dyn IPTables>,
        ipt6: Box<dyn IPTables>,
    ) -> Result<Engine> {
        let rules = codec::read_rules(&config.rules, false, &logger)?;
        let rules6 = codec::read_rules(&config.rules6, true, &logger)?;
        let defaults = Defaults::read(&config.defaults)?;
        let process = ProcessRunner::new(config.dry_run, logger.clone());

        Ok(Engine {
            config,
            defaults,
            rules,
            rules6,
            ipt4,
            ipt6,
            process,
            logger,
        })
    }

    fn ipt(&self, v6: bool) -> &dyn IPTables {
        if v6 {
            self.ipt6.as_ref()
        } else {
            self.ipt4.as_ref()
        }
    }

    fn rules_for(&self, v6: bool) -> &RuleList {
        if v6 {
            &self.rules6
        } else {
            &self.rules
        }
    }

    /// Read-only access to the current rule list, for callers (e.g. the
    /// bin) that want to display it without going through `get_status`.
    pub fn rules(&self, v6: bool) -> &RuleList {
        self.rules_for(v6)
    }

    fn rules_path(&self, v6: bool) -> &std::path::Path {
        if v6 {
            &self.config.rules6
        } else {
            &self.config.rules
        }
    }

    /// The central state machine (spec section 4.5.1).
    pub fn set_rule(&mut self, intent: RuleIntent) -> Result<String> {
        let RuleIntent { rule, remove } = intent;

        if rule.v6 {
            if !self.config.ipv6_enabled {
                return Err(Error::config("Adding IPv6 rule failed: IPv6 not enabled"));
            }
            if rule.action == Action::Limit {
                return Ok("Skipping unsupported IPv6 'limit' rule".to_owned());
            }
        }

        let existing: Vec<Rule> = self.rules_for(rule.v6).iter().cloned().collect();
        let mut newrules = Vec::with_capacity(existing.len() + 1);
        let mut found = false;
        let mut modified = false;

        for r in &existing {
            match crate::rule::compare(r, &rule) {
                RuleMatch::Equal if !found => {
                    found = true;
                    if !remove {
                        newrules.push(rule.clone());
                    }
                }
                RuleMatch::SameTupleDifferentAction if !remove => {
                    found = true;
                    modified = true;
                    newrules.push(rule.clone());
                }
                _ => newrules.push(r.clone()),
            }
        }

        if !found && !remove {
            newrules.push(rule.clone());
        }

        if rule.v6 {
            self.rules6.replace(newrules);
        } else {
            self.rules.replace(newrules);
        }

        codec::write_rules(
            self.rules_path(rule.v6),
            rule.v6,
            self.rules_for(rule.v6),
            self.config.dry_run,
        )?;

        let mut rstr = if rule.v6 {
            "Rules updated (v6)".to_owned()
        } else {
            "Rules updated".to_owned()
        };

        if self.defaults.enabled() {
            let chain = chains::user_input(rule.v6);

            if modified || self.need_reload(rule.v6)? {
                self.reload(rule.v6)?;
                rstr = "Rule updated".to_owned();
            } else if found && remove {
                for fragment in restore::expand_fragment(&rule) {
                    self.ipt(rule.v6).delete(&chain, &fragment)?;
                }
                rstr = "Rule deleted".to_owned();
                if rule.v6 {
                    rstr.push_str(" (v6)");
                }
            } else if !found && !modified && !remove {
                for fragment in restore::expand_fragment(&rule) {
                    self.ipt(rule.v6).append(&chain, &fragment)?;
                }
                // Keep the trailing RETURN last (spec section 4.5.1).
                let _ = self.ipt(rule.v6).delete(&chain, "-j RETURN");
                self.ipt(rule.v6).append(&chain, "-j RETURN")?;
                rstr = "Rule added".to_owned();
                if rule.v6 {
                    rstr.push_str(" (v6)");
                }
            }
        }

        Ok(rstr)
    }

    /// Checks whether every expected user chain for `v6` is present;
    /// requests a reload if any is missing (spec section 4.5.2). This
    /// detects out-of-band flushes.
    pub fn need_reload(&self, v6: bool) -> Result<bool> {
        if self.config.dry_run {
            return Ok(false);
        }
        for chain in chains::expected_chains(v6) {
            if self.ipt(v6).chain_listing(&chain)?.is_none() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Re-applies the entire generated restore script to the kernel (spec
    /// section 4.5.1/4.5.2). Directly callable, not only an internal
    /// decision inside `set_rule` (SPEC_FULL.md section I).
    pub fn reload(&self, v6: bool) -> Result<()> {
        let script = restore::render_script(v6, self.rules_for(v6));
        self.ipt(v6).commit(&script)?;
        Ok(())
    }

    pub fn get_default_policy(&self) -> String {
        match self.defaults.input_policy() {
            Policy::Accept => "Default: allow".to_owned(),
            Policy::Drop => "Default: deny".to_owned(),
        }
    }

    pub fn set_default_policy(&mut self, allow: bool) -> Result<String> {
        let policy = if allow { Policy::Accept } else { Policy::Drop };
        if !self.config.dry_run {
            self.defaults.set_input_policy(policy);
            self.defaults.write(&self.config.defaults, self.config.dry_run)?;
        }
        Ok(format!(
            "Default policy changed to '{}'\n(be sure to update your rules accordingly)",
            if allow { "allow" } else { "deny" }
        ))
    }

    /// Scans the six rule/before/after files for the comment marker (spec
    /// section 4.5.5 / 4.2). `(1, "Logging: on")` unless at least one file
    /// carries the marker.
    pub fn get_loglevel(&self) -> Result<(u8, String)> {
        let marker = comment_marker();
        for path in self.config.logging_scan_files() {
            if !path.exists() {
                continue;
            }
            let contents = std::fs::read_to_string(path)?;
            if contents.contains(&marker) {
                return Ok((0, "Logging: off".to_owned()));
            }
        }
        Ok((1, "Logging: on".to_owned()))
    }

    /// Toggles every `-j LOG` line in the six rule/before/after files by
    /// prepending/stripping the comment marker (spec section 4.5.5). The
    /// LOG lines are preserved verbatim so toggling back restores them
    /// exactly.
    pub fn set_loglevel(&self, level: LogLevel) -> Result<String> {
        let marker = comment_marker();

        for path in self.config.logging_scan_files() {
            if !path.exists() {
                continue;
            }
            let contents = std::fs::read_to_string(path)?;
            let mut out = String::with_capacity(contents.len());

            for line in contents.split_inclusive('\n') {
                let is_log_line = line.contains("-j LOG") || line.contains("-j ufw-logging");
                match level {
                    LogLevel::Off => {
                        if is_log_line && !line.starts_with('#') {
                            out.push_str(&marker);
                            out.push(' ');
                            out.push_str(line);
                        } else {
                            out.push_str(line);
                        }
                    }
                    LogLevel::On => {
                        let prefix = format!("{} ", marker);
                        if line.starts_with(&prefix) {
                            out.push_str(&line[prefix.len()..]);
                        } else {
                            out.push_str(line);
                        }
                    }
                }
            }

            if !self.config.dry_run {
                crate::fs::open_for_write(path, false).and_then(|mut txn| {
                    use std::io::Write;
                    txn.write_all(out.as_bytes())?;
                    crate::fs::commit(txn)
                })?;
            }
        }

        Ok(match level {
            LogLevel::Off => "Logging disabled".to_owned(),
            LogLevel::On => "Logging enabled".to_owned(),
        })
    }

    /// Probes the user-input chain; if absent, "not loaded". Otherwise
    /// captures `-L -n` per family, parses it, and composes a full report
    /// (spec section 4.5.4).
    pub fn get_status(&self) -> Result<String> {
        let listing4 = self.ipt(false).chain_listing(&chains::user_input(false))?;
        let listing4 = match listing4 {
            Some(listing) => listing,
            None => return Ok("Status: not loaded".to_owned()),
        };

        let mut decoded = status::parse_chain_listing(&listing4, false, &self.logger);

        if self.config.ipv6_enabled {
            if let Some(listing) = self.ipt(true).chain_listing(&chains::user_input(true))? {
                decoded.extend(status::parse_chain_listing(&listing, true, &self.logger));
            }
        }

        let (_, logging_str) = self.get_loglevel()?;
        let policy_str = self.get_default_policy();
        let table = status::render_table(&decoded);

        Ok(format!("Status: loaded\n{}\n{}{}", logging_str, policy_str, table))
    }

    /// Invokes the external initialization procedure, then -- if IPv6 is
    /// disabled in configuration but the kernel supports it -- applies a
    /// minimal drop-all-except-loopback IPv6 policy so the host is not
    /// accidentally exposed (spec section 4.5.3).
    pub fn start(&self) -> Result<()> {
        if !self.config.dry_run && unsafe { libc::geteuid() } != 0 {
            return Err(Error::config("starting the firewall requires root"));
        }

        let init_script = self.config.init_script.to_string_lossy().into_owned();
        self.process.run_checked(&init_script, &["start"])?;
        info!(self.logger, "ran init script"; "script" => &init_script);

        if !self.config.ipv6_enabled && std::path::Path::new("/proc/sys/net/ipv6").exists() {
            let minimal_ipv6 = "*filter\n\
                :INPUT DROP [0:0]\n\
                :FORWARD DROP [0:0]\n\
                :OUTPUT DROP [0:0]\n\
                \n\
                -A INPUT -i lo -j ACCEPT\n\
                -A OUTPUT -o lo -j ACCEPT\n\
                \n\
                COMMIT\n";
            // Don't error here: the host may genuinely lack IPv6 support.
            if let Err(e) = self.ipt6.commit(minimal_ipv6) {
                slog::warn!(self.logger, "could not apply minimal ipv6 policy"; "error" => %e);
            }
        }

        Ok(())
    }

    /// Flushes all chains, deletes user chains, then applies a permissive
    /// policy to both families (spec section 4.5.3).
    pub fn stop(&self) -> Result<()> {
        let open_policy = "*filter\n\
            :INPUT ACCEPT [0:0]\n\
            :FORWARD ACCEPT [0:0]\n\
            :OUTPUT ACCEPT [0:0]\n\
            COMMIT\n";

        self.ipt4.flush_and_delete_chains()?;
        self.ipt4.commit(open_policy)?;

        if self.config.ipv6_enabled {
            self.ipt6.flush_and_delete_chains()?;
            self.ipt6.commit(open_policy)?;
        }

        Ok(())
    }
}
