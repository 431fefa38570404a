// Copyright 2017, 2018 Pit Kleyersburg <pitkley@googlemail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified or distributed
// except according to those terms.

//! Engine configuration: the deployment-configurable file paths (spec
//! section 6) plus the IPv6/dry-run switches, loaded from an optional TOML
//! file. The defaults file itself (`DEFAULT_INPUT_POLICY` and friends) is
//! not TOML -- it keeps ufw's own `KEY="VALUE"` shape and gets its own
//! tiny reader/writer below.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_derive::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::fs as txfs;
use std::io::Write;

/// Paths to every file the engine touches, and the switches that decide
/// whether it touches the kernel at all.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub rules: PathBuf,
    pub rules6: PathBuf,
    pub before_rules: PathBuf,
    pub before6_rules: PathBuf,
    pub after_rules: PathBuf,
    pub after6_rules: PathBuf,
    pub defaults: PathBuf,
    pub init_script: PathBuf,
    pub ipv6_enabled: bool,
    pub dry_run: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            rules: PathBuf::from("/lib/ufw/user.rules"),
            rules6: PathBuf::from("/lib/ufw/user6.rules"),
            before_rules: PathBuf::from("/etc/ufw/before.rules"),
            before6_rules: PathBuf::from("/etc/ufw/before6.rules"),
            after_rules: PathBuf::from("/etc/ufw/after.rules"),
            after6_rules: PathBuf::from("/etc/ufw/after6.rules"),
            defaults: PathBuf::from("/etc/default/ufw"),
            init_script: PathBuf::from("/etc/init.d/ufw"),
            ipv6_enabled: true,
            dry_run: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to built-in
    /// defaults for any key the file doesn't set.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
        let contents = fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| Error::config(format!("could not parse config file: {}", e)))
    }

    /// The six files scanned by the logging-toggle (spec section 4.5.5)
    /// and by `get_loglevel` (spec section 4.2).
    pub fn logging_scan_files(&self) -> Vec<&Path> {
        vec![
            &self.rules,
            &self.rules6,
            &self.before_rules,
            &self.before6_rules,
            &self.after_rules,
            &self.after6_rules,
        ]
    }
}

/// The known `DEFAULT_*` keys in the defaults file (spec section 6),
/// supplemented beyond `DEFAULT_INPUT_POLICY` per
/// `examples/original_source/tests/unit/test_backend.py`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Accept,
    Drop,
}

impl Policy {
    fn as_value(self) -> &'static str {
        match self {
            Policy::Accept => "ACCEPT",
            Policy::Drop => "DROP",
        }
    }

    fn from_value(value: &str) -> Result<Policy> {
        match value {
            "ACCEPT" => Ok(Policy::Accept),
            "DROP" => Ok(Policy::Drop),
            other => Err(Error::config(format!("unknown policy value '{}'", other))),
        }
    }
}

/// The defaults file: a flat `KEY="VALUE"` text file (spec section 6).
#[derive(Debug, Clone, Default)]
pub struct Defaults {
    values: BTreeMap<String, String>,
}

impl Defaults {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Defaults> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Defaults::default());
        }

        let contents = fs::read_to_string(path)?;
        let mut values = BTreeMap::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(eq) = line.find('=') {
                let key = line[..eq].trim().to_owned();
                let value = line[eq + 1..].trim().trim_matches('"').to_owned();
                values.insert(key, value);
            }
        }

        Ok(Defaults { values })
    }

    pub fn write<P: AsRef<Path>>(&self, path: P, dry_run: bool) -> Result<()> {
        let mut out = String::new();
        for (key, value) in &self.values {
            out.push_str(&format!("{}=\"{}\"\n", key, value));
        }

        let mut txn = txfs::open_for_write(path, dry_run)?;
        txn.write_all(out.as_bytes())?;
        txfs::commit(txn)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_owned(), value.to_owned());
    }

    /// `DEFAULT_INPUT_POLICY`, parsed, defaulting to `Drop` like a fresh
    /// ufw install.
    pub fn input_policy(&self) -> Policy {
        self.get("DEFAULT_INPUT_POLICY")
            .and_then(|v| Policy::from_value(v).ok())
            .unwrap_or(Policy::Drop)
    }

    pub fn set_input_policy(&mut self, policy: Policy) {
        self.set("DEFAULT_INPUT_POLICY", policy.as_value());
    }

    pub fn output_policy(&self) -> Policy {
        self.get("DEFAULT_OUTPUT_POLICY")
            .and_then(|v| Policy::from_value(v).ok())
            .unwrap_or(Policy::Accept)
    }

    pub fn set_output_policy(&mut self, policy: Policy) {
        self.set("DEFAULT_OUTPUT_POLICY", policy.as_value());
    }

    pub fn forward_policy(&self) -> Policy {
        self.get("DEFAULT_FORWARD_POLICY")
            .and_then(|v| Policy::from_value(v).ok())
            .unwrap_or(Policy::Drop)
    }

    pub fn set_forward_policy(&mut self, policy: Policy) {
        self.set("DEFAULT_FORWARD_POLICY", policy.as_value());
    }

    /// `ENABLED`, parsed as `yes`/`no` -- gates whether `set_rule`/`start`/
    /// `stop` touch the kernel at all (spec section 4.5.1), grounded on
    /// `examples/original_source`'s `test_installation_defaults` which
    /// seeds `self.backend.defaults["enabled"]`.
    pub fn enabled(&self) -> bool {
        self.get("ENABLED")
            .map(|v| v.eq_ignore_ascii_case("yes"))
            .unwrap_or(false)
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.set("ENABLED", if enabled { "yes" } else { "no" });
    }

    /// `IPV6`, parsed as `yes`/`no`.
    pub fn ipv6(&self) -> bool {
        self.get("IPV6")
            .map(|v| v.eq_ignore_ascii_case("yes"))
            .unwrap_or(true)
    }

    pub fn set_ipv6(&mut self, enabled: bool) {
        self.set("IPV6", if enabled { "yes" } else { "no" });
    }

    /// `LOGLEVEL`, as persisted by ufw-style defaults files (`low`,
    /// `medium`, ...). Not parsed further here -- `Engine::get_loglevel`
    /// derives the effective on/off state from the rule files themselves.
    pub fn loglevel(&self) -> &str {
        self.get("LOGLEVEL").unwrap_or("low")
    }

    pub fn set_loglevel(&mut self, level: &str) {
        self.set("LOGLEVEL", level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_value_defaults_file() {
        let dir = std::env::temp_dir().join(format!("ufwrs-defaults-test-{}", time::get_time().nsec));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("defaults");
        fs::write(
            &path,
            "DEFAULT_INPUT_POLICY=\"DROP\"\nDEFAULT_OUTPUT_POLICY=\"ACCEPT\"\n",
        )
        .unwrap();

        let defaults = Defaults::read(&path).unwrap();
        assert_eq!(defaults.input_policy(), Policy::Drop);
        assert_eq!(defaults.output_policy(), Policy::Accept);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_defaults_file_yields_ufw_style_defaults() {
        let defaults = Defaults::read("/nonexistent/defaults").unwrap();
        assert_eq!(defaults.input_policy(), Policy::Drop);
        assert_eq!(defaults.forward_policy(), Policy::Drop);
        assert_eq!(defaults.output_policy(), Policy::Accept);
    }
}
