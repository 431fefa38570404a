// Copyright 2017, 2018 Pit Kleyersburg <pitkley@googlemail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified or distributed
// except according to those terms.

//! The rule model: [`Rule`](struct.Rule.html), its fields, and the three
//! relational operations (`equals`, `same_tuple`, `compare`) the engine uses
//! to decide how a new intent interacts with an existing rule list.

use std::fmt;
use std::str::FromStr;

use derive_builder::Builder;

use crate::errors::Error;

/// What to do with traffic matching a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Allow,
    Deny,
    /// IPv4-only; see spec section 3.
    Limit,
}

impl Action {
    /// The `-j` target used in an (unexpanded) restore-script fragment.
    /// `Limit` is a placeholder later expanded by the restore-script
    /// generator (spec section 4.3, rule 4).
    pub fn target(self) -> &'static str {
        match self {
            Action::Allow => "ACCEPT",
            Action::Deny => "DROP",
            Action::Limit => "LIMIT",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match *self {
            Action::Allow => "allow",
            Action::Deny => "deny",
            Action::Limit => "limit",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow" => Ok(Action::Allow),
            "deny" => Ok(Action::Deny),
            "limit" => Ok(Action::Limit),
            other => Err(Error::parse_warning(format!(
                "unknown action '{}'",
                other
            ))),
        }
    }
}

/// Protocol a rule matches. `Any` means "match both tcp and udp" for
/// port-bearing rules (spec section 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Any,
    Tcp,
    Udp,
}

impl Protocol {
    /// Representation used in the persisted tuple line.
    pub fn tuple_str(self) -> &'static str {
        match self {
            Protocol::Any => "any",
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }

    /// Representation used in a `-p` restore-script fragment, before
    /// expansion strips or duplicates it (spec section 4.3).
    pub fn filter_str(self) -> &'static str {
        match self {
            Protocol::Any => "all",
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "any" => Ok(Protocol::Any),
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => Err(Error::parse_warning(format!(
                "unknown protocol '{}'",
                other
            ))),
        }
    }
}

/// A port specifier: either `any` or a numeric/range string (e.g. `"22"`,
/// `"60000:61000"`). The string form is kept opaque -- this core does not
/// need to reason about port arithmetic, only to round-trip it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortSpec {
    Any,
    Specific(String),
}

impl PortSpec {
    pub fn is_any(&self) -> bool {
        *self == PortSpec::Any
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            PortSpec::Any => write!(f, "any"),
            PortSpec::Specific(ref s) => write!(f, "{}", s),
        }
    }
}

impl FromStr for PortSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "any" {
            Ok(PortSpec::Any)
        } else {
            Ok(PortSpec::Specific(s.to_owned()))
        }
    }
}

/// Returns the "anywhere" CIDR for the given address family.
pub fn anywhere(v6: bool) -> String {
    if v6 {
        "::/0".to_owned()
    } else {
        "0.0.0.0/0".to_owned()
    }
}

/// True if `cidr` is the "anywhere" CIDR for either family.
pub fn is_anywhere(cidr: &str) -> bool {
    cidr == "0.0.0.0/0" || cidr == "::/0"
}

/// The central entity: a single firewall intent (spec section 3).
///
/// `remove` is deliberately not a field here -- it is a transient request
/// flag on an intent, never part of the stored value. See
/// [`RuleIntent`](struct.RuleIntent.html).
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
#[builder(setter(into))]
pub struct Rule {
    pub action: Action,
    #[builder(default = "Protocol::Any")]
    pub protocol: Protocol,
    #[builder(default = "PortSpec::Any")]
    pub dport: PortSpec,
    #[builder(default = "anywhere(self.v6.unwrap_or(false))")]
    pub dst: String,
    #[builder(default = "PortSpec::Any")]
    pub sport: PortSpec,
    #[builder(default = "anywhere(self.v6.unwrap_or(false))")]
    pub src: String,
    #[builder(default = "false")]
    pub v6: bool,
}

/// A mutation request: a `Rule` value plus the transient `remove` flag.
#[derive(Debug, Clone)]
pub struct RuleIntent {
    pub rule: Rule,
    pub remove: bool,
}

impl RuleIntent {
    pub fn add(rule: Rule) -> RuleIntent {
        RuleIntent {
            rule,
            remove: false,
        }
    }

    pub fn remove(rule: Rule) -> RuleIntent {
        RuleIntent { rule, remove: true }
    }
}

/// Result of comparing two rules; drives the engine's insert/replace/delete
/// decision (spec section 4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleMatch {
    /// Every field, including `action`, is equal.
    Equal,
    /// Same tuple, different `action`.
    SameTupleDifferentAction,
    /// Different tuple.
    Different,
}

impl RuleMatch {
    /// The integer encoding used in spec section 4.1 (`0`, `-1`, `+1`).
    pub fn as_i8(self) -> i8 {
        match self {
            RuleMatch::Equal => 0,
            RuleMatch::SameTupleDifferentAction => -1,
            RuleMatch::Different => 1,
        }
    }
}

/// True iff all of protocol, dport, sport, dst, src, v6 are equal AND
/// action is equal.
pub fn equals(a: &Rule, b: &Rule) -> bool {
    same_tuple(a, b) && a.action == b.action
}

/// True iff all of protocol, dport, sport, dst, src, v6 are equal,
/// regardless of action.
pub fn same_tuple(a: &Rule, b: &Rule) -> bool {
    a.protocol == b.protocol
        && a.dport == b.dport
        && a.sport == b.sport
        && a.dst == b.dst
        && a.src == b.src
        && a.v6 == b.v6
}

/// The three-way comparison described in spec section 4.1.
pub fn compare(a: &Rule, b: &Rule) -> RuleMatch {
    if equals(a, b) {
        RuleMatch::Equal
    } else if same_tuple(a, b) {
        RuleMatch::SameTupleDifferentAction
    } else {
        RuleMatch::Different
    }
}

impl Rule {
    /// Packet-filter argument fragment for this rule, without chain or
    /// jump-action expansion (spec section 4.1). `action == Limit` emits
    /// the `-j LIMIT` placeholder the restore-script generator later
    /// expands into two concrete lines.
    ///
    /// `-s`/`-d` are omitted entirely when the respective address is the
    /// family's "anywhere" CIDR -- a generated rule line never carries
    /// `0.0.0.0/0`/`::/0` explicitly (spec section 8, scenario 2).
    pub fn format_rule(&self) -> String {
        let mut out = format!("-p {} ", self.protocol.filter_str());
        if !self.dport.is_any() {
            out.push_str(&format!("--dport {} ", self.dport));
        }
        if !is_anywhere(&self.src) {
            out.push_str(&format!("-s {} ", self.src));
        }
        if !is_anywhere(&self.dst) {
            out.push_str(&format!("-d {} ", self.dst));
        }
        if !self.sport.is_any() {
            out.push_str(&format!("--sport {} ", self.sport));
        }
        out.push_str(&format!("-j {}", self.action.target()));
        out
    }

    /// The six-field canonical tuple line body (without the `### tuple ###`
    /// marker), in the fixed order `action protocol dport dst sport src`.
    pub fn tuple_line(&self) -> String {
        format!(
            "{} {} {} {} {} {}",
            self.action,
            self.protocol.tuple_str(),
            self.dport,
            self.dst,
            self.sport,
            self.src
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(action: Action) -> Rule {
        RuleBuilder::default()
            .action(action)
            .protocol(Protocol::Tcp)
            .dport(PortSpec::Specific("22".to_owned()))
            .build()
            .unwrap()
    }

    #[test]
    fn equals_requires_same_action() {
        let a = rule(Action::Allow);
        let b = rule(Action::Deny);
        assert!(!equals(&a, &b));
        assert!(same_tuple(&a, &b));
        assert_eq!(compare(&a, &b), RuleMatch::SameTupleDifferentAction);
        assert_eq!(compare(&a, &b).as_i8(), -1);
    }

    #[test]
    fn equals_identical_rules() {
        let a = rule(Action::Allow);
        let b = rule(Action::Allow);
        assert!(equals(&a, &b));
        assert_eq!(compare(&a, &b), RuleMatch::Equal);
        assert_eq!(compare(&a, &b).as_i8(), 0);
    }

    #[test]
    fn different_tuple() {
        let a = rule(Action::Allow);
        let mut b = rule(Action::Allow);
        b.dport = PortSpec::Specific("23".to_owned());
        assert_eq!(compare(&a, &b), RuleMatch::Different);
        assert_eq!(compare(&a, &b).as_i8(), 1);
    }

    #[test]
    fn format_rule_tcp_dport() {
        let r = rule(Action::Allow);
        assert_eq!(r.format_rule(), "-p tcp --dport 22 -j ACCEPT");
    }

    #[test]
    fn format_rule_any_protocol_with_port() {
        let r = RuleBuilder::default()
            .action(Action::Allow)
            .protocol(Protocol::Any)
            .dport(PortSpec::Specific("53".to_owned()))
            .build()
            .unwrap();
        assert_eq!(r.format_rule(), "-p all --dport 53 -j ACCEPT");
    }

    #[test]
    fn tuple_line_matches_fixed_field_order() {
        let r = rule(Action::Allow);
        assert_eq!(r.tuple_line(), "allow tcp 22 0.0.0.0/0 any 0.0.0.0/0");
    }
}
