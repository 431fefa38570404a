// Copyright 2017, 2018 Pit Kleyersburg <pitkley@googlemail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified or distributed
// except according to those terms.

//! Restore-script generator: expands a single [`Rule`](../rule/struct.Rule.html)
//! into one or more concrete packet-filter lines (spec section 4.3), and
//! assembles the complete restore script with its fixed chain skeleton
//! (spec section 4.2).
//!
//! This is a structured transform over the `Rule` model, not the regular
//! expressions the original tool used for the same job -- each expansion
//! step below has its own unit test (see spec.md's REDESIGN notes).

use crate::chains;
use crate::rule::Rule;
use crate::rulelist::RuleList;

/// "6 connections in 30 seconds" -- fixed by design to match what the
/// `ufw-user-limit` chain rate-limits and logs.
const LIMIT_SECONDS: u32 = 30;
const LIMIT_HITCOUNT: u32 = 6;

/// Expand a single rule's fragment (spec section 4.1's `format_rule`
/// output) into the concrete fragments that should actually be sent to the
/// kernel (spec section 4.3), without a chain prefix. Used directly by the
/// engine's incremental apply/delete path (spec section 4.5.1), where each
/// fragment is passed to [`IPTables::append`](../iptables/trait.IPTables.html#tymethod.append)
/// or [`IPTables::delete`](../iptables/trait.IPTables.html#tymethod.delete)
/// against the `*-user-input` chain.
pub fn expand_fragment(rule: &Rule) -> Vec<String> {
    let fragment = rule.format_rule();

    // Step 2/3: a "-p all " fragment either gets split into a tcp and a udp
    // copy (if it mentions a port) or has "-p all " stripped (if it
    // doesn't).
    let has_port = !rule.dport.is_any() || !rule.sport.is_any();
    let mentions_all = fragment.contains("-p all ");

    let mut snippets: Vec<String> = if mentions_all {
        if has_port {
            vec![
                fragment.replacen("-p all ", "-p tcp ", 1),
                fragment.replacen("-p all ", "-p udp ", 1),
            ]
        } else {
            vec![fragment.replacen("-p all ", "", 1)]
        }
    } else {
        vec![fragment]
    };

    // Step 4: a "-j LIMIT" fragment becomes a "set" fragment followed by an
    // "update" fragment against the rate-limit chain.
    let mut expanded = Vec::with_capacity(snippets.len() + 1);
    for snippet in snippets.drain(..) {
        if snippet.contains("-j LIMIT") {
            let set_line = snippet.replacen("-j LIMIT", "-m state --state NEW -m recent --set", 1);
            let update_line = snippet.replacen(
                "-j LIMIT",
                &format!(
                    "-m state --state NEW -m recent --update --seconds {} --hitcount {} -j {}",
                    LIMIT_SECONDS,
                    LIMIT_HITCOUNT,
                    chains::user_limit()
                ),
                1,
            );
            expanded.push(set_line);
            expanded.push(update_line);
        } else {
            expanded.push(snippet);
        }
    }

    expanded
}

/// Expand one rule into the complete `-A <chain> <fragment>` lines used by
/// the restore-script generator (spec section 4.2).
pub fn expand_rule(chain: &str, rule: &Rule) -> Vec<String> {
    expand_fragment(rule)
        .into_iter()
        .map(|fragment| format!("-A {} {}", chain, fragment))
        .collect()
}

/// Render the complete restore script for one address family: the fixed
/// chain skeleton plus every rule in `rules`, expanded, followed by the
/// trailing `RETURN` jumps and `COMMIT` (spec section 4.2).
pub fn render_script(v6: bool, rules: &RuleList) -> String {
    let prefix = chains::prefix(v6);
    let chain = chains::user_input(v6);
    let mut out = String::new();

    out.push_str("*filter\n");
    out.push_str(&format!(":{}-user-input - [0:0]\n", prefix));
    out.push_str(&format!(":{}-user-output - [0:0]\n", prefix));
    out.push_str(&format!(":{}-user-forward - [0:0]\n", prefix));
    if !v6 {
        out.push_str(&format!(":{}-user-limit - [0:0]\n", prefix));
    }
    out.push_str("### RULES ###\n");

    for rule in rules.iter() {
        out.push_str(&format!("\n### tuple ### {}\n", rule.tuple_line()));
        for line in expand_rule(&chain, rule) {
            out.push_str(&line);
            out.push('\n');
        }
    }

    out.push_str("\n### END RULES ###\n");
    out.push_str(&format!("-A {}-user-input -j RETURN\n", prefix));
    out.push_str(&format!("-A {}-user-output -j RETURN\n", prefix));
    out.push_str(&format!("-A {}-user-forward -j RETURN\n", prefix));
    if !v6 {
        out.push_str(&format!(
            "-A {}-user-limit -m limit --limit 3/minute -j LOG --log-prefix \"[UFW LIMIT]: \"\n",
            prefix
        ));
        out.push_str(&format!("-A {}-user-limit -j DROP\n", prefix));
    }
    out.push_str("COMMIT\n");

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{Action, PortSpec, Protocol, RuleBuilder};

    #[test]
    fn tcp_dport_rule_is_one_line() {
        let r = RuleBuilder::default()
            .action(Action::Allow)
            .protocol(Protocol::Tcp)
            .dport(PortSpec::Specific("22".to_owned()))
            .build()
            .unwrap();
        let lines = expand_rule("ufw-user-input", &r);
        assert_eq!(lines, vec!["-A ufw-user-input -p tcp --dport 22 -j ACCEPT"]);
    }

    #[test]
    fn any_protocol_with_port_expands_to_tcp_and_udp() {
        let r = RuleBuilder::default()
            .action(Action::Allow)
            .protocol(Protocol::Any)
            .dport(PortSpec::Specific("53".to_owned()))
            .build()
            .unwrap();
        let lines = expand_rule("ufw-user-input", &r);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("-p tcp "));
        assert!(lines[1].contains("-p udp "));
    }

    #[test]
    fn any_protocol_without_port_strips_p_all() {
        let r = RuleBuilder::default()
            .action(Action::Allow)
            .protocol(Protocol::Any)
            .src("10.0.0.0/8".to_owned())
            .build()
            .unwrap();
        let lines = expand_rule("ufw-user-input", &r);
        assert_eq!(lines.len(), 1);
        assert!(!lines[0].contains("-p all"));
        assert!(!lines[0].contains("-p "));
    }

    #[test]
    fn limit_expands_to_set_then_update_line() {
        let r = RuleBuilder::default()
            .action(Action::Limit)
            .protocol(Protocol::Tcp)
            .dport(PortSpec::Specific("22".to_owned()))
            .build()
            .unwrap();
        let lines = expand_rule("ufw-user-input", &r);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("-m state --state NEW -m recent --set"));
        assert!(lines[1].ends_with(
            "-m state --state NEW -m recent --update --seconds 30 --hitcount 6 -j ufw-user-limit"
        ));
    }

    #[test]
    fn render_script_ends_with_commit_and_return_jumps() {
        let list = RuleList::new();
        let script = render_script(false, &list);
        assert!(script.ends_with("COMMIT\n"));
        assert!(script.contains("-A ufw-user-input -j RETURN\n"));
        assert!(script.contains("-A ufw-user-output -j RETURN\n"));
        assert!(script.contains("-A ufw-user-forward -j RETURN\n"));
    }

    #[test]
    fn render_script_v6_has_no_limit_chain() {
        let list = RuleList::new();
        let script = render_script(true, &list);
        assert!(!script.contains("user-limit"));
        assert!(script.contains(":ufw6-user-input - [0:0]\n"));
    }
}
