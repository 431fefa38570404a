// Copyright 2017, 2018 Pit Kleyersburg <pitkley@googlemail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified or distributed
// except according to those terms.

//! Status parser: turns the output of a chain listing (`-L -n`) into
//! human-readable rule summaries (spec section 4.4).

use slog::{warn, Logger};

use crate::rule::{is_anywhere, Action};

/// A single rule as decoded off a live chain listing. Looser than
/// [`Rule`](../rule/struct.Rule.html) -- the kernel's listing can contain
/// values (`UNKNOWN` protocol, missing ports) our persisted model never
/// produces on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRule {
    pub action: Action,
    pub protocol: String,
    pub src: String,
    pub dst: String,
    pub dport: String,
    pub sport: String,
    pub v6: bool,
}

/// Parse the output of a chain listing for one address family, returning
/// every decoded rule belonging to the `*-user-input` chain.
///
/// `listing` may contain multiple chains (as a full `-L -n` dump does);
/// lines are only collected while inside the user-input chain's header,
/// and collection stops at the next `Chain ` header.
pub fn parse_chain_listing(listing: &str, v6: bool, logger: &Logger) -> Vec<StatusRule> {
    let chain_header = if v6 {
        "Chain ufw6-user-input"
    } else {
        "Chain ufw-user-input"
    };

    let mut in_chain = false;
    let mut rules = Vec::new();

    for line in listing.lines() {
        if line.starts_with(chain_header) {
            in_chain = true;
            continue;
        } else if line.starts_with("Chain ") {
            in_chain = false;
            continue;
        } else if line.starts_with("target") {
            // Column header line, always skipped.
            continue;
        } else if in_chain && !line.trim().is_empty() {
            if let Some(rule) = parse_line(line, v6, logger) {
                rules.push(rule);
            }
        }
    }

    rules
}

/// Decode a single rule line from a chain listing (spec section 4.4).
fn parse_line(line: &str, v6: bool, logger: &Logger) -> Option<StatusRule> {
    let mut fields: Vec<String> = line.split_whitespace().map(|s| s.to_owned()).collect();

    if v6 {
        // ip6tables' listing omits the `opt` column present in iptables'
        // (unlike iptables). Insert a synthetic placeholder so the rest of
        // this function can use the same indices for both families.
        fields.insert(2, "--".to_owned());
    }

    if fields.len() < 5 {
        warn!(logger, "couldn't parse line"; "line" => line);
        return None;
    }

    let action = match fields[0].as_str() {
        "ACCEPT" => Action::Allow,
        "DROP" => Action::Deny,
        "ufw-user-limit" => Action::Limit,
        // RETURN, LOG, and anything else are valid kernel-chain lines we
        // simply don't surface.
        _ => return None,
    };

    let protocol = match fields[1].as_str() {
        "tcp" => "tcp".to_owned(),
        "udp" => "udp".to_owned(),
        "0" | "all" => "any".to_owned(),
        _ => "UNKNOWN".to_owned(),
    };

    if v6 {
        // Kernel-version workaround: on some ip6tables builds, a long
        // destination CIDR runs directly into the following protocol
        // token with no separating space (Debian bug #464244). If the
        // last three characters of the destination field look like a
        // protocol name, split them back out before indexing further.
        let dst_field = fields[4].clone();
        if dst_field.len() > 3 {
            let tail = &dst_field[dst_field.len() - 3..];
            if tail == "tcp" || tail == "udp" {
                let head = dst_field[..dst_field.len() - 3].to_owned();
                fields[4] = head;
                fields.insert(5, tail.to_owned());
            }
        }
    }

    if fields.len() < 5 {
        warn!(logger, "couldn't parse line"; "line" => line);
        return None;
    }
    let src = fields[3].clone();
    let dst = fields[4].clone();

    let mut dport = "any".to_owned();
    let mut sport = "any".to_owned();

    if let Some(f) = fields.get(6) {
        if let Some(rest) = f.strip_prefix("dpt:") {
            dport = rest.to_owned();
        } else if let Some(rest) = f.strip_prefix("spt:") {
            sport = rest.to_owned();
        }
    }
    if let Some(f) = fields.get(7) {
        if let Some(rest) = f.strip_prefix("dpt:") {
            dport = rest.to_owned();
        } else if let Some(rest) = f.strip_prefix("spt:") {
            sport = rest.to_owned();
        }
    }

    Some(StatusRule {
        action,
        protocol,
        src,
        dst,
        dport,
        sport,
        v6,
    })
}

/// Format one side (source or destination) of a display row, collapsing
/// "anywhere" CIDRs and folding in the port/protocol when present.
fn format_location(cidr: &str, port: &str, protocol: &str, v6_anywhere_suffix: bool) -> String {
    let mut location = if is_anywhere(cidr) {
        String::new()
    } else {
        cidr.to_owned()
    };

    if port != "any" {
        if location.is_empty() {
            location = port.to_owned();
        } else {
            location = format!("{} {}", location, port);
        }
        if protocol != "any" {
            location.push_str(&format!(":{}", protocol));
        }
    } else if cidr == "0.0.0.0/0" {
        location = "Anywhere".to_owned();
    } else if cidr == "::/0" {
        location = if v6_anywhere_suffix {
            "Anywhere (v6)".to_owned()
        } else {
            "Anywhere".to_owned()
        };
    }

    location
}

/// Render the `To / Action / From` table for a set of decoded rules. Empty
/// if `rules` is empty (matching spec section 4.4: no table when there is
/// nothing to show).
pub fn render_table(rules: &[StatusRule]) -> String {
    if rules.is_empty() {
        return String::new();
    }

    let mut out = String::new();
    out.push_str(&format!("\n\n{:<26} {:<8}{}\n", "To", "Action", "From"));
    out.push_str(&format!("{:<26} {:<8}{}\n", "--", "------", "----"));

    for r in rules {
        let dst_loc = format_location(&r.dst, &r.dport, &r.protocol, true);
        let src_loc = format_location(&r.src, &r.sport, &r.protocol, true);
        let action_str = match r.action {
            Action::Allow => "ALLOW",
            Action::Deny => "DENY",
            Action::Limit => "LIMIT",
        };
        out.push_str(&format!("{:<26} {:<8}{}\n", dst_loc, action_str, src_loc));
    }

    out
}
