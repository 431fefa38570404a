// Copyright 2017, 2018 Pit Kleyersburg <pitkley@googlemail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified or distributed
// except according to those terms.

//! Fixed chain names and prefixes (spec section 6).

/// Chain-name prefix for an address family: `ufw` for IPv4, `ufw6` for
/// IPv6.
pub fn prefix(v6: bool) -> &'static str {
    if v6 {
        "ufw6"
    } else {
        "ufw"
    }
}

/// The `*-user-input` chain, where all user rules are appended.
pub fn user_input(v6: bool) -> String {
    format!("{}-user-input", prefix(v6))
}

pub fn user_output(v6: bool) -> String {
    format!("{}-user-output", prefix(v6))
}

pub fn user_forward(v6: bool) -> String {
    format!("{}-user-forward", prefix(v6))
}

/// IPv4-only rate-limit chain; there is no IPv6 `ufw6-user-limit`.
pub fn user_limit() -> String {
    "ufw-user-limit".to_owned()
}

/// The user chains expected to exist for a given address family, used by
/// `_need_reload` (spec section 4.5.2) to detect out-of-band flushes.
pub fn expected_chains(v6: bool) -> Vec<String> {
    let mut chains = vec![user_input(v6), user_output(v6), user_forward(v6)];
    if !v6 {
        chains.push(user_limit());
    }
    chains
}
