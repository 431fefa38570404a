// Copyright 2017, 2018 Pit Kleyersburg <pitkley@googlemail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified or distributed
// except according to those terms.

//! End-to-end scenarios against the engine, run with `IPTablesLogger`
//! backends so no real netfilter table is required.

use std::fs;
use std::path::PathBuf;

use sloggers::null::NullLoggerBuilder;
use sloggers::Build;

use ufwrs::chains;
use ufwrs::config::Config;
use ufwrs::engine::{Engine, LogLevel};
use ufwrs::iptables::IPTablesLogger;
use ufwrs::rule::{Action, PortSpec, Protocol, RuleBuilder, RuleIntent};

fn tempdir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("ufwrs-scenario-{}-{}", name, time::get_time().nsec));
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn base_config(dir: &PathBuf) -> Config {
    let mut config = Config::default();
    config.rules = dir.join("user.rules");
    config.rules6 = dir.join("user6.rules");
    config.before_rules = dir.join("before.rules");
    config.before6_rules = dir.join("before6.rules");
    config.after_rules = dir.join("after.rules");
    config.after6_rules = dir.join("after6.rules");
    config.defaults = dir.join("defaults");
    config.init_script = dir.join("init-stub");
    config.dry_run = false;
    config
}

fn enabled_config(dir: &PathBuf) -> Config {
    fs::write(dir.join("defaults"), "ENABLED=\"yes\"\n").unwrap();
    base_config(dir)
}

fn logger() -> slog::Logger {
    NullLoggerBuilder.build().unwrap()
}

fn engine_with_all_chains_present(config: Config) -> Engine {
    let ipt4 = IPTablesLogger::new();
    ipt4.set_existing_chains(
        chains::expected_chains(false)
            .into_iter()
            .collect(),
    );
    let ipt6 = IPTablesLogger::new();
    ipt6.set_existing_chains(chains::expected_chains(true).into_iter().collect());

    Engine::with_backends(
        config,
        logger(),
        Box::new(ipt4),
        Box::new(ipt6),
    )
    .unwrap()
}

#[test]
fn scenario_empty_default_install_is_not_loaded() {
    let dir = tempdir("empty-install");
    let config = base_config(&dir);

    // No chains seeded -- user-input is absent, as on a fresh install.
    let engine = Engine::with_backends(
        config,
        logger(),
        Box::new(IPTablesLogger::new()),
        Box::new(IPTablesLogger::new()),
    )
    .unwrap();

    assert_eq!(engine.get_status().unwrap(), "Status: not loaded");
}

#[test]
fn scenario_allow_22_tcp_ipv4() {
    let dir = tempdir("allow-22");
    let config = enabled_config(&dir);
    let mut engine = engine_with_all_chains_present(config);

    let rule = RuleBuilder::default()
        .action(Action::Allow)
        .protocol(Protocol::Tcp)
        .dport(PortSpec::Specific("22".to_owned()))
        .build()
        .unwrap();

    let message = engine.set_rule(RuleIntent::add(rule)).unwrap();
    assert_eq!(message, "Rule added");

    assert_eq!(engine.rules(false).len(), 1);
    assert_eq!(
        engine.rules(false).as_slice()[0].tuple_line(),
        "allow tcp 22 0.0.0.0/0 any 0.0.0.0/0"
    );

    let on_disk = fs::read_to_string(dir.join("user.rules")).unwrap();
    assert!(on_disk.contains("### tuple ### allow tcp 22 0.0.0.0/0 any 0.0.0.0/0\n"));
    assert!(on_disk.contains("-A ufw-user-input -p tcp --dport 22 -j ACCEPT\n"));
}

#[test]
fn scenario_replace_allow_with_deny_triggers_reload() {
    let dir = tempdir("replace-allow-deny");
    let config = enabled_config(&dir);
    let mut engine = engine_with_all_chains_present(config);

    let allow = RuleBuilder::default()
        .action(Action::Allow)
        .protocol(Protocol::Tcp)
        .dport(PortSpec::Specific("22".to_owned()))
        .build()
        .unwrap();
    engine.set_rule(RuleIntent::add(allow)).unwrap();

    let deny = RuleBuilder::default()
        .action(Action::Deny)
        .protocol(Protocol::Tcp)
        .dport(PortSpec::Specific("22".to_owned()))
        .build()
        .unwrap();
    let message = engine.set_rule(RuleIntent::add(deny)).unwrap();

    assert_eq!(message, "Rule updated");
    assert_eq!(engine.rules(false).len(), 1);
    assert_eq!(engine.rules(false).as_slice()[0].action, Action::Deny);
}

#[test]
fn scenario_port_rule_with_any_protocol_expands_to_tcp_and_udp() {
    let dir = tempdir("any-proto-port");
    let config = enabled_config(&dir);
    let engine = engine_with_all_chains_present(config);

    let rule = RuleBuilder::default()
        .action(Action::Allow)
        .protocol(Protocol::Any)
        .dport(PortSpec::Specific("53".to_owned()))
        .build()
        .unwrap();

    let lines = ufwrs::restore::expand_rule(&ufwrs::chains::user_input(false), &rule);
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("-p tcp "));
    assert!(lines[1].contains("-p udp "));

    // `engine` only constructed here to confirm the dry builder compiles
    // against a live instance; scenario itself is about expansion shape.
    let _ = engine.get_default_policy();
}

#[test]
fn scenario_limit_on_ipv6_is_skipped_without_mutating_state() {
    let dir = tempdir("limit-ipv6");
    let config = enabled_config(&dir);
    let mut engine = engine_with_all_chains_present(config);

    let rule = RuleBuilder::default()
        .action(Action::Limit)
        .protocol(Protocol::Tcp)
        .dport(PortSpec::Specific("22".to_owned()))
        .dst("::/0".to_owned())
        .src("::/0".to_owned())
        .v6(true)
        .build()
        .unwrap();

    let message = engine.set_rule(RuleIntent::add(rule)).unwrap();
    assert_eq!(message, "Skipping unsupported IPv6 'limit' rule");
    assert!(engine.rules(true).is_empty());
    assert!(engine.rules(false).is_empty());
}

#[test]
fn scenario_logging_toggle_round_trips_byte_for_byte() {
    let dir = tempdir("logging-toggle");
    let config = enabled_config(&dir);
    let original = "*filter\n:ufw-before-input - [0:0]\n-A ufw-before-input -j LOG --log-prefix \"[UFW BLOCK]: \"\nCOMMIT\n";
    fs::write(&config.before_rules, original).unwrap();

    let engine = engine_with_all_chains_present(config);

    assert_eq!(engine.get_loglevel().unwrap(), (1, "Logging: on".to_owned()));

    engine.set_loglevel(LogLevel::Off).unwrap();
    assert_eq!(engine.get_loglevel().unwrap(), (0, "Logging: off".to_owned()));

    engine.set_loglevel(LogLevel::On).unwrap();
    assert_eq!(engine.get_loglevel().unwrap(), (1, "Logging: on".to_owned()));

    let restored = fs::read_to_string(&engine_before_rules_path(&dir)).unwrap();
    assert_eq!(restored, original);
}

fn engine_before_rules_path(dir: &PathBuf) -> PathBuf {
    dir.join("before.rules")
}

#[test]
fn need_reload_reports_true_when_a_chain_is_missing() {
    let dir = tempdir("need-reload");
    let config = enabled_config(&dir);

    // Only three of the four expected IPv4 chains exist -- simulates an
    // out-of-band flush that dropped `ufw-user-limit`.
    let ipt4 = IPTablesLogger::new();
    ipt4.set_existing_chains(vec![
        chains::user_input(false),
        chains::user_output(false),
        chains::user_forward(false),
    ]);

    let engine = Engine::with_backends(
        config,
        logger(),
        Box::new(ipt4),
        Box::new(IPTablesLogger::new()),
    )
    .unwrap();

    assert!(engine.need_reload(false).unwrap());
}

#[test]
fn stop_flushes_and_applies_open_policy_to_both_families() {
    let dir = tempdir("stop");
    let config = enabled_config(&dir);
    let ipt4 = IPTablesLogger::new();
    let ipt6 = IPTablesLogger::new();
    let engine = Engine::with_backends(config, logger(), Box::new(ipt4), Box::new(ipt6)).unwrap();

    engine.stop().unwrap();
}

#[test]
fn set_default_policy_persists_to_defaults_file() {
    let dir = tempdir("default-policy");
    let config = enabled_config(&dir);
    let mut engine = engine_with_all_chains_present(config);

    let message = engine.set_default_policy(false).unwrap();
    assert!(message.contains("deny"));
    assert_eq!(engine.get_default_policy(), "Default: deny");

    let contents = fs::read_to_string(dir.join("defaults")).unwrap();
    assert!(contents.contains("DEFAULT_INPUT_POLICY=\"DROP\""));
}
