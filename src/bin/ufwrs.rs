// Copyright 2017, 2018 Pit Kleyersburg <pitkley@googlemail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified or distributed
// except according to those terms.

//! Thin CLI wrapping [`ufwrs::Engine`]. Subcommands map directly onto
//! engine operations; there is deliberately no free-text rule grammar to
//! parse -- every rule field is its own typed flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{App, Arg, ArgMatches, SubCommand};
use crossbeam_channel::{bounded, select, tick};
use signal_hook::iterator::Signals;
use slog::{crit, info, Logger};
use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

use ufwrs::config::Config;
use ufwrs::engine::{Engine, LogLevel};
use ufwrs::rule::{Action, PortSpec, Protocol, RuleBuilder, RuleIntent};
use ufwrs::Result;

fn build_logger(verbose: bool) -> Result<Logger> {
    let mut builder = TerminalLoggerBuilder::new();
    builder.destination(Destination::Stderr);
    builder.level(if verbose {
        Severity::Debug
    } else {
        Severity::Info
    });
    builder
        .build()
        .map_err(|e| ufwrs::Error::config(format!("could not set up logger: {}", e)))
}

fn parse_rule_args(matches: &ArgMatches<'_>) -> Result<RuleIntent> {
    let action = if matches.is_present("deny") {
        Action::Deny
    } else if matches.is_present("limit") {
        Action::Limit
    } else {
        Action::Allow
    };

    let protocol = match matches.value_of("protocol") {
        Some("tcp") => Protocol::Tcp,
        Some("udp") => Protocol::Udp,
        _ => Protocol::Any,
    };

    let mut builder = RuleBuilder::default();
    builder.action(action).protocol(protocol);

    if let Some(port) = matches.value_of("port") {
        builder.dport(PortSpec::Specific(port.to_owned()));
    }
    if let Some(sport) = matches.value_of("sport") {
        builder.sport(PortSpec::Specific(sport.to_owned()));
    }
    if let Some(from) = matches.value_of("from") {
        builder.src(from.to_owned());
    }
    if let Some(to) = matches.value_of("to") {
        builder.dst(to.to_owned());
    }
    if matches.is_present("v6") {
        builder.v6(true);
    }

    let rule = builder.build().map_err(|e| {
        ufwrs::Error::config(format!("could not assemble rule from arguments: {}", e))
    })?;

    if matches.is_present("delete") {
        Ok(RuleIntent::remove(rule))
    } else {
        Ok(RuleIntent::add(rule))
    }
}

fn rule_args<'a, 'b>() -> Vec<Arg<'a, 'b>> {
    vec![
        Arg::with_name("deny").long("deny").help("deny matching traffic"),
        Arg::with_name("limit")
            .long("limit")
            .conflicts_with("deny")
            .help("rate-limit matching connection attempts (IPv4 only)"),
        Arg::with_name("delete").long("delete").help("remove this rule instead of adding it"),
        Arg::with_name("protocol")
            .long("proto")
            .takes_value(true)
            .possible_values(&["any", "tcp", "udp"])
            .help("protocol to match (default: any)"),
        Arg::with_name("port").long("port").takes_value(true).help("destination port"),
        Arg::with_name("sport").long("sport").takes_value(true).help("source port"),
        Arg::with_name("from").long("from").takes_value(true).help("source address/CIDR"),
        Arg::with_name("to").long("to").takes_value(true).help("destination address/CIDR"),
        Arg::with_name("v6").long("v6").help("apply to IPv6 instead of IPv4"),
    ]
}

fn run() -> Result<()> {
    let matches = App::new("ufwrs")
        .version(env!("CARGO_PKG_VERSION"))
        .about("host firewall rule manager")
        .arg(
            Arg::with_name("config")
                .long("config")
                .takes_value(true)
                .help("path to a TOML configuration file"),
        )
        .arg(Arg::with_name("verbose").short("v").long("verbose").help("enable debug logging"))
        .arg(
            Arg::with_name("dry-run")
                .long("dry-run")
                .help("print what would happen without touching disk or kernel"),
        )
        .subcommand(SubCommand::with_name("status").about("show the current ruleset and policy"))
        .subcommand(SubCommand::with_name("start").about("load the firewall at boot"))
        .subcommand(SubCommand::with_name("stop").about("disable the firewall"))
        .subcommand(SubCommand::with_name("reload").about("force a full kernel reload"))
        .subcommand(
            SubCommand::with_name("allow").about("allow matching traffic").args(&rule_args()),
        )
        .subcommand(SubCommand::with_name("rule").about("add or remove an arbitrary rule").args(&rule_args()))
        .subcommand(
            SubCommand::with_name("default")
                .about("set the default input policy")
                .arg(
                    Arg::with_name("policy")
                        .required(true)
                        .possible_values(&["allow", "deny"]),
                ),
        )
        .subcommand(
            SubCommand::with_name("logging")
                .about("toggle packet logging")
                .arg(
                    Arg::with_name("state")
                        .required(true)
                        .possible_values(&["on", "off"]),
                ),
        )
        .subcommand(
            SubCommand::with_name("daemon")
                .about("run in the foreground, reacting to SIGHUP/SIGTERM/SIGINT"),
        )
        .get_matches();

    let logger = build_logger(matches.is_present("verbose"))?;

    let mut config = match matches.value_of("config") {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if matches.is_present("dry-run") {
        config.dry_run = true;
    }

    let mut engine = Engine::new(config, logger.clone())?;

    match matches.subcommand() {
        ("status", Some(_)) => println!("{}", engine.get_status()?),
        ("start", Some(_)) => engine.start()?,
        ("stop", Some(_)) => engine.stop()?,
        ("reload", Some(_)) => {
            engine.reload(false)?;
            engine.reload(true)?;
        }
        ("allow", Some(m)) | ("rule", Some(m)) => {
            let intent = parse_rule_args(m)?;
            println!("{}", engine.set_rule(intent)?);
        }
        ("default", Some(m)) => {
            let allow = m.value_of("policy") == Some("allow");
            println!("{}", engine.set_default_policy(allow)?);
        }
        ("logging", Some(m)) => {
            let level = if m.value_of("state") == Some("on") {
                LogLevel::On
            } else {
                LogLevel::Off
            };
            println!("{}", engine.set_loglevel(level)?);
        }
        ("daemon", Some(_)) => run_daemon(&mut engine, &logger)?,
        _ => println!("{}", engine.get_status()?),
    }

    Ok(())
}

/// Foreground loop: `SIGHUP` forces a reload, `SIGTERM`/`SIGINT` stop the
/// firewall and exit (spec section 5).
fn run_daemon(engine: &mut Engine, logger: &Logger) -> Result<()> {
    let signals = Signals::new(&[
        signal_hook::SIGHUP,
        signal_hook::SIGTERM,
        signal_hook::SIGINT,
    ])
    .map_err(|e| ufwrs::Error::config(format!("could not register signal handler: {}", e)))?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let (tx, rx) = bounded(16);
    {
        let tx = tx.clone();
        std::thread::spawn(move || {
            for signal in signals.forever() {
                if tx.send(signal).is_err() {
                    break;
                }
            }
        });
    }

    let heartbeat = tick(std::time::Duration::from_secs(60));
    info!(logger, "daemon started");

    loop {
        select! {
            recv(rx) -> signal => {
                match signal {
                    Ok(signal_hook::SIGHUP) => {
                        info!(logger, "received SIGHUP, reloading");
                        engine.reload(false)?;
                        engine.reload(true)?;
                    }
                    Ok(sig) => {
                        info!(logger, "received shutdown signal"; "signal" => sig);
                        shutdown.store(true, Ordering::SeqCst);
                    }
                    Err(_) => break,
                }
            }
            recv(heartbeat) -> _ => {}
        }

        if shutdown.load(Ordering::SeqCst) {
            break;
        }
    }

    crit!(logger, "daemon exiting");
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
