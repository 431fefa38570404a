// Copyright 2017, 2018 Pit Kleyersburg <pitkley@googlemail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified or distributed
// except according to those terms.

//! Process runner: executes external packet-filter binaries and captures
//! their output (spec section 4.6). A pipe variant feeds one program's
//! stdout into another's stdin, mirroring the shell pipelines the original
//! tool shells out to (e.g. `cat user.rules | iptables-restore`).
//!
//! In dry-run mode both variants print the would-be command instead of
//! executing it.

use std::io::Write;
use std::process::{Command, Stdio};

use slog::{debug, Logger};

use crate::errors::{Error, Result};

/// Output of a completed external command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub output: String,
}

/// Runs external binaries, or in dry-run mode, prints what would have run.
pub struct ProcessRunner {
    dry_run: bool,
    logger: Logger,
}

impl ProcessRunner {
    pub fn new(dry_run: bool, logger: Logger) -> ProcessRunner {
        ProcessRunner { dry_run, logger }
    }

    /// Run `program` with `args`, waiting for completion and capturing
    /// combined stdout+stderr.
    pub fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        if self.dry_run {
            println!("> {} {}", program, args.join(" "));
            return Ok(CommandOutput {
                success: true,
                output: String::new(),
            });
        }

        debug!(self.logger, "running command"; "program" => program, "args" => args.join(" "));

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(CommandOutput {
            success: output.status.success(),
            output: combined,
        })
    }

    /// Run `program` with `args`, returning an `ExternalCommandError` on a
    /// non-zero exit (spec section 7).
    pub fn run_checked(&self, program: &str, args: &[&str]) -> Result<String> {
        let result = self.run(program, args)?;
        if result.success {
            Ok(result.output)
        } else {
            Err(Error::external_command(
                format!("{} {}", program, args.join(" ")),
                result.output,
            ))
        }
    }

    /// Feed `stdin` to `program`'s standard input, returning its combined
    /// output. Used for `cat user.rules | iptables-restore` style
    /// invocations.
    pub fn run_pipe(&self, program: &str, args: &[&str], stdin: &str) -> Result<CommandOutput> {
        if self.dry_run {
            println!("> echo <rules> | {} {}", program, args.join(" "));
            return Ok(CommandOutput {
                success: true,
                output: String::new(),
            });
        }

        debug!(self.logger, "running piped command"; "program" => program, "args" => args.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        {
            let child_stdin = child
                .stdin
                .as_mut()
                .ok_or_else(|| Error::config("could not open child stdin"))?;
            child_stdin.write_all(stdin.as_bytes())?;
        }

        let output = child.wait_with_output()?;
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(CommandOutput {
            success: output.status.success(),
            output: combined,
        })
    }

    pub fn run_pipe_checked(&self, program: &str, args: &[&str], stdin: &str) -> Result<String> {
        let result = self.run_pipe(program, args, stdin)?;
        if result.success {
            Ok(result.output)
        } else {
            Err(Error::external_command(
                format!("{} {}", program, args.join(" ")),
                result.output,
            ))
        }
    }
}
