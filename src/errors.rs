// Copyright 2017, 2018 Pit Kleyersburg <pitkley@googlemail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified or distributed
// except according to those terms.

//! Error taxonomy for the engine, codec, restore-script generator and status
//! parser.
//!
//! `ParseWarning` is never returned from a fallible operation -- it is
//! logged and skipped at the call-site -- but it is kept as a variant so
//! code that wants to collect warnings (rather than only log them) has
//! something typed to match on.

use std::io;

use failure::Fail;

pub type Result<T> = ::std::result::Result<T, Error>;

#[derive(Debug, Fail)]
pub enum Error {
    /// Malformed defaults file, or an unknown policy value passed to
    /// `set_default_policy`.
    #[fail(display = "configuration error: {}", message)]
    ConfigError { message: String },

    /// File open/read/write/rename failure.
    #[fail(display = "I/O error: {}", _0)]
    IoError(#[cause] io::Error),

    /// A packet-filter binary exited non-zero.
    #[fail(display = "'{}' failed: {}", command, stderr)]
    ExternalCommandError { command: String, stderr: String },

    /// A persisted tuple line or a status line could not be parsed.
    #[fail(display = "parse warning: {}", message)]
    ParseWarning { message: String },
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::IoError(e)
    }
}

impl Error {
    pub fn config<S: Into<String>>(message: S) -> Error {
        Error::ConfigError {
            message: message.into(),
        }
    }

    pub fn external_command<S: Into<String>>(command: S, stderr: S) -> Error {
        Error::ExternalCommandError {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    pub fn parse_warning<S: Into<String>>(message: S) -> Error {
        Error::ParseWarning {
            message: message.into(),
        }
    }
}
