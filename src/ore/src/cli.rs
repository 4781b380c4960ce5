// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License in the LICENSE file at the
// root of this repository, or online at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


//! Command-line parsing utilities.

use std::ffi::OsString;

use clap::{Command, Parser};

/// Usage shown by `--help`: no binary name or version banner, since the
/// binaries are not versioned independently of the workspace.
const HELP_TEMPLATE: &str = "{about}

USAGE:
    {usage}

{all-args}";

fn customize(command: Command) -> Command {
    command
        .disable_version_flag(true)
        .args_override_self(true)
        .help_template(HELP_TEMPLATE)
}

/// Parses the process's command-line arguments into `O`, printing usage and
/// exiting on error.
pub fn parse_args<O>() -> O
where
    O: Parser,
{
    match parse_args_from(std::env::args_os()) {
        Ok(args) => args,
        Err(e) => e.exit(),
    }
}

/// Like [parse_args], but parses `args` and returns errors. The first item
/// is the binary name.
pub fn parse_args_from<O, I, T>(args: I) -> Result<O, clap::Error>
where
    O: Parser,
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = customize(O::command()).try_get_matches_from(args)?;
    O::from_arg_matches(&matches)
}
