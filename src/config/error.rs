// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
//! Config/metadata I/O errors (§4.J, §7). Setup-time failures (bad path,
//! unreadable file) are fatal; everything else is a load error the caller
//! logs and shrugs off, keeping the previous in-memory state (§7 "Load
//! errors... fail the single load operation, keep running with previous
//! state").

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("error reading config file: {0}")]
    Io(#[from] io::Error),
    #[error("parse error at line {line}: {reason}")]
    Parse { line: usize, reason: String },
    /// Not a hard failure: an unrecognized key or action name in an
    /// INI/RGX line (§7 "parse warnings... ignore that binding, continue
    /// loading others"). Carried as an error type purely so the warning
    /// has a structured `Display` the loader can log, never returned from
    /// `load`/`load_or_default`.
    #[error("unknown key {key:?} on line {line}")]
    UnknownKey { line: usize, key: String },
}
