// SPDX-FileCopyrightText: Copyright (C) The eggplant authors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Parsing of per-directory access files.
//!
//! An access file is UTF-8 text with one `key: value` entry per line.
//! The only recognized key is `public` with the values `yes` and `no`.
//! Later entries override earlier ones. Anything unexpected is an error
//! so that a typo never accidentally exposes an album.

use std::{io, path::Path};

use thiserror::Error;

use eggplant_core::music::Access;

#[derive(Debug, Error)]
pub enum Error {
    #[error("could not read the access file")]
    Io(#[from] io::Error),

    #[error("access file is empty")]
    Empty,

    #[error("malformed line '{0}'")]
    MalformedLine(String),

    #[error("value '{0}' is not 'yes' or 'no'")]
    InvalidValue(String),

    #[error("unrecognized key '{0}'")]
    UnrecognizedKey(String),
}

pub fn load(path: &Path) -> Result<Access, Error> {
    parse(&std::fs::read_to_string(path)?)
}

pub fn parse(contents: &str) -> Result<Access, Error> {
    let mut access = Access::default();
    let mut empty = true;
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        empty = false;
        let (key, value) = parse_line(line)?;
        match key {
            "public" => access.public = value,
            _ => return Err(Error::UnrecognizedKey(key.to_owned())),
        }
    }
    if empty {
        return Err(Error::Empty);
    }
    Ok(access)
}

fn parse_line(line: &str) -> Result<(&str, bool), Error> {
    let Some((key, value)) = line.split_once(':') else {
        return Err(Error::MalformedLine(line.to_owned()));
    };
    let value = match value.trim() {
        "yes" => true,
        "no" => false,
        other => return Err(Error::InvalidValue(other.to_owned())),
    };
    Ok((key.trim(), value))
}
