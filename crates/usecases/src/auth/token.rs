// SPDX-FileCopyrightText: Copyright (C) The eggplant authors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The access-token format.
//!
//! A token is `<hex(random)>-<hex(username)>`. The random prefix makes
//! the token unforgeable per session while the suffix lets any layer
//! recover the username without a database lookup. Both halves are hex,
//! so the separator occurs exactly once in a well-formed token.

use anyhow::Context as _;
use rand::RngCore as _;

use eggplant_core::auth::AccessToken;

const TOKEN_RANDOM_BYTES: usize = 256 / 8;
const TOKEN_SEPARATOR: char = '-';

#[derive(Debug, Clone, Copy, Default)]
pub struct AccessTokenCodec;

impl AccessTokenCodec {
    pub fn generate(&self, username: &str) -> anyhow::Result<AccessToken> {
        let random = crypto_string(TOKEN_RANDOM_BYTES)?;
        let encoded_username = hex::encode(username.as_bytes());
        Ok(AccessToken::new(format!(
            "{random}{TOKEN_SEPARATOR}{encoded_username}"
        )))
    }

    pub fn username(&self, token: &AccessToken) -> anyhow::Result<String> {
        let mut parts = token.as_str().split(TOKEN_SEPARATOR);
        let (Some(_), Some(encoded_username), None) = (parts.next(), parts.next(), parts.next())
        else {
            anyhow::bail!("malformed token");
        };
        let bytes = hex::decode(encoded_username).context("hex decoding failed")?;
        String::from_utf8(bytes).context("username is not valid utf-8")
    }
}

/// A random string generated from a cryptographically secure source.
/// `num_bytes` is the number of random bytes; the string is twice as
/// long.
pub fn crypto_string(num_bytes: usize) -> anyhow::Result<String> {
    let mut bytes = vec![0u8; num_bytes];
    rand::rngs::OsRng
        .try_fill_bytes(&mut bytes)
        .context("could not read from the random source")?;
    Ok(hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_username_round_trips() {
        let codec = AccessTokenCodec;
        for username in ["ada", "user name", "użytkownik"] {
            let token = codec.generate(username).unwrap();
            assert_eq!(username, codec.username(&token).unwrap());
        }
    }

    #[test]
    fn tokens_differ_between_sessions() {
        let codec = AccessTokenCodec;
        let first = codec.generate("ada").unwrap();
        let second = codec.generate("ada").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        let codec = AccessTokenCodec;
        for token in ["", "nodash", "a-b-c", "abc-nothex"] {
            assert!(codec.username(&AccessToken::new(token)).is_err(), "{token}");
        }
    }
}
