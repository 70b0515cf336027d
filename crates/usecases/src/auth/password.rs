// SPDX-FileCopyrightText: Copyright (C) The eggplant authors
// SPDX-License-Identifier: AGPL-3.0-or-later

use anyhow::Context as _;

use eggplant_core::auth::PasswordHash;

/// The work factor for new hashes. Existing hashes keep the cost they
/// were created with.
const BCRYPT_COST: u32 = 12;

#[derive(Debug, Clone)]
pub struct PasswordHasher {
    cost: u32,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl PasswordHasher {
    #[must_use]
    pub fn new() -> Self {
        Self { cost: BCRYPT_COST }
    }

    /// A hasher with a non-default work factor, e.g. a cheap one for
    /// tests.
    #[must_use]
    pub fn with_cost(cost: u32) -> Self {
        Self { cost }
    }

    pub fn hash(&self, password: &str) -> anyhow::Result<PasswordHash> {
        bcrypt::hash(password, self.cost)
            .map(PasswordHash::new)
            .context("hashing the password failed")
    }

    /// Constant-time comparison of a password against a stored hash.
    /// Malformed hashes simply fail the comparison.
    #[must_use]
    pub fn verify(&self, hash: &PasswordHash, password: &str) -> bool {
        bcrypt::verify(password, hash.as_str()).unwrap_or(false)
    }
}
