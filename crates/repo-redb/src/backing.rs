// SPDX-FileCopyrightText: Copyright (C) The eggplant authors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Access to one redb table from either transaction shape.
//!
//! Tables are created lazily by write transactions. A read transaction
//! that runs before the first write observes a missing table, which is
//! indistinguishable from an empty one.

use anyhow::anyhow;
use redb::{
    ReadOnlyTable, ReadTransaction, ReadableTable as _, ReadableTableMetadata as _, Table,
    TableDefinition, TableError, WriteTransaction,
};

use eggplant_repo::{RepoError, RepoResult};

type Definition = TableDefinition<'static, &'static str, &'static [u8]>;

pub(crate) enum Backing<'txn> {
    ReadOnly(Option<ReadOnlyTable<&'static str, &'static [u8]>>),
    ReadWrite(Table<'txn, &'static str, &'static [u8]>),
}

impl<'txn> Backing<'txn> {
    pub(crate) fn read(txn: &ReadTransaction, definition: Definition) -> RepoResult<Self> {
        match txn.open_table(definition) {
            Ok(table) => Ok(Self::ReadOnly(Some(table))),
            Err(TableError::TableDoesNotExist(_)) => Ok(Self::ReadOnly(None)),
            Err(err) => Err(RepoError::Other(anyhow::Error::new(err))),
        }
    }

    pub(crate) fn write(txn: &'txn WriteTransaction, definition: Definition) -> RepoResult<Self> {
        txn.open_table(definition)
            .map(Self::ReadWrite)
            .map_err(|err| RepoError::Other(anyhow::Error::new(err)))
    }

    pub(crate) fn get(&self, key: &str) -> RepoResult<Option<Vec<u8>>> {
        let value = match self {
            Self::ReadOnly(None) => None,
            Self::ReadOnly(Some(table)) => table
                .get(key)
                .map_err(anyhow::Error::new)?
                .map(|guard| guard.value().to_vec()),
            Self::ReadWrite(table) => table
                .get(key)
                .map_err(anyhow::Error::new)?
                .map(|guard| guard.value().to_vec()),
        };
        Ok(value)
    }

    pub(crate) fn insert(&mut self, key: &str, value: &[u8]) -> RepoResult<()> {
        match self {
            Self::ReadWrite(table) => {
                table.insert(key, value).map_err(anyhow::Error::new)?;
                Ok(())
            }
            Self::ReadOnly(_) => Err(RepoError::Other(anyhow!(
                "cannot write within a read transaction"
            ))),
        }
    }

    pub(crate) fn remove(&mut self, key: &str) -> RepoResult<()> {
        match self {
            Self::ReadWrite(table) => {
                table.remove(key).map_err(anyhow::Error::new)?;
                Ok(())
            }
            Self::ReadOnly(_) => Err(RepoError::Other(anyhow!(
                "cannot write within a read transaction"
            ))),
        }
    }

    pub(crate) fn len(&self) -> RepoResult<u64> {
        let len = match self {
            Self::ReadOnly(None) => 0,
            Self::ReadOnly(Some(table)) => table.len().map_err(anyhow::Error::new)?,
            Self::ReadWrite(table) => table.len().map_err(anyhow::Error::new)?,
        };
        Ok(len)
    }

    pub(crate) fn entries(&self) -> RepoResult<Vec<(String, Vec<u8>)>> {
        let range = match self {
            Self::ReadOnly(None) => return Ok(Vec::new()),
            Self::ReadOnly(Some(table)) => table.iter().map_err(anyhow::Error::new)?,
            Self::ReadWrite(table) => table.iter().map_err(anyhow::Error::new)?,
        };
        let mut entries = Vec::new();
        for entry in range {
            let (key, value) = entry.map_err(anyhow::Error::new)?;
            entries.push((key.value().to_owned(), value.value().to_vec()));
        }
        Ok(entries)
    }
}

impl std::fmt::Debug for Backing<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::ReadOnly(_) => "ReadOnly",
            Self::ReadWrite(_) => "ReadWrite",
        };
        f.debug_tuple("Backing").field(&kind).finish()
    }
}
