// SPDX-FileCopyrightText: Copyright (C) The eggplant authors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Transactions over the embedded database.
//!
//! Read transactions run concurrently on the blocking thread pool.
//! Write transactions are funneled through a single writer task which
//! drains a burst of queued handlers into one underlying transaction.
//! When any handler of a batch fails the whole transaction is rolled
//! back and every handler is re-run in a transaction of its own, so a
//! failing write never poisons unrelated ones. Handlers must therefore
//! be idempotent.

use std::{fmt, sync::Arc};

use anyhow::anyhow;
use parking_lot::Mutex;
use redb::Database;
use tokio::sync::{mpsc, oneshot};

use eggplant_repo::{RepoError, RepoResult};

use crate::Repositories;

const MAX_WRITE_BATCH: usize = 64;

type WriteHandler = Box<dyn Fn(&mut Repositories<'_>) -> RepoResult<()> + Send + Sync>;

struct WriteRequest {
    handler: WriteHandler,
    reply: oneshot::Sender<RepoResult<()>>,
}

pub struct TransactionProvider {
    pub(crate) db: Arc<Database>,
    write_tx: mpsc::UnboundedSender<WriteRequest>,
}

impl fmt::Debug for TransactionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionProvider").finish_non_exhaustive()
    }
}

impl TransactionProvider {
    /// Takes ownership of the database and launches the writer task.
    /// The task ends when the last provider handle is dropped.
    #[must_use]
    pub fn new(db: Database) -> Arc<Self> {
        let db = Arc::new(db);
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_worker(Arc::clone(&db), write_rx));
        Arc::new(Self { db, write_tx })
    }

    /// Runs the handler inside a read transaction.
    pub async fn read<T, E, F>(&self, handler: F) -> Result<T, E>
    where
        F: FnOnce(&mut Repositories<'_>) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<RepoError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let txn = db
                .begin_read()
                .map_err(|err| E::from(RepoError::Other(anyhow::Error::new(err))))?;
            let mut repositories = Repositories::read(&txn).map_err(E::from)?;
            handler(&mut repositories)
        })
        .await
        .map_err(|err| E::from(RepoError::Other(anyhow::Error::new(err))))?
    }

    /// Runs the handler inside a write transaction, possibly batched
    /// together with concurrent writers. The handler may be invoked more
    /// than once and must be idempotent. Any handler error rolls the
    /// transaction back and is returned unchanged.
    pub async fn write<T, E, F>(&self, handler: F) -> Result<T, E>
    where
        F: Fn(&mut Repositories<'_>) -> Result<T, E> + Send + Sync + 'static,
        T: Send + 'static,
        E: From<RepoError> + Send + 'static,
    {
        // The batching machinery works with one uniform handler shape;
        // the typed outcome travels on the side.
        let outcome: Arc<Mutex<Option<Result<T, E>>>> = Arc::new(Mutex::new(None));
        let wrapped = {
            let outcome = Arc::clone(&outcome);
            move |repositories: &mut Repositories<'_>| match handler(repositories) {
                Ok(value) => {
                    *outcome.lock() = Some(Ok(value));
                    Ok(())
                }
                Err(err) => {
                    *outcome.lock() = Some(Err(err));
                    Err(RepoError::Other(anyhow!("write handler failed")))
                }
            }
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        self.write_tx
            .send(WriteRequest {
                handler: Box::new(wrapped),
                reply: reply_tx,
            })
            .map_err(|_| E::from(RepoError::Other(anyhow!("the write worker is gone"))))?;
        let reply = reply_rx.await.map_err(|_| {
            E::from(RepoError::Other(anyhow!(
                "the write worker dropped the request"
            )))
        })?;

        match reply {
            Ok(()) => match outcome.lock().take() {
                Some(result) => result,
                None => Err(E::from(RepoError::Other(anyhow!(
                    "the write handler produced no result"
                )))),
            },
            Err(err) => match outcome.lock().take() {
                // The handler itself failed; its typed error wins over
                // the sentinel carried through the batch machinery.
                Some(Err(handler_err)) => Err(handler_err),
                _ => Err(E::from(err)),
            },
        }
    }
}

async fn write_worker(db: Arc<Database>, mut requests: mpsc::UnboundedReceiver<WriteRequest>) {
    while let Some(first) = requests.recv().await {
        let mut batch = vec![first];
        while batch.len() < MAX_WRITE_BATCH {
            match requests.try_recv() {
                Ok(request) => batch.push(request),
                Err(_) => break,
            }
        }

        let db = Arc::clone(&db);
        if let Err(err) = tokio::task::spawn_blocking(move || run_batch(&db, batch)).await {
            log::error!("write batch task failed: {err}");
        }
    }
}

fn run_batch(db: &Database, batch: Vec<WriteRequest>) {
    if batch.len() == 1 {
        let request = batch.into_iter().next().expect("one request");
        let result = run_single(db, &request.handler);
        let _ = request.reply.send(result);
        return;
    }

    match run_in_one_transaction(db, &batch) {
        Ok(()) => {
            for request in batch {
                let _ = request.reply.send(Ok(()));
            }
        }
        Err(_) => {
            // Roll back and retry each handler on its own so that one
            // failing write does not take the whole batch down.
            for request in batch {
                let result = run_single(db, &request.handler);
                let _ = request.reply.send(result);
            }
        }
    }
}

fn run_in_one_transaction(db: &Database, batch: &[WriteRequest]) -> RepoResult<()> {
    let txn = db.begin_write().map_err(anyhow::Error::new)?;
    {
        let mut repositories = Repositories::write(&txn)?;
        for request in batch {
            (request.handler)(&mut repositories)?;
        }
    }
    txn.commit().map_err(anyhow::Error::new)?;
    Ok(())
}

fn run_single(db: &Database, handler: &WriteHandler) -> RepoResult<()> {
    let txn = db.begin_write().map_err(anyhow::Error::new)?;
    {
        let mut repositories = Repositories::write(&txn)?;
        handler(&mut repositories)?;
    }
    txn.commit().map_err(anyhow::Error::new)?;
    Ok(())
}
