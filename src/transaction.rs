use futures::future::BoxFuture;
use sqlx::{Any, AnyConnection, AnyPool, Transaction};
use tracing::{debug, warn};

use crate::error::{Error, Result, TransactionAction};

/// A database transaction that all writes of one logical operation go through.
///
/// Dropping the scope without calling [`commit`](Self::commit) rolls the transaction back.
pub struct TransactionScope {
    transaction: Transaction<'static, Any>,
}

impl TransactionScope {
    /// # Errors
    ///
    /// If no connection could be acquired, or the transaction could not be started.
    pub async fn begin(pool: &AnyPool) -> Result<Self> {
        let transaction = pool.begin().await.map_err(|source| Error::Transaction {
            action: TransactionAction::Begin,
            source,
        })?;

        debug!("Began transaction");
        Ok(Self { transaction })
    }

    /// The handle to pass as [`Options::transacting`](crate::Options::transacting).
    pub fn connection(&mut self) -> &mut AnyConnection {
        &mut self.transaction
    }

    /// # Errors
    ///
    /// If the database fails to commit.
    pub async fn commit(self) -> Result<()> {
        self.transaction
            .commit()
            .await
            .map_err(|source| Error::Transaction {
                action: TransactionAction::Commit,
                source,
            })?;

        debug!("Committed transaction");
        Ok(())
    }

    /// # Errors
    ///
    /// If the database fails to roll back.
    pub async fn rollback(self) -> Result<()> {
        self.transaction
            .rollback()
            .await
            .map_err(|source| Error::Transaction {
                action: TransactionAction::Rollback,
                source,
            })?;

        debug!("Rolled back transaction");
        Ok(())
    }

    /// Commit if `outcome` is `Ok`, otherwise roll back and return the original error.
    ///
    /// A failing rollback is logged. The caller still receives the error that caused it.
    ///
    /// # Errors
    ///
    /// The error in `outcome`, or a commit failure.
    pub async fn finish<T>(self, outcome: Result<T>) -> Result<T> {
        match outcome {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(error) => {
                if let Err(rollback) = self.rollback().await {
                    warn!("{rollback} (after: {error})");
                }
                Err(error)
            }
        }
    }
}

/// Run `f` inside a new transaction on `pool`, committing if it succeeds and rolling back if it
/// fails.
///
/// # Errors
///
/// Whatever `f` returns, or a failure to begin or commit the transaction.
pub async fn run_in_transaction<T, F>(pool: &AnyPool, f: F) -> Result<T>
where
    F: for<'c> FnOnce(&'c mut AnyConnection) -> BoxFuture<'c, Result<T>>,
{
    let mut scope = TransactionScope::begin(pool).await?;
    let outcome = f(scope.connection()).await;
    scope.finish(outcome).await
}
