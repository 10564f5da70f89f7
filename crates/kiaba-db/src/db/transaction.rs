//! Database transaction utilities

use anyhow::{Context, Result};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};

/// Transaction wrapper for multi-step writes.
///
/// ```ignore
/// let mut tx = TransactionGuard::begin(pool).await?;
/// sqlx::query("UPDATE ...").execute(tx.conn()?).await?;
/// tx.commit().await?;
/// ```
pub struct TransactionGuard<'a> {
    transaction: Option<Transaction<'a, Postgres>>,
}

impl<'a> TransactionGuard<'a> {
    pub async fn begin(pool: &'a PgPool) -> Result<Self> {
        let transaction = pool
            .begin()
            .await
            .context("Failed to begin database transaction")?;

        Ok(Self {
            transaction: Some(transaction),
        })
    }

    /// Connection of the open transaction.
    pub fn conn(&mut self) -> Result<&mut PgConnection> {
        self.transaction
            .as_mut()
            .map(|tx| &mut **tx)
            .context("Transaction was already committed or rolled back")
    }

    pub async fn commit(mut self) -> Result<()> {
        if let Some(tx) = self.transaction.take() {
            tx.commit()
                .await
                .context("Failed to commit database transaction")?;
        }
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<()> {
        if let Some(tx) = self.transaction.take() {
            tx.rollback()
                .await
                .context("Failed to rollback database transaction")?;
        }
        Ok(())
    }
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        // sqlx rolls back a dropped transaction when the connection returns to the pool.
        if self.transaction.is_some() {
            tracing::debug!("Transaction dropped without commit, rolling back");
        }
    }
}
