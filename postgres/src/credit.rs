//! Store-credit accounts and ledger.

use crate::{PostgresStore, commit, rows};
use chrono::{DateTime, Utc};
use commerce_core::environment::BoxFuture;
use commerce_core::error::StoreError;
use commerce_core::money::Money;
use commerce_core::store::StoreCreditLedger;
use commerce_core::types::{
    CreditEntry, CreditTransactionKind, StoreCreditAccount, StoreCreditTransaction,
    StoreCreditTransactionId,
};
use rust_decimal::Decimal;
use sqlx::PgConnection;

/// Append a ledger entry inside an open transaction.
///
/// The account row is locked first, so appends for one email are serialised
/// and the balance read from the ledger cannot go stale before the insert.
pub(crate) async fn append_in(
    conn: &mut PgConnection,
    entry: CreditEntry,
    now: DateTime<Utc>,
) -> Result<StoreCreditTransaction, StoreError> {
    if entry.kind == CreditTransactionKind::Earn {
        sqlx::query(
            r"
            INSERT INTO store_credit_accounts
                (email, balance, lifetime_earned, lifetime_used, created_at, updated_at)
            VALUES ($1, 0, 0, 0, $2, $2)
            ON CONFLICT (email) DO NOTHING
            ",
        )
        .bind(&entry.email)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to open credit account: {e}")))?;
    }

    let locked = sqlx::query("SELECT email FROM store_credit_accounts WHERE email = $1 FOR UPDATE")
        .bind(&entry.email)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to lock credit account: {e}")))?;

    let (balance,): (Decimal,) = sqlx::query_as(
        r"
        SELECT COALESCE(SUM(CASE WHEN kind = 'earn' THEN amount ELSE -amount END), 0)
        FROM store_credit_transactions
        WHERE email = $1
        ",
    )
    .bind(&entry.email)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| StoreError::Database(format!("Failed to sum credit ledger: {e}")))?;
    let balance = Money::new(balance);

    let balance_after = match entry.kind {
        CreditTransactionKind::Earn => balance + entry.amount,
        CreditTransactionKind::Spend => {
            if locked.is_none() || entry.amount > balance {
                return Err(StoreError::InsufficientCredit {
                    email: entry.email,
                    balance: balance.to_string(),
                    requested: entry.amount.to_string(),
                });
            }
            balance - entry.amount
        }
    };

    let transaction = StoreCreditTransaction {
        id: StoreCreditTransactionId::new(),
        email: entry.email,
        kind: entry.kind,
        amount: entry.amount,
        balance_after,
        source: entry.source,
        order_id: entry.order_id,
        refund_request_id: entry.refund_request_id,
        created_at: now,
    };

    sqlx::query(
        r"
        INSERT INTO store_credit_transactions
            (transaction_id, email, kind, amount, balance_after, source,
             order_id, refund_request_id, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ",
    )
    .bind(transaction.id.as_uuid())
    .bind(&transaction.email)
    .bind(transaction.kind.as_str())
    .bind(Decimal::from(transaction.amount))
    .bind(Decimal::from(transaction.balance_after))
    .bind(transaction.source.as_str())
    .bind(transaction.order_id.map(|id| id.as_uuid()))
    .bind(transaction.refund_request_id.map(|id| id.as_uuid()))
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|e| StoreError::Database(format!("Failed to append credit entry: {e}")))?;

    let (earned, used) = match transaction.kind {
        CreditTransactionKind::Earn => (transaction.amount, Money::ZERO),
        CreditTransactionKind::Spend => (Money::ZERO, transaction.amount),
    };
    sqlx::query(
        r"
        UPDATE store_credit_accounts
        SET balance = $2,
            lifetime_earned = lifetime_earned + $3,
            lifetime_used = lifetime_used + $4,
            updated_at = $5
        WHERE email = $1
        ",
    )
    .bind(&transaction.email)
    .bind(Decimal::from(balance_after))
    .bind(Decimal::from(earned))
    .bind(Decimal::from(used))
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|e| StoreError::Database(format!("Failed to update credit account: {e}")))?;

    metrics::counter!("store_credit.ledger_appends", "kind" => transaction.kind.as_str())
        .increment(1);
    Ok(transaction)
}

impl StoreCreditLedger for PostgresStore {
    fn credit_account(
        &self,
        email: String,
    ) -> BoxFuture<'_, Result<Option<StoreCreditAccount>, StoreError>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT * FROM store_credit_accounts WHERE email = $1")
                .bind(&email)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;
            row.as_ref().map(rows::credit_account).transpose()
        })
    }

    fn credit_transactions(
        &self,
        email: String,
    ) -> BoxFuture<'_, Result<Vec<StoreCreditTransaction>, StoreError>> {
        Box::pin(async move {
            let records = sqlx::query(
                "SELECT * FROM store_credit_transactions WHERE email = $1 ORDER BY seq ASC",
            )
            .bind(&email)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
            records.iter().map(rows::credit_transaction).collect()
        })
    }

    fn append_credit(
        &self,
        entry: CreditEntry,
    ) -> BoxFuture<'_, Result<StoreCreditTransaction, StoreError>> {
        Box::pin(async move {
            let mut tx = self.begin().await?;
            let transaction = append_in(&mut *tx, entry, self.clock.now()).await?;
            commit(tx).await?;
            Ok(transaction)
        })
    }
}
