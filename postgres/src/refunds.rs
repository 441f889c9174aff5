//! Refund requests and settlement.

use crate::orders::transition_in;
use crate::{PostgresStore, commit, rows, write_error};
use commerce_core::environment::BoxFuture;
use commerce_core::error::StoreError;
use commerce_core::status::RefundStatus;
use commerce_core::store::{RecordedDecision, RefundSettlement, RefundStore, SettledRefund};
use commerce_core::types::{OrderId, RefundRequest, RefundRequestId};
use rust_decimal::Decimal;
use sqlx::PgConnection;

async fn lock_refund(
    conn: &mut PgConnection,
    id: RefundRequestId,
) -> Result<RefundRequest, StoreError> {
    let row = sqlx::query("SELECT * FROM refund_requests WHERE refund_id = $1 FOR UPDATE")
        .bind(id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to lock refund request: {e}")))?
        .ok_or_else(|| StoreError::NotFound {
            entity: "refund_request",
            id: id.to_string(),
        })?;
    rows::refund_request(&row)
}

fn expect_status(refund: &RefundRequest, expected: RefundStatus) -> Result<(), StoreError> {
    if refund.status == expected {
        Ok(())
    } else {
        Err(StoreError::RefundStatusConflict {
            refund_id: refund.id,
            expected,
            actual: refund.status,
        })
    }
}

impl PostgresStore {
    async fn record_decision_tx(
        &self,
        decision: RecordedDecision,
    ) -> Result<RefundRequest, StoreError> {
        let mut tx = self.begin().await?;
        let current = lock_refund(&mut *tx, decision.refund_id).await?;
        expect_status(&current, RefundStatus::Pending)?;

        let row = sqlx::query(
            r"
            UPDATE refund_requests
            SET status = $2,
                approved_amount = $3,
                method = $4,
                reviewed_by = $5,
                admin_notes = $6,
                denial_reason = $7,
                reviewed_at = $8
            WHERE refund_id = $1
            RETURNING *
            ",
        )
        .bind(decision.refund_id.as_uuid())
        .bind(decision.status.as_str())
        .bind(decision.approved_amount.map(Decimal::from))
        .bind(decision.method.as_str())
        .bind(&decision.reviewed_by)
        .bind(&decision.admin_notes)
        .bind(&decision.denial_reason)
        .bind(decision.at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to record decision: {e}")))?;
        let refund = rows::refund_request(&row)?;

        commit(tx).await?;
        Ok(refund)
    }

    async fn settle_refund_tx(
        &self,
        settlement: RefundSettlement,
    ) -> Result<SettledRefund, StoreError> {
        let mut tx = self.begin().await?;
        let current = lock_refund(&mut *tx, settlement.refund_id).await?;
        expect_status(&current, RefundStatus::Approved)?;

        let at = settlement.order.at;
        let order = transition_in(&mut *tx, settlement.order).await?;
        let credit_transaction = match settlement.credit {
            Some(entry) => Some(crate::credit::append_in(&mut *tx, entry, at).await?),
            None => None,
        };

        let reference = settlement.provider_refund_reference;
        let row = sqlx::query(
            r"
            UPDATE refund_requests
            SET status = $2, provider_refund_reference = $3, refunded_at = $4
            WHERE refund_id = $1
            RETURNING *
            ",
        )
        .bind(settlement.refund_id.as_uuid())
        .bind(RefundStatus::Refunded.as_str())
        .bind(&reference)
        .bind(at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| write_error(&e, reference.as_deref().unwrap_or_default()))?;
        let refund = rows::refund_request(&row)?;

        commit(tx).await?;
        Ok(SettledRefund {
            refund,
            order,
            credit_transaction,
        })
    }
}

impl RefundStore for PostgresStore {
    fn insert_refund_request(
        &self,
        request: RefundRequest,
    ) -> BoxFuture<'_, Result<RefundRequest, StoreError>> {
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO refund_requests (
                    refund_id, order_id, requested_amount, approved_amount, reason, method,
                    status, reviewed_by, admin_notes, denial_reason, provider_refund_reference,
                    created_at, reviewed_at, refunded_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                ",
            )
            .bind(request.id.as_uuid())
            .bind(request.order_id.as_uuid())
            .bind(Decimal::from(request.requested_amount))
            .bind(request.approved_amount.map(Decimal::from))
            .bind(&request.reason)
            .bind(request.method.as_str())
            .bind(request.status.as_str())
            .bind(&request.reviewed_by)
            .bind(&request.admin_notes)
            .bind(&request.denial_reason)
            .bind(&request.provider_refund_reference)
            .bind(request.created_at)
            .bind(request.reviewed_at)
            .bind(request.refunded_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(db_err) = &e {
                    if db_err.is_foreign_key_violation() {
                        return StoreError::NotFound {
                            entity: "order",
                            id: request.order_id.to_string(),
                        };
                    }
                }
                StoreError::Database(format!("Failed to insert refund request: {e}"))
            })?;
            Ok(request)
        })
    }

    fn refund_request(
        &self,
        id: RefundRequestId,
    ) -> BoxFuture<'_, Result<Option<RefundRequest>, StoreError>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT * FROM refund_requests WHERE refund_id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;
            row.as_ref().map(rows::refund_request).transpose()
        })
    }

    fn refund_requests_for_order(
        &self,
        order_id: OrderId,
    ) -> BoxFuture<'_, Result<Vec<RefundRequest>, StoreError>> {
        Box::pin(async move {
            let records = sqlx::query(
                r"
                SELECT * FROM refund_requests
                WHERE order_id = $1
                ORDER BY created_at ASC, refund_id ASC
                ",
            )
            .bind(order_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
            records.iter().map(rows::refund_request).collect()
        })
    }

    fn refund_by_provider_reference(
        &self,
        reference: String,
    ) -> BoxFuture<'_, Result<Option<RefundRequest>, StoreError>> {
        Box::pin(async move {
            let row =
                sqlx::query("SELECT * FROM refund_requests WHERE provider_refund_reference = $1")
                    .bind(&reference)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| StoreError::Database(e.to_string()))?;
            row.as_ref().map(rows::refund_request).transpose()
        })
    }

    fn record_decision(
        &self,
        decision: RecordedDecision,
    ) -> BoxFuture<'_, Result<RefundRequest, StoreError>> {
        Box::pin(self.record_decision_tx(decision))
    }

    fn settle_refund(
        &self,
        settlement: RefundSettlement,
    ) -> BoxFuture<'_, Result<SettledRefund, StoreError>> {
        Box::pin(self.settle_refund_tx(settlement))
    }
}
