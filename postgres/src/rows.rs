//! Row decoding.

use commerce_core::error::StoreError;
use commerce_core::money::Money;
use commerce_core::store::ProcessedEvent;
use commerce_core::types::{
    CustomerInfo, Order, OrderId, OrderLineItem, OrderNumber, OrderTotals, PaymentDescriptor,
    ProductId, RefundRequest, RefundRequestId, ShippingAddress, StockAdjustment, StockLevel,
    StoreCreditAccount,
    StoreCreditTransaction, StoreCreditTransactionId,
};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{Postgres, Row};
use std::fmt::Display;
use std::str::FromStr;
use uuid::Uuid;

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Serialization(format!("{column}: {e}")))
}

fn money(row: &PgRow, column: &str) -> Result<Money, StoreError> {
    get::<Decimal>(row, column).map(Money::new)
}

fn optional_money(row: &PgRow, column: &str) -> Result<Option<Money>, StoreError> {
    Ok(get::<Option<Decimal>>(row, column)?.map(Money::new))
}

fn parse<T>(row: &PgRow, column: &str) -> Result<T, StoreError>
where
    T: FromStr,
    T::Err: Display,
{
    let raw: String = get(row, column)?;
    raw.parse()
        .map_err(|e| StoreError::Serialization(format!("{column}: {e}")))
}

pub(crate) fn order(row: &PgRow) -> Result<Order, StoreError> {
    let Json(customer) = get::<Json<CustomerInfo>>(row, "customer")?;
    let shipping_address = get::<Option<Json<ShippingAddress>>>(row, "shipping_address")?
        .map(|Json(address)| address);
    let Json(items) = get::<Json<Vec<OrderLineItem>>>(row, "items")?;
    let Json(payment) = get::<Json<PaymentDescriptor>>(row, "payment")?;
    let Json(reserved) = get::<Json<Vec<StockAdjustment>>>(row, "reserved")?;

    Ok(Order {
        id: OrderId::from_uuid(get::<Uuid>(row, "order_id")?),
        order_number: OrderNumber::new(get::<String>(row, "order_number")?),
        customer,
        shipping_address,
        items,
        totals: OrderTotals {
            subtotal: money(row, "subtotal")?,
            shipping: money(row, "shipping")?,
            tax: money(row, "tax")?,
            discount: money(row, "discount")?,
            total: money(row, "total")?,
            store_credit: money(row, "store_credit_applied")?,
        },
        currency: get(row, "currency")?,
        status: parse(row, "status")?,
        payment,
        payment_status: parse(row, "payment_status")?,
        mode: parse(row, "mode")?,
        refunded_total: money(row, "refunded_total")?,
        reserved,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
        paid_at: get(row, "paid_at")?,
        shipped_at: get(row, "shipped_at")?,
        delivered_at: get(row, "delivered_at")?,
        refunded_at: get(row, "refunded_at")?,
        cancelled_at: get(row, "cancelled_at")?,
    })
}

pub(crate) fn stock_level(row: &PgRow) -> Result<StockLevel, StoreError> {
    let available: i32 = get(row, "available")?;
    Ok(StockLevel {
        product_id: ProductId::from_uuid(get(row, "product_id")?),
        name: get(row, "name")?,
        available: u32::try_from(available)
            .map_err(|_| StoreError::Serialization(format!("available: {available}")))?,
        active: get(row, "active")?,
    })
}

pub(crate) fn refund_request(row: &PgRow) -> Result<RefundRequest, StoreError> {
    Ok(RefundRequest {
        id: RefundRequestId::from_uuid(get(row, "refund_id")?),
        order_id: OrderId::from_uuid(get(row, "order_id")?),
        requested_amount: money(row, "requested_amount")?,
        approved_amount: optional_money(row, "approved_amount")?,
        reason: get(row, "reason")?,
        method: parse(row, "method")?,
        status: parse(row, "status")?,
        reviewed_by: get(row, "reviewed_by")?,
        admin_notes: get(row, "admin_notes")?,
        denial_reason: get(row, "denial_reason")?,
        provider_refund_reference: get(row, "provider_refund_reference")?,
        created_at: get(row, "created_at")?,
        reviewed_at: get(row, "reviewed_at")?,
        refunded_at: get(row, "refunded_at")?,
    })
}

pub(crate) fn processed_event(row: &PgRow) -> Result<ProcessedEvent, StoreError> {
    Ok(ProcessedEvent {
        provider: parse(row, "provider")?,
        event_id: get(row, "event_id")?,
        event_type: get(row, "event_type")?,
        order_id: get::<Option<Uuid>>(row, "order_id")?.map(OrderId::from_uuid),
        outcome: get(row, "outcome")?,
        processed_at: get(row, "processed_at")?,
    })
}

pub(crate) fn credit_account(row: &PgRow) -> Result<StoreCreditAccount, StoreError> {
    Ok(StoreCreditAccount {
        email: get(row, "email")?,
        balance: money(row, "balance")?,
        lifetime_earned: money(row, "lifetime_earned")?,
        lifetime_used: money(row, "lifetime_used")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

pub(crate) fn credit_transaction(row: &PgRow) -> Result<StoreCreditTransaction, StoreError> {
    Ok(StoreCreditTransaction {
        id: StoreCreditTransactionId::from_uuid(get(row, "transaction_id")?),
        email: get(row, "email")?,
        kind: parse(row, "kind")?,
        amount: money(row, "amount")?,
        balance_after: money(row, "balance_after")?,
        source: parse(row, "source")?,
        order_id: get::<Option<Uuid>>(row, "order_id")?.map(OrderId::from_uuid),
        refund_request_id: get::<Option<Uuid>>(row, "refund_request_id")?
            .map(RefundRequestId::from_uuid),
        created_at: get(row, "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use commerce_core::status::{OrderStatus, PaymentStatus, RefundStatus};
    use commerce_core::types::{CreditSource, CreditTransactionKind, SettlementMethod};
    use std::str::FromStr;

    // The schema stores enums as their `as_str` names; every name must parse back.
    #[test]
    fn stored_enum_names_parse() {
        for status in OrderStatus::ALL {
            assert_eq!(OrderStatus::from_str(status.as_str()), Ok(status));
        }
        for status in [PaymentStatus::Pending, PaymentStatus::Paid, PaymentStatus::Refunded] {
            assert_eq!(PaymentStatus::from_str(status.as_str()), Ok(status));
        }
        for status in [RefundStatus::Pending, RefundStatus::Denied, RefundStatus::Refunded] {
            assert_eq!(RefundStatus::from_str(status.as_str()), Ok(status));
        }
        for method in [SettlementMethod::OriginalPayment, SettlementMethod::StoreCredit] {
            assert_eq!(SettlementMethod::from_str(method.as_str()), Ok(method));
        }
        for kind in [CreditTransactionKind::Earn, CreditTransactionKind::Spend] {
            assert_eq!(CreditTransactionKind::from_str(kind.as_str()), Ok(kind));
        }
        assert_eq!(
            CreditSource::from_str(CreditSource::OrderRefund.as_str()),
            Ok(CreditSource::OrderRefund)
        );
    }
}
