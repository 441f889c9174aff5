//! Canned domain values.

use super::test_clock;
use crate::environment::Clock;
use crate::intake::{Cart, CartCustomer, CartItem};
use crate::money::Money;
use crate::status::{OrderStatus, PaymentStatus};
use crate::types::{
    CustomerInfo, Order, OrderId, OrderLineItem, OrderMode, OrderNumber, OrderTotals,
    PaymentDescriptor, ProductId,
};

/// Email used by every fixture.
pub const EMAIL: &str = "jane@example.com";

/// Stripe payment intent used by [`order`].
pub const PAYMENT_INTENT: &str = "pi_fixture";

/// Confirmed Stripe order with one custom line totalling `total`.
#[must_use]
pub fn order(total: Money) -> Order {
    let now = test_clock().now();
    Order {
        id: OrderId::new(),
        order_number: OrderNumber::new("ORD-20250101000000-FIXTUR"),
        customer: CustomerInfo {
            email: EMAIL.to_string(),
            first_name: "Jane".to_string(),
            last_name: "Doe".to_string(),
            phone: None,
            user_id: None,
        },
        shipping_address: None,
        items: vec![OrderLineItem {
            product_id: None,
            name: "Gift card".to_string(),
            quantity: 1,
            unit_price: total,
        }],
        totals: OrderTotals {
            subtotal: total,
            shipping: Money::ZERO,
            tax: Money::ZERO,
            discount: Money::ZERO,
            total,
            store_credit: Money::ZERO,
        },
        currency: "USD".to_string(),
        status: OrderStatus::Confirmed,
        payment: PaymentDescriptor::Stripe {
            payment_intent_id: PAYMENT_INTENT.to_string(),
            livemode: Some(false),
        },
        payment_status: PaymentStatus::Pending,
        mode: OrderMode::Test,
        refunded_total: Money::ZERO,
        reserved: Vec::new(),
        created_at: now,
        updated_at: now,
        paid_at: None,
        shipped_at: None,
        delivered_at: None,
        refunded_at: None,
        cancelled_at: None,
    }
}

/// Stripe cart buying `quantity` of `product_id` at `unit_price`.
#[must_use]
pub fn cart(product_id: ProductId, quantity: u32, unit_price: Money, payment_intent: &str) -> Cart {
    let total = unit_price
        .checked_mul_quantity(quantity)
        .unwrap_or(Money::ZERO);
    Cart {
        customer_info: Some(CartCustomer {
            email: Some(EMAIL.to_string()),
            first_name: Some("Jane".to_string()),
            last_name: Some("Doe".to_string()),
            phone: None,
            user_id: None,
        }),
        shipping_address: None,
        payment: Some(PaymentDescriptor::Stripe {
            payment_intent_id: payment_intent.to_string(),
            livemode: Some(false),
        }),
        totals: Some(OrderTotals {
            subtotal: total,
            shipping: Money::ZERO,
            tax: Money::ZERO,
            discount: Money::ZERO,
            total,
            store_credit: Money::ZERO,
        }),
        items: vec![CartItem {
            product_id: Some(product_id),
            name: Some("Lamp".to_string()),
            quantity,
            unit_price,
        }],
        currency: None,
    }
}
