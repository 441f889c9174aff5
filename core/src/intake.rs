//! Order intake: cart validation, stock check, order creation, inventory
//! reservation.
//!
//! The order row is the commit point. Inventory decrements run after it and
//! are best effort: a failed decrement is logged for out-of-band
//! reconciliation and never voids a paid order.

use crate::classification::classify_environment;
use crate::environment::CommerceEnvironment;
use crate::error::{CommerceError, StockShortfall, StoreError};
use crate::money::Money;
use crate::notify::{Notification, dispatch};
use crate::rate_limit::RateLimiter;
use crate::status::{OrderStatus, PaymentStatus};
use crate::types::{
    CreditEntry, CreditSource, CreditTransactionKind, CustomerInfo, Order, OrderId,
    OrderLineItem, OrderMode, OrderNumber, OrderTotals, PaymentDescriptor, ProductId,
    ShippingAddress, StockAdjustment, normalize_email,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Attempts at finding an unused order number.
const ORDER_NUMBER_ATTEMPTS: usize = 3;

/// Currency used when the cart does not name one.
pub const DEFAULT_CURRENCY: &str = "USD";

/// Customer block of a submitted cart; every field optional so validation can
/// name what is missing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartCustomer {
    /// Contact address for receipts and refunds. Required; lowercased and
    /// trimmed before it is stored.
    #[serde(default)]
    pub email: Option<String>,
    /// Given name
    #[serde(default)]
    pub first_name: Option<String>,
    /// Family name
    #[serde(default)]
    pub last_name: Option<String>,
    /// Optional phone number. Blank values are dropped.
    #[serde(default)]
    pub phone: Option<String>,
    /// Id of the signed-in account that placed the order. Guest checkouts
    /// leave it empty.
    #[serde(default)]
    pub user_id: Option<String>,
}

/// One cart line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    /// Catalog product; absent for custom lines
    #[serde(default)]
    pub product_id: Option<ProductId>,
    /// Name shown on the receipt. Custom lines must carry one; catalog lines
    /// without a name fall back to the product id.
    #[serde(default)]
    pub name: Option<String>,
    /// Units ordered. Zero is rejected.
    pub quantity: u32,
    /// Unit price as displayed at checkout
    pub unit_price: Money,
}

/// Cart payload submitted by the checkout UI.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    /// Who is buying. Validation fails when it is missing.
    #[serde(default)]
    pub customer_info: Option<CartCustomer>,
    /// Where to ship. Optional, and copied onto the order unchanged.
    #[serde(default)]
    pub shipping_address: Option<ShippingAddress>,
    /// How the customer paid. The provider reference here is what webhooks
    /// are later matched against.
    #[serde(default)]
    pub payment: Option<PaymentDescriptor>,
    /// Totals the checkout UI showed. The subtotal must equal the sum of the
    /// lines and the total must add up, otherwise the cart is rejected.
    #[serde(default)]
    pub totals: Option<OrderTotals>,
    /// At least one line is required.
    #[serde(default)]
    pub items: Vec<CartItem>,
    /// ISO-4217 code, defaults to USD
    #[serde(default)]
    pub currency: Option<String>,
}

/// A cart that passed validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedCart {
    /// Customer with the email normalised.
    pub customer: CustomerInfo,
    /// Shipping address, copied through unchanged.
    pub shipping_address: Option<ShippingAddress>,
    /// Payment descriptor; always present once validated.
    pub payment: PaymentDescriptor,
    /// Totals, consistent with the lines
    pub totals: OrderTotals,
    /// Line items in cart order. Catalog lines keep their product id so
    /// stock can be reserved against it.
    pub items: Vec<OrderLineItem>,
    /// Uppercase ISO-4217 code.
    pub currency: String,
}

impl ValidatedCart {
    /// Requested quantity per catalog product, summed across lines.
    #[must_use]
    pub fn quantities(&self) -> BTreeMap<ProductId, (String, u32)> {
        let mut quantities: BTreeMap<ProductId, (String, u32)> = BTreeMap::new();
        for item in &self.items {
            if let Some(product_id) = item.product_id {
                let entry = quantities
                    .entry(product_id)
                    .or_insert_with(|| (item.name.clone(), 0));
                entry.1 = entry.1.saturating_add(item.quantity);
            }
        }
        quantities
    }
}

fn required(value: Option<&String>, field: &str) -> Result<String, CommerceError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| CommerceError::validation(format!("{field} is required")))
}

fn is_well_formed_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && domain.contains('.')
        && !email.chars().any(char::is_whitespace)
}

/// Validate a cart, checking customer, payment, totals and items in that order.
///
/// # Errors
///
/// [`CommerceError::Validation`] naming the first problem found.
pub fn validate_cart(cart: &Cart) -> Result<ValidatedCart, CommerceError> {
    let customer = cart
        .customer_info
        .as_ref()
        .ok_or_else(|| CommerceError::validation("customerInfo is required"))?;
    let email = normalize_email(&required(customer.email.as_ref(), "customerInfo.email")?);
    if !is_well_formed_email(&email) {
        return Err(CommerceError::validation("customerInfo.email is not a valid email address"));
    }
    let customer = CustomerInfo {
        email,
        first_name: required(customer.first_name.as_ref(), "customerInfo.firstName")?,
        last_name: required(customer.last_name.as_ref(), "customerInfo.lastName")?,
        phone: customer.phone.clone().filter(|p| !p.trim().is_empty()),
        user_id: customer.user_id.clone(),
    };

    let payment = cart
        .payment
        .clone()
        .ok_or_else(|| CommerceError::validation("payment is required"))?;
    let reference_missing = match &payment {
        PaymentDescriptor::Stripe {
            payment_intent_id, ..
        } => payment_intent_id.trim().is_empty(),
        PaymentDescriptor::Paypal { capture_id, .. } => capture_id.trim().is_empty(),
        PaymentDescriptor::Crypto {
            network,
            transaction_hash,
        } => network.trim().is_empty() || transaction_hash.trim().is_empty(),
    };
    if reference_missing {
        return Err(CommerceError::validation("payment reference is required"));
    }

    let totals = cart
        .totals
        .ok_or_else(|| CommerceError::validation("totals are required"))?;
    let components = [
        totals.subtotal,
        totals.shipping,
        totals.tax,
        totals.discount,
        totals.total,
        totals.store_credit,
    ];
    if components.iter().any(Money::is_negative) {
        return Err(CommerceError::validation("totals must not be negative"));
    }
    if !totals.is_consistent() {
        return Err(CommerceError::validation(format!(
            "total {} does not equal subtotal + shipping + tax - discount ({})",
            totals.total,
            totals.expected_total()
        )));
    }
    if totals.store_credit > totals.total {
        return Err(CommerceError::validation("storeCredit exceeds order total"));
    }

    if cart.items.is_empty() {
        return Err(CommerceError::validation("at least one item is required"));
    }
    let mut items = Vec::with_capacity(cart.items.len());
    for (index, item) in cart.items.iter().enumerate() {
        if item.quantity == 0 {
            return Err(CommerceError::validation(format!(
                "items[{index}].quantity must be at least 1"
            )));
        }
        if item.unit_price.is_negative() {
            return Err(CommerceError::validation(format!(
                "items[{index}].unitPrice must not be negative"
            )));
        }
        let name = match (&item.name, item.product_id) {
            (Some(name), _) if !name.trim().is_empty() => name.trim().to_string(),
            (_, Some(product_id)) => product_id.to_string(),
            _ => {
                return Err(CommerceError::validation(format!(
                    "items[{index}] needs a productId or a name"
                )));
            }
        };
        items.push(OrderLineItem {
            product_id: item.product_id,
            name,
            quantity: item.quantity,
            unit_price: item.unit_price,
        });
    }

    let line_sum = items
        .iter()
        .map(OrderLineItem::line_total)
        .try_fold(Money::ZERO, |acc, line| line.and_then(|l| acc.checked_add(l)))
        .ok_or_else(|| CommerceError::validation("line totals overflow"))?;
    if line_sum != totals.subtotal {
        return Err(CommerceError::validation(format!(
            "subtotal {} does not equal the sum of line items ({line_sum})",
            totals.subtotal
        )));
    }

    let currency = cart
        .currency
        .as_deref()
        .map_or(DEFAULT_CURRENCY, str::trim)
        .to_ascii_uppercase();
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(CommerceError::validation("currency must be a three-letter ISO code"));
    }

    Ok(ValidatedCart {
        customer,
        shipping_address: cart.shipping_address.clone(),
        payment,
        totals,
        items,
        currency,
    })
}

/// Result of a successful intake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntakeReceipt {
    /// Persisted order
    pub order: Order,
    /// Decrements that failed after the order was committed
    pub unreconciled: Vec<StockAdjustment>,
}

/// Order intake service.
#[derive(Clone)]
pub struct OrderIntake {
    env: CommerceEnvironment,
    limiter: Option<RateLimiter>,
    mode_override: Option<OrderMode>,
}

impl OrderIntake {
    /// Intake without rate limiting or mode override.
    #[must_use]
    pub const fn new(env: CommerceEnvironment) -> Self {
        Self {
            env,
            limiter: None,
            mode_override: None,
        }
    }

    /// Limit checkouts per customer email.
    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Force every order to `mode` instead of inspecting payment markers.
    #[must_use]
    pub const fn with_mode_override(mut self, mode: Option<OrderMode>) -> Self {
        self.mode_override = mode;
        self
    }

    /// Validate a cart and create its order.
    ///
    /// # Errors
    ///
    /// - `Validation` for malformed carts (nothing is read or written)
    /// - `RateLimited` when the customer exceeded the checkout budget
    /// - `NotFound` when a line references an unknown product
    /// - `Conflict` (`InsufficientStock`) naming every short item; no order
    ///   is created and no inventory is touched
    /// - `Conflict` when the applied store credit exceeds the balance
    /// - `Internal` on storage failure
    pub async fn submit(&self, cart: Cart) -> Result<IntakeReceipt, CommerceError> {
        let cart = validate_cart(&cart).inspect_err(|e| {
            tracing::info!(error = %e, "Cart rejected");
            metrics::counter!("orders.intake.rejected", "reason" => "validation").increment(1);
        })?;

        if let Some(limiter) = &self.limiter {
            limiter.check_and_record(&cart.customer.email).await?;
        }

        self.check_stock(&cart).await?;
        self.check_credit(&cart).await?;

        let mut order = self.insert(&cart).await?;
        let unreconciled = self.reserve_inventory(&mut order, &cart).await;

        metrics::counter!("orders.created").increment(1);
        tracing::info!(
            order_id = %order.id,
            order_number = %order.order_number,
            total = %order.totals.total,
            mode = order.mode.as_str(),
            "Order created"
        );
        dispatch(
            &self.env.notifier,
            Notification::OrderConfirmed {
                order_id: order.id,
                order_number: order.order_number.clone(),
                email: order.customer.email.clone(),
                total: order.totals.total,
            },
        );

        Ok(IntakeReceipt {
            order,
            unreconciled,
        })
    }

    async fn check_stock(&self, cart: &ValidatedCart) -> Result<(), CommerceError> {
        let mut shortfalls = Vec::new();
        for (product_id, (name, requested)) in cart.quantities() {
            let level = self
                .env
                .inventory
                .stock_level(product_id)
                .await?
                .ok_or_else(|| {
                    metrics::counter!("orders.intake.rejected", "reason" => "unknown_product")
                        .increment(1);
                    CommerceError::not_found("product", product_id)
                })?;
            let available = if level.active { level.available } else { 0 };
            if available < requested {
                shortfalls.push(StockShortfall {
                    product_id,
                    name: if level.name.is_empty() { name } else { level.name },
                    requested,
                    available,
                });
            }
        }
        if shortfalls.is_empty() {
            Ok(())
        } else {
            tracing::info!(items = shortfalls.len(), "Cart rejected for insufficient stock");
            metrics::counter!("orders.intake.rejected", "reason" => "insufficient_stock")
                .increment(1);
            Err(CommerceError::InsufficientStock(shortfalls))
        }
    }

    async fn check_credit(&self, cart: &ValidatedCart) -> Result<(), CommerceError> {
        let applied = cart.totals.store_credit;
        if applied.is_zero() {
            return Ok(());
        }
        let balance = self
            .env
            .credit
            .credit_account(cart.customer.email.clone())
            .await?
            .map_or(Money::ZERO, |account| account.balance);
        if balance < applied {
            metrics::counter!("orders.intake.rejected", "reason" => "insufficient_credit")
                .increment(1);
            return Err(CommerceError::Conflict(format!(
                "store credit balance {balance} is less than the applied {applied}"
            )));
        }
        Ok(())
    }

    fn build_order(&self, cart: &ValidatedCart) -> Order {
        let now = self.env.clock.now();
        let order_number = OrderNumber::generate(now, &mut rand::thread_rng());
        // Crypto payments arrive with their transaction hash; there is no
        // later capture webhook to mark them paid.
        let (payment_status, paid_at) = match cart.payment {
            PaymentDescriptor::Crypto { .. } => (PaymentStatus::Paid, Some(now)),
            _ => (PaymentStatus::Pending, None),
        };
        Order {
            id: OrderId::new(),
            order_number,
            customer: cart.customer.clone(),
            shipping_address: cart.shipping_address.clone(),
            items: cart.items.clone(),
            totals: cart.totals,
            currency: cart.currency.clone(),
            status: OrderStatus::Confirmed,
            payment: cart.payment.clone(),
            payment_status,
            mode: classify_environment(&cart.payment, self.mode_override),
            refunded_total: Money::ZERO,
            reserved: Vec::new(),
            created_at: now,
            updated_at: now,
            paid_at,
            shipped_at: None,
            delivered_at: None,
            refunded_at: None,
            cancelled_at: None,
        }
    }

    async fn insert(&self, cart: &ValidatedCart) -> Result<Order, CommerceError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let order = self.build_order(cart);
            let credit = (!cart.totals.store_credit.is_zero()).then(|| CreditEntry {
                email: cart.customer.email.clone(),
                kind: CreditTransactionKind::Spend,
                amount: cart.totals.store_credit,
                source: CreditSource::OrderPayment,
                order_id: Some(order.id),
                refund_request_id: None,
            });
            let order_number = order.order_number.clone();
            match self.env.orders.insert_order(order, credit).await {
                Ok(order) => return Ok(order),
                Err(StoreError::DuplicateOrderNumber(_)) if attempt < ORDER_NUMBER_ATTEMPTS => {
                    tracing::warn!(%order_number, attempt, "Order number collision, regenerating");
                }
                Err(e @ StoreError::InsufficientCredit { .. }) => {
                    metrics::counter!("orders.intake.rejected", "reason" => "insufficient_credit")
                        .increment(1);
                    return Err(e.into());
                }
                Err(e) => {
                    tracing::error!(%order_number, email = %cart.customer.email, error = %e, "Failed to persist order");
                    return Err(e.into());
                }
            }
        }
    }

    /// Take stock for each catalog line. Lines that could not be taken are
    /// returned and left out of `order.reserved`.
    async fn reserve_inventory(
        &self,
        order: &mut Order,
        cart: &ValidatedCart,
    ) -> Vec<StockAdjustment> {
        let mut unreconciled = Vec::new();
        for (product_id, (_, quantity)) in cart.quantities() {
            let adjustment = StockAdjustment {
                product_id,
                quantity,
            };
            let failure = match self
                .env
                .inventory
                .reserve_for_order(order.id, adjustment)
                .await
            {
                Ok(true) => {
                    order.record_reservation(adjustment);
                    continue;
                }
                Ok(false) => "insufficient stock or order already closed".to_string(),
                Err(e) => e.to_string(),
            };
            tracing::error!(
                order_id = %order.id,
                order_number = %order.order_number,
                %product_id,
                quantity,
                error = %failure,
                "Inventory decrement failed after order creation; needs reconciliation"
            );
            metrics::counter!("inventory.decrement.failed").increment(1);
            unreconciled.push(adjustment);
        }
        unreconciled
    }
}
