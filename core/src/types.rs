//! Domain types shared by intake, reconciliation and settlement.

use crate::money::Money;
use crate::status::{OrderStatus, PaymentStatus, RefundStatus};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a new random (v4) identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            #[must_use]
            pub const fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// The underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Opaque order identifier.
    OrderId
);
uuid_id!(
    /// Catalog product identifier.
    ProductId
);
uuid_id!(
    /// Refund request identifier.
    RefundRequestId
);
uuid_id!(
    /// Store-credit ledger entry identifier.
    StoreCreditTransactionId
);

/// Characters used for the random part of an order number.
///
/// 32 symbols with `0/O` and `1/I` removed so numbers survive being read out
/// over the phone.
const ORDER_NUMBER_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const ORDER_NUMBER_SUFFIX_LEN: usize = 6;

/// Human-facing order number: `ORD-<YYYYMMDDHHMMSS>-<6 random chars>`.
///
/// Unique (enforced by the store) and not guessable from neighbouring orders.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderNumber(String);

impl OrderNumber {
    /// Wrap an existing order number, e.g. one taken from a URL.
    pub fn new(number: impl Into<String>) -> Self {
        Self(number.into())
    }

    /// Generate a fresh order number for an order placed at `now`.
    pub fn generate<R: Rng>(now: DateTime<Utc>, rng: &mut R) -> Self {
        let suffix: String = (0..ORDER_NUMBER_SUFFIX_LEN)
            .map(|_| char::from(ORDER_NUMBER_ALPHABET[rng.gen_range(0..ORDER_NUMBER_ALPHABET.len())]))
            .collect();
        Self(format!("ORD-{}-{suffix}", now.format("%Y%m%d%H%M%S")))
    }

    /// The order number as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for OrderNumber {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Canonical form of an email used as a store-credit account key and for
/// order ownership checks.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Customer identity captured at checkout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerInfo {
    /// Normalised email address
    pub email: String,
    /// Given name
    pub first_name: String,
    /// Family name
    pub last_name: String,
    /// Contact phone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// Authenticated user id, if the customer was signed in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Shipping snapshot stored with the order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddress {
    /// First address line
    pub line1: String,
    /// Second address line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    /// City
    pub city: String,
    /// State or region
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Postal code
    pub postal_code: String,
    /// ISO country code
    pub country: String,
}

/// A purchased line, snapshotted at checkout and never re-read from the catalog.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineItem {
    /// Catalog product, `None` for custom or non-catalog lines
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<ProductId>,
    /// Display name at time of purchase
    pub name: String,
    /// Ordered quantity (at least 1)
    pub quantity: u32,
    /// Unit price at time of purchase
    pub unit_price: Money,
}

impl OrderLineItem {
    /// `unit_price * quantity`, `None` on overflow.
    #[must_use]
    pub fn line_total(&self) -> Option<Money> {
        self.unit_price.checked_mul_quantity(self.quantity)
    }
}

/// Monetary totals declared at checkout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderTotals {
    /// Sum of line totals
    pub subtotal: Money,
    /// Shipping charge
    pub shipping: Money,
    /// Tax (computed upstream)
    pub tax: Money,
    /// Discount
    pub discount: Money,
    /// `subtotal + shipping + tax - discount`
    pub total: Money,
    /// Store credit applied as tender
    #[serde(default)]
    pub store_credit: Money,
}

impl OrderTotals {
    /// `subtotal + shipping + tax - discount`
    #[must_use]
    pub fn expected_total(&self) -> Money {
        self.subtotal + self.shipping + self.tax - self.discount
    }

    /// Whether the declared total matches its components.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.total == self.expected_total()
    }
}

/// External payment provider with a webhook and refund integration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentProvider {
    /// Stripe payment intents
    Stripe,
    /// PayPal captures
    Paypal,
}

impl PaymentProvider {
    /// Stable lowercase name used in storage and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stripe => "stripe",
            Self::Paypal => "paypal",
        }
    }
}

impl fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stripe" => Ok(Self::Stripe),
            "paypal" => Ok(Self::Paypal),
            other => Err(format!("unknown payment provider: {other}")),
        }
    }
}

/// How an order was paid, as submitted by the checkout UI.
///
/// Provider variants carry the correlation key later used to resolve
/// webhooks back to the order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum PaymentDescriptor {
    /// Stripe payment intent
    #[serde(rename_all = "camelCase")]
    Stripe {
        /// `pi_...` identifier
        payment_intent_id: String,
        /// Stripe's own live/test marker
        #[serde(default, skip_serializing_if = "Option::is_none")]
        livemode: Option<bool>,
    },
    /// PayPal order capture
    #[serde(rename_all = "camelCase")]
    Paypal {
        /// PayPal order id
        #[serde(default, skip_serializing_if = "Option::is_none")]
        order_id: Option<String>,
        /// Capture id, the webhook correlation key
        capture_id: String,
        /// `sandbox` or `live`
        #[serde(default, skip_serializing_if = "Option::is_none")]
        environment: Option<String>,
    },
    /// On-chain payment, settled outside any webhook provider
    #[serde(rename_all = "camelCase")]
    Crypto {
        /// Chain / network name
        network: String,
        /// Transaction hash
        transaction_hash: String,
    },
}

impl PaymentDescriptor {
    /// The webhook/refund provider responsible for this payment, if any.
    #[must_use]
    pub const fn provider(&self) -> Option<PaymentProvider> {
        match self {
            Self::Stripe { .. } => Some(PaymentProvider::Stripe),
            Self::Paypal { .. } => Some(PaymentProvider::Paypal),
            Self::Crypto { .. } => None,
        }
    }

    /// Provider correlation key (payment intent id or capture id).
    #[must_use]
    pub fn reference(&self) -> Option<&str> {
        match self {
            Self::Stripe {
                payment_intent_id, ..
            } => Some(payment_intent_id),
            Self::Paypal { capture_id, .. } => Some(capture_id),
            Self::Crypto { .. } => None,
        }
    }

    /// Method name as stored (`stripe`, `paypal`, `crypto`).
    #[must_use]
    pub const fn method_name(&self) -> &'static str {
        match self {
            Self::Stripe { .. } => "stripe",
            Self::Paypal { .. } => "paypal",
            Self::Crypto { .. } => "crypto",
        }
    }
}

/// Test/live classification of an order; informational only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderMode {
    /// Sandbox or test-network payment
    Test,
    /// Real money
    Live,
}

impl OrderMode {
    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Test => "test",
            Self::Live => "live",
        }
    }
}

impl FromStr for OrderMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "test" => Ok(Self::Test),
            "live" => Ok(Self::Live),
            other => Err(format!("unknown order mode: {other}")),
        }
    }
}

/// A persisted order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Opaque id
    pub id: OrderId,
    /// Human-facing unique number
    pub order_number: OrderNumber,
    /// Customer snapshot
    pub customer: CustomerInfo,
    /// Shipping snapshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipping_address: Option<ShippingAddress>,
    /// Line items
    pub items: Vec<OrderLineItem>,
    /// Totals fixed at creation
    pub totals: OrderTotals,
    /// ISO-4217 code
    pub currency: String,
    /// Lifecycle status
    pub status: OrderStatus,
    /// Payment descriptor, including the provider correlation key
    pub payment: PaymentDescriptor,
    /// Payment record status
    pub payment_status: PaymentStatus,
    /// Test/live classification
    pub mode: OrderMode,
    /// Sum of settled refunds
    pub refunded_total: Money,
    /// Stock actually taken from the inventory ledger for this order.
    ///
    /// Intake reserves after the order is committed and a failed decrement
    /// leaves its line out, so this can fall short of `items`. A restocking
    /// transition returns exactly this and clears it.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reserved: Vec<StockAdjustment>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
    /// First time the provider confirmed payment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<DateTime<Utc>>,
    /// Shipped time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipped_at: Option<DateTime<Utc>>,
    /// Delivered time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    /// Time of the latest refund
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refunded_at: Option<DateTime<Utc>>,
    /// Cancellation time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Provider that took the payment, if any.
    #[must_use]
    pub const fn provider(&self) -> Option<PaymentProvider> {
        self.payment.provider()
    }

    /// Provider correlation key.
    #[must_use]
    pub fn payment_reference(&self) -> Option<&str> {
        self.payment.reference()
    }

    /// Amount still refundable: `total - refunded_total`, never negative.
    #[must_use]
    pub fn refundable_remaining(&self) -> Money {
        let remaining = self.totals.total - self.refunded_total;
        if remaining.is_negative() {
            Money::ZERO
        } else {
            remaining
        }
    }

    /// Record stock taken for this order, merging by product.
    pub fn record_reservation(&mut self, adjustment: StockAdjustment) {
        match self
            .reserved
            .iter_mut()
            .find(|held| held.product_id == adjustment.product_id)
        {
            Some(held) => held.quantity = held.quantity.saturating_add(adjustment.quantity),
            None => self.reserved.push(adjustment),
        }
    }

    /// Whether `email` owns this order (case-insensitive).
    #[must_use]
    pub fn belongs_to(&self, email: &str) -> bool {
        normalize_email(email) == normalize_email(&self.customer.email)
    }
}

/// Current stock for one catalog product.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockLevel {
    /// Product
    pub product_id: ProductId,
    /// Product name for error messages
    pub name: String,
    /// Available quantity
    pub available: u32,
    /// Deactivated products are never restocked
    pub active: bool,
}

/// Quantity change for one product.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockAdjustment {
    /// Product
    pub product_id: ProductId,
    /// Units to add or remove
    pub quantity: u32,
}

/// Destination of an approved refund.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementMethod {
    /// Reverse the original provider payment
    OriginalPayment,
    /// Credit the customer's store-credit account
    StoreCredit,
}

impl SettlementMethod {
    /// Stable snake-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OriginalPayment => "original_payment",
            Self::StoreCredit => "store_credit",
        }
    }
}

impl FromStr for SettlementMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "original_payment" => Ok(Self::OriginalPayment),
            "store_credit" => Ok(Self::StoreCredit),
            other => Err(format!("unknown settlement method: {other}")),
        }
    }
}

/// Customer or admin request to refund (part of) an order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    /// Id
    pub id: RefundRequestId,
    /// Order being refunded
    pub order_id: OrderId,
    /// Amount the customer asked for
    pub requested_amount: Money,
    /// Amount the reviewer approved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_amount: Option<Money>,
    /// Customer's reason
    pub reason: String,
    /// Settlement path
    pub method: SettlementMethod,
    /// Review state
    pub status: RefundStatus,
    /// Reviewer identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,
    /// Internal notes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_notes: Option<String>,
    /// Reason shown to the customer on denial
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denial_reason: Option<String>,
    /// Provider refund id once the original payment was reversed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_refund_reference: Option<String>,
    /// Submission time
    pub created_at: DateTime<Utc>,
    /// Decision time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    /// Settlement time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refunded_at: Option<DateTime<Utc>>,
}

impl RefundRequest {
    /// Amount that settles: the approved amount, falling back to the request.
    #[must_use]
    pub fn settlement_amount(&self) -> Money {
        self.approved_amount.unwrap_or(self.requested_amount)
    }
}

/// Direction of a store-credit ledger entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreditTransactionKind {
    /// Balance increases
    Earn,
    /// Balance decreases
    Spend,
}

impl CreditTransactionKind {
    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Earn => "earn",
            Self::Spend => "spend",
        }
    }
}

impl FromStr for CreditTransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "earn" => Ok(Self::Earn),
            "spend" => Ok(Self::Spend),
            other => Err(format!("unknown credit transaction kind: {other}")),
        }
    }
}

/// Why a ledger entry exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditSource {
    /// Refund settled to store credit
    OrderRefund,
    /// Credit spent as tender at checkout
    OrderPayment,
}

impl CreditSource {
    /// Stable snake-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OrderRefund => "order_refund",
            Self::OrderPayment => "order_payment",
        }
    }
}

impl FromStr for CreditSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "order_refund" => Ok(Self::OrderRefund),
            "order_payment" => Ok(Self::OrderPayment),
            other => Err(format!("unknown credit source: {other}")),
        }
    }
}

/// Cached balance projection for one customer email.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreCreditAccount {
    /// Normalised email, the account key
    pub email: String,
    /// Current balance
    pub balance: Money,
    /// Sum of all earns
    pub lifetime_earned: Money,
    /// Sum of all spends
    pub lifetime_used: Money,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

/// Append-only ledger entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreCreditTransaction {
    /// Id
    pub id: StoreCreditTransactionId,
    /// Account email
    pub email: String,
    /// Direction
    pub kind: CreditTransactionKind,
    /// Unsigned amount
    pub amount: Money,
    /// Balance after this entry, computed from the ledger
    pub balance_after: Money,
    /// Origin
    pub source: CreditSource,
    /// Linked order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,
    /// Linked refund request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund_request_id: Option<RefundRequestId>,
    /// Entry time
    pub created_at: DateTime<Utc>,
}

impl StoreCreditTransaction {
    /// Amount signed by direction (`earn` positive, `spend` negative).
    #[must_use]
    pub fn signed_amount(&self) -> Money {
        match self.kind {
            CreditTransactionKind::Earn => self.amount,
            CreditTransactionKind::Spend => Money::ZERO - self.amount,
        }
    }
}

/// Balance derived from a ledger history.
#[must_use]
pub fn ledger_balance(transactions: &[StoreCreditTransaction]) -> Money {
    transactions.iter().map(StoreCreditTransaction::signed_amount).sum()
}

/// A ledger entry to append; the store computes the resulting balance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreditEntry {
    /// Account email (normalised by the caller)
    pub email: String,
    /// Direction
    pub kind: CreditTransactionKind,
    /// Unsigned, strictly positive amount
    pub amount: Money,
    /// Origin
    pub source: CreditSource,
    /// Linked order
    pub order_id: Option<OrderId>,
    /// Linked refund request
    pub refund_request_id: Option<RefundRequestId>,
}
