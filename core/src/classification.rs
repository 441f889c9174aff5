//! Test/live classification of orders.
//!
//! Pure and infallible: classification only feeds later filtering (reports,
//! admin views) and never blocks processing.

use crate::types::{OrderMode, PaymentDescriptor};

/// Network-name fragments that identify non-mainnet crypto payments.
///
/// A fixed allowlist; anything not listed is treated as live.
pub const TEST_NETWORK_MARKERS: &[&str] = &[
    "testnet", "sepolia", "goerli", "holesky", "devnet", "signet", "regtest",
];

/// Classify an order as test or live.
///
/// An explicit override (deployment mode flag) always wins. Otherwise the
/// payment descriptor's own markers decide.
///
/// # Examples
///
/// ```
/// use commerce_core::classification::classify_environment;
/// use commerce_core::types::{OrderMode, PaymentDescriptor};
///
/// let descriptor = PaymentDescriptor::Stripe {
///     payment_intent_id: "pi_123".into(),
///     livemode: Some(false),
/// };
/// assert_eq!(classify_environment(&descriptor, None), OrderMode::Test);
/// assert_eq!(classify_environment(&descriptor, Some(OrderMode::Live)), OrderMode::Live);
/// ```
#[must_use]
pub fn classify_environment(
    descriptor: &PaymentDescriptor,
    override_mode: Option<OrderMode>,
) -> OrderMode {
    if let Some(mode) = override_mode {
        return mode;
    }
    let is_test = match descriptor {
        PaymentDescriptor::Stripe { livemode, .. } => *livemode == Some(false),
        PaymentDescriptor::Paypal { environment, .. } => environment
            .as_deref()
            .is_some_and(|env| env.eq_ignore_ascii_case("sandbox")),
        PaymentDescriptor::Crypto { network, .. } => {
            let network = network.to_ascii_lowercase();
            TEST_NETWORK_MARKERS
                .iter()
                .any(|marker| network.contains(marker))
        }
    };
    if is_test { OrderMode::Test } else { OrderMode::Live }
}
