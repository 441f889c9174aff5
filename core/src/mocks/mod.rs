//! In-memory test doubles.
//!
//! - [`FixedClock`]: deterministic, manually advanced time
//! - [`InMemoryStore`]: every storage trait behind one mutex
//! - [`MockPaymentGateway`]: scripted provider refunds
//! - [`RecordingNotifier`]: captures notifications
//! - [`StaticVerifier`]: accepts or rejects every webhook
//! - [`fixtures`]: ready-made orders and carts

mod clock;
pub mod fixtures;
mod gateway;
mod notifier;
mod store;
mod verifier;

pub use clock::{FixedClock, test_clock};
pub use gateway::{GatewayBehavior, MockPaymentGateway};
pub use notifier::RecordingNotifier;
pub use store::InMemoryStore;
pub use verifier::StaticVerifier;
