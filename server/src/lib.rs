//! Commerce server: configuration, provider clients and wiring.
//!
//! The binary in `main.rs` loads [`config::Config`], connects Postgres,
//! builds the [`commerce_web::AppState`] with [`app::build_state`] and serves
//! [`commerce_web::router`].

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]

pub mod app;
pub mod config;
pub mod notifier;
pub mod providers;

pub use app::build_state;
pub use config::Config;
pub use notifier::LogNotifier;
