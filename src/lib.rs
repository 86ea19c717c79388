//! Savora settlement core.
//!
//! This crate is the order-to-cash engine behind the Savora food-ordering
//! storefront: it turns a shopping cart into a priced, discounted order,
//! reconciles payment from the customer wallet and/or the external payment
//! gateway, and drives orders through their status lifecycle with refund
//! and cancellation semantics.
//!
//! The storefront itself (page rendering, sessions, menu administration,
//! image upload) is an external collaborator: it feeds cart mutations and
//! checkout commands into these services and displays what comes back.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod logging;
pub mod migrator;
pub mod services;

pub use config::{AppConfig, GatewayConfig, TierConfig};
pub use errors::ServiceError;
pub use events::{Event, EventSender};
pub use services::SettlementServices;
