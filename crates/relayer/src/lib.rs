//! Core of the centralized cross-chain message relay.
//!
//! Three pieces do the heavy lifting:
//!
//! - the per-chain provider ([`chain::cosmos::CosmosProvider`]), which turns
//!   block ranges and subscriptions into a normalized message stream and
//!   submits destination transactions under wallet sequence discipline;
//! - the [`supervisor::Supervisor`], which pairs source events with
//!   destination chains, persists in-flight state, enforces finality delay
//!   and deduplication, and retries failed deliveries under backoff;
//! - the [`store::MessageStore`], the durable record every message lives in
//!   between discovery and acknowledgement.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, trivial_casts, unused_qualifications)]

pub mod chain;
pub mod config;
pub mod error;
pub mod mock;
pub mod store;
pub mod supervisor;
pub mod util;

pub use centralized_relay_types as types;
