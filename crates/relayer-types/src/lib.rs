//! Data model shared by the centralized relay.
//!
//! This crate holds the pure, I/O-free types that flow between the chain
//! providers and the relay supervisor: the normalized [`Message`] envelope
//! discovered on a source chain, the [`MessageKey`] it is stored under, the
//! [`BlockInfo`] batches produced by chain listeners, and the transaction
//! result types reported back by destination chains.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, trivial_casts, unused_qualifications)]

pub mod block;
pub mod coin;
pub mod error;
pub mod events;
pub mod identifier;
pub mod message;
pub mod tx;

pub use block::BlockInfo;
pub use coin::Coin;
pub use events::EventKind;
pub use identifier::NetworkId;
pub use message::{Message, MessageKey};
pub use tx::{Receipt, ResponseCode, TxResponse};
