//! Polymarket CLOB implementation of [`super::ExchangeGateway`].

pub mod client;
pub mod dto;
pub mod signer;
pub mod stream;

pub use client::PolymarketGateway;
pub use signer::LocalKeySigner;
