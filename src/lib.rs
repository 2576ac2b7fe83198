//! A Steam client networking core: the CM session transport, the unified
//! RPC client built on top of it, the logon pipeline, and the trading and
//! mobile-confirmation engines that ride on the authenticated web session.
//!
//! [`client::Client`] is the entry point most applications want; the
//! individual modules below are usable on their own for anything that needs
//! to drive the CM connection or web API directly.

#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate maplit;

pub mod api_responses;
pub mod auth;
pub mod client;
pub mod confirmation;
pub mod config;
pub mod crypto;
pub mod directory;
pub mod dispatcher;
pub mod error;
pub mod message;
pub mod persona;
pub mod ratelimit;
pub mod rpc;
pub mod sentry;
pub mod session;
pub mod steamapi;
pub mod steamid;
pub mod trade;
pub mod transport;

pub use client::{Client, ClientConfig};
pub use error::{AuthError, ConfirmationError, CryptoError, DirectoryError, ProtocolError, RpcError, TradeError, TransportError};
