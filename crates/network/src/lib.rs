//! Network layer for Meridian brokers
//!
//! This crate provides request/response messaging on top of any
//! `meridian_transport::Transport`:
//! - Typed messages serialized with CBOR
//! - Correlation of responses to outstanding requests
//! - Per-request timeouts
//! - A registry of services keyed by message type

pub mod error;
pub mod manager;
pub mod message;
pub mod service;

pub use error::{NetworkError, NetworkResult};
pub use manager::NetworkManager;
pub use message::{NetworkMessage, ServiceMessage};
pub use service::{Service, ServiceContext};
