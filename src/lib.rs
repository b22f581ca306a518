//! Tester-side RPC client for the rig mobile end-to-end test harness.
//!
//! The harness drives a test-runner process that sends actions (tap,
//! reload, set orientation, fetch the view hierarchy, ...) to an
//! instrumented application through a message relay, over a full-duplex
//! socket carrying JSON envelopes. This crate is the tester side of that
//! exchange: socket lifecycle and login handshake, request/response
//! correlation, event fan-out, and the `currentStatus` liveness probe that
//! fires whenever the application is slow to answer.

pub mod actions;
pub mod client;
pub mod config;
pub mod error;
pub mod message;
pub mod socket;
pub mod transport;

pub use actions::{Action, ActionKind};
pub use client::Client;
pub use config::SessionConfig;
pub use error::{ClientError, Result};
pub use message::Envelope;
pub use socket::MessageSocket;
pub use transport::{Connector, WsConnector};
