//! Gateway: the HTTP boundary of the relay.
//!
//! `GET /webhook` answers the platform's subscription handshake; `POST /webhook` parses
//! events, queues them on the event router, and acknowledges immediately.

mod server;

pub use server::{app, run_gateway, GatewayState, VerifyParams};
