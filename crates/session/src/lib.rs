//! # Overview
//!
//! `session` is the glue between the connection registry (C2), the file
//! transfer engine (C5), and the priority worker pool (C3/C4): it binds the
//! session listener (C1, §4.1), registers every accepted connection, decodes
//! its frames, and dispatches each one by `infoType` (§4.6) — heartbeats and
//! file-transfer frames are answered directly on the same connection,
//! client-to-client traffic is routed through the relay pool by `targetId`.
//!
//! # Design
//!
//! A connection is two tasks sharing one [`registry::ClientSession`]: a
//! reader that decodes frames and dispatches them, and a writer that drains
//! a per-connection channel and encodes frames back out. The
//! [`outbound::OutboundRouter`] maps a registered client id to that
//! channel, so relay delivery and same-connection replies share one
//! mechanism — a reply is just a delivery to the sender's own id. Delivery
//! failures (target not registered, or its channel closed) flow into
//! [`pool::RetryController`] via [`outbound::RelayHandler`], the
//! [`pool::Handler`] bound to the relay tier.

mod connection;
mod error;
mod outbound;
mod server;

pub use error::SessionError;
pub use outbound::{OutboundRouter, RelayHandler};
pub use server::SessionServer;
