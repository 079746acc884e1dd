//! Configuration surface for the relay server (§4.11, §6).
//!
//! # Overview
//!
//! This crate owns everything read from disk before the session server or
//! proxy manager starts: the declarative endpoint list, the CIDR-to-zone
//! map consumed by the zone-affinity load-balancing strategy, and the
//! global settings that don't belong to any single endpoint (bind address,
//! TLS material, file storage root, heartbeat timeout).
//!
//! # Design
//!
//! The config file format is a flat `key = value` text format with
//! repeated `[endpoint]` sections, parsed by hand rather than through
//! `serde` — consistent with this codebase's wire and on-disk formats
//! elsewhere. Every parse failure carries the file name and 1-based line
//! number so operators can find the mistake without a debugger.
//!
//! # Invariants
//!
//! - Listen ports are unique across the declared endpoint set.
//! - TLS endpoints always carry a server certificate.
//! - The `Hash` load-balancing algorithm is only selected alongside a key
//!   selector.
//!
//! All three are enforced by [`ServerConfig::validate`] and
//! [`EndpointConfig::validate`], never assumed by callers.

mod endpoint;
mod error;
mod surface;
mod zone_map;

pub use endpoint::{EndpointConfig, HttpRewrite, ListenerProtocol};
pub use error::ConfigError;
pub use surface::{resolve_zone, ServerConfig};
pub use zone_map::ZoneMap;
