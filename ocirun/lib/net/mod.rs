//! Network namespace, bridge, veth and port-forwarding plumbing.
//!
//! - [`fabric`] builds and tears down the bridge, veth pairs, and network
//!   namespaces (C4).
//! - [`forward`] programs and removes host-to-container TCP port mappings
//!   (C5).

pub mod fabric;
pub mod forward;
