//! `ocirun` is a minimal container runtime.
//!
//! Given a repository name and a tag it will:
//!
//! 1. fetch an OCI/Docker image from a public registry ([`oci`]),
//! 2. materialize the image's layered filesystem on disk ([`oci::rootfs`]),
//! 3. attach the resulting root to an isolated Linux network namespace wired
//!    to a host bridge ([`net`]), and
//! 4. execute a user command inside that isolated root, with optional
//!    host-to-container TCP port forwarding ([`net::forward`]).
//!
//! Multiple containers may run concurrently; each is allocated a unique
//! address on a private subnet ([`containers`]) and may be addressed by name
//! from its peers.
//!
//! # Modules
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`config`] - Configuration defaults and CLI-facing value types
//! - [`containers`] - The persistent container registry and IP allocator
//! - [`net`] - Network namespace, bridge, veth and port-forwarding plumbing
//! - [`oci`] - Registry client, image store and rootfs builder
//! - [`runtime`] - The container lifecycle orchestrator
//!
//! # Non-goals
//!
//! True PID/mount/user/UTS/cgroup isolation, image signature verification,
//! layer whiteout semantics beyond plain overlay-by-later-wins extraction,
//! pushing images, and daemon-mode supervision are all out of scope. The
//! runtime is one-shot and foreground.

#![warn(missing_docs)]

mod error;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod cli;
pub mod config;
pub mod containers;
pub mod net;
pub mod oci;
pub mod runtime;

pub use error::*;
