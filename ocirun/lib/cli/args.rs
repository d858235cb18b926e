use clap::{Parser, Subcommand};

use crate::config::PortPair;

use super::styles;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// `ocirun` is a minimal container runtime: pull an OCI image, build its
/// rootfs, and run a command inside an isolated network namespace.
#[derive(Debug, Parser)]
#[command(name = "ocirun", styles = styles())]
pub struct OcirunArgs {
    /// The subcommand to run.
    #[command(subcommand)]
    pub subcommand: OcirunSubcommand,
}

/// Subcommands supported by the `ocirun` binary.
#[derive(Debug, Subcommand)]
pub enum OcirunSubcommand {
    /// Pull an image from the registry into the local image store.
    Pull {
        /// The image reference, `repository[:tag]`.
        reference: String,

        /// The platform architecture to pull, e.g. `amd64`.
        #[arg(long)]
        architecture: Option<String>,

        /// The platform operating system to pull, e.g. `linux`.
        #[arg(long)]
        os_type: Option<String>,
    },

    /// List images present in the local image store.
    List,

    /// Run a command inside a container built from a pulled image.
    Run {
        /// The image reference, `repository[:tag]`.
        reference: String,

        /// A `host[:container]` TCP port mapping; may be given multiple times.
        #[arg(short, long = "port")]
        ports: Vec<PortPair>,

        /// An explicit container name; must be unique among live containers.
        #[arg(long)]
        name: Option<String>,

        /// The command and arguments to run inside the container.
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}
