use std::{net::Ipv4Addr, path::PathBuf, sync::LazyLock};

use ipnetwork::Ipv4Network;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The name this runtime uses for its on-disk and `/var/run` state.
pub const APP_NAME: &str = "ocirun";

/// The directory under which pulled image layers are stored, one subdirectory
/// per `<repo>_<tag>`.
pub static DEFAULT_ARTIFACTS_DIR: LazyLock<PathBuf> =
    LazyLock::new(|| PathBuf::from("/var/lib").join(APP_NAME).join("images"));

/// The path to the container registry's JSON file (see [`crate::containers`]).
pub static CONTAINER_REGISTRY_PATH: LazyLock<PathBuf> =
    LazyLock::new(|| PathBuf::from("/var/run").join(APP_NAME).join("containers.json"));

/// The path to the advisory lock file guarding `allocate` + `register`.
pub static CONTAINER_REGISTRY_LOCK_PATH: LazyLock<PathBuf> =
    LazyLock::new(|| PathBuf::from("/var/run").join(APP_NAME).join("containers.lock"));

/// The private subnet every container is addressed on.
///
/// The `.1` address is the bridge's gateway address; `.2`..`.254` are
/// available for container allocation.
pub static CONTAINER_SUBNET: LazyLock<Ipv4Network> =
    LazyLock::new(|| Ipv4Network::new(Ipv4Addr::new(10, 0, 0, 0), 24).unwrap());

/// The name of the host bridge every container's veth pair attaches to.
pub const BRIDGE_NAME: &str = "ocirun0";

/// The prefix given to the host end of a container's veth pair.
///
/// The full name is this prefix followed by 8 hex characters derived from
/// the namespace name, kept under the 15 character `IFNAMSIZ` limit.
pub const VETH_HOST_PREFIX: &str = "veoci";

/// The name the container-side veth end is given inside its namespace.
pub const CONTAINER_IFACE: &str = "eth0";

/// The prefix given to every network namespace this runtime creates.
pub const NETNS_PREFIX: &str = "ocirun-";

/// The prefix given to every scratch rootfs directory under `/tmp`.
pub const ROOTFS_TMP_PREFIX: &str = "ocirun_";

/// The default platform operating system used when none is specified.
pub const DEFAULT_OS: &str = "linux";

/// The default platform architecture used when none is specified.
pub const DEFAULT_ARCHITECTURE: &str = "amd64";

/// The default image tag used when none is specified.
pub const DEFAULT_TAG: &str = "latest";

/// The default repository namespace prefixed onto slash-free repositories.
pub const DEFAULT_REPO_NAMESPACE: &str = "library";

/// The shell presented to the containerized process environment.
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// The `PATH` overlaid on the containerized process environment.
pub const DEFAULT_PATH: &str =
    "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// The `HOME` overlaid on the containerized process environment.
pub const DEFAULT_HOME: &str = "/root";

/// The `PS1` overlaid on the containerized process environment.
pub const DEFAULT_PS1: &str = "container# ";

/// The `TERM` overlaid on the containerized process environment.
pub const DEFAULT_TERM: &str = "xterm";

/// The prefix given to the registry record of a container run without
/// `--name`, so its allocated IP is still protected from reuse.
pub const ANONYMOUS_CONTAINER_PREFIX: &str = "ocirun-anon-";
