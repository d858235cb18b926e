use std::{
    error::Error,
    fmt::{self, Display},
    net::AddrParseError,
};

use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of an ocirun-related operation.
pub type OcirunResult<T> = Result<T, OcirunError>;

/// The error taxonomy for `ocirun`.
///
/// Variants map to the kinds described in the design's error handling
/// section rather than to individual call sites; several call sites may
/// raise the same kind for different reasons.
#[derive(pretty_error_debug::Debug, Error)]
pub enum OcirunError {
    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An error that can represent any error.
    #[error(transparent)]
    Custom(#[from] AnyError),

    /// The caller is not running as UID 0.
    #[error("this command requires root privileges")]
    PermissionDenied,

    /// The requested image has not been pulled, or has no layers.
    #[error("image not found: {0}")]
    ImageNotFound(String),

    /// An image directory exists but contains no layer files.
    #[error("image has no layers: {0}")]
    NoLayers(String),

    /// The manifest list has no entry for the requested platform.
    #[error("no manifest for platform {os}/{architecture}")]
    PlatformUnavailable {
        /// The requested operating system.
        os: String,
        /// The requested architecture.
        architecture: String,
    },

    /// The registry rejected or could not issue a bearer token.
    #[error("registry authentication failed: {0}")]
    AuthFailed(String),

    /// The registry returned 404 for a repository, tag, or digest.
    #[error("not found: {0}")]
    NotFound(String),

    /// The registry returned an unexpected 4xx response.
    #[error("registry protocol error ({status}): {body}")]
    ProtocolError {
        /// The HTTP status code returned by the registry.
        status: u16,
        /// The response body, if any, truncated to a reasonable length.
        body: String,
    },

    /// A network-level failure talking to the registry.
    #[error("registry transport error: {0}")]
    TransportError(#[from] reqwest::Error),

    /// A network-level failure in the retrying HTTP client middleware.
    #[error("registry transport error: {0}")]
    HttpMiddleware(#[from] reqwest_middleware::Error),

    /// A container name is already registered.
    #[error("container name already in use: {0}")]
    NameConflict(String),

    /// No more addresses are available in the container subnet.
    #[error("subnet exhausted: no addresses left in {0}")]
    SubnetExhausted(String),

    /// Building the network namespace, bridge, or veth pair failed.
    #[error("network setup failed: {0}")]
    NetworkSetupFailed(String),

    /// Installing or removing packet-filter rules failed.
    #[error("port forwarding failed: {0}")]
    PortForwardFailed(String),

    /// The kernel refused to create the namespace, chroot, or spawn the child.
    #[error("failed to spawn child process: {0}")]
    ChildSpawnFailed(String),

    /// An error that occurred when parsing an image reference.
    #[error("invalid image reference: {0}")]
    InvalidReference(String),

    /// An error that occurred when parsing a port mapping argument.
    #[error("invalid port mapping: {0}")]
    InvalidPortPair(String),

    /// An error that occurred during a system call.
    #[error("system call error: {0}")]
    Errno(#[from] nix::errno::Errno),

    /// An error that occurred when a Serde JSON error occurred.
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// An error that occurred during a `walkdir` traversal.
    #[error("walkdir error: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// An error that occurred when joining a blocking task.
    #[error("join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    /// An error that occurred while parsing an IP address or subnet.
    #[error("invalid address: {0}")]
    AddrParse(#[from] AddrParseError),

    /// An error from ocirun-utils.
    #[error("utils error: {0}")]
    Utils(#[from] ocirun_utils::OcirunUtilsError),
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl OcirunError {
    /// Creates a new `Err` result from anything that converts to `anyhow::Error`.
    pub fn custom(error: impl Into<anyhow::Error>) -> OcirunError {
        OcirunError::Custom(AnyError {
            error: error.into(),
        })
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}
