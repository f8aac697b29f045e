//! Remote file client for Jupyter servers running `spyder-services`.
//!
//! Two channels reach the server's filesystem:
//!
//! - [`RemoteFile`] - a file session over one persistent WebSocket, with
//!   read/write/seek/tell/truncate/flush and line iteration.
//! - [`RemoteFileServices`] - one HTTP call per metadata operation (ls,
//!   info, mkdir, copy, move, ...), and the entry point for opening files.
//!
//! Both report server failures as [`ErrorEnvelope`]s inside [`RemoteFsError`].
//! [`MemoryServer`] implements the protocol in-process for tests.

pub mod codec;
pub mod config;
pub mod constants;
pub mod endpoint;
pub mod error;
pub mod file;
pub mod memory;
pub mod options;
pub mod response;
pub mod services;
pub mod transport;

pub use codec::{Codec, CodecError, Payload, TextEncoding};
pub use config::{ClientConfig, ConfigError, ServerConfig};
pub use endpoint::ServiceEndpoint;
pub use error::{ErrorDetail, ErrorEnvelope, ErrorKind, RemoteFsError, Result};
pub use file::{FileState, RemoteFile};
pub use memory::MemoryServer;
pub use options::{Access, FileMode, OpenOptions};
pub use services::RemoteFileServices;
pub use transport::{
    HttpTransport, ReqwestTransport, SocketConnector, TransportError, WsConnector,
};

/// Connect to the server profile `name` (or the default profile) from the
/// user's config file.
pub fn connect_profile(name: Option<&str>) -> std::result::Result<RemoteFileServices, ConnectError> {
    let config = ClientConfig::load_default()?;
    let server = config.server(name)?;
    Ok(RemoteFileServices::from_config(server)?)
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Client(#[from] RemoteFsError),
}
