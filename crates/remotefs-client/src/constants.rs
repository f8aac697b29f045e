//! Client configuration constants.
//!
//! Centralizes hardcoded protocol values and defaults.

use std::time::Duration;

/// Name of the Jupyter server extension that hosts the file services.
pub const SERVICES_PLUGIN_NAME: &str = "spyder-services";

/// Path segment of the fsspec endpoint family under the plugin.
pub const FSSPEC_SEGMENT: &str = "fsspec";

/// Scheme prefix the server expects in front of every remote path.
pub const FILE_SCHEME_PREFIX: &str = "file://";

/// Text encoding used when none is requested.
pub const DEFAULT_ENCODING: &str = "utf-8";

/// Environment variable consulted for the server token when a profile
/// names none.
pub const DEFAULT_TOKEN_ENV: &str = "JUPYTER_TOKEN";

/// Timeout for establishing HTTP and WebSocket connections.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket close code the server uses to reject an open request with a
/// JSON diagnostic in the close reason.
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;

/// HTTP-style status codes carried by response envelopes.
pub mod status {
    pub const BAD_REQUEST: u16 = 400;
    pub const EXPECTATION_FAILED: u16 = 417;
    pub const LOCKED: u16 = 423;
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
}

/// Defaults applied when an error body omits a field.
pub const UNKNOWN_ERROR_TYPE: &str = "UnknownError";
pub const UNKNOWN_ERROR_MESSAGE: &str = "Unknown error";
pub const OPEN_FAILED_MESSAGE: &str = "Failed to open file";
