//! URL construction for the fsspec endpoint family.
//!
//! Every call targets `<server>/spyder-services/fsspec/<op>/file://<path>`.
//! File sessions use the same shape under `open`, with the scheme switched
//! to `ws`/`wss`.

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use url::Url;

use crate::constants::{FILE_SCHEME_PREFIX, FSSPEC_SEGMENT, SERVICES_PLUGIN_NAME};
use crate::transport::TransportError;

/// Escaped in the remote path of a `file://` segment. `/` stays literal.
const PATH_ESCAPE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'\\')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Base URL of one server's file services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    /// Always ends with `/fsspec/`.
    api: Url,
}

impl ServiceEndpoint {
    /// `server` is the Jupyter server root, e.g. `http://host:8888/` or a
    /// JupyterHub user prefix like `https://hub/user/amy/`.
    pub fn new(server: &str) -> Result<Self, TransportError> {
        let mut base = Url::parse(server)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let api = base.join(&format!("{SERVICES_PLUGIN_NAME}/{FSSPEC_SEGMENT}/"))?;
        Ok(Self { api })
    }

    /// The `.../fsspec/` root this endpoint resolves against.
    pub fn api_url(&self) -> &Url {
        &self.api
    }

    /// URL of a metadata operation on `path`, with `query` appended.
    pub fn operation(
        &self,
        op: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Url, TransportError> {
        let target = format!("{FILE_SCHEME_PREFIX}{}", utf8_percent_encode(path, PATH_ESCAPE));
        let mut url = Url::parse(&format!("{}{op}/{target}", self.api))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// WebSocket URL that opens a file session on `path`.
    pub fn open(&self, path: &str, query: &[(&str, String)]) -> Result<Url, TransportError> {
        let mut url = self.operation("open", path, query)?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme).map_err(|()| {
            TransportError::WebSocket(format!("cannot use {} as a WebSocket URL", self.api))
        })?;
        Ok(url)
    }
}

/// `file://` resource identifier for a remote path.
pub fn file_uri(path: &str) -> String {
    format!("{FILE_SCHEME_PREFIX}{path}")
}

/// Boolean query values are lower-case strings.
pub fn flag(value: bool) -> String {
    if value { "true" } else { "false" }.to_string()
}
