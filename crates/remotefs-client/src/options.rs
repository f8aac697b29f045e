//! Open parameters for remote file sessions.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::DEFAULT_ENCODING;
use crate::endpoint::flag;
use crate::error::RemoteFsError;

/// A validated open mode string (`"r"`, `"wb"`, `"a+"`, `"x+b"`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMode {
    raw: String,
    access: Access,
    update: bool,
    binary: bool,
}

/// The primary access flag of a mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    Append,
    Exclusive,
}

impl FileMode {
    pub fn parse(mode: &str) -> Result<Self, RemoteFsError> {
        let invalid = || RemoteFsError::InvalidMode(mode.to_string());

        let mut access = None;
        let (mut update, mut binary, mut text) = (false, false, false);
        for c in mode.chars() {
            let seen = match c {
                'r' | 'w' | 'a' | 'x' => {
                    if access.is_some() {
                        return Err(invalid());
                    }
                    access = Some(match c {
                        'r' => Access::Read,
                        'w' => Access::Write,
                        'a' => Access::Append,
                        _ => Access::Exclusive,
                    });
                    false
                }
                '+' => std::mem::replace(&mut update, true),
                'b' => std::mem::replace(&mut binary, true),
                't' => std::mem::replace(&mut text, true),
                _ => return Err(invalid()),
            };
            if seen {
                return Err(invalid());
            }
        }

        let access = access.ok_or_else(invalid)?;
        if binary && text {
            return Err(invalid());
        }
        Ok(Self {
            raw: mode.to_string(),
            access,
            update,
            binary,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn is_binary(&self) -> bool {
        self.binary
    }

    pub fn is_readable(&self) -> bool {
        self.access == Access::Read || self.update
    }

    pub fn is_writable(&self) -> bool {
        self.access != Access::Read || self.update
    }
}

impl Default for FileMode {
    fn default() -> Self {
        Self {
            raw: "r".into(),
            access: Access::Read,
            update: false,
            binary: false,
        }
    }
}

impl FromStr for FileMode {
    type Err = RemoteFsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Parameters sent with an open request.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    pub mode: FileMode,
    /// Write to a temporary file and move it into place on close.
    pub atomic: bool,
    /// Take the server-side advisory lock for the duration of the session.
    pub lock: bool,
    /// Text encoding label; ignored on the wire payloads in binary mode.
    pub encoding: String,
    /// Bound on the wait for read-like responses.
    pub read_timeout: Option<Duration>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            mode: FileMode::default(),
            atomic: false,
            lock: false,
            encoding: DEFAULT_ENCODING.to_string(),
            read_timeout: None,
        }
    }
}

impl OpenOptions {
    /// Options for `mode`, everything else at its default.
    pub fn new(mode: &str) -> Result<Self, RemoteFsError> {
        Ok(Self {
            mode: FileMode::parse(mode)?,
            ..Self::default()
        })
    }

    pub fn atomic(mut self, atomic: bool) -> Self {
        self.atomic = atomic;
        self
    }

    pub fn lock(mut self, lock: bool) -> Self {
        self.lock = lock;
        self
    }

    pub fn encoding(mut self, label: impl Into<String>) -> Self {
        self.encoding = label.into();
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Query parameters of the open request.
    pub(crate) fn query(&self) -> [(&'static str, String); 4] {
        [
            ("mode", self.mode.as_str().to_string()),
            ("atomic", flag(self.atomic)),
            ("lock", flag(self.lock)),
            ("encoding", self.encoding.clone()),
        ]
    }
}
