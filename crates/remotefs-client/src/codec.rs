//! Payload codec for the file session wire format.
//!
//! Binary and text payloads travel as standard base64 strings. Text is
//! first converted to bytes in the handle's declared encoding. Values that
//! are already JSON-native (numbers, booleans, null, ...) pass through
//! untouched. Decoding mirrors this: a JSON string is base64 data, returned
//! as bytes in binary mode and as text otherwise.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use encoding_rs::Encoding;
use serde_json::Value;
use thiserror::Error;

/// Codec failures. The codec never substitutes replacement characters.
#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("text is not representable in {encoding}")]
    Unencodable { encoding: &'static str },

    #[error("payload is not valid {encoding}")]
    Undecodable { encoding: &'static str },
}

/// An application-level payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Bytes(Vec<u8>),
    Text(String),
    /// A server-native value that needs no transport encoding.
    Value(Value),
}

impl Payload {
    /// Whether this payload is "falsy": empty bytes, empty text or null.
    pub fn is_empty(&self) -> bool {
        match self {
            Payload::Bytes(b) => b.is_empty(),
            Payload::Text(s) => s.is_empty(),
            Payload::Value(v) => v.is_null(),
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Payload::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            Payload::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            Payload::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<Vec<u8>> for Payload {
    fn from(b: Vec<u8>) -> Self {
        Payload::Bytes(b)
    }
}

impl From<&[u8]> for Payload {
    fn from(b: &[u8]) -> Self {
        Payload::Bytes(b.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for Payload {
    fn from(b: &[u8; N]) -> Self {
        Payload::Bytes(b.to_vec())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Text(s)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Text(s.to_string())
    }
}

/// A text encoding, named the way the server's codec registry names it.
///
/// The WHATWG registry folds `latin1` and `ascii` into windows-1252, which
/// disagrees with the server on bytes 0x80..=0x9F, so those two are handled
/// directly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TextEncoding {
    /// ISO-8859-1: byte `n` is code point U+00nn.
    Latin1,
    /// Strict 7-bit ASCII.
    Ascii,
    Whatwg(&'static Encoding),
}

impl TextEncoding {
    /// Resolve a codec label ("utf-8", "latin-1", "cp1252", ...).
    ///
    /// Returns `None` for unknown labels and for labels the WHATWG registry
    /// would silently remap to a windows code page.
    pub fn for_label(label: &str) -> Option<Self> {
        let label = label.trim();
        let key = label.to_ascii_lowercase().replace(['_', ' '], "-");
        match key.as_str() {
            "latin-1" | "latin1" | "latin" | "l1" | "iso-8859-1" | "iso8859-1" | "8859"
            | "cp819" | "iso-ir-100" | "csisolatin1" | "ibm819" => return Some(Self::Latin1),
            "ascii" | "us-ascii" | "646" | "ansi-x3.4-1968" | "ansi-x3-4-1968" | "iso646-us"
            | "cp367" | "csascii" | "us" => return Some(Self::Ascii),
            _ => {}
        }
        let encoding = Encoding::for_label(label.as_bytes())?;
        let remapped = [
            encoding_rs::WINDOWS_1252,
            encoding_rs::WINDOWS_1254,
            encoding_rs::WINDOWS_874,
        ]
        .contains(&encoding);
        let names_code_page = ["windows-", "cp", "x-cp"]
            .iter()
            .any(|prefix| key.starts_with(prefix));
        if remapped && !names_code_page {
            return None;
        }
        Some(Self::Whatwg(encoding))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Latin1 => "latin-1",
            Self::Ascii => "ascii",
            Self::Whatwg(encoding) => encoding.name(),
        }
    }

    fn encode(&self, text: &str) -> Result<Vec<u8>, CodecError> {
        let unencodable = || CodecError::Unencodable {
            encoding: self.name(),
        };
        match *self {
            Self::Latin1 => {
                if !encoding_rs::mem::is_str_latin1(text) {
                    return Err(unencodable());
                }
                Ok(encoding_rs::mem::encode_latin1_lossy(text).into_owned())
            }
            Self::Ascii => {
                if !text.is_ascii() {
                    return Err(unencodable());
                }
                Ok(text.as_bytes().to_vec())
            }
            // encoding_rs only encodes to ASCII-compatible targets; UTF-16
            // has to be handled by hand.
            Self::Whatwg(encoding) if encoding == encoding_rs::UTF_16LE => {
                Ok(text.encode_utf16().flat_map(u16::to_le_bytes).collect())
            }
            Self::Whatwg(encoding) if encoding == encoding_rs::UTF_16BE => {
                Ok(text.encode_utf16().flat_map(u16::to_be_bytes).collect())
            }
            Self::Whatwg(encoding) => {
                let (bytes, used, had_errors) = encoding.encode(text);
                if had_errors || used != encoding {
                    return Err(unencodable());
                }
                Ok(bytes.into_owned())
            }
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, CodecError> {
        let undecodable = || CodecError::Undecodable {
            encoding: self.name(),
        };
        match *self {
            Self::Latin1 => Ok(encoding_rs::mem::decode_latin1(bytes).into_owned()),
            Self::Ascii => {
                if !bytes.is_ascii() {
                    return Err(undecodable());
                }
                String::from_utf8(bytes.to_vec()).map_err(|_| undecodable())
            }
            Self::Whatwg(encoding) => encoding
                .decode_without_bom_handling_and_without_replacement(bytes)
                .map(|text| text.into_owned())
                .ok_or_else(undecodable),
        }
    }
}

/// Encoder/decoder bound to one file's mode and text encoding.
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    binary: bool,
    encoding: TextEncoding,
}

impl Codec {
    pub fn new(binary: bool, encoding: TextEncoding) -> Self {
        Self { binary, encoding }
    }

    /// Resolve `label` with [`TextEncoding::for_label`].
    pub fn for_label(binary: bool, label: &str) -> Option<Self> {
        TextEncoding::for_label(label).map(|encoding| Self::new(binary, encoding))
    }

    pub fn is_binary(&self) -> bool {
        self.binary
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    /// Encode a payload for embedding in a request frame.
    pub fn encode(&self, payload: &Payload) -> Result<Value, CodecError> {
        match payload {
            Payload::Bytes(bytes) => Ok(Value::String(STANDARD.encode(bytes))),
            Payload::Text(text) => {
                let bytes = self.encoding.encode(text)?;
                Ok(Value::String(STANDARD.encode(bytes)))
            }
            Payload::Value(value) => Ok(value.clone()),
        }
    }

    /// Decode one wire value from a response frame.
    pub fn decode(&self, wire: Value) -> Result<Payload, CodecError> {
        let Value::String(encoded) = wire else {
            return Ok(Payload::Value(wire));
        };
        let bytes = STANDARD.decode(encoded.as_bytes())?;
        if self.binary {
            return Ok(Payload::Bytes(bytes));
        }
        self.encoding.decode(&bytes).map(Payload::Text)
    }

    /// An empty payload of this codec's kind.
    pub fn empty(&self) -> Payload {
        if self.binary {
            Payload::Bytes(Vec::new())
        } else {
            Payload::Text(String::new())
        }
    }
}
