// src/authority/token.rs

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Opaque authorization context in external form.
///
/// Neither the client controller nor the worker session looks inside; they
/// hand it to the credential authority. On the wire it travels hex-encoded.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthorizationToken(Vec<u8>);

impl AuthorizationToken {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Raw bytes, for credential authority implementations.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        hex::decode(s.trim()).map(Self)
    }
}

// Keep token contents out of logs.
impl fmt::Debug for AuthorizationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthorizationToken(<{} bytes>)", self.0.len())
    }
}

impl Serialize for AuthorizationToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for AuthorizationToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        AuthorizationToken::from_hex(&raw).map_err(serde::de::Error::custom)
    }
}
