//! Device identifier.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Public hex identifier of a device.
///
/// Accepts any non-empty ASCII hex string. Case is preserved, so `A1B2` and
/// `a1b2` are different ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CoreId(String);

/// Rejected core id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid core id {0:?}: expected a non-empty hex string")]
pub struct InvalidCoreId(pub String);

impl CoreId {
    pub fn parse(raw: &str) -> Result<Self, InvalidCoreId> {
        Self::try_from(raw.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CoreId {
    type Error = InvalidCoreId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(InvalidCoreId(value));
        }
        Ok(Self(value))
    }
}

impl From<CoreId> for String {
    fn from(id: CoreId) -> Self {
        id.0
    }
}

impl std::str::FromStr for CoreId {
    type Err = InvalidCoreId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for CoreId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for CoreId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
