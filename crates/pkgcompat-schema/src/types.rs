//! Newtype wrappers for string identifiers, providing compile-time type safety.
//!
//! All newtypes serialize/deserialize as plain strings.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string.
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Return the inner string as a slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Package identifier in the host's native namespace.
    NativeId
);

string_newtype!(
    /// 64-character blake3 hex digest of a `(distro, kind, payload)` tuple.
    Fingerprint
);

/// Name of a foreign distribution (`alpine`, `void`, ...). Bindings are
/// registered under this key and it names the distro's root directory, so
/// every value is a checked token: 1-32 bytes of lowercase ASCII letters,
/// digits, or `-`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DistroId(String);

fn is_distro_token(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 32
        && s
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

impl DistroId {
    /// Id for a known-good literal such as a binding's own name. Input from
    /// users, config files, or the wire goes through [`parse`](Self::parse).
    pub fn new(s: &str) -> Self {
        debug_assert!(is_distro_token(s), "invalid distro literal {s:?}");
        Self(s.to_owned())
    }

    pub fn parse(s: &str) -> Option<Self> {
        is_distro_token(s).then(|| Self(s.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DistroId {
    type Error = InvalidDistroId;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if is_distro_token(&s) {
            Ok(Self(s))
        } else {
            Err(InvalidDistroId(s))
        }
    }
}

impl FromStr for DistroId {
    type Err = InvalidDistroId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| InvalidDistroId(s.to_owned()))
    }
}

impl From<DistroId> for String {
    fn from(id: DistroId) -> Self {
        id.0
    }
}

impl Deref for DistroId {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for DistroId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for DistroId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DistroId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for DistroId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for DistroId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid distro identifier '{0}': expected 1-32 lowercase letters, digits, or '-'")]
pub struct InvalidDistroId(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distro_id_display_and_as_ref() {
        let id = DistroId::new("alpine");
        assert_eq!(id.to_string(), "alpine");
        assert_eq!(id.as_str(), "alpine");
        assert_eq!(AsRef::<str>::as_ref(&id), "alpine");
    }

    #[test]
    fn native_id_serde_roundtrip() {
        let id = NativeId::new("libc");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"libc\"");
        let back: NativeId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn distro_parse_accepts_tokens() {
        assert!(DistroId::parse("alpine").is_some());
        assert!(DistroId::parse("void").is_some());
        assert!(DistroId::parse("alpine-edge").is_some());
    }

    #[test]
    fn distro_parse_rejects_paths_and_case() {
        assert!(DistroId::parse("").is_none());
        assert!(DistroId::parse("../alpine").is_none());
        assert!(DistroId::parse("Alpine").is_none());
        assert!(DistroId::parse("al pine").is_none());
        assert!(DistroId::parse(&"a".repeat(33)).is_none());
        assert!("../void".parse::<DistroId>().is_err());
    }

    #[test]
    fn fingerprint_into_inner() {
        let f = Fingerprint::new("abc".to_owned());
        assert_eq!(f.into_inner(), "abc");
    }

    #[test]
    fn distro_deserialization_is_checked() {
        let ok: DistroId = serde_json::from_str("\"void\"").unwrap();
        assert_eq!(ok, "void");
        assert!(serde_json::from_str::<DistroId>("\"../../etc\"").is_err());
        assert!(serde_json::from_str::<DistroId>("\"Void\"").is_err());
        assert_eq!(serde_json::to_string(&ok).unwrap(), "\"void\"");
    }
}
