//! Sigil-prefixed references into the log: messages, feeds and blobs

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::AccessError;

static MSG_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^%[A-Za-z0-9+/]{43}=\.sha256$").expect("valid regex"));
static FEED_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^@[A-Za-z0-9+/]{43}=\.(ed25519|sha256)$").expect("valid regex"));
static BLOB_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^&[A-Za-z0-9+/]{43}=\.sha256$").expect("valid regex"));

macro_rules! sigil_ref {
    ($(#[$meta:meta])* $name:ident, $pattern:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn parse(s: &str) -> Result<Self, AccessError> {
                if $pattern.is_match(s) {
                    Ok($name(s.to_string()))
                } else {
                    Err(AccessError::InvalidReference(format!(
                        "{:?} is not a {}",
                        s, $kind
                    )))
                }
            }

            /// Whether `s` would parse, without allocating
            pub fn is_valid(s: &str) -> bool {
                $pattern.is_match(s)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = AccessError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $name::parse(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = AccessError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                if $pattern.is_match(&value) {
                    Ok($name(value))
                } else {
                    $name::parse(&value)
                }
            }
        }

        impl From<$name> for String {
            fn from(reference: $name) -> Self {
                reference.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

sigil_ref!(
    /// Content-addressed key of a message, `%<hash>.sha256`
    MsgKey,
    MSG_KEY,
    "message key"
);

sigil_ref!(
    /// Public key identifying a feed, `@<key>.ed25519`
    FeedId,
    FEED_ID,
    "feed id"
);

sigil_ref!(
    /// Content-addressed key of a blob, `&<hash>.sha256`
    BlobId,
    BLOB_ID,
    "blob id"
);

impl BlobId {
    /// Stand-in avatar for feeds without a usable image
    pub fn null_image() -> Self {
        BlobId(format!("&{}=.sha256", "0".repeat(43)))
    }

    pub fn is_null_image(&self) -> bool {
        *self == BlobId::null_image()
    }
}
