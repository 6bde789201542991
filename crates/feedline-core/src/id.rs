//! Typed ID wrappers for feed entities.
//!
//! Users, posts and comments are identified by the numeric keys of the
//! systems that own them; the wrappers keep them from being mixed up.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::num::ParseIntError;
use std::str::FromStr;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Creates an ID from its raw value.
            #[must_use]
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            /// Returns the raw value.
            #[must_use]
            pub const fn into_inner(self) -> i64 {
                self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

numeric_id!(
    /// A strongly-typed wrapper for user IDs.
    UserId
);

numeric_id!(
    /// A strongly-typed wrapper for post IDs.
    PostId
);

numeric_id!(
    /// A strongly-typed wrapper for comment IDs.
    CommentId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display_and_parse() {
        let id = PostId::new(42);
        assert_eq!(id.to_string(), "42");
        assert_eq!("42".parse::<PostId>().unwrap(), id);
        assert!("abc".parse::<UserId>().is_err());
    }

    #[test]
    fn test_id_serializes_transparently() {
        let json = serde_json::to_string(&UserId::new(7)).unwrap();
        assert_eq!(json, "7");

        let parsed: CommentId = serde_json::from_str("11").unwrap();
        assert_eq!(parsed, CommentId::new(11));
    }

    #[test]
    fn test_id_ordering_follows_raw_value() {
        assert!(PostId::new(3) > PostId::new(2));
        assert_eq!(i64::from(UserId::new(5)), 5);
    }
}
