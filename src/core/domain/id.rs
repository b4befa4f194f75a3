//! Newtype identifiers.
//!
//! Inner values are private so construction always goes through the
//! constructors below, matching the convention in every identifier type in
//! this crate.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($name:ident, $display_prefix:expr) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", $display_prefix, self.0)
            }
        }
    };
}

string_id!(ConditionId, "cond-");
string_id!(TokenId, "tok-");
string_id!(OrderId, "order-");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_id_roundtrip() {
        let id = TokenId::new("abc123");
        assert_eq!(id.as_str(), "abc123");
        assert_eq!(format!("{id}"), "tok-abc123");
    }

    #[test]
    fn ids_compare_by_inner_string() {
        let a = ConditionId::from("a");
        let b = ConditionId::from("b");
        assert!(a < b);
    }

    #[test]
    fn ids_hash_consistently() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(OrderId::new("o1"));
        assert!(set.contains(&OrderId::new("o1")));
        assert!(!set.contains(&OrderId::new("o2")));
    }
}
