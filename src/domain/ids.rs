//! Type-safe surrogate identifiers.
//!
//! Every persisted record is keyed by a database-assigned `i64`. Each
//! record kind gets its own newtype so an event id can never be passed
//! where a transaction id is expected.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! surrogate_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
            utoipa::ToSchema,
        )]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wraps a raw database id.
            #[must_use]
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            /// Returns the raw database id.
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

surrogate_id!(
    /// Identifier of an [`super::Event`] (proposal or help).
    EventId
);
surrogate_id!(
    /// Identifier of a responder [`super::Transaction`].
    TransactionId
);
surrogate_id!(
    /// Identifier of a [`super::Need`] row (event-scoped or transaction-scoped).
    NeedId
);
surrogate_id!(
    /// Identifier of a [`super::Notification`].
    NotificationId
);
surrogate_id!(
    /// Identifier of a community member. Issued by the external auth service.
    MemberId
);

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn display_is_raw_number() {
        assert_eq!(EventId::new(42).to_string(), "42");
    }

    #[test]
    fn serde_is_transparent() {
        let json = serde_json::to_string(&TransactionId::new(7)).ok();
        assert_eq!(json.as_deref(), Some("7"));

        let Ok(back) = serde_json::from_str::<TransactionId>("7") else {
            panic!("deserialization failed");
        };
        assert_eq!(back, TransactionId::new(7));
    }

    #[test]
    fn hash_works_in_hashmap() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(MemberId::new(1), "alice");
        assert_eq!(map.get(&MemberId::new(1)), Some(&"alice"));
        assert_eq!(map.get(&MemberId::new(2)), None);
    }
}
