//! Strongly typed entity identifiers.
//!
//! Each entity kind gets its own UUID wrapper so a checkout identifier can
//! never be passed where a billing identifier is expected. All wrappers share
//! the same surface: `new`, `from_uuid`, `as_uuid`, `Display`, and transparent
//! serde representation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

entity_id! {
    /// Identifier of one bazaar event (the namespace for sellers, articles,
    /// and sessions).
    EventId
}

entity_id! {
    /// Identifier of a user account. The engine treats these as opaque;
    /// they come from the surrounding application's identity provider.
    UserId
}

entity_id! {
    /// Identifier of a seller registration within one event.
    SellerId
}

entity_id! {
    /// Identifier of a single priced article.
    ArticleId
}

entity_id! {
    /// Identifier of a buyer-facing checkout session.
    CheckoutId
}

entity_id! {
    /// Identifier of a seller-facing billing session.
    BillingId
}
