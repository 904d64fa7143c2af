//! Opaque identifiers used across the wire and the store.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generates a fresh random id.
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parses the id from its canonical string form.
            pub fn parse(raw: &str) -> Option<Self> {
                Uuid::parse_str(raw).ok().map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_type!(
    /// A stable user identity, minted on first authentication.
    UserId
);
id_type!(
    /// One game session with its lobby, players and game state.
    SessionId
);
id_type!(
    /// A player-owned character persona plus progression.
    CharacterId
);

/// An in-game unit. Unit ids are dense and assigned at game start.
pub type UnitId = u32;

/// A loot drop lying on the map.
pub type DropId = u32;
