//! Gemeinsame Identifikationstypen fuer Funkwerk
//!
//! Die Plattform vergibt 64-Bit-Snowflakes fuer Benutzer, Gilden und Kanaele.
//! Newtypes verhindern Verwechslungen zwischen den ID-Arten zur Compilezeit.

use serde::{Deserialize, Serialize};

macro_rules! id_typ {
    ($(#[$doc:meta])* $name:ident, $praefix:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Gibt den rohen 64-Bit-Wert zurueck
            pub fn inner(&self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(wert: u64) -> Self {
                Self(wert)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($praefix, ":{}"), self.0)
            }
        }
    };
}

id_typ!(
    /// Eindeutige Benutzer-ID
    UserId,
    "user"
);

id_typ!(
    /// Eindeutige Gilden-ID (Server auf der Chat-Plattform)
    GuildId,
    "guild"
);

id_typ!(
    /// Eindeutige Kanal-ID
    ChannelId,
    "channel"
);
