//! funkwerk-core – Gemeinsame Typen und Ereignisse
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die von allen
//! anderen Funkwerk-Crates gemeinsam genutzt werden.

pub mod event;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use event::SessionEreignis;
pub use types::{ChannelId, GuildId, UserId};
