//! Session-Ereignisse
//!
//! Benachrichtigungen, die eine Voice-Session an die Anwendung meldet.
//! Die Verteilung erfolgt im Voice-Crate ueber einen tokio-Broadcast-Kanal.

use crate::types::UserId;
use serde::{Deserialize, Serialize};

/// Alle Ereignisse, die eine Voice-Session an Abonnenten meldet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEreignis {
    /// Handshake abgeschlossen, Medien koennen fliessen
    Verbunden { ssrc: u32 },
    /// Verbindungsaufbau abgebrochen
    VerbindungFehlgeschlagen { schritt: String, grund: String },
    /// Session wurde sauber abgebaut
    Getrennt,
    /// Fuer einen Sprecher wurde eine Empfangs-Pipeline angelegt
    StreamErstellt { user_id: UserId },
    /// Die Empfangs-Pipeline eines Sprechers wurde abgebaut
    StreamZerstoert { user_id: UserId },
    /// Neuer Latenz-Messwert aus dem Keepalive
    LatenzGeaendert { alt_ms: u32, neu_ms: u32 },
    /// Sprechstatus eines Teilnehmers laut Signaling
    SprechStatus {
        user_id: UserId,
        ssrc: u32,
        spricht: bool,
    },
}

impl SessionEreignis {
    /// Betroffener Benutzer, falls das Ereignis einem Sprecher zugeordnet ist
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Self::StreamErstellt { user_id }
            | Self::StreamZerstoert { user_id }
            | Self::SprechStatus { user_id, .. } => Some(*user_id),
            _ => None,
        }
    }
}
