//! Fehlertypen der Voice-Pipeline
//!
//! Die Varianten folgen der Fehler-Taxonomie der Pipeline:
//! - `Protokollverletzung` ist fatal fuer genau eine Pipeline-Instanz
//! - `UnbekannterSender` und `PufferUeberlauf` sind weiche Fehler (Paket verworfen)
//! - `Transport` ist auf die einzelne Operation begrenzt, bricht aber einen
//!   laufenden Verbindungsaufbau ab

use funkwerk_audio::AudioError;
use thiserror::Error;

/// Alle Fehler des Voice-Crates
#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("Protokollverletzung: {0}")]
    Protokollverletzung(String),

    #[error("Unbekannter Sender: ssrc={ssrc}")]
    UnbekannterSender { ssrc: u32 },

    #[error("Puffer voll: {0}")]
    PufferUeberlauf(String),

    #[error("Transport-Fehler: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Signaling-Fehler: {0}")]
    Signaling(String),

    #[error("Verbindungsaufbau fehlgeschlagen in Schritt {schritt}: {grund}")]
    Verbindung { schritt: String, grund: String },

    #[error("Zeitlimit ueberschritten: {0}")]
    Zeitlimit(String),

    #[error("Session ist nicht verbunden")]
    NichtVerbunden,

    #[error("Session ist bereits gestartet")]
    BereitsVerbunden,

    #[error("Cipher-Fehler: {0}")]
    Cipher(String),

    #[error("Codec-Fehler: {0}")]
    Codec(#[from] AudioError),

    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    #[error("Abgebrochen")]
    Abgebrochen,
}

impl VoiceError {
    /// Macht dieser Fehler die betroffene Pipeline-Instanz unbrauchbar?
    pub fn ist_fatal_fuer_pipeline(&self) -> bool {
        matches!(self, VoiceError::Protokollverletzung(_))
    }

    /// Weicher Fehler: Paket verworfen, Verarbeitung laeuft weiter
    pub fn ist_weich(&self) -> bool {
        matches!(
            self,
            VoiceError::UnbekannterSender { .. } | VoiceError::PufferUeberlauf(_)
        )
    }
}

pub type VoiceResult<T> = Result<T, VoiceError>;
