//! Fehlertypen fuer die Codec-Schicht

use thiserror::Error;

/// Alle moeglichen Fehler beim Kodieren und Dekodieren
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Codec-Fehler: {0}")]
    CodecFehler(String),

    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    #[error("PCM-Frame hat {erhalten} Werte, erwartet {erwartet}")]
    FalscheFrameGroesse { erwartet: usize, erhalten: usize },

    #[error("Ausgabepuffer zu klein: {verfuegbar} Bytes")]
    AusgabeZuKlein { verfuegbar: usize },
}

pub type AudioResult<T> = Result<T, AudioError>;
