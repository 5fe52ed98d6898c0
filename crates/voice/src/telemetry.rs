//! Telemetrie – Zaehler der Voice-Pipelines
//!
//! Jede Stufe zaehlt ihre eigenen Ereignisse in Atomics (kein Lock im Hot
//! Path). Fuer Export und Tests werden daraus unveraenderliche Snapshots
//! erzeugt.
//!
//! ## Zaehler
//! - Empfangspfad der Session: empfangene Datagramme, unbekannte Sender,
//!   fehlerhafte Pakete, Entschluesselungs- und Dekodierfehler, zugestellte
//!   Frames, Ueberlaeufe der Ausgabepuffer
//! - Pro ausgehender Pipeline: gesendete Frames, Unterlaeufe, verworfene Frames

use std::sync::atomic::{AtomicU64, Ordering};

// ---------------------------------------------------------------------------
// Empfangspfad
// ---------------------------------------------------------------------------

/// Zaehler des Empfangspfads einer Session (geteilt zwischen allen Sprechern)
#[derive(Debug, Default)]
pub struct EmpfangsZaehler {
    pub(crate) datagramme: AtomicU64,
    pub(crate) keepalive_antworten: AtomicU64,
    pub(crate) unbekannter_sender: AtomicU64,
    pub(crate) fehlerhaft: AtomicU64,
    pub(crate) entschluesselung_fehlgeschlagen: AtomicU64,
    pub(crate) dekodierung_fehlgeschlagen: AtomicU64,
    pub(crate) zugestellt: AtomicU64,
    pub(crate) puffer_ueberlauf: AtomicU64,
}

/// Snapshot der Empfangszaehler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmpfangsStatistik {
    pub datagramme: u64,
    pub keepalive_antworten: u64,
    pub unbekannter_sender: u64,
    pub fehlerhaft: u64,
    pub entschluesselung_fehlgeschlagen: u64,
    pub dekodierung_fehlgeschlagen: u64,
    pub zugestellt: u64,
    pub puffer_ueberlauf: u64,
}

impl EmpfangsZaehler {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn erhoehen(zaehler: &AtomicU64) {
        zaehler.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EmpfangsStatistik {
        EmpfangsStatistik {
            datagramme: self.datagramme.load(Ordering::Relaxed),
            keepalive_antworten: self.keepalive_antworten.load(Ordering::Relaxed),
            unbekannter_sender: self.unbekannter_sender.load(Ordering::Relaxed),
            fehlerhaft: self.fehlerhaft.load(Ordering::Relaxed),
            entschluesselung_fehlgeschlagen: self
                .entschluesselung_fehlgeschlagen
                .load(Ordering::Relaxed),
            dekodierung_fehlgeschlagen: self.dekodierung_fehlgeschlagen.load(Ordering::Relaxed),
            zugestellt: self.zugestellt.load(Ordering::Relaxed),
            puffer_ueberlauf: self.puffer_ueberlauf.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// Ausgehende Pipelines
// ---------------------------------------------------------------------------

/// Zaehler einer ausgehenden Pacing-Stufe
#[derive(Debug, Default)]
pub struct PacingZaehler {
    pub(crate) gesendet: AtomicU64,
    pub(crate) unterlaeufe: AtomicU64,
    pub(crate) verworfen: AtomicU64,
}

/// Snapshot einer ausgehenden Pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacingStatistik {
    /// An die naechste Stufe uebergebene Frames
    pub gesendet: u64,
    /// Takte mit leerer Warteschlange
    pub unterlaeufe: u64,
    /// Durch `clear` oder Ueberlauf verworfene Frames
    pub verworfen: u64,
    /// Aktuell wartende Frames
    pub wartend: usize,
    /// Kapazitaet der Warteschlange
    pub kapazitaet: usize,
}

impl PacingZaehler {
    pub fn snapshot(&self, wartend: usize, kapazitaet: usize) -> PacingStatistik {
        PacingStatistik {
            gesendet: self.gesendet.load(Ordering::Relaxed),
            unterlaeufe: self.unterlaeufe.load(Ordering::Relaxed),
            verworfen: self.verworfen.load(Ordering::Relaxed),
            wartend,
            kapazitaet,
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Gesamtbild einer Session fuer Export und Diagnose
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatistik {
    pub empfang: EmpfangsStatistik,
    /// Anzahl lebender Empfangs-Pipelines
    pub pipelines: usize,
    /// Eintraege der SSRC-Zuordnung
    pub sender_eintraege: usize,
    /// Letzte gemessene Latenz in ms (0 = noch keine Messung)
    pub latenz_ms: u32,
}

impl SessionStatistik {
    /// Gibt eine lesbare Zusammenfassung zurueck
    pub fn zusammenfassung(&self) -> String {
        format!(
            "Datagramme={} Zugestellt={} Unbekannt={} Fehlerhaft={} Entschluesselung={} Ueberlauf={} Pipelines={} Sender={} Latenz={}ms",
            self.empfang.datagramme,
            self.empfang.zugestellt,
            self.empfang.unbekannter_sender,
            self.empfang.fehlerhaft,
            self.empfang.entschluesselung_fehlgeschlagen,
            self.empfang.puffer_ueberlauf,
            self.pipelines,
            self.sender_eintraege,
            self.latenz_ms,
        )
    }
}
