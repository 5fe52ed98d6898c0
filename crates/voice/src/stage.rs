//! Stufen-Vertrag der Voice-Pipelines
//!
//! Jede Stufe bietet genau zwei Aufrufe, die ein striktes Protokoll bilden:
//!
//! ```text
//! header_ankuendigen(sequence, timestamp, missed)
//! payload_liefern(bytes)           <- genau einmal pro Header
//! ```
//!
//! `payload_liefern` ohne vorherigen Header oder zwei Header ohne Payload
//! dazwischen sind eine Protokollverletzung. Die Stufe ist danach dauerhaft
//! unbrauchbar (vergiftet); andere Pipelines der Session sind nicht betroffen.
//!
//! Stufen werden nicht vererbt, sondern verkettet: jede haelt die naechste
//! als `Box<dyn FramedStage>` und reicht ein (evtl. umgewandeltes) Paar aus
//! Header und Payload weiter. Die Disziplin prueft zentral [`HeaderWaechter`].

use async_trait::async_trait;

use crate::error::{VoiceError, VoiceResult};

/// Metadaten eines Frames, die vor der Nutzlast angekuendigt werden
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameHeader {
    /// Sequenznummer (wrappt bei 65536)
    pub sequence: u16,
    /// Zeitstempel in Samples pro Kanal (wrappt)
    pub timestamp: u32,
    /// Frame ging verloren, Decoder soll verschleiern
    pub missed: bool,
}

impl FrameHeader {
    pub fn new(sequence: u16, timestamp: u32) -> Self {
        Self {
            sequence,
            timestamp,
            missed: false,
        }
    }

    /// Header fuer einen verlorenen Frame
    pub fn verloren(sequence: u16, timestamp: u32) -> Self {
        Self {
            sequence,
            timestamp,
            missed: true,
        }
    }
}

// ---------------------------------------------------------------------------
// HeaderWaechter
// ---------------------------------------------------------------------------

/// Erzwingt die Reihenfolge Header → Payload einer Stufe
#[derive(Debug, Default)]
pub struct HeaderWaechter {
    angekuendigt: Option<FrameHeader>,
    vergiftet: bool,
}

impl HeaderWaechter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merkt sich den Header bis zum naechsten Payload
    pub fn ankuendigen(&mut self, kopf: FrameHeader) -> VoiceResult<()> {
        self.pruefen()?;
        if self.angekuendigt.is_some() {
            self.vergiftet = true;
            return Err(VoiceError::Protokollverletzung(
                "Header zweimal ohne Payload angekuendigt".into(),
            ));
        }
        self.angekuendigt = Some(kopf);
        Ok(())
    }

    /// Gibt den angekuendigten Header fuer den aktuellen Payload heraus
    pub fn einloesen(&mut self) -> VoiceResult<FrameHeader> {
        self.pruefen()?;
        match self.angekuendigt.take() {
            Some(kopf) => Ok(kopf),
            None => {
                self.vergiftet = true;
                Err(VoiceError::Protokollverletzung(
                    "Payload ohne angekuendigten Header".into(),
                ))
            }
        }
    }

    /// Markiert die Stufe als unbrauchbar
    pub fn vergiften(&mut self) {
        self.vergiftet = true;
        self.angekuendigt = None;
    }

    pub fn ist_vergiftet(&self) -> bool {
        self.vergiftet
    }

    /// Wartet ein Header auf seinen Payload?
    pub fn hat_offenen_header(&self) -> bool {
        self.angekuendigt.is_some()
    }

    fn pruefen(&self) -> VoiceResult<()> {
        if self.vergiftet {
            return Err(VoiceError::Protokollverletzung(
                "Pipeline nach Protokollverletzung unbrauchbar".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FramedStage
// ---------------------------------------------------------------------------

/// Gemeinsamer Vertrag aller Pipeline-Stufen
///
/// Implementierungen liefern nur `waechter` und `frame_verarbeiten`; die
/// beiden oeffentlichen Aufrufe und die Vergiftung bei Protokollverletzung
/// kommen aus den Default-Methoden.
#[async_trait]
pub trait FramedStage: Send {
    /// Der Waechter dieser Stufe
    fn waechter(&mut self) -> &mut HeaderWaechter;

    /// Verarbeitet ein vollstaendiges Paar aus Header und Payload
    async fn frame_verarbeiten(&mut self, kopf: FrameHeader, nutzdaten: &[u8])
        -> VoiceResult<()>;

    /// Kuendigt den Header des naechsten Payloads an
    fn header_ankuendigen(&mut self, kopf: FrameHeader) -> VoiceResult<()> {
        self.waechter().ankuendigen(kopf)
    }

    /// Liefert den Payload zum zuvor angekuendigten Header
    async fn payload_liefern(&mut self, nutzdaten: &[u8]) -> VoiceResult<()> {
        let kopf = self.waechter().einloesen()?;
        let ergebnis = self.frame_verarbeiten(kopf, nutzdaten).await;
        if let Err(ref e) = ergebnis {
            if e.ist_fatal_fuer_pipeline() {
                self.waechter().vergiften();
            }
        }
        ergebnis
    }

    /// Gibt gepufferte Daten an die naechste Stufe weiter
    async fn flush(&mut self) -> VoiceResult<()> {
        Ok(())
    }

    /// Verwirft gepufferte Daten
    fn clear(&mut self) {}
}

/// Reicht Header und Payload als Paar an die naechste Stufe weiter
pub async fn weiterleiten(
    naechste: &mut dyn FramedStage,
    kopf: FrameHeader,
    nutzdaten: &[u8],
) -> VoiceResult<()> {
    naechste.header_ankuendigen(kopf)?;
    naechste.payload_liefern(nutzdaten).await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
