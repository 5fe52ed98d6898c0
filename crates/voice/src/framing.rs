//! RTP-Stufen
//!
//! `RtpSchreiber` setzt vor jede Nutzlast einen RTP-Header mit der SSRC der
//! Session. Sequenz und Zeitstempel kommen aus einer [`SequenzQuelle`]:
//! - ungepuffert zieht die Stufe sie beim Schreiben aus dem [`SendeZaehler`]
//!   der Session
//! - hinter einer Pacing-Stufe uebernimmt sie die Werte aus dem angekuendigten
//!   Header, denn erst die Pacing-Stufe kennt die Sendereihenfolge
//!
//! Pro Frame steigt die Sequenz um 1 und der Zeitstempel um die Samples
//! eines Frames.
//!
//! `RtpLeser` liest Sequenz und Zeitstempel aus dem Paket, ueberspringt
//! CSRC-Liste und Header-Extension und reicht nur die Nutzlast weiter.
//! Nicht lesbare Pakete werden gezaehlt und verworfen.

use async_trait::async_trait;
use funkwerk_protocol::rtp::{RtpHeader, RTP_HEADER_GROESSE};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::VoiceResult;
use crate::stage::{weiterleiten, FrameHeader, FramedStage, HeaderWaechter};
use crate::telemetry::EmpfangsZaehler;

/// Sequenz und Zeitstempel aller ausgehenden Pakete einer Session
///
/// Alle Pipelines einer Session senden unter derselben SSRC und demselben
/// Schluessel. Jedes Paar aus Sequenz und Zeitstempel wird genau einmal
/// vergeben, der Header (und damit die Nonce) wiederholt sich also nicht.
#[derive(Debug, Default)]
pub struct SendeZaehler {
    position: Mutex<(u16, u32)>,
}

impl SendeZaehler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Beginnt bei einer bestimmten Sequenz und einem Zeitstempel
    pub fn ab(sequence: u16, timestamp: u32) -> Self {
        Self {
            position: Mutex::new((sequence, timestamp)),
        }
    }

    /// Vergibt Sequenz und Zeitstempel fuer den naechsten gesendeten Frame
    pub fn ziehen(&self, samples_pro_frame: u32) -> (u16, u32) {
        let mut position = self.position.lock();
        let aktuell = *position;
        *position = (
            aktuell.0.wrapping_add(1),
            aktuell.1.wrapping_add(samples_pro_frame),
        );
        aktuell
    }

    /// Sequenz und Zeitstempel des naechsten Frames
    pub fn position(&self) -> (u16, u32) {
        *self.position.lock()
    }
}

/// Herkunft von Sequenz und Zeitstempel im RTP-Header
pub enum SequenzQuelle {
    /// Beim Schreiben aus dem Session-Zaehler ziehen
    Session(Arc<SendeZaehler>),
    /// Aus dem angekuendigten Header uebernehmen (hinter der Pacing-Stufe)
    Header,
}

/// Stellt Nutzlasten einen RTP-Header voran
pub struct RtpSchreiber {
    waechter: HeaderWaechter,
    naechste: Box<dyn FramedStage>,
    ssrc: u32,
    quelle: SequenzQuelle,
    samples_pro_frame: u32,
    paket: Vec<u8>,
}

impl RtpSchreiber {
    pub fn new(
        ssrc: u32,
        samples_pro_frame: u32,
        quelle: SequenzQuelle,
        naechste: Box<dyn FramedStage>,
    ) -> Self {
        Self {
            waechter: HeaderWaechter::new(),
            naechste,
            ssrc,
            quelle,
            samples_pro_frame,
            paket: Vec::with_capacity(1500),
        }
    }
}

#[async_trait]
impl FramedStage for RtpSchreiber {
    fn waechter(&mut self) -> &mut HeaderWaechter {
        &mut self.waechter
    }

    async fn frame_verarbeiten(&mut self, kopf: FrameHeader, nutzdaten: &[u8]) -> VoiceResult<()> {
        let (sequence, timestamp) = match &self.quelle {
            SequenzQuelle::Session(zaehler) => zaehler.ziehen(self.samples_pro_frame),
            SequenzQuelle::Header => (kopf.sequence, kopf.timestamp),
        };
        let header = RtpHeader::new(sequence, timestamp, self.ssrc);
        let weiter = FrameHeader {
            sequence,
            timestamp,
            missed: kopf.missed,
        };

        self.paket.clear();
        self.paket.extend_from_slice(&header.encode());
        self.paket.extend_from_slice(nutzdaten);

        tracing::trace!(
            ssrc = self.ssrc,
            sequence = weiter.sequence,
            bytes = self.paket.len(),
            "RTP-Frame gebaut"
        );
        weiterleiten(self.naechste.as_mut(), weiter, &self.paket).await
    }

    async fn flush(&mut self) -> VoiceResult<()> {
        self.naechste.flush().await
    }

    fn clear(&mut self) {
        self.naechste.clear();
    }
}

/// Entfernt den RTP-Header und reicht die Nutzlast weiter
pub struct RtpLeser {
    waechter: HeaderWaechter,
    naechste: Box<dyn FramedStage>,
    zaehler: Arc<EmpfangsZaehler>,
}

impl RtpLeser {
    pub fn new(naechste: Box<dyn FramedStage>, zaehler: Arc<EmpfangsZaehler>) -> Self {
        Self {
            waechter: HeaderWaechter::new(),
            naechste,
            zaehler,
        }
    }
}

#[async_trait]
impl FramedStage for RtpLeser {
    fn waechter(&mut self) -> &mut HeaderWaechter {
        &mut self.waechter
    }

    async fn frame_verarbeiten(&mut self, kopf: FrameHeader, nutzdaten: &[u8]) -> VoiceResult<()> {
        let (header, laenge) = match RtpHeader::decode(nutzdaten) {
            Ok(ergebnis) => ergebnis,
            Err(e) => {
                EmpfangsZaehler::erhoehen(&self.zaehler.fehlerhaft);
                tracing::debug!(
                    fehler = %e,
                    bytes = nutzdaten.len(),
                    "RTP-Paket nicht lesbar, verworfen"
                );
                return Ok(());
            }
        };

        let weiter = FrameHeader {
            sequence: header.sequence,
            timestamp: header.timestamp,
            missed: kopf.missed,
        };
        debug_assert!(laenge >= RTP_HEADER_GROESSE);
        weiterleiten(self.naechste.as_mut(), weiter, &nutzdaten[laenge..]).await
    }
}
