//! Codec-Stufen
//!
//! `KodierStufe` nimmt PCM beliebiger Laenge entgegen (i16 little-endian,
//! interleaved), haelt einen Rest von weniger als einem Frame zwischen den
//! Aufrufen und gibt pro vollem Frame genau einen Opus-Frame weiter.
//! Ein unvollstaendiger letzter Frame wartet auf weitere Daten; nur ein
//! explizites `flush` fuellt ihn mit Stille auf.
//!
//! `DekodierStufe` dekodiert genau einen Frame pro Aufruf. Ist im Header
//! `missed` gesetzt, erzeugt der Decoder einen Verschleierungs-Frame statt
//! die Nutzlast zu lesen. Dekodierfehler verwerfen nur den einzelnen Frame.

use async_trait::async_trait;
use funkwerk_audio::codec::MAX_OPUS_FRAME;
use funkwerk_audio::pcm::{self, BYTES_PRO_WERT};
use funkwerk_audio::{FrameDecoder, FrameEncoder};
use std::sync::Arc;

use crate::error::VoiceResult;
use crate::stage::{weiterleiten, FrameHeader, FramedStage, HeaderWaechter};
use crate::telemetry::EmpfangsZaehler;

// ---------------------------------------------------------------------------
// KodierStufe
// ---------------------------------------------------------------------------

/// PCM → Opus
pub struct KodierStufe {
    waechter: HeaderWaechter,
    encoder: Box<dyn FrameEncoder>,
    naechste: Box<dyn FramedStage>,
    /// Bytes pro vollem PCM-Frame
    frame_bytes: usize,
    /// Uebertrag von weniger als einem Frame
    rest: Vec<u8>,
    werte: Vec<i16>,
    paket: Vec<u8>,
    letzter_kopf: FrameHeader,
}

impl KodierStufe {
    pub fn new(encoder: Box<dyn FrameEncoder>, naechste: Box<dyn FramedStage>) -> Self {
        let werte_pro_frame = encoder.werte_pro_frame();
        let frame_bytes = werte_pro_frame * BYTES_PRO_WERT;
        Self {
            waechter: HeaderWaechter::new(),
            encoder,
            naechste,
            frame_bytes,
            rest: Vec::with_capacity(frame_bytes),
            werte: vec![0; werte_pro_frame],
            paket: vec![0; MAX_OPUS_FRAME],
            letzter_kopf: FrameHeader::default(),
        }
    }

    /// Bytes, die noch auf einen vollen Frame warten
    pub fn uebertrag(&self) -> usize {
        self.rest.len()
    }

    async fn frame_kodieren(&mut self, kopf: FrameHeader, pcm_bytes: &[u8]) -> VoiceResult<()> {
        pcm::bytes_zu_werten(pcm_bytes, &mut self.werte);
        let laenge = self.encoder.kodieren(&self.werte, &mut self.paket)?;
        weiterleiten(self.naechste.as_mut(), kopf, &self.paket[..laenge]).await
    }

    async fn rest_kodieren(&mut self, kopf: FrameHeader) -> VoiceResult<()> {
        let rest = std::mem::take(&mut self.rest);
        let ergebnis = self.frame_kodieren(kopf, &rest).await;
        self.rest = rest;
        self.rest.clear();
        ergebnis
    }
}

#[async_trait]
impl FramedStage for KodierStufe {
    fn waechter(&mut self) -> &mut HeaderWaechter {
        &mut self.waechter
    }

    async fn frame_verarbeiten(&mut self, kopf: FrameHeader, nutzdaten: &[u8]) -> VoiceResult<()> {
        self.letzter_kopf = kopf;
        let mut daten = nutzdaten;

        if !self.rest.is_empty() {
            let fehlt = self.frame_bytes - self.rest.len();
            let n = fehlt.min(daten.len());
            self.rest.extend_from_slice(&daten[..n]);
            daten = &daten[n..];
            if self.rest.len() < self.frame_bytes {
                return Ok(());
            }
            self.rest_kodieren(kopf).await?;
        }

        while daten.len() >= self.frame_bytes {
            let (frame, uebrig) = daten.split_at(self.frame_bytes);
            self.frame_kodieren(kopf, frame).await?;
            daten = uebrig;
        }

        self.rest.extend_from_slice(daten);
        Ok(())
    }

    /// Fuellt einen angefangenen Frame mit Stille auf und gibt ihn weiter
    async fn flush(&mut self) -> VoiceResult<()> {
        if !self.rest.is_empty() {
            self.rest.resize(self.frame_bytes, 0);
            let kopf = self.letzter_kopf;
            self.rest_kodieren(kopf).await?;
        }
        self.naechste.flush().await
    }

    fn clear(&mut self) {
        self.rest.clear();
        self.naechste.clear();
    }
}

// ---------------------------------------------------------------------------
// DekodierStufe
// ---------------------------------------------------------------------------

/// Opus → PCM
pub struct DekodierStufe {
    waechter: HeaderWaechter,
    decoder: Box<dyn FrameDecoder>,
    naechste: Box<dyn FramedStage>,
    zaehler: Arc<EmpfangsZaehler>,
    werte: Vec<i16>,
    ausgabe: Vec<u8>,
}

impl DekodierStufe {
    pub fn new(
        decoder: Box<dyn FrameDecoder>,
        naechste: Box<dyn FramedStage>,
        zaehler: Arc<EmpfangsZaehler>,
    ) -> Self {
        let werte_pro_frame = decoder.werte_pro_frame();
        Self {
            waechter: HeaderWaechter::new(),
            decoder,
            naechste,
            zaehler,
            werte: vec![0; werte_pro_frame],
            ausgabe: Vec::with_capacity(werte_pro_frame * BYTES_PRO_WERT),
        }
    }
}

#[async_trait]
impl FramedStage for DekodierStufe {
    fn waechter(&mut self) -> &mut HeaderWaechter {
        &mut self.waechter
    }

    async fn frame_verarbeiten(&mut self, kopf: FrameHeader, nutzdaten: &[u8]) -> VoiceResult<()> {
        let eingabe = if kopf.missed { None } else { Some(nutzdaten) };
        let werte = match self.decoder.dekodieren(eingabe, &mut self.werte) {
            Ok(n) => n,
            Err(e) => {
                EmpfangsZaehler::erhoehen(&self.zaehler.dekodierung_fehlgeschlagen);
                tracing::debug!(
                    fehler = %e,
                    sequence = kopf.sequence,
                    "Frame nicht dekodierbar, verworfen"
                );
                return Ok(());
            }
        };

        self.ausgabe.clear();
        pcm::werte_anhaengen(&self.werte[..werte], &mut self.ausgabe);
        weiterleiten(self.naechste.as_mut(), kopf, &self.ausgabe).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------


#[cfg(test)]
mod tests {
    use super::test_codec::KopierCodec;
    use super::*;
    use crate::stage::test_hilfen::Sammler;

    const WERTE: usize = 4;
    const FRAME_BYTES: usize = WERTE * 2;

    fn kodierer() -> (
        KodierStufe,
        Arc<parking_lot::Mutex<Vec<(FrameHeader, Vec<u8>)>>>,
    ) {
        let (sammler, frames) = Sammler::new();
        let stufe = KodierStufe::new(
            Box::new(KopierCodec {
                werte_pro_frame: WERTE,
            }),
            Box::new(sammler),
        );
        (stufe, frames)
    }

    async fn schreiben(stufe: &mut KodierStufe, daten: &[u8]) {
        stufe.header_ankuendigen(FrameHeader::new(0, 0)).unwrap();
        stufe.payload_liefern(daten).await.unwrap();
    }

    #[tokio::test]
    async fn uebertrag_zwischen_aufrufen() {
        let (mut stufe, frames) = kodierer();

        schreiben(&mut stufe, &[1; 5]).await;
        assert!(frames.lock().is_empty());
        assert_eq!(stufe.uebertrag(), 5);

        // 5 + 13 = 18 Bytes -> 2 Frames, 2 Bytes Rest
        schreiben(&mut stufe, &[2; 13]).await;
        assert_eq!(frames.lock().len(), 2);
        assert_eq!(stufe.uebertrag(), 2);

        let frames = frames.lock();
        assert_eq!(&frames[0].1[..5], &[1; 5]);
        assert_eq!(&frames[0].1[5..], &[2; 3]);
    }

    #[tokio::test]
    async fn mehrere_frames_in_einem_aufruf() {
        let (mut stufe, frames) = kodierer();
        schreiben(&mut stufe, &[7; FRAME_BYTES * 3]).await;
        assert_eq!(frames.lock().len(), 3);
        assert_eq!(stufe.uebertrag(), 0);
    }

    #[tokio::test]
    async fn flush_fuellt_mit_stille() {
        let (mut stufe, frames) = kodierer();
        schreiben(&mut stufe, &[9; 3]).await;
        stufe.flush().await.unwrap();

        let frames = frames.lock();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].1, vec![9, 9, 9, 0, 0, 0, 0, 0]);
        assert_eq!(stufe.uebertrag(), 0);
    }

    #[tokio::test]
    async fn dekodierer_verschleiert_verlust() {
        let (sammler, frames) = Sammler::new();
        let zaehler = Arc::new(EmpfangsZaehler::new());
        let mut stufe = DekodierStufe::new(
            Box::new(KopierCodec {
                werte_pro_frame: WERTE,
            }),
            Box::new(sammler),
            Arc::clone(&zaehler),
        );

        stufe
            .header_ankuendigen(FrameHeader::verloren(3, 0))
            .unwrap();
        stufe.payload_liefern(&[0xFF; 2]).await.unwrap();

        let frames = frames.lock();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].0.missed);
        assert_eq!(frames[0].1, vec![0; FRAME_BYTES]);
    }

    #[tokio::test]
    async fn dekodierfehler_verwirft_nur_frame() {
        let (sammler, frames) = Sammler::new();
        let zaehler = Arc::new(EmpfangsZaehler::new());
        let mut stufe = DekodierStufe::new(
            Box::new(KopierCodec {
                werte_pro_frame: WERTE,
            }),
            Box::new(sammler),
            Arc::clone(&zaehler),
        );

        stufe.header_ankuendigen(FrameHeader::new(1, 0)).unwrap();
        stufe.payload_liefern(&[1, 2, 3]).await.unwrap();
        stufe.header_ankuendigen(FrameHeader::new(2, 0)).unwrap();
        stufe.payload_liefern(&[1; FRAME_BYTES]).await.unwrap();

        assert_eq!(frames.lock().len(), 1);
        assert_eq!(zaehler.snapshot().dekodierung_fehlgeschlagen, 1);
    }
}
