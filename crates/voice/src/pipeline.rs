//! Pipeline-Fabrik
//!
//! Einzige Stelle, an der Stufen zu Ketten verbunden werden:
//!
//! ```text
//! Ausgang: [KodierStufe] -> [PacingStufe] -> RtpSchreiber -> VerschluesselStufe -> TransportSenke
//! Eingang: EntschluesselStufe -> RtpLeser -> DekodierStufe -> EingangsSenke
//! ```
//!
//! Die Fabrik kennt SSRC, Cipher und Transport der verbundenen Session und
//! haelt den [`SendeZaehler`], den alle ausgehenden Pipelines teilen. Sequenz
//! und Zeitstempel werden erst beim Senden vergeben: von der Pacing-Stufe,
//! sonst vom `RtpSchreiber`. Der Codec kommt ueber [`CodecFabrik`], damit
//! jede Pipeline eigene Encoder-/Decoder-Instanzen erhaelt.

use funkwerk_audio::{FrameDecoder, FrameEncoder, OpusDecoder, OpusEncoder};
use funkwerk_core::types::UserId;
use funkwerk_protocol::codec::OpusConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::cipher::{EntschluesselStufe, PayloadCipher, VerschluesselStufe};
use crate::codec::{DekodierStufe, KodierStufe};
use crate::config::PacingEinstellungen;
use crate::eingang::{EingangsSenke, EingangsStream};
use crate::error::{VoiceError, VoiceResult};
use crate::framing::{RtpLeser, RtpSchreiber, SendeZaehler, SequenzQuelle};
use crate::pacing::{PacingMonitor, PacingOptionen, PacingStufe};
use crate::registry::PipelinePaar;
use crate::stage::{FrameHeader, FramedStage};
use crate::telemetry::{EmpfangsZaehler, PacingStatistik};
use crate::transport::{DatagramTransport, TransportSenke};

// ---------------------------------------------------------------------------
// Codec-Fabrik
// ---------------------------------------------------------------------------

/// Erzeugt Encoder und Decoder fuer neue Pipelines
pub trait CodecFabrik: Send + Sync {
    /// Samples pro Kanal und Frame (RTP-Zeitstempel-Schritt)
    fn samples_pro_frame(&self) -> u32;

    /// Dauer eines Frames (Pacing-Takt)
    fn frame_dauer(&self) -> Duration;

    fn encoder(&self) -> VoiceResult<Box<dyn FrameEncoder>>;

    fn decoder(&self) -> VoiceResult<Box<dyn FrameDecoder>>;
}

/// Opus ueber audiopus
#[derive(Debug, Clone)]
pub struct OpusFabrik {
    config: OpusConfig,
}

impl OpusFabrik {
    pub fn new(config: OpusConfig) -> Self {
        Self { config }
    }
}

impl CodecFabrik for OpusFabrik {
    fn samples_pro_frame(&self) -> u32 {
        self.config.samples_pro_frame()
    }

    fn frame_dauer(&self) -> Duration {
        self.config.frame_dauer.dauer()
    }

    fn encoder(&self) -> VoiceResult<Box<dyn FrameEncoder>> {
        Ok(Box::new(OpusEncoder::new(self.config.clone())?))
    }

    fn decoder(&self) -> VoiceResult<Box<dyn FrameDecoder>> {
        Ok(Box::new(OpusDecoder::from_config(&self.config)?))
    }
}

// ---------------------------------------------------------------------------
// Pipeline-Arten
// ---------------------------------------------------------------------------

/// Die vier ausgehenden Pipeline-Varianten
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineArt {
    /// Fertig kodierte Frames, sofort gesendet
    Roh,
    /// Fertig kodierte Frames mit Pacing
    RohGepuffert,
    /// PCM, kodiert und sofort gesendet
    Codec,
    /// PCM, kodiert und mit Pacing
    CodecGepuffert,
}

impl PipelineArt {
    pub fn mit_codec(&self) -> bool {
        matches!(self, Self::Codec | Self::CodecGepuffert)
    }

    pub fn gepuffert(&self) -> bool {
        matches!(self, Self::RohGepuffert | Self::CodecGepuffert)
    }
}

/// Optionen einer ausgehenden Pipeline
#[derive(Debug, Clone)]
pub struct PipelineOptionen {
    /// Tiefe der Pacing-Warteschlange in ms Audio
    pub puffer_ms: u32,
    pub stille_bei_unterlauf: bool,
    pub max_paket_bytes: usize,
}

impl Default for PipelineOptionen {
    fn default() -> Self {
        Self::from(&PacingEinstellungen::default())
    }
}

impl From<&PacingEinstellungen> for PipelineOptionen {
    fn from(e: &PacingEinstellungen) -> Self {
        Self {
            puffer_ms: e.puffer_ms,
            stille_bei_unterlauf: e.stille_bei_unterlauf,
            max_paket_bytes: e.max_paket_bytes,
        }
    }
}

// ---------------------------------------------------------------------------
// AusgangsPipeline
// ---------------------------------------------------------------------------

/// Handle der Anwendung auf eine ausgehende Pipeline
pub struct AusgangsPipeline {
    art: PipelineArt,
    kopf: Box<dyn FramedStage>,
    pacing: Option<PacingMonitor>,
}

impl AusgangsPipeline {
    pub fn art(&self) -> PipelineArt {
        self.art
    }

    /// Kuendigt den Header des naechsten Payloads an
    ///
    /// Sequenz und Zeitstempel des Aufrufers werden beim Senden ersetzt,
    /// ausgewertet wird nur `missed`.
    pub fn header_ankuendigen(&mut self, kopf: FrameHeader) -> VoiceResult<()> {
        self.kopf.header_ankuendigen(kopf)
    }

    /// Liefert den Payload zum angekuendigten Header
    ///
    /// Bei Codec-Pipelines PCM (i16 LE, interleaved) beliebiger Laenge,
    /// sonst genau ein kodierter Frame.
    pub async fn payload_liefern(&mut self, nutzdaten: &[u8]) -> VoiceResult<()> {
        self.kopf.payload_liefern(nutzdaten).await
    }

    /// Header und Payload in einem Schritt
    pub async fn schreiben(&mut self, nutzdaten: &[u8]) -> VoiceResult<()> {
        self.kopf.header_ankuendigen(FrameHeader::default())?;
        self.kopf.payload_liefern(nutzdaten).await
    }

    /// Gibt gepufferte Daten weiter und wartet, bis das Pacing leer ist
    pub async fn flush(&mut self) -> VoiceResult<()> {
        self.kopf.flush().await
    }

    /// Verwirft alle gepufferten Daten
    pub fn clear(&mut self) {
        self.kopf.clear();
    }

    /// Pacing-Zaehler, falls die Pipeline gepuffert ist
    pub fn statistik(&self) -> Option<PacingStatistik> {
        self.pacing.as_ref().map(|p| p.statistik())
    }
}

// ---------------------------------------------------------------------------
// PipelineFabrik
// ---------------------------------------------------------------------------

/// Baut Pipelines fuer eine verbundene Session
pub struct PipelineFabrik {
    ssrc: u32,
    cipher: Arc<dyn PayloadCipher>,
    codec: Arc<dyn CodecFabrik>,
    transport: Arc<dyn DatagramTransport>,
    sende_zaehler: Arc<SendeZaehler>,
    empfangs_puffer_frames: usize,
    zaehler: Arc<EmpfangsZaehler>,
    abbruch: CancellationToken,
}

impl PipelineFabrik {
    pub fn new(
        ssrc: u32,
        cipher: Arc<dyn PayloadCipher>,
        codec: Arc<dyn CodecFabrik>,
        transport: Arc<dyn DatagramTransport>,
        empfangs_puffer_frames: usize,
        zaehler: Arc<EmpfangsZaehler>,
        abbruch: CancellationToken,
    ) -> Self {
        Self {
            ssrc,
            cipher,
            codec,
            transport,
            sende_zaehler: Arc::new(SendeZaehler::new()),
            empfangs_puffer_frames,
            zaehler,
            abbruch,
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Sequenz und Zeitstempel des naechsten gesendeten Frames der Session
    pub fn sende_position(&self) -> (u16, u32) {
        self.sende_zaehler.position()
    }

    /// Baut eine ausgehende Pipeline
    pub fn ausgang_bauen(
        &self,
        art: PipelineArt,
        optionen: &PipelineOptionen,
    ) -> VoiceResult<AusgangsPipeline> {
        if self.abbruch.is_cancelled() {
            return Err(VoiceError::NichtVerbunden);
        }

        let senke: Box<dyn FramedStage> = Box::new(TransportSenke::new(Arc::clone(&self.transport)));
        let verschluesselt = Box::new(VerschluesselStufe::new(Arc::clone(&self.cipher), senke));
        let samples = self.codec.samples_pro_frame();

        let (nach_codec, pacing) = if art.gepuffert() {
            let rtp = Box::new(RtpSchreiber::new(
                self.ssrc,
                samples,
                SequenzQuelle::Header,
                verschluesselt,
            ));
            let pacing_optionen = PacingOptionen {
                stille_bei_unterlauf: optionen.stille_bei_unterlauf,
                ..PacingOptionen::aus_dauer(
                    optionen.puffer_ms,
                    self.codec.frame_dauer(),
                    samples,
                    optionen.max_paket_bytes,
                )
            };
            let stufe = PacingStufe::new(
                pacing_optionen,
                rtp,
                Arc::clone(&self.sende_zaehler),
                &self.abbruch,
            )?;
            let monitor = stufe.monitor();
            (Box::new(stufe) as Box<dyn FramedStage>, Some(monitor))
        } else {
            let rtp = RtpSchreiber::new(
                self.ssrc,
                samples,
                SequenzQuelle::Session(Arc::clone(&self.sende_zaehler)),
                verschluesselt,
            );
            (Box::new(rtp) as Box<dyn FramedStage>, None)
        };

        let kopf: Box<dyn FramedStage> = if art.mit_codec() {
            Box::new(KodierStufe::new(self.codec.encoder()?, nach_codec))
        } else {
            nach_codec
        };

        tracing::info!(ssrc = self.ssrc, art = ?art, "Ausgehende Pipeline erstellt");
        Ok(AusgangsPipeline { art, kopf, pacing })
    }

    /// Baut die Empfangs-Pipeline eines Sprechers
    pub fn eingang_bauen(&self, user_id: UserId) -> VoiceResult<PipelinePaar> {
        let stream = EingangsStream::new(user_id, self.empfangs_puffer_frames);
        let senke = Box::new(EingangsSenke::new(
            Arc::clone(&stream),
            Arc::clone(&self.zaehler),
        ));
        let dekodiert = Box::new(DekodierStufe::new(
            self.codec.decoder()?,
            senke,
            Arc::clone(&self.zaehler),
        ));
        let rtp = Box::new(RtpLeser::new(dekodiert, Arc::clone(&self.zaehler)));
        let kette = Box::new(EntschluesselStufe::new(
            Arc::clone(&self.cipher),
            rtp,
            Arc::clone(&self.zaehler),
        ));
        Ok(PipelinePaar::new(user_id, stream, kette))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------


#[cfg(test)]
mod tests {
    use super::test_fabrik::{KopierFabrik, WERTE_PRO_FRAME};
    use super::*;
    use crate::cipher::AeadCipher;
    use async_trait::async_trait;
    use funkwerk_protocol::rtp::RtpHeader;
    use funkwerk_protocol::signal::CipherModus;
    use parking_lot::Mutex;
    use std::io;

    #[derive(Default)]
    struct Mitschnitt {
        datagramme: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl DatagramTransport for Mitschnitt {
        async fn senden(&self, daten: &[u8]) -> io::Result<usize> {
            self.datagramme.lock().push(daten.to_vec());
            Ok(daten.len())
        }

        async fn empfangen(&self, _puffer: &mut [u8]) -> io::Result<usize> {
            std::future::pending().await
        }
    }

    fn fabrik(transport: Arc<Mitschnitt>) -> PipelineFabrik {
        let cipher = AeadCipher::new(CipherModus::ChaCha20Poly1305, &[7u8; 32]).unwrap();
        PipelineFabrik::new(
            0x1234,
            Arc::new(cipher),
            Arc::new(KopierFabrik),
            transport,
            50,
            Arc::new(EmpfangsZaehler::new()),
            CancellationToken::new(),
        )
    }

    #[test]
    fn arten() {
        assert!(PipelineArt::CodecGepuffert.mit_codec());
        assert!(PipelineArt::CodecGepuffert.gepuffert());
        assert!(!PipelineArt::Roh.mit_codec());
        assert!(!PipelineArt::Codec.gepuffert());
    }

    #[tokio::test]
    async fn roh_pipeline_sendet_sofort() {
        let transport = Arc::new(Mitschnitt::default());
        let f = fabrik(Arc::clone(&transport));
        let mut p = f.ausgang_bauen(PipelineArt::Roh, &PipelineOptionen::default()).unwrap();

        p.schreiben(b"frame-a").await.unwrap();
        p.schreiben(b"frame-b").await.unwrap();
        assert!(p.statistik().is_none());

        let d = transport.datagramme.lock();
        assert_eq!(d.len(), 2);
        let (h0, _) = RtpHeader::decode(&d[0]).unwrap();
        let (h1, _) = RtpHeader::decode(&d[1]).unwrap();
        assert_eq!(h0.ssrc, 0x1234);
        assert_eq!(h1.sequence, h0.sequence.wrapping_add(1));
        // Nutzlast ist verschluesselt: 7 Bytes + Tag
        assert_eq!(d[0].len(), 12 + 7 + 16);
    }

    #[tokio::test]
    async fn pipelines_einer_session_wiederholen_keinen_header() {
        let transport = Arc::new(Mitschnitt::default());
        let f = fabrik(Arc::clone(&transport));
        let optionen = PipelineOptionen::default();

        let mut erste = f.ausgang_bauen(PipelineArt::Roh, &optionen).unwrap();
        erste.schreiben(b"AAAAAAAA").await.unwrap();
        drop(erste);

        let mut zweite = f.ausgang_bauen(PipelineArt::Roh, &optionen).unwrap();
        let mut parallel = f.ausgang_bauen(PipelineArt::Roh, &optionen).unwrap();
        zweite.schreiben(b"BBBBBBBB").await.unwrap();
        parallel.schreiben(b"CCCCCCCC").await.unwrap();
        zweite.schreiben(b"DDDDDDDD").await.unwrap();

        let d = transport.datagramme.lock();
        let koepfe: Vec<&[u8]> = d.iter().map(|p| &p[..12]).collect();
        for (i, a) in koepfe.iter().enumerate() {
            for b in &koepfe[i + 1..] {
                assert_ne!(a, b, "Header (Nonce) doppelt vergeben");
            }
        }
        let sequenzen: Vec<u16> = d.iter().map(|p| RtpHeader::decode(p).unwrap().0.sequence).collect();
        assert_eq!(sequenzen, vec![0, 1, 2, 3]);
        assert_eq!(f.sende_position(), (4, 4 * 960));

        // Gleicher Schluessel, verschiedene Nonce: XOR der Geheimtexte verraet
        // nicht das XOR der Klartexte
        let xor_geheim: Vec<u8> = d[0][12..20].iter().zip(&d[1][12..20]).map(|(a, b)| a ^ b).collect();
        assert_ne!(xor_geheim, vec![b'A' ^ b'B'; 8]);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_hinterlaesst_keine_luecke_auf_der_leitung() {
        let transport = Arc::new(Mitschnitt::default());
        let f = fabrik(Arc::clone(&transport));
        let optionen = PipelineOptionen {
            puffer_ms: 60,
            ..Default::default()
        };
        let mut p = f.ausgang_bauen(PipelineArt::RohGepuffert, &optionen).unwrap();

        p.schreiben(&[1; 20]).await.unwrap();
        p.schreiben(&[2; 20]).await.unwrap();
        p.clear();
        for i in 0..5 {
            p.schreiben(&[10 + i; 20]).await.unwrap();
        }
        p.flush().await.unwrap();

        let d = transport.datagramme.lock();
        let koepfe: Vec<RtpHeader> = d.iter().map(|p| RtpHeader::decode(p).unwrap().0).collect();
        let sequenzen: Vec<u16> = koepfe.iter().map(|h| h.sequence).collect();
        assert_eq!(sequenzen, vec![0, 1, 2, 3, 4]);
        for (i, h) in koepfe.iter().enumerate() {
            assert_eq!(h.timestamp, i as u32 * 960);
        }
        assert_eq!(p.statistik().unwrap().verworfen, 2);
    }

    #[tokio::test]
    async fn codec_kette_hin_und_zurueck() {
        let transport = Arc::new(Mitschnitt::default());
        let f = fabrik(Arc::clone(&transport));
        let mut p = f.ausgang_bauen(PipelineArt::Codec, &PipelineOptionen::default()).unwrap();

        // 2,5 Frames PCM; flush fuellt den Rest mit Stille
        let pcm: Vec<u8> = (0..WERTE_PRO_FRAME * 5).map(|i| (i % 251) as u8).collect();
        p.schreiben(&pcm).await.unwrap();
        p.flush().await.unwrap();
        assert_eq!(transport.datagramme.lock().len(), 3);

        let paar = f.eingang_bauen(UserId(9)).unwrap();
        let datagramme = transport.datagramme.lock().clone();
        for d in &datagramme {
            paar.datagramm_verarbeiten(d).await.unwrap();
        }

        let stream = paar.stream();
        let mut empfangen = Vec::new();
        while let Some(frame) = stream.frame_lesen() {
            empfangen.extend_from_slice(&frame.pcm);
        }
        // Dauer bleibt erhalten
        assert_eq!(empfangen.len(), WERTE_PRO_FRAME * 2 * 3);
        assert_eq!(&empfangen[..pcm.len()], &pcm[..]);
    }

    #[tokio::test(start_paused = true)]
    async fn gepufferte_pipeline_hat_statistik() {
        let transport = Arc::new(Mitschnitt::default());
        let f = fabrik(Arc::clone(&transport));
        let optionen = PipelineOptionen {
            puffer_ms: 60,
            ..Default::default()
        };
        let mut p = f.ausgang_bauen(PipelineArt::RohGepuffert, &optionen).unwrap();
        for _ in 0..5 {
            p.schreiben(&[1; 20]).await.unwrap();
        }
        p.flush().await.unwrap();

        let s = p.statistik().unwrap();
        assert_eq!(s.kapazitaet, 3);
        assert_eq!(s.gesendet, 5);
        assert_eq!(transport.datagramme.lock().len(), 5);
    }

    #[tokio::test]
    async fn stille_bei_unterlauf_abgelehnt() {
        let transport = Arc::new(Mitschnitt::default());
        let f = fabrik(transport);
        let optionen = PipelineOptionen {
            stille_bei_unterlauf: true,
            ..Default::default()
        };
        assert!(matches!(
            f.ausgang_bauen(PipelineArt::CodecGepuffert, &optionen),
            Err(VoiceError::Konfiguration(_))
        ));
    }
}
