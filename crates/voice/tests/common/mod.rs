//! Gemeinsame Test-Hilfen: In-Memory-Relay fuer Signaling und Datagramme
#![allow(dead_code)]

use async_trait::async_trait;
use base64::Engine;
use funkwerk_audio::{AudioError, AudioResult, FrameDecoder, FrameEncoder};
use funkwerk_core::event::SessionEreignis;
use funkwerk_core::types::{ChannelId, GuildId, UserId};
use funkwerk_protocol::rtp::RtpHeader;
use funkwerk_protocol::signal::{
    CapabilitiesResponse, CipherModus, CodecBeschreibung, CreateTransportResponse, ErrorCode,
    JoinResponse, NachrichtenArt, PeerLeftNotification, ProduceResponse, SignalNachricht,
    SignalPayload, SpeakingNotification, TeilnehmerInfo,
};
use funkwerk_voice::cipher::{AeadCipher, PayloadCipher};
use funkwerk_voice::signaling::{SignalKanal, SignalVerbinder};
use funkwerk_voice::transport::{DatagramTransport, TransportVerbinder};
use funkwerk_voice::{CodecFabrik, SessionZiel, VoiceConfig, VoiceError, VoiceResult, VoiceSession};
use parking_lot::Mutex;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

pub const SCHLUESSEL: [u8; 32] = [7; 32];
pub const SAMPLES_PRO_FRAME: u32 = 960;
pub const WERTE_PRO_FRAME: usize = 960 * 2;
pub const FRAME_BYTES: usize = WERTE_PRO_FRAME * 2;

/// Werte, die der Test-Codec pro Frame tatsaechlich uebertraegt
pub const KENN_WERTE: usize = 8;

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Verlustbehafteter Mini-Codec: uebertraegt nur die ersten acht Werte
pub struct MiniCodec;

impl FrameEncoder for MiniCodec {
    fn werte_pro_frame(&self) -> usize {
        WERTE_PRO_FRAME
    }

    fn kodieren(&mut self, pcm: &[i16], ausgabe: &mut [u8]) -> AudioResult<usize> {
        for (i, wert) in pcm.iter().take(KENN_WERTE).enumerate() {
            ausgabe[i * 2..i * 2 + 2].copy_from_slice(&wert.to_le_bytes());
        }
        Ok(KENN_WERTE * 2)
    }
}

impl FrameDecoder for MiniCodec {
    fn werte_pro_frame(&self) -> usize {
        WERTE_PRO_FRAME
    }

    fn dekodieren(&mut self, daten: Option<&[u8]>, ausgabe: &mut [i16]) -> AudioResult<usize> {
        ausgabe[..WERTE_PRO_FRAME].fill(0);
        if let Some(daten) = daten {
            if daten.len() != KENN_WERTE * 2 {
                return Err(AudioError::CodecFehler(format!("{} Bytes", daten.len())));
            }
            for (i, paar) in daten.chunks_exact(2).enumerate() {
                ausgabe[i] = i16::from_le_bytes([paar[0], paar[1]]);
            }
        }
        Ok(WERTE_PRO_FRAME)
    }
}

pub struct MiniFabrik;

impl CodecFabrik for MiniFabrik {
    fn samples_pro_frame(&self) -> u32 {
        SAMPLES_PRO_FRAME
    }

    fn frame_dauer(&self) -> Duration {
        Duration::from_millis(20)
    }

    fn encoder(&self) -> VoiceResult<Box<dyn FrameEncoder>> {
        Ok(Box::new(MiniCodec))
    }

    fn decoder(&self) -> VoiceResult<Box<dyn FrameDecoder>> {
        Ok(Box::new(MiniCodec))
    }
}

// ---------------------------------------------------------------------------
// Signaling
// ---------------------------------------------------------------------------

struct SpeicherKanal {
    raus: mpsc::UnboundedSender<SignalNachricht>,
    rein: tokio::sync::Mutex<mpsc::UnboundedReceiver<SignalNachricht>>,
}

#[async_trait]
impl SignalKanal for SpeicherKanal {
    async fn senden(&self, nachricht: SignalNachricht) -> VoiceResult<()> {
        self.raus
            .send(nachricht)
            .map_err(|_| VoiceError::Signaling("Relay getrennt".into()))
    }

    async fn empfangen(&self) -> VoiceResult<Option<SignalNachricht>> {
        Ok(self.rein.lock().await.recv().await)
    }

    async fn schliessen(&self) {}
}

struct SpeicherSignalVerbinder {
    kanal: Mutex<Option<Arc<SpeicherKanal>>>,
}

#[async_trait]
impl SignalVerbinder for SpeicherSignalVerbinder {
    async fn verbinden(&self, _endpunkt: &str) -> VoiceResult<Arc<dyn SignalKanal>> {
        let kanal = self
            .kanal
            .lock()
            .take()
            .ok_or_else(|| VoiceError::Signaling("Kanal bereits vergeben".into()))?;
        Ok(kanal)
    }
}

// ---------------------------------------------------------------------------
// Datagramme
// ---------------------------------------------------------------------------

struct SpeicherTransport {
    raus: mpsc::UnboundedSender<Vec<u8>>,
    rein: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

#[async_trait]
impl DatagramTransport for SpeicherTransport {
    async fn senden(&self, daten: &[u8]) -> io::Result<usize> {
        self.raus
            .send(daten.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "Relay getrennt"))?;
        Ok(daten.len())
    }

    async fn empfangen(&self, puffer: &mut [u8]) -> io::Result<usize> {
        match self.rein.lock().await.recv().await {
            Some(d) => {
                puffer[..d.len()].copy_from_slice(&d);
                Ok(d.len())
            }
            None => std::future::pending().await,
        }
    }
}

struct SpeicherTransportVerbinder {
    transport: Mutex<Option<Arc<SpeicherTransport>>>,
    ziel: Arc<Mutex<Option<SocketAddr>>>,
}

#[async_trait]
impl TransportVerbinder for SpeicherTransportVerbinder {
    async fn verbinden(&self, ziel: SocketAddr) -> io::Result<Arc<dyn DatagramTransport>> {
        *self.ziel.lock() = Some(ziel);
        let transport = self
            .transport
            .lock()
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::AddrInUse, "Transport vergeben"))?;
        Ok(transport)
    }
}

// ---------------------------------------------------------------------------
// Relay
// ---------------------------------------------------------------------------

/// Verhalten des Test-Relays im Handshake
#[derive(Default, Clone)]
pub struct RelayVerhalten {
    /// Vor der Capabilities-Antwort eine Antwort falscher Art senden
    pub falsche_art_zuerst: bool,
    /// Join-Anfragen nie beantworten
    pub join_ignorieren: bool,
    /// Anfrage dieser Art mit einem Fehler beantworten
    pub fehler_bei: Option<NachrichtenArt>,
    /// Teilnehmer in der Join-Antwort
    pub teilnehmer: Vec<TeilnehmerInfo>,
    /// Keepalives zurueckspiegeln
    pub keepalive_echo: bool,
}

/// Relay-Seite der Testumgebung
pub struct TestRelay {
    /// Alle vom Client empfangenen Anfragen
    pub anfragen: Arc<Mutex<Vec<SignalPayload>>>,
    /// Zieladresse, die der Client fuer den Transport verwendet hat
    pub transport_ziel: Arc<Mutex<Option<SocketAddr>>>,
    signal_an_client: mpsc::UnboundedSender<SignalNachricht>,
    datagramm_an_client: mpsc::UnboundedSender<Vec<u8>>,
    vom_client: Arc<Mutex<Vec<Vec<u8>>>>,
    cipher: AeadCipher,
}

impl TestRelay {
    pub fn benachrichtigen(&self, payload: SignalPayload) {
        let _ = self
            .signal_an_client
            .send(SignalNachricht::benachrichtigung(payload));
    }

    pub fn sprecher_melden(&self, user_id: UserId, ssrc: u32) {
        self.benachrichtigen(SignalPayload::Speaking(SpeakingNotification {
            user_id,
            ssrc,
            speaking: true,
        }));
    }

    pub fn teilnehmer_weg(&self, user_id: UserId) {
        self.benachrichtigen(SignalPayload::PeerLeft(PeerLeftNotification { user_id }));
    }

    /// Sendet ein verschluesseltes RTP-Paket, dessen Frame mit `kennung` beginnt
    pub fn rtp_senden(&self, ssrc: u32, sequence: u16, kennung: [i16; 2]) {
        let header = RtpHeader::new(sequence, sequence as u32 * SAMPLES_PRO_FRAME, ssrc).encode();
        let mut klartext = Vec::with_capacity(KENN_WERTE * 2);
        for i in 0..KENN_WERTE {
            let wert = kennung.get(i).copied().unwrap_or(0);
            klartext.extend_from_slice(&wert.to_le_bytes());
        }
        let mut paket = header.to_vec();
        paket.extend(self.cipher.verschluesseln(&header, &klartext).unwrap());
        let _ = self.datagramm_an_client.send(paket);
    }

    pub fn roh_senden(&self, datagramm: Vec<u8>) {
        let _ = self.datagramm_an_client.send(datagramm);
    }

    /// Vom Client gesendete RTP-Pakete (ohne Keepalives)
    pub fn rtp_vom_client(&self) -> Vec<RtpHeader> {
        self.vom_client
            .lock()
            .iter()
            .filter(|d| d.len() != funkwerk_protocol::keepalive::KEEPALIVE_GROESSE)
            .map(|d| RtpHeader::decode(d).unwrap().0)
            .collect()
    }

    pub fn keepalives_vom_client(&self) -> usize {
        self.vom_client
            .lock()
            .iter()
            .filter(|d| d.len() == funkwerk_protocol::keepalive::KEEPALIVE_GROESSE)
            .count()
    }

    pub fn anfrage_arten(&self) -> Vec<NachrichtenArt> {
        self.anfragen.lock().iter().map(|p| p.art()).collect()
    }
}

fn antworten(
    nachricht: &SignalNachricht,
    verhalten: &RelayVerhalten,
    an_client: &mpsc::UnboundedSender<SignalNachricht>,
) {
    let id = nachricht.request_id;
    let art = nachricht.payload.art();
    if verhalten.fehler_bei == Some(art) {
        let _ = an_client.send(SignalNachricht::error(id, ErrorCode::PermissionDenied, "verboten"));
        return;
    }

    let antwort = match &nachricht.payload {
        SignalPayload::Capabilities(_) => {
            if verhalten.falsche_art_zuerst {
                let _ = an_client.send(SignalNachricht::new(
                    id,
                    SignalPayload::ProduceResponse(ProduceResponse {
                        producer_id: "falsch".into(),
                    }),
                ));
            }
            SignalPayload::CapabilitiesResponse(CapabilitiesResponse {
                codec: CodecBeschreibung::opus(),
                cipher_modus: CipherModus::ChaCha20Poly1305,
            })
        }
        SignalPayload::Join(_) if verhalten.join_ignorieren => return,
        SignalPayload::Join(_) => SignalPayload::JoinResponse(JoinResponse {
            sitzung_id: "sitzung-1".into(),
            teilnehmer: verhalten.teilnehmer.clone(),
        }),
        SignalPayload::CreateTransport(_) => {
            SignalPayload::CreateTransportResponse(CreateTransportResponse {
                transport_id: "transport-1".into(),
                ip: "127.0.0.1".parse().unwrap(),
                port: 50_000,
                secret_key: base64::engine::general_purpose::STANDARD.encode(SCHLUESSEL),
            })
        }
        SignalPayload::Produce(_) => SignalPayload::ProduceResponse(ProduceResponse {
            producer_id: "produzent-1".into(),
        }),
        _ => return,
    };
    let _ = an_client.send(SignalNachricht::new(id, antwort));
}

/// Session und Relay, verbunden ueber In-Memory-Kanaele
pub struct TestUmgebung {
    pub session: VoiceSession,
    pub relay: TestRelay,
    pub ereignisse: broadcast::Receiver<SessionEreignis>,
}

pub fn ziel() -> SessionZiel {
    SessionZiel {
        guild_id: GuildId(1),
        channel_id: ChannelId(2),
    }
}

pub fn test_config() -> VoiceConfig {
    let mut config = VoiceConfig::default();
    config.pacing.puffer_ms = 1000;
    config.empfang.puffer_frames = 50;
    config
}

pub fn umgebung(config: VoiceConfig, verhalten: RelayVerhalten) -> TestUmgebung {
    let (signal_an_client, signal_client_rein) = mpsc::unbounded_channel();
    let (signal_an_relay, mut signal_relay_rein) = mpsc::unbounded_channel::<SignalNachricht>();
    let (datagramm_an_client, datagramm_client_rein) = mpsc::unbounded_channel();
    let (datagramm_an_relay, mut datagramm_relay_rein) = mpsc::unbounded_channel::<Vec<u8>>();

    let kanal = Arc::new(SpeicherKanal {
        raus: signal_an_relay,
        rein: tokio::sync::Mutex::new(signal_client_rein),
    });
    let transport = Arc::new(SpeicherTransport {
        raus: datagramm_an_relay,
        rein: tokio::sync::Mutex::new(datagramm_client_rein),
    });
    let transport_ziel = Arc::new(Mutex::new(None));

    let session = VoiceSession::mit_komponenten(
        config,
        ziel(),
        Arc::new(SpeicherSignalVerbinder {
            kanal: Mutex::new(Some(kanal)),
        }),
        Arc::new(SpeicherTransportVerbinder {
            transport: Mutex::new(Some(transport)),
            ziel: Arc::clone(&transport_ziel),
        }),
        Arc::new(MiniFabrik),
    );
    let ereignisse = session.ereignisse_abonnieren();

    let anfragen = Arc::new(Mutex::new(Vec::new()));
    let signal_tx = signal_an_client.clone();
    let mitschnitt = Arc::clone(&anfragen);
    let handshake_verhalten = verhalten.clone();
    tokio::spawn(async move {
        while let Some(nachricht) = signal_relay_rein.recv().await {
            mitschnitt.lock().push(nachricht.payload.clone());
            antworten(&nachricht, &handshake_verhalten, &signal_tx);
        }
    });

    let vom_client = Arc::new(Mutex::new(Vec::new()));
    let datagramm_mitschnitt = Arc::clone(&vom_client);
    let echo = datagramm_an_client.clone();
    tokio::spawn(async move {
        while let Some(d) = datagramm_relay_rein.recv().await {
            if verhalten.keepalive_echo
                && d.len() == funkwerk_protocol::keepalive::KEEPALIVE_GROESSE
            {
                let _ = echo.send(d.clone());
            }
            datagramm_mitschnitt.lock().push(d);
        }
    });

    TestUmgebung {
        session,
        relay: TestRelay {
            anfragen,
            transport_ziel,
            signal_an_client,
            datagramm_an_client,
            vom_client,
            cipher: AeadCipher::new(CipherModus::ChaCha20Poly1305, &SCHLUESSEL).unwrap(),
        },
        ereignisse,
    }
}

/// Verbundene Umgebung mit Standard-Relay
pub async fn verbunden(config: VoiceConfig, verhalten: RelayVerhalten) -> TestUmgebung {
    let u = umgebung(config, verhalten);
    u.session
        .starten("relay.test:4000", UserId(100), "token")
        .await
        .unwrap();
    u
}

/// Wartet (in Test-Zeit), bis die Bedingung erfuellt ist
pub async fn warten_bis(mut bedingung: impl FnMut() -> bool) {
    for _ in 0..2000 {
        if bedingung() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("Bedingung nicht rechtzeitig erfuellt");
}

/// Naechstes Ereignis, das `passt` erfuellt; andere werden uebersprungen
pub async fn ereignis_abwarten(
    rx: &mut broadcast::Receiver<SessionEreignis>,
    passt: impl Fn(&SessionEreignis) -> bool,
) -> SessionEreignis {
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            let e = rx.recv().await.unwrap();
            if passt(&e) {
                return e;
            }
        }
    })
    .await
    .expect("Ereignis blieb aus")
}

/// Erste zwei Werte eines dekodierten Frames
pub fn kennung(pcm: &[u8]) -> [i16; 2] {
    [
        i16::from_le_bytes([pcm[0], pcm[1]]),
        i16::from_le_bytes([pcm[2], pcm[3]]),
    ]
}
