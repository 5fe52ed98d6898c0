//! Voice-Session – Verbindungsaufbau, Lebenszyklus und Abbau
//!
//! ## Zustandsmaschine
//! ```text
//! Getrennt -> Verbinde(Faehigkeiten) -> Verbinde(Beitreten)
//!          -> Verbinde(TransportErstellen) -> Verbinde(Produzieren)
//!          -> Verbunden -> Trennend -> Getrennt
//!
//! Jeder Fehler im Aufbau: -> Fehlgeschlagen (kein automatischer Neuversuch)
//! ```
//!
//! Jeder Handshake-Schritt sendet genau eine korrelierte Anfrage und wartet
//! mit eigenem Zeitlimit auf die passende Antwort.
//!
//! ## Hintergrund-Tasks einer verbundenen Session
//! - Signaling-Lese-Loop (Antworten, Speaking, PeerLeft)
//! - Empfangs-Loop (Datagramme → Demultiplexer)
//! - Keepalive-Loop (Latenzmessung, optional Leerlauf-Bereinigung)
//!
//! Alle haengen an einem gemeinsamen `CancellationToken`; `stoppen` bricht
//! ihn ab und wartet auf jeden Task.

use funkwerk_core::event::SessionEreignis;
use funkwerk_core::types::{ChannelId, GuildId, UserId};
use funkwerk_protocol::signal::{
    CapabilitiesRequest, CipherModus, CodecBeschreibung, CreateTransportRequest, JoinRequest,
    ProduceRequest, SignalPayload,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cipher::{cipher_erstellen, PayloadCipher};
use crate::config::VoiceConfig;
use crate::demux::{empfangs_loop, Demultiplexer};
use crate::eingang::EingangsStream;
use crate::error::{VoiceError, VoiceResult};
use crate::latenz::{keepalive_loop, LatenzMesser, LeerlaufBereinigung};
use crate::pipeline::{AusgangsPipeline, CodecFabrik, OpusFabrik, PipelineArt, PipelineFabrik, PipelineOptionen};
use crate::registry::{PipelineRegistry, SenderMap};
use crate::signaling::{BenachrichtigungsVerteiler, SignalClient, SignalVerbinder, TcpSignalVerbinder};
use crate::telemetry::{EmpfangsZaehler, SessionStatistik};
use crate::transport::{DatagramTransport, TransportVerbinder, UdpVerbinder};

/// Kapazitaet des Ereignis-Kanals
const EREIGNIS_KAPAZITAET: usize = 256;

// ---------------------------------------------------------------------------
// Zustaende
// ---------------------------------------------------------------------------

/// Schritte des Verbindungsaufbaus in fester Reihenfolge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeSchritt {
    Faehigkeiten,
    Beitreten,
    TransportErstellen,
    Produzieren,
}

impl HandshakeSchritt {
    pub fn naechster(&self) -> Option<Self> {
        match self {
            Self::Faehigkeiten => Some(Self::Beitreten),
            Self::Beitreten => Some(Self::TransportErstellen),
            Self::TransportErstellen => Some(Self::Produzieren),
            Self::Produzieren => None,
        }
    }
}

impl std::fmt::Display for HandshakeSchritt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Faehigkeiten => write!(f, "capabilities"),
            Self::Beitreten => write!(f, "join"),
            Self::TransportErstellen => write!(f, "create_transport"),
            Self::Produzieren => write!(f, "produce"),
        }
    }
}

/// Verbindungszustand der Session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerbindungsZustand {
    Getrennt,
    Verbinde(HandshakeSchritt),
    Verbunden,
    Trennend,
    /// Letzter Aufbau fehlgeschlagen (Grund)
    Fehlgeschlagen(String),
}

/// Gilde und Kanal, die die Session betritt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionZiel {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
}

// ---------------------------------------------------------------------------
// Verbindung
// ---------------------------------------------------------------------------

/// Zwischenergebnisse des Handshakes
#[derive(Default)]
struct HandshakeStand {
    codec: Option<CodecBeschreibung>,
    cipher_modus: Option<CipherModus>,
    sitzung_id: Option<String>,
    transport_id: Option<String>,
    transport: Option<Arc<dyn DatagramTransport>>,
    cipher: Option<Arc<dyn PayloadCipher>>,
    ssrc: Option<u32>,
}

/// Ressourcen einer verbundenen Session
struct AktiveVerbindung {
    ssrc: u32,
    sitzung_id: String,
    abbruch: CancellationToken,
    signal: Arc<SignalClient>,
    fabrik: Arc<PipelineFabrik>,
    keepalive: JoinHandle<()>,
    empfang: JoinHandle<()>,
    signal_leser: JoinHandle<()>,
}

// ---------------------------------------------------------------------------
// VoiceSession
// ---------------------------------------------------------------------------

/// Client-Session fuer einen Voice-Kanal
///
/// Guenstig klonbar; alle Klone teilen denselben Zustand.
#[derive(Clone)]
pub struct VoiceSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: VoiceConfig,
    ziel: SessionZiel,
    signal_verbinder: Arc<dyn SignalVerbinder>,
    transport_verbinder: Arc<dyn TransportVerbinder>,
    codec: Arc<dyn CodecFabrik>,
    zustand: watch::Sender<VerbindungsZustand>,
    ereignisse: broadcast::Sender<SessionEreignis>,
    sender: Arc<SenderMap>,
    registry: Arc<PipelineRegistry>,
    zaehler: Arc<EmpfangsZaehler>,
    latenz: Arc<LatenzMesser>,
    verbindung: Mutex<Option<AktiveVerbindung>>,
}

impl VoiceSession {
    /// Session mit TCP-Signaling, UDP-Transport und Opus
    pub fn new(config: VoiceConfig, ziel: SessionZiel) -> Self {
        let codec = Arc::new(OpusFabrik::new(config.audio.opus_config()));
        Self::mit_komponenten(
            config,
            ziel,
            Arc::new(TcpSignalVerbinder),
            Arc::new(UdpVerbinder::default()),
            codec,
        )
    }

    /// Session mit eigenen Signaling-, Transport- und Codec-Implementierungen
    pub fn mit_komponenten(
        config: VoiceConfig,
        ziel: SessionZiel,
        signal_verbinder: Arc<dyn SignalVerbinder>,
        transport_verbinder: Arc<dyn TransportVerbinder>,
        codec: Arc<dyn CodecFabrik>,
    ) -> Self {
        let (ereignisse, _) = broadcast::channel(EREIGNIS_KAPAZITAET);
        let (zustand, _) = watch::channel(VerbindungsZustand::Getrennt);
        let latenz = Arc::new(LatenzMesser::new(
            config.keepalive.max_ausstehend,
            ereignisse.clone(),
        ));
        Self {
            inner: Arc::new(SessionInner {
                ziel,
                signal_verbinder,
                transport_verbinder,
                codec,
                zustand,
                sender: Arc::new(SenderMap::new()),
                registry: Arc::new(PipelineRegistry::new(ereignisse.clone())),
                zaehler: Arc::new(EmpfangsZaehler::new()),
                latenz,
                ereignisse,
                verbindung: Mutex::new(None),
                config,
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Lebenszyklus
    // -----------------------------------------------------------------------

    /// Baut die Verbindung auf
    ///
    /// Kehrt zurueck, sobald die Session verbunden ist oder der Aufbau
    /// fehlschlaegt. Fehler tragen den Handshake-Schritt.
    pub async fn starten(&self, endpunkt: &str, user_id: UserId, session_token: &str) -> VoiceResult<()> {
        let mut verbindung = self.inner.verbindung.lock().await;
        if verbindung.is_some() {
            return Err(VoiceError::BereitsVerbunden);
        }
        self.inner.config.validieren()?;

        tracing::info!(
            endpunkt,
            user_id = %user_id,
            guild_id = %self.inner.ziel.guild_id,
            channel_id = %self.inner.ziel.channel_id,
            "Voice-Verbindung wird aufgebaut"
        );

        let abbruch = CancellationToken::new();
        match self.verbinden(endpunkt, user_id, session_token, &abbruch).await {
            Ok(aktiv) => {
                let ssrc = aktiv.ssrc;
                tracing::info!(ssrc, sitzung_id = %aktiv.sitzung_id, "Voice-Session verbunden");
                *verbindung = Some(aktiv);
                self.inner.zustand.send_replace(VerbindungsZustand::Verbunden);
                let _ = self.inner.ereignisse.send(SessionEreignis::Verbunden { ssrc });
                Ok(())
            }
            Err((schritt, fehler)) => {
                abbruch.cancel();
                self.inner.sender.leeren();
                let grund = fehler.to_string();
                tracing::error!(schritt = %schritt, fehler = %grund, "Verbindungsaufbau fehlgeschlagen");
                self.inner
                    .zustand
                    .send_replace(VerbindungsZustand::Fehlgeschlagen(grund.clone()));
                let _ = self.inner.ereignisse.send(SessionEreignis::VerbindungFehlgeschlagen {
                    schritt: schritt.to_string(),
                    grund: grund.clone(),
                });
                Err(VoiceError::Verbindung {
                    schritt: schritt.to_string(),
                    grund,
                })
            }
        }
    }

    /// Baut die Session sauber ab
    ///
    /// Ohne aktive Verbindung ein No-Op.
    pub async fn stoppen(&self) -> VoiceResult<()> {
        let Some(aktiv) = self.inner.verbindung.lock().await.take() else {
            return Ok(());
        };
        self.inner.zustand.send_replace(VerbindungsZustand::Trennend);
        tracing::info!(ssrc = aktiv.ssrc, "Voice-Session wird getrennt");

        aktiv.abbruch.cancel();
        for (name, task) in [
            ("keepalive", aktiv.keepalive),
            ("empfang", aktiv.empfang),
            ("signaling", aktiv.signal_leser),
        ] {
            if let Err(e) = task.await {
                tracing::warn!(task = name, fehler = %e, "Hintergrund-Task nicht sauber beendet");
            }
        }
        aktiv.signal.schliessen().await;

        self.inner.latenz.zuruecksetzen();
        let abgebaut = self.inner.registry.alle_abbauen();
        self.inner.sender.leeren();

        self.inner.zustand.send_replace(VerbindungsZustand::Getrennt);
        let _ = self.inner.ereignisse.send(SessionEreignis::Getrennt);
        tracing::info!(pipelines = abgebaut, "Voice-Session getrennt");
        Ok(())
    }

    /// Wartet, bis die Session verbunden ist oder der Aufbau scheitert
    pub async fn bereit_abwarten(&self) -> VoiceResult<()> {
        let mut rx = self.inner.zustand.subscribe();
        let zustand = rx
            .wait_for(|z| {
                matches!(
                    z,
                    VerbindungsZustand::Verbunden | VerbindungsZustand::Fehlgeschlagen(_)
                )
            })
            .await
            .map_err(|_| VoiceError::Abgebrochen)?
            .clone();
        match zustand {
            VerbindungsZustand::Fehlgeschlagen(grund) => Err(VoiceError::Verbindung {
                schritt: "handshake".into(),
                grund,
            }),
            _ => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // Pipelines
    // -----------------------------------------------------------------------

    /// Erstellt eine ausgehende Pipeline der verbundenen Session
    pub async fn ausgehende_pipeline_erstellen(
        &self,
        art: PipelineArt,
        optionen: &PipelineOptionen,
    ) -> VoiceResult<AusgangsPipeline> {
        let verbindung = self.inner.verbindung.lock().await;
        let aktiv = verbindung.as_ref().ok_or(VoiceError::NichtVerbunden)?;
        aktiv.fabrik.ausgang_bauen(art, optionen)
    }

    /// Optionen aus der Session-Konfiguration
    pub fn standard_optionen(&self) -> PipelineOptionen {
        PipelineOptionen::from(&self.inner.config.pacing)
    }

    /// Momentaufnahme der Empfangs-Pipelines aller Sprecher
    pub fn eingehende_pipelines(&self) -> Vec<Arc<EingangsStream>> {
        self.inner.registry.snapshot()
    }

    // -----------------------------------------------------------------------
    // Zustand und Telemetrie
    // -----------------------------------------------------------------------

    pub fn zustand(&self) -> VerbindungsZustand {
        self.inner.zustand.borrow().clone()
    }

    pub fn zustand_beobachten(&self) -> watch::Receiver<VerbindungsZustand> {
        self.inner.zustand.subscribe()
    }

    pub fn ereignisse_abonnieren(&self) -> broadcast::Receiver<SessionEreignis> {
        self.inner.ereignisse.subscribe()
    }

    /// Eigene SSRC, solange verbunden
    pub async fn ssrc(&self) -> Option<u32> {
        self.inner.verbindung.lock().await.as_ref().map(|a| a.ssrc)
    }

    pub fn statistik(&self) -> SessionStatistik {
        SessionStatistik {
            empfang: self.inner.zaehler.snapshot(),
            pipelines: self.inner.registry.anzahl(),
            sender_eintraege: self.inner.sender.anzahl(),
            latenz_ms: self.inner.latenz.latenz_ms(),
        }
    }

    // -----------------------------------------------------------------------
    // Handshake
    // -----------------------------------------------------------------------

    fn schritt_setzen(&self, schritt: HandshakeSchritt) {
        tracing::info!(schritt = %schritt, "Handshake-Schritt");
        self.inner
            .zustand
            .send_replace(VerbindungsZustand::Verbinde(schritt));
    }

    async fn verbinden(
        &self,
        endpunkt: &str,
        user_id: UserId,
        session_token: &str,
        abbruch: &CancellationToken,
    ) -> Result<AktiveVerbindung, (HandshakeSchritt, VoiceError)> {
        let inner = &self.inner;
        let zeitlimit = inner.config.handshake.schritt_timeout();
        let mut schritt = HandshakeSchritt::Faehigkeiten;
        self.schritt_setzen(schritt);

        let kanal = tokio::time::timeout(zeitlimit, inner.signal_verbinder.verbinden(endpunkt))
            .await
            .map_err(|_| VoiceError::Zeitlimit(format!("Signaling-Verbindung zu {endpunkt}")))
            .and_then(|r| r)
            .map_err(|e| (schritt, e))?;
        let signal = SignalClient::new(kanal);
        let signal_leser = tokio::spawn(Arc::clone(&signal).lese_loop(
            BenachrichtigungsVerteiler {
                sender: Arc::clone(&inner.sender),
                registry: Arc::clone(&inner.registry),
                ereignisse: inner.ereignisse.clone(),
            },
            abbruch.clone(),
        ));

        let mut stand = HandshakeStand::default();
        loop {
            let ergebnis = match schritt {
                HandshakeSchritt::Faehigkeiten => self.faehigkeiten(&signal, &mut stand).await,
                HandshakeSchritt::Beitreten => {
                    self.beitreten(&signal, &mut stand, user_id, session_token).await
                }
                HandshakeSchritt::TransportErstellen => self.transport_erstellen(&signal, &mut stand).await,
                HandshakeSchritt::Produzieren => self.produzieren(&signal, &mut stand).await,
            };
            if let Err(e) = ergebnis {
                abbruch.cancel();
                let _ = signal_leser.await;
                signal.schliessen().await;
                return Err((schritt, e));
            }
            match schritt.naechster() {
                Some(n) => {
                    schritt = n;
                    self.schritt_setzen(schritt);
                }
                None => break,
            }
        }

        let fehlt = |was: &str| (schritt, VoiceError::Signaling(format!("{was} fehlt nach dem Handshake")));
        let ssrc = stand.ssrc.ok_or_else(|| fehlt("SSRC"))?;
        let transport = stand.transport.ok_or_else(|| fehlt("Transport"))?;
        let cipher = stand.cipher.ok_or_else(|| fehlt("Cipher"))?;
        let sitzung_id = stand.sitzung_id.unwrap_or_default();

        let fabrik = Arc::new(PipelineFabrik::new(
            ssrc,
            cipher,
            Arc::clone(&inner.codec),
            Arc::clone(&transport),
            inner.config.empfang.puffer_frames,
            Arc::clone(&inner.zaehler),
            abbruch.clone(),
        ));

        let demux = Demultiplexer::new(
            Arc::clone(&inner.sender),
            Arc::clone(&inner.registry),
            Arc::clone(&inner.latenz),
            Arc::clone(&fabrik),
            Arc::clone(&inner.zaehler),
        );
        let empfang = tokio::spawn(empfangs_loop(Arc::clone(&transport), demux, abbruch.clone()));

        let bereinigung = inner.config.empfang.leerlauf_timeout().map(|timeout| LeerlaufBereinigung {
            registry: Arc::clone(&inner.registry),
            timeout,
        });
        let keepalive = tokio::spawn(keepalive_loop(
            transport,
            Arc::clone(&inner.latenz),
            inner.config.keepalive.intervall(),
            bereinigung,
            abbruch.clone(),
        ));

        Ok(AktiveVerbindung {
            ssrc,
            sitzung_id,
            abbruch: abbruch.clone(),
            signal,
            fabrik,
            keepalive,
            empfang,
            signal_leser,
        })
    }

    async fn anfrage(&self, signal: &SignalClient, payload: SignalPayload) -> VoiceResult<SignalPayload> {
        signal
            .anfrage(payload, self.inner.config.handshake.schritt_timeout())
            .await
    }

    async fn faehigkeiten(&self, signal: &SignalClient, stand: &mut HandshakeStand) -> VoiceResult<()> {
        let angeboten = self.inner.config.handshake.cipher_modi.clone();
        let antwort = self
            .anfrage(
                signal,
                SignalPayload::Capabilities(CapabilitiesRequest {
                    codecs: vec![CodecBeschreibung::opus()],
                    cipher_modi: angeboten.clone(),
                }),
            )
            .await?;
        let SignalPayload::CapabilitiesResponse(r) = antwort else {
            return Err(unerwartet(&antwort));
        };
        if !angeboten.contains(&r.cipher_modus) {
            return Err(VoiceError::Signaling(format!(
                "Relay waehlt nicht angebotenen Cipher {}",
                r.cipher_modus
            )));
        }
        tracing::debug!(codec = %r.codec.name, cipher = %r.cipher_modus, "Faehigkeiten ausgehandelt");
        stand.codec = Some(r.codec);
        stand.cipher_modus = Some(r.cipher_modus);
        Ok(())
    }

    async fn beitreten(
        &self,
        signal: &SignalClient,
        stand: &mut HandshakeStand,
        user_id: UserId,
        session_token: &str,
    ) -> VoiceResult<()> {
        let antwort = self
            .anfrage(
                signal,
                SignalPayload::Join(JoinRequest {
                    user_id,
                    session_token: session_token.to_string(),
                    guild_id: self.inner.ziel.guild_id,
                    channel_id: self.inner.ziel.channel_id,
                }),
            )
            .await?;
        let SignalPayload::JoinResponse(r) = antwort else {
            return Err(unerwartet(&antwort));
        };
        for teilnehmer in &r.teilnehmer {
            if let Some(ssrc) = teilnehmer.ssrc {
                self.inner.sender.zuordnen(ssrc, teilnehmer.user_id);
            }
        }
        tracing::debug!(sitzung_id = %r.sitzung_id, teilnehmer = r.teilnehmer.len(), "Kanal betreten");
        stand.sitzung_id = Some(r.sitzung_id);
        Ok(())
    }

    async fn transport_erstellen(&self, signal: &SignalClient, stand: &mut HandshakeStand) -> VoiceResult<()> {
        let antwort = self
            .anfrage(
                signal,
                SignalPayload::CreateTransport(CreateTransportRequest { rtcp_mux: true }),
            )
            .await?;
        let SignalPayload::CreateTransportResponse(r) = antwort else {
            return Err(unerwartet(&antwort));
        };

        let modus = stand.cipher_modus.unwrap_or_default();
        let cipher = cipher_erstellen(modus, &r.secret_key)?;
        let ziel = SocketAddr::new(r.ip, r.port);
        let transport = self.inner.transport_verbinder.verbinden(ziel).await?;

        tracing::debug!(transport_id = %r.transport_id, ziel = %ziel, "Transport erstellt");
        stand.transport_id = Some(r.transport_id);
        stand.transport = Some(transport);
        stand.cipher = Some(cipher);
        Ok(())
    }

    async fn produzieren(&self, signal: &SignalClient, stand: &mut HandshakeStand) -> VoiceResult<()> {
        let ssrc = ssrc_erzeugen();
        let transport_id = stand.transport_id.clone().unwrap_or_default();
        let payload_typ = stand
            .codec
            .as_ref()
            .map(|c| c.payload_typ)
            .unwrap_or(funkwerk_protocol::rtp::RTP_PAYLOAD_TYP);

        let antwort = self
            .anfrage(
                signal,
                SignalPayload::Produce(ProduceRequest {
                    transport_id,
                    ssrc,
                    payload_typ,
                }),
            )
            .await?;
        let SignalPayload::ProduceResponse(r) = antwort else {
            return Err(unerwartet(&antwort));
        };
        tracing::debug!(producer_id = %r.producer_id, ssrc, "Produzent angemeldet");
        stand.ssrc = Some(ssrc);
        Ok(())
    }
}

fn unerwartet(antwort: &SignalPayload) -> VoiceError {
    VoiceError::Signaling(format!("unerwartete Antwort {:?}", antwort.art()))
}

/// Zufaellige SSRC ungleich 0
fn ssrc_erzeugen() -> u32 {
    loop {
        let ssrc = uuid::Uuid::new_v4().as_u128() as u32;
        if ssrc != 0 {
            return ssrc;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schritte_in_fester_reihenfolge() {
        let mut schritte = vec![HandshakeSchritt::Faehigkeiten];
        while let Some(n) = schritte.last().and_then(|s| s.naechster()) {
            schritte.push(n);
        }
        assert_eq!(
            schritte,
            vec![
                HandshakeSchritt::Faehigkeiten,
                HandshakeSchritt::Beitreten,
                HandshakeSchritt::TransportErstellen,
                HandshakeSchritt::Produzieren,
            ]
        );
        assert_eq!(HandshakeSchritt::TransportErstellen.to_string(), "create_transport");
    }

    #[test]
    fn ssrc_nie_null() {
        for _ in 0..100 {
            assert_ne!(ssrc_erzeugen(), 0);
        }
    }

    #[tokio::test]
    async fn ohne_verbindung_keine_pipeline() {
        let session = VoiceSession::new(
            VoiceConfig::default(),
            SessionZiel {
                guild_id: GuildId(1),
                channel_id: ChannelId(2),
            },
        );
        assert_eq!(session.zustand(), VerbindungsZustand::Getrennt);
        assert!(matches!(
            session
                .ausgehende_pipeline_erstellen(PipelineArt::Roh, &PipelineOptionen::default())
                .await,
            Err(VoiceError::NichtVerbunden)
        ));
        // Stoppen ohne Verbindung ist erlaubt
        session.stoppen().await.unwrap();
        assert!(session.eingehende_pipelines().is_empty());
    }
}
