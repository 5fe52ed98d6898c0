//! Signaling-Client
//!
//! Korreliert Anfragen und Antworten ueber `request_id` und verteilt
//! unaufgeforderte Benachrichtigungen des Relays.
//!
//! ## Ablauf
//! - `anfrage` traegt die erwartete Antwort-Art in die Anfrage-Tabelle ein,
//!   sendet und wartet mit Zeitlimit auf die passende Antwort
//! - Die Lese-Loop ordnet eingehende Antworten zu. Unbekannte IDs und
//!   Antworten der falschen Art werden geloggt und ignoriert; die Anfrage
//!   wartet weiter
//! - `Speaking` aktualisiert die Sender-Zuordnung, `PeerLeft` baut die
//!   Empfangs-Pipeline des Teilnehmers ab
//!
//! `TcpSignalKanal` transportiert die Nachrichten laengen-praefixiert ueber
//! TCP (`FrameCodec`).

use async_trait::async_trait;
use dashmap::DashMap;
use funkwerk_core::event::SessionEreignis;
use funkwerk_protocol::signal::{BENACHRICHTIGUNG_ID, SignalNachricht, SignalPayload};
use funkwerk_protocol::wire::FrameCodec;
use funkwerk_protocol::NachrichtenArt;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::error::{VoiceError, VoiceResult};
use crate::registry::{PipelineRegistry, SenderMap};

// ---------------------------------------------------------------------------
// Kanal
// ---------------------------------------------------------------------------

/// Bidirektionaler Signaling-Kanal zum Relay
#[async_trait]
pub trait SignalKanal: Send + Sync {
    async fn senden(&self, nachricht: SignalNachricht) -> VoiceResult<()>;

    /// Naechste Nachricht; `None` wenn die Gegenseite geschlossen hat
    async fn empfangen(&self) -> VoiceResult<Option<SignalNachricht>>;

    async fn schliessen(&self);
}

/// Baut einen Signaling-Kanal zu einem Endpunkt auf
#[async_trait]
pub trait SignalVerbinder: Send + Sync {
    async fn verbinden(&self, endpunkt: &str) -> VoiceResult<Arc<dyn SignalKanal>>;
}

type TcpFramed = Framed<TcpStream, FrameCodec>;

/// Signaling ueber TCP mit laengen-praefixierten JSON-Frames
pub struct TcpSignalKanal {
    schreiber: Mutex<SplitSink<TcpFramed, SignalNachricht>>,
    leser: Mutex<SplitStream<TcpFramed>>,
}

impl TcpSignalKanal {
    pub async fn verbinden(endpunkt: &str) -> VoiceResult<Self> {
        let stream = TcpStream::connect(endpunkt).await?;
        stream.set_nodelay(true)?;
        tracing::info!(endpunkt, "Signaling-Verbindung aufgebaut");
        Ok(Self::aus_stream(stream))
    }

    pub fn aus_stream(stream: TcpStream) -> Self {
        let (schreiber, leser) = Framed::new(stream, FrameCodec::new()).split();
        Self {
            schreiber: Mutex::new(schreiber),
            leser: Mutex::new(leser),
        }
    }
}

#[async_trait]
impl SignalKanal for TcpSignalKanal {
    async fn senden(&self, nachricht: SignalNachricht) -> VoiceResult<()> {
        self.schreiber.lock().await.send(nachricht).await?;
        Ok(())
    }

    async fn empfangen(&self) -> VoiceResult<Option<SignalNachricht>> {
        match self.leser.lock().await.next().await {
            Some(Ok(nachricht)) => Ok(Some(nachricht)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    async fn schliessen(&self) {
        if let Err(e) = self.schreiber.lock().await.close().await {
            tracing::debug!(fehler = %e, "Signaling-Verbindung nicht sauber geschlossen");
        }
    }
}

/// Verbinder fuer `TcpSignalKanal`
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpSignalVerbinder;

#[async_trait]
impl SignalVerbinder for TcpSignalVerbinder {
    async fn verbinden(&self, endpunkt: &str) -> VoiceResult<Arc<dyn SignalKanal>> {
        Ok(Arc::new(TcpSignalKanal::verbinden(endpunkt).await?))
    }
}

// ---------------------------------------------------------------------------
// Benachrichtigungen
// ---------------------------------------------------------------------------

/// Setzt Relay-Benachrichtigungen in Session-Zustand um
pub struct BenachrichtigungsVerteiler {
    pub sender: Arc<SenderMap>,
    pub registry: Arc<PipelineRegistry>,
    pub ereignisse: broadcast::Sender<SessionEreignis>,
}

impl BenachrichtigungsVerteiler {
    pub fn verarbeiten(&self, payload: SignalPayload) {
        match payload {
            SignalPayload::Speaking(s) => {
                self.sender.zuordnen(s.ssrc, s.user_id);
                let _ = self.ereignisse.send(SessionEreignis::SprechStatus {
                    user_id: s.user_id,
                    ssrc: s.ssrc,
                    spricht: s.speaking,
                });
            }
            SignalPayload::PeerLeft(p) => {
                let entfernt = self.sender.benutzer_entfernen(p.user_id);
                self.registry.entfernen(p.user_id);
                tracing::info!(user_id = %p.user_id, ssrcs = entfernt, "Teilnehmer hat den Kanal verlassen");
            }
            andere => {
                tracing::debug!(art = ?andere.art(), "Unerwartete Benachrichtigung ignoriert");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// SignalClient
// ---------------------------------------------------------------------------

struct AusstehendeAnfrage {
    erwartet: NachrichtenArt,
    antwort: oneshot::Sender<SignalPayload>,
}

/// Request/Response-Korrelation ueber einem [`SignalKanal`]
pub struct SignalClient {
    kanal: Arc<dyn SignalKanal>,
    ausstehend: DashMap<u32, AusstehendeAnfrage>,
    naechste_id: AtomicU32,
}

impl SignalClient {
    pub fn new(kanal: Arc<dyn SignalKanal>) -> Arc<Self> {
        Arc::new(Self {
            kanal,
            ausstehend: DashMap::new(),
            naechste_id: AtomicU32::new(1),
        })
    }

    fn id_vergeben(&self) -> u32 {
        loop {
            let id = self.naechste_id.fetch_add(1, Ordering::Relaxed);
            if id != BENACHRICHTIGUNG_ID {
                return id;
            }
        }
    }

    /// Sendet eine Anfrage und wartet auf die passende Antwort
    pub async fn anfrage(&self, payload: SignalPayload, zeitlimit: Duration) -> VoiceResult<SignalPayload> {
        let art = payload.art();
        let erwartet = art.erwartete_antwort().ok_or_else(|| {
            VoiceError::Signaling(format!("{art:?} ist keine Anfrage"))
        })?;

        let id = self.id_vergeben();
        let (tx, rx) = oneshot::channel();
        self.ausstehend.insert(
            id,
            AusstehendeAnfrage {
                erwartet,
                antwort: tx,
            },
        );

        tracing::debug!(request_id = id, art = ?art, "Signaling-Anfrage");
        if let Err(e) = self.kanal.senden(SignalNachricht::new(id, payload)).await {
            self.ausstehend.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(zeitlimit, rx).await {
            Ok(Ok(SignalPayload::Error(fehler))) => Err(VoiceError::Signaling(format!(
                "{:?}: {}",
                fehler.code, fehler.message
            ))),
            Ok(Ok(antwort)) => Ok(antwort),
            Ok(Err(_)) => Err(VoiceError::Signaling(
                "Signaling-Kanal geschlossen".into(),
            )),
            Err(_) => {
                self.ausstehend.remove(&id);
                Err(VoiceError::Zeitlimit(format!(
                    "keine {erwartet:?} innerhalb von {} ms",
                    zeitlimit.as_millis()
                )))
            }
        }
    }

    /// Ordnet eine eingegangene Nachricht zu
    fn zuordnen(&self, nachricht: SignalNachricht, verteiler: &BenachrichtigungsVerteiler) {
        let art = nachricht.payload.art();
        let id = nachricht.request_id;

        if id == BENACHRICHTIGUNG_ID || !art.ist_antwort() {
            verteiler.verarbeiten(nachricht.payload);
            return;
        }

        let passend = self
            .ausstehend
            .remove_if(&id, |_, a| a.erwartet == art || art == NachrichtenArt::Error);
        match passend {
            Some((_, anfrage)) => {
                let _ = anfrage.antwort.send(nachricht.payload);
            }
            None => match self.ausstehend.get(&id) {
                Some(a) => tracing::warn!(
                    request_id = id,
                    erwartet = ?a.erwartet,
                    erhalten = ?art,
                    "Antwort der falschen Art ignoriert"
                ),
                None => tracing::warn!(request_id = id, art = ?art, "Antwort ohne Anfrage ignoriert"),
            },
        }
    }

    /// Liest bis zum Abbruch oder Verbindungsende
    pub async fn lese_loop(self: Arc<Self>, verteiler: BenachrichtigungsVerteiler, abbruch: CancellationToken) {
        loop {
            let nachricht = tokio::select! {
                n = self.kanal.empfangen() => n,
                _ = abbruch.cancelled() => break,
            };
            match nachricht {
                Ok(Some(n)) => self.zuordnen(n, &verteiler),
                Ok(None) => {
                    tracing::info!("Signaling-Verbindung vom Relay geschlossen");
                    break;
                }
                Err(e) => {
                    tracing::warn!(fehler = %e, "Signaling-Lesefehler");
                    break;
                }
            }
        }
        // Wartende Anfragen erfahren ueber den geschlossenen oneshot davon
        self.ausstehend.clear();
        tracing::debug!("Signaling-Lese-Loop beendet");
    }

    pub fn ausstehend(&self) -> usize {
        self.ausstehend.len()
    }

    pub async fn schliessen(&self) {
        self.kanal.schliessen().await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
