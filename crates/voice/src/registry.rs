//! Empfangs-Registry – Sender-Zuordnung und Pipelines pro Sprecher
//!
//! Verwaltet pro Session:
//! - SSRC → UserId (aus Signaling-Ereignissen befuellt, pro Paket gelesen)
//! - UserId → Empfangs-Pipeline (lazy vom Demultiplexer angelegt)
//!
//! Thread-safe durch DashMap. Entfernt wird bei PeerLeft, optional nach
//! Inaktivitaet und beim Abbau der Session; die Groesse beider Maps ist in
//! der Telemetrie sichtbar.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use funkwerk_core::event::SessionEreignis;
use funkwerk_core::types::UserId;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::eingang::EingangsStream;
use crate::error::VoiceResult;
use crate::stage::{weiterleiten, FrameHeader, FramedStage};

// ---------------------------------------------------------------------------
// SenderMap
// ---------------------------------------------------------------------------

/// Zuordnung SSRC → Benutzer
#[derive(Debug, Default)]
pub struct SenderMap {
    eintraege: DashMap<u32, UserId>,
}

impl SenderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ordnet eine SSRC einem Benutzer zu (ueberschreibt alte Zuordnung)
    pub fn zuordnen(&self, ssrc: u32, user_id: UserId) {
        if let Some(alt) = self.eintraege.insert(ssrc, user_id) {
            if alt != user_id {
                tracing::debug!(ssrc, alt = %alt, neu = %user_id, "SSRC neu zugeordnet");
            }
        }
    }

    /// Hot Path: Benutzer zu einer SSRC
    pub fn aufloesen(&self, ssrc: u32) -> Option<UserId> {
        self.eintraege.get(&ssrc).map(|r| *r)
    }

    /// Entfernt alle SSRCs eines Benutzers
    pub fn benutzer_entfernen(&self, user_id: UserId) -> usize {
        let vorher = self.eintraege.len();
        self.eintraege.retain(|_, uid| *uid != user_id);
        vorher - self.eintraege.len()
    }

    pub fn leeren(&self) {
        self.eintraege.clear();
    }

    pub fn anzahl(&self) -> usize {
        self.eintraege.len()
    }
}

// ---------------------------------------------------------------------------
// PipelinePaar
// ---------------------------------------------------------------------------

/// Empfangs-Pipeline eines Sprechers: Dekodier-Kette plus Lese-Handle
pub struct PipelinePaar {
    user_id: UserId,
    stream: Arc<EingangsStream>,
    kette: tokio::sync::Mutex<Box<dyn FramedStage>>,
    letzte_aktivitaet: Mutex<Instant>,
}

impl PipelinePaar {
    pub fn new(user_id: UserId, stream: Arc<EingangsStream>, kette: Box<dyn FramedStage>) -> Self {
        Self {
            user_id,
            stream,
            kette: tokio::sync::Mutex::new(kette),
            letzte_aktivitaet: Mutex::new(Instant::now()),
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Lese-Handle fuer die Anwendung
    pub fn stream(&self) -> Arc<EingangsStream> {
        Arc::clone(&self.stream)
    }

    /// Reicht ein empfangenes Datagramm in die Dekodier-Kette
    pub async fn datagramm_verarbeiten(&self, datagramm: &[u8]) -> VoiceResult<()> {
        *self.letzte_aktivitaet.lock() = Instant::now();
        let mut kette = self.kette.lock().await;
        weiterleiten(kette.as_mut(), FrameHeader::default(), datagramm).await
    }

    fn ist_inaktiv(&self, timeout: Duration) -> bool {
        self.letzte_aktivitaet.lock().elapsed() > timeout
    }
}

// ---------------------------------------------------------------------------
// PipelineRegistry
// ---------------------------------------------------------------------------

/// Alle Empfangs-Pipelines einer Session, indexiert nach UserId
pub struct PipelineRegistry {
    pipelines: DashMap<UserId, Arc<PipelinePaar>>,
    ereignisse: broadcast::Sender<SessionEreignis>,
}

impl PipelineRegistry {
    pub fn new(ereignisse: broadcast::Sender<SessionEreignis>) -> Self {
        Self {
            pipelines: DashMap::new(),
            ereignisse,
        }
    }

    /// Gibt die Pipeline eines Sprechers zurueck und legt sie bei Bedarf an
    ///
    /// Einzige Stelle, an der Pipelines entstehen. `StreamErstellt` wird
    /// gemeldet, bevor der Aufrufer die neue Pipeline benutzt.
    pub fn holen_oder_anlegen<F>(&self, user_id: UserId, bauen: F) -> VoiceResult<Arc<PipelinePaar>>
    where
        F: FnOnce(UserId) -> VoiceResult<PipelinePaar>,
    {
        match self.pipelines.entry(user_id) {
            Entry::Occupied(e) => Ok(Arc::clone(e.get())),
            Entry::Vacant(e) => {
                let paar = Arc::new(bauen(user_id)?);
                e.insert(Arc::clone(&paar));
                tracing::info!(user_id = %user_id, "Empfangs-Pipeline angelegt");
                let _ = self.ereignisse.send(SessionEreignis::StreamErstellt { user_id });
                Ok(paar)
            }
        }
    }

    pub fn holen(&self, user_id: UserId) -> Option<Arc<PipelinePaar>> {
        self.pipelines.get(&user_id).map(|r| Arc::clone(&r))
    }

    /// Baut die Pipeline eines Sprechers ab
    pub fn entfernen(&self, user_id: UserId) -> bool {
        match self.pipelines.remove(&user_id) {
            Some((_, paar)) => {
                paar.stream.schliessen();
                tracing::info!(user_id = %user_id, "Empfangs-Pipeline abgebaut");
                let _ = self
                    .ereignisse
                    .send(SessionEreignis::StreamZerstoert { user_id });
                true
            }
            None => false,
        }
    }

    /// Baut Pipelines ohne Pakete seit `timeout` ab
    ///
    /// Gibt die Liste der entfernten User-IDs zurueck.
    pub fn inaktive_bereinigen(&self, timeout: Duration) -> Vec<UserId> {
        let inaktive: Vec<UserId> = self
            .pipelines
            .iter()
            .filter(|e| e.ist_inaktiv(timeout))
            .map(|e| *e.key())
            .collect();

        for uid in &inaktive {
            if self.entfernen(*uid) {
                tracing::info!(user_id = %uid, "Inaktive Empfangs-Pipeline entfernt (Timeout)");
            }
        }
        inaktive
    }

    /// Baut alle Pipelines ab, je mit `StreamZerstoert`
    pub fn alle_abbauen(&self) -> usize {
        let alle: Vec<UserId> = self.pipelines.iter().map(|e| *e.key()).collect();
        alle.into_iter().filter(|uid| self.entfernen(*uid)).count()
    }

    /// Momentaufnahme aller Lese-Handles
    pub fn snapshot(&self) -> Vec<Arc<EingangsStream>> {
        self.pipelines.iter().map(|e| e.stream()).collect()
    }

    pub fn anzahl(&self) -> usize {
        self.pipelines.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
