//! Keepalive und Latenzmessung
//!
//! Die Session sendet periodisch ein 8-Byte-Token an das Relay, das es
//! unveraendert zurueckschickt. Aus Sende- und Empfangszeitpunkt ergibt sich
//! die Latenz. Hoechstens `max_ausstehend` Tokens werden verfolgt; weitere
//! werden trotzdem gesendet, aber nicht ausgewertet.
//!
//! Tokens steigen monoton. Jede Antwort verwirft alle aelteren ausstehenden
//! Tokens, auch wenn das beantwortete Token selbst nicht verfolgt wurde.
//! Nach einem Ausfall wird die Messung so mit der ersten Antwort wieder frei.

use funkwerk_core::event::SessionEreignis;
use funkwerk_protocol::keepalive;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::registry::PipelineRegistry;
use crate::transport::DatagramTransport;

/// Verfolgt ausstehende Keepalive-Tokens und die letzte Latenz
pub struct LatenzMesser {
    ausstehend: Mutex<VecDeque<(u64, Instant)>>,
    max_ausstehend: usize,
    naechstes_token: AtomicU64,
    latenz_ms: AtomicU32,
    ereignisse: broadcast::Sender<SessionEreignis>,
}

impl LatenzMesser {
    pub fn new(max_ausstehend: usize, ereignisse: broadcast::Sender<SessionEreignis>) -> Self {
        Self {
            ausstehend: Mutex::new(VecDeque::with_capacity(max_ausstehend)),
            max_ausstehend,
            naechstes_token: AtomicU64::new(1),
            latenz_ms: AtomicU32::new(0),
            ereignisse,
        }
    }

    /// Erzeugt das naechste Token und merkt sich den Sendezeitpunkt
    ///
    /// Gibt das Token und ob es verfolgt wird zurueck.
    pub fn token_vormerken(&self) -> (u64, bool) {
        let token = self.naechstes_token.fetch_add(1, Ordering::Relaxed);
        let mut ausstehend = self.ausstehend.lock();
        if ausstehend.len() >= self.max_ausstehend {
            return (token, false);
        }
        ausstehend.push_back((token, Instant::now()));
        (token, true)
    }

    /// Wertet ein empfangenes 8-Byte-Datagramm aus
    ///
    /// Gibt die neue Latenz in ms zurueck, falls das Token verfolgt wurde.
    /// Aeltere Tokens gelten als verloren und werden verworfen.
    pub fn antwort_verarbeiten(&self, datagramm: &[u8]) -> Option<u32> {
        let token = keepalive::keepalive_dekodieren(datagramm)?;
        let gesendet = {
            let mut ausstehend = self.ausstehend.lock();
            let veraltet = ausstehend.iter().take_while(|(t, _)| *t < token).count();
            if veraltet > 0 {
                ausstehend.drain(..veraltet);
                tracing::debug!(token, verworfen = veraltet, "Unbeantwortete Keepalives verworfen");
            }
            match ausstehend.front() {
                Some(&(t, gesendet)) if t == token => {
                    ausstehend.pop_front();
                    gesendet
                }
                _ => return None,
            }
        };

        let neu = gesendet.elapsed().as_millis().min(u32::MAX as u128) as u32;
        let alt = self.latenz_ms.swap(neu, Ordering::Relaxed);
        tracing::trace!(token, latenz_ms = neu, "Keepalive-Antwort");
        let _ = self
            .ereignisse
            .send(SessionEreignis::LatenzGeaendert { alt_ms: alt, neu_ms: neu });
        Some(neu)
    }

    /// Letzte gemessene Latenz (0 = keine Messung)
    pub fn latenz_ms(&self) -> u32 {
        self.latenz_ms.load(Ordering::Relaxed)
    }

    pub fn ausstehend(&self) -> usize {
        self.ausstehend.lock().len()
    }

    /// Verwirft alle ausstehenden Tokens
    pub fn zuruecksetzen(&self) {
        self.ausstehend.lock().clear();
        self.latenz_ms.store(0, Ordering::Relaxed);
    }
}

/// Optionaler Abbau inaktiver Empfangs-Pipelines im Keepalive-Takt
pub struct LeerlaufBereinigung {
    pub registry: Arc<PipelineRegistry>,
    pub timeout: Duration,
}

/// Sendet Keepalives bis zum Abbruch
///
/// Sendefehler werden geloggt; der naechste Takt versucht es erneut.
pub async fn keepalive_loop(
    transport: Arc<dyn DatagramTransport>,
    messer: Arc<LatenzMesser>,
    intervall: Duration,
    bereinigung: Option<LeerlaufBereinigung>,
    abbruch: CancellationToken,
) {
    let mut takt = tokio::time::interval(intervall);
    takt.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = takt.tick() => {}
            _ = abbruch.cancelled() => break,
        }

        let (token, verfolgt) = messer.token_vormerken();
        if let Err(e) = transport.senden(&keepalive::keepalive_kodieren(token)).await {
            tracing::warn!(fehler = %e, token, "Keepalive konnte nicht gesendet werden");
        } else if !verfolgt {
            tracing::debug!(token, "Keepalive ohne Messung gesendet, zu viele ausstehend");
        }

        if let Some(b) = &bereinigung {
            b.registry.inaktive_bereinigen(b.timeout);
        }
    }
    tracing::debug!("Keepalive-Loop beendet");
}
