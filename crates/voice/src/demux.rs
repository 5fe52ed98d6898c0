//! Demultiplexer des Empfangspfads
//!
//! Verteilt jedes empfangene Datagramm:
//! - genau 8 Bytes: Keepalive-Antwort an den [`LatenzMesser`]
//! - sonst SSRC lesen, ueber die [`SenderMap`] zum Benutzer aufloesen und in
//!   dessen Empfangs-Pipeline reichen (bei Bedarf angelegt)
//!
//! Unbekannte Sender und kaputte Pakete werden gezaehlt und verworfen; der
//! Demultiplexer gibt nie einen Fehler zurueck.

use funkwerk_protocol::keepalive;
use funkwerk_protocol::rtp;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::latenz::LatenzMesser;
use crate::pipeline::PipelineFabrik;
use crate::registry::{PipelineRegistry, SenderMap};
use crate::telemetry::EmpfangsZaehler;
use crate::transport::{DatagramTransport, UDP_BUFFER_SIZE};

pub struct Demultiplexer {
    sender: Arc<SenderMap>,
    registry: Arc<PipelineRegistry>,
    latenz: Arc<LatenzMesser>,
    fabrik: Arc<PipelineFabrik>,
    zaehler: Arc<EmpfangsZaehler>,
}

impl Demultiplexer {
    pub fn new(
        sender: Arc<SenderMap>,
        registry: Arc<PipelineRegistry>,
        latenz: Arc<LatenzMesser>,
        fabrik: Arc<PipelineFabrik>,
        zaehler: Arc<EmpfangsZaehler>,
    ) -> Self {
        Self {
            sender,
            registry,
            latenz,
            fabrik,
            zaehler,
        }
    }

    /// Verarbeitet ein Datagramm vom Transport
    pub async fn datagramm_verarbeiten(&self, datagramm: &[u8]) {
        EmpfangsZaehler::erhoehen(&self.zaehler.datagramme);

        if keepalive::ist_keepalive(datagramm) {
            EmpfangsZaehler::erhoehen(&self.zaehler.keepalive_antworten);
            self.latenz.antwort_verarbeiten(datagramm);
            return;
        }

        let Some(ssrc) = rtp::ssrc_lesen(datagramm) else {
            EmpfangsZaehler::erhoehen(&self.zaehler.fehlerhaft);
            tracing::debug!(bytes = datagramm.len(), "Kein RTP-Datagramm, verworfen");
            return;
        };

        let Some(user_id) = self.sender.aufloesen(ssrc) else {
            EmpfangsZaehler::erhoehen(&self.zaehler.unbekannter_sender);
            tracing::debug!(ssrc, "Unbekannter Sender, Paket verworfen");
            return;
        };

        let paar = match self
            .registry
            .holen_oder_anlegen(user_id, |uid| self.fabrik.eingang_bauen(uid))
        {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(fehler = %e, user_id = %user_id, "Empfangs-Pipeline nicht erstellbar");
                return;
            }
        };

        if let Err(e) = paar.datagramm_verarbeiten(datagramm).await {
            if e.ist_fatal_fuer_pipeline() {
                tracing::warn!(
                    fehler = %e,
                    user_id = %user_id,
                    "Empfangs-Pipeline unbrauchbar, wird abgebaut"
                );
                self.registry.entfernen(user_id);
            } else {
                tracing::debug!(fehler = %e, user_id = %user_id, ssrc, "Paket verworfen");
            }
        }
    }
}

/// Empfaengt Datagramme bis zum Abbruch und reicht sie an den Demultiplexer
pub async fn empfangs_loop(
    transport: Arc<dyn DatagramTransport>,
    demux: Demultiplexer,
    abbruch: CancellationToken,
) {
    // Wiederverwendeter Empfangspuffer, keine Allokation pro Paket
    let mut buf = [0u8; UDP_BUFFER_SIZE];
    tracing::debug!("Empfangs-Loop gestartet");

    loop {
        tokio::select! {
            ergebnis = transport.empfangen(&mut buf) => {
                match ergebnis {
                    Ok(n) => demux.datagramm_verarbeiten(&buf[..n]).await,
                    Err(e) => {
                        tracing::warn!(fehler = %e, "Empfangsfehler");
                        // Kein Busy-Loop bei dauerhaftem Fehler
                        tokio::time::sleep(Duration::from_millis(1)).await;
                    }
                }
            }
            _ = abbruch.cancelled() => break,
        }
    }
    tracing::debug!("Empfangs-Loop beendet");
}
