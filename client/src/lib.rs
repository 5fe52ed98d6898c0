//! funkwerk-client – Demo-Client
//!
//! Verbindet sich mit einem Voice-Relay, sendet einen Testton ueber eine
//! gepufferte Opus-Pipeline, protokolliert empfangene Sprecher und gibt am
//! Ende die Metriken im Prometheus-Format aus.

pub mod config;

use anyhow::{Context, Result};
use config::ClientConfig;
use funkwerk_audio::pcm;
use funkwerk_core::event::SessionEreignis;
use funkwerk_core::types::{ChannelId, GuildId, UserId};
use funkwerk_observability::VoiceMetriken;
use funkwerk_voice::{AusgangsPipeline, PipelineArt, SessionZiel, VoiceSession};
use std::time::Duration;
use tokio::sync::broadcast;

/// Laenge eines Schreibblocks des Testtons
const BLOCK_MS: u32 = 100;

/// Haelt den Client-Zustand zusammen
pub struct Client {
    pub config: ClientConfig,
}

impl Client {
    pub fn neu(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Verbindet, sendet den Testton und trennt wieder
    ///
    /// Ctrl-C bricht das Senden ab; die Session wird trotzdem sauber getrennt.
    pub async fn ausfuehren(self) -> Result<()> {
        let v = &self.config.verbindung;
        let session = VoiceSession::new(
            self.config.voice.clone(),
            SessionZiel {
                guild_id: GuildId(v.guild_id),
                channel_id: ChannelId(v.channel_id),
            },
        );
        let ereignis_log = tokio::spawn(ereignisse_protokollieren(session.ereignisse_abonnieren()));

        session
            .starten(&v.endpunkt, UserId(v.user_id), &v.session_token)
            .await
            .with_context(|| format!("Verbindung zu {} fehlgeschlagen", v.endpunkt))?;

        let metriken = VoiceMetriken::neu()?;
        let ergebnis = self.ton_senden(&session, &metriken).await;

        for stream in session.eingehende_pipelines() {
            tracing::info!(
                user_id = %stream.user_id(),
                frames = stream.laenge(),
                "Empfangene Frames im Puffer"
            );
        }
        metriken.session_aktualisieren(&session.statistik());
        tracing::info!(statistik = %session.statistik().zusammenfassung(), "Session-Statistik");

        session.stoppen().await?;
        ereignis_log.abort();
        ergebnis?;

        print!("{}", metriken.exportieren()?);
        Ok(())
    }

    async fn ton_senden(&self, session: &VoiceSession, metriken: &VoiceMetriken) -> Result<()> {
        let demo = &self.config.demo;
        let opus = self.config.voice.audio.opus_config();
        let kanaele = opus.channels as usize;
        let ton = pcm::sinus_ton(
            demo.ton_hz,
            opus.sample_rate as u32,
            kanaele,
            demo.dauer_ms,
            demo.amplitude,
        );
        let block_bytes = (opus.sample_rate as usize * BLOCK_MS as usize / 1000)
            * kanaele
            * pcm::BYTES_PRO_WERT;

        let mut pipeline = session
            .ausgehende_pipeline_erstellen(PipelineArt::CodecGepuffert, &session.standard_optionen())
            .await?;
        tracing::info!(
            ton_hz = demo.ton_hz,
            dauer_ms = demo.dauer_ms,
            bytes = ton.len(),
            "Testton wird gesendet"
        );

        let mut takt = tokio::time::interval(Duration::from_millis(demo.metrik_intervall_ms));
        let ergebnis = {
            let senden = ton_schreiben(&mut pipeline, &ton, block_bytes);
            tokio::pin!(senden);
            loop {
                tokio::select! {
                    ergebnis = &mut senden => break ergebnis,
                    _ = takt.tick() => {
                        metriken.session_aktualisieren(&session.statistik());
                    }
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("Abbruch angefordert, Testton wird verworfen");
                        break Ok(());
                    }
                }
            }
        };
        pacing_melden(&mut pipeline, metriken);
        ergebnis
    }
}

async fn ton_schreiben(pipeline: &mut AusgangsPipeline, ton: &[u8], block_bytes: usize) -> Result<()> {
    for block in ton.chunks(block_bytes.max(1)) {
        pipeline.schreiben(block).await?;
    }
    pipeline.flush().await?;
    Ok(())
}

fn pacing_melden(pipeline: &mut AusgangsPipeline, metriken: &VoiceMetriken) {
    pipeline.clear();
    if let Some(s) = pipeline.statistik() {
        metriken.pacing_aktualisieren(&s);
        tracing::info!(
            gesendet = s.gesendet,
            unterlaeufe = s.unterlaeufe,
            verworfen = s.verworfen,
            "Pacing-Statistik"
        );
    }
}

async fn ereignisse_protokollieren(mut rx: broadcast::Receiver<SessionEreignis>) {
    loop {
        match rx.recv().await {
            Ok(SessionEreignis::LatenzGeaendert { neu_ms, .. }) => {
                tracing::debug!(latenz_ms = neu_ms, "Latenz");
            }
            Ok(ereignis) => tracing::info!(ereignis = ?ereignis, "Session-Ereignis"),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(verpasst = n, "Ereignisse verpasst");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
