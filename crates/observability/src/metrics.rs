//! Prometheus-kompatible Metriken einer Voice-Session
//!
//! Die Voice-Pipelines zaehlen in eigenen Atomics; diese Registry wird aus
//! deren Snapshots fortgeschrieben. Zaehler erhalten nur die Differenz zum
//! letzten Snapshot, damit sie monoton bleiben.
//!
//! Registrierte Metriken:
//! - `funkwerk_voice_empfang_total{ereignis}` – Counter: Empfangspfad
//! - `funkwerk_voice_pipelines` – Gauge: Lebende Empfangs-Pipelines
//! - `funkwerk_voice_sender_eintraege` – Gauge: SSRC-Zuordnungen
//! - `funkwerk_voice_rtt_seconds` – Histogram: Keepalive-Latenz
//! - `funkwerk_voice_gesendet_total` – Counter: Gesendete Frames
//! - `funkwerk_voice_unterlaeufe_total` – Counter: Sendetakte ohne Frame
//! - `funkwerk_voice_verworfen_total` – Counter: Verworfene ausgehende Frames
//! - `funkwerk_voice_pacing_wartend` – Gauge: Wartende ausgehende Frames

use anyhow::Result;
use funkwerk_voice::telemetry::{EmpfangsStatistik, PacingStatistik, SessionStatistik};
use parking_lot::Mutex;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

#[derive(Default)]
struct LetzterStand {
    empfang: EmpfangsStatistik,
    pacing: PacingStatistik,
    latenz_ms: u32,
}

/// Alle Voice-Metriken eines Clients
#[derive(Clone)]
pub struct VoiceMetriken {
    pub registry: Arc<Registry>,

    // Empfang
    pub empfang_total: IntCounterVec,
    pub pipelines: IntGauge,
    pub sender_eintraege: IntGauge,
    pub rtt_seconds: Histogram,

    // Senden
    pub gesendet_total: IntCounter,
    pub unterlaeufe_total: IntCounter,
    pub verworfen_total: IntCounter,
    pub pacing_wartend: IntGauge,

    letzter: Arc<Mutex<LetzterStand>>,
}

impl VoiceMetriken {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        // --- Empfang ---
        let empfang_total = IntCounterVec::new(
            Opts::new(
                "funkwerk_voice_empfang_total",
                "Ereignisse des Empfangspfads",
            ),
            &["ereignis"],
        )?;
        registry.register(Box::new(empfang_total.clone()))?;

        let pipelines = IntGauge::with_opts(Opts::new(
            "funkwerk_voice_pipelines",
            "Anzahl lebender Empfangs-Pipelines",
        ))?;
        registry.register(Box::new(pipelines.clone()))?;

        let sender_eintraege = IntGauge::with_opts(Opts::new(
            "funkwerk_voice_sender_eintraege",
            "Eintraege der SSRC-Zuordnung",
        ))?;
        registry.register(Box::new(sender_eintraege.clone()))?;

        let rtt_seconds = Histogram::with_opts(
            HistogramOpts::new("funkwerk_voice_rtt_seconds", "Keepalive-Latenz in Sekunden")
                .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
        )?;
        registry.register(Box::new(rtt_seconds.clone()))?;

        // --- Senden ---
        let gesendet_total = IntCounter::with_opts(Opts::new(
            "funkwerk_voice_gesendet_total",
            "Im Takt gesendete Frames",
        ))?;
        registry.register(Box::new(gesendet_total.clone()))?;

        let unterlaeufe_total = IntCounter::with_opts(Opts::new(
            "funkwerk_voice_unterlaeufe_total",
            "Sendetakte ohne wartenden Frame",
        ))?;
        registry.register(Box::new(unterlaeufe_total.clone()))?;

        let verworfen_total = IntCounter::with_opts(Opts::new(
            "funkwerk_voice_verworfen_total",
            "Verworfene ausgehende Frames",
        ))?;
        registry.register(Box::new(verworfen_total.clone()))?;

        let pacing_wartend = IntGauge::with_opts(Opts::new(
            "funkwerk_voice_pacing_wartend",
            "Wartende Frames in der Pacing-Warteschlange",
        ))?;
        registry.register(Box::new(pacing_wartend.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            empfang_total,
            pipelines,
            sender_eintraege,
            rtt_seconds,
            gesendet_total,
            unterlaeufe_total,
            verworfen_total,
            pacing_wartend,
            letzter: Arc::new(Mutex::new(LetzterStand::default())),
        })
    }

    /// Schreibt die Metriken aus einem Session-Snapshot fort
    pub fn session_aktualisieren(&self, s: &SessionStatistik) {
        let mut letzter = self.letzter.lock();
        let alt = letzter.empfang;
        let neu = s.empfang;

        for (ereignis, alt, neu) in [
            ("datagramm", alt.datagramme, neu.datagramme),
            ("keepalive", alt.keepalive_antworten, neu.keepalive_antworten),
            ("unbekannter_sender", alt.unbekannter_sender, neu.unbekannter_sender),
            ("fehlerhaft", alt.fehlerhaft, neu.fehlerhaft),
            (
                "entschluesselung_fehlgeschlagen",
                alt.entschluesselung_fehlgeschlagen,
                neu.entschluesselung_fehlgeschlagen,
            ),
            (
                "dekodierung_fehlgeschlagen",
                alt.dekodierung_fehlgeschlagen,
                neu.dekodierung_fehlgeschlagen,
            ),
            ("zugestellt", alt.zugestellt, neu.zugestellt),
            ("puffer_ueberlauf", alt.puffer_ueberlauf, neu.puffer_ueberlauf),
        ] {
            self.empfang_total
                .with_label_values(&[ereignis])
                .inc_by(neu.saturating_sub(alt));
        }
        letzter.empfang = neu;

        self.pipelines.set(s.pipelines as i64);
        self.sender_eintraege.set(s.sender_eintraege as i64);

        // Nur neue Messungen beobachten
        if s.latenz_ms != 0 && s.latenz_ms != letzter.latenz_ms {
            self.rtt_seconds.observe(f64::from(s.latenz_ms) / 1000.0);
        }
        letzter.latenz_ms = s.latenz_ms;
    }

    /// Schreibt die Metriken aus dem Snapshot einer ausgehenden Pipeline fort
    pub fn pacing_aktualisieren(&self, p: &PacingStatistik) {
        let mut letzter = self.letzter.lock();
        let alt = letzter.pacing;
        self.gesendet_total.inc_by(p.gesendet.saturating_sub(alt.gesendet));
        self.unterlaeufe_total
            .inc_by(p.unterlaeufe.saturating_sub(alt.unterlaeufe));
        self.verworfen_total.inc_by(p.verworfen.saturating_sub(alt.verworfen));
        self.pacing_wartend.set(p.wartend as i64);
        letzter.pacing = *p;
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
