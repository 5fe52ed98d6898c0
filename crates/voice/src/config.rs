//! Voice-Konfiguration
//!
//! Wird von der Anwendung aus TOML geladen oder direkt konstruiert. Alle
//! Felder haben Standardwerte, sodass eine leere Konfiguration lauffaehig ist.

use funkwerk_protocol::codec::{AudioPreset, OpusConfig};
use funkwerk_protocol::signal::CipherModus;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{VoiceError, VoiceResult};

/// Vollstaendige Konfiguration einer Voice-Session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Codec-Einstellungen
    pub audio: AudioEinstellungen,
    /// Pacing der ausgehenden Pipelines
    pub pacing: PacingEinstellungen,
    /// Empfangs-Pipelines
    pub empfang: EmpfangsEinstellungen,
    /// Keepalive und Latenzmessung
    pub keepalive: KeepaliveEinstellungen,
    /// Signaling-Handshake
    pub handshake: HandshakeEinstellungen,
}

/// Codec-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioEinstellungen {
    /// Opus-Preset
    pub preset: AudioPreset,
    /// Ueberschreibt die Bitrate des Presets (kbps)
    pub bitrate_kbps: Option<u16>,
}

impl Default for AudioEinstellungen {
    fn default() -> Self {
        Self {
            // Das Relay erwartet 48 kHz Stereo
            preset: AudioPreset::Musik,
            bitrate_kbps: Some(96),
        }
    }
}

impl AudioEinstellungen {
    /// Loest Preset und Bitrate zu einer vollstaendigen `OpusConfig` auf
    pub fn opus_config(&self) -> OpusConfig {
        let mut config = self.preset.config();
        if let Some(kbps) = self.bitrate_kbps {
            config.bitrate_kbps = kbps;
        }
        config
    }
}

/// Pacing der ausgehenden Pipelines
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingEinstellungen {
    /// Tiefe der Sende-Warteschlange in Millisekunden Audio
    pub puffer_ms: u32,
    /// Stille-Frames bei leerer Warteschlange einfuegen (nicht unterstuetzt)
    pub stille_bei_unterlauf: bool,
    /// Groesse eines Pool-Puffers in Bytes (groesstes Datagramm)
    pub max_paket_bytes: usize,
}

impl Default for PacingEinstellungen {
    fn default() -> Self {
        Self {
            puffer_ms: 200,
            stille_bei_unterlauf: false,
            max_paket_bytes: 1500,
        }
    }
}

/// Empfangs-Pipelines
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmpfangsEinstellungen {
    /// Kapazitaet des Ausgabepuffers pro Sprecher in Frames
    pub puffer_frames: usize,
    /// Pipelines ohne Pakete seit dieser Zeit abbauen (None = nie)
    pub leerlauf_timeout_secs: Option<u64>,
}

impl Default for EmpfangsEinstellungen {
    fn default() -> Self {
        Self {
            // 2 s bei 20-ms-Frames
            puffer_frames: 100,
            leerlauf_timeout_secs: None,
        }
    }
}

impl EmpfangsEinstellungen {
    pub fn leerlauf_timeout(&self) -> Option<Duration> {
        self.leerlauf_timeout_secs.map(Duration::from_secs)
    }
}

/// Keepalive und Latenzmessung
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepaliveEinstellungen {
    /// Sendeintervall in Millisekunden
    pub intervall_ms: u64,
    /// Maximal verfolgte ausstehende Tokens
    pub max_ausstehend: usize,
}

impl Default for KeepaliveEinstellungen {
    fn default() -> Self {
        Self {
            intervall_ms: 5000,
            max_ausstehend: 12,
        }
    }
}

impl KeepaliveEinstellungen {
    pub fn intervall(&self) -> Duration {
        Duration::from_millis(self.intervall_ms)
    }
}

/// Signaling-Handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeEinstellungen {
    /// Zeitlimit pro Handshake-Schritt in Millisekunden
    pub schritt_timeout_ms: u64,
    /// Angebotene Cipher-Modi in Praeferenz-Reihenfolge
    pub cipher_modi: Vec<CipherModus>,
}

impl Default for HandshakeEinstellungen {
    fn default() -> Self {
        Self {
            schritt_timeout_ms: 10_000,
            cipher_modi: vec![CipherModus::ChaCha20Poly1305, CipherModus::Aes256Gcm],
        }
    }
}

impl HandshakeEinstellungen {
    pub fn schritt_timeout(&self) -> Duration {
        Duration::from_millis(self.schritt_timeout_ms)
    }
}

impl VoiceConfig {
    /// Parst eine Konfiguration aus einem TOML-String
    pub fn aus_toml(inhalt: &str) -> VoiceResult<Self> {
        let config: Self = toml::from_str(inhalt)
            .map_err(|e| VoiceError::Konfiguration(format!("TOML ungueltig: {e}")))?;
        config.validieren()?;
        Ok(config)
    }

    /// Laedt die Konfiguration aus einer TOML-Datei
    pub fn laden(pfad: &str) -> VoiceResult<Self> {
        let inhalt = std::fs::read_to_string(pfad).map_err(|e| {
            VoiceError::Konfiguration(format!("Konfigurationsdatei '{pfad}' nicht lesbar: {e}"))
        })?;
        Self::aus_toml(&inhalt)
    }

    /// Prueft Wertebereiche und Abhaengigkeiten zwischen den Sektionen
    pub fn validieren(&self) -> VoiceResult<()> {
        let opus = self.audio.opus_config();
        opus.validieren().map_err(VoiceError::Konfiguration)?;

        let frame_ms = opus.frame_dauer.dauer().as_millis() as u32;
        if self.pacing.puffer_ms < frame_ms.max(1) {
            return Err(VoiceError::Konfiguration(format!(
                "pacing.puffer_ms ({}) kleiner als eine Frame-Dauer ({} ms)",
                self.pacing.puffer_ms, frame_ms
            )));
        }
        if self.pacing.max_paket_bytes < funkwerk_protocol::rtp::RTP_HEADER_GROESSE {
            return Err(VoiceError::Konfiguration(
                "pacing.max_paket_bytes kleiner als ein RTP-Header".into(),
            ));
        }
        if self.empfang.puffer_frames == 0 {
            return Err(VoiceError::Konfiguration(
                "empfang.puffer_frames muss groesser 0 sein".into(),
            ));
        }
        if self.keepalive.intervall_ms == 0 || self.keepalive.max_ausstehend == 0 {
            return Err(VoiceError::Konfiguration(
                "keepalive.intervall_ms und keepalive.max_ausstehend muessen groesser 0 sein"
                    .into(),
            ));
        }
        if self.handshake.schritt_timeout_ms == 0 {
            return Err(VoiceError::Konfiguration(
                "handshake.schritt_timeout_ms muss groesser 0 sein".into(),
            ));
        }
        if self.handshake.cipher_modi.is_empty() {
            return Err(VoiceError::Konfiguration(
                "handshake.cipher_modi darf nicht leer sein".into(),
            ));
        }
        Ok(())
    }
}
