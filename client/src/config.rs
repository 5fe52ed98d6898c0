//! Client-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! Standardwerte, sodass der Client ohne Konfigurationsdatei startet.

use funkwerk_voice::VoiceConfig;
use serde::{Deserialize, Serialize};

/// Vollstaendige Client-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Relay-Endpunkt und Anmeldedaten
    pub verbindung: VerbindungsEinstellungen,
    /// Voice-Pipeline (Audio, Pacing, Empfang, Keepalive, Handshake)
    pub voice: VoiceConfig,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Testton und Metrik-Ausgabe
    pub demo: DemoEinstellungen,
}

/// Relay-Endpunkt und Ziel-Kanal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerbindungsEinstellungen {
    /// Signaling-Endpunkt (host:port)
    pub endpunkt: String,
    pub user_id: u64,
    pub session_token: String,
    pub guild_id: u64,
    pub channel_id: u64,
}

impl Default for VerbindungsEinstellungen {
    fn default() -> Self {
        Self {
            endpunkt: "127.0.0.1:9987".into(),
            user_id: 1,
            session_token: String::new(),
            guild_id: 1,
            channel_id: 1,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Testton fuer die Demo
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoEinstellungen {
    pub ton_hz: f32,
    /// Gesamtdauer des Testtons
    pub dauer_ms: u32,
    /// 0.0 bis 1.0
    pub amplitude: f32,
    /// Abstand der Metrik-Aktualisierung
    pub metrik_intervall_ms: u64,
}

impl Default for DemoEinstellungen {
    fn default() -> Self {
        Self {
            ton_hz: 440.0,
            dauer_ms: 5000,
            amplitude: 0.3,
            metrik_intervall_ms: 1000,
        }
    }
}

impl ClientConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        let config = match std::fs::read_to_string(pfad) {
            Ok(inhalt) => Self::aus_toml(&inhalt)
                .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Self::default()
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
                ))
            }
        };
        Ok(config)
    }

    /// Parst und validiert eine Konfiguration
    pub fn aus_toml(inhalt: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(inhalt)?;
        config.validieren()?;
        Ok(config)
    }

    pub fn validieren(&self) -> anyhow::Result<()> {
        self.voice.validieren()?;
        if self.verbindung.endpunkt.is_empty() {
            anyhow::bail!("verbindung.endpunkt darf nicht leer sein");
        }
        if !(0.0..=1.0).contains(&self.demo.amplitude) {
            anyhow::bail!("demo.amplitude muss zwischen 0.0 und 1.0 liegen");
        }
        if self.demo.metrik_intervall_ms == 0 {
            anyhow::bail!("demo.metrik_intervall_ms muss groesser 0 sein");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_config_ist_valide() {
        let cfg = ClientConfig::default();
        cfg.validieren().unwrap();
        assert_eq!(cfg.verbindung.endpunkt, "127.0.0.1:9987");
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.demo.dauer_ms, 5000);
    }

    #[test]
    fn config_aus_toml_string() {
        let toml = r#"
            [verbindung]
            endpunkt = "relay.example:4000"
            user_id = 42

            [voice.pacing]
            puffer_ms = 1000

            [demo]
            ton_hz = 880.0
        "#;
        let cfg = ClientConfig::aus_toml(toml).unwrap();
        assert_eq!(cfg.verbindung.endpunkt, "relay.example:4000");
        assert_eq!(cfg.verbindung.user_id, 42);
        assert_eq!(cfg.voice.pacing.puffer_ms, 1000);
        assert_eq!(cfg.demo.ton_hz, 880.0);
        // Nicht angegebene Felder behalten Standardwerte
        assert_eq!(cfg.verbindung.guild_id, 1);
        assert_eq!(cfg.demo.dauer_ms, 5000);
    }

    #[test]
    fn ungueltige_werte_abgelehnt() {
        assert!(ClientConfig::aus_toml("[demo]\namplitude = 2.0").is_err());
        assert!(ClientConfig::aus_toml("[voice.empfang]\npuffer_frames = 0").is_err());
        assert!(ClientConfig::aus_toml("[verbindung]\nendpunkt = \"\"").is_err());
    }

    #[test]
    fn fehlende_datei_ergibt_standard() {
        let cfg = ClientConfig::laden("/nicht/vorhanden/funkwerk.toml").unwrap();
        assert_eq!(cfg.demo.ton_hz, 440.0);
    }
}
