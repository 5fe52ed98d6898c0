//! Structured Logging Setup via tracing-subscriber
//!
//! Konfigurierbar per Umgebungsvariable:
//! - `FW_LOG_LEVEL`: Filter (trace/debug/info/warn/error oder EnvFilter-Direktiven)
//! - `FW_LOG_FORMAT`: Format (text/json)
//!
//! Umgebungsvariablen haben Vorrang vor den Werten aus der Konfiguration.

use std::str::FromStr;
use tracing_subscriber::{fmt, EnvFilter};

pub const ENV_LEVEL: &str = "FW_LOG_LEVEL";
pub const ENV_FORMAT: &str = "FW_LOG_FORMAT";

/// Ausgabeformat der Logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            andere => Err(format!("unbekanntes Log-Format '{andere}' (text/json)")),
        }
    }
}

/// Aufgeloeste Logging-Einstellungen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEinstellungen {
    pub filter: String,
    pub format: LogFormat,
}

impl LogEinstellungen {
    /// Konfigurationswerte, ueberschrieben durch `FW_LOG_LEVEL` / `FW_LOG_FORMAT`
    pub fn aufloesen(level: &str, format: &str) -> Self {
        Self::aus_quellen(
            std::env::var(ENV_LEVEL).ok(),
            std::env::var(ENV_FORMAT).ok(),
            level,
            format,
        )
    }

    fn aus_quellen(
        env_level: Option<String>,
        env_format: Option<String>,
        level: &str,
        format: &str,
    ) -> Self {
        let filter = env_level
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| level.to_string());
        let format = env_format
            .as_deref()
            .unwrap_or(format)
            .parse()
            .unwrap_or_default();
        Self { filter, format }
    }
}

/// Initialisiert das Logging-System.
///
/// Ungueltige Filter fallen auf `info` zurueck. Darf nur einmal pro
/// Prozess aufgerufen werden.
pub fn logging_initialisieren(level: &str, format: &str) {
    let einstellungen = LogEinstellungen::aufloesen(level, format);
    let filter = EnvFilter::try_new(&einstellungen.filter).unwrap_or_else(|_| EnvFilter::new("info"));

    match einstellungen.format {
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .with_current_span(true)
                .init();
        }
        LogFormat::Text => {
            fmt().with_env_filter(filter).with_target(true).init();
        }
    }
}

/// Validiert ob ein Log-Level-String gueltig ist.
pub fn log_level_gueltig(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_werte() {
        assert!(log_level_gueltig("trace"));
        assert!(log_level_gueltig("warn"));
        assert!(!log_level_gueltig("verbose"));
        assert!(!log_level_gueltig("INFO")); // Gross-/Kleinschreibung
        assert!(!log_level_gueltig(""));
    }

    #[test]
    fn log_format_parsen() {
        assert_eq!("text".parse::<LogFormat>(), Ok(LogFormat::Text));
        assert_eq!("json".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert!("JSON".parse::<LogFormat>().is_err());
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn konfiguration_ohne_umgebung() {
        let e = LogEinstellungen::aus_quellen(None, None, "debug", "json");
        assert_eq!(e.filter, "debug");
        assert_eq!(e.format, LogFormat::Json);
    }

    #[test]
    fn umgebung_hat_vorrang() {
        let e = LogEinstellungen::aus_quellen(
            Some("funkwerk_voice=trace".into()),
            Some("text".into()),
            "info",
            "json",
        );
        assert_eq!(e.filter, "funkwerk_voice=trace");
        assert_eq!(e.format, LogFormat::Text);
    }

    #[test]
    fn leere_umgebung_und_unbekanntes_format() {
        let e = LogEinstellungen::aus_quellen(Some("  ".into()), None, "warn", "xml");
        assert_eq!(e.filter, "warn");
        assert_eq!(e.format, LogFormat::Text);
    }
}
