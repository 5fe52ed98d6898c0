//! Funkwerk Demo-Client – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und startet den Client.

use anyhow::Result;
use funkwerk_client::{config::ClientConfig, Client};
use funkwerk_observability::logging_initialisieren;

#[tokio::main]
async fn main() -> Result<()> {
    // Konfigurationsdatei-Pfad aus Umgebungsvariable oder Standard
    let config_pfad = std::env::var("FUNKWERK_CONFIG").unwrap_or_else(|_| "funkwerk.toml".into());

    let config = ClientConfig::laden(&config_pfad)?;
    logging_initialisieren(&config.logging.level, &config.logging.format);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        endpunkt = %config.verbindung.endpunkt,
        "Funkwerk-Client wird initialisiert"
    );

    Client::neu(config).ausfuehren().await
}
