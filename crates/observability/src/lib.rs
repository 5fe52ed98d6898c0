//! # funkwerk-observability
//!
//! Observability fuer Funkwerk-Clients:
//! - Prometheus-kompatible Metriken aus den Session-Snapshots
//! - Structured Logging (Text oder JSON) via tracing-subscriber

pub mod logging;
pub mod metrics;

pub use logging::{logging_initialisieren, LogEinstellungen, LogFormat};
pub use metrics::VoiceMetriken;
