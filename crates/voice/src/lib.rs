//! funkwerk-voice – Echtzeit-Voice-Transport
//!
//! Baut eine Media-Session zum Voice-Relay auf, transportiert komprimierte
//! Sprache und setzt empfangenes Audio pro Sprecher wieder zusammen.
//!
//! ## Module
//! - [`stage`] – Stufen-Vertrag (Header, dann genau ein Payload)
//! - [`codec`] – Kodier- und Dekodier-Stufe
//! - [`framing`] – RTP-Header schreiben und lesen
//! - [`cipher`] – Verschluesselung der Nutzlast (AEAD, Nonce aus dem RTP-Header)
//! - [`pacing`] – Sendetakt mit Vorladen und Puffer-Pool
//! - [`eingang`] – begrenzter Empfangspuffer pro Sprecher
//! - [`registry`] – SSRC-Zuordnung und Empfangs-Pipelines
//! - [`demux`] – Verteilung empfangener Datagramme
//! - [`latenz`] – Keepalive und Latenzmessung
//! - [`signaling`] – Request/Response-Korrelation zum Relay
//! - [`transport`] – Datagramm-Transport (UDP)
//! - [`pipeline`] – Pipeline-Fabrik
//! - [`session`] – Verbindungsaufbau und Lebenszyklus
//! - [`telemetry`] – Zaehler und Snapshots
//!
//! ## Datenfluss
//! ```text
//! Senden:    PCM -> Opus -> RTP -> Cipher -> Pacing -> UDP
//! Empfangen: UDP -> Demux (SSRC) -> Cipher -> RTP -> Opus -> Puffer pro Sprecher
//! ```

pub mod cipher;
pub mod codec;
pub mod config;
pub mod demux;
pub mod eingang;
pub mod error;
pub mod framing;
pub mod latenz;
pub mod pacing;
pub mod pipeline;
pub mod registry;
pub mod session;
pub mod signaling;
pub mod stage;
pub mod telemetry;
pub mod transport;

pub use config::VoiceConfig;
pub use eingang::{AudioFrame, EingangsStream};
pub use error::{VoiceError, VoiceResult};
pub use pipeline::{AusgangsPipeline, CodecFabrik, PipelineArt, PipelineOptionen};
pub use session::{SessionZiel, VerbindungsZustand, VoiceSession};
pub use stage::{FrameHeader, FramedStage};
pub use telemetry::SessionStatistik;
