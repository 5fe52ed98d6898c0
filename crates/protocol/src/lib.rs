//! funkwerk-protocol – Wire-Formate
//!
//! Dieses Crate definiert alle Formate, die zwischen Client und Media-Relay
//! ausgetauscht werden:
//! - [`rtp`] – bit-exakter RTP-Header der Voice-Datagramme
//! - [`keepalive`] – 8-Byte-Keepalive-Token fuer die Latenzmessung
//! - [`signal`] – Request/Response-Nachrichten des Signaling-Kanals
//! - [`wire`] – Laengen-praefixiertes Framing fuer Signaling ueber TCP
//! - [`codec`] – Opus-Konfiguration und Presets

pub mod codec;
pub mod keepalive;
pub mod rtp;
pub mod signal;
pub mod wire;

pub use rtp::RtpHeader;
pub use signal::{NachrichtenArt, SignalNachricht, SignalPayload};
