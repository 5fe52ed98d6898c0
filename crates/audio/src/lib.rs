//! funkwerk-audio – Codec-Schicht der Voice-Pipelines
//!
//! - [`codec`] – `FrameEncoder`/`FrameDecoder` und die Opus-Implementierung
//! - [`pcm`] – Umwandlung zwischen i16-Samples und Little-Endian-Bytes

pub mod codec;
pub mod error;
pub mod pcm;

pub use codec::{FrameDecoder, FrameEncoder, OpusDecoder, OpusEncoder};
pub use error::{AudioError, AudioResult};
