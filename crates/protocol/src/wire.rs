//! Wire-Format des Signaling-Kanals (TCP)
//!
//! Frame-basiertes Protokoll: Length(u32 big-endian) + JSON-kodierte
//! [`SignalNachricht`].
//!
//! ```text
//! +--------+--------+--------+--------+----...----+
//! | Laenge (u32 BE) | 4 Bytes        | Payload    |
//! +--------+--------+--------+--------+----...----+
//! ```
//!
//! Die Laenge zaehlt nur die Payload-Bytes. Signaling-Nachrichten sind klein,
//! das Standard-Limit liegt daher bei 64 KB.

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::signal::SignalNachricht;

/// Standard-maximale Frame-Groesse (64 KB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Groesse des Laengen-Felds in Bytes
pub const LENGTH_FIELD_SIZE: usize = 4;

/// tokio-util Codec fuer den Signaling-Kanal
///
/// ```rust,no_run
/// use tokio_util::codec::Framed;
/// use funkwerk_protocol::wire::FrameCodec;
///
/// // let stream = TcpStream::connect(...).await?;
/// // let framed = Framed::new(stream, FrameCodec::new());
/// ```
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Codec mit eigener maximaler Frame-Groesse
    pub fn with_max_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn zu_gross(&self, laenge: usize) -> io::Error {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "Signal-Frame zu gross: {} Bytes (Maximum: {} Bytes)",
                laenge, self.max_frame_size
            ),
        )
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = SignalNachricht;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_FIELD_SIZE {
            return Ok(None);
        }

        // Laenge lesen ohne den Buffer zu veraendern
        let laenge = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if laenge > self.max_frame_size {
            return Err(self.zu_gross(laenge));
        }

        let gesamt = LENGTH_FIELD_SIZE + laenge;
        if src.len() < gesamt {
            src.reserve(gesamt - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_FIELD_SIZE);
        let payload = src.split_to(laenge);

        let nachricht = serde_json::from_slice(&payload).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Signal-Nachricht nicht lesbar: {}", e),
            )
        })?;
        Ok(Some(nachricht))
    }
}

impl Encoder<SignalNachricht> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: SignalNachricht, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_vec(&item).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Signal-Nachricht nicht serialisierbar: {}", e),
            )
        })?;

        if json.len() > self.max_frame_size {
            return Err(self.zu_gross(json.len()));
        }

        dst.reserve(LENGTH_FIELD_SIZE + json.len());
        dst.put_u32(json.len() as u32);
        dst.put_slice(&json);
        Ok(())
    }
}
