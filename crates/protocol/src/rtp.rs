//! RTP-Header der Voice-Datagramme (UDP)
//!
//! Das Media-Relay erwartet einen festen RTP-Header vor jeder Opus-Nutzlast.
//! Direkte Byte-Serialisierung, kein serde (Hot Path).
//!
//! ## Paketformat (Header = 12 Bytes minimum)
//!
//! ```text
//! Offset  Len  Beschreibung
//! ------  ---  -----------
//!  0       1   0x80 – Version 2, kein Padding, keine Extension, CC = 0
//!  1       1   0xE4 – Marker-Bit gesetzt, Payload-Typ 100
//!  2       2   Sequenznummer (big-endian, wrappt)
//!  4       4   Zeitstempel (big-endian, Samples pro Kanal)
//!  8       4   SSRC – Senderkennung (big-endian)
//! 12     4*CC  Contributing Sources (nur beim Empfang)
//!  ..      4   Extension: Profil (2) + Laenge in 32-Bit-Worten (2), falls X-Bit
//!  ..    4*N   Extension-Daten
//! ```

use std::io;

/// Minimale Header-Groesse in Bytes
pub const RTP_HEADER_GROESSE: usize = 12;

/// Erstes Header-Byte: Version 2, P = 0, X = 0, CC = 0
pub const RTP_VERSION_BYTE: u8 = 0x80;

/// Zweites Header-Byte: Marker gesetzt, Payload-Typ 100
pub const RTP_TYP_BYTE: u8 = 0xE4;

/// Vom Relay fest vereinbarter Payload-Typ fuer Opus
pub const RTP_PAYLOAD_TYP: u8 = 100;

const VERSION_MASKE: u8 = 0b1100_0000;
const EXTENSION_BIT: u8 = 0b0001_0000;
const CSRC_MASKE: u8 = 0b0000_1111;

// ---------------------------------------------------------------------------
// RtpHeader
// ---------------------------------------------------------------------------

/// Die variablen Felder eines RTP-Headers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    /// Sequenznummer (wrappt bei 65536)
    pub sequence: u16,
    /// Zeitstempel in Samples pro Kanal
    pub timestamp: u32,
    /// Senderkennung
    pub ssrc: u32,
}

impl RtpHeader {
    /// Erstellt einen neuen Header
    pub fn new(sequence: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            sequence,
            timestamp,
            ssrc,
        }
    }

    /// Serialisiert den Header in ein 12-Byte-Array
    pub fn encode(&self) -> [u8; RTP_HEADER_GROESSE] {
        let mut buf = [0u8; RTP_HEADER_GROESSE];
        self.schreiben_in(&mut buf);
        buf
    }

    /// Schreibt den Header in die ersten 12 Bytes von `buf`
    ///
    /// # Panics
    /// Wenn `buf` kuerzer als 12 Bytes ist.
    pub fn schreiben_in(&self, buf: &mut [u8]) {
        buf[0] = RTP_VERSION_BYTE;
        buf[1] = RTP_TYP_BYTE;
        buf[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        buf[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
    }

    /// Liest den Header und die Gesamtlaenge des Header-Bereichs
    ///
    /// Die Laenge beruecksichtigt CSRC-Liste und Header-Extension, sodass
    /// `&buf[laenge..]` die Nutzlast ist.
    ///
    /// # Fehler
    /// - `InvalidData` wenn das Paket zu kurz ist oder nicht Version 2 traegt
    pub fn decode(buf: &[u8]) -> io::Result<(Self, usize)> {
        let laenge = header_laenge(buf)?;
        let header = Self {
            sequence: u16::from_be_bytes([buf[2], buf[3]]),
            timestamp: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ssrc: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        };
        Ok((header, laenge))
    }
}

// ---------------------------------------------------------------------------
// Hilfsfunktionen
// ---------------------------------------------------------------------------

/// Prueft die Versionsbits eines Datagramms
pub fn ist_rtp(buf: &[u8]) -> bool {
    buf.len() >= RTP_HEADER_GROESSE && buf[0] & VERSION_MASKE == RTP_VERSION_BYTE
}

/// Liest nur die SSRC (fuer den Demultiplexer)
pub fn ssrc_lesen(buf: &[u8]) -> Option<u32> {
    if !ist_rtp(buf) {
        return None;
    }
    Some(u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]))
}

/// Berechnet die Laenge des Header-Bereichs inklusive CSRC und Extension
///
/// # Fehler
/// - `InvalidData` wenn Header, CSRC-Liste oder Extension abgeschnitten sind
pub fn header_laenge(buf: &[u8]) -> io::Result<usize> {
    if buf.len() < RTP_HEADER_GROESSE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "RTP-Header zu kurz: {} Bytes (erwartet {})",
                buf.len(),
                RTP_HEADER_GROESSE
            ),
        ));
    }
    if buf[0] & VERSION_MASKE != RTP_VERSION_BYTE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Ungueltige RTP-Version: Byte 0 = {:#04x}", buf[0]),
        ));
    }

    let csrc_anzahl = (buf[0] & CSRC_MASKE) as usize;
    let mut laenge = RTP_HEADER_GROESSE + csrc_anzahl * 4;

    if buf[0] & EXTENSION_BIT != 0 {
        // Profil (2 Bytes) + Laenge in 32-Bit-Worten (2 Bytes)
        if buf.len() < laenge + 4 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "RTP-Extension-Kopf abgeschnitten",
            ));
        }
        let worte = u16::from_be_bytes([buf[laenge + 2], buf[laenge + 3]]) as usize;
        laenge += 4 + worte * 4;
    }

    if buf.len() < laenge {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "RTP-Header abgeschnitten: {} Bytes (Header benoetigt {})",
                buf.len(),
                laenge
            ),
        ));
    }
    Ok(laenge)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
