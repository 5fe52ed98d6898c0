//! Signaling-Protokoll
//!
//! Steuerungsnachrichten zwischen Client und Media-Relay. Der Verbindungs-
//! aufbau ist eine feste Folge korrelierter Request/Response-Paare:
//!
//! ```text
//! Capabilities     -> CapabilitiesResponse      (Codec + Cipher aushandeln)
//! Join             -> JoinResponse              (Kanal betreten)
//! CreateTransport  -> CreateTransportResponse   (UDP-Endpunkt + Schluessel)
//! Produce          -> ProduceResponse           (eigene SSRC ankuendigen)
//! ```
//!
//! Danach sendet das Relay unaufgefordert `Speaking`- und `PeerLeft`-
//! Benachrichtigungen (request_id = 0).
//!
//! ## Design
//! - Jede Nachricht traegt eine `request_id: u32` fuer die Zuordnung
//! - JSON-Serialisierung via serde (nicht zeitkritisch)
//! - Tagged Enum fuer typsichere Nachrichtentypen

use funkwerk_core::types::{ChannelId, GuildId, UserId};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// request_id fuer unaufgeforderte Benachrichtigungen
pub const BENACHRICHTIGUNG_ID: u32 = 0;

// ---------------------------------------------------------------------------
// Fehler-Codes
// ---------------------------------------------------------------------------

/// Standardisierte Fehler-Codes fuer Error-Responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InternalError,
    InvalidRequest,
    InvalidToken,
    ChannelNotFound,
    PermissionDenied,
    UnsupportedCodec,
    TransportUnavailable,
}

/// Standardisierte Fehler-Antwort
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Verschluesselungsmodus der Voice-Nutzlast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CipherModus {
    /// Keine Verschluesselung (nur fuer Tests/interne Netzwerke)
    Keiner,
    /// ChaCha20-Poly1305, Nonce = RTP-Header
    #[default]
    ChaCha20Poly1305,
    /// AES-256-GCM, Nonce = RTP-Header
    Aes256Gcm,
}

impl std::fmt::Display for CipherModus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CipherModus::Keiner => write!(f, "none"),
            CipherModus::ChaCha20Poly1305 => write!(f, "chacha20_poly1305"),
            CipherModus::Aes256Gcm => write!(f, "aes256_gcm"),
        }
    }
}

/// Beschreibung eines Codecs, wie ihn das Relay kennt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecBeschreibung {
    /// Codec-Name, z.B. "opus"
    pub name: String,
    /// RTP-Payload-Typ
    pub payload_typ: u8,
    /// Takt des RTP-Zeitstempels in Hz
    pub clock_rate: u32,
    /// Anzahl der Kanaele
    pub channels: u8,
}

impl CodecBeschreibung {
    /// Der vom Relay fest erwartete Opus-Codec
    pub fn opus() -> Self {
        Self {
            name: "opus".into(),
            payload_typ: crate::rtp::RTP_PAYLOAD_TYP,
            clock_rate: 48_000,
            channels: 2,
        }
    }
}

/// Schritt 1: Client nennt seine Faehigkeiten
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitiesRequest {
    pub codecs: Vec<CodecBeschreibung>,
    /// Unterstuetzte Cipher-Modi in Praeferenz-Reihenfolge
    pub cipher_modi: Vec<CipherModus>,
}

/// Antwort: vom Relay gewaehlter Codec und Cipher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitiesResponse {
    pub codec: CodecBeschreibung,
    pub cipher_modus: CipherModus,
}

// ---------------------------------------------------------------------------
// Join
// ---------------------------------------------------------------------------

/// Schritt 2: Voice-Kanal betreten
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    pub user_id: UserId,
    pub session_token: String,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
}

/// Bereits im Kanal sprechender Teilnehmer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeilnehmerInfo {
    pub user_id: UserId,
    /// SSRC, falls der Teilnehmer bereits produziert
    pub ssrc: Option<u32>,
}

/// Antwort auf den Beitritt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinResponse {
    /// Signaling-Sitzungskennung des Relays
    pub sitzung_id: String,
    /// Andere Teilnehmer im Kanal
    pub teilnehmer: Vec<TeilnehmerInfo>,
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Schritt 3: UDP-Transport anfordern
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTransportRequest {
    /// Relay soll RTCP auf demselben Port multiplexen
    pub rtcp_mux: bool,
}

/// Antwort: Remote-Endpunkt und Sitzungsschluessel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTransportResponse {
    pub transport_id: String,
    pub ip: IpAddr,
    pub port: u16,
    /// Sitzungsschluessel (Base64), leer bei `CipherModus::Keiner`
    pub secret_key: String,
}

// ---------------------------------------------------------------------------
// Produce
// ---------------------------------------------------------------------------

/// Schritt 4: eigene Senderkennung ankuendigen
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProduceRequest {
    pub transport_id: String,
    pub ssrc: u32,
    pub payload_typ: u8,
}

/// Bestaetigung des Produce-Schritts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProduceResponse {
    pub producer_id: String,
}

// ---------------------------------------------------------------------------
// Benachrichtigungen
// ---------------------------------------------------------------------------

/// Sprechstatus eines Teilnehmers (Quelle der SSRC-Zuordnung)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakingNotification {
    pub user_id: UserId,
    pub ssrc: u32,
    pub speaking: bool,
}

/// Teilnehmer hat den Kanal verlassen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerLeftNotification {
    pub user_id: UserId,
}

// ---------------------------------------------------------------------------
// Huellen-Typen
// ---------------------------------------------------------------------------

/// Alle moeglichen Signaling-Nutzlasten
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalPayload {
    Capabilities(CapabilitiesRequest),
    CapabilitiesResponse(CapabilitiesResponse),
    Join(JoinRequest),
    JoinResponse(JoinResponse),
    CreateTransport(CreateTransportRequest),
    CreateTransportResponse(CreateTransportResponse),
    Produce(ProduceRequest),
    ProduceResponse(ProduceResponse),
    Speaking(SpeakingNotification),
    PeerLeft(PeerLeftNotification),
    Error(ErrorResponse),
}

/// Art einer Nachricht, ohne Inhalt (fuer die Request/Response-Zuordnung)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NachrichtenArt {
    Capabilities,
    CapabilitiesResponse,
    Join,
    JoinResponse,
    CreateTransport,
    CreateTransportResponse,
    Produce,
    ProduceResponse,
    Speaking,
    PeerLeft,
    Error,
}

impl NachrichtenArt {
    /// Erwartete Antwort-Art auf eine Anfrage
    pub fn erwartete_antwort(&self) -> Option<NachrichtenArt> {
        match self {
            Self::Capabilities => Some(Self::CapabilitiesResponse),
            Self::Join => Some(Self::JoinResponse),
            Self::CreateTransport => Some(Self::CreateTransportResponse),
            Self::Produce => Some(Self::ProduceResponse),
            _ => None,
        }
    }

    /// Ist diese Art eine Antwort auf eine Anfrage?
    pub fn ist_antwort(&self) -> bool {
        matches!(
            self,
            Self::CapabilitiesResponse
                | Self::JoinResponse
                | Self::CreateTransportResponse
                | Self::ProduceResponse
                | Self::Error
        )
    }
}

impl SignalPayload {
    /// Gibt die Art der Nutzlast zurueck
    pub fn art(&self) -> NachrichtenArt {
        match self {
            Self::Capabilities(_) => NachrichtenArt::Capabilities,
            Self::CapabilitiesResponse(_) => NachrichtenArt::CapabilitiesResponse,
            Self::Join(_) => NachrichtenArt::Join,
            Self::JoinResponse(_) => NachrichtenArt::JoinResponse,
            Self::CreateTransport(_) => NachrichtenArt::CreateTransport,
            Self::CreateTransportResponse(_) => NachrichtenArt::CreateTransportResponse,
            Self::Produce(_) => NachrichtenArt::Produce,
            Self::ProduceResponse(_) => NachrichtenArt::ProduceResponse,
            Self::Speaking(_) => NachrichtenArt::Speaking,
            Self::PeerLeft(_) => NachrichtenArt::PeerLeft,
            Self::Error(_) => NachrichtenArt::Error,
        }
    }
}

/// Signaling-Nachricht mit Request-ID und Nutzlast
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalNachricht {
    /// Eindeutige Nachrichten-ID fuer Request/Response-Zuordnung
    pub request_id: u32,
    /// Inhalt der Nachricht
    pub payload: SignalPayload,
}

impl SignalNachricht {
    /// Erstellt eine neue Signaling-Nachricht
    pub fn new(request_id: u32, payload: SignalPayload) -> Self {
        Self {
            request_id,
            payload,
        }
    }

    /// Erstellt eine unaufgeforderte Benachrichtigung
    pub fn benachrichtigung(payload: SignalPayload) -> Self {
        Self::new(BENACHRICHTIGUNG_ID, payload)
    }

    /// Erstellt eine Fehler-Antwort
    pub fn error(request_id: u32, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(
            request_id,
            SignalPayload::Error(ErrorResponse {
                code,
                message: message.into(),
            }),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
