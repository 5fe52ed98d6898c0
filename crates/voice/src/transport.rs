//! Datagramm-Transport
//!
//! Die Session sieht den Transport nur ueber [`DatagramTransport`]: Bytes
//! senden, Bytes empfangen. Binden und Aufloesen des Sockets uebernimmt ein
//! [`TransportVerbinder`], sobald der Handshake den Remote-Endpunkt kennt.
//!
//! `UdpTransport` ist die Standard-Implementierung ueber einen verbundenen
//! tokio-`UdpSocket`. `TransportSenke` ist die letzte Stufe jeder
//! ausgehenden Pipeline.

use async_trait::async_trait;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;

use crate::error::VoiceResult;
use crate::stage::{FrameHeader, FramedStage, HeaderWaechter};

/// Maximale Datagrammgroesse fuer den Empfang
pub const UDP_BUFFER_SIZE: usize = 1500;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Unzuverlaessiger Datagramm-Kanal zum Media-Relay
#[async_trait]
pub trait DatagramTransport: Send + Sync {
    /// Sendet ein Datagramm
    async fn senden(&self, daten: &[u8]) -> io::Result<usize>;

    /// Wartet auf das naechste Datagramm
    async fn empfangen(&self, puffer: &mut [u8]) -> io::Result<usize>;
}

/// Baut den Transport zu einem Remote-Endpunkt auf
#[async_trait]
pub trait TransportVerbinder: Send + Sync {
    async fn verbinden(&self, ziel: SocketAddr) -> io::Result<Arc<dyn DatagramTransport>>;
}

// ---------------------------------------------------------------------------
// UDP
// ---------------------------------------------------------------------------

/// Verbundener UDP-Socket
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Bindet lokal und verbindet den Socket mit `ziel`
    pub async fn verbinden(lokal: SocketAddr, ziel: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(lokal).await?;
        socket.connect(ziel).await?;
        tracing::info!(
            lokal = %socket.local_addr()?,
            ziel = %ziel,
            "UDP-Transport verbunden"
        );
        Ok(Self { socket })
    }

    pub fn lokale_adresse(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[async_trait]
impl DatagramTransport for UdpTransport {
    async fn senden(&self, daten: &[u8]) -> io::Result<usize> {
        self.socket.send(daten).await
    }

    async fn empfangen(&self, puffer: &mut [u8]) -> io::Result<usize> {
        self.socket.recv(puffer).await
    }
}

/// Verbinder fuer `UdpTransport`
#[derive(Debug, Clone, Default)]
pub struct UdpVerbinder {
    /// Lokale Bind-Adresse (None = beliebiger Port passend zur Zieladresse)
    pub bind_adresse: Option<SocketAddr>,
}

impl UdpVerbinder {
    pub fn new(bind_adresse: Option<SocketAddr>) -> Self {
        Self { bind_adresse }
    }

    fn lokal_fuer(&self, ziel: &SocketAddr) -> SocketAddr {
        self.bind_adresse.unwrap_or_else(|| {
            let ip = match ziel.ip() {
                IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            };
            SocketAddr::new(ip, 0)
        })
    }
}

#[async_trait]
impl TransportVerbinder for UdpVerbinder {
    async fn verbinden(&self, ziel: SocketAddr) -> io::Result<Arc<dyn DatagramTransport>> {
        let transport = UdpTransport::verbinden(self.lokal_fuer(&ziel), ziel).await?;
        Ok(Arc::new(transport))
    }
}

// ---------------------------------------------------------------------------
// TransportSenke
// ---------------------------------------------------------------------------

/// Letzte Stufe einer ausgehenden Pipeline
///
/// Sendefehler werden geloggt und betreffen nur das einzelne Datagramm.
pub struct TransportSenke {
    waechter: HeaderWaechter,
    transport: Arc<dyn DatagramTransport>,
}

impl TransportSenke {
    pub fn new(transport: Arc<dyn DatagramTransport>) -> Self {
        Self {
            waechter: HeaderWaechter::new(),
            transport,
        }
    }
}

#[async_trait]
impl FramedStage for TransportSenke {
    fn waechter(&mut self) -> &mut HeaderWaechter {
        &mut self.waechter
    }

    async fn frame_verarbeiten(&mut self, kopf: FrameHeader, nutzdaten: &[u8]) -> VoiceResult<()> {
        match self.transport.senden(nutzdaten).await {
            Ok(bytes) => {
                tracing::trace!(sequence = kopf.sequence, bytes, "Datagramm gesendet");
            }
            Err(e) => {
                tracing::warn!(
                    fehler = %e,
                    sequence = kopf.sequence,
                    "UDP-Sendefehler"
                );
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
