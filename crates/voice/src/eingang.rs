//! Empfangspuffer pro Sprecher
//!
//! Letzte Stufe jeder Empfangs-Pipeline. Dekodierte Frames landen in einem
//! begrenzten Ringpuffer; die Anwendung liest sie ueber [`EingangsStream`]
//! nicht-blockierend (`frame_lesen`) oder wartend (`frame_lesen_async`).
//! Ist der Puffer voll, wird der neue Frame still verworfen und gezaehlt.

use async_trait::async_trait;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use funkwerk_core::types::UserId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::error::VoiceResult;
use crate::stage::{FrameHeader, FramedStage, HeaderWaechter};
use crate::telemetry::EmpfangsZaehler;

/// Ein dekodierter Audio-Frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub sequence: u16,
    pub timestamp: u32,
    /// Frame wurde verschleiert statt dekodiert
    pub missed: bool,
    /// PCM, i16 little-endian, interleaved
    pub pcm: Vec<u8>,
}

/// Lesende Seite des Empfangspuffers eines Sprechers
pub struct EingangsStream {
    user_id: UserId,
    tx: Sender<AudioFrame>,
    rx: Receiver<AudioFrame>,
    neu: Notify,
    geschlossen: AtomicBool,
    kapazitaet: usize,
}

impl EingangsStream {
    pub fn new(user_id: UserId, kapazitaet: usize) -> Arc<Self> {
        let kapazitaet = kapazitaet.max(1);
        let (tx, rx) = crossbeam_channel::bounded(kapazitaet);
        Arc::new(Self {
            user_id,
            tx,
            rx,
            neu: Notify::new(),
            geschlossen: AtomicBool::new(false),
            kapazitaet,
        })
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Naechster Frame, falls vorhanden
    pub fn frame_lesen(&self) -> Option<AudioFrame> {
        self.rx.try_recv().ok()
    }

    /// Wartet auf den naechsten Frame
    ///
    /// Gibt `None` zurueck, sobald der Stream geschlossen und leer ist.
    pub async fn frame_lesen_async(&self) -> Option<AudioFrame> {
        loop {
            let neu = self.neu.notified();
            tokio::pin!(neu);
            neu.as_mut().enable();

            if let Some(frame) = self.frame_lesen() {
                return Some(frame);
            }
            if self.ist_geschlossen() {
                return None;
            }
            neu.await;
        }
    }

    pub fn laenge(&self) -> usize {
        self.rx.len()
    }

    pub fn kapazitaet(&self) -> usize {
        self.kapazitaet
    }

    /// Schliesst den Stream; wartende Leser kehren mit `None` zurueck
    pub fn schliessen(&self) {
        self.geschlossen.store(true, Ordering::Release);
        self.neu.notify_waiters();
    }

    pub fn ist_geschlossen(&self) -> bool {
        self.geschlossen.load(Ordering::Acquire)
    }

    /// Legt einen Frame ab; `false` wenn verworfen
    fn ablegen(&self, frame: AudioFrame) -> bool {
        if self.ist_geschlossen() {
            return false;
        }
        match self.tx.try_send(frame) {
            Ok(()) => {
                self.neu.notify_waiters();
                true
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

impl std::fmt::Debug for EingangsStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EingangsStream")
            .field("user_id", &self.user_id)
            .field("laenge", &self.laenge())
            .field("kapazitaet", &self.kapazitaet)
            .finish()
    }
}

/// Terminale Stufe, die in einen [`EingangsStream`] schreibt
pub struct EingangsSenke {
    waechter: HeaderWaechter,
    stream: Arc<EingangsStream>,
    zaehler: Arc<EmpfangsZaehler>,
}

impl EingangsSenke {
    pub fn new(stream: Arc<EingangsStream>, zaehler: Arc<EmpfangsZaehler>) -> Self {
        Self {
            waechter: HeaderWaechter::new(),
            stream,
            zaehler,
        }
    }
}

#[async_trait]
impl FramedStage for EingangsSenke {
    fn waechter(&mut self) -> &mut HeaderWaechter {
        &mut self.waechter
    }

    async fn frame_verarbeiten(&mut self, kopf: FrameHeader, nutzdaten: &[u8]) -> VoiceResult<()> {
        let frame = AudioFrame {
            sequence: kopf.sequence,
            timestamp: kopf.timestamp,
            missed: kopf.missed,
            pcm: nutzdaten.to_vec(),
        };
        if self.stream.ablegen(frame) {
            EmpfangsZaehler::erhoehen(&self.zaehler.zugestellt);
        } else {
            EmpfangsZaehler::erhoehen(&self.zaehler.puffer_ueberlauf);
            tracing::trace!(
                user_id = %self.stream.user_id,
                sequence = kopf.sequence,
                "Empfangspuffer voll, Frame verworfen"
            );
        }
        Ok(())
    }

    fn clear(&mut self) {
        while self.stream.frame_lesen().is_some() {}
    }
}
