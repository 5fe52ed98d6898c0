//! Pacing-Stufe – fester Sendetakt fuer ausgehende Frames
//!
//! Entkoppelt den Schreibrhythmus der Anwendung vom Echtzeit-Takt des
//! Transports. Schreiber legen Frames in eine Warteschlange fester
//! Kapazitaet; eine einzelne Hintergrund-Loop gibt pro Takt den aeltesten
//! Frame an die naechste Stufe weiter.
//!
//! ## Ablauf
//!
//! ```text
//! Schreiber                         Pacing-Loop
//! ---------                         -----------
//! Zulassung (Semaphore) abwarten    warten bis Warteschlange einmal voll (Vorladen)
//! Puffer aus dem Pool nehmen        loop:
//! Payload kopieren                    sleep_until(naechster Takt)
//! in Warteschlange legen              aeltesten Frame entnehmen
//!                                     Sequenz/Zeitstempel aus dem Session-Zaehler
//!                                     an die RTP-Stufe weitergeben
//!                                     Puffer zurueck in den Pool
//!                                     eine Zulassung freigeben
//! ```
//!
//! ## Design
//! - Pool und Warteschlange sind crossbeam-Kanaele fester Groesse; im
//!   Dauerbetrieb wird nichts alloziert
//! - Der Takt laeuft gegen eine monotone Deadline (`tokio::time::sleep_until`),
//!   nicht gegen relative Pausen, damit sich kein Drift aufsummiert
//! - Sequenz und Zeitstempel vergibt die Stufe erst beim Senden, der Header
//!   des Aufrufers wird ignoriert. Verworfene Frames (`clear`, zu gross,
//!   Pool erschoepft) hinterlassen so keine Luecke in der Sequenz
//! - Leere Warteschlange zum Takt: Unterlauf wird gezaehlt, es wird keine
//!   Stille eingefuegt

use async_trait::async_trait;
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{VoiceError, VoiceResult};
use crate::framing::SendeZaehler;
use crate::stage::{weiterleiten, FrameHeader, FramedStage, HeaderWaechter};
use crate::telemetry::{PacingStatistik, PacingZaehler};

// ---------------------------------------------------------------------------
// Optionen
// ---------------------------------------------------------------------------

/// Parameter einer Pacing-Stufe
#[derive(Debug, Clone)]
pub struct PacingOptionen {
    /// Warteschlangen-Kapazitaet in Frames (= Vorlade-Tiefe)
    pub kapazitaet: usize,
    /// Abstand zwischen zwei gesendeten Frames
    pub takt: Duration,
    /// Zeitstempel-Schritt pro Frame
    pub samples_pro_frame: u32,
    /// Groesse eines Pool-Puffers in Bytes
    pub max_paket_bytes: usize,
    /// Stille bei Unterlauf einfuegen (nicht unterstuetzt)
    pub stille_bei_unterlauf: bool,
}

impl PacingOptionen {
    /// Kapazitaet aus Pufferdauer und Frame-Dauer
    pub fn aus_dauer(
        puffer_ms: u32,
        takt: Duration,
        samples_pro_frame: u32,
        max_paket_bytes: usize,
    ) -> Self {
        let frame_ms = (takt.as_millis() as u32).max(1);
        Self {
            kapazitaet: (puffer_ms / frame_ms).max(1) as usize,
            takt,
            samples_pro_frame,
            max_paket_bytes,
            stille_bei_unterlauf: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Geteilter Zustand
// ---------------------------------------------------------------------------

struct PoolEintrag {
    puffer: Vec<u8>,
    laenge: usize,
}

struct PacingGeteilt {
    kapazitaet: usize,
    warteschlange_tx: Sender<PoolEintrag>,
    warteschlange_rx: Receiver<PoolEintrag>,
    pool_tx: Sender<Vec<u8>>,
    pool_rx: Receiver<Vec<u8>>,
    /// Ein Permit pro freiem Platz in der Warteschlange
    zulassung: Semaphore,
    /// Eingereiht, aber noch nicht an die naechste Stufe uebergeben
    wartend: AtomicUsize,
    /// Schreiber hat einen Frame eingereiht
    neu: Notify,
    /// Ein Frame hat die Stufe verlassen oder wurde verworfen
    abgearbeitet: Notify,
    vorgeladen: AtomicBool,
    vorladen_erzwingen: AtomicBool,
    abbruch: CancellationToken,
    zaehler: PacingZaehler,
}

impl PacingGeteilt {
    /// Gibt einen Puffer zurueck und eine Zulassung frei
    fn freigeben(&self, puffer: Vec<u8>) {
        let _ = self.pool_tx.try_send(puffer);
        self.wartend.fetch_sub(1, Ordering::AcqRel);
        self.zulassung.add_permits(1);
        self.abgearbeitet.notify_waiters();
    }

    fn beenden(&self) {
        self.abbruch.cancel();
        self.zulassung.close();
        self.abgearbeitet.notify_waiters();
    }
}

/// Lesender Zugriff auf eine Pacing-Stufe, auch nachdem sie in eine Kette
/// eingebaut wurde
#[derive(Clone)]
pub struct PacingMonitor {
    geteilt: Arc<PacingGeteilt>,
}

impl PacingMonitor {
    pub fn statistik(&self) -> PacingStatistik {
        self.geteilt.zaehler.snapshot(
            self.geteilt.wartend.load(Ordering::Acquire),
            self.geteilt.kapazitaet,
        )
    }

    /// Hat die Warteschlange die Vorlade-Tiefe einmal erreicht?
    pub fn ist_vorgeladen(&self) -> bool {
        self.geteilt.vorgeladen.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// PacingStufe
// ---------------------------------------------------------------------------

/// Gibt Frames im festen Takt an die naechste Stufe weiter
pub struct PacingStufe {
    waechter: HeaderWaechter,
    geteilt: Arc<PacingGeteilt>,
    max_paket_bytes: usize,
    task: Option<JoinHandle<()>>,
}

impl PacingStufe {
    /// Erstellt die Stufe und startet die Pacing-Loop
    ///
    /// `abbruch` ist das Abbruch-Signal der Session; die Stufe haengt sich
    /// als Kind daran. `sende_zaehler` vergibt Sequenz und Zeitstempel der
    /// gesendeten Frames. Muss innerhalb einer tokio-Runtime aufgerufen werden.
    pub fn new(
        optionen: PacingOptionen,
        naechste: Box<dyn FramedStage>,
        sende_zaehler: Arc<SendeZaehler>,
        abbruch: &CancellationToken,
    ) -> VoiceResult<Self> {
        if optionen.stille_bei_unterlauf {
            return Err(VoiceError::Konfiguration(
                "Stille bei Unterlauf wird nicht unterstuetzt: die Pacing-Stufe haelt fertig \
                 kodierte Frames und kennt deren Format nicht"
                    .into(),
            ));
        }
        if optionen.kapazitaet == 0 || optionen.takt.is_zero() {
            return Err(VoiceError::Konfiguration(
                "Pacing braucht Kapazitaet > 0 und einen Takt > 0".into(),
            ));
        }

        let kap = optionen.kapazitaet;
        let (warteschlange_tx, warteschlange_rx) = crossbeam_channel::bounded(kap);
        let (pool_tx, pool_rx) = crossbeam_channel::bounded(kap);
        for _ in 0..kap {
            let _ = pool_tx.try_send(vec![0u8; optionen.max_paket_bytes]);
        }

        let geteilt = Arc::new(PacingGeteilt {
            kapazitaet: kap,
            warteschlange_tx,
            warteschlange_rx,
            pool_tx,
            pool_rx,
            zulassung: Semaphore::new(kap),
            wartend: AtomicUsize::new(0),
            neu: Notify::new(),
            abgearbeitet: Notify::new(),
            vorgeladen: AtomicBool::new(false),
            vorladen_erzwingen: AtomicBool::new(false),
            abbruch: abbruch.child_token(),
            zaehler: PacingZaehler::default(),
        });

        let task = tokio::spawn(pacing_loop(
            Arc::clone(&geteilt),
            naechste,
            sende_zaehler,
            optionen.takt,
            optionen.samples_pro_frame,
        ));

        tracing::debug!(
            kapazitaet = kap,
            takt_ms = optionen.takt.as_millis() as u64,
            "Pacing-Stufe gestartet"
        );

        Ok(Self {
            waechter: HeaderWaechter::new(),
            geteilt,
            max_paket_bytes: optionen.max_paket_bytes,
            task: Some(task),
        })
    }

    pub fn monitor(&self) -> PacingMonitor {
        PacingMonitor {
            geteilt: Arc::clone(&self.geteilt),
        }
    }

    /// Stoppt die Loop; wartende Schreiber kehren sofort zurueck
    pub async fn beenden(&mut self) {
        self.geteilt.beenden();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for PacingStufe {
    fn drop(&mut self) {
        self.geteilt.beenden();
    }
}

#[async_trait]
impl FramedStage for PacingStufe {
    fn waechter(&mut self) -> &mut HeaderWaechter {
        &mut self.waechter
    }

    async fn frame_verarbeiten(&mut self, _kopf: FrameHeader, nutzdaten: &[u8]) -> VoiceResult<()> {
        let geteilt = &self.geteilt;

        if nutzdaten.len() > self.max_paket_bytes {
            geteilt.zaehler.verworfen.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                bytes = nutzdaten.len(),
                max = self.max_paket_bytes,
                "Frame groesser als Pool-Puffer, verworfen"
            );
            return Ok(());
        }

        let permit = tokio::select! {
            p = geteilt.zulassung.acquire() => p.map_err(|_| VoiceError::Abgebrochen)?,
            _ = geteilt.abbruch.cancelled() => return Err(VoiceError::Abgebrochen),
        };
        // Die Pacing-Loop gibt den Platz per add_permits zurueck
        permit.forget();

        let mut puffer = match geteilt.pool_rx.try_recv() {
            Ok(p) => p,
            Err(_) => {
                geteilt.zulassung.add_permits(1);
                geteilt.zaehler.verworfen.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Puffer-Pool erschoepft, Frame verworfen");
                return Ok(());
            }
        };
        puffer[..nutzdaten.len()].copy_from_slice(nutzdaten);

        geteilt.wartend.fetch_add(1, Ordering::AcqRel);
        if let Err(e) = geteilt.warteschlange_tx.try_send(PoolEintrag {
            puffer,
            laenge: nutzdaten.len(),
        }) {
            geteilt.zaehler.verworfen.fetch_add(1, Ordering::Relaxed);
            geteilt.freigeben(e.into_inner().puffer);
            return Err(VoiceError::PufferUeberlauf(
                "Pacing-Warteschlange voll".into(),
            ));
        }
        geteilt.neu.notify_one();
        Ok(())
    }

    /// Wartet bis alle eingereihten Frames gesendet sind
    ///
    /// Eine noch nicht vorgeladene Warteschlange startet sofort.
    async fn flush(&mut self) -> VoiceResult<()> {
        let geteilt = &self.geteilt;
        geteilt.vorladen_erzwingen.store(true, Ordering::Release);
        geteilt.neu.notify_one();

        loop {
            let abgearbeitet = geteilt.abgearbeitet.notified();
            tokio::pin!(abgearbeitet);
            abgearbeitet.as_mut().enable();

            if geteilt.wartend.load(Ordering::Acquire) == 0 || geteilt.abbruch.is_cancelled() {
                return Ok(());
            }
            tokio::select! {
                _ = &mut abgearbeitet => {}
                _ = geteilt.abbruch.cancelled() => return Ok(()),
            }
        }
    }

    /// Verwirft alle eingereihten Frames
    fn clear(&mut self) {
        let mut verworfen = 0u64;
        while let Ok(eintrag) = self.geteilt.warteschlange_rx.try_recv() {
            self.geteilt.freigeben(eintrag.puffer);
            verworfen += 1;
        }
        self.geteilt
            .zaehler
            .verworfen
            .fetch_add(verworfen, Ordering::Relaxed);
        if verworfen > 0 {
            tracing::debug!(verworfen, "Pacing-Warteschlange geleert");
        }
    }
}

// ---------------------------------------------------------------------------
// Pacing-Loop
// ---------------------------------------------------------------------------

async fn pacing_loop(
    geteilt: Arc<PacingGeteilt>,
    mut naechste: Box<dyn FramedStage>,
    sende_zaehler: Arc<SendeZaehler>,
    takt: Duration,
    samples_pro_frame: u32,
) {
    // Vorladen: erst senden, wenn die Warteschlange einmal voll war
    loop {
        let neu = geteilt.neu.notified();
        tokio::pin!(neu);
        neu.as_mut().enable();

        let gefuellt = geteilt.warteschlange_rx.len();
        if gefuellt >= geteilt.kapazitaet
            || (gefuellt > 0 && geteilt.vorladen_erzwingen.load(Ordering::Acquire))
        {
            break;
        }
        tokio::select! {
            _ = &mut neu => {}
            _ = geteilt.abbruch.cancelled() => return,
        }
    }
    geteilt.vorgeladen.store(true, Ordering::Release);
    tracing::debug!(
        frames = geteilt.warteschlange_rx.len(),
        "Pacing vorgeladen, Senden beginnt"
    );

    let mut faellig = Instant::now();
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(faellig) => {}
            _ = geteilt.abbruch.cancelled() => break,
        }
        faellig += takt;
        // Nach langem Stillstand nicht im Schnelldurchlauf nachholen
        let jetzt = Instant::now();
        if faellig + takt < jetzt {
            faellig = jetzt;
        }

        let eintrag = match geteilt.warteschlange_rx.try_recv() {
            Ok(e) => e,
            Err(TryRecvError::Empty) => {
                geteilt.zaehler.unterlaeufe.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("Pacing-Unterlauf, kein Frame zum Takt");
                continue;
            }
            Err(TryRecvError::Disconnected) => break,
        };

        let (sequence, timestamp) = sende_zaehler.ziehen(samples_pro_frame);
        let kopf = FrameHeader::new(sequence, timestamp);
        let ergebnis = weiterleiten(naechste.as_mut(), kopf, &eintrag.puffer[..eintrag.laenge]).await;
        geteilt.freigeben(eintrag.puffer);

        geteilt.zaehler.gesendet.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = ergebnis {
            if e.ist_fatal_fuer_pipeline() {
                tracing::error!(fehler = %e, "Pacing-Loop: naechste Stufe unbrauchbar");
                break;
            }
            tracing::warn!(fehler = %e, sequence = kopf.sequence, "Frame nicht weitergegeben");
        }
    }

    geteilt.beenden();
    tracing::debug!("Pacing-Loop beendet");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
