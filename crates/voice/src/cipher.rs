//! Cipher-Stufen
//!
//! Die Nutzlast hinter dem RTP-Header wird mit einem AEAD verschluesselt.
//! Nonce ist der 12-Byte-Basisheader (Sequenz, Zeitstempel und SSRC machen
//! ihn pro Paket eindeutig), der vollstaendige Header inklusive Extension
//! geht als AAD in den Auth-Tag ein.
//!
//! ## Paketformat nach der Stufe
//! ```text
//! [RTP-Header (12+)] [Ciphertext] [Auth-Tag (16)]
//! ```
//!
//! Beim Empfang ist ein Verifikationsfehler ein weicher Fehler: das Paket
//! wird gezaehlt und verworfen, die Pipeline laeuft weiter.

use aes_gcm::Aes256Gcm;
use async_trait::async_trait;
use base64::Engine;
use chacha20poly1305::aead::{generic_array::GenericArray, Aead, KeyInit, Payload};
use chacha20poly1305::ChaCha20Poly1305;
use funkwerk_protocol::rtp::{header_laenge, RTP_HEADER_GROESSE};
use funkwerk_protocol::signal::CipherModus;
use std::sync::Arc;

use crate::error::{VoiceError, VoiceResult};
use crate::stage::{weiterleiten, FrameHeader, FramedStage, HeaderWaechter};
use crate::telemetry::EmpfangsZaehler;

/// Schluessellaenge beider AEAD-Verfahren in Bytes
pub const SCHLUESSEL_LAENGE: usize = 32;

/// Laenge des Auth-Tags in Bytes
pub const TAG_LAENGE: usize = 16;

// ---------------------------------------------------------------------------
// PayloadCipher
// ---------------------------------------------------------------------------

/// Verschluesselung der Nutzlast mit dem Header als Nonce-Material
///
/// `kopf` ist der vollstaendige RTP-Header des Pakets.
pub trait PayloadCipher: Send + Sync {
    fn modus(&self) -> CipherModus;

    fn verschluesseln(&self, kopf: &[u8], klartext: &[u8]) -> VoiceResult<Vec<u8>>;

    fn entschluesseln(&self, kopf: &[u8], geheimtext: &[u8]) -> VoiceResult<Vec<u8>>;
}

/// Reicht die Nutzlast unveraendert durch
#[derive(Debug, Default, Clone, Copy)]
pub struct KeinCipher;

impl PayloadCipher for KeinCipher {
    fn modus(&self) -> CipherModus {
        CipherModus::Keiner
    }

    fn verschluesseln(&self, _kopf: &[u8], klartext: &[u8]) -> VoiceResult<Vec<u8>> {
        Ok(klartext.to_vec())
    }

    fn entschluesseln(&self, _kopf: &[u8], geheimtext: &[u8]) -> VoiceResult<Vec<u8>> {
        Ok(geheimtext.to_vec())
    }
}

enum AeadKern {
    ChaCha(ChaCha20Poly1305),
    Aes(Aes256Gcm),
}

/// AEAD-Cipher mit dem Sitzungsschluessel aus dem Transport-Schritt
pub struct AeadCipher {
    kern: AeadKern,
}

impl AeadCipher {
    /// Erstellt den Cipher fuer einen ausgehandelten Modus
    pub fn new(modus: CipherModus, schluessel: &[u8]) -> VoiceResult<Self> {
        if schluessel.len() != SCHLUESSEL_LAENGE {
            return Err(VoiceError::Cipher(format!(
                "Schluessel hat {} Bytes, erwartet {}",
                schluessel.len(),
                SCHLUESSEL_LAENGE
            )));
        }
        let kern = match modus {
            CipherModus::ChaCha20Poly1305 => AeadKern::ChaCha(ChaCha20Poly1305::new(
                GenericArray::from_slice(schluessel),
            )),
            CipherModus::Aes256Gcm => {
                AeadKern::Aes(Aes256Gcm::new(GenericArray::from_slice(schluessel)))
            }
            CipherModus::Keiner => {
                return Err(VoiceError::Cipher(
                    "Modus 'none' hat keinen AEAD-Schluessel".into(),
                ))
            }
        };
        Ok(Self { kern })
    }

    fn nonce(kopf: &[u8]) -> VoiceResult<&[u8]> {
        kopf.get(..RTP_HEADER_GROESSE)
            .ok_or_else(|| VoiceError::Cipher("Header zu kurz fuer Nonce".into()))
    }
}

impl PayloadCipher for AeadCipher {
    fn modus(&self) -> CipherModus {
        match self.kern {
            AeadKern::ChaCha(_) => CipherModus::ChaCha20Poly1305,
            AeadKern::Aes(_) => CipherModus::Aes256Gcm,
        }
    }

    fn verschluesseln(&self, kopf: &[u8], klartext: &[u8]) -> VoiceResult<Vec<u8>> {
        let nonce = GenericArray::from_slice(Self::nonce(kopf)?);
        let payload = Payload {
            msg: klartext,
            aad: kopf,
        };
        let ergebnis = match &self.kern {
            AeadKern::ChaCha(c) => c.encrypt(nonce, payload),
            AeadKern::Aes(c) => c.encrypt(nonce, payload),
        };
        ergebnis.map_err(|e| VoiceError::Cipher(format!("Verschluesselung fehlgeschlagen: {e}")))
    }

    fn entschluesseln(&self, kopf: &[u8], geheimtext: &[u8]) -> VoiceResult<Vec<u8>> {
        let nonce = GenericArray::from_slice(Self::nonce(kopf)?);
        let payload = Payload {
            msg: geheimtext,
            aad: kopf,
        };
        let ergebnis = match &self.kern {
            AeadKern::ChaCha(c) => c.decrypt(nonce, payload),
            AeadKern::Aes(c) => c.decrypt(nonce, payload),
        };
        ergebnis.map_err(|e| VoiceError::Cipher(format!("Verifikation fehlgeschlagen: {e}")))
    }
}

/// Erstellt den Cipher aus Modus und Base64-Schluessel der Transport-Antwort
pub fn cipher_erstellen(
    modus: CipherModus,
    schluessel_b64: &str,
) -> VoiceResult<Arc<dyn PayloadCipher>> {
    match modus {
        CipherModus::Keiner => Ok(Arc::new(KeinCipher)),
        _ => {
            let schluessel = base64::engine::general_purpose::STANDARD
                .decode(schluessel_b64)
                .map_err(|e| VoiceError::Cipher(format!("Schluessel nicht dekodierbar: {e}")))?;
            Ok(Arc::new(AeadCipher::new(modus, &schluessel)?))
        }
    }
}

// ---------------------------------------------------------------------------
// Stufen
// ---------------------------------------------------------------------------

/// Verschluesselt die Nutzlast hinter dem RTP-Header
pub struct VerschluesselStufe {
    waechter: HeaderWaechter,
    cipher: Arc<dyn PayloadCipher>,
    naechste: Box<dyn FramedStage>,
    paket: Vec<u8>,
}

impl VerschluesselStufe {
    pub fn new(cipher: Arc<dyn PayloadCipher>, naechste: Box<dyn FramedStage>) -> Self {
        Self {
            waechter: HeaderWaechter::new(),
            cipher,
            naechste,
            paket: Vec::with_capacity(1500),
        }
    }
}

#[async_trait]
impl FramedStage for VerschluesselStufe {
    fn waechter(&mut self) -> &mut HeaderWaechter {
        &mut self.waechter
    }

    async fn frame_verarbeiten(&mut self, kopf: FrameHeader, nutzdaten: &[u8]) -> VoiceResult<()> {
        let laenge = header_laenge(nutzdaten)
            .map_err(|e| VoiceError::Cipher(format!("Kein RTP-Header vor der Nutzlast: {e}")))?;
        let (rtp, klartext) = nutzdaten.split_at(laenge);
        let geheimtext = self.cipher.verschluesseln(rtp, klartext)?;

        self.paket.clear();
        self.paket.extend_from_slice(rtp);
        self.paket.extend_from_slice(&geheimtext);
        weiterleiten(self.naechste.as_mut(), kopf, &self.paket).await
    }

    async fn flush(&mut self) -> VoiceResult<()> {
        self.naechste.flush().await
    }

    fn clear(&mut self) {
        self.naechste.clear();
    }
}

/// Prueft und entschluesselt die Nutzlast eines empfangenen Pakets
pub struct EntschluesselStufe {
    waechter: HeaderWaechter,
    cipher: Arc<dyn PayloadCipher>,
    naechste: Box<dyn FramedStage>,
    zaehler: Arc<EmpfangsZaehler>,
    paket: Vec<u8>,
}

impl EntschluesselStufe {
    pub fn new(
        cipher: Arc<dyn PayloadCipher>,
        naechste: Box<dyn FramedStage>,
        zaehler: Arc<EmpfangsZaehler>,
    ) -> Self {
        Self {
            waechter: HeaderWaechter::new(),
            cipher,
            naechste,
            zaehler,
            paket: Vec::with_capacity(1500),
        }
    }
}

#[async_trait]
impl FramedStage for EntschluesselStufe {
    fn waechter(&mut self) -> &mut HeaderWaechter {
        &mut self.waechter
    }

    async fn frame_verarbeiten(&mut self, kopf: FrameHeader, nutzdaten: &[u8]) -> VoiceResult<()> {
        let laenge = match header_laenge(nutzdaten) {
            Ok(l) => l,
            Err(e) => {
                EmpfangsZaehler::erhoehen(&self.zaehler.fehlerhaft);
                tracing::debug!(fehler = %e, "Paket ohne gueltigen Header verworfen");
                return Ok(());
            }
        };
        let (rtp, geheimtext) = nutzdaten.split_at(laenge);

        let klartext = match self.cipher.entschluesseln(rtp, geheimtext) {
            Ok(k) => k,
            Err(e) => {
                EmpfangsZaehler::erhoehen(&self.zaehler.entschluesselung_fehlgeschlagen);
                tracing::debug!(
                    fehler = %e,
                    sequence = kopf.sequence,
                    "Entschluesselung fehlgeschlagen, Paket verworfen"
                );
                return Ok(());
            }
        };

        self.paket.clear();
        self.paket.extend_from_slice(rtp);
        self.paket.extend_from_slice(&klartext);
        weiterleiten(self.naechste.as_mut(), kopf, &self.paket).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::test_hilfen::Sammler;
    use funkwerk_protocol::rtp::RtpHeader;

    fn paket(seq: u16, nutzlast: &[u8]) -> Vec<u8> {
        let mut p = RtpHeader::new(seq, seq as u32 * 960, 42).encode().to_vec();
        p.extend_from_slice(nutzlast);
        p
    }

    #[test]
    fn aead_beide_modi() {
        for modus in [CipherModus::ChaCha20Poly1305, CipherModus::Aes256Gcm] {
            let cipher = AeadCipher::new(modus, &[7u8; 32]).unwrap();
            assert_eq!(cipher.modus(), modus);
            let kopf = RtpHeader::new(1, 2, 3).encode();
            let geheim = cipher.verschluesseln(&kopf, b"opus-daten").unwrap();
            assert_eq!(geheim.len(), b"opus-daten".len() + TAG_LAENGE);
            assert_eq!(cipher.entschluesseln(&kopf, &geheim).unwrap(), b"opus-daten");

            // Anderer Header -> andere Nonce -> Verifikation schlaegt fehl
            let anderer = RtpHeader::new(2, 2, 3).encode();
            assert!(cipher.entschluesseln(&anderer, &geheim).is_err());
        }
    }

    #[test]
    fn falsche_schluessellaenge() {
        assert!(AeadCipher::new(CipherModus::ChaCha20Poly1305, &[0u8; 16]).is_err());
        assert!(AeadCipher::new(CipherModus::Keiner, &[0u8; 32]).is_err());
    }

    #[test]
    fn cipher_aus_base64() {
        let b64 = base64::engine::general_purpose::STANDARD.encode([1u8; 32]);
        let c = cipher_erstellen(CipherModus::Aes256Gcm, &b64).unwrap();
        assert_eq!(c.modus(), CipherModus::Aes256Gcm);
        assert!(cipher_erstellen(CipherModus::Aes256Gcm, "%%%").is_err());
        let c = cipher_erstellen(CipherModus::Keiner, "").unwrap();
        assert_eq!(c.modus(), CipherModus::Keiner);
    }

    #[tokio::test]
    async fn stufen_hin_und_zurueck() {
        let cipher: Arc<dyn PayloadCipher> =
            Arc::new(AeadCipher::new(CipherModus::ChaCha20Poly1305, &[9u8; 32]).unwrap());

        let (sammler, gesendet) = Sammler::new();
        let mut aus = VerschluesselStufe::new(Arc::clone(&cipher), Box::new(sammler));
        aus.header_ankuendigen(FrameHeader::new(5, 0)).unwrap();
        aus.payload_liefern(&paket(5, b"hallo")).await.unwrap();

        let verschluesselt = gesendet.lock()[0].1.clone();
        assert_eq!(&verschluesselt[..12], &paket(5, b"")[..]);
        assert_ne!(&verschluesselt[12..], b"hallo");

        let (sammler, empfangen) = Sammler::new();
        let zaehler = Arc::new(EmpfangsZaehler::new());
        let mut ein = EntschluesselStufe::new(cipher, Box::new(sammler), Arc::clone(&zaehler));
        ein.header_ankuendigen(FrameHeader::default()).unwrap();
        ein.payload_liefern(&verschluesselt).await.unwrap();

        assert_eq!(empfangen.lock()[0].1, paket(5, b"hallo"));
        assert_eq!(zaehler.snapshot().entschluesselung_fehlgeschlagen, 0);
    }

    #[tokio::test]
    async fn manipuliertes_paket_wird_verworfen() {
        let cipher: Arc<dyn PayloadCipher> =
            Arc::new(AeadCipher::new(CipherModus::Aes256Gcm, &[3u8; 32]).unwrap());
        let kopf = RtpHeader::new(1, 960, 42).encode();
        let mut p = kopf.to_vec();
        p.extend_from_slice(&cipher.verschluesseln(&kopf, b"x").unwrap());
        let letzter = p.len() - 1;
        p[letzter] ^= 0x01;

        let (sammler, empfangen) = Sammler::new();
        let zaehler = Arc::new(EmpfangsZaehler::new());
        let mut ein = EntschluesselStufe::new(cipher, Box::new(sammler), Arc::clone(&zaehler));
        ein.header_ankuendigen(FrameHeader::default()).unwrap();
        assert!(ein.payload_liefern(&p).await.is_ok());

        // Pipeline bleibt nutzbar
        ein.header_ankuendigen(FrameHeader::default()).unwrap();
        assert!(empfangen.lock().is_empty());
        assert_eq!(zaehler.snapshot().entschluesselung_fehlgeschlagen, 1);
    }
}
