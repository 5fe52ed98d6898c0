//! PCM-Hilfsfunktionen
//!
//! Die Anwendung schreibt PCM als Bytes (i16 little-endian, interleaved).
//! Der Codec arbeitet auf i16-Werten.

/// Bytes pro i16-Wert
pub const BYTES_PRO_WERT: usize = 2;

/// Liest i16-Werte aus Little-Endian-Bytes in `ziel`
///
/// Gibt die Anzahl gelesener Werte zurueck. Ein ungerades Restbyte wird ignoriert.
pub fn bytes_zu_werten(bytes: &[u8], ziel: &mut [i16]) -> usize {
    let mut n = 0;
    for (wert, paar) in ziel.iter_mut().zip(bytes.chunks_exact(BYTES_PRO_WERT)) {
        *wert = i16::from_le_bytes([paar[0], paar[1]]);
        n += 1;
    }
    n
}

/// Schreibt i16-Werte als Little-Endian-Bytes an `ziel` an
pub fn werte_anhaengen(werte: &[i16], ziel: &mut Vec<u8>) {
    ziel.reserve(werte.len() * BYTES_PRO_WERT);
    for w in werte {
        ziel.extend_from_slice(&w.to_le_bytes());
    }
}

/// Erzeugt einen Sinuston als PCM-Bytes (Testsignal fuer Demo und Tests)
pub fn sinus_ton(
    frequenz_hz: f32,
    sample_rate: u32,
    kanaele: usize,
    dauer_ms: u32,
    amplitude: f32,
) -> Vec<u8> {
    let samples = (sample_rate as u64 * dauer_ms as u64 / 1000) as usize;
    let mut werte = Vec::with_capacity(samples * kanaele);
    for i in 0..samples {
        let t = i as f32 / sample_rate as f32;
        let wert = ((2.0 * std::f32::consts::PI * frequenz_hz * t).sin()
            * amplitude.clamp(0.0, 1.0)
            * i16::MAX as f32) as i16;
        for _ in 0..kanaele {
            werte.push(wert);
        }
    }
    let mut bytes = Vec::new();
    werte_anhaengen(&werte, &mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn little_endian_konvertierung() {
        let mut bytes = Vec::new();
        werte_anhaengen(&[1, -2, i16::MAX], &mut bytes);
        assert_eq!(bytes, vec![0x01, 0x00, 0xFE, 0xFF, 0xFF, 0x7F]);

        let mut werte = [0i16; 3];
        assert_eq!(bytes_zu_werten(&bytes, &mut werte), 3);
        assert_eq!(werte, [1, -2, i16::MAX]);
    }

    #[test]
    fn restbyte_wird_ignoriert() {
        let mut werte = [0i16; 4];
        assert_eq!(bytes_zu_werten(&[1, 0, 2], &mut werte), 1);
    }

    #[test]
    fn sinus_ton_laenge() {
        // 100 ms Stereo bei 48 kHz
        let ton = sinus_ton(440.0, 48_000, 2, 100, 0.5);
        assert_eq!(ton.len(), 4800 * 2 * BYTES_PRO_WERT);
    }
}
