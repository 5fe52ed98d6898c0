//! Keepalive-Datagramme
//!
//! Der Client sendet periodisch ein 8-Byte-Token an das Relay, das es
//! unveraendert zurueckschickt. Aus der Umlaufzeit ergibt sich die Latenz;
//! nebenbei bleibt das NAT-Binding offen.

/// Groesse eines Keepalive-Datagramms in Bytes
pub const KEEPALIVE_GROESSE: usize = 8;

/// Kodiert ein Token (big-endian)
pub fn keepalive_kodieren(token: u64) -> [u8; KEEPALIVE_GROESSE] {
    token.to_be_bytes()
}

/// Dekodiert ein Token; `None` wenn das Datagramm nicht exakt 8 Bytes hat
pub fn keepalive_dekodieren(daten: &[u8]) -> Option<u64> {
    let bytes: [u8; KEEPALIVE_GROESSE] = daten.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

/// Prueft ob ein Datagramm die Groesse einer Keepalive-Antwort hat
pub fn ist_keepalive(daten: &[u8]) -> bool {
    daten.len() == KEEPALIVE_GROESSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_wird_unveraendert_zurueckgelesen() {
        let bytes = keepalive_kodieren(0x0102_0304_0506_0708);
        assert_eq!(bytes, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(keepalive_dekodieren(&bytes), Some(0x0102_0304_0506_0708));
    }

    #[test]
    fn falsche_laenge() {
        assert_eq!(keepalive_dekodieren(&[0u8; 7]), None);
        assert_eq!(keepalive_dekodieren(&[0u8; 12]), None);
        assert!(!ist_keepalive(&[0u8; 12]));
        assert!(ist_keepalive(&[0u8; 8]));
    }
}
