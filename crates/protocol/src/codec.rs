//! Opus-Konfiguration der Voice-Pipelines
//!
//! Aus der Konfiguration ergeben sich alle Groessen, mit denen die Stufen
//! rechnen:
//! - Samples pro Kanal und Frame: Schrittweite des RTP-Zeitstempels
//! - interleaved Werte pro Frame: Blockgroesse von Encoder und Decoder
//! - Frame-Dauer: Sendetakt der Pacing-Stufe

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Abtastrate (Hz als Diskriminante)
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleRate {
    Hz8000 = 8000,
    Hz12000 = 12000,
    Hz16000 = 16000,
    Hz24000 = 24000,
    #[default]
    Hz48000 = 48000,
}

/// Kanalzahl (Anzahl als Diskriminante)
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelCount {
    Mono = 1,
    #[default]
    Stereo = 2,
}

/// Opus-Anwendungsmodus
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpusApplication {
    /// Sprachverstaendlichkeit
    #[default]
    Voip,
    /// Allgemeines Audio, Musik
    Audio,
    RestrictedLowdelay,
}

/// Dauer eines Opus-Frames (Mikrosekunden als Diskriminante)
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameDauer {
    Ms2_5 = 2_500,
    Ms5 = 5_000,
    Ms10 = 10_000,
    #[default]
    Ms20 = 20_000,
    Ms40 = 40_000,
    Ms60 = 60_000,
}

impl FrameDauer {
    pub fn mikrosekunden(&self) -> u32 {
        *self as u32
    }

    /// Samples pro Kanal in einem Frame dieser Dauer
    pub fn samples_pro_frame(&self, rate: SampleRate) -> u32 {
        // Alle Kombinationen gehen ohne Rest auf (kleinster Fall: 2,5 ms bei 8 kHz = 20)
        (rate as u64 * self.mikrosekunden() as u64 / 1_000_000) as u32
    }

    /// Sendetakt der Pacing-Stufe
    pub fn dauer(&self) -> Duration {
        Duration::from_micros(self.mikrosekunden() as u64)
    }
}

/// Vollstaendige Opus-Codec-Konfiguration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpusConfig {
    /// Ziel-Bitrate in kbps (6 bis 510)
    pub bitrate_kbps: u16,
    pub sample_rate: SampleRate,
    pub channels: ChannelCount,
    pub frame_dauer: FrameDauer,
    pub application: OpusApplication,
    /// Inband-FEC
    pub fec_enabled: bool,
    /// Discontinuous Transmission
    pub dtx_enabled: bool,
    /// 0 bis 10
    pub complexity: u8,
    pub vbr_enabled: bool,
}

impl OpusConfig {
    /// Samples pro Kanal und Frame (RTP-Zeitstempel-Schritt)
    pub fn samples_pro_frame(&self) -> u32 {
        self.frame_dauer.samples_pro_frame(self.sample_rate)
    }

    /// Interleaved i16-Werte pro Frame ueber alle Kanaele
    pub fn werte_pro_frame(&self) -> usize {
        self.samples_pro_frame() as usize * self.channels as usize
    }

    /// Groesse eines PCM-Frames in Bytes (i16 little-endian, interleaved)
    pub fn pcm_bytes_pro_frame(&self) -> usize {
        self.werte_pro_frame() * 2
    }

    pub fn validieren(&self) -> Result<(), String> {
        if !(6..=510).contains(&self.bitrate_kbps) {
            return Err(format!(
                "Bitrate muss zwischen 6 und 510 kbps liegen (war: {})",
                self.bitrate_kbps
            ));
        }
        if self.complexity > 10 {
            return Err(format!(
                "Komplexitaet muss zwischen 0 und 10 liegen (war: {})",
                self.complexity
            ));
        }
        Ok(())
    }
}

/// Vordefinierte Codec-Einstellungen einer Session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioPreset {
    /// 16 kHz Mono, FEC und DTX
    Sprache,
    /// 48 kHz Mono, FEC
    Ausgewogen,
    /// 48 kHz Stereo, hohe Bitrate, konstante Frames
    Musik,
    /// 8 kHz Mono, 40-ms-Frames
    Schmalband,
}

impl AudioPreset {
    pub fn config(&self) -> OpusConfig {
        let basis = OpusConfig {
            bitrate_kbps: 64,
            sample_rate: SampleRate::Hz48000,
            channels: ChannelCount::Mono,
            frame_dauer: FrameDauer::Ms20,
            application: OpusApplication::Voip,
            fec_enabled: true,
            dtx_enabled: false,
            complexity: 9,
            vbr_enabled: true,
        };
        match self {
            AudioPreset::Sprache => OpusConfig {
                bitrate_kbps: 32,
                sample_rate: SampleRate::Hz16000,
                dtx_enabled: true,
                complexity: 8,
                ..basis
            },
            AudioPreset::Ausgewogen => basis,
            AudioPreset::Musik => OpusConfig {
                bitrate_kbps: 192,
                channels: ChannelCount::Stereo,
                application: OpusApplication::Audio,
                fec_enabled: false,
                complexity: 10,
                vbr_enabled: false,
                ..basis
            },
            AudioPreset::Schmalband => OpusConfig {
                bitrate_kbps: 12,
                sample_rate: SampleRate::Hz8000,
                frame_dauer: FrameDauer::Ms40,
                fec_enabled: false,
                dtx_enabled: true,
                complexity: 5,
                ..basis
            },
        }
    }
}
