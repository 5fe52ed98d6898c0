//! Opus Encoder/Decoder
//!
//! Die Pipeline-Stufen arbeiten mit festen Frames aus interleaved
//! i16-Samples. `FrameEncoder` und `FrameDecoder` sind die Naht zwischen
//! Stufe und Codec; `OpusEncoder`/`OpusDecoder` kapseln audiopus.
//! Konfiguriert wird ueber `OpusConfig` aus funkwerk-protocol.

use audiopus::{
    coder::{Decoder, Encoder},
    Application, Channels, SampleRate,
};
use tracing::debug;

use crate::error::{AudioError, AudioResult};
use funkwerk_protocol::codec::{
    ChannelCount, OpusApplication, OpusConfig, SampleRate as ProtocolSampleRate,
};

/// Groesster Opus-Frame, den ein Encoder erzeugen kann
pub const MAX_OPUS_FRAME: usize = 4000;

/// OPUS_SET_DTX_REQUEST (audiopus 0.2 hat keinen eigenen Setter)
const OPUS_SET_DTX_REQUEST: i32 = 4016;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Kodiert genau einen PCM-Frame
pub trait FrameEncoder: Send {
    /// Interleaved Werte pro Frame (Samples * Kanaele)
    fn werte_pro_frame(&self) -> usize;

    /// Kodiert `pcm` nach `ausgabe`, gibt die Anzahl geschriebener Bytes zurueck
    fn kodieren(&mut self, pcm: &[i16], ausgabe: &mut [u8]) -> AudioResult<usize>;
}

/// Dekodiert genau einen Frame
pub trait FrameDecoder: Send {
    /// Interleaved Werte pro Frame (Samples * Kanaele)
    fn werte_pro_frame(&self) -> usize;

    /// Dekodiert `daten` nach `ausgabe`; `None` erzeugt einen
    /// Verschleierungs-Frame (PLC). Gibt die Anzahl interleaved Werte zurueck.
    fn dekodieren(&mut self, daten: Option<&[u8]>, ausgabe: &mut [i16]) -> AudioResult<usize>;
}

// ---------------------------------------------------------------------------
// OpusEncoder
// ---------------------------------------------------------------------------

/// Opus-Encoder: kodiert i16-PCM zu Opus-Bytes
pub struct OpusEncoder {
    encoder: Encoder,
    config: OpusConfig,
    werte_pro_frame: usize,
}

impl OpusEncoder {
    /// Erstellt einen neuen Encoder mit der gegebenen Konfiguration
    pub fn new(config: OpusConfig) -> AudioResult<Self> {
        config.validieren().map_err(AudioError::Konfiguration)?;

        let sample_rate = protocol_rate_to_audiopus(config.sample_rate);
        let channels = protocol_channels_to_audiopus(config.channels);
        let application = protocol_app_to_audiopus(config.application);

        let mut encoder = Encoder::new(sample_rate, channels, application).map_err(codec_fehler)?;

        encoder
            .set_bitrate(audiopus::Bitrate::BitsPerSecond(
                (config.bitrate_kbps as i32) * 1000,
            ))
            .map_err(codec_fehler)?;
        encoder
            .set_complexity(config.complexity)
            .map_err(codec_fehler)?;
        encoder.set_vbr(config.vbr_enabled).map_err(codec_fehler)?;
        encoder
            .set_inband_fec(config.fec_enabled)
            .map_err(codec_fehler)?;
        if config.dtx_enabled {
            encoder
                .set_encoder_ctl_request(OPUS_SET_DTX_REQUEST, 1)
                .map_err(codec_fehler)?;
        }

        let werte_pro_frame = config.werte_pro_frame();
        debug!(
            bitrate_kbps = config.bitrate_kbps,
            sample_rate = ?config.sample_rate,
            werte_pro_frame,
            "OpusEncoder erstellt"
        );

        Ok(Self {
            encoder,
            config,
            werte_pro_frame,
        })
    }

    pub fn config(&self) -> &OpusConfig {
        &self.config
    }
}

impl FrameEncoder for OpusEncoder {
    fn werte_pro_frame(&self) -> usize {
        self.werte_pro_frame
    }

    fn kodieren(&mut self, pcm: &[i16], ausgabe: &mut [u8]) -> AudioResult<usize> {
        if pcm.len() != self.werte_pro_frame {
            return Err(AudioError::FalscheFrameGroesse {
                erwartet: self.werte_pro_frame,
                erhalten: pcm.len(),
            });
        }
        self.encoder.encode(pcm, ausgabe).map_err(codec_fehler)
    }
}

// ---------------------------------------------------------------------------
// OpusDecoder
// ---------------------------------------------------------------------------

/// Opus-Decoder: dekodiert Opus-Bytes zu i16-PCM
pub struct OpusDecoder {
    decoder: Decoder,
    channels: ChannelCount,
    werte_pro_frame: usize,
}

impl OpusDecoder {
    /// Erstellt einen Decoder passend zu einer Encoder-Konfiguration
    pub fn from_config(config: &OpusConfig) -> AudioResult<Self> {
        let sr = protocol_rate_to_audiopus(config.sample_rate);
        let ch = protocol_channels_to_audiopus(config.channels);
        let decoder = Decoder::new(sr, ch).map_err(codec_fehler)?;

        debug!(
            sample_rate = ?config.sample_rate,
            channels = ?config.channels,
            "OpusDecoder erstellt"
        );

        Ok(Self {
            decoder,
            channels: config.channels,
            werte_pro_frame: config.werte_pro_frame(),
        })
    }

    pub fn channels(&self) -> ChannelCount {
        self.channels
    }
}

impl FrameDecoder for OpusDecoder {
    fn werte_pro_frame(&self) -> usize {
        self.werte_pro_frame
    }

    fn dekodieren(&mut self, daten: Option<&[u8]>, ausgabe: &mut [i16]) -> AudioResult<usize> {
        if ausgabe.len() < self.werte_pro_frame {
            return Err(AudioError::FalscheFrameGroesse {
                erwartet: self.werte_pro_frame,
                erhalten: ausgabe.len(),
            });
        }
        let samples = self
            .decoder
            .decode(daten, ausgabe, false)
            .map_err(codec_fehler)?;
        Ok(samples * self.channels as usize)
    }
}

// ---------------------------------------------------------------------------
// Konvertierungs-Hilfsfunktionen
// ---------------------------------------------------------------------------

fn codec_fehler(e: audiopus::Error) -> AudioError {
    AudioError::CodecFehler(e.to_string())
}

fn protocol_rate_to_audiopus(rate: ProtocolSampleRate) -> SampleRate {
    match rate {
        ProtocolSampleRate::Hz8000 => SampleRate::Hz8000,
        ProtocolSampleRate::Hz12000 => SampleRate::Hz12000,
        ProtocolSampleRate::Hz16000 => SampleRate::Hz16000,
        ProtocolSampleRate::Hz24000 => SampleRate::Hz24000,
        ProtocolSampleRate::Hz48000 => SampleRate::Hz48000,
    }
}

fn protocol_channels_to_audiopus(ch: ChannelCount) -> Channels {
    match ch {
        ChannelCount::Mono => Channels::Mono,
        ChannelCount::Stereo => Channels::Stereo,
    }
}

fn protocol_app_to_audiopus(app: OpusApplication) -> Application {
    match app {
        OpusApplication::Voip => Application::Voip,
        OpusApplication::Audio => Application::Audio,
        OpusApplication::RestrictedLowdelay => Application::LowDelay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use funkwerk_protocol::codec::AudioPreset;

    #[test]
    fn encoder_frame_groessen() {
        let enc = OpusEncoder::new(AudioPreset::Sprache.config()).unwrap();
        // 20ms bei 16kHz mono
        assert_eq!(enc.werte_pro_frame(), 320);

        let enc = OpusEncoder::new(AudioPreset::Musik.config()).unwrap();
        // 20ms bei 48kHz stereo
        assert_eq!(enc.werte_pro_frame(), 1920);
    }

    #[test]
    fn encoder_falsche_frame_groesse() {
        let mut enc = OpusEncoder::new(AudioPreset::Sprache.config()).unwrap();
        let mut out = [0u8; MAX_OPUS_FRAME];
        let result = enc.kodieren(&[0i16; 100], &mut out);
        assert!(matches!(
            result,
            Err(AudioError::FalscheFrameGroesse {
                erwartet: 320,
                erhalten: 100
            })
        ));
    }

    #[test]
    fn encoder_ungueltige_konfiguration() {
        let mut config = AudioPreset::Sprache.config();
        config.bitrate_kbps = 5;
        assert!(OpusEncoder::new(config).is_err());
    }

    #[test]
    fn encoder_decoder_roundtrip() {
        let config = AudioPreset::Ausgewogen.config();
        let mut enc = OpusEncoder::new(config.clone()).unwrap();
        let mut dec = OpusDecoder::from_config(&config).unwrap();

        let n = enc.werte_pro_frame();
        let pcm_in: Vec<i16> = (0..n)
            .map(|i| ((i as f32 * 0.05).sin() * 8000.0) as i16)
            .collect();

        let mut paket = [0u8; MAX_OPUS_FRAME];
        let laenge = enc.kodieren(&pcm_in, &mut paket).unwrap();
        assert!(laenge > 0);

        let mut pcm_out = vec![0i16; dec.werte_pro_frame()];
        let werte = dec.dekodieren(Some(&paket[..laenge]), &mut pcm_out).unwrap();
        assert_eq!(werte, n);
    }

    #[test]
    fn decoder_plc_liefert_vollen_frame() {
        let config = AudioPreset::Musik.config();
        let mut dec = OpusDecoder::from_config(&config).unwrap();
        assert_eq!(dec.channels(), ChannelCount::Stereo);
        let mut pcm_out = vec![0i16; dec.werte_pro_frame()];
        let werte = dec.dekodieren(None, &mut pcm_out).unwrap();
        assert_eq!(werte, 1920);
    }
}
