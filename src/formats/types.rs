//! Format tags, operation kinds and per-channel parameters

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{EngineError, Result};

/// Sample rate of the placeholder channel spec.
pub const DEFAULT_SAMPLE_RATE: u32 = 8000;
/// Channel count of the placeholder channel spec.
pub const DEFAULT_CHANNELS: u16 = 1;

/// Format tag passed to the transcoder with `-f`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Alaw,
    Mulaw,
    S8,
    U8,
    S16le,
    S16be,
    U16le,
    U16be,
    S24le,
    S24be,
    U24le,
    U24be,
    S32le,
    S32be,
    U32le,
    U32be,
    F32le,
    F32be,
    F64le,
    F64be,
    Gsm,
    Wav,
    Mp3,
    G722,
    /// G.729 bitstream; ffmpeg calls the demuxer/muxer `bit`
    #[serde(rename = "bit", alias = "g729")]
    G729,
    Opus,
    Aac,
}

impl AudioFormat {
    /// All known tags, in declaration order.
    pub const ALL: [AudioFormat; 27] = [
        AudioFormat::Alaw,
        AudioFormat::Mulaw,
        AudioFormat::S8,
        AudioFormat::U8,
        AudioFormat::S16le,
        AudioFormat::S16be,
        AudioFormat::U16le,
        AudioFormat::U16be,
        AudioFormat::S24le,
        AudioFormat::S24be,
        AudioFormat::U24le,
        AudioFormat::U24be,
        AudioFormat::S32le,
        AudioFormat::S32be,
        AudioFormat::U32le,
        AudioFormat::U32be,
        AudioFormat::F32le,
        AudioFormat::F32be,
        AudioFormat::F64le,
        AudioFormat::F64be,
        AudioFormat::Gsm,
        AudioFormat::Wav,
        AudioFormat::Mp3,
        AudioFormat::G722,
        AudioFormat::G729,
        AudioFormat::Opus,
        AudioFormat::Aac,
    ];

    /// The tag as the transcoder spells it.
    pub fn as_str(self) -> &'static str {
        match self {
            AudioFormat::Alaw => "alaw",
            AudioFormat::Mulaw => "mulaw",
            AudioFormat::S8 => "s8",
            AudioFormat::U8 => "u8",
            AudioFormat::S16le => "s16le",
            AudioFormat::S16be => "s16be",
            AudioFormat::U16le => "u16le",
            AudioFormat::U16be => "u16be",
            AudioFormat::S24le => "s24le",
            AudioFormat::S24be => "s24be",
            AudioFormat::U24le => "u24le",
            AudioFormat::U24be => "u24be",
            AudioFormat::S32le => "s32le",
            AudioFormat::S32be => "s32be",
            AudioFormat::U32le => "u32le",
            AudioFormat::U32be => "u32be",
            AudioFormat::F32le => "f32le",
            AudioFormat::F32be => "f32be",
            AudioFormat::F64le => "f64le",
            AudioFormat::F64be => "f64be",
            AudioFormat::Gsm => "gsm",
            AudioFormat::Wav => "wav",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::G722 => "g722",
            AudioFormat::G729 => "bit",
            AudioFormat::Opus => "opus",
            AudioFormat::Aac => "aac",
        }
    }

    /// Whether the stream carries no header the transcoder could probe, so
    /// rate and channel count must be given explicitly.
    pub fn is_raw_pcm(self) -> bool {
        !matches!(
            self,
            AudioFormat::Wav
                | AudioFormat::Mp3
                | AudioFormat::G722
                | AudioFormat::G729
                | AudioFormat::Opus
                | AudioFormat::Aac
        )
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AudioFormat {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        if s == "g729" {
            return Ok(AudioFormat::G729);
        }
        AudioFormat::ALL
            .iter()
            .copied()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| EngineError::invalid("format", format!("unknown audio format {:?}", s)))
    }
}

/// Requested transformation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OperationType {
    /// One input, one output, format/rate/channel conversion
    #[default]
    #[serde(rename = "FormatConvert", alias = "convert")]
    Convert,
    /// One stereo input, two mono outputs (left, right)
    #[serde(rename = "ChannelSplit", alias = "split")]
    Split,
    /// Two inputs combined into one output
    #[serde(rename = "AudioMerge", alias = "merge")]
    Merge,
}

impl OperationType {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationType::Convert => "FormatConvert",
            OperationType::Split => "ChannelSplit",
            OperationType::Merge => "AudioMerge",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "FormatConvert" | "convert" => Ok(OperationType::Convert),
            "ChannelSplit" | "split" => Ok(OperationType::Split),
            "AudioMerge" | "merge" => Ok(OperationType::Merge),
            other => Err(EngineError::invalid(
                "op_type",
                format!("unrecognized operation type {:?}", other),
            )),
        }
    }
}

/// How two merge inputs are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MergePolicy {
    /// Duration-aligned summation; fanned out to both sides for a stereo target
    #[default]
    Mix,
    /// Input 0 becomes the left channel, input 1 the right
    SideBySide,
}

/// Format parameters of one logical channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSpec {
    pub format: Option<AudioFormat>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
}

impl ChannelSpec {
    /// Fully specified channel.
    pub fn new(format: AudioFormat, sample_rate: u32, channels: u16) -> Self {
        Self {
            format: Some(format),
            sample_rate: Some(sample_rate),
            channels: Some(channels),
        }
    }

    /// Container/compressed channel whose parameters the transcoder probes.
    pub fn probed(format: AudioFormat) -> Self {
        Self {
            format: Some(format),
            sample_rate: None,
            channels: None,
        }
    }

    /// The permissive entry that stands in for an empty spec sequence.
    pub fn placeholder() -> Self {
        Self {
            format: None,
            sample_rate: Some(DEFAULT_SAMPLE_RATE),
            channels: Some(DEFAULT_CHANNELS),
        }
    }

    pub fn is_raw_pcm(&self) -> bool {
        self.format.map(AudioFormat::is_raw_pcm).unwrap_or(false)
    }

    /// Check presence and positivity of the fields; `label` prefixes errors.
    pub(crate) fn check(&self, label: &str, require_params: bool) -> Result<()> {
        if self.format.is_none() {
            return Err(EngineError::invalid(
                format!("{}.format", label),
                "format is missing",
            ));
        }
        if let Some(0) = self.sample_rate {
            return Err(EngineError::invalid(
                format!("{}.sample_rate", label),
                "sample rate must be positive",
            ));
        }
        if let Some(0) = self.channels {
            return Err(EngineError::invalid(
                format!("{}.channels", label),
                "channel count must be positive",
            ));
        }
        if require_params {
            if self.sample_rate.is_none() {
                return Err(EngineError::invalid(
                    format!("{}.sample_rate", label),
                    "sample rate is required for raw formats and outputs",
                ));
            }
            if self.channels.is_none() {
                return Err(EngineError::invalid(
                    format!("{}.channels", label),
                    "channel count is required for raw formats and outputs",
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_pcm_classification() {
        assert!(AudioFormat::S16le.is_raw_pcm());
        assert!(AudioFormat::Mulaw.is_raw_pcm());
        assert!(AudioFormat::Gsm.is_raw_pcm());
        for f in [
            AudioFormat::Wav,
            AudioFormat::Mp3,
            AudioFormat::G722,
            AudioFormat::G729,
            AudioFormat::Opus,
            AudioFormat::Aac,
        ] {
            assert!(!f.is_raw_pcm(), "{} should not be raw", f);
        }
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("s16le".parse::<AudioFormat>().unwrap(), AudioFormat::S16le);
        assert_eq!("WAV".parse::<AudioFormat>().unwrap(), AudioFormat::Wav);
        assert_eq!("g729".parse::<AudioFormat>().unwrap(), AudioFormat::G729);
        assert_eq!("bit".parse::<AudioFormat>().unwrap(), AudioFormat::G729);
        assert!("flac".parse::<AudioFormat>().is_err());
    }

    #[test]
    fn test_every_tag_parses_back() {
        for f in AudioFormat::ALL {
            assert_eq!(f.as_str().parse::<AudioFormat>().unwrap(), f);
        }
    }

    #[test]
    fn test_operation_type_parse() {
        assert_eq!(
            "ChannelSplit".parse::<OperationType>().unwrap(),
            OperationType::Split
        );
        assert_eq!("merge".parse::<OperationType>().unwrap(), OperationType::Merge);
        let err = "Reverse".parse::<OperationType>().unwrap_err();
        assert!(err.to_string().contains("op_type"));
    }

    #[test]
    fn test_placeholder() {
        let p = ChannelSpec::placeholder();
        assert_eq!(p.format, None);
        assert_eq!(p.sample_rate, Some(8000));
        assert_eq!(p.channels, Some(1));
        assert!(!p.is_raw_pcm());
    }

    #[test]
    fn test_check_requires_params_for_raw() {
        let spec = ChannelSpec {
            format: Some(AudioFormat::S16le),
            sample_rate: None,
            channels: Some(1),
        };
        let err = spec.check("inputs[0]", true).unwrap_err();
        assert!(err.to_string().contains("inputs[0].sample_rate"));

        assert!(ChannelSpec::probed(AudioFormat::Mp3)
            .check("inputs[0]", false)
            .is_ok());
    }
}
