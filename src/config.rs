//! Engine configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{EngineError, Result};
use crate::formats::OperationDescriptor;

/// Settings that shape how the transcoder is invoked, independent of the
/// operation being performed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Transcoder binary; a bare name is looked up on `PATH`
    pub ffmpeg_path: PathBuf,

    /// Capacity of the trailing stderr capture in bytes
    pub stderr_tail_bytes: usize,

    /// Read-ahead queue requested for live-stream inputs
    pub thread_queue_size: u32,

    /// Prepend low-latency probing flags in stream mode
    pub low_latency: bool,

    /// Value for the transcoder's `-loglevel` (quiet, error, warning, info, ...)
    pub log_level: Option<String>,

    /// Deadline for the whole operation in seconds
    pub timeout_secs: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            stderr_tail_bytes: 2048,
            thread_queue_size: 1024,
            low_latency: true,
            log_level: None,
            timeout_secs: None,
        }
    }
}

impl EngineConfig {
    /// The operation deadline, if configured.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&content).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| EngineError::Config(e.to_string()))?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }
}

/// A complete job: engine settings plus the operation to run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobFile {
    pub engine: EngineConfig,
    pub operation: OperationDescriptor,
}

impl JobFile {
    /// Load a job from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| EngineError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::{AudioFormat, OperationType};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.ffmpeg_path, PathBuf::from("ffmpeg"));
        assert_eq!(config.stderr_tail_bytes, 2048);
        assert_eq!(config.thread_queue_size, 1024);
        assert!(config.low_latency);
        assert_eq!(config.timeout(), None);
    }

    #[test]
    fn test_config_file_roundtrip() {
        let config = EngineConfig {
            log_level: Some("error".to_string()),
            timeout_secs: Some(30),
            ..Default::default()
        };
        let temp_file = NamedTempFile::new().unwrap();
        config.to_file(temp_file.path()).unwrap();

        let loaded = EngineConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"stderr_tail_bytes = 512\n").unwrap();

        let loaded = EngineConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(loaded.stderr_tail_bytes, 512);
        assert_eq!(loaded.thread_queue_size, 1024);
    }

    #[test]
    fn test_bad_config_is_configuration_error() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"low_latency = \"maybe\"\n").unwrap();

        let err = EngineConfig::from_file(temp_file.path()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn test_job_file() {
        let job = JobFile::from_toml_str(
            r#"
            [engine]
            ffmpeg_path = "/usr/local/bin/ffmpeg"
            timeout_secs = 10

            [operation]
            op_type = "ChannelSplit"

            [[operation.inputs]]
            format = "mp3"
            channels = 2

            [[operation.outputs]]
            format = "s16le"
            sample_rate = 8000
            channels = 1
            "#,
        )
        .unwrap();
        assert_eq!(job.engine.ffmpeg_path, PathBuf::from("/usr/local/bin/ffmpeg"));
        assert_eq!(job.operation.op_type, OperationType::Split);
        assert_eq!(job.operation.input_spec(0).format, Some(AudioFormat::Mp3));
        assert_eq!(job.operation.output_spec(1).sample_rate, Some(8000));
        assert!(job.operation.validate().is_ok());
    }
}
