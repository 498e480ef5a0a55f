//! File-mode handle
//!
//! The degenerate variant: every endpoint is a path on disk, no pipes are
//! allocated and the transcoder runs with `-y -nostdin`. Channel I/O is not
//! available.

use std::ffi::CString;
use std::fs::{self, File, OpenOptions};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::process::Stdio;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::formats::{build_args, BuildOptions, OperationDescriptor};
use crate::process::{locate, ProcessController, ProcessState};
use crate::topology::Endpoint;

fn check_failed(path: &Path, reason: impl Into<String>) -> EngineError {
    EngineError::FileCheck {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// An input must exist, be a non-empty regular file and be readable.
fn check_input(path: &Path) -> Result<()> {
    let meta = fs::metadata(path).map_err(|e| check_failed(path, e.to_string()))?;
    if !meta.is_file() {
        return Err(check_failed(path, "not a regular file"));
    }
    if meta.len() == 0 {
        return Err(check_failed(path, "file is empty"));
    }
    File::open(path).map_err(|e| check_failed(path, format!("not readable: {}", e)))?;
    Ok(())
}

fn dir_writable(dir: &Path) -> bool {
    match CString::new(dir.as_os_str().as_bytes()) {
        Ok(c_path) => unsafe { libc::access(c_path.as_ptr(), libc::W_OK) == 0 },
        Err(_) => false,
    }
}

/// An output's directory is created if missing and must be writable; an
/// existing output must be a writable regular file.
fn prepare_output(path: &Path) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    if !dir.exists() {
        fs::create_dir_all(dir)
            .map_err(|e| check_failed(dir, format!("cannot create directory: {}", e)))?;
        tracing::debug!("created output directory {}", dir.display());
    }
    if !dir_writable(dir) {
        return Err(check_failed(dir, "directory is not writable"));
    }
    if path.exists() {
        if !path.is_file() {
            return Err(check_failed(path, "not a regular file"));
        }
        OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|e| check_failed(path, format!("not writable: {}", e)))?;
    }
    Ok(())
}

#[derive(Debug)]
pub struct FileHandle {
    descriptor: OperationDescriptor,
    config: EngineConfig,
    controller: Option<ProcessController>,
}

impl FileHandle {
    pub fn new(descriptor: OperationDescriptor, config: EngineConfig) -> Self {
        Self {
            descriptor,
            config,
            controller: None,
        }
    }

    pub fn descriptor(&self) -> &OperationDescriptor {
        &self.descriptor
    }

    pub fn args(&self) -> Option<&[String]> {
        self.controller.as_ref().map(|c| c.args())
    }

    pub fn state(&self) -> ProcessState {
        self.controller
            .as_ref()
            .map_or(ProcessState::Created, |c| c.state())
    }

    pub fn init(&mut self, cancel: &CancellationToken) -> Result<()> {
        if self.controller.is_some() {
            return Err(EngineError::Config("file handle already initialized".into()));
        }

        self.descriptor.apply_defaults();
        self.descriptor.validate()?;
        self.descriptor.validate_file_endpoints()?;
        for path in &self.descriptor.input_files {
            check_input(path)?;
        }
        for path in &self.descriptor.output_files {
            prepare_output(path)?;
        }
        let program = locate(&self.config.ffmpeg_path)?;

        let inputs: Vec<Endpoint> = self.descriptor.input_files.iter().map(Endpoint::file).collect();
        let outputs: Vec<Endpoint> = self.descriptor.output_files.iter().map(Endpoint::file).collect();
        let args = build_args(
            &self.descriptor,
            &inputs,
            &outputs,
            &BuildOptions::for_files(&self.config),
        )?;

        let controller = ProcessController::new(program, args, cancel, &self.config);
        tracing::debug!(
            id = %controller.id(),
            op = %self.descriptor.op_type,
            "file handle initialized"
        );
        self.controller = Some(controller);
        Ok(())
    }

    /// Must be called from within a Tokio runtime.
    pub fn run(&mut self) -> Result<()> {
        let controller = self.controller.as_mut().ok_or(EngineError::NotRunning)?;
        let mut cmd = controller.command();
        cmd.stdin(Stdio::null()).stdout(Stdio::null());
        controller.spawn(&mut cmd)?;
        Ok(())
    }

    pub async fn wait(&self) -> Result<()> {
        match &self.controller {
            Some(controller) => controller.wait().await,
            None => Err(EngineError::NotRunning),
        }
    }

    pub async fn write_channel(&self, _index: usize, _data: &[u8]) -> Result<()> {
        Err(EngineError::Unsupported("channel write"))
    }

    pub async fn read_channel(&self, _index: usize, _buf: &mut [u8]) -> Result<usize> {
        Err(EngineError::Unsupported("channel read"))
    }

    pub fn terminate(&self) {
        if let Some(controller) = &self.controller {
            controller.terminate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::formats::{AudioFormat, ChannelSpec};
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    /// A stand-in transcoder that writes a marker into its last argument.
    fn fake_transcoder(dir: &Path, exit_code: i32) -> PathBuf {
        let path = dir.join("fake-ffmpeg");
        let script = format!(
            "#!/bin/sh\nfor a; do last=$a; done\nprintf converted > \"$last\"\necho 'fake transcoder ran' >&2\nexit {}\n",
            exit_code
        );
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn convert_files(input: &Path, output: &Path) -> OperationDescriptor {
        OperationDescriptor::convert(
            ChannelSpec::new(AudioFormat::S16le, 8000, 1),
            ChannelSpec::new(AudioFormat::Wav, 8000, 1),
        )
        .with_files([input], [output])
    }

    #[test]
    fn test_missing_input_is_resource_error() {
        let dir = tempfile::tempdir().unwrap();
        let desc = convert_files(&dir.path().join("missing.raw"), &dir.path().join("out.wav"));
        let mut handle = FileHandle::new(desc, EngineConfig::default());
        let err = handle.init(&CancellationToken::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resource);
    }

    #[test]
    fn test_empty_input_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("empty.raw");
        fs::write(&input, b"").unwrap();
        let desc = convert_files(&input, &dir.path().join("out.wav"));
        let mut handle = FileHandle::new(desc, EngineConfig::default());
        let err = handle.init(&CancellationToken::new()).unwrap_err();
        assert!(matches!(err, EngineError::FileCheck { .. }));
    }

    #[test]
    fn test_directory_input_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let desc = convert_files(dir.path(), &dir.path().join("out.wav"));
        let mut handle = FileHandle::new(desc, EngineConfig::default());
        assert!(handle.init(&CancellationToken::new()).is_err());
    }

    #[test]
    fn test_output_directory_created_and_args_built() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.raw");
        fs::write(&input, [0u8; 320]).unwrap();
        let output = dir.path().join("nested/deeper/out.wav");
        let config = EngineConfig {
            ffmpeg_path: fake_transcoder(dir.path(), 0),
            ..Default::default()
        };

        let mut handle = FileHandle::new(convert_files(&input, &output), config);
        handle.init(&CancellationToken::new()).unwrap();
        assert!(output.parent().unwrap().is_dir());
        assert_eq!(handle.state(), ProcessState::Initialized);

        let args = handle.args().unwrap();
        assert_eq!(&args[..3], ["-hide_banner", "-y", "-nostdin"]);
        assert!(!args.iter().any(|a| a.starts_with("pipe:")));
        assert_eq!(args.last().unwrap(), &output.display().to_string());
    }

    #[test]
    fn test_wrong_file_count_rejected() {
        let desc = OperationDescriptor::split(
            ChannelSpec::new(AudioFormat::S16le, 8000, 2),
            ChannelSpec::new(AudioFormat::S16le, 8000, 1),
            ChannelSpec::new(AudioFormat::S16le, 8000, 1),
        )
        .with_files(["in.raw"], ["left.raw"]);
        let mut handle = FileHandle::new(desc, EngineConfig::default());
        let err = handle.init(&CancellationToken::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_run_and_wait_with_fake_transcoder() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.raw");
        fs::write(&input, [0u8; 320]).unwrap();
        let output = dir.path().join("out.wav");
        let config = EngineConfig {
            ffmpeg_path: fake_transcoder(dir.path(), 0),
            ..Default::default()
        };

        let mut handle = FileHandle::new(convert_files(&input, &output), config);
        handle.init(&CancellationToken::new()).unwrap();
        handle.run().unwrap();
        handle.wait().await.unwrap();
        assert_eq!(fs::read_to_string(&output).unwrap(), "converted");
        assert_eq!(handle.state(), ProcessState::Terminated);
    }

    #[tokio::test]
    async fn test_failing_transcoder_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.raw");
        fs::write(&input, [0u8; 320]).unwrap();
        let config = EngineConfig {
            ffmpeg_path: fake_transcoder(dir.path(), 1),
            ..Default::default()
        };

        let mut handle = FileHandle::new(convert_files(&input, &dir.path().join("out.wav")), config);
        handle.init(&CancellationToken::new()).unwrap();
        handle.run().unwrap();
        let err = handle.wait().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Runtime);
        assert!(err.to_string().contains("fake transcoder ran"));
    }

    #[tokio::test]
    async fn test_channel_io_unsupported() {
        let handle = FileHandle::new(OperationDescriptor::default(), EngineConfig::default());
        let err = handle.write_channel(0, b"pcm").await.unwrap_err();
        assert!(matches!(err, EngineError::Unsupported(_)));
        assert!(err.to_string().contains("not supported in file mode"));
        let mut buf = [0u8; 8];
        assert!(handle.read_channel(0, &mut buf).await.is_err());
    }
}
