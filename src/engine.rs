//! Engine facade over stream and file handles

use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::file::FileHandle;
use crate::formats::OperationDescriptor;
use crate::process::ProcessState;
use crate::stream::StreamHandle;

/// The capability set shared by stream and file handles.
///
/// File handles implement channel I/O by failing with
/// [`EngineError::Unsupported`], so both variants expose the same surface.
#[allow(async_fn_in_trait)]
pub trait Processor {
    /// Validate the operation and prepare every resource short of spawning.
    fn init(&mut self, cancel: &CancellationToken) -> Result<()>;

    /// Spawn the transcoder.
    fn run(&mut self) -> Result<()>;

    /// Wait for the transcoder to exit.
    async fn wait(&self) -> Result<()>;

    /// Write to logical input channel `index`.
    async fn write_to(&self, index: usize, data: &[u8]) -> Result<()>;

    /// Read from logical output channel `index`; `Ok(0)` is end of stream.
    async fn read_from(&self, index: usize, buf: &mut [u8]) -> Result<usize>;

    /// Close every input channel.
    async fn close_input(&self);

    /// Cancel and release everything. Idempotent.
    fn terminate(&self);

    fn state(&self) -> ProcessState;
}

impl Processor for StreamHandle {
    fn init(&mut self, cancel: &CancellationToken) -> Result<()> {
        StreamHandle::init(self, cancel)
    }

    fn run(&mut self) -> Result<()> {
        StreamHandle::run(self)
    }

    async fn wait(&self) -> Result<()> {
        StreamHandle::wait(self).await
    }

    async fn write_to(&self, index: usize, data: &[u8]) -> Result<()> {
        self.write_channel(index, data).await
    }

    async fn read_from(&self, index: usize, buf: &mut [u8]) -> Result<usize> {
        self.read_channel(index, buf).await
    }

    async fn close_input(&self) {
        self.close_inputs().await
    }

    fn terminate(&self) {
        StreamHandle::terminate(self)
    }

    fn state(&self) -> ProcessState {
        StreamHandle::state(self)
    }
}

impl Processor for FileHandle {
    fn init(&mut self, cancel: &CancellationToken) -> Result<()> {
        FileHandle::init(self, cancel)
    }

    fn run(&mut self) -> Result<()> {
        FileHandle::run(self)
    }

    async fn wait(&self) -> Result<()> {
        FileHandle::wait(self).await
    }

    async fn write_to(&self, index: usize, data: &[u8]) -> Result<()> {
        self.write_channel(index, data).await
    }

    async fn read_from(&self, index: usize, buf: &mut [u8]) -> Result<usize> {
        self.read_channel(index, buf).await
    }

    async fn close_input(&self) {}

    fn terminate(&self) {
        FileHandle::terminate(self)
    }

    fn state(&self) -> ProcessState {
        FileHandle::state(self)
    }
}

/// Runs one operation through a [`Processor`].
///
/// Inputs 0 and 1 are the primary and secondary sources; outputs 0 and 1 are
/// the left and right results of a split (output 0 is the only result of a
/// convert or merge).
#[derive(Debug)]
pub struct AudioEngine<P> {
    processor: P,
    started: AtomicBool,
}

impl AudioEngine<StreamHandle> {
    pub fn stream(descriptor: OperationDescriptor, config: EngineConfig) -> Self {
        Self::new(StreamHandle::new(descriptor, config))
    }
}

impl AudioEngine<FileHandle> {
    pub fn file(descriptor: OperationDescriptor, config: EngineConfig) -> Self {
        Self::new(FileHandle::new(descriptor, config))
    }
}

impl<P: Processor> AudioEngine<P> {
    pub fn new(processor: P) -> Self {
        Self {
            processor,
            started: AtomicBool::new(false),
        }
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    pub fn state(&self) -> ProcessState {
        self.processor.state()
    }

    /// Initialize and spawn. Any failure tears down what was allocated.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&mut self, cancel: &CancellationToken) -> Result<()> {
        if self.started.load(Ordering::SeqCst) {
            return Err(EngineError::Config("engine already started".into()));
        }
        if let Err(e) = self.processor.init(cancel) {
            self.processor.terminate();
            return Err(e);
        }
        if let Err(e) = self.processor.run() {
            self.processor.terminate();
            return Err(e);
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub async fn wait(&self) -> Result<()> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(EngineError::NotRunning);
        }
        self.processor.wait().await
    }

    pub async fn write_primary(&self, data: &[u8]) -> Result<()> {
        self.processor.write_to(0, data).await
    }

    pub async fn write_secondary(&self, data: &[u8]) -> Result<()> {
        self.processor.write_to(1, data).await
    }

    pub async fn read_left(&self, buf: &mut [u8]) -> Result<usize> {
        self.processor.read_from(0, buf).await
    }

    pub async fn read_right(&self, buf: &mut [u8]) -> Result<usize> {
        self.processor.read_from(1, buf).await
    }

    /// Signal end of input on every input channel.
    pub async fn close_input(&self) {
        if self.started.load(Ordering::SeqCst) {
            self.processor.close_input().await;
        }
    }

    /// Tear the operation down. A no-op before `start`.
    pub fn done(&self) {
        if self.started.load(Ordering::SeqCst) {
            self.processor.terminate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::formats::{AudioFormat, ChannelSpec};

    fn convert() -> OperationDescriptor {
        OperationDescriptor::convert(
            ChannelSpec::new(AudioFormat::S16le, 8000, 1),
            ChannelSpec::new(AudioFormat::Wav, 8000, 1),
        )
    }

    #[tokio::test]
    async fn test_unstarted_engine() {
        let engine = AudioEngine::stream(convert(), EngineConfig::default());
        assert!(matches!(engine.wait().await, Err(EngineError::NotRunning)));
        engine.close_input().await;
        engine.done();
        assert_eq!(engine.state(), ProcessState::Created);
    }

    #[tokio::test]
    async fn test_start_failure_leaves_engine_unstarted() {
        let mut desc = convert();
        desc.op_type = crate::formats::OperationType::Split;
        let mut engine = AudioEngine::stream(desc, EngineConfig::default());
        let err = engine.start(&CancellationToken::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(matches!(engine.wait().await, Err(EngineError::NotRunning)));
    }

    #[tokio::test]
    async fn test_file_engine_rejects_channel_io() {
        let engine = AudioEngine::file(convert(), EngineConfig::default());
        let err = engine.write_primary(b"pcm").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Channel);
        let mut buf = [0u8; 16];
        assert!(matches!(
            engine.read_right(&mut buf).await,
            Err(EngineError::Unsupported(_))
        ));
    }
}
