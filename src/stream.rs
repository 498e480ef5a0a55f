//! Stream-mode handle
//!
//! Runs one operation over live byte streams. Logical input and output
//! channels map onto the child's stdin/stdout plus the extra pipes the
//! operation's topology calls for. Each endpoint has exactly one owner: the
//! caller drives it through [`StreamHandle::write_channel`] and
//! [`StreamHandle::read_channel`], and dropping or closing it closes the pipe.

use parking_lot::Mutex;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::{Direction, EngineError, Result};
use crate::formats::{build_args, BuildOptions, OperationDescriptor};
use crate::process::{
    async_reader, async_writer, locate, ChannelWiring, ProcessController, ProcessState,
};
use crate::topology::Slot;

type InputEndpoint = Box<dyn AsyncWrite + Send + Unpin>;
type OutputEndpoint = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Default)]
struct Endpoints {
    inputs: Vec<tokio::sync::Mutex<Option<InputEndpoint>>>,
    outputs: Vec<tokio::sync::Mutex<Option<OutputEndpoint>>>,
}

pub struct StreamHandle {
    descriptor: OperationDescriptor,
    config: EngineConfig,
    controller: Option<ProcessController>,
    wiring: Mutex<Option<ChannelWiring>>,
    endpoints: Endpoints,
}

impl StreamHandle {
    pub fn new(descriptor: OperationDescriptor, config: EngineConfig) -> Self {
        Self {
            descriptor,
            config,
            controller: None,
            wiring: Mutex::new(None),
            endpoints: Endpoints::default(),
        }
    }

    pub fn descriptor(&self) -> &OperationDescriptor {
        &self.descriptor
    }

    /// The transcoder argument vector, once initialized.
    pub fn args(&self) -> Option<&[String]> {
        self.controller.as_ref().map(|c| c.args())
    }

    pub fn state(&self) -> ProcessState {
        self.controller
            .as_ref()
            .map_or(ProcessState::Created, |c| c.state())
    }

    /// Default, validate, resolve the binary, build arguments and allocate
    /// pipes. Nothing is allocated unless the descriptor is valid.
    pub fn init(&mut self, cancel: &CancellationToken) -> Result<()> {
        if self.controller.is_some() {
            return Err(EngineError::Config("stream handle already initialized".into()));
        }

        self.descriptor.apply_defaults();
        self.descriptor.validate()?;
        self.descriptor.validate_stream_endpoints()?;
        let program = locate(&self.config.ffmpeg_path)?;

        let topology = self.descriptor.topology();
        let args = build_args(
            &self.descriptor,
            &topology.input_endpoints(),
            &topology.output_endpoints(),
            &BuildOptions::for_stream(&self.config),
        )?;
        let wiring = ChannelWiring::allocate(topology)?;

        let controller = ProcessController::new(program, args, cancel, &self.config);
        tracing::debug!(
            id = %controller.id(),
            op = %self.descriptor.op_type,
            extra_fds = ?wiring.child_targets(),
            "stream handle initialized"
        );
        *self.wiring.get_mut() = Some(wiring);
        self.controller = Some(controller);
        Ok(())
    }

    /// Spawn the transcoder and take ownership of the parent-side endpoints.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn run(&mut self) -> Result<()> {
        let controller = self.controller.as_mut().ok_or(EngineError::NotRunning)?;
        let mut wiring = self.wiring.get_mut().take().ok_or(EngineError::NotRunning)?;

        let mut cmd = controller.command();
        cmd.stdin(Stdio::piped()).stdout(Stdio::piped());
        wiring.attach(&mut cmd);
        let spawned = controller.spawn(&mut cmd);
        drop(cmd);
        wiring.release_child_ends();
        debug_assert_eq!(wiring.open_child_ends(), 0);
        // On failure `wiring` drops here with every parent end still in it
        let mut io = spawned?;
        let mut ends = wiring.into_parent_ends();

        let topology = self.descriptor.topology();
        let mut inputs = Vec::with_capacity(topology.inputs.len());
        for (index, slot) in topology.inputs.iter().enumerate() {
            let endpoint: Option<InputEndpoint> = match slot {
                Slot::Stdin => io.stdin.take().map(|s| Box::new(s) as InputEndpoint),
                _ => match ends.inputs.iter().position(|(i, _)| *i == index) {
                    Some(pos) => {
                        let (_, writer) = ends.inputs.swap_remove(pos);
                        match async_writer(writer) {
                            Ok(tx) => Some(Box::new(tx) as InputEndpoint),
                            Err(e) => {
                                controller.terminate();
                                return Err(EngineError::Pipe(e));
                            }
                        }
                    }
                    None => None,
                },
            };
            inputs.push(tokio::sync::Mutex::new(endpoint));
        }

        let mut outputs = Vec::with_capacity(topology.outputs.len());
        for (index, slot) in topology.outputs.iter().enumerate() {
            let endpoint: Option<OutputEndpoint> = match slot {
                Slot::Stdout => io.stdout.take().map(|s| Box::new(s) as OutputEndpoint),
                _ => match ends.outputs.iter().position(|(i, _)| *i == index) {
                    Some(pos) => {
                        let (_, reader) = ends.outputs.swap_remove(pos);
                        match async_reader(reader) {
                            Ok(rx) => Some(Box::new(rx) as OutputEndpoint),
                            Err(e) => {
                                controller.terminate();
                                return Err(EngineError::Pipe(e));
                            }
                        }
                    }
                    None => None,
                },
            };
            outputs.push(tokio::sync::Mutex::new(endpoint));
        }

        self.endpoints = Endpoints { inputs, outputs };
        Ok(())
    }

    pub async fn wait(&self) -> Result<()> {
        match &self.controller {
            Some(controller) => controller.wait().await,
            None => Err(EngineError::NotRunning),
        }
    }

    fn check_index(&self, direction: Direction, index: usize) -> Result<()> {
        let topology = self.descriptor.topology();
        let count = match direction {
            Direction::Input => topology.inputs.len(),
            Direction::Output => topology.outputs.len(),
        };
        if index >= count {
            return Err(EngineError::ChannelOutOfRange { direction, index });
        }
        Ok(())
    }

    fn running(&self) -> Result<&ProcessController> {
        let controller = self.controller.as_ref().ok_or(EngineError::NotRunning)?;
        if controller.cancel_token().is_cancelled() {
            return Err(controller.cancellation_error());
        }
        Ok(controller)
    }

    /// Write all of `data` to logical input channel `index`.
    ///
    /// Blocks while the pipe is full. Cancellation unblocks the write and
    /// closes the endpoint.
    pub async fn write_channel(&self, index: usize, data: &[u8]) -> Result<()> {
        self.check_index(Direction::Input, index)?;
        let controller = self.running()?;
        let slot = self.endpoints.inputs.get(index).ok_or(EngineError::NotRunning)?;

        let mut guard = slot.lock().await;
        let writer = guard.as_mut().ok_or(EngineError::ChannelClosed {
            direction: Direction::Input,
            index,
        })?;
        let cancel = controller.cancel_token();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            res = writer.write_all(data) => Some(res),
        };
        match outcome {
            Some(res) => Ok(res?),
            None => {
                guard.take();
                Err(controller.cancellation_error())
            }
        }
    }

    /// Read up to `buf.len()` bytes from logical output channel `index`.
    ///
    /// `Ok(0)` means end of stream.
    pub async fn read_channel(&self, index: usize, buf: &mut [u8]) -> Result<usize> {
        self.check_index(Direction::Output, index)?;
        let controller = self.running()?;
        let slot = self.endpoints.outputs.get(index).ok_or(EngineError::NotRunning)?;

        let mut guard = slot.lock().await;
        let reader = guard.as_mut().ok_or(EngineError::ChannelClosed {
            direction: Direction::Output,
            index,
        })?;
        let cancel = controller.cancel_token();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            res = reader.read(buf) => Some(res),
        };
        match outcome {
            Some(res) => Ok(res?),
            None => {
                guard.take();
                Err(controller.cancellation_error())
            }
        }
    }

    /// Close one logical input channel, signalling end of stream on it.
    pub async fn close_input_channel(&self, index: usize) -> Result<()> {
        self.check_index(Direction::Input, index)?;
        let slot = self.endpoints.inputs.get(index).ok_or(EngineError::NotRunning)?;
        let endpoint = slot.lock().await.take();
        if let Some(mut endpoint) = endpoint {
            if let Err(e) = endpoint.shutdown().await {
                tracing::debug!("input {} shutdown: {}", index, e);
            }
        }
        if self.inputs_closed().await {
            self.enter_draining();
        }
        Ok(())
    }

    /// Close every remaining input channel.
    pub async fn close_inputs(&self) {
        for (index, slot) in self.endpoints.inputs.iter().enumerate() {
            let endpoint = slot.lock().await.take();
            if let Some(mut endpoint) = endpoint {
                if let Err(e) = endpoint.shutdown().await {
                    tracing::debug!("input {} shutdown: {}", index, e);
                }
            }
        }
        self.enter_draining();
    }

    async fn inputs_closed(&self) -> bool {
        for slot in &self.endpoints.inputs {
            if slot.lock().await.is_some() {
                return false;
            }
        }
        true
    }

    fn enter_draining(&self) {
        if let Some(controller) = &self.controller {
            if controller.state() == ProcessState::Running {
                controller.set_state(ProcessState::Draining);
                tracing::debug!(id = %controller.id(), "inputs closed, draining");
            }
        }
    }

    /// Cancel the process and close every endpoint still held. Idempotent.
    ///
    /// Endpoints busy in a blocked read or write are closed by that call
    /// once it observes the cancellation.
    pub fn terminate(&self) {
        if let Some(controller) = &self.controller {
            controller.terminate();
        }
        self.wiring.lock().take();
        for slot in &self.endpoints.inputs {
            if let Ok(mut guard) = slot.try_lock() {
                guard.take();
            }
        }
        for slot in &self.endpoints.outputs {
            if let Ok(mut guard) = slot.try_lock() {
                guard.take();
            }
        }
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("op_type", &self.descriptor.op_type)
            .field("state", &self.state())
            .field("inputs", &self.endpoints.inputs.len())
            .field("outputs", &self.endpoints.outputs.len())
            .finish()
    }
}
