//! Stream transcoding engine
//!
//! Turns a declarative audio operation (format conversion, stereo split,
//! two-source merge) into an ffmpeg invocation and exposes the process's
//! standard and auxiliary pipes as logical read/write channels.
//!
//! ```no_run
//! use audiopipe::{AudioEngine, AudioFormat, ChannelSpec, EngineConfig, OperationDescriptor};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo(pcm: &[u8]) -> audiopipe::Result<()> {
//! let desc = OperationDescriptor::convert(
//!     ChannelSpec::new(AudioFormat::S16le, 8000, 1),
//!     ChannelSpec::new(AudioFormat::Wav, 8000, 1),
//! );
//! let mut engine = AudioEngine::stream(desc, EngineConfig::default());
//! engine.start(&CancellationToken::new())?;
//!
//! let writer = async {
//!     engine.write_primary(pcm).await?;
//!     engine.close_input().await;
//!     Ok::<_, audiopipe::EngineError>(())
//! };
//! let reader = async {
//!     let mut out = Vec::new();
//!     let mut buf = [0u8; 4096];
//!     loop {
//!         let n = engine.read_left(&mut buf).await?;
//!         if n == 0 {
//!             break;
//!         }
//!         out.extend_from_slice(&buf[..n]);
//!     }
//!     Ok::<_, audiopipe::EngineError>(out)
//! };
//! let (written, wav) = tokio::join!(writer, reader);
//! written?;
//! let _wav = wav?;
//! engine.wait().await
//! # }
//! ```

pub(crate) mod config;
pub(crate) mod engine;
pub(crate) mod error;
pub(crate) mod file;
pub(crate) mod formats;
pub mod logging;
pub(crate) mod process;
pub(crate) mod stream;
pub(crate) mod topology;

#[cfg(test)]
pub(crate) mod tests;

pub use config::{EngineConfig, JobFile};
pub use engine::{AudioEngine, Processor};
pub use error::{Direction, EngineError, ErrorKind, Result};
pub use file::FileHandle;
pub use formats::{build_args, BuildOptions, FilterGraph};
pub use formats::{AudioFormat, ChannelSpec, MergePolicy, OperationDescriptor, OperationType};
pub use process::{locate, ProcessState, TailBuffer};
pub use stream::StreamHandle;
pub use topology::{Endpoint, Slot, Topology};
