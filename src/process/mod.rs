//! Transcoder process plumbing
//!
//! This module handles:
//! - Locating the transcoder binary
//! - Allocating and attaching extra pipes
//! - Spawning, waiting on and cancelling the process
//! - Capturing a bounded stderr tail

pub mod binary;
pub mod controller;
pub mod tail;
pub mod wiring;

pub use binary::locate;
pub use controller::{ProcessController, ProcessState};
pub use tail::TailBuffer;
pub use wiring::{async_reader, async_writer, ChannelWiring};
