//! Integration testing module
//!
//! End-to-end tests against a real transcoder:
//! - Format conversion over stdin/stdout
//! - Stereo split onto an extra output pipe
//! - Side-by-side merge from an extra input pipe
//! - Cancellation of blocked channel I/O
//! - Disk-file invocations
