//! Logical channel topology
//!
//! The one place that says which transcoder descriptor carries each logical
//! input and output. The argument builder reads it to spell `pipe:N` targets
//! and the pipe wiring reads it to decide which descriptor number each extra
//! pipe lands on in the child.

use std::path::{Path, PathBuf};

use crate::formats::OperationType;

/// First descriptor number after stdin/stdout/stderr.
pub const FIRST_EXTRA_FD: i32 = 3;

/// Physical attachment point of a logical channel on the transcoder side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// The child's standard input
    Stdin,
    /// The child's standard output
    Stdout,
    /// The n-th extra pipe, seen by the child as descriptor `3 + n`
    Extra(usize),
}

impl Slot {
    /// Descriptor number as seen by the child process.
    pub const fn child_fd(self) -> i32 {
        match self {
            Slot::Stdin => 0,
            Slot::Stdout => 1,
            Slot::Extra(n) => FIRST_EXTRA_FD + n as i32,
        }
    }

    /// The transcoder URL for this slot.
    pub fn pipe_url(self) -> String {
        format!("pipe:{}", self.child_fd())
    }
}

/// Input and output slots of one operation, indexed by logical channel.
#[derive(Debug, PartialEq, Eq)]
pub struct Topology {
    pub inputs: &'static [Slot],
    pub outputs: &'static [Slot],
}

/// Convert: stdin -> stdout.
pub const CONVERT: Topology = Topology {
    inputs: &[Slot::Stdin],
    outputs: &[Slot::Stdout],
};

/// Split: stdin -> stdout (left), extra#0 (right).
pub const SPLIT: Topology = Topology {
    inputs: &[Slot::Stdin],
    outputs: &[Slot::Stdout, Slot::Extra(0)],
};

/// Merge: stdin (primary), extra#0 (secondary) -> stdout.
pub const MERGE: Topology = Topology {
    inputs: &[Slot::Stdin, Slot::Extra(0)],
    outputs: &[Slot::Stdout],
};

impl OperationType {
    /// Channel topology implied by this operation.
    pub fn topology(self) -> &'static Topology {
        match self {
            OperationType::Convert => &CONVERT,
            OperationType::Split => &SPLIT,
            OperationType::Merge => &MERGE,
        }
    }
}

/// An extra pipe slot together with the logical channel it serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtraSlot {
    /// The child reads from this pipe; the parent keeps the write end
    Input { index: usize, slot: Slot },
    /// The child writes to this pipe; the parent keeps the read end
    Output { index: usize, slot: Slot },
}

impl ExtraSlot {
    pub fn slot(self) -> Slot {
        match self {
            ExtraSlot::Input { slot, .. } | ExtraSlot::Output { slot, .. } => slot,
        }
    }
}

impl Topology {
    /// Number of pipes needed beyond stdin/stdout.
    pub fn extra_count(&self) -> usize {
        self.inputs
            .iter()
            .chain(self.outputs.iter())
            .filter(|s| matches!(s, Slot::Extra(_)))
            .count()
    }

    /// Extra slots in attachment order (extra#0 first).
    pub fn extra_slots(&self) -> Vec<ExtraSlot> {
        let mut extras: Vec<ExtraSlot> = self
            .inputs
            .iter()
            .enumerate()
            .filter(|(_, s)| matches!(s, Slot::Extra(_)))
            .map(|(index, &slot)| ExtraSlot::Input { index, slot })
            .chain(
                self.outputs
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| matches!(s, Slot::Extra(_)))
                    .map(|(index, &slot)| ExtraSlot::Output { index, slot }),
            )
            .collect();
        extras.sort_by_key(|e| e.slot().child_fd());
        extras
    }

    /// Stream-mode endpoints for every input channel.
    pub fn input_endpoints(&self) -> Vec<Endpoint> {
        self.inputs.iter().map(|&s| Endpoint::Pipe(s)).collect()
    }

    /// Stream-mode endpoints for every output channel.
    pub fn output_endpoints(&self) -> Vec<Endpoint> {
        self.outputs.iter().map(|&s| Endpoint::Pipe(s)).collect()
    }
}

/// Where the transcoder reads or writes one logical channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Live pipe attached at a slot (stream mode)
    Pipe(Slot),
    /// Disk file (file mode)
    File(PathBuf),
}

impl Endpoint {
    pub fn file(path: impl AsRef<Path>) -> Self {
        Endpoint::File(path.as_ref().to_path_buf())
    }

    /// Whether the endpoint is a live stream that can stall or burst.
    pub fn is_stream(&self) -> bool {
        matches!(self, Endpoint::Pipe(_))
    }

    /// The positional argument naming this endpoint.
    pub fn target(&self) -> String {
        match self {
            Endpoint::Pipe(slot) => slot.pipe_url(),
            Endpoint::File(path) => path.to_string_lossy().into_owned(),
        }
    }
}
