//! Extra pipe allocation and descriptor attachment
//!
//! Stdin and stdout come from the spawn primitive. Every other logical
//! channel gets an OS pipe: one end is remapped onto a fixed descriptor in
//! the child, the other stays with the parent as that channel's endpoint.
//! The descriptor numbers come from [`Topology`], the same table the argument
//! builder uses to spell `pipe:N`.
//!
//! All pipe ends are created close-on-exec, so the child only ever sees the
//! ends that are explicitly remapped for it.

use os_pipe::{PipeReader, PipeWriter};
use std::fs::File;
use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};
use tokio::net::unix::pipe;
use tokio::process::Command;

use crate::error::{EngineError, Result};
use crate::topology::{ExtraSlot, Topology};

/// A pipe end destined for the child.
#[derive(Debug)]
enum ChildEnd {
    Reader(PipeReader),
    Writer(PipeWriter),
}

impl AsRawFd for ChildEnd {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            ChildEnd::Reader(r) => r.as_raw_fd(),
            ChildEnd::Writer(w) => w.as_raw_fd(),
        }
    }
}

#[derive(Debug)]
struct Attachment {
    /// Descriptor number the child sees
    target: RawFd,
    end: ChildEnd,
}

/// Parent-owned ends keyed by logical channel index.
#[derive(Debug, Default)]
pub struct ParentEnds {
    pub inputs: Vec<(usize, PipeWriter)>,
    pub outputs: Vec<(usize, PipeReader)>,
}

/// Pipes for one stream-mode invocation, before and around spawn.
#[derive(Debug)]
pub struct ChannelWiring {
    attachments: Vec<Attachment>,
    parent: ParentEnds,
}

impl ChannelWiring {
    /// Allocate every extra pipe `topology` needs.
    ///
    /// On failure the pipes allocated so far are closed when the partial
    /// state is dropped.
    pub fn allocate(topology: &Topology) -> Result<Self> {
        let mut wiring = Self {
            attachments: Vec::with_capacity(topology.extra_count()),
            parent: ParentEnds::default(),
        };

        for extra in topology.extra_slots() {
            let (reader, writer) = os_pipe::pipe().map_err(EngineError::Pipe)?;
            let target = extra.slot().child_fd();
            match extra {
                ExtraSlot::Input { index, .. } => {
                    wiring.attachments.push(Attachment {
                        target,
                        end: ChildEnd::Reader(reader),
                    });
                    wiring.parent.inputs.push((index, writer));
                }
                ExtraSlot::Output { index, .. } => {
                    wiring.attachments.push(Attachment {
                        target,
                        end: ChildEnd::Writer(writer),
                    });
                    wiring.parent.outputs.push((index, reader));
                }
            }
            tracing::trace!(fd = target, ?extra, "allocated extra pipe");
        }

        Ok(wiring)
    }

    /// Descriptor numbers that will be attached in the child, in order.
    pub fn child_targets(&self) -> Vec<RawFd> {
        self.attachments.iter().map(|a| a.target).collect()
    }

    /// Number of child-owned ends still open in the parent.
    pub fn open_child_ends(&self) -> usize {
        self.attachments.len()
    }

    /// Arrange for the child-owned ends to appear at their target descriptors.
    pub fn attach(&self, cmd: &mut Command) {
        if self.attachments.is_empty() {
            return;
        }
        let mappings: Vec<(RawFd, RawFd)> = self
            .attachments
            .iter()
            .map(|a| (a.end.as_raw_fd(), a.target))
            .collect();
        let floor = mappings.iter().map(|&(_, t)| t).max().unwrap_or(2) + 1;
        let mut staged: Vec<RawFd> = vec![-1; mappings.len()];

        // SAFETY: the hook runs in the forked child before exec. It only calls
        // fcntl and dup2, which are async-signal-safe, and writes into
        // `staged` without reallocating it.
        unsafe {
            cmd.pre_exec(move || remap_fds(&mappings, &mut staged, floor));
        }
    }

    /// Close the parent's copies of the child-owned ends.
    pub fn release_child_ends(&mut self) {
        if !self.attachments.is_empty() {
            tracing::trace!(count = self.attachments.len(), "closing child-owned pipe ends");
        }
        self.attachments.clear();
    }

    pub fn into_parent_ends(self) -> ParentEnds {
        self.parent
    }
}

/// Place each source descriptor at its target, clearing close-on-exec.
///
/// Sources are first duplicated above every target so that a `dup2` onto one
/// target cannot clobber a source that has not been placed yet.
fn remap_fds(mappings: &[(RawFd, RawFd)], staged: &mut [RawFd], floor: RawFd) -> io::Result<()> {
    for (slot, &(source, _)) in staged.iter_mut().zip(mappings) {
        let fd = unsafe { libc::fcntl(source, libc::F_DUPFD_CLOEXEC, floor) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        *slot = fd;
    }
    for (&fd, &(_, target)) in staged.iter().zip(mappings) {
        if unsafe { libc::dup2(fd, target) } < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Register a parent-owned write end with the runtime.
///
/// Must be called from within a Tokio runtime.
pub fn async_writer(writer: PipeWriter) -> io::Result<pipe::Sender> {
    // SAFETY: into_raw_fd hands over sole ownership of the descriptor.
    let file = unsafe { File::from_raw_fd(writer.into_raw_fd()) };
    pipe::Sender::from_file(file)
}

/// Register a parent-owned read end with the runtime.
///
/// Must be called from within a Tokio runtime.
pub fn async_reader(reader: PipeReader) -> io::Result<pipe::Receiver> {
    // SAFETY: into_raw_fd hands over sole ownership of the descriptor.
    let file = unsafe { File::from_raw_fd(reader.into_raw_fd()) };
    pipe::Receiver::from_file(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::OperationType;
    use crate::formats::{build_args, AudioFormat, BuildOptions, ChannelSpec, OperationDescriptor};
    use crate::topology::{CONVERT, MERGE, SPLIT};
    use std::process::Stdio;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_convert_needs_no_pipes() {
        let wiring = ChannelWiring::allocate(&CONVERT).unwrap();
        assert!(wiring.child_targets().is_empty());
        let ends = wiring.into_parent_ends();
        assert!(ends.inputs.is_empty());
        assert!(ends.outputs.is_empty());
    }

    #[test]
    fn test_split_keeps_read_end_as_output_one() {
        let wiring = ChannelWiring::allocate(&SPLIT).unwrap();
        assert_eq!(wiring.child_targets(), vec![3]);
        let ends = wiring.into_parent_ends();
        assert!(ends.inputs.is_empty());
        assert_eq!(ends.outputs.len(), 1);
        assert_eq!(ends.outputs[0].0, 1);
    }

    #[test]
    fn test_merge_keeps_write_end_as_input_one() {
        let wiring = ChannelWiring::allocate(&MERGE).unwrap();
        assert_eq!(wiring.child_targets(), vec![3]);
        let ends = wiring.into_parent_ends();
        assert!(ends.outputs.is_empty());
        assert_eq!(ends.inputs.len(), 1);
        assert_eq!(ends.inputs[0].0, 1);
    }

    #[test]
    fn test_release_closes_child_ends() {
        let mut wiring = ChannelWiring::allocate(&SPLIT).unwrap();
        assert_eq!(wiring.open_child_ends(), 1);
        wiring.release_child_ends();
        assert_eq!(wiring.open_child_ends(), 0);
        wiring.release_child_ends();
        assert_eq!(wiring.open_child_ends(), 0);
    }

    /// Every extra `pipe:N` the builder emits must be a descriptor the
    /// wiring attaches, and vice versa.
    #[test]
    fn test_builder_and_wiring_agree_on_descriptors() {
        let spec = ChannelSpec::new(AudioFormat::S16le, 8000, 2);
        let mono = ChannelSpec::new(AudioFormat::S16le, 8000, 1);
        for op in [OperationType::Convert, OperationType::Split, OperationType::Merge] {
            let desc = OperationDescriptor {
                op_type: op,
                inputs: vec![if op == OperationType::Split { spec } else { mono }],
                outputs: vec![mono],
                ..Default::default()
            };
            desc.validate().unwrap();
            let topology = op.topology();
            let args = build_args(
                &desc,
                &topology.input_endpoints(),
                &topology.output_endpoints(),
                &BuildOptions::for_stream(&Default::default()),
            )
            .unwrap();
            let mut referenced: Vec<RawFd> = args
                .iter()
                .filter_map(|a| a.strip_prefix("pipe:"))
                .filter_map(|n| n.parse().ok())
                .filter(|&fd: &RawFd| fd > 2)
                .collect();
            referenced.sort_unstable();

            let wiring = ChannelWiring::allocate(topology).unwrap();
            assert_eq!(referenced, wiring.child_targets(), "{}", op);
        }
    }

    #[tokio::test]
    async fn test_output_pipe_reaches_child_fd3() {
        let mut wiring = ChannelWiring::allocate(&SPLIT).unwrap();
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg("printf right >&3")
            .stdin(Stdio::null())
            .stdout(Stdio::null());
        wiring.attach(&mut cmd);
        let mut child = cmd.spawn().unwrap();
        drop(cmd);
        wiring.release_child_ends();

        let (index, reader) = wiring.into_parent_ends().outputs.pop().unwrap();
        assert_eq!(index, 1);
        let mut rx = async_reader(reader).unwrap();
        let mut out = String::new();
        // EOF only arrives once no write end is left open in the parent
        tokio::time::timeout(Duration::from_secs(10), rx.read_to_string(&mut out))
            .await
            .expect("read hung; parent still holds the child's write end")
            .unwrap();
        assert_eq!(out, "right");
        assert!(child.wait().await.unwrap().success());
    }

    #[tokio::test]
    async fn test_input_pipe_reaches_child_fd3() {
        let mut wiring = ChannelWiring::allocate(&MERGE).unwrap();
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg("cat <&3")
            .stdin(Stdio::null())
            .stdout(Stdio::piped());
        wiring.attach(&mut cmd);
        let mut child = cmd.spawn().unwrap();
        drop(cmd);
        wiring.release_child_ends();

        let (index, writer) = wiring.into_parent_ends().inputs.pop().unwrap();
        assert_eq!(index, 1);
        let mut tx = async_writer(writer).unwrap();
        tx.write_all(b"secondary").await.unwrap();
        drop(tx);

        let mut stdout = child.stdout.take().unwrap();
        let mut out = String::new();
        tokio::time::timeout(Duration::from_secs(10), stdout.read_to_string(&mut out))
            .await
            .expect("child never saw EOF on fd 3")
            .unwrap();
        assert_eq!(out, "secondary");
        assert!(child.wait().await.unwrap().success());
    }
}
