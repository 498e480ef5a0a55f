//! Bounded trailing capture of the transcoder's stderr
//!
//! A fixed-capacity ring: writes overwrite the oldest bytes in place once the
//! buffer is full, and [`TailBuffer::snapshot`] returns the retained bytes in
//! arrival order.

use bytes::Bytes;
use std::io::Write;

pub struct TailBuffer {
    buffer: Box<[u8]>,
    /// Index of the oldest retained byte
    start: usize,
    len: usize,
}

impl TailBuffer {
    /// Create a tail buffer retaining at most `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0u8; capacity].into_boxed_slice(),
            start: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append `data`, evicting the oldest bytes when over capacity.
    pub fn push(&mut self, mut data: &[u8]) {
        let cap = self.capacity();
        if cap == 0 || data.is_empty() {
            return;
        }
        if data.len() >= cap {
            data = &data[data.len() - cap..];
            self.start = 0;
            self.len = 0;
        }

        let write_pos = (self.start + self.len) % cap;
        let first = data.len().min(cap - write_pos);
        self.buffer[write_pos..write_pos + first].copy_from_slice(&data[..first]);
        self.buffer[..data.len() - first].copy_from_slice(&data[first..]);

        let new_len = self.len + data.len();
        if new_len > cap {
            self.start = (self.start + new_len - cap) % cap;
            self.len = cap;
        } else {
            self.len = new_len;
        }
    }

    /// Copy of the retained bytes, oldest first.
    pub fn snapshot(&self) -> Bytes {
        let cap = self.capacity();
        let end = self.start + self.len;
        if end <= cap {
            Bytes::copy_from_slice(&self.buffer[self.start..end])
        } else {
            let mut out = Vec::with_capacity(self.len);
            out.extend_from_slice(&self.buffer[self.start..]);
            out.extend_from_slice(&self.buffer[..end - cap]);
            Bytes::from(out)
        }
    }

    /// Retained bytes as (lossy) UTF-8, trimmed of trailing whitespace.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.snapshot()).trim_end().to_string()
    }
}

impl Write for TailBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.push(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for TailBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TailBuffer")
            .field("capacity", &self.capacity())
            .field("len", &self.len)
            .finish()
    }
}
