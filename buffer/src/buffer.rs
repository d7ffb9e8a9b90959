use std::io;

/// A fixed-capacity FIFO byte buffer used for connection read/write staging.
///
/// Unlike a ring buffer, bytes are kept contiguous at offset 0 and compacted on
/// `move_head`; connection buffers here are bounded at 1024 bytes (see
/// `DEFAULT_CAPACITY`), so the occasional `copy_within` is cheaper than the
/// bookkeeping a true deque would need for buffers this small.
pub struct Buffer {
    data: Vec<u8>,
    len: usize,
    cap: usize,
}

/// Default per-connection read/write buffer size.
pub const DEFAULT_CAPACITY: usize = 1024;

impl Buffer {
    #[inline]
    pub fn new(cap: usize) -> Buffer {
        Buffer {
            data: vec![0u8; cap],
            len: 0,
            cap,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Remaining free capacity in the buffer.
    #[inline]
    pub fn free_capacity(&self) -> usize {
        self.cap - self.len
    }

    /// Slice containing the buffered data.
    #[inline]
    pub fn read_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Mutable slice covering the free capacity, for writing new data in.
    #[inline]
    pub fn write_slice(&mut self) -> &mut [u8] {
        &mut self.data[self.len..self.cap]
    }

    /// Advance the tail after bytes were written into `write_slice`.
    #[inline]
    pub fn move_tail(&mut self, count: usize) {
        self.len += count;
    }

    /// Discard `count` bytes from the front, compacting the remainder to offset 0.
    #[inline]
    pub fn move_head(&mut self, count: usize) {
        self.data.copy_within(count..self.len, 0);
        self.len -= count;
    }

    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Copy `buf` into the buffer if it fits, committing the write atomically.
    /// Leaves the buffer unchanged and returns `false` on overrun.
    #[inline]
    pub fn try_push(&mut self, buf: &[u8]) -> bool {
        if buf.len() > self.free_capacity() {
            return false;
        }
        self.write_slice()[..buf.len()].copy_from_slice(buf);
        self.move_tail(buf.len());
        true
    }

    /// Write the buffered contents to `writer`, advancing the head as bytes are consumed.
    #[inline]
    pub fn egress<W: io::Write>(&mut self, mut writer: W) -> io::Result<usize> {
        let orig_len = self.len;

        while self.len > 0 {
            let write_count = writer.write(self.read_slice())?;

            if write_count == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }

            self.move_head(write_count);
        }

        Ok(orig_len)
    }

    /// Read from `reader` into the buffer until it would block or the buffer fills.
    /// Returns `Err(Other("Buffer overrun"))` if the peer has more to send than fits.
    #[inline]
    pub fn ingress<R: io::Read>(&mut self, mut reader: R) -> io::Result<usize> {
        let orig_free = self.free_capacity();

        while self.len < self.cap {
            let read_count = reader.read(self.write_slice())?;

            if read_count == 0 {
                return Ok(orig_free - self.free_capacity());
            }

            self.move_tail(read_count);
        }

        Err(io::Error::new(io::ErrorKind::Other, "Buffer overrun"))
    }
}
