//! Single-pass byte stream with bounded look-ahead.
//!
//! [`ForwardStream`] wraps any [`Read`] and tracks a logical cursor that only
//! moves forward. A short look-ahead can be captured with
//! [`set_buffer_size`](ForwardStream::set_buffer_size) and replayed once with
//! [`rewind`](ForwardStream::rewind); the replayed bytes are delivered again
//! before live reads resume.
//!
//! All operations take `&self` and serialize on an internal lock, so several
//! pipeline stages of one entry can hold a reference to the same stream.

use std::io::{self, Read};
use std::sync::{Mutex, MutexGuard};

const DISCARD_CHUNK: usize = 4096;

struct State<R> {
    inner: R,
    /// Logical position: bytes delivered to callers minus bytes rewound.
    position: u64,
    /// Captured look-ahead bytes; `buf[pos..]` is still pending replay.
    buf: Vec<u8>,
    pos: usize,
    buffering: bool,
    /// Declared size of the current session, 0 when no session can be rewound.
    buffer_size: usize,
    session_start: u64,
}

impl<R: Read> State<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.pos < self.buf.len() {
            let n = out.len().min(self.buf.len() - self.pos);
            out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
            self.pos += n;
            self.position += n as u64;
            return Ok(n);
        }

        if !self.buffering && !self.buf.is_empty() {
            // replay finished, back to live reads
            self.buf.clear();
            self.pos = 0;
            self.buffer_size = 0;
        }

        let n = self.inner.read(out)?;
        if self.buffering {
            self.buf.extend_from_slice(&out[..n]);
            self.pos = self.buf.len();
            if self.buf.len() > self.buffer_size * 2 {
                log::warn!(
                    "look-ahead buffer holds {} bytes, declared size is {}",
                    self.buf.len(),
                    self.buffer_size
                );
            }
        }
        self.position += n as u64;
        Ok(n)
    }
}

/// Forward-only stream over a sequential source.
pub struct ForwardStream<R> {
    state: Mutex<State<R>>,
}

impl<R: Read> ForwardStream<R> {
    pub fn new(inner: R) -> Self {
        Self {
            state: Mutex::new(State {
                inner,
                position: 0,
                buf: Vec::new(),
                pos: 0,
                buffering: false,
                buffer_size: 0,
                session_start: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<R>> {
        self.state.lock().unwrap_or_else(|poisoned| {
            log::warn!("forward stream lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Current logical cursor.
    pub fn position(&self) -> u64 {
        self.lock().position
    }

    /// Returns true while a look-ahead session is capturing bytes.
    pub fn is_buffering(&self) -> bool {
        self.lock().buffering
    }

    /// Read into `buf`, replaying rewound bytes first.
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.lock().read(buf)
    }

    /// Skip up to `n` bytes. Returns how many were skipped; fewer than `n`
    /// means the source ended.
    pub fn discard(&self, n: u64) -> io::Result<u64> {
        let mut state = self.lock();
        let mut scratch = [0u8; DISCARD_CHUNK];
        let mut skipped = 0u64;
        while skipped < n {
            let want = (n - skipped).min(DISCARD_CHUNK as u64) as usize;
            match state.read(&mut scratch[..want]) {
                Ok(0) => break,
                Ok(read) => skipped += read as u64,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(skipped)
    }

    /// Advance the cursor to `offset`. Seeking backwards is rejected.
    pub fn seek(&self, offset: u64) -> io::Result<()> {
        let position = self.position();
        if offset < position {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot seek backwards from {position} to {offset}"),
            ));
        }
        let wanted = offset - position;
        let skipped = self.discard(wanted)?;
        if skipped < wanted {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("stream ended at {} while seeking to {offset}", position + skipped),
            ));
        }
        Ok(())
    }

    /// Start (`size > 0`) or stop (`size == 0`) a look-ahead session.
    ///
    /// # Panics
    ///
    /// Starting a session while one is active, or stopping when none is
    /// active, violates the stream contract and panics.
    pub fn set_buffer_size(&self, size: usize) {
        let mut state = self.lock();
        // Bytes already delivered can never be replayed again.
        let consumed = state.pos;
        state.buf.drain(..consumed);
        state.pos = 0;

        if size == 0 {
            assert!(state.buffering, "forward stream is not buffering");
            state.buffering = false;
            state.buffer_size = 0;
            log::trace!("look-ahead stopped at {}", state.position);
        } else {
            assert!(!state.buffering, "forward stream is already buffering");
            state.buffering = true;
            state.buffer_size = size;
            state.session_start = state.position;
            state.buf.reserve(size);
            log::trace!("look-ahead of {} bytes started at {}", size, state.position);
        }
    }

    /// Replay the current look-ahead session from its start.
    ///
    /// Ends the session: after the captured bytes have been delivered once
    /// more, reads continue from the live source.
    ///
    /// # Panics
    ///
    /// Panics if no look-ahead session is available to rewind.
    pub fn rewind(&self) {
        let mut state = self.lock();
        assert!(state.buffer_size > 0, "forward stream has no buffer to rewind");
        state.pos = 0;
        state.position = state.session_start;
        state.buffering = false;
        state.buffer_size = 0;
        log::trace!(
            "rewound {} buffered bytes to {}",
            state.buf.len(),
            state.position
        );
    }
}

impl<R: Read> Read for &ForwardStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        ForwardStream::read(self, buf)
    }
}

impl<R: Read> Read for ForwardStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        ForwardStream::read(self, buf)
    }
}

impl<R> std::fmt::Debug for ForwardStream<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.state.try_lock() {
            Ok(state) => f
                .debug_struct("ForwardStream")
                .field("position", &state.position)
                .field("buffering", &state.buffering)
                .field("buffered", &state.buf.len())
                .finish(),
            Err(_) => f.write_str("ForwardStream { <locked> }"),
        }
    }
}
