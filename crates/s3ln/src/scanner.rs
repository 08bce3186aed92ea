//! 📏 LineScanner — splits an async byte stream into lines, with a hard ceiling.
//!
//! The buffer starts at `initial_buffer_size` and doubles as long lines show up, up to
//! `max_buffer_size`. A line longer than the ceiling is an error, not a reason to eat
//! all the RAM on the box.
//!
//! Tokenizing rules:
//! - lines end at `\n`; a trailing `\r` is dropped (so `\r\n` files behave)
//! - the delimiter is not part of the line
//! - blank lines are lines
//! - a final line without a newline still counts, an empty tail does not
//! - a line whose content is exactly `max_buffer_size` bytes is fine, one more byte is not

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

// 📦 how big the buffer gets on its first growth spurt, if it started out tiny
const MIN_GROWTH: usize = 4096;

/// 💀 Why the scanner stopped early.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("token too long: line exceeds {limit} bytes")]
    TooLong { limit: usize },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// 📏 Line-at-a-time reader over any `AsyncRead`.
#[derive(Debug)]
pub struct LineScanner<R> {
    reader: R,
    buf: Vec<u8>,
    // start of the unconsumed bytes in `buf`
    pos: usize,
    max_buffer_size: usize,
    eof: bool,
}

impl<R: AsyncRead + Unpin> LineScanner<R> {
    /// 🚀 New scanner. `initial_buffer_size` is clamped to the ceiling.
    pub fn new(reader: R, initial_buffer_size: usize, max_buffer_size: usize) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(initial_buffer_size.min(max_buffer_size)),
            pos: 0,
            max_buffer_size,
            eof: false,
        }
    }

    /// 📄 The next line, `Ok(None)` at end of stream.
    ///
    /// After an error the scanner is done; calling again is allowed but pointless.
    pub async fn next_line(&mut self) -> Result<Option<String>, ScanError> {
        loop {
            let the_pending = &self.buf[self.pos..];

            if let Some(newline_at) = memchr::memchr(b'\n', the_pending) {
                let the_line = trim_cr(&the_pending[..newline_at]);
                if the_line.len() > self.max_buffer_size {
                    return Err(self.too_long());
                }
                let the_text = String::from_utf8_lossy(the_line).into_owned();
                self.pos += newline_at + 1;
                return Ok(Some(the_text));
            }

            // 🧠 no newline yet. `max + 1` leaves room for a `\r` that the `\n` will excuse.
            if the_pending.len() > self.max_buffer_size.saturating_add(1) {
                return Err(self.too_long());
            }

            if self.eof {
                if the_pending.is_empty() {
                    return Ok(None);
                }
                let the_line = trim_cr(the_pending);
                if the_line.len() > self.max_buffer_size {
                    return Err(self.too_long());
                }
                let the_text = String::from_utf8_lossy(the_line).into_owned();
                self.pos = self.buf.len();
                return Ok(Some(the_text));
            }

            self.fill().await?;
        }
    }

    /// 🔄 Compact, grow if needed, read more.
    async fn fill(&mut self) -> Result<(), ScanError> {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }

        // the ceiling for the buffer itself: a max-sized line plus `\r\n`
        let the_hard_cap = self.max_buffer_size.saturating_add(2);
        if self.buf.len() == self.buf.capacity() {
            let the_new_capacity = (self.buf.capacity() * 2)
                .max(MIN_GROWTH)
                .min(the_hard_cap)
                .max(self.buf.len() + 1);
            self.buf.reserve_exact(the_new_capacity - self.buf.len());
        }

        let the_room = self.buf.capacity() - self.buf.len();
        let the_read = (&mut self.reader)
            .take(the_room as u64)
            .read_buf(&mut self.buf)
            .await?;
        if the_read == 0 {
            self.eof = true;
        }
        Ok(())
    }

    fn too_long(&mut self) -> ScanError {
        // 🛑 poison the scanner so a second call doesn't pretend everything is fine
        self.buf.clear();
        self.pos = 0;
        self.eof = true;
        ScanError::TooLong {
            limit: self.max_buffer_size,
        }
    }

    /// 🔓 Give the reader back.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

fn trim_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}
