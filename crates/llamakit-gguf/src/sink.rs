//! Output sinks for the writer.
//!
//! The writer never touches a file directly; it emits into a [`Sink`]. A real
//! session uses [`IoSink`] around any [`Write`]. A dry run uses
//! [`CountingSink`], which only advances a byte counter, or a discarding
//! [`IoSink`] when the destination type is fixed.

use std::io::{self, Write};

use crate::error::Result;
use crate::tensor::align_up;

/// A byte destination that knows how many bytes it has accepted.
pub trait Sink: Write {
    /// Bytes accepted so far.
    fn position(&self) -> u64;

    /// Whether bytes are discarded instead of stored.
    fn is_dry_run(&self) -> bool {
        false
    }
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn position(&self) -> u64 {
        (**self).position()
    }

    fn is_dry_run(&self) -> bool {
        (**self).is_dry_run()
    }
}

/// Forwards bytes to an inner writer and tracks the position.
#[derive(Debug)]
pub struct IoSink<W> {
    inner: W,
    position: u64,
    discard: bool,
}

impl<W: Write> IoSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, position: 0, discard: false }
    }

    /// Count bytes without forwarding them; `inner` is never written or
    /// flushed.
    pub fn discarding(inner: W) -> Self {
        Self { inner, position: 0, discard: true }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for IoSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = if self.discard { buf.len() } else { self.inner.write(buf)? };
        self.position += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.discard {
            return Ok(());
        }
        self.inner.flush()
    }
}

impl<W: Write> Sink for IoSink<W> {
    fn position(&self) -> u64 {
        self.position
    }

    fn is_dry_run(&self) -> bool {
        self.discard
    }
}

/// Discards bytes, counting them.
#[derive(Debug, Default, Clone, Copy)]
pub struct CountingSink {
    position: u64,
}

impl CountingSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Write for CountingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.position += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Sink for CountingSink {
    fn position(&self) -> u64 {
        self.position
    }

    fn is_dry_run(&self) -> bool {
        true
    }
}

const ZEROS: [u8; 256] = [0; 256];

/// Write zero bytes until the sink position is a multiple of `alignment`.
/// Returns the number of padding bytes written.
pub(crate) fn pad_to_alignment<S: Sink + ?Sized>(sink: &mut S, alignment: u64) -> Result<u64> {
    let pos = sink.position();
    let mut pad = align_up(pos, alignment) - pos;
    let written = pad;
    while pad > 0 {
        let n = pad.min(ZEROS.len() as u64) as usize;
        sink.write_all(&ZEROS[..n])?;
        pad -= n as u64;
    }
    Ok(written)
}
