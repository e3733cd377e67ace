//! Byte sinks for tracing-subscriber
//!
//! The fmt layer formats each event into one buffer and hands it to the
//! writer in a single `write_all`, so one event maps to one sink write and is
//! never split across a rotation.

use std::io;
use std::sync::Arc;

use tracing_subscriber::fmt::MakeWriter;

use crate::error::RotateError;
use crate::rotation::RotatingFile;

/// Destination for formatted log bytes
pub trait Sink: Send + Sync {
    fn write(&self, buf: &[u8]) -> io::Result<usize>;

    fn flush(&self) -> io::Result<()>;

    /// Flush and release the destination; later writes fail
    fn close(&self) -> Result<(), RotateError>;
}

impl Sink for RotatingFile {
    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        RotatingFile::write(self, buf)
    }

    fn flush(&self) -> io::Result<()> {
        RotatingFile::flush(self)
    }

    fn close(&self) -> Result<(), RotateError> {
        RotatingFile::close(self)
    }
}

/// Shared handle that turns a [`Sink`] into an `io::Write` / `MakeWriter`
pub struct SinkWriter<S: ?Sized> {
    sink: Arc<S>,
}

impl<S: Sink + ?Sized> SinkWriter<S> {
    pub fn new(sink: Arc<S>) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &Arc<S> {
        &self.sink
    }
}

impl<S: ?Sized> Clone for SinkWriter<S> {
    fn clone(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
        }
    }
}

impl<S: Sink + ?Sized> io::Write for SinkWriter<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sink.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

impl<'a, S: Sink + ?Sized + 'a> MakeWriter<'a> for SinkWriter<S> {
    type Writer = SinkWriter<S>;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
