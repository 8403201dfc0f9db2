//! Sequential flash programming with a scoped write handle

use log::warn;

use crate::error::{FinishError, FlashError, OtaError};
use crate::partition::PartitionDescriptor;

/// Platform flash programming primitives.
///
/// A handle returned by `begin` is exclusive to one partition and must be
/// handed back exactly once, to either `finish` or `abort`.
pub trait FlashWriter {
    type Handle;

    fn begin(&mut self, target: &PartitionDescriptor) -> Result<Self::Handle, FlashError>;

    /// Append `chunk` at the handle's current offset.
    fn write(&mut self, handle: &mut Self::Handle, chunk: &[u8]) -> Result<(), FlashError>;

    /// Close the handle and validate the whole written image.
    fn finish(&mut self, handle: Self::Handle) -> Result<(), FinishError>;

    fn abort(&mut self, handle: Self::Handle);
}

/// An open write session against one partition.
///
/// Dropping the writer while the handle is still open aborts it, so every
/// early return releases the handle.
pub struct StreamingWriter<'a, W: FlashWriter> {
    flash: &'a mut W,
    handle: Option<W::Handle>,
    written: usize,
    expected: usize,
}

impl<'a, W: FlashWriter> StreamingWriter<'a, W> {
    pub fn begin(
        flash: &'a mut W,
        target: &PartitionDescriptor,
        expected: usize,
    ) -> Result<Self, OtaError> {
        let handle = flash.begin(target).map_err(OtaError::BeginFailed)?;
        Ok(Self { flash, handle: Some(handle), written: 0, expected })
    }

    /// Program `chunk` and return the cumulative number of bytes written.
    pub fn write(&mut self, chunk: &[u8]) -> Result<usize, OtaError> {
        if chunk.len() > self.remaining() {
            return Err(OtaError::Overrun { expected: self.expected });
        }
        let Some(handle) = self.handle.as_mut() else {
            return Err(OtaError::FlashWriteFailed {
                offset: self.written,
                source: FlashError::Other("write handle already released".into()),
            });
        };
        self.flash
            .write(handle, chunk)
            .map_err(|source| OtaError::FlashWriteFailed { offset: self.written, source })?;
        self.written += chunk.len();
        Ok(self.written)
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn remaining(&self) -> usize {
        self.expected - self.written
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Hand the handle to the driver for closing and image validation.
    ///
    /// The handle is released whatever the outcome.
    pub(crate) fn close(&mut self) -> Result<(), FinishError> {
        match self.handle.take() {
            Some(handle) => self.flash.finish(handle),
            None => Err(FinishError::Flash(FlashError::Other(
                "write handle already released".into(),
            ))),
        }
    }

    pub fn abort(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            warn!("Aborting OTA write after {} / {} bytes", self.written, self.expected);
            self.flash.abort(handle);
        }
    }
}

impl<W: FlashWriter> Drop for StreamingWriter<'_, W> {
    fn drop(&mut self) {
        self.release();
    }
}
