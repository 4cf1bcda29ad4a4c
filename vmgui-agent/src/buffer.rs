//! Double-buffered shared frames.
//!
//! Rendering into the buffer the host is currently displaying produces
//! visible tearing; [`Buffer`] keeps a front and a back [`vmgui_shmem::ExportedFrame`]
//! and only swaps them (by re-announcing the new one via `WINDOW_DUMP`) once
//! a frame is complete.

use std::io;

/// A double-buffered window frame.
pub struct Buffer {
    front: vmgui_shmem::ExportedFrame,
    back: vmgui_shmem::ExportedFrame,
}

impl Buffer {
    pub(crate) fn new(
        exporter: &mut vmgui_shmem::FrameExporter,
        width: u32,
        height: u32,
    ) -> io::Result<Self> {
        let front = exporter.alloc_frame(width, height)?;
        let back = exporter.alloc_frame(width, height)?;
        Ok(Self { front, back })
    }

    /// The buffer not currently shown to the host; render into this one.
    pub fn back(&self) -> &vmgui_shmem::ExportedFrame {
        &self.back
    }

    /// The buffer last announced to the host via `WINDOW_DUMP`.
    pub fn front(&self) -> &vmgui_shmem::ExportedFrame {
        &self.front
    }

    /// Makes the back buffer the new front buffer.  The caller is still
    /// responsible for sending the resulting `WINDOW_DUMP`/`SHMIMAGE`
    /// messages; this only swaps which buffer each accessor returns.
    pub fn swap(&mut self) {
        std::mem::swap(&mut self.front, &mut self.back)
    }

    /// Width, in pixels, common to both buffers.
    pub fn width(&self) -> u32 {
        self.front.width()
    }

    /// Height, in pixels, common to both buffers.
    pub fn height(&self) -> u32 {
        self.front.height()
    }
}
