use crate::foundation::error::{TesseraError, TesseraResult};
use crate::host_impl::frame::CompositorFrame;

/// The drawing destination frames are swapped to.
pub trait OutputSurface {
    /// Attach to the compositor. An error leaves the compositor without a surface.
    fn bind_to_client(&mut self) -> TesseraResult<()>;

    fn swap_buffers(&mut self, frame: CompositorFrame);

    /// Block until every swapped frame has been consumed.
    fn finish(&mut self) {}
}

/// An output surface that keeps frames in memory instead of presenting them.
#[derive(Debug, Default)]
pub struct HeadlessOutputSurface {
    fail_bind: bool,
    bound: bool,
    frames: Vec<CompositorFrame>,
}

impl HeadlessOutputSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// A surface whose `bind_to_client` fails, as a lost GPU context would.
    pub fn failing() -> Self {
        Self {
            fail_bind: true,
            ..Self::default()
        }
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }

    pub fn frames(&self) -> &[CompositorFrame] {
        &self.frames
    }
}

impl OutputSurface for HeadlessOutputSurface {
    fn bind_to_client(&mut self) -> TesseraResult<()> {
        if self.fail_bind {
            return Err(TesseraError::output_surface("context creation failed"));
        }
        self.bound = true;
        Ok(())
    }

    fn swap_buffers(&mut self, frame: CompositorFrame) {
        tracing::trace!(frame = frame.frame_number.0, quads = frame.quads.len(), "swap");
        self.frames.push(frame);
    }
}
