//! The graphics context, as the replay loop sees it.
//!
//! The replay loop needs very little from the context: it flushes, checks the
//! error flag, reads back the framebuffer, presents, and occasionally dumps
//! state. These traits cover exactly that, so the loop can run against the
//! headless `soft::SoftContext` or any context a host adapts to them.
//!
//! As with `gleam::gl::Gl`, all methods take `&self`: a context is a handle to
//! state that lives elsewhere.

use gleam::gl::{self, GLenum};
use serde_json::Value;
use std::fmt;

pub trait Pipeline {
    /// Push all pending commands to the GPU.
    fn flush(&self);

    /// Return and clear the context's error flag, as `glGetError` does.
    fn get_error(&self) -> GLenum;

    /// Fill `dst` with the RGBA8 contents of the lower-left `width`×`height`
    /// rectangle of the buffer currently being drawn to, bottom row first.
    fn read_pixels(&self, width: u32, height: u32, dst: &mut [u8]);

    /// Return a description of the context's state, for diagnostics.
    fn state(&self) -> Value;
}

/// A surface that can be presented.
pub trait Drawable {
    /// Present the back buffer. Only meaningful for double-buffered visuals.
    fn swap_buffers(&self);
}

pub trait WindowSystem {
    /// Handle pending window-system events. Return false once the window has
    /// been closed and there is nothing left to wait for.
    fn process_events(&self) -> bool;
}

// Not all of these are in the core profile bindings.
const STACK_OVERFLOW: GLenum = 0x0503;
const STACK_UNDERFLOW: GLenum = 0x0504;
const TABLE_TOO_LARGE: GLenum = 0x8031;

static ERROR_NAMES: &[(GLenum, &str)] = &[
    (gl::INVALID_ENUM, "GL_INVALID_ENUM"),
    (gl::INVALID_VALUE, "GL_INVALID_VALUE"),
    (gl::INVALID_OPERATION, "GL_INVALID_OPERATION"),
    (STACK_OVERFLOW, "GL_STACK_OVERFLOW"),
    (STACK_UNDERFLOW, "GL_STACK_UNDERFLOW"),
    (gl::OUT_OF_MEMORY, "GL_OUT_OF_MEMORY"),
    (gl::INVALID_FRAMEBUFFER_OPERATION, "GL_INVALID_FRAMEBUFFER_OPERATION"),
    (TABLE_TOO_LARGE, "GL_TABLE_TOO_LARGE"),
];

/// A value returned by `glGetError`.
///
/// Displays as the error's symbolic name, or as the bare number if it's not
/// one we recognize.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GlError(pub GLenum);

impl GlError {
    pub fn name(self) -> Option<&'static str> {
        ERROR_NAMES
            .iter()
            .find(|&&(code, _)| code == self.0)
            .map(|&(_, name)| name)
    }
}

impl fmt::Display for GlError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self.name() {
            Some(name) => fmt.write_str(name),
            None => write!(fmt, "{}", self.0),
        }
    }
}

/// Capabilities that `glEnable` and `glDisable` accept, and that state dumps
/// report.
pub(crate) static CAPABILITIES: &[(GLenum, &str)] = &[
    (gl::BLEND, "GL_BLEND"),
    (gl::CULL_FACE, "GL_CULL_FACE"),
    (gl::DEPTH_TEST, "GL_DEPTH_TEST"),
    (gl::SCISSOR_TEST, "GL_SCISSOR_TEST"),
];

#[test]
fn test_error_names() {
    assert_eq!(GlError(gl::INVALID_ENUM).to_string(), "GL_INVALID_ENUM");
    assert_eq!(GlError(gl::INVALID_OPERATION).to_string(), "GL_INVALID_OPERATION");
    assert_eq!(GlError(0x0503).to_string(), "GL_STACK_OVERFLOW");
    assert_eq!(GlError(0x8031).to_string(), "GL_TABLE_TOO_LARGE");
    assert_eq!(
        GlError(gl::INVALID_FRAMEBUFFER_OPERATION).name(),
        Some("GL_INVALID_FRAMEBUFFER_OPERATION")
    );

    // Unrecognized codes print as plain decimal numbers.
    assert_eq!(GlError(0x1234).name(), None);
    assert_eq!(GlError(0x1234).to_string(), "4660");
}
