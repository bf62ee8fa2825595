//! A headless software context.
//!
//! `SoftContext` keeps its framebuffers in memory, so traces can be replayed
//! and snapshotted without a display or a GPU driver. It only implements the
//! handful of operations `dispatch::SoftDispatcher` knows how to replay:
//! clears (honoring the scissor test), viewport and scissor state, capability
//! toggles and immediate-mode brackets. It does keep GL's error discipline for
//! those, so replaying a bad trace produces the same `glGetError` warnings a
//! real driver would.
//!
//! Framebuffer rows are stored bottom row first, as GL addresses them.

use gleam::gl::{self, GLbitfield, GLenum, GLint, GLsizei};
use serde_json::{json, Map, Value};
use std::cell::RefCell;

use crate::context::{Drawable, Pipeline, WindowSystem, CAPABILITIES};

pub struct SoftContext {
    width: u32,
    height: u32,
    double_buffered: bool,
    state: RefCell<State>,
}

struct State {
    front: Vec<u8>,
    back: Vec<u8>,
    clear_color: [f32; 4],
    viewport: [GLint; 4],
    scissor_box: [GLint; 4],
    enabled: Vec<GLenum>,
    inside_begin_end: bool,
    error: GLenum,
}

impl State {
    /// Record `error`, unless an earlier error is still pending.
    fn set_error(&mut self, error: GLenum) {
        if self.error == gl::NO_ERROR {
            self.error = error;
        }
    }

    /// Most calls are forbidden between `glBegin` and `glEnd`. If we're in
    /// such a bracket, flag the error and return true.
    fn forbidden_in_begin_end(&mut self) -> bool {
        if self.inside_begin_end {
            self.set_error(gl::INVALID_OPERATION);
        }
        self.inside_begin_end
    }

    fn is_enabled(&self, cap: GLenum) -> bool {
        self.enabled.contains(&cap)
    }
}

impl SoftContext {
    /// Create a context with a `width`×`height` drawable, already current.
    pub fn new(width: u32, height: u32, double_buffered: bool) -> SoftContext {
        let size = width as usize * height as usize * 4;
        let (w, h) = (width as GLint, height as GLint);
        SoftContext {
            width,
            height,
            double_buffered,
            state: RefCell::new(State {
                front: vec![0; size],
                back: vec![0; size],
                clear_color: [0.0; 4],
                viewport: [0, 0, w, h],
                scissor_box: [0, 0, w, h],
                enabled: Vec::new(),
                inside_begin_end: false,
                error: gl::NO_ERROR,
            }),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_double_buffered(&self) -> bool {
        self.double_buffered
    }

    pub fn clear_color(&self, r: f32, g: f32, b: f32, a: f32) {
        let mut state = self.state.borrow_mut();
        if state.forbidden_in_begin_end() {
            return;
        }
        state.clear_color = [r, g, b, a].map(|c| c.max(0.0).min(1.0));
    }

    pub fn clear(&self, mask: GLbitfield) {
        let mut state = self.state.borrow_mut();
        if state.forbidden_in_begin_end() {
            return;
        }
        let known = gl::COLOR_BUFFER_BIT | gl::DEPTH_BUFFER_BIT | gl::STENCIL_BUFFER_BIT;
        if mask & !known != 0 {
            state.set_error(gl::INVALID_VALUE);
            return;
        }
        if mask & gl::COLOR_BUFFER_BIT == 0 {
            // No depth or stencil buffers to clear.
            return;
        }

        let [r, g, b, a] = state.clear_color;
        let pixel = [r, g, b, a].map(|c| (c * 255.0).round() as u8);

        // Clip the cleared region to the scissor box, if enabled.
        let (mut x0, mut y0, mut x1, mut y1) = (0, 0, self.width as i64, self.height as i64);
        if state.is_enabled(gl::SCISSOR_TEST) {
            let [sx, sy, sw, sh] = state.scissor_box;
            x0 = x0.max(sx as i64);
            y0 = y0.max(sy as i64);
            x1 = x1.min(sx as i64 + sw as i64);
            y1 = y1.min(sy as i64 + sh as i64);
        }
        if x0 >= x1 || y0 >= y1 {
            return;
        }

        let stride = self.width as usize * 4;
        let buffer = self.draw_buffer(&mut state);
        for y in y0 as usize..y1 as usize {
            let row = &mut buffer[y * stride..(y + 1) * stride];
            for dst in row[x0 as usize * 4..x1 as usize * 4].chunks_mut(4) {
                dst.copy_from_slice(&pixel);
            }
        }
    }

    pub fn viewport(&self, x: GLint, y: GLint, width: GLsizei, height: GLsizei) {
        let mut state = self.state.borrow_mut();
        if state.forbidden_in_begin_end() {
            return;
        }
        if width < 0 || height < 0 {
            state.set_error(gl::INVALID_VALUE);
            return;
        }
        state.viewport = [x, y, width, height];
    }

    pub fn scissor(&self, x: GLint, y: GLint, width: GLsizei, height: GLsizei) {
        let mut state = self.state.borrow_mut();
        if state.forbidden_in_begin_end() {
            return;
        }
        if width < 0 || height < 0 {
            state.set_error(gl::INVALID_VALUE);
            return;
        }
        state.scissor_box = [x, y, width, height];
    }

    pub fn enable(&self, cap: GLenum) {
        self.set_capability(cap, true);
    }

    pub fn disable(&self, cap: GLenum) {
        self.set_capability(cap, false);
    }

    fn set_capability(&self, cap: GLenum, on: bool) {
        let mut state = self.state.borrow_mut();
        if state.forbidden_in_begin_end() {
            return;
        }
        if !CAPABILITIES.iter().any(|&(known, _)| known == cap) {
            state.set_error(gl::INVALID_ENUM);
            return;
        }
        state.enabled.retain(|&c| c != cap);
        if on {
            state.enabled.push(cap);
        }
    }

    pub fn begin(&self, _mode: GLenum) {
        let mut state = self.state.borrow_mut();
        if !state.forbidden_in_begin_end() {
            state.inside_begin_end = true;
        }
    }

    pub fn end(&self) {
        let mut state = self.state.borrow_mut();
        if state.inside_begin_end {
            state.inside_begin_end = false;
        } else {
            state.set_error(gl::INVALID_OPERATION);
        }
    }

    pub fn finish(&self) {
        self.state.borrow_mut().forbidden_in_begin_end();
    }

    /// Return the buffer being rendered to: the back buffer if we have one.
    fn draw_buffer<'s>(&self, state: &'s mut State) -> &'s mut Vec<u8> {
        if self.double_buffered {
            &mut state.back
        } else {
            &mut state.front
        }
    }
}

impl Pipeline for SoftContext {
    fn flush(&self) {
        self.state.borrow_mut().forbidden_in_begin_end();
    }

    fn get_error(&self) -> GLenum {
        std::mem::replace(&mut self.state.borrow_mut().error, gl::NO_ERROR)
    }

    fn read_pixels(&self, width: u32, height: u32, dst: &mut [u8]) {
        let mut state = self.state.borrow_mut();
        let src_stride = self.width as usize * 4;
        let dst_stride = width as usize * 4;
        let copy = src_stride.min(dst_stride);
        let rows = self.height.min(height) as usize;
        let src = self.draw_buffer(&mut state);
        for y in 0..rows {
            dst[y * dst_stride..y * dst_stride + copy]
                .copy_from_slice(&src[y * src_stride..y * src_stride + copy]);
        }
    }

    fn state(&self) -> Value {
        let state = self.state.borrow();
        let mut parameters = Map::new();
        parameters.insert("GL_RENDERER".to_owned(), json!("glretrace software context"));
        parameters.insert("GL_VIEWPORT".to_owned(), json!(state.viewport));
        parameters.insert("GL_SCISSOR_BOX".to_owned(), json!(state.scissor_box));
        parameters.insert("GL_COLOR_CLEAR_VALUE".to_owned(), json!(state.clear_color));
        parameters.insert("GL_DOUBLEBUFFER".to_owned(), json!(self.double_buffered));
        for &(cap, key) in CAPABILITIES {
            parameters.insert(key.to_owned(), json!(state.is_enabled(cap)));
        }
        json!({ "parameters": parameters })
    }
}

impl Drawable for SoftContext {
    fn swap_buffers(&self) {
        if self.double_buffered {
            let mut state = self.state.borrow_mut();
            let State { front, back, .. } = &mut *state;
            std::mem::swap(front, back);
        }
    }
}

impl WindowSystem for SoftContext {
    /// There is no window, so nobody will ever close it: don't wait.
    fn process_events(&self) -> bool {
        false
    }
}

#[cfg(test)]
fn pixel_at(context: &SoftContext, x: u32, y: u32) -> [u8; 4] {
    let mut pixels = vec![0; (context.width() * context.height() * 4) as usize];
    context.read_pixels(context.width(), context.height(), &mut pixels);
    let i = ((y * context.width() + x) * 4) as usize;
    [pixels[i], pixels[i + 1], pixels[i + 2], pixels[i + 3]]
}

#[test]
fn test_clear_with_scissor() {
    let context = SoftContext::new(8, 8, false);
    context.clear_color(1.0, 0.0, 0.0, 1.0);
    context.clear(gl::COLOR_BUFFER_BIT);
    assert_eq!(pixel_at(&context, 0, 0), [255, 0, 0, 255]);

    context.clear_color(0.0, 0.0, 1.0, 1.0);
    context.scissor(2, 2, 2, 2);
    context.enable(gl::SCISSOR_TEST);
    context.clear(gl::COLOR_BUFFER_BIT | gl::DEPTH_BUFFER_BIT);
    assert_eq!(pixel_at(&context, 2, 3), [0, 0, 255, 255]);
    assert_eq!(pixel_at(&context, 4, 3), [255, 0, 0, 255]);
    assert_eq!(pixel_at(&context, 1, 1), [255, 0, 0, 255]);

    assert_eq!(context.get_error(), gl::NO_ERROR);
}

#[test]
fn test_double_buffering() {
    let context = SoftContext::new(4, 4, true);
    context.clear_color(0.0, 1.0, 0.0, 1.0);
    context.clear(gl::COLOR_BUFFER_BIT);

    // Reads come from the buffer being drawn to.
    assert_eq!(pixel_at(&context, 1, 1), [0, 255, 0, 255]);

    // After a swap, the freshly presented frame is in front, and we're
    // drawing into the stale one.
    context.swap_buffers();
    assert_eq!(pixel_at(&context, 1, 1), [0, 0, 0, 0]);
    context.swap_buffers();
    assert_eq!(pixel_at(&context, 1, 1), [0, 255, 0, 255]);
}

#[test]
fn test_errors() {
    let context = SoftContext::new(4, 4, false);
    assert_eq!(context.get_error(), gl::NO_ERROR);

    context.viewport(0, 0, -1, 4);
    context.enable(0xdead);
    // The first error sticks until it's read.
    assert_eq!(context.get_error(), gl::INVALID_VALUE);
    assert_eq!(context.get_error(), gl::NO_ERROR);

    context.enable(0xdead);
    assert_eq!(context.get_error(), gl::INVALID_ENUM);

    context.begin(gl::TRIANGLES);
    context.clear(gl::COLOR_BUFFER_BIT);
    assert_eq!(context.get_error(), gl::INVALID_OPERATION);
    context.begin(gl::TRIANGLES);
    assert_eq!(context.get_error(), gl::INVALID_OPERATION);
    context.end();
    assert_eq!(context.get_error(), gl::NO_ERROR);
    context.end();
    assert_eq!(context.get_error(), gl::INVALID_OPERATION);
}

#[test]
fn test_state() {
    let context = SoftContext::new(16, 8, true);
    context.viewport(1, 2, 3, 4);
    context.enable(gl::BLEND);

    let state = context.state();
    assert_eq!(state["parameters"]["GL_VIEWPORT"], json!([1, 2, 3, 4]));
    assert_eq!(state["parameters"]["GL_SCISSOR_BOX"], json!([0, 0, 16, 8]));
    assert_eq!(state["parameters"]["GL_BLEND"], json!(true));
    assert_eq!(state["parameters"]["GL_DEPTH_TEST"], json!(false));
    assert_eq!(state["parameters"]["GL_DOUBLEBUFFER"], json!(true));
}
