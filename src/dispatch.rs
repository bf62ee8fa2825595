//! Replaying individual calls.
//!
//! The replay loop handles frame boundaries itself, and hands every other call
//! to a `Dispatch` implementation. `SoftDispatcher` replays calls on a
//! `SoftContext`, looking up a handler for each call by name.

use gleam::gl::{GLbitfield, GLenum, GLint, GLsizei};
use log::warn;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::call::CallRecord;
use crate::context::Pipeline;
use crate::soft::SoftContext;

/// Something that can carry out a recorded call.
pub trait Dispatch {
    fn dispatch(&mut self, call: &CallRecord);
}

#[derive(Debug, Error, PartialEq)]
pub enum ArgError {
    #[error("expected {expected} arguments, found {found}")]
    Count { expected: usize, found: usize },
    #[error("argument {index} is not a valid {expected}")]
    Type { index: usize, expected: &'static str },
}

/// Typed access to a call's arguments.
struct Args<'a>(&'a CallRecord);

impl Args<'_> {
    fn expect(&self, expected: usize) -> Result<(), ArgError> {
        let found = self.0.args.len();
        if found != expected {
            return Err(ArgError::Count { expected, found });
        }
        Ok(())
    }

    fn int(&self, index: usize) -> Result<GLint, ArgError> {
        self.0.args[index]
            .as_i64()
            .filter(|&n| n >= GLint::MIN as i64 && n <= GLint::MAX as i64)
            .map(|n| n as GLint)
            .ok_or(ArgError::Type { index, expected: "GLint" })
    }

    fn size(&self, index: usize) -> Result<GLsizei, ArgError> {
        self.int(index)
            .map_err(|_| ArgError::Type { index, expected: "GLsizei" })
    }

    fn uint(&self, index: usize) -> Result<u32, ArgError> {
        self.0.args[index]
            .as_u64()
            .filter(|&n| n <= u32::MAX as u64)
            .map(|n| n as u32)
            .ok_or(ArgError::Type { index, expected: "GLenum" })
    }

    fn float(&self, index: usize) -> Result<f32, ArgError> {
        self.0.args[index]
            .as_f64()
            .map(|f| f as f32)
            .ok_or(ArgError::Type { index, expected: "GLfloat" })
    }
}

type Handler = fn(&SoftContext, &Args) -> Result<(), ArgError>;

static HANDLERS: &[(&str, Handler)] = &[
    ("glBegin", begin),
    ("glClear", clear),
    ("glClearColor", clear_color),
    ("glDisable", disable),
    ("glEnable", enable),
    ("glEnd", end),
    ("glFinish", finish),
    ("glFlush", flush),
    ("glScissor", scissor),
    ("glViewport", viewport),
];

fn begin(gl: &SoftContext, args: &Args) -> Result<(), ArgError> {
    args.expect(1)?;
    gl.begin(args.uint(0)? as GLenum);
    Ok(())
}

fn clear(gl: &SoftContext, args: &Args) -> Result<(), ArgError> {
    args.expect(1)?;
    gl.clear(args.uint(0)? as GLbitfield);
    Ok(())
}

fn clear_color(gl: &SoftContext, args: &Args) -> Result<(), ArgError> {
    args.expect(4)?;
    gl.clear_color(args.float(0)?, args.float(1)?, args.float(2)?, args.float(3)?);
    Ok(())
}

fn disable(gl: &SoftContext, args: &Args) -> Result<(), ArgError> {
    args.expect(1)?;
    gl.disable(args.uint(0)?);
    Ok(())
}

fn enable(gl: &SoftContext, args: &Args) -> Result<(), ArgError> {
    args.expect(1)?;
    gl.enable(args.uint(0)?);
    Ok(())
}

fn end(gl: &SoftContext, args: &Args) -> Result<(), ArgError> {
    args.expect(0)?;
    gl.end();
    Ok(())
}

fn finish(gl: &SoftContext, args: &Args) -> Result<(), ArgError> {
    args.expect(0)?;
    gl.finish();
    Ok(())
}

fn flush(gl: &SoftContext, args: &Args) -> Result<(), ArgError> {
    args.expect(0)?;
    gl.flush();
    Ok(())
}

fn scissor(gl: &SoftContext, args: &Args) -> Result<(), ArgError> {
    args.expect(4)?;
    gl.scissor(args.int(0)?, args.int(1)?, args.size(2)?, args.size(3)?);
    Ok(())
}

fn viewport(gl: &SoftContext, args: &Args) -> Result<(), ArgError> {
    args.expect(4)?;
    gl.viewport(args.int(0)?, args.int(1)?, args.size(2)?, args.size(3)?);
    Ok(())
}

/// Replays calls on a `SoftContext`.
pub struct SoftDispatcher<'c> {
    context: &'c SoftContext,
    handlers: HashMap<&'static str, Handler>,

    /// Names of calls we have no handler for, and have already complained
    /// about.
    unsupported: HashSet<String>,
}

impl<'c> SoftDispatcher<'c> {
    pub fn new(context: &'c SoftContext) -> SoftDispatcher<'c> {
        SoftDispatcher {
            context,
            handlers: HANDLERS.iter().cloned().collect(),
            unsupported: HashSet::new(),
        }
    }

    pub fn supports(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}

impl Dispatch for SoftDispatcher<'_> {
    fn dispatch(&mut self, call: &CallRecord) {
        match self.handlers.get(call.name.as_str()) {
            Some(handler) => {
                if let Err(err) = handler(self.context, &Args(call)) {
                    warn!("{}: skipping {}: {}", call.no, call.name, err);
                }
            }
            None => {
                if !self.unsupported.contains(&call.name) {
                    warn!("unsupported call {}", call.name);
                    self.unsupported.insert(call.name.clone());
                }
            }
        }
    }
}

#[cfg(test)]
use crate::call::Value;

#[test]
fn test_dispatch() {
    let context = SoftContext::new(4, 4, false);
    let mut dispatcher = SoftDispatcher::new(&context);

    let calls = vec![
        CallRecord::new(
            0,
            "glClearColor",
            vec![Value::Float(0.0), Value::Float(1.0), Value::Float(0.0), Value::UInt(1)],
        ),
        CallRecord::new(1, "glViewport", vec![Value::SInt(0), Value::SInt(0), Value::UInt(2), Value::UInt(2)]),
        CallRecord::new(2, "glClear", vec![Value::UInt(gleam::gl::COLOR_BUFFER_BIT as u64)]),
        CallRecord::new(3, "glFlush", vec![]),
    ];
    for call in &calls {
        dispatcher.dispatch(call);
    }

    let mut pixels = vec![0; 4 * 4 * 4];
    context.read_pixels(4, 4, &mut pixels);
    assert!(pixels.chunks(4).all(|pixel| pixel == [0, 255, 0, 255]));
    assert_eq!(context.state()["parameters"]["GL_VIEWPORT"], serde_json::json!([0, 0, 2, 2]));
    assert_eq!(context.get_error(), gleam::gl::NO_ERROR);
}

#[test]
fn test_malformed_and_unsupported_calls() {
    let context = SoftContext::new(4, 4, false);
    let mut dispatcher = SoftDispatcher::new(&context);

    // Wrong argument count, and a string where a number belongs: skipped.
    dispatcher.dispatch(&CallRecord::new(0, "glViewport", vec![Value::SInt(1)]));
    dispatcher.dispatch(&CallRecord::new(
        1,
        "glViewport",
        vec![Value::Str("x".to_owned()), Value::SInt(0), Value::SInt(1), Value::SInt(1)],
    ));
    assert_eq!(context.state()["parameters"]["GL_VIEWPORT"], serde_json::json!([0, 0, 4, 4]));

    // Unknown calls are skipped, however many times they appear.
    assert!(!dispatcher.supports("glDrawArrays"));
    dispatcher.dispatch(&CallRecord::new(2, "glDrawArrays", vec![]));
    dispatcher.dispatch(&CallRecord::new(3, "glDrawArrays", vec![]));
    assert_eq!(dispatcher.unsupported.len(), 1);

    assert_eq!(context.get_error(), gleam::gl::NO_ERROR);
}

#[test]
fn test_arg_errors() {
    let call = CallRecord::new(0, "glScissor", vec![Value::UInt(u64::MAX), Value::Float(0.5)]);
    let args = Args(&call);
    assert_eq!(args.expect(4), Err(ArgError::Count { expected: 4, found: 2 }));
    assert_eq!(args.int(0), Err(ArgError::Type { index: 0, expected: "GLint" }));
    assert_eq!(args.int(1), Err(ArgError::Type { index: 1, expected: "GLint" }));
    assert_eq!(args.float(1), Ok(0.5));
}
