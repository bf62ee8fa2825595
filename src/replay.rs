//! The replay loop.
//!
//! A `ReplaySession` plays one trace from start to finish. It hands ordinary
//! calls to a `Dispatch` implementation, and handles the window-system calls
//! itself: those mark frame boundaries, where it takes snapshots, compares
//! them against reference images, and presents the frame.
//!
//! The session borrows the context; the same context serves every trace in a
//! run. Frame counting and timing start over with each session.

use gleam::gl;
use log::{debug, warn};
use std::fmt;
use std::io::{self, Write};
use std::time::{Duration, Instant};

use crate::call::{Bracket, CallKind, CallRecord};
use crate::config::{Config, QUIET};
use crate::context::{Drawable, GlError, Pipeline};
use crate::dispatch::Dispatch;
use crate::snapshot::{snapshot_file_name, Image};

/// Timing for a complete replay of one trace.
#[derive(Clone, Debug)]
pub struct Summary {
    pub frames: u32,
    pub elapsed: Duration,
}

impl Summary {
    pub fn fps(&self) -> f64 {
        self.frames as f64 / self.elapsed.as_secs_f64()
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "Rendered {} frames in {} secs, average of {} fps",
            self.frames,
            self.elapsed.as_secs_f64(),
            self.fps()
        )
    }
}

/// How a replay ended.
#[derive(Debug)]
pub enum Outcome {
    /// We ran out of calls.
    Finished(Summary),

    /// We reached the state dump call, and dumped. The caller should stop
    /// immediately: the dump is the only output wanted.
    StateDumped { call_no: u32 },
}

pub struct ReplaySession<'a> {
    config: &'a Config,
    pipeline: &'a dyn Pipeline,
    drawable: &'a dyn Drawable,

    /// Where reports go: echoed calls, snapshot notices, the summary.
    out: &'a mut dyn Write,

    /// Where GL error warnings go.
    err: &'a mut dyn Write,

    /// Frames completed so far.
    frame: u32,

    /// True between `glBegin` and `glEnd`, where GL forbids `glGetError` and
    /// most state queries.
    inside_begin_end: bool,
}

impl<'a> ReplaySession<'a> {
    pub fn new(
        config: &'a Config,
        pipeline: &'a dyn Pipeline,
        drawable: &'a dyn Drawable,
        out: &'a mut dyn Write,
        err: &'a mut dyn Write,
    ) -> ReplaySession<'a> {
        ReplaySession {
            config,
            pipeline,
            drawable,
            out,
            err,
            frame: 0,
            inside_begin_end: false,
        }
    }

    pub fn frames(&self) -> u32 {
        self.frame
    }

    /// Replay `calls` to the end, or until the state dump call.
    ///
    /// The only errors are failures writing to `out` or `err`.
    pub fn run<I>(mut self, calls: I, dispatcher: &mut dyn Dispatch) -> io::Result<Outcome>
    where
        I: IntoIterator<Item = CallRecord>,
    {
        let start = Instant::now();

        for call in calls {
            if let Some(call_no) = self.replay_one(&call, dispatcher)? {
                return Ok(Outcome::StateDumped { call_no });
            }
        }

        self.pipeline.flush();
        let summary = Summary {
            frames: self.frame,
            elapsed: start.elapsed(),
        };

        if self.config.verbosity >= QUIET {
            writeln!(self.out, "{}", summary)?;
        }

        Ok(Outcome::Finished(summary))
    }

    /// Replay a single call. If it triggered the state dump, return its
    /// number.
    fn replay_one(
        &mut self,
        call: &CallRecord,
        dispatcher: &mut dyn Dispatch,
    ) -> io::Result<Option<u32>> {
        if self.config.verbosity >= 1 {
            // Flush right away, so the echo lands before any crash output.
            writeln!(self.out, "{}", call)?;
            self.out.flush()?;
        }

        match call.kind() {
            CallKind::BufferSwap => {
                self.frame_complete(call.no)?;
                if self.config.double_buffer {
                    self.drawable.swap_buffers();
                } else {
                    self.pipeline.flush();
                }
            }
            CallKind::MakeCurrent => {
                self.pipeline.flush();
                if !self.config.double_buffer {
                    self.frame_complete(call.no)?;
                }
            }
            CallKind::Platform => {
                // Other window-system calls have no bearing on the replay.
                debug!("{}: ignoring {}", call.no, call.name);
            }
            CallKind::Generic => {
                let bracket = call.bracket();
                if bracket == Some(Bracket::End) {
                    self.inside_begin_end = false;
                }
                dispatcher.dispatch(call);
                if bracket == Some(Bracket::Begin) {
                    self.inside_begin_end = true;
                }

                self.check_error(Some(call.no))?;

                // `>=` rather than `==`, in case the exact call was skipped or
                // fell inside a `glBegin`/`glEnd` bracket.
                if let Some(dump_state) = self.config.dump_state {
                    if !self.inside_begin_end && call.no >= dump_state {
                        self.dump_state()?;
                        return Ok(Some(call.no));
                    }
                }
            }
        }

        Ok(None)
    }

    /// Handle the end of the frame drawn by the calls before `call_no`.
    ///
    /// Count the frame, and take care of snapshots and comparisons. This
    /// doesn't present the frame; that's up to the caller.
    pub fn frame_complete(&mut self, call_no: u32) -> io::Result<()> {
        self.frame += 1;

        let config = self.config;
        if config.snapshot_prefix.is_none() && config.compare_prefix.is_none() {
            return Ok(());
        }

        let reference = match &config.compare_prefix {
            Some(prefix) => {
                let filename = snapshot_file_name(prefix, call_no);
                match Image::read_png(&filename) {
                    Ok(image) => {
                        if config.verbosity >= 0 {
                            writeln!(self.out, "Read {}", filename)?;
                        }
                        Some(image)
                    }
                    Err(err) => {
                        // No reference for this frame: nothing to do.
                        debug!("{}: {}", filename, err);
                        return Ok(());
                    }
                }
            }
            None => None,
        };

        let mut src = Image::new(config.window_width, config.window_height, true);
        self.pipeline
            .read_pixels(src.width, src.height, &mut src.pixels);
        self.check_error(None)?;

        if let Some(prefix) = &config.snapshot_prefix {
            let filename = snapshot_file_name(prefix, call_no);
            match src.write_png(&filename) {
                Ok(()) => {
                    if config.verbosity >= 0 {
                        writeln!(self.out, "Wrote {}", filename)?;
                    }
                }
                Err(err) => warn!("error writing snapshot {}: {}", filename, err),
            }
        }

        if let Some(reference) = reference {
            writeln!(
                self.out,
                "Snapshot {} average precision of {} bits",
                call_no,
                src.compare(&reference)
            )?;
        }

        Ok(())
    }

    /// Report any pending GL error, tagged with `call_no` if given.
    ///
    /// Benchmark runs skip this, and so does anything inside a
    /// `glBegin`/`glEnd` bracket, where `glGetError` itself is an error.
    pub fn check_error(&mut self, call_no: Option<u32>) -> io::Result<()> {
        if self.config.benchmark || self.inside_begin_end {
            return Ok(());
        }

        let error = self.pipeline.get_error();
        if error == gl::NO_ERROR {
            return Ok(());
        }

        if let Some(call_no) = call_no {
            write!(self.err, "{}: ", call_no)?;
        }
        writeln!(self.err, "warning: glGetError() = {}", GlError(error))
    }

    fn dump_state(&mut self) -> io::Result<()> {
        let state = self.pipeline.state();
        serde_json::to_writer_pretty(&mut *self.out, &state)?;
        writeln!(self.out)?;
        self.out.flush()
    }
}

#[cfg(test)]
mod fake {
    use super::*;
    use gleam::gl::GLenum;
    use serde_json::json;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    /// A context that counts what's done to it, and reports the errors it's
    /// told to.
    #[derive(Default)]
    pub struct FakeContext {
        pub flushes: Cell<usize>,
        pub swaps: Cell<usize>,
        pub error_checks: Cell<usize>,
        pub errors: RefCell<VecDeque<GLenum>>,
    }

    impl Pipeline for FakeContext {
        fn flush(&self) {
            self.flushes.set(self.flushes.get() + 1);
        }

        fn get_error(&self) -> GLenum {
            self.error_checks.set(self.error_checks.get() + 1);
            self.errors.borrow_mut().pop_front().unwrap_or(gl::NO_ERROR)
        }

        fn read_pixels(&self, _width: u32, _height: u32, dst: &mut [u8]) {
            for byte in dst {
                *byte = 0x80;
            }
        }

        fn state(&self) -> serde_json::Value {
            json!({ "parameters": { "GL_VIEWPORT": [0, 0, 256, 256] } })
        }
    }

    impl Drawable for FakeContext {
        fn swap_buffers(&self) {
            self.swaps.set(self.swaps.get() + 1);
        }
    }

    /// A dispatcher that just notes which calls it was given.
    #[derive(Default)]
    pub struct Dispatched(pub Vec<u32>);

    impl Dispatch for Dispatched {
        fn dispatch(&mut self, call: &CallRecord) {
            self.0.push(call.no);
        }
    }

    pub fn calls(names: &[&str]) -> Vec<CallRecord> {
        names
            .iter()
            .enumerate()
            .map(|(no, name)| CallRecord::new(no as u32, name, vec![]))
            .collect()
    }

    /// The result of replaying some calls on a `FakeContext`.
    pub struct Run {
        pub outcome: Outcome,
        pub context: FakeContext,
        pub dispatched: Vec<u32>,
        pub out: String,
        pub err: String,
    }

    pub fn run(config: &Config, calls: Vec<CallRecord>, errors: &[GLenum]) -> Run {
        let context = FakeContext::default();
        context.errors.borrow_mut().extend(errors);
        let mut dispatcher = Dispatched::default();
        let mut out = Vec::new();
        let mut err = Vec::new();
        let outcome = ReplaySession::new(config, &context, &context, &mut out, &mut err)
            .run(calls, &mut dispatcher)
            .unwrap();
        Run {
            outcome,
            context,
            dispatched: dispatcher.0,
            out: String::from_utf8(out).unwrap(),
            err: String::from_utf8(err).unwrap(),
        }
    }
}

#[cfg(test)]
use fake::{calls, run};

#[cfg(test)]
fn finished_frames(outcome: &Outcome) -> u32 {
    match outcome {
        Outcome::Finished(summary) => summary.frames,
        Outcome::StateDumped { call_no } => panic!("unexpected state dump at {}", call_no),
    }
}

#[test]
fn test_three_swaps() {
    let trace = calls(&[
        "glClear",
        "glXSwapBuffers",
        "glClear",
        "glXSwapBuffers",
        "wglSwapBuffers",
    ]);
    let result = run(&Config::default(), trace, &[]);

    assert_eq!(finished_frames(&result.outcome), 3);
    assert_eq!(result.dispatched, vec![0, 2]);
    assert!(result.out.starts_with("Rendered 3 frames in "));
    assert!(result.out.contains(" secs, average of "));
    assert!(result.out.ends_with(" fps\n"));
    assert_eq!(result.out.lines().count(), 1);

    // Single-buffered: each swap flushes, plus one flush at the end.
    assert_eq!(result.context.swaps.get(), 0);
    assert_eq!(result.context.flushes.get(), 4);
    assert_eq!(result.err, "");
}

#[test]
fn test_frame_boundaries_depend_on_buffering() {
    let names = [
        "glXMakeCurrent",
        "glClear",
        "glXSwapBuffers",
        "wglMakeCurrent",
        "glXChooseVisual",
        "wglCreateContext",
    ];

    // Single-buffered: make-current calls are frame boundaries too.
    let single = run(&Config::default(), calls(&names), &[]);
    assert_eq!(finished_frames(&single.outcome), 3);
    assert_eq!(single.context.swaps.get(), 0);

    let config = Config {
        double_buffer: true,
        ..Config::default()
    };
    let double = run(&config, calls(&names), &[]);
    assert_eq!(finished_frames(&double.outcome), 1);
    assert_eq!(double.context.swaps.get(), 1);
    // Two make-currents, plus the end of the trace.
    assert_eq!(double.context.flushes.get(), 3);

    // Platform calls never reach the dispatcher.
    assert_eq!(single.dispatched, vec![1]);
    assert_eq!(double.dispatched, vec![1]);
}

#[test]
fn test_echo() {
    let config = Config {
        verbosity: 1,
        ..Config::default()
    };
    let mut trace = calls(&["glClear", "glXSwapBuffers"]);
    trace[0].args.push(crate::call::Value::UInt(0x4000));
    let result = run(&config, trace, &[]);
    let lines: Vec<&str> = result.out.lines().collect();
    assert_eq!(lines[0], "0 glClear(16384)");
    assert_eq!(lines[1], "1 glXSwapBuffers()");
    assert!(lines[2].starts_with("Rendered 1 frames"));
}

#[test]
fn test_summary_verbosity() {
    let quiet = Config {
        verbosity: QUIET,
        ..Config::default()
    };
    assert!(run(&quiet, calls(&["glXSwapBuffers"]), &[]).out.starts_with("Rendered 1 frames"));

    let silent = Config {
        verbosity: QUIET - 1,
        ..Config::default()
    };
    let result = run(&silent, calls(&["glXSwapBuffers"]), &[]);
    assert_eq!(finished_frames(&result.outcome), 1);
    assert_eq!(result.out, "");
}

#[test]
fn test_error_check() {
    let result = run(
        &Config::default(),
        calls(&["glEnable", "glClear", "glFlush", "glXSwapBuffers"]),
        &[gl::INVALID_ENUM, gl::NO_ERROR, 0x9999],
    );
    assert_eq!(
        result.err,
        "0: warning: glGetError() = GL_INVALID_ENUM\n\
         2: warning: glGetError() = 39321\n"
    );
    // The swap isn't dispatched, and takes no snapshot: no check.
    assert_eq!(result.context.error_checks.get(), 3);
}

#[test]
fn test_check_error_without_call_number() {
    let config = Config::default();
    let context = fake::FakeContext::default();
    context.errors.borrow_mut().push_back(gl::OUT_OF_MEMORY);
    let mut out = Vec::new();
    let mut err = Vec::new();
    let mut session = ReplaySession::new(&config, &context, &context, &mut out, &mut err);
    session.check_error(None).unwrap();
    session.check_error(Some(5)).unwrap();
    drop(session);
    assert_eq!(String::from_utf8(err).unwrap(), "warning: glGetError() = GL_OUT_OF_MEMORY\n");
}

#[test]
fn test_error_check_in_benchmark() {
    let config = Config {
        benchmark: true,
        verbosity: QUIET,
        ..Config::default()
    };
    let result = run(&config, calls(&["glEnable", "glClear"]), &[gl::INVALID_ENUM]);
    assert_eq!(result.err, "");
    assert_eq!(result.context.error_checks.get(), 0);
}

#[test]
fn test_no_error_check_between_begin_and_end() {
    let result = run(
        &Config::default(),
        calls(&["glBegin", "glVertex2f", "glVertex2f", "glEnd", "glFlush"]),
        &[gl::INVALID_OPERATION],
    );
    // Only `glEnd` and `glFlush` get checked; the pending error is reported
    // against `glEnd`.
    assert_eq!(result.context.error_checks.get(), 2);
    assert_eq!(result.err, "3: warning: glGetError() = GL_INVALID_OPERATION\n");
}

#[test]
fn test_state_dump() {
    let names = vec!["glFlush"; 20];
    let config = Config {
        dump_state: Some(10),
        verbosity: crate::config::SILENT,
        ..Config::default()
    };
    let result = run(&config, calls(&names), &[]);

    match result.outcome {
        Outcome::StateDumped { call_no } => assert_eq!(call_no, 10),
        other => panic!("expected state dump, got {:?}", other),
    }
    assert_eq!(result.dispatched, (0..=10).collect::<Vec<_>>());
    assert!(!result.out.contains("Rendered"));
    let dump: serde_json::Value = serde_json::from_str(&result.out).unwrap();
    assert_eq!(dump["parameters"]["GL_VIEWPORT"], serde_json::json!([0, 0, 256, 256]));
}

#[test]
fn test_state_dump_waits_for_a_safe_call() {
    let config = Config {
        dump_state: Some(2),
        ..Config::default()
    };

    // Call 2 is inside a bracket; the dump happens at `glEnd`.
    let result = run(
        &config,
        calls(&["glClear", "glBegin", "glVertex2f", "glVertex2f", "glEnd", "glFlush"]),
        &[],
    );
    assert!(matches!(result.outcome, Outcome::StateDumped { call_no: 4 }));

    // Call 2 is a swap, which isn't dispatched; the dump happens at the next
    // ordinary call.
    let result = run(
        &config,
        calls(&["glClear", "glClear", "glXSwapBuffers", "glXSwapBuffers", "glClear"]),
        &[],
    );
    assert!(matches!(result.outcome, Outcome::StateDumped { call_no: 4 }));

    // A threshold past the end of the trace never fires.
    let config = Config {
        dump_state: Some(100),
        ..Config::default()
    };
    let result = run(&config, calls(&["glClear", "glXSwapBuffers"]), &[]);
    assert_eq!(finished_frames(&result.outcome), 1);
}

#[test]
fn test_frame_complete_without_snapshots() {
    let config = Config::default();
    let context = fake::FakeContext::default();
    let mut out = Vec::new();
    let mut err = Vec::new();
    let mut session = ReplaySession::new(&config, &context, &context, &mut out, &mut err);
    session.frame_complete(7).unwrap();
    session.frame_complete(9).unwrap();
    assert_eq!(session.frames(), 2);
    drop(session);
    assert!(out.is_empty());
    assert_eq!(context.error_checks.get(), 0);
}

#[test]
fn test_missing_reference() {
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("ref").to_str().unwrap().to_owned();
    let config = Config {
        compare_prefix: Some(prefix),
        ..Config::default()
    };

    let mut trace = calls(&["glClear"]);
    trace.push(CallRecord::new(42, "glXSwapBuffers", vec![]));
    let result = run(&config, trace, &[]);

    assert_eq!(finished_frames(&result.outcome), 1);
    assert!(!result.out.contains("Snapshot"));
    assert!(!result.out.contains("Read"));
    assert!(result.out.starts_with("Rendered 1 frames"));
    // No capture was attempted, so no error check either.
    assert_eq!(result.context.error_checks.get(), 1);
}

#[cfg(test)]
fn soft_run(config: &Config, calls: &[CallRecord]) -> String {
    use crate::dispatch::SoftDispatcher;
    use crate::soft::SoftContext;

    let context = SoftContext::new(config.window_width, config.window_height, false);
    let mut dispatcher = SoftDispatcher::new(&context);
    let mut out = Vec::new();
    let mut err = Vec::new();
    ReplaySession::new(config, &context, &context, &mut out, &mut err)
        .run(calls.iter().cloned(), &mut dispatcher)
        .unwrap();
    assert!(err.is_empty());
    String::from_utf8(out).unwrap()
}

#[test]
fn test_snapshot_and_compare() {
    use crate::call::Value;

    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("frame").to_str().unwrap().to_owned();
    let trace = vec![
        CallRecord::new(
            40,
            "glClearColor",
            vec![Value::Float(1.0), Value::Float(0.0), Value::Float(0.0), Value::Float(1.0)],
        ),
        CallRecord::new(41, "glClear", vec![Value::UInt(gl::COLOR_BUFFER_BIT as u64)]),
        CallRecord::new(42, "glXSwapBuffers", vec![]),
    ];

    let config = Config {
        snapshot_prefix: Some(prefix.clone()),
        window_width: 8,
        window_height: 8,
        ..Config::default()
    };
    let out = soft_run(&config, &trace);
    let filename = snapshot_file_name(&prefix, 42);
    assert!(filename.ends_with("frame0000000042.png"));
    assert!(out.starts_with(&format!("Wrote {}\n", filename)));

    let snapshot = Image::read_png(&filename).unwrap();
    assert_eq!((snapshot.width, snapshot.height), (8, 8));
    assert!(snapshot.pixels.chunks(4).all(|pixel| pixel == [255, 0, 0, 255]));

    // Replaying the same trace matches the snapshot as closely as it can.
    let config = Config {
        compare_prefix: Some(prefix.clone()),
        window_width: 8,
        window_height: 8,
        ..Config::default()
    };
    let out = soft_run(&config, &trace);
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines[0], format!("Read {}", filename));
    let bits: f64 = lines[1]
        .strip_prefix("Snapshot 42 average precision of ")
        .and_then(|rest| rest.strip_suffix(" bits"))
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(bits, snapshot.compare(&snapshot));
    assert!(bits > 24.0);
    assert!(lines[2].starts_with("Rendered 1 frames"));

    // Quiet runs still report comparisons, but not file traffic.
    let config = Config {
        verbosity: QUIET,
        ..config
    };
    let out = soft_run(&config, &trace);
    assert!(out.starts_with("Snapshot 42 average precision of "));
}
