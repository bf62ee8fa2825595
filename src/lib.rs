//! Replay recorded OpenGL call traces.
//!
//! A trace is a file of `CallRecord`s, written by `TraceWriter` and read back
//! by `TraceReader`. A `ReplaySession` plays a trace against a context,
//! counting frames at buffer swaps. At each frame boundary it can save a
//! snapshot of the framebuffer as a PNG file, or compare the framebuffer
//! against a snapshot saved by an earlier run, reporting how closely they
//! match. It can also stop at a given call and dump the context's state as
//! JSON.
//!
//! The session talks to the context through the `Pipeline` and `Drawable`
//! traits, and hands each ordinary call to a `Dispatch` implementation.
//! `SoftContext` and `SoftDispatcher` provide a headless software context
//! that handles the clearing and fixed-function state calls.

pub mod call;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod replay;
pub mod snapshot;
pub mod soft;
pub mod trace;

pub use call::{CallKind, CallRecord, Value};
pub use config::Config;
pub use context::{Drawable, GlError, Pipeline, WindowSystem};
pub use dispatch::{Dispatch, SoftDispatcher};
pub use replay::{Outcome, ReplaySession, Summary};
pub use snapshot::Image;
pub use soft::SoftContext;
pub use trace::{TraceError, TraceReader, TraceWriter};
