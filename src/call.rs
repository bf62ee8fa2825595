//! A representation for recorded graphics API calls.
//!
//! The replay loop only cares about a call's serial number and name: the name
//! decides whether the call marks a frame boundary, and the number names the
//! snapshot files. Arguments are carried along as `Value`s for the dispatcher
//! to interpret.

use std::fmt;

/// An argument or return value of a recorded call.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    SInt(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Bool(b) => Some(b as i64),
            Value::SInt(n) => Some(n),
            Value::UInt(n) if n <= i64::MAX as u64 => Some(n as i64),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::Bool(b) => Some(b as u64),
            Value::SInt(n) if n >= 0 => Some(n as u64),
            Value::UInt(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float(f) => Some(f),
            Value::SInt(n) => Some(n as f64),
            Value::UInt(n) => Some(n as f64),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => fmt.write_str("NULL"),
            Value::Bool(b) => write!(fmt, "{}", b),
            Value::SInt(n) => write!(fmt, "{}", n),
            Value::UInt(n) => write!(fmt, "{}", n),
            Value::Float(f) => write!(fmt, "{}", f),
            Value::Str(s) => write!(fmt, "{:?}", s),
            Value::Blob(bytes) => write!(fmt, "blob({})", bytes.len()),
        }
    }
}

/// One call from a trace.
#[derive(Clone, Debug, PartialEq)]
pub struct CallRecord {
    /// The call's serial number in the traced program's run.
    pub no: u32,
    pub name: String,
    pub args: Vec<Value>,
    pub ret: Option<Value>,
}

impl CallRecord {
    pub fn new(no: u32, name: &str, args: Vec<Value>) -> CallRecord {
        CallRecord {
            no,
            name: name.to_owned(),
            args,
            ret: None,
        }
    }

    pub fn kind(&self) -> CallKind {
        CallKind::of(&self.name)
    }

    /// If this call opens or closes an immediate-mode `glBegin`/`glEnd`
    /// bracket, say which.
    pub fn bracket(&self) -> Option<Bracket> {
        match self.name.as_str() {
            "glBegin" => Some(Bracket::Begin),
            "glEnd" => Some(Bracket::End),
            _ => None,
        }
    }
}

impl fmt::Display for CallRecord {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{} {}(", self.no, self.name)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                fmt.write_str(", ")?;
            }
            write!(fmt, "{}", arg)?;
        }
        fmt.write_str(")")?;
        if let Some(ret) = &self.ret {
            write!(fmt, " = {}", ret)?;
        }
        Ok(())
    }
}

/// How the replay loop treats a call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CallKind {
    /// Presents the back buffer: always a frame boundary.
    BufferSwap,

    /// Binds a context to a drawable. With a single-buffered visual there is
    /// no swap to watch for, so this stands in as the frame boundary.
    MakeCurrent,

    /// Some other window-system call. These are not replayed.
    Platform,

    /// Everything else goes to the dispatcher.
    Generic,
}

static PRESENTATION_CALLS: &[(&str, CallKind)] = &[
    ("glXSwapBuffers", CallKind::BufferSwap),
    ("wglSwapBuffers", CallKind::BufferSwap),
    ("glXMakeCurrent", CallKind::MakeCurrent),
    ("wglMakeCurrent", CallKind::MakeCurrent),
];

static PLATFORM_PREFIXES: &[&str] = &["glX", "wgl"];

impl CallKind {
    pub fn of(name: &str) -> CallKind {
        if let Some(&(_, kind)) = PRESENTATION_CALLS.iter().find(|&&(n, _)| n == name) {
            return kind;
        }
        if PLATFORM_PREFIXES.iter().any(|prefix| name.starts_with(prefix)) {
            return CallKind::Platform;
        }
        CallKind::Generic
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Bracket {
    Begin,
    End,
}

#[test]
fn test_call_kind() {
    assert_eq!(CallKind::of("glXSwapBuffers"), CallKind::BufferSwap);
    assert_eq!(CallKind::of("wglSwapBuffers"), CallKind::BufferSwap);
    assert_eq!(CallKind::of("glXMakeCurrent"), CallKind::MakeCurrent);
    assert_eq!(CallKind::of("wglMakeCurrent"), CallKind::MakeCurrent);
    assert_eq!(CallKind::of("glXChooseVisual"), CallKind::Platform);
    assert_eq!(CallKind::of("wglCreateContext"), CallKind::Platform);
    assert_eq!(CallKind::of("glClear"), CallKind::Generic);

    // Only the prefix counts, and case matters.
    assert_eq!(CallKind::of("gl"), CallKind::Generic);
    assert_eq!(CallKind::of("glx"), CallKind::Generic);
    assert_eq!(CallKind::of("glXSwapBuffersMESA"), CallKind::Platform);
    assert_eq!(CallKind::of("eglSwapBuffers"), CallKind::Generic);
}

#[test]
fn test_display() {
    let mut call = CallRecord::new(
        7,
        "glClearColor",
        vec![Value::Float(0.0), Value::Float(0.5), Value::SInt(-1), Value::UInt(1)],
    );
    assert_eq!(call.to_string(), "7 glClearColor(0, 0.5, -1, 1)");

    call.name = "glGetString".to_owned();
    call.args = vec![Value::UInt(0x1f00)];
    call.ret = Some(Value::Str("Mesa".to_owned()));
    assert_eq!(call.to_string(), "7 glGetString(7936) = \"Mesa\"");

    let call = CallRecord::new(0, "glBufferData", vec![Value::Blob(vec![0; 16]), Value::Null]);
    assert_eq!(call.to_string(), "0 glBufferData(blob(16), NULL)");
}

#[test]
fn test_bracket() {
    assert_eq!(CallRecord::new(0, "glBegin", vec![]).bracket(), Some(Bracket::Begin));
    assert_eq!(CallRecord::new(1, "glEnd", vec![]).bracket(), Some(Bracket::End));
    assert_eq!(CallRecord::new(2, "glVertex2f", vec![]).bracket(), None);
}
