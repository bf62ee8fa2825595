//! Reading and writing trace files.
//!
//! A trace file starts with an eight-byte header: the magic bytes `GLRT`, a
//! format version byte, and three bytes of padding. After that come call
//! records, one after another, until the end of the file. Each record is:
//!
//! - the call's serial number, as an unsigned LEB128 number,
//! - the call's name, as an unsigned LEB128 length followed by UTF-8 text,
//! - the argument count, as an unsigned LEB128 number, followed by that many
//!   values,
//! - the return value, with `Value::Null` meaning the call returned nothing.
//!
//! Each value is a tag byte followed by its payload. Integers use LEB128,
//! floats are eight little-endian bytes, and strings and blobs are a length
//! followed by the bytes themselves.
//!
//! `TraceReader` is an iterator over the records. It can't be rewound: to
//! replay a trace again, open it again.

use std::io::prelude::*;
use std::path::Path;
use std::{fs, io};

use log::warn;
use thiserror::Error;

use crate::call::{CallRecord, Value};

const MAGIC: [u8; 4] = *b"GLRT";
const VERSION: u8 = 1;

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_SINT: u8 = 2;
const TAG_UINT: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_STR: u8 = 5;
const TAG_BLOB: u8 = 6;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("{0}")]
    Io(io::Error),
    #[error("not a trace file (bad magic number)")]
    BadMagic,
    #[error("unsupported trace format version {0}")]
    Version(u8),
    #[error("trace file truncated in the middle of a call")]
    Truncated,
    #[error("LEB128 number in trace is too large")]
    Overflow,
    #[error("call number {0} does not fit in 32 bits")]
    CallNumber(u64),
    #[error("unknown value tag 0x{0:x}")]
    BadTag(u8),
    #[error("string in trace is not valid UTF-8")]
    BadUtf8,
}

impl From<io::Error> for TraceError {
    fn from(err: io::Error) -> TraceError {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            TraceError::Truncated
        } else {
            TraceError::Io(err)
        }
    }
}

impl From<leb128::read::Error> for TraceError {
    fn from(err: leb128::read::Error) -> TraceError {
        match err {
            leb128::read::Error::IoError(err) => err.into(),
            leb128::read::Error::Overflow => TraceError::Overflow,
        }
    }
}

fn header() -> [u8; 8] {
    [MAGIC[0], MAGIC[1], MAGIC[2], MAGIC[3], VERSION, 0, 0, 0]
}

fn check_header(header: &[u8; 8]) -> Result<(), TraceError> {
    if header[..4] != MAGIC {
        return Err(TraceError::BadMagic);
    }
    if header[4] != VERSION {
        return Err(TraceError::Version(header[4]));
    }
    Ok(())
}

/// A stream of calls read from a trace.
pub struct TraceReader<R> {
    input: R,

    /// The error that ended the stream early, if any.
    error: Option<TraceError>,
}

impl TraceReader<io::BufReader<fs::File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, TraceError> {
        let file = fs::File::open(path).map_err(TraceError::Io)?;
        TraceReader::new(io::BufReader::new(file))
    }
}

impl<R: BufRead> TraceReader<R> {
    /// Check the header at the front of `input`, and prepare to read calls
    /// from what follows.
    pub fn new(mut input: R) -> Result<TraceReader<R>, TraceError> {
        let mut header = [0_u8; 8];
        input.read_exact(&mut header).map_err(|err| {
            if err.kind() == io::ErrorKind::UnexpectedEof {
                TraceError::BadMagic
            } else {
                TraceError::Io(err)
            }
        })?;
        check_header(&header)?;
        Ok(TraceReader { input, error: None })
    }

    /// Read the next call. Return `Ok(None)` at the end of the trace.
    pub fn read_call(&mut self) -> Result<Option<CallRecord>, TraceError> {
        if self.input.fill_buf()?.is_empty() {
            return Ok(None);
        }

        let input = &mut self.input;
        let no = leb128::read::unsigned(input)?;
        if no > u32::MAX as u64 {
            return Err(TraceError::CallNumber(no));
        }
        let name = read_string(input)?;

        let count = leb128::read::unsigned(input)?;
        let mut args = Vec::new();
        for _ in 0..count {
            args.push(read_value(input)?);
        }

        let ret = match read_value(input)? {
            Value::Null => None,
            value => Some(value),
        };

        Ok(Some(CallRecord {
            no: no as u32,
            name,
            args,
            ret,
        }))
    }

    /// If the trace ended because of a malformed record, return the error.
    pub fn error(&self) -> Option<&TraceError> {
        self.error.as_ref()
    }
}

impl<R: BufRead> Iterator for TraceReader<R> {
    type Item = CallRecord;

    fn next(&mut self) -> Option<CallRecord> {
        if self.error.is_some() {
            return None;
        }
        match self.read_call() {
            Ok(call) => call,
            Err(err) => {
                warn!("trace ended early: {}", err);
                self.error = Some(err);
                None
            }
        }
    }
}

fn read_bytes<R: Read>(input: &mut R) -> Result<Vec<u8>, TraceError> {
    let len = leb128::read::unsigned(input)?;
    // Don't trust `len` enough to allocate it up front.
    let mut bytes = Vec::new();
    input.by_ref().take(len).read_to_end(&mut bytes)?;
    if bytes.len() as u64 != len {
        return Err(TraceError::Truncated);
    }
    Ok(bytes)
}

fn read_string<R: Read>(input: &mut R) -> Result<String, TraceError> {
    String::from_utf8(read_bytes(input)?).map_err(|_| TraceError::BadUtf8)
}

fn read_value<R: Read>(input: &mut R) -> Result<Value, TraceError> {
    let mut tag = [0_u8];
    input.read_exact(&mut tag)?;
    Ok(match tag[0] {
        TAG_NULL => Value::Null,
        TAG_BOOL => {
            let mut byte = [0_u8];
            input.read_exact(&mut byte)?;
            Value::Bool(byte[0] != 0)
        }
        TAG_SINT => Value::SInt(leb128::read::signed(input)?),
        TAG_UINT => Value::UInt(leb128::read::unsigned(input)?),
        TAG_FLOAT => {
            let mut bytes = [0_u8; 8];
            input.read_exact(&mut bytes)?;
            Value::Float(f64::from_le_bytes(bytes))
        }
        TAG_STR => Value::Str(read_string(input)?),
        TAG_BLOB => Value::Blob(read_bytes(input)?),
        other => return Err(TraceError::BadTag(other)),
    })
}

/// A trace file being written.
pub struct TraceWriter<W: Write> {
    output: W,
    next_no: u32,
}

impl TraceWriter<io::BufWriter<fs::File>> {
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        TraceWriter::new(io::BufWriter::new(fs::File::create(path)?))
    }
}

impl<W: Write> TraceWriter<W> {
    pub fn new(mut output: W) -> io::Result<TraceWriter<W>> {
        output.write_all(&header())?;
        Ok(TraceWriter { output, next_no: 0 })
    }

    /// Append a call with no return value, numbering it one past the last call
    /// written. Return the number assigned.
    pub fn write_call(&mut self, name: &str, args: &[Value]) -> io::Result<u32> {
        let no = self.next_no;
        self.write_fields(no, name, args, None)?;
        Ok(no)
    }

    /// Append `call` with the serial number it already carries. Later calls
    /// to `write_call` continue numbering from there.
    pub fn write_record(&mut self, call: &CallRecord) -> io::Result<()> {
        self.write_fields(call.no, &call.name, &call.args, call.ret.as_ref())
    }

    fn write_fields(
        &mut self,
        no: u32,
        name: &str,
        args: &[Value],
        ret: Option<&Value>,
    ) -> io::Result<()> {
        let output = &mut self.output;
        leb128::write::unsigned(output, no as u64)?;
        write_bytes(output, name.as_bytes())?;
        leb128::write::unsigned(output, args.len() as u64)?;
        for arg in args {
            write_value(output, arg)?;
        }
        write_value(output, ret.unwrap_or(&Value::Null))?;
        self.next_no = no.wrapping_add(1);
        Ok(())
    }

    /// Flush the trace and return the underlying writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.output.flush()?;
        Ok(self.output)
    }
}

fn write_bytes<W: Write>(output: &mut W, bytes: &[u8]) -> io::Result<()> {
    leb128::write::unsigned(output, bytes.len() as u64)?;
    output.write_all(bytes)
}

fn write_value<W: Write>(output: &mut W, value: &Value) -> io::Result<()> {
    match value {
        Value::Null => output.write_all(&[TAG_NULL]),
        Value::Bool(b) => output.write_all(&[TAG_BOOL, *b as u8]),
        Value::SInt(n) => {
            output.write_all(&[TAG_SINT])?;
            leb128::write::signed(output, *n).map(drop)
        }
        Value::UInt(n) => {
            output.write_all(&[TAG_UINT])?;
            leb128::write::unsigned(output, *n).map(drop)
        }
        Value::Float(f) => {
            output.write_all(&[TAG_FLOAT])?;
            output.write_all(&f.to_le_bytes())
        }
        Value::Str(s) => {
            output.write_all(&[TAG_STR])?;
            write_bytes(output, s.as_bytes())
        }
        Value::Blob(bytes) => {
            output.write_all(&[TAG_BLOB])?;
            write_bytes(output, bytes)
        }
    }
}

#[cfg(test)]
fn sample_trace() -> Vec<u8> {
    let mut writer = TraceWriter::new(Vec::new()).unwrap();
    writer
        .write_call(
            "glClearColor",
            &[Value::Float(0.25), Value::Float(0.5), Value::Float(0.75), Value::Float(1.0)],
        )
        .unwrap();
    writer
        .write_call("glClear", &[Value::UInt(gleam::gl::COLOR_BUFFER_BIT as u64)])
        .unwrap();
    writer
        .write_record(&CallRecord {
            no: 41,
            name: "glGetString".to_owned(),
            args: vec![Value::UInt(0x1f00)],
            ret: Some(Value::Str("Mesa ✓".to_owned())),
        })
        .unwrap();
    writer
        .write_call(
            "glXSwapBuffers",
            &[Value::Blob(vec![1, 2, 3]), Value::SInt(-300), Value::Bool(true), Value::Null],
        )
        .unwrap();
    writer.finish().unwrap()
}

#[test]
fn test_read_written_trace() {
    let bytes = sample_trace();
    let reader = TraceReader::new(&bytes[..]).unwrap();
    let calls: Vec<CallRecord> = reader.collect();

    assert_eq!(calls.len(), 4);
    assert_eq!(
        calls.iter().map(|call| call.no).collect::<Vec<_>>(),
        vec![0, 1, 41, 42]
    );
    assert_eq!(calls[0].name, "glClearColor");
    assert_eq!(calls[0].args[1], Value::Float(0.5));
    assert_eq!(calls[2].ret, Some(Value::Str("Mesa ✓".to_owned())));
    assert_eq!(calls[3].ret, None);
    assert_eq!(
        calls[3].args,
        vec![Value::Blob(vec![1, 2, 3]), Value::SInt(-300), Value::Bool(true), Value::Null]
    );
}

#[test]
fn test_empty_trace() {
    let bytes = TraceWriter::new(Vec::new()).unwrap().finish().unwrap();
    let mut reader = TraceReader::new(&bytes[..]).unwrap();
    assert!(reader.next().is_none());
    assert!(reader.error().is_none());
}

#[test]
fn test_truncated_trace() {
    let bytes = sample_trace();
    // Cut the last record short.
    let mut reader = TraceReader::new(&bytes[..bytes.len() - 3]).unwrap();
    assert_eq!(reader.by_ref().count(), 3);
    assert!(matches!(reader.error(), Some(TraceError::Truncated)));

    // Once the stream has failed, it stays finished.
    assert!(reader.next().is_none());
}

#[test]
fn test_bad_header() {
    assert!(matches!(
        TraceReader::new(&b"PNG\x0d\x0a\x1a\x0a\x00"[..]),
        Err(TraceError::BadMagic)
    ));
    assert!(matches!(
        TraceReader::new(&b"GLRT\x07\x00\x00\x00"[..]),
        Err(TraceError::Version(7))
    ));
    assert!(matches!(TraceReader::new(&b"GL"[..]), Err(TraceError::BadMagic)));
}

#[test]
fn test_bad_tag() {
    let mut bytes = header().to_vec();
    bytes.extend_from_slice(&[3, 4, b'g', b'l', b'F', b'n', 1, 0x7f]);
    let mut reader = TraceReader::new(&bytes[..]).unwrap();
    assert!(reader.next().is_none());
    assert!(matches!(reader.error(), Some(TraceError::BadTag(0x7f))));
}
