//! Command-line configuration for `glretrace`.

use docopt::Docopt;
use serde::Deserialize;
use std::path::PathBuf;

pub const USAGE: &str = "
Replay TRACE.

Usage:
  glretrace [-b] [-c PREFIX] [--db] [-s PREFIX] [-v...] [-D CALLNO] [-w] [--] <trace>...
  glretrace --help

Options:
  -b            benchmark (no glGetError; no messages)
  -c PREFIX     compare against snapshots
  --db          use a double buffer visual (may be spelled -db)
  -s PREFIX     take snapshots
  -v            verbose output
  -D CALLNO     dump state at specific call no
  -w            wait on final frame
  --help        show this message
";

/// Verbosity in benchmark mode: only the final summary line.
pub const QUIET: i32 = -1;

/// Verbosity when dumping state: nothing but the dump itself.
pub const SILENT: i32 = -2;

#[derive(Debug, Deserialize)]
struct Args {
    arg_trace: Vec<String>,
    flag_b: bool,
    flag_c: Option<String>,
    flag_db: bool,
    flag_s: Option<String>,
    #[serde(rename = "flag_D")]
    flag_dump_state: Option<u32>,
    flag_w: bool,
}

/// Settings for a `glretrace` run. Nothing changes these once parsed.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub double_buffer: bool,

    /// How much to print. 0 is the default; `-b` and `-D` reset it, and each
    /// `-v` adds one to whatever it is at that point. Negative
    /// values suppress the `Read`/`Wrote` notices (below 0) and the final
    /// summary (below -1).
    pub verbosity: i32,

    /// Skip error checks, for timing runs.
    pub benchmark: bool,

    /// After a trace is done, wait for the window to be closed.
    pub wait: bool,

    /// Where to write snapshot images, if anywhere.
    pub snapshot_prefix: Option<String>,

    /// Where to find reference images to compare against, if anywhere.
    pub compare_prefix: Option<String>,

    /// Dump state and stop at the first call at or after this one.
    pub dump_state: Option<u32>,

    pub traces: Vec<PathBuf>,

    pub window_width: u32,
    pub window_height: u32,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            double_buffer: false,
            verbosity: 0,
            benchmark: false,
            wait: false,
            snapshot_prefix: None,
            compare_prefix: None,
            dump_state: None,
            traces: Vec::new(),
            window_width: 256,
            window_height: 256,
        }
    }
}

impl Config {
    /// Parse a full command line, including the program name.
    ///
    /// On `--help` or a bad option, this returns a `docopt::Error`; its `exit`
    /// method prints the right message and exits with the right status.
    pub fn from_args<I, S>(argv: I) -> Result<Config, docopt::Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv = normalize_argv(argv.into_iter().map(Into::into));
        let verbosity = verbosity(&argv);
        let args: Args = Docopt::new(USAGE)
            .and_then(|d| d.argv(argv).help(true).deserialize())?;

        Ok(Config {
            double_buffer: args.flag_db,
            verbosity,
            benchmark: args.flag_b,
            wait: args.flag_w,
            snapshot_prefix: args.flag_s,
            compare_prefix: args.flag_c,
            dump_state: args.flag_dump_state,
            traces: args.arg_trace.into_iter().map(PathBuf::from).collect(),
            ..Config::default()
        })
    }
}

/// Docopt would read `-db` as `-d -b`. Spell it `--db` instead, unless it
/// comes after `--`, where it's a file name.
fn normalize_argv<I: Iterator<Item = String>>(argv: I) -> Vec<String> {
    let mut options_done = false;
    argv.enumerate()
        .map(|(i, arg)| {
            if i == 0 || options_done {
                return arg;
            }
            match arg.as_str() {
                "--" => {
                    options_done = true;
                    arg
                }
                "-db" => "--db".to_owned(),
                _ => arg,
            }
        })
        .collect()
}

/// Work out the verbosity from an already validated command line.
///
/// `-b` and `-D` set it, and each `-v` raises whatever it is at that point,
/// so order matters; docopt only gives us a count.
fn verbosity(argv: &[String]) -> i32 {
    let mut verbosity = 0;
    let mut args = argv.iter().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--" {
            break;
        }
        if arg.starts_with("--") || !arg.starts_with('-') || arg.len() == 1 {
            continue;
        }
        // Short options may be stacked, as in `-vvb`.
        for (i, flag) in arg.char_indices().skip(1) {
            match flag {
                'v' => verbosity += 1,
                'b' => verbosity = QUIET,
                'D' | 'c' | 's' => {
                    if flag == 'D' {
                        verbosity = SILENT;
                    }
                    // The value is the rest of this word, or the next one.
                    if i + 1 == arg.len() {
                        args.next();
                    }
                    break;
                }
                _ => (),
            }
        }
    }
    verbosity
}

#[cfg(test)]
fn parse(args: &[&str]) -> Result<Config, docopt::Error> {
    Config::from_args(std::iter::once("glretrace").chain(args.iter().cloned()))
}

#[test]
fn test_defaults() {
    let config = parse(&["a.trace", "b.trace"]).unwrap();
    assert_eq!(
        config,
        Config {
            traces: vec![PathBuf::from("a.trace"), PathBuf::from("b.trace")],
            ..Config::default()
        }
    );
}

#[test]
fn test_flags() {
    let config = parse(&["-s", "/tmp/out", "-db", "-c", "/tmp/ref", "-w", "x.trace"]).unwrap();
    assert!(config.double_buffer);
    assert!(config.wait);
    assert!(!config.benchmark);
    assert_eq!(config.snapshot_prefix.as_deref(), Some("/tmp/out"));
    assert_eq!(config.compare_prefix.as_deref(), Some("/tmp/ref"));
    assert_eq!(config.dump_state, None);
    assert_eq!(config.traces, vec![PathBuf::from("x.trace")]);

    assert!(parse(&["--db", "x.trace"]).unwrap().double_buffer);
}

#[test]
fn test_verbosity() {
    let mut last = i32::MIN;
    for count in 0..4 {
        let mut args = vec!["-v"; count];
        args.push("x.trace");
        let verbosity = parse(&args).unwrap().verbosity;
        assert_eq!(verbosity, count as i32);
        assert!(verbosity > last);
        last = verbosity;
    }

    let config = parse(&["-b", "x.trace"]).unwrap();
    assert!(config.benchmark);
    assert_eq!(config.verbosity, QUIET);

    let config = parse(&["-D", "10", "x.trace"]).unwrap();
    assert_eq!(config.dump_state, Some(10));
    assert_eq!(config.verbosity, SILENT);

    // `-b` and `-D` reset the level; `-v` counts up from wherever it is.
    assert_eq!(parse(&["-v", "-b", "x.trace"]).unwrap().verbosity, QUIET);
    assert_eq!(parse(&["-b", "-v", "x.trace"]).unwrap().verbosity, QUIET + 1);
    assert_eq!(parse(&["-v", "-D", "3", "x.trace"]).unwrap().verbosity, SILENT);
    assert_eq!(parse(&["-D", "3", "-v", "x.trace"]).unwrap().verbosity, SILENT + 1);
    assert_eq!(parse(&["-D", "3", "-b", "x.trace"]).unwrap().verbosity, QUIET);
    assert_eq!(parse(&["-b", "-D", "10", "x.trace"]).unwrap().verbosity, SILENT);
    assert_eq!(parse(&["-bvv", "x.trace"]).unwrap().verbosity, QUIET + 2);
    assert_eq!(parse(&["-D3", "-v", "x.trace"]).unwrap().verbosity, SILENT + 1);

    // File names that look like flags don't count.
    assert_eq!(parse(&["-v", "--", "-b"]).unwrap().verbosity, 1);
}

#[test]
fn test_end_of_options() {
    let config = parse(&["-v", "--", "-db"]).unwrap();
    assert!(!config.double_buffer);
    assert_eq!(config.verbosity, 1);
    assert_eq!(config.traces, vec![PathBuf::from("-db")]);
}

#[test]
fn test_errors() {
    match parse(&["-z", "x.trace"]) {
        Err(docopt::Error::WithProgramUsage(..)) | Err(docopt::Error::Argv(..)) => (),
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(parse(&["-D", "ten", "x.trace"]).is_err());
    assert!(parse(&["-c"]).is_err());

    match parse(&["--help"]) {
        Err(err) => assert!(!err.fatal()),
        Ok(config) => panic!("--help parsed as {:?}", config),
    }
}
