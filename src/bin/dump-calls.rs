use anyhow::Context;
use docopt::Docopt;
use serde::Deserialize;
use std::io::{self, Write};

use glretrace::TraceReader;

const USAGE: &str = "
Dump the calls recorded in glretrace traces.

Usage:
  dump-calls <trace>...
";

#[derive(Debug, Deserialize)]
struct Args {
    arg_trace: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    let args: Args = Docopt::new(USAGE)
        .and_then(|d| d.deserialize())
        .unwrap_or_else(|e| e.exit());

    let stdout = io::stdout();
    let mut out = io::BufWriter::new(stdout.lock());

    for trace in &args.arg_trace {
        let mut calls = match TraceReader::open(trace) {
            Ok(calls) => calls,
            Err(err) => {
                eprintln!("{}: {}", trace, err);
                continue;
            }
        };

        let mut count = 0;
        while let Some(call) = calls
            .read_call()
            .with_context(|| format!("{}: reading call after {} calls", trace, count))?
        {
            writeln!(out, "{}", call)?;
            count += 1;
        }
    }

    out.flush()?;
    Ok(())
}
