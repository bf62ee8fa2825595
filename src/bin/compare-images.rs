use anyhow::{bail, Context};
use docopt::Docopt;
use serde::Deserialize;

use glretrace::Image;

static USAGE: &str = "
Compare two PNG images.

Print the average precision, in bits per channel sample, to which image <b>
matches image <a>, the same figure glretrace reports when comparing snapshots
against references.

Usage:
  compare-images <a> <b>
";

#[derive(Debug, Deserialize)]
struct Args {
    arg_a: String,
    arg_b: String,
}

fn main() -> anyhow::Result<()> {
    let args: Args = Docopt::new(USAGE)
        .and_then(|d| d.deserialize())
        .unwrap_or_else(|e| e.exit());

    let a = Image::read_png(&args.arg_a).with_context(|| format!("reading {}", args.arg_a))?;
    let b = Image::read_png(&args.arg_b).with_context(|| format!("reading {}", args.arg_b))?;
    if (a.width, a.height) != (b.width, b.height) {
        bail!(
            "{} is {}x{}, but {} is {}x{}",
            args.arg_a,
            a.width,
            a.height,
            args.arg_b,
            b.width,
            b.height
        );
    }

    println!("{} average precision of {} bits", args.arg_b, b.compare(&a));
    Ok(())
}
