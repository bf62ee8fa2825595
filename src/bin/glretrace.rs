//! Replay OpenGL call traces on a headless software context.

use glretrace::{
    Config, Outcome, ReplaySession, SoftContext, SoftDispatcher, TraceReader, WindowSystem,
};
use log::error;
use std::io::{self, Write};
use std::process;

fn main() {
    let config = Config::from_args(std::env::args()).unwrap_or_else(|e| e.exit());

    let default_filter = if config.verbosity >= 1 { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    if let Err(err) = replay_traces(&config) {
        eprintln!("glretrace: {}", err);
        process::exit(1);
    }
}

/// Replay the first trace named in `config` that we can open. In wait mode,
/// replay each of them in turn, on one shared context.
fn replay_traces(config: &Config) -> io::Result<()> {
    let context = SoftContext::new(
        config.window_width,
        config.window_height,
        config.double_buffer,
    );
    let mut dispatcher = SoftDispatcher::new(&context);

    let stdout = io::stdout();
    let stderr = io::stderr();
    let mut out = stdout.lock();
    let mut err = stderr.lock();

    for path in &config.traces {
        let mut calls = match TraceReader::open(path) {
            Ok(calls) => calls,
            Err(e) => {
                error!("{}: {}", path.display(), e);
                continue;
            }
        };

        let session = ReplaySession::new(config, &context, &context, &mut out, &mut err);
        match session.run(&mut calls, &mut dispatcher)? {
            Outcome::Finished(_) => (),
            // The dump is all that was asked for.
            Outcome::StateDumped { .. } => break,
        }

        // Without `-w`, one trace is the whole run.
        if !config.wait {
            break;
        }
        while context.process_events() {}
    }

    out.flush()
}
