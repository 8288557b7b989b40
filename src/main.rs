use {
  clap::{error::ErrorKind, Parser},
  cotton::{cli, privileged, Cli, Logger},
  libc::c_int,
  nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal},
  std::{io, process},
  tracing_subscriber::EnvFilter,
};

fn main() {
  process::exit(run());
}

fn run() -> i32 {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_writer(io::stderr)
    .init();

  // Park root in the real uid so a setuid install runs unprivileged
  // outside explicit privileged regions.
  privileged::demote();

  install_signal_handlers();

  let arguments = match Cli::try_parse() {
    Ok(arguments) => arguments,
    Err(error) => {
      let _ = error.print();
      return match error.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 1,
        _ => 2,
      };
    }
  };

  let logger = Logger::auto(arguments.json);

  if let Err(error) = cli::run(arguments, &logger) {
    logger.error(error.code(), error.to_string());
  }

  logger.finish();

  if logger.had_errors() {
    3
  } else {
    0
  }
}

extern "C" fn fatal_signal(_signal: c_int) {
  // Only async-signal-safe calls are allowed here; the message is
  // pre-rendered and written raw.
  const MESSAGE: &[u8] = b"cotton: caught fatal signal\n";
  unsafe {
    libc::write(2, MESSAGE.as_ptr().cast(), MESSAGE.len());
    libc::_exit(255);
  }
}

fn install_signal_handlers() {
  let action = SigAction::new(
    SigHandler::Handler(fatal_signal),
    SaFlags::empty(),
    SigSet::empty(),
  );

  for signal in [
    Signal::SIGHUP,
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGILL,
    Signal::SIGABRT,
    Signal::SIGFPE,
    Signal::SIGSEGV,
    Signal::SIGPIPE,
    Signal::SIGTERM,
    Signal::SIGBUS,
  ] {
    unsafe {
      let _ = sigaction(signal, &action);
    }
  }
}
