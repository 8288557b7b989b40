use super::*;

#[derive(Debug, Parser)]
#[command(name = "cotton", version, about = "Command-line sandbox supervisor")]
pub struct Cli {
  /// Directory sandboxes are created under.
  #[arg(short = 'r', long = "box-root", default_value = "/tmp", global = true)]
  pub box_root: Utf8PathBuf,

  /// Emit a JSON object even when stdout is a terminal.
  #[arg(short = 'j', long = "json", global = true)]
  pub json: bool,

  /// Id of the box to operate on.
  #[arg(short = 'b', long = "box-id", global = true)]
  pub box_id: Option<u64>,

  #[command(subcommand)]
  pub command: Command,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum StreamArg {
  Stdin,
  Stdout,
  Stderr,
}

impl From<StreamArg> for Stream {
  fn from(stream: StreamArg) -> Self {
    match stream {
      StreamArg::Stdin => Stream::Stdin,
      StreamArg::Stdout => Stream::Stdout,
      StreamArg::Stderr => Stream::Stderr,
    }
  }
}

#[derive(Debug, Subcommand)]
pub enum Command {
  /// List the backends available on this system.
  List,
  /// Allocate a new box of the given type and print its id.
  Create { box_type: String },
  /// Probe whether the box is in a consistent state.
  Check,
  /// Print the absolute path of the box's file_root.
  GetRoot,
  /// Read or set the address-space limit.
  MemoryLimit { value: Option<Space> },
  /// Read or set the CPU-time limit.
  CpuLimit { value: Option<Time> },
  /// Read or set the wall-clock limit enforced by the supervisor.
  WallLimit { value: Option<Time> },
  /// Read or set the file-size limit.
  DiskLimit { value: Option<Space> },
  /// Read or set the process-count limit.
  ProcessLimit { value: Option<u64> },
  /// Read or set a stream redirection; `-` restores inheritance.
  Redirect {
    stream: StreamArg,
    value: Option<String>,
  },
  /// List mounts, query one, or bind `outer` at `inner`.
  Mount {
    /// Bind read-write instead of read-only.
    #[arg(long)]
    rw: bool,
    inner: Option<Utf8PathBuf>,
    outer: Option<Utf8PathBuf>,
  },
  /// Remove the mount configured at `inner`.
  Umount { inner: Utf8PathBuf },
  /// Execute a program inside the box and wait for it.
  Run {
    exec: String,
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
  },
  /// Print the CPU time consumed by the last run.
  RunningTime,
  /// Print the wall-clock time of the last run.
  WallTime,
  /// Print the peak memory of the last run.
  MemoryUsage,
  /// Print how the last run ended.
  Status,
  /// Print the return code of the last run.
  ReturnCode,
  /// Print the signal that terminated the last run.
  Signal,
  /// Reset the box to a clean state.
  Clear,
  /// Delete the box; its id becomes free again.
  Destroy,
}

impl Command {
  /// The sentinel printed when the operation fails or is unsupported.
  fn sentinel(&self) -> Value {
    match self {
      Command::List | Command::Create { .. } => Value::Null,
      Command::GetRoot | Command::Status => Value::Text(String::new()),
      Command::MemoryLimit { value: None } | Command::DiskLimit { value: None } => {
        Value::Space(Space::ZERO)
      }
      Command::CpuLimit { value: None } | Command::WallLimit { value: None } => {
        Value::Time(Time::ZERO)
      }
      Command::ProcessLimit { value: None }
      | Command::ReturnCode
      | Command::Signal => Value::Integer(0),
      Command::RunningTime | Command::WallTime => Value::Time(Time::ZERO),
      Command::MemoryUsage => Value::Space(Space::ZERO),
      Command::Redirect { value: None, .. } => Value::Text(String::new()),
      Command::Mount {
        inner: None,
        outer: None,
        ..
      } => Value::Mounts(Vec::new()),
      Command::Mount {
        inner: Some(_),
        outer: None,
        ..
      } => Value::Text(String::new()),
      _ => Value::Bool(false),
    }
  }
}

/// Executes one parsed invocation: load or instantiate the box, apply the
/// operation, persist, report.
pub fn run(cli: Cli, logger: &Logger) -> Result {
  let Cli {
    box_root,
    json: _,
    box_id,
    command,
  } = cli;

  match command {
    Command::List => {
      logger.result(Value::Backends(registry::list(&box_root)));
      Ok(())
    }
    Command::Create { box_type } => {
      let mut sandbox = registry::create(&box_type, &box_root)?;
      let id = sandbox.create_box(logger)?;
      store::save(&box_root, sandbox.as_ref())?;
      logger.result(Value::Integer(id as i64));
      Ok(())
    }
    command => {
      let id = box_id.ok_or(Error::MissingBoxId)?;
      let mut sandbox = store::load(&box_root, id)?;

      let destroys = matches!(command, Command::Destroy);
      let sentinel = command.sentinel();

      let outcome = apply(command, sandbox.as_mut(), logger);

      // A destroyed box has no directory to persist into; every other
      // command writes the (possibly unchanged) state back.
      if !(destroys && outcome.is_ok()) {
        store::save(&box_root, sandbox.as_ref())?;
      }

      match outcome {
        Ok(value) => logger.result(value),
        Err(error) => {
          logger.error(error.code(), error.to_string());
          logger.result(sentinel);
        }
      }

      Ok(())
    }
  }
}

fn apply(command: Command, sandbox: &mut dyn Sandbox, logger: &Logger) -> Result<Value> {
  match command {
    Command::List | Command::Create { .. } => Err(Error::Unreachable),
    Command::Check => Ok(Value::Bool(sandbox.check()?)),
    Command::GetRoot => Ok(Value::Text(sandbox.root()?.into_string())),
    Command::MemoryLimit { value: None } => Ok(Value::Space(sandbox.memory_limit()?)),
    Command::MemoryLimit { value: Some(limit) } => {
      sandbox.set_memory_limit(limit)?;
      Ok(Value::Bool(true))
    }
    Command::CpuLimit { value: None } => Ok(Value::Time(sandbox.cpu_limit()?)),
    Command::CpuLimit { value: Some(limit) } => {
      sandbox.set_cpu_limit(limit)?;
      Ok(Value::Bool(true))
    }
    Command::WallLimit { value: None } => Ok(Value::Time(sandbox.wall_time_limit()?)),
    Command::WallLimit { value: Some(limit) } => {
      sandbox.set_wall_time_limit(limit)?;
      Ok(Value::Bool(true))
    }
    Command::DiskLimit { value: None } => Ok(Value::Space(sandbox.disk_limit()?)),
    Command::DiskLimit { value: Some(limit) } => {
      sandbox.set_disk_limit(limit)?;
      Ok(Value::Bool(true))
    }
    Command::ProcessLimit { value: None } => {
      Ok(Value::Integer(sandbox.process_limit()? as i64))
    }
    Command::ProcessLimit { value: Some(limit) } => {
      sandbox.set_process_limit(logger, limit)?;
      Ok(Value::Bool(true))
    }
    Command::Redirect {
      stream,
      value: None,
    } => Ok(Value::Text(sandbox.redirection(stream.into())?)),
    Command::Redirect {
      stream,
      value: Some(value),
    } => {
      let path = (value != "-").then_some(value.as_str());
      sandbox.redirect(stream.into(), path)?;
      Ok(Value::Bool(true))
    }
    Command::Mount {
      inner: None,
      outer: None,
      ..
    } => Ok(Value::Mounts(sandbox.mounts()?)),
    Command::Mount {
      inner: Some(inner),
      outer: None,
      ..
    } => Ok(Value::Text(sandbox.mount_target(&inner)?)),
    Command::Mount {
      rw,
      inner: Some(inner),
      outer: Some(outer),
    } => {
      sandbox.add_mount(&inner, &outer, rw)?;
      Ok(Value::Bool(true))
    }
    Command::Mount { inner: None, .. } => Err(Error::Unreachable),
    Command::Umount { inner } => Ok(Value::Bool(sandbox.remove_mount(&inner)?)),
    Command::Run { exec, args } => {
      sandbox.run(logger, &exec, &args)?;
      Ok(Value::Bool(true))
    }
    Command::RunningTime => Ok(Value::Time(sandbox.running_time()?)),
    Command::WallTime => Ok(Value::Time(sandbox.wall_time()?)),
    Command::MemoryUsage => Ok(Value::Space(sandbox.memory_usage()?)),
    Command::Status => Ok(Value::Text(sandbox.exit_status()?.to_string())),
    Command::ReturnCode => Ok(Value::Integer(sandbox.return_code()?.into())),
    Command::Signal => Ok(Value::Integer(sandbox.signal()?.into())),
    Command::Clear => {
      sandbox.clear()?;
      Ok(Value::Bool(true))
    }
    Command::Destroy => {
      sandbox.delete_box()?;
      Ok(Value::Bool(true))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(args: &[&str]) -> Cli {
    Cli::try_parse_from(args).unwrap()
  }

  #[test]
  fn global_options() {
    let cli = parse(&["cotton", "-r", "/var/boxes", "-j", "-b", "3", "status"]);

    assert_eq!(cli.box_root, "/var/boxes");
    assert!(cli.json);
    assert_eq!(cli.box_id, Some(3));
    assert!(matches!(cli.command, Command::Status));
  }

  #[test]
  fn defaults() {
    let cli = parse(&["cotton", "list"]);

    assert_eq!(cli.box_root, "/tmp");
    assert!(!cli.json);
    assert_eq!(cli.box_id, None);
  }

  #[test]
  fn limit_values_parse_with_units() {
    let cli = parse(&["cotton", "-b", "1", "memory-limit", "8MiB"]);
    assert!(matches!(
      cli.command,
      Command::MemoryLimit { value: Some(limit) } if limit == Space::from_bytes(8 << 20)
    ));

    let cli = parse(&["cotton", "-b", "1", "wall-limit", "0.5s"]);
    assert!(matches!(
      cli.command,
      Command::WallLimit { value: Some(limit) } if limit == Time::from_micros(500_000)
    ));

    assert!(Cli::try_parse_from(["cotton", "-b", "1", "cpu-limit", "soon"]).is_err());
  }

  #[test]
  fn run_collects_trailing_arguments() {
    let cli = parse(&["cotton", "-b", "1", "run", "/bin/sh", "-c", "exit 3"]);

    match cli.command {
      Command::Run { exec, args } => {
        assert_eq!(exec, "/bin/sh");
        assert_eq!(args, vec!["-c", "exit 3"]);
      }
      other => panic!("parsed {other:?}"),
    }
  }

  #[test]
  fn mount_forms() {
    assert!(matches!(
      parse(&["cotton", "-b", "1", "mount"]).command,
      Command::Mount {
        rw: false,
        inner: None,
        outer: None,
      }
    ));

    assert!(matches!(
      parse(&["cotton", "-b", "1", "mount", "/ro"]).command,
      Command::Mount {
        inner: Some(_),
        outer: None,
        ..
      }
    ));

    assert!(matches!(
      parse(&["cotton", "-b", "1", "mount", "--rw", "/rw", "/tmp/shared"]).command,
      Command::Mount {
        rw: true,
        inner: Some(_),
        outer: Some(_),
      }
    ));
  }

  #[test]
  fn global_flags_are_accepted_after_the_command() {
    let cli = parse(&["cotton", "status", "-b", "7"]);

    assert_eq!(cli.box_id, Some(7));
  }

  #[test]
  fn unsupported_operations_report_254_and_a_sentinel() {
    use tempfile::TempDir;

    let temp = TempDir::new().unwrap();
    let base = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let logger = Logger::new(true);

    let mut sandbox = registry::create("unix", &base).unwrap();
    sandbox.create_box(&logger).unwrap();

    let result = apply(Command::Check, sandbox.as_mut(), &logger);

    assert_eq!(result.unwrap_err().code(), 254);
    assert!(matches!(Command::Check.sentinel(), Value::Bool(false)));
    assert!(matches!(Command::Status.sentinel(), Value::Text(_)));
    assert!(matches!(Command::MemoryUsage.sentinel(), Value::Space(_)));
  }

  #[test]
  fn end_to_end_create_configure_and_reload() {
    use tempfile::TempDir;

    let temp = TempDir::new().unwrap();
    let root = temp.path().to_str().unwrap();

    let logger = Logger::new(true);
    run(
      parse(&["cotton", "-r", root, "create", "unix"]),
      &logger,
    )
    .unwrap();

    run(
      parse(&["cotton", "-r", root, "-b", "1", "memory-limit", "8MiB"]),
      &logger,
    )
    .unwrap();

    let reloaded = store::load(Utf8Path::new(root), 1).unwrap();
    assert_eq!(
      reloaded.memory_limit().unwrap(),
      Space::from_bytes(8 << 20)
    );

    run(
      parse(&["cotton", "-r", root, "-b", "1", "destroy"]),
      &logger,
    )
    .unwrap();
    assert!(!store::box_dir(Utf8Path::new(root), 1).exists());
    assert!(!logger.had_errors());
  }
}
