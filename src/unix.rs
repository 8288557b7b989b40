use super::*;

/// Subclass hooks around the portable run pipeline. The namespace backend
/// implements these; the portable backend runs with the do-nothing
/// defaults.
pub(crate) trait Hooks {
  /// Parent side, before the fork.
  fn pre_fork(&mut self, _logger: &Logger) -> Result {
    Ok(())
  }

  /// Child side, immediately after the fork. Reports its own failure over
  /// the pipe and returns false; the child then exits.
  fn post_fork(&mut self, _pipe: &pipe::Sender) -> bool {
    true
  }

  /// Child side, after the rlimits and before the privilege hand-off.
  fn pre_exec(&mut self, _pipe: &pipe::Sender) -> bool {
    true
  }

  /// Parent side, after the child has been reaped.
  fn cleanup(&mut self, _logger: &Logger) -> Result {
    Ok(())
  }
}

pub(crate) struct NoHooks;

impl Hooks for NoHooks {}

/// The default portable backend: plain fork/exec under rlimits, with the
/// error pipe between child and supervisor.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UnixSandbox {
  base: Utf8PathBuf,
  id: u64,
  memory_limit: Space,
  cpu_limit: Time,
  wall_time_limit: Time,
  process_limit: u64,
  disk_limit: Space,
  stdin: String,
  stdout: String,
  stderr: String,
  memory_usage: Space,
  running_time: Time,
  wall_time: Time,
  exit_status: ExitStatus,
  return_code: i32,
  signal: i32,
}

impl UnixSandbox {
  pub fn new(base: Utf8PathBuf) -> Self {
    Self {
      base,
      id: 0,
      memory_limit: Space::ZERO,
      cpu_limit: Time::ZERO,
      wall_time_limit: Time::ZERO,
      process_limit: 0,
      disk_limit: Space::ZERO,
      stdin: String::new(),
      stdout: String::new(),
      stderr: String::new(),
      memory_usage: Space::ZERO,
      running_time: Time::ZERO,
      wall_time: Time::ZERO,
      exit_status: ExitStatus::NotRun,
      return_code: 0,
      signal: 0,
    }
  }

  fn boxed(base: Utf8PathBuf) -> Box<dyn Sandbox> {
    Box::new(Self::new(base))
  }

  pub(crate) fn dir(&self) -> Utf8PathBuf {
    store::box_dir(&self.base, self.id)
  }

  pub(crate) fn root_path(&self) -> Utf8PathBuf {
    self.dir().join("file_root")
  }

  /// The shared run pipeline: lock, pipe, fork, then supervise on the
  /// parent side while the child sets itself up and execs.
  pub(crate) fn execute<H: Hooks>(
    &mut self,
    logger: &Logger,
    command: &str,
    args: &[String],
    hooks: &mut H,
  ) -> Result {
    hooks.pre_fork(logger)?;

    let _lock = store::Lock::acquire(self.dir().join("run_lock"))?;

    let plan = ChildPlan::new(self, command, args)?;

    let (receiver, sender) = pipe::channel()?;

    debug!("running `{command}` in box {}", self.id);

    match unsafe { unistd::fork() }.map_err(Error::syscall("fork"))? {
      ForkResult::Parent { child } => {
        drop(sender);
        let supervised = self.supervise(logger, &receiver, child);
        let cleaned = hooks.cleanup(logger);
        supervised.and(cleaned)
      }
      ForkResult::Child => {
        drop(receiver);
        if !hooks.post_fork(&sender) {
          unsafe { libc::_exit(1) }
        }
        plan.exec(&sender, hooks)
      }
    }
  }

  /// Drains the error pipe, then waits for the child and collects its
  /// statistics.
  ///
  /// A fatal record aborts supervision without reaping; the child is
  /// already exiting, and a short-lived CLI invocation can afford the
  /// zombie.
  fn supervise(&mut self, logger: &Logger, receiver: &pipe::Receiver, child: Pid) -> Result {
    while let Some(report) = receiver.recv()? {
      if report.is_warning() {
        logger.warning(5, report.message());
      } else {
        return Err(Error::Child {
          id: report.id,
          errno: Errno::from_raw(report.errno),
        });
      }
    }

    // EOF: the exec went through, or the child died silent.
    let start = Instant::now();
    let mut timed_out = false;

    let status = if self.wall_time_limit.is_zero() {
      wait_blocking(child)?
    } else {
      let limit = Duration::from(self.wall_time_limit);
      loop {
        thread::sleep(Duration::from_millis(1));
        match wait::waitpid(child, Some(WaitPidFlag::WNOHANG)) {
          Ok(WaitStatus::StillAlive) => {}
          Ok(status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..))) => break status,
          Ok(_) => {}
          Err(Errno::EINTR) => {}
          Err(errno) => return Err(Error::syscall("waitpid")(errno)),
        }
        if start.elapsed() >= limit {
          timed_out = true;
          let _ = signal::kill(child, Signal::SIGKILL);
          break wait_blocking(child)?;
        }
      }
    };

    let wall = start.elapsed();

    self.return_code = match status {
      WaitStatus::Exited(_, code) => code,
      _ => 0,
    };
    self.signal = match status {
      WaitStatus::Signaled(_, signal, _) => signal as i32,
      _ => 0,
    };
    self.exit_status = if timed_out {
      ExitStatus::TimedOut
    } else if matches!(status, WaitStatus::Signaled(..)) {
      ExitStatus::Signaled
    } else {
      ExitStatus::Exited
    };
    self.wall_time = wall.into();

    let usage = resource::getrusage(UsageWho::RUSAGE_CHILDREN)
      .map_err(Error::syscall("getrusage"))?;
    let cpu = |time: TimeVal| time.tv_sec() * 1_000_000 + i64::from(time.tv_usec());
    self.running_time =
      Time::from_micros((cpu(usage.user_time()) + cpu(usage.system_time())).max(0) as u64);
    self.memory_usage = Space::from_rlimit_unit(usage.max_rss().max(0) as u64);

    debug!(
      "box {} finished: {:?} code {} signal {}",
      self.id, self.exit_status, self.return_code, self.signal
    );

    Ok(())
  }
}

/// Exits the child without running any cleanup; drops must not fire on
/// the child side of the fork.
fn die() -> ! {
  unsafe { libc::_exit(1) }
}

fn wait_blocking(child: Pid) -> Result<WaitStatus> {
  loop {
    match wait::waitpid(child, None) {
      Err(Errno::EINTR) => continue,
      Err(errno) => return Err(Error::syscall("waitpid")(errno)),
      Ok(status) => return Ok(status),
    }
  }
}

/// Everything the child needs after the fork, prepared up front so the
/// child side allocates nothing between `fork` and `execv`.
struct ChildPlan {
  argv: Vec<CString>,
  cpu_seconds: Option<u64>,
  disk_bytes: Option<u64>,
  executable: CString,
  memory: Option<u64>,
  processes: Option<u64>,
  root: CString,
  stderr: Option<CString>,
  stdin: Option<CString>,
  stdout: Option<CString>,
}

impl ChildPlan {
  fn new(sandbox: &UnixSandbox, command: &str, args: &[String]) -> Result<Self> {
    let cstring = |s: &str| {
      CString::new(s).map_err(|_| Error::Argument(format!("`{s}` contains a nul byte")))
    };

    // The command is looked up relative to the working directory, which is
    // about to become file_root.
    let executable = command.trim_start_matches('/');

    let root = sandbox.root_path();
    let redirect = |path: &str| -> Result<Option<CString>> {
      if path.is_empty() {
        Ok(None)
      } else {
        Ok(Some(cstring(root.join(path).as_str())?))
      }
    };

    let mut argv = vec![cstring(executable)?];
    for arg in args {
      argv.push(cstring(arg)?);
    }

    Ok(Self {
      argv,
      cpu_seconds: (!sandbox.cpu_limit.is_zero()).then(|| sandbox.cpu_limit.rlimit_seconds()),
      disk_bytes: (!sandbox.disk_limit.is_zero()).then(|| sandbox.disk_limit.bytes()),
      executable: cstring(executable)?,
      memory: (!sandbox.memory_limit.is_zero()).then(|| sandbox.memory_limit.rlimit_unit()),
      processes: (sandbox.process_limit != 0).then_some(sandbox.process_limit),
      root: cstring(root.as_str())?,
      stderr: redirect(&sandbox.stderr)?,
      stdin: redirect(&sandbox.stdin)?,
      stdout: redirect(&sandbox.stdout)?,
    })
  }

  /// The child executor. Every fatal failure reports a record and exits;
  /// rlimit failures are reported as warnings and execution continues.
  fn exec<H: Hooks>(&self, pipe: &pipe::Sender, hooks: &mut H) -> ! {
    if !redirect_fd(&self.stdin, 0, OFlag::O_RDONLY, pipe::STDIN_OPEN, pipe) {
      die();
    }
    if !redirect_fd(&self.stdout, 1, OFlag::O_RDWR, pipe::STDOUT_OPEN, pipe) {
      die();
    }
    if !redirect_fd(&self.stderr, 2, OFlag::O_RDWR, pipe::STDERR_OPEN, pipe) {
      die();
    }

    // A successful execv closes the pipe and thereby signals EOF.
    pipe.set_cloexec();

    if let Err(errno) = unistd::chdir(self.root.as_c_str()) {
      pipe.send(pipe::CHDIR, errno);
      die();
    }

    let limit = |resource, value: u64, id| {
      if resource::setrlimit(resource, value, value).is_err() {
        pipe.send(id, Errno::last());
      }
    };

    limit(Resource::RLIMIT_STACK, libc::RLIM_INFINITY, pipe::STACK_LIMIT);
    if let Some(memory) = self.memory {
      limit(Resource::RLIMIT_AS, memory, pipe::MEMORY_LIMIT);
    }
    if let Some(seconds) = self.cpu_seconds {
      limit(Resource::RLIMIT_CPU, seconds, pipe::CPU_LIMIT);
    }
    if let Some(processes) = self.processes {
      limit(Resource::RLIMIT_NPROC, processes, pipe::PROCESS_LIMIT);
    }
    if let Some(bytes) = self.disk_bytes {
      limit(Resource::RLIMIT_FSIZE, bytes, pipe::DISK_LIMIT);
      // No new files at all once the size of existing ones is capped.
      limit(Resource::RLIMIT_NOFILE, 0, pipe::DISK_LIMIT);
    }

    if !hooks.pre_exec(pipe) {
      die();
    }

    // Hand every uid to the invoking user: drop privileges if the binary
    // is setuid, do nothing otherwise.
    let _ = unsafe { libc::setreuid(unistd::geteuid().as_raw(), unistd::getuid().as_raw()) };
    let _ = unistd::setuid(unistd::getuid());

    if let Err(errno) = unistd::execv(&self.executable, &self.argv) {
      pipe.send(pipe::EXEC, errno);
    }
    die()
  }
}

fn redirect_fd(
  path: &Option<CString>,
  target: RawFd,
  oflag: OFlag,
  error_id: c_int,
  pipe: &pipe::Sender,
) -> bool {
  let Some(path) = path else { return true };

  match fcntl::open(path.as_c_str(), oflag, Mode::empty()) {
    Ok(fd) => {
      let _ = unistd::dup2(fd, target);
      true
    }
    Err(errno) => {
      pipe.send(error_id, errno);
      false
    }
  }
}

impl Sandbox for UnixSandbox {
  fn backend_name(&self) -> &'static str {
    "unix"
  }

  fn is_available(&self) -> bool {
    // If it compiles, it should work.
    true
  }

  fn overhead(&self) -> u32 {
    0
  }

  fn features(&self) -> Features {
    Features::MEMORY_LIMIT
      | Features::CPU_LIMIT
      | Features::WALL_TIME_LIMIT
      | Features::PROCESS_LIMIT
      | Features::DISK_LIMIT
      | Features::MEMORY_USAGE
      | Features::RUNNING_TIME
      | Features::WALL_TIME
      | Features::IO_REDIRECTION
      | Features::RETURN_CODE
      | Features::SIGNAL
  }

  fn id(&self) -> u64 {
    self.id
  }

  fn create_box(&mut self, logger: &Logger) -> Result<u64> {
    self.id = store::allocate(&self.base, logger)?;
    Ok(self.id)
  }

  fn archive(&self) -> BoxInfo {
    BoxInfo::Unix(self.clone())
  }

  fn root(&self) -> Result<Utf8PathBuf> {
    Ok(self.root_path())
  }

  fn set_memory_limit(&mut self, limit: Space) -> Result {
    self.memory_limit = limit;
    Ok(())
  }

  fn set_cpu_limit(&mut self, limit: Time) -> Result {
    self.cpu_limit = limit;
    Ok(())
  }

  fn set_wall_time_limit(&mut self, limit: Time) -> Result {
    self.wall_time_limit = limit;
    Ok(())
  }

  fn set_process_limit(&mut self, logger: &Logger, limit: u64) -> Result {
    if limit > 1 {
      logger.warning(4, "this backend has partial support for process limits");
    }
    self.process_limit = limit.min(1);
    Ok(())
  }

  fn set_disk_limit(&mut self, limit: Space) -> Result {
    self.disk_limit = limit;
    Ok(())
  }

  fn memory_limit(&self) -> Result<Space> {
    Ok(self.memory_limit)
  }

  fn cpu_limit(&self) -> Result<Time> {
    Ok(self.cpu_limit)
  }

  fn wall_time_limit(&self) -> Result<Time> {
    Ok(self.wall_time_limit)
  }

  fn process_limit(&self) -> Result<u64> {
    Ok(self.process_limit)
  }

  fn disk_limit(&self) -> Result<Space> {
    Ok(self.disk_limit)
  }

  fn redirect(&mut self, stream: Stream, path: Option<&str>) -> Result {
    let root = self.root_path();

    let slot = match stream {
      Stream::Stdin => &mut self.stdin,
      Stream::Stdout => &mut self.stdout,
      Stream::Stderr => &mut self.stderr,
    };

    let Some(path) = path else {
      slot.clear();
      return Ok(());
    };

    // Probe the target now so a bad redirection surfaces here instead of
    // inside the child.
    let target = root.join(path);
    let probe = match stream {
      Stream::Stdin => fs::OpenOptions::new().read(true).open(&target),
      Stream::Stdout | Stream::Stderr => fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .mode(store::FILE_MODE)
        .open(&target),
    };
    probe.map_err(Error::filesystem(format!("cannot open file {path}")))?;

    *slot = path.into();
    Ok(())
  }

  fn redirection(&self, stream: Stream) -> Result<String> {
    Ok(
      match stream {
        Stream::Stdin => &self.stdin,
        Stream::Stdout => &self.stdout,
        Stream::Stderr => &self.stderr,
      }
      .clone(),
    )
  }

  fn run(&mut self, logger: &Logger, command: &str, args: &[String]) -> Result {
    self.execute(logger, command, args, &mut NoHooks)
  }

  fn memory_usage(&self) -> Result<Space> {
    Ok(self.memory_usage)
  }

  fn running_time(&self) -> Result<Time> {
    Ok(self.running_time)
  }

  fn wall_time(&self) -> Result<Time> {
    Ok(self.wall_time)
  }

  fn exit_status(&self) -> Result<ExitStatus> {
    Ok(self.exit_status)
  }

  fn return_code(&self) -> Result<i32> {
    Ok(self.return_code)
  }

  fn signal(&self) -> Result<i32> {
    Ok(self.signal)
  }

  fn delete_box(&mut self) -> Result {
    store::delete(&self.base, self.id)
  }
}

inventory::submit! {
  registry::Backend {
    name: "unix",
    factory: UnixSandbox::boxed,
  }
}

#[cfg(test)]
mod tests {
  use {super::*, assert_matches::assert_matches, tempfile::TempDir};

  fn sandbox(temp: &TempDir) -> UnixSandbox {
    let base = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let mut sandbox = UnixSandbox::new(base);
    sandbox.create_box(&Logger::new(true)).unwrap();
    sandbox
  }

  #[test]
  fn limits_roundtrip_through_the_contract() {
    let temp = TempDir::new().unwrap();
    let mut sandbox = sandbox(&temp);

    sandbox.set_memory_limit("64MiB".parse().unwrap()).unwrap();
    sandbox.set_cpu_limit("1s".parse().unwrap()).unwrap();
    sandbox.set_wall_time_limit("2.5s".parse().unwrap()).unwrap();
    sandbox.set_disk_limit("1MiB".parse().unwrap()).unwrap();

    assert_eq!(sandbox.memory_limit().unwrap(), "64MiB".parse().unwrap());
    assert_eq!(sandbox.cpu_limit().unwrap(), "1s".parse().unwrap());
    assert_eq!(
      sandbox.wall_time_limit().unwrap(),
      Time::from_micros(2_500_000)
    );
    assert_eq!(sandbox.disk_limit().unwrap(), Space::from_bytes(1 << 20));
  }

  #[test]
  fn process_limits_are_clamped() {
    let temp = TempDir::new().unwrap();
    let mut sandbox = sandbox(&temp);
    let logger = Logger::new(true);

    sandbox.set_process_limit(&logger, 5).unwrap();
    assert_eq!(sandbox.process_limit().unwrap(), 1);

    sandbox.set_process_limit(&logger, 0).unwrap();
    assert_eq!(sandbox.process_limit().unwrap(), 0);
  }

  #[test]
  fn redirections_validate_their_targets() {
    let temp = TempDir::new().unwrap();
    let mut sandbox = sandbox(&temp);

    // stdout may not exist yet; it is created on the spot.
    sandbox.redirect(Stream::Stdout, Some("out")).unwrap();
    assert!(sandbox.root_path().join("out").is_file());
    assert_eq!(sandbox.redirection(Stream::Stdout).unwrap(), "out");

    // stdin must already exist.
    assert_matches!(
      sandbox.redirect(Stream::Stdin, Some("in")),
      Err(Error::Filesystem { .. })
    );

    fs::write(sandbox.root_path().join("in"), "hello\n").unwrap();
    sandbox.redirect(Stream::Stdin, Some("in")).unwrap();

    sandbox.redirect(Stream::Stdin, None).unwrap();
    assert_eq!(sandbox.redirection(Stream::Stdin).unwrap(), "");
  }

  #[test]
  fn statistics_start_out_empty() {
    let temp = TempDir::new().unwrap();
    let sandbox = sandbox(&temp);

    assert_eq!(sandbox.exit_status().unwrap(), ExitStatus::NotRun);
    assert_eq!(sandbox.return_code().unwrap(), 0);
    assert_eq!(sandbox.signal().unwrap(), 0);
    assert_eq!(sandbox.wall_time().unwrap(), Time::ZERO);
  }

  #[test]
  fn commands_lose_their_leading_slashes() {
    let temp = TempDir::new().unwrap();
    let sandbox = sandbox(&temp);

    let plan = ChildPlan::new(&sandbox, "/bin/true", &[]).unwrap();

    assert_eq!(plan.executable.to_str().unwrap(), "bin/true");
    assert_eq!(plan.argv[0].to_str().unwrap(), "bin/true");
  }

  #[test]
  fn rlimit_values_are_prepared_for_the_child() {
    let temp = TempDir::new().unwrap();
    let mut sandbox = sandbox(&temp);
    let logger = Logger::new(true);

    let plan = ChildPlan::new(&sandbox, "true", &[]).unwrap();
    assert_eq!(plan.memory, None);
    assert_eq!(plan.cpu_seconds, None);
    assert_eq!(plan.processes, None);
    assert_eq!(plan.disk_bytes, None);

    sandbox.set_memory_limit(Space::from_bytes(8 << 20)).unwrap();
    sandbox.set_cpu_limit(Time::from_micros(1_500_000)).unwrap();
    sandbox.set_process_limit(&logger, 1).unwrap();
    sandbox.set_disk_limit(Space::from_kibibytes(4)).unwrap();

    let plan = ChildPlan::new(&sandbox, "true", &[]).unwrap();
    assert_eq!(plan.memory, Some(Space::from_bytes(8 << 20).rlimit_unit()));
    assert_eq!(plan.cpu_seconds, Some(2));
    assert_eq!(plan.processes, Some(1));
    assert_eq!(plan.disk_bytes, Some(4096));
  }
}
