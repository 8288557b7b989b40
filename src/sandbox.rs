use super::*;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stream {
  Stdin,
  Stdout,
  Stderr,
}

impl fmt::Display for Stream {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Stream::Stdin => write!(f, "stdin"),
      Stream::Stdout => write!(f, "stdout"),
      Stream::Stderr => write!(f, "stderr"),
    }
  }
}

impl FromStr for Stream {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "stdin" => Ok(Stream::Stdin),
      "stdout" => Ok(Stream::Stdout),
      "stderr" => Ok(Stream::Stderr),
      other => Err(Error::Argument(format!("unknown stream `{other}`"))),
    }
  }
}

/// How the last supervised program ended. Reported verbatim by the
/// `status` command, so the variant spellings are part of the interface.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum ExitStatus {
  #[default]
  #[serde(rename = "")]
  NotRun,
  #[serde(rename = "Terminated normally")]
  Exited,
  #[serde(rename = "Signaled")]
  Signaled,
  #[serde(rename = "Timed out")]
  TimedOut,
}

impl fmt::Display for ExitStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ExitStatus::NotRun => Ok(()),
      ExitStatus::Exited => write!(f, "Terminated normally"),
      ExitStatus::Signaled => write!(f, "Signaled"),
      ExitStatus::TimedOut => write!(f, "Timed out"),
    }
  }
}

/// The uniform contract every backend implements.
///
/// Operations a backend does not support keep their default bodies, which
/// fail with [`Error::Unsupported`]; the CLI turns that into the reserved
/// code 254 plus a sentinel result.
pub trait Sandbox: fmt::Debug {
  fn backend_name(&self) -> &'static str;

  /// May this backend run in the current process?
  fn is_available(&self) -> bool;

  /// Opaque performance-cost score; lower is cheaper.
  fn overhead(&self) -> u32;

  fn features(&self) -> Features;

  /// The id this box was allocated under, or 0 before allocation.
  fn id(&self) -> u64;

  /// Claims the lowest free id under the base path.
  fn create_box(&mut self, logger: &Logger) -> Result<u64>;

  /// Serializable snapshot of this backend for the `boxinfo` archive.
  fn archive(&self) -> BoxInfo;

  fn check(&self) -> Result<bool> {
    Err(Error::Unsupported)
  }

  /// Absolute path of the directory the guest sees as its world.
  fn root(&self) -> Result<Utf8PathBuf> {
    Err(Error::Unsupported)
  }

  fn set_memory_limit(&mut self, _limit: Space) -> Result {
    Err(Error::Unsupported)
  }

  fn set_cpu_limit(&mut self, _limit: Time) -> Result {
    Err(Error::Unsupported)
  }

  fn set_wall_time_limit(&mut self, _limit: Time) -> Result {
    Err(Error::Unsupported)
  }

  fn set_process_limit(&mut self, _logger: &Logger, _limit: u64) -> Result {
    Err(Error::Unsupported)
  }

  fn set_disk_limit(&mut self, _limit: Space) -> Result {
    Err(Error::Unsupported)
  }

  fn memory_limit(&self) -> Result<Space> {
    Err(Error::Unsupported)
  }

  fn cpu_limit(&self) -> Result<Time> {
    Err(Error::Unsupported)
  }

  fn wall_time_limit(&self) -> Result<Time> {
    Err(Error::Unsupported)
  }

  fn process_limit(&self) -> Result<u64> {
    Err(Error::Unsupported)
  }

  fn disk_limit(&self) -> Result<Space> {
    Err(Error::Unsupported)
  }

  /// Sets or clears a redirection; `None` restores stream inheritance.
  fn redirect(&mut self, _stream: Stream, _path: Option<&str>) -> Result {
    Err(Error::Unsupported)
  }

  /// The configured redirection, or the empty string for an inherited
  /// stream.
  fn redirection(&self, _stream: Stream) -> Result<String> {
    Err(Error::Unsupported)
  }

  fn mounts(&self) -> Result<Vec<(Utf8PathBuf, Utf8PathBuf)>> {
    Err(Error::Unsupported)
  }

  /// The outer path bound at `inner`, or the empty string if none is.
  fn mount_target(&self, _inner: &Utf8Path) -> Result<String> {
    Err(Error::Unsupported)
  }

  fn add_mount(&mut self, _inner: &Utf8Path, _outer: &Utf8Path, _writable: bool) -> Result {
    Err(Error::Unsupported)
  }

  /// Forgets the mount configured at `inner`; reports whether one was
  /// there.
  fn remove_mount(&mut self, _inner: &Utf8Path) -> Result<bool> {
    Err(Error::Unsupported)
  }

  /// Executes `command` inside the box and waits for it, recording the
  /// run's statistics on success.
  fn run(&mut self, _logger: &Logger, _command: &str, _args: &[String]) -> Result {
    Err(Error::Unsupported)
  }

  fn memory_usage(&self) -> Result<Space> {
    Err(Error::Unsupported)
  }

  fn running_time(&self) -> Result<Time> {
    Err(Error::Unsupported)
  }

  fn wall_time(&self) -> Result<Time> {
    Err(Error::Unsupported)
  }

  fn exit_status(&self) -> Result<ExitStatus> {
    Err(Error::Unsupported)
  }

  fn return_code(&self) -> Result<i32> {
    Err(Error::Unsupported)
  }

  fn signal(&self) -> Result<i32> {
    Err(Error::Unsupported)
  }

  fn clear(&mut self) -> Result {
    Err(Error::Unsupported)
  }

  /// Removes the whole box directory; the id becomes free for reuse.
  fn delete_box(&mut self) -> Result;
}
