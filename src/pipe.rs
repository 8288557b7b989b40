use super::*;

// Child-side error ids carried over the pipe. Positive ids are fatal,
// negative ids are warnings.
pub(crate) const STDIN_OPEN: c_int = 1;
pub(crate) const STDOUT_OPEN: c_int = 2;
pub(crate) const STDERR_OPEN: c_int = 3;
pub(crate) const EXEC: c_int = 4;
pub(crate) const CHDIR: c_int = 5;
pub(crate) const UNSHARE: c_int = 100;
pub(crate) const MOUNT: c_int = 101;
pub(crate) const CHROOT: c_int = 102;
pub(crate) const UMOUNT: c_int = 103;
pub(crate) const STACK_LIMIT: c_int = -1;
pub(crate) const MEMORY_LIMIT: c_int = -2;
pub(crate) const CPU_LIMIT: c_int = -3;
pub(crate) const PROCESS_LIMIT: c_int = -4;
pub(crate) const DISK_LIMIT: c_int = -5;

pub(crate) fn describe(id: c_int) -> &'static str {
  match id {
    STACK_LIMIT => "error setting stack limit",
    MEMORY_LIMIT => "error setting memory limit",
    CPU_LIMIT => "error setting cpu limit",
    PROCESS_LIMIT => "error setting process limit",
    DISK_LIMIT => "error setting disk limit",
    STDIN_OPEN => "cannot open stdin file",
    STDOUT_OPEN => "cannot open stdout file",
    STDERR_OPEN => "cannot open stderr file",
    EXEC => "execv failed",
    CHDIR => "chdir failed",
    UNSHARE => "error creating the new namespace",
    MOUNT => "error setting up mountpoints",
    CHROOT => "error changing the root",
    UMOUNT => "error cleaning up mountpoints",
    _ => "unknown error",
  }
}

const RECORD_SIZE: usize = 2 * size_of::<c_int>();

/// One `{error_id, errno}` record as it crosses the pipe.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Report {
  pub(crate) id: c_int,
  pub(crate) errno: c_int,
}

impl Report {
  pub(crate) fn is_warning(self) -> bool {
    self.id < 0
  }

  pub(crate) fn message(self) -> String {
    format!("{}: {}", describe(self.id), Errno::from_raw(self.errno))
  }

  fn to_bytes(self) -> [u8; RECORD_SIZE] {
    let mut bytes = [0; RECORD_SIZE];
    bytes[..RECORD_SIZE / 2].copy_from_slice(&self.id.to_ne_bytes());
    bytes[RECORD_SIZE / 2..].copy_from_slice(&self.errno.to_ne_bytes());
    bytes
  }

  fn from_bytes(bytes: [u8; RECORD_SIZE]) -> Self {
    Self {
      id: c_int::from_ne_bytes(bytes[..RECORD_SIZE / 2].try_into().unwrap()),
      errno: c_int::from_ne_bytes(bytes[RECORD_SIZE / 2..].try_into().unwrap()),
    }
  }
}

/// Write end of the error channel, held by the child.
#[derive(Debug)]
pub(crate) struct Sender {
  fd: OwnedFd,
}

impl Sender {
  /// Marks the fd close-on-exec so a successful `execv` closes it and the
  /// supervisor observes EOF.
  pub(crate) fn set_cloexec(&self) {
    unsafe {
      libc::fcntl(self.fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC);
    }
  }

  /// Sends one record. Must stay async-signal-safe: this runs between
  /// `fork` and `execv`.
  pub(crate) fn send(&self, id: c_int, errno: Errno) -> bool {
    let bytes = Report {
      id,
      errno: errno as c_int,
    }
    .to_bytes();

    loop {
      let written = unsafe {
        libc::write(
          self.fd.as_raw_fd(),
          bytes.as_ptr().cast(),
          RECORD_SIZE,
        )
      };
      if written == -1 && Errno::last() == Errno::EINTR {
        continue;
      }
      return written == RECORD_SIZE as isize;
    }
  }
}

/// Read end of the error channel, held by the supervisor.
#[derive(Debug)]
pub(crate) struct Receiver {
  fd: OwnedFd,
}

impl Receiver {
  /// Reads exactly one record, retrying on EINTR. `None` means the write
  /// end closed: the child either exec()ed or died without reporting.
  pub(crate) fn recv(&self) -> Result<Option<Report>> {
    let mut bytes = [0; RECORD_SIZE];
    let mut filled = 0;

    while filled < RECORD_SIZE {
      let read = unsafe {
        libc::read(
          self.fd.as_raw_fd(),
          bytes[filled..].as_mut_ptr().cast(),
          RECORD_SIZE - filled,
        )
      };
      match read {
        -1 if Errno::last() == Errno::EINTR => continue,
        -1 => return Err(Error::Supervisor(Errno::last())),
        0 => return Ok(None),
        n => filled += n as usize,
      }
    }

    Ok(Some(Report::from_bytes(bytes)))
  }
}

/// Opens the error channel used between the supervised child and its
/// parent.
pub(crate) fn channel() -> Result<(Receiver, Sender)> {
  let (read, write) =
    unistd::pipe().map_err(Error::syscall("error opening pipe to child process"))?;

  Ok((Receiver { fd: read }, Sender { fd: write }))
}
