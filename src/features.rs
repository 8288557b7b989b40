use super::*;

bitflags! {
  /// Capabilities a backend advertises.
  ///
  /// The set is closed; backends pick a subset but may not invent flags.
  #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
  pub struct Features: u64 {
    const MEMORY_LIMIT       = 1 << 0;
    const CPU_LIMIT          = 1 << 1;
    const WALL_TIME_LIMIT    = 1 << 2;
    /// Limits process creation.
    const PROCESS_LIMIT      = 1 << 3;
    /// Limits the number of processes to an arbitrary count.
    const PROCESS_LIMIT_FULL = 1 << 4;
    /// Works for non-malicious errors.
    const DISK_LIMIT         = 1 << 5;
    /// Works for malicious attempts.
    const DISK_LIMIT_FULL    = 1 << 6;
    const FOLDER_MOUNT       = 1 << 7;
    const MEMORY_USAGE       = 1 << 8;
    const RUNNING_TIME       = 1 << 9;
    const WALL_TIME          = 1 << 10;
    const CLEARABLE          = 1 << 11;
    /// Isolation from other processes.
    const PROCESS_ISOLATION  = 1 << 12;
    const IO_REDIRECTION     = 1 << 13;
    const NETWORK_ISOLATION  = 1 << 14;
    const RETURN_CODE        = 1 << 15;
    const SIGNAL             = 1 << 16;
  }
}

impl Features {
  const NAMES: [(Features, &'static str); 17] = [
    (Features::MEMORY_LIMIT, "memory_limit"),
    (Features::CPU_LIMIT, "cpu_limit"),
    (Features::WALL_TIME_LIMIT, "wall_time_limit"),
    (Features::PROCESS_LIMIT, "process_limit"),
    (Features::PROCESS_LIMIT_FULL, "process_limit_full"),
    (Features::DISK_LIMIT, "disk_limit"),
    (Features::DISK_LIMIT_FULL, "disk_limit_full"),
    (Features::FOLDER_MOUNT, "folder_mount"),
    (Features::MEMORY_USAGE, "memory_usage"),
    (Features::RUNNING_TIME, "running_time"),
    (Features::WALL_TIME, "wall_time"),
    (Features::CLEARABLE, "clearable"),
    (Features::PROCESS_ISOLATION, "process_isolation"),
    (Features::IO_REDIRECTION, "io_redirection"),
    (Features::NETWORK_ISOLATION, "network_isolation"),
    (Features::RETURN_CODE, "return_code"),
    (Features::SIGNAL, "signal"),
  ];

  /// Names of the flags present in this mask, in declaration order.
  pub fn names(self) -> Vec<&'static str> {
    Self::NAMES
      .iter()
      .filter(|(flag, _)| self.contains(*flag))
      .map(|(_, name)| *name)
      .collect()
  }
}
