use {
  bitflags::bitflags,
  camino::{Utf8Path, Utf8PathBuf},
  clap::{Parser, Subcommand, ValueEnum},
  libc::c_int,
  nix::{
    errno::Errno,
    fcntl::{self, OFlag},
    sys::{
      resource::{self, Resource, UsageWho},
      signal::{self, Signal},
      stat::Mode,
      time::TimeVal,
      wait::{self, WaitPidFlag, WaitStatus},
    },
    unistd::{self, ForkResult, Pid},
  },
  serde::{Deserialize, Serialize},
  serde_json::json,
  std::{
    cell::RefCell,
    collections::BTreeMap,
    ffi::CString,
    fmt, fs,
    io,
    mem::size_of,
    os::{
      fd::{AsRawFd, OwnedFd, RawFd},
      unix::fs::{OpenOptionsExt, PermissionsExt},
    },
    str::FromStr,
    sync::atomic::{AtomicUsize, Ordering},
    thread,
    time::{Duration, Instant},
  },
  thiserror::Error,
  tracing::{debug, warn},
};

#[cfg(target_os = "linux")]
use nix::{
  mount::{self, MsFlags},
  sched::{self, CloneFlags},
};

pub use crate::{
  cli::Cli,
  error::Error,
  features::Features,
  logger::{BackendSummary, Logger, Value},
  path_ext::PathExt,
  privileged::Privileged,
  sandbox::{ExitStatus, Sandbox, Stream},
  store::BoxInfo,
  units::{Space, Time},
  unix::UnixSandbox,
};

#[cfg(target_os = "linux")]
pub use crate::namespace::NamespaceSandbox;

#[cfg(target_os = "linux")]
pub(crate) use crate::unix::Hooks;

pub mod cli;
mod ensure;
mod error;
mod features;
mod logger;
#[cfg(target_os = "linux")]
mod namespace;
mod path_ext;
mod pipe;
pub mod privileged;
pub mod registry;
mod sandbox;
pub mod store;
mod units;
mod unix;

pub type Result<T = (), E = Error> = std::result::Result<T, E>;
