use super::*;

#[derive(Debug, Error)]
pub enum Error {
  #[error("{0}")]
  Argument(String),
  #[error("unsupported boxinfo version {0}")]
  ArchiveVersion(u64),
  #[error("could not find a free box id")]
  BoxIdsExhausted,
  #[error("{}: {errno}", pipe::describe(*id))]
  Child { id: c_int, errno: Errno },
  #[error("{context}: {source}")]
  Filesystem {
    context: String,
    #[source]
    source: io::Error,
  },
  #[error("no box id given")]
  MissingBoxId,
  #[error("error serializing box state: {0}")]
  Serialize(#[from] serde_json::Error),
  #[error("error reading from the error pipe: {0}")]
  Supervisor(Errno),
  #[error("{context}: {source}")]
  Syscall {
    context: String,
    #[source]
    source: Errno,
  },
  #[error("unknown box type `{0}`")]
  UnknownBackend(String),
  #[error("if you read this, something went very wrong")]
  Unreachable,
  #[error("this operation is not implemented by this backend")]
  Unsupported,
}

impl Error {
  /// The numeric code reported alongside the message.
  ///
  /// 1-3 are reserved for CLI-level failures, 4 for filesystem and syscall
  /// failures in box management, 5 for supervisor-side failures, 253 for
  /// unreachable paths and 254 for unimplemented operations.
  pub fn code(&self) -> i32 {
    match self {
      Self::Argument(_) | Self::MissingBoxId => 1,
      Self::UnknownBackend(_) => 2,
      Self::ArchiveVersion(_) | Self::Serialize(_) => 3,
      Self::BoxIdsExhausted | Self::Filesystem { .. } | Self::Syscall { .. } => 4,
      Self::Child { .. } | Self::Supervisor(_) => 5,
      Self::Unreachable => 253,
      Self::Unsupported => 254,
    }
  }

  pub fn filesystem(context: impl Into<String>) -> impl FnOnce(io::Error) -> Self {
    let context = context.into();
    |source| Self::Filesystem { context, source }
  }

  pub fn syscall(context: impl Into<String>) -> impl FnOnce(Errno) -> Self {
    let context = context.into();
    |source| Self::Syscall { context, source }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn codes() {
    assert_eq!(Error::Argument("x".into()).code(), 1);
    assert_eq!(Error::UnknownBackend("x".into()).code(), 2);
    assert_eq!(Error::BoxIdsExhausted.code(), 4);
    assert_eq!(Error::Supervisor(Errno::EIO).code(), 5);
    assert_eq!(Error::Unreachable.code(), 253);
    assert_eq!(Error::Unsupported.code(), 254);
  }

  #[test]
  fn child_errors_carry_the_pipe_message() {
    let error = Error::Child {
      id: 4,
      errno: Errno::ENOENT,
    };

    assert_eq!(error.code(), 5);
    assert!(error.to_string().starts_with("execv failed"));
  }
}
