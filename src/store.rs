use super::*;

/// Mode for box directories and `file_root`.
pub(crate) const BOX_MODE: u32 = 0o754;

/// Mode for lock files.
pub(crate) const FILE_MODE: u32 = 0o644;

/// Ids are probed from 1 up to this bound.
const BOX_ID_LIMIT: u64 = i32::MAX as u64;

const ARCHIVE_VERSION: u64 = 1;

pub fn box_dir(base: &Utf8Path, id: u64) -> Utf8PathBuf {
  base.join(format!("box_{id}"))
}

/// The persisted form of a box: a version header plus the concrete
/// backend, discriminated by the `backend` tag so the loader can
/// reconstruct the right type.
#[derive(Debug, Deserialize, Serialize)]
struct Archive {
  version: u64,
  #[serde(flatten)]
  info: BoxInfo,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "backend", rename_all = "kebab-case")]
pub enum BoxInfo {
  Unix(UnixSandbox),
  #[cfg(target_os = "linux")]
  Namespace(NamespaceSandbox),
}

impl BoxInfo {
  fn into_sandbox(self) -> Box<dyn Sandbox> {
    match self {
      BoxInfo::Unix(sandbox) => Box::new(sandbox),
      #[cfg(target_os = "linux")]
      BoxInfo::Namespace(sandbox) => Box::new(sandbox),
    }
  }
}

/// Loads the box persisted under `<base>/box_<id>/boxinfo`.
pub fn load(base: &Utf8Path, id: u64) -> Result<Box<dyn Sandbox>> {
  let path = box_dir(base, id).join("boxinfo");

  let contents =
    fs::read_to_string(&path).map_err(Error::filesystem(format!("error reading {path}")))?;

  let archive: Archive = serde_json::from_str(&contents)?;

  ensure!(
    archive.version == ARCHIVE_VERSION,
    Error::ArchiveVersion(archive.version)
  );

  Ok(archive.info.into_sandbox())
}

/// Writes the box state back to its `boxinfo`. Last writer wins; the CLI
/// is serial by contract.
pub fn save(base: &Utf8Path, sandbox: &dyn Sandbox) -> Result {
  let path = box_dir(base, sandbox.id()).join("boxinfo");

  let archive = Archive {
    version: ARCHIVE_VERSION,
    info: sandbox.archive(),
  };

  let mut contents = serde_json::to_string(&archive)?;
  contents.push('\n');

  fs::write(&path, contents).map_err(Error::filesystem(format!("error writing {path}")))
}

/// Claims the lowest free box id under `base`.
///
/// Claiming is cross-process safe: the directory may already exist (EEXIST
/// is ignored), but the `lock` file inside it is created with O_EXCL and
/// whoever wins it owns the id. The long-lived `lock` marker is
/// deliberately left behind; its presence is what marks the id allocated.
pub(crate) fn allocate(base: &Utf8Path, logger: &Logger) -> Result<u64> {
  for id in 1..BOX_ID_LIMIT {
    let dir = box_dir(base, id);

    match fs::create_dir(&dir) {
      Ok(()) => {
        fs::set_permissions(&dir, fs::Permissions::from_mode(BOX_MODE))
          .map_err(Error::filesystem(format!("error creating sandbox {dir}")))?;
      }
      Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {}
      Err(error) => {
        return Err(Error::filesystem(format!("error creating sandbox {dir}"))(
          error,
        ))
      }
    }

    if !dir.is_dir() {
      continue;
    }

    let lock = dir.join("lock");
    match fs::OpenOptions::new()
      .read(true)
      .write(true)
      .create_new(true)
      .mode(FILE_MODE)
      .open(&lock)
    {
      Ok(_) => {}
      Err(error) if error.kind() == io::ErrorKind::AlreadyExists => continue,
      Err(error) => {
        logger.warning(4, format!("something odd happened claiming {lock}: {error}"));
        continue;
      }
    }

    let file_root = dir.join("file_root");
    file_root.recreate(BOX_MODE)?;

    debug!("allocated box {id} under {base}");

    return Ok(id);
  }

  Err(Error::BoxIdsExhausted)
}

/// Removes the whole `box_<id>` tree, freeing the id.
pub(crate) fn delete(base: &Utf8Path, id: u64) -> Result {
  let dir = box_dir(base, id);
  fs::remove_dir_all(&dir).map_err(Error::filesystem(format!("error deleting sandbox {dir}")))
}

/// A short-lived exclusive lock file, removed when dropped.
///
/// Used for `run_lock`: its presence forbids a concurrent `run` on the
/// same box.
#[derive(Debug)]
pub(crate) struct Lock {
  path: Utf8PathBuf,
}

impl Lock {
  pub(crate) fn acquire(path: Utf8PathBuf) -> Result<Self> {
    fs::OpenOptions::new()
      .read(true)
      .write(true)
      .create_new(true)
      .mode(FILE_MODE)
      .open(&path)
      .map_err(Error::filesystem(format!("error acquiring lock {path}")))?;

    Ok(Self { path })
  }
}

impl Drop for Lock {
  fn drop(&mut self) {
    if let Err(error) = fs::remove_file(&self.path) {
      warn!("error removing lock {}: {error}", self.path);
    }
  }
}
