use super::*;

/// Linux-only backend layering namespace isolation over the portable
/// pipeline: the child becomes init of a fresh PID namespace, detaches
/// its network, IPC and mount namespaces, bind-mounts the configured
/// directories into `file_root` and chroots into it.
///
/// Requires root parked in the real uid, which a setuid install provides
/// after the startup demotion.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NamespaceSandbox {
  #[serde(flatten)]
  unix: UnixSandbox,
  mountpoints: BTreeMap<Utf8PathBuf, MountPoint>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MountPoint {
  outer: Utf8PathBuf,
  writable: bool,
}

/// Mount keys are recorded as the guest sees them (`/ro`), but join
/// against `file_root` needs them relative.
fn relative(inner: &Utf8Path) -> &Utf8Path {
  inner.strip_prefix("/").unwrap_or(inner)
}

impl NamespaceSandbox {
  pub fn new(base: Utf8PathBuf) -> Self {
    Self {
      unix: UnixSandbox::new(base),
      mountpoints: BTreeMap::new(),
    }
  }

  fn boxed(base: Utf8PathBuf) -> Box<dyn Sandbox> {
    Box::new(Self::new(base))
  }
}

struct NamespaceHooks<'a> {
  mountpoints: &'a BTreeMap<Utf8PathBuf, MountPoint>,
  root: Utf8PathBuf,
}

impl Hooks for NamespaceHooks<'_> {
  fn pre_fork(&mut self, _logger: &Logger) -> Result {
    let _privileged = Privileged::enter();

    // The next child forked becomes init of the new PID namespace.
    sched::unshare(CloneFlags::CLONE_NEWPID)
      .map_err(Error::syscall(pipe::describe(pipe::UNSHARE)))
  }

  fn post_fork(&mut self, pipe: &pipe::Sender) -> bool {
    let _privileged = Privileged::enter();

    let flags = CloneFlags::CLONE_NEWNET | CloneFlags::CLONE_NEWIPC | CloneFlags::CLONE_NEWNS;
    match sched::unshare(flags) {
      Ok(()) => true,
      Err(errno) => {
        pipe.send(pipe::UNSHARE, errno);
        false
      }
    }
  }

  fn pre_exec(&mut self, pipe: &pipe::Sender) -> bool {
    // Without mounts the guest keeps the host view; chrooting into an
    // empty file_root would leave nothing to exec.
    if self.mountpoints.is_empty() {
      return true;
    }

    let _privileged = Privileged::enter();

    for (inner, mountpoint) in self.mountpoints {
      let target = self.root.join(relative(inner));

      let mut flags = MsFlags::MS_BIND | MsFlags::MS_NODEV | MsFlags::MS_NOSUID;
      if !mountpoint.writable {
        flags |= MsFlags::MS_RDONLY;
      }

      let mounted = mount::mount(
        Some(mountpoint.outer.as_std_path()),
        target.as_std_path(),
        None::<&str>,
        flags,
        None::<&str>,
      );
      if let Err(errno) = mounted {
        pipe.send(pipe::MOUNT, errno);
        return false;
      }
    }

    // The working directory is already file_root.
    if let Err(errno) = unistd::chroot(".") {
      pipe.send(pipe::CHROOT, errno);
      return false;
    }

    true
  }

  fn cleanup(&mut self, _logger: &Logger) -> Result {
    if self.mountpoints.is_empty() {
      return Ok(());
    }

    let _privileged = Privileged::enter();

    for inner in self.mountpoints.keys() {
      let target = self.root.join(relative(inner));
      match mount::umount(target.as_std_path()) {
        Ok(()) => {}
        // The bind mounts live in the child's mount namespace and die
        // with it; the parent-side target may never have been mounted,
        // or may already be gone.
        Err(Errno::EINVAL) | Err(Errno::ENOENT) => {}
        Err(errno) => return Err(Error::syscall(pipe::describe(pipe::UMOUNT))(errno)),
      }
    }

    Ok(())
  }
}

impl Sandbox for NamespaceSandbox {
  fn backend_name(&self) -> &'static str {
    "namespace"
  }

  fn is_available(&self) -> bool {
    // After the startup demotion a setuid install parks root in the real
    // uid; a plain root invocation satisfies this too.
    unistd::getuid().is_root()
  }

  fn overhead(&self) -> u32 {
    1
  }

  fn features(&self) -> Features {
    self.unix.features()
      | Features::PROCESS_ISOLATION
      | Features::NETWORK_ISOLATION
      | Features::FOLDER_MOUNT
  }

  fn id(&self) -> u64 {
    self.unix.id()
  }

  fn create_box(&mut self, logger: &Logger) -> Result<u64> {
    self.unix.create_box(logger)
  }

  fn archive(&self) -> BoxInfo {
    BoxInfo::Namespace(self.clone())
  }

  fn root(&self) -> Result<Utf8PathBuf> {
    self.unix.root()
  }

  fn set_memory_limit(&mut self, limit: Space) -> Result {
    self.unix.set_memory_limit(limit)
  }

  fn set_cpu_limit(&mut self, limit: Time) -> Result {
    self.unix.set_cpu_limit(limit)
  }

  fn set_wall_time_limit(&mut self, limit: Time) -> Result {
    self.unix.set_wall_time_limit(limit)
  }

  fn set_process_limit(&mut self, logger: &Logger, limit: u64) -> Result {
    self.unix.set_process_limit(logger, limit)
  }

  fn set_disk_limit(&mut self, limit: Space) -> Result {
    self.unix.set_disk_limit(limit)
  }

  fn memory_limit(&self) -> Result<Space> {
    self.unix.memory_limit()
  }

  fn cpu_limit(&self) -> Result<Time> {
    self.unix.cpu_limit()
  }

  fn wall_time_limit(&self) -> Result<Time> {
    self.unix.wall_time_limit()
  }

  fn process_limit(&self) -> Result<u64> {
    self.unix.process_limit()
  }

  fn disk_limit(&self) -> Result<Space> {
    self.unix.disk_limit()
  }

  fn redirect(&mut self, stream: Stream, path: Option<&str>) -> Result {
    self.unix.redirect(stream, path)
  }

  fn redirection(&self, stream: Stream) -> Result<String> {
    self.unix.redirection(stream)
  }

  fn mounts(&self) -> Result<Vec<(Utf8PathBuf, Utf8PathBuf)>> {
    Ok(
      self
        .mountpoints
        .iter()
        .map(|(inner, mountpoint)| (inner.clone(), mountpoint.outer.clone()))
        .collect(),
    )
  }

  fn mount_target(&self, inner: &Utf8Path) -> Result<String> {
    Ok(
      self
        .mountpoints
        .get(inner)
        .map(|mountpoint| mountpoint.outer.to_string())
        .unwrap_or_default(),
    )
  }

  fn add_mount(&mut self, inner: &Utf8Path, outer: &Utf8Path, writable: bool) -> Result {
    self
      .unix
      .root_path()
      .join(relative(inner))
      .create(store::BOX_MODE)?;

    self.mountpoints.insert(
      inner.to_owned(),
      MountPoint {
        outer: outer.to_owned(),
        writable,
      },
    );

    Ok(())
  }

  fn remove_mount(&mut self, inner: &Utf8Path) -> Result<bool> {
    Ok(self.mountpoints.remove(inner).is_some())
  }

  fn run(&mut self, logger: &Logger, command: &str, args: &[String]) -> Result {
    let root = self.unix.root_path();
    let Self { unix, mountpoints } = self;

    let mut hooks = NamespaceHooks {
      mountpoints,
      root,
    };

    unix.execute(logger, command, args, &mut hooks)
  }

  fn memory_usage(&self) -> Result<Space> {
    self.unix.memory_usage()
  }

  fn running_time(&self) -> Result<Time> {
    self.unix.running_time()
  }

  fn wall_time(&self) -> Result<Time> {
    self.unix.wall_time()
  }

  fn exit_status(&self) -> Result<ExitStatus> {
    self.unix.exit_status()
  }

  fn return_code(&self) -> Result<i32> {
    self.unix.return_code()
  }

  fn signal(&self) -> Result<i32> {
    self.unix.signal()
  }

  fn delete_box(&mut self) -> Result {
    self.unix.delete_box()
  }
}

inventory::submit! {
  registry::Backend {
    name: "namespace",
    factory: NamespaceSandbox::boxed,
  }
}

#[cfg(test)]
mod tests {
  use {super::*, tempfile::TempDir};

  fn sandbox(temp: &TempDir) -> NamespaceSandbox {
    let base = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let mut sandbox = NamespaceSandbox::new(base);
    sandbox.create_box(&Logger::new(true)).unwrap();
    sandbox
  }

  #[test]
  fn mount_bookkeeping() {
    let temp = TempDir::new().unwrap();
    let mut sandbox = sandbox(&temp);

    sandbox
      .add_mount(Utf8Path::new("/ro"), Utf8Path::new("/usr/bin"), false)
      .unwrap();

    // The target directory tree is staged eagerly.
    assert!(sandbox.root().unwrap().join("ro").is_dir());

    assert_eq!(sandbox.mount_target(Utf8Path::new("/ro")).unwrap(), "/usr/bin");
    assert_eq!(sandbox.mount_target(Utf8Path::new("/rw")).unwrap(), "");
    assert_eq!(
      sandbox.mounts().unwrap(),
      vec![(Utf8PathBuf::from("/ro"), Utf8PathBuf::from("/usr/bin"))]
    );

    assert!(sandbox.remove_mount(Utf8Path::new("/ro")).unwrap());
    assert!(!sandbox.remove_mount(Utf8Path::new("/ro")).unwrap());
    assert!(sandbox.mounts().unwrap().is_empty());
  }

  #[test]
  fn replacing_a_mount_keeps_one_entry() {
    let temp = TempDir::new().unwrap();
    let mut sandbox = sandbox(&temp);

    sandbox
      .add_mount(Utf8Path::new("/ro"), Utf8Path::new("/usr/bin"), false)
      .unwrap();
    sandbox
      .add_mount(Utf8Path::new("/ro"), Utf8Path::new("/usr/lib"), true)
      .unwrap();

    assert_eq!(sandbox.mount_target(Utf8Path::new("/ro")).unwrap(), "/usr/lib");
    assert_eq!(sandbox.mounts().unwrap().len(), 1);
  }

  #[test]
  fn features_extend_the_portable_set() {
    let temp = TempDir::new().unwrap();
    let sandbox = sandbox(&temp);

    let features = sandbox.features();

    assert!(features.contains(Features::PROCESS_ISOLATION));
    assert!(features.contains(Features::NETWORK_ISOLATION));
    assert!(features.contains(Features::FOLDER_MOUNT));
    assert!(features.contains(Features::IO_REDIRECTION));
  }

  #[test]
  fn availability_tracks_the_real_uid() {
    let temp = TempDir::new().unwrap();

    assert_eq!(
      sandbox(&temp).is_available(),
      unistd::getuid().is_root()
    );
  }

  #[test]
  fn archives_keep_the_mount_table() {
    let temp = TempDir::new().unwrap();
    let base = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let mut sandbox = sandbox(&temp);

    sandbox
      .add_mount(Utf8Path::new("/ro"), Utf8Path::new("/usr/bin"), false)
      .unwrap();
    store::save(&base, &sandbox).unwrap();

    let loaded = store::load(&base, 1).unwrap();

    assert_eq!(loaded.backend_name(), "namespace");
    assert_eq!(loaded.mount_target(Utf8Path::new("/ro")).unwrap(), "/usr/bin");
  }
}
