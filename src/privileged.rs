use super::*;

static DEPTH: AtomicUsize = AtomicUsize::new(0);

/// Swaps the real and effective uids. The call is an involution, so the
/// same call both enters and leaves the privileged state; failures are
/// ignored because a non-setuid binary has nothing to swap.
fn swap() {
  let _ = unsafe { libc::setreuid(unistd::geteuid().as_raw(), unistd::getuid().as_raw()) };
}

/// Parks root in the real uid at startup.
///
/// A setuid-root install starts with euid 0; after this call the process
/// runs with the invoking user's effective uid and only `Privileged`
/// regions get root back.
pub fn demote() {
  swap();
}

/// A region during which the effective uid is root again.
///
/// Regions nest; only the outermost entry and exit perform the swap, so
/// every exit path leaves the uids balanced.
#[must_use]
pub struct Privileged(());

impl Privileged {
  pub fn enter() -> Self {
    if DEPTH.fetch_add(1, Ordering::SeqCst) == 0 {
      swap();
    }
    Self(())
  }
}

impl Drop for Privileged {
  fn drop(&mut self) {
    if DEPTH.fetch_sub(1, Ordering::SeqCst) == 1 {
      swap();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn regions_nest_and_balance() {
    let before = (unistd::getuid(), unistd::geteuid());

    {
      let _outer = Privileged::enter();
      let _inner = Privileged::enter();
      assert_eq!(DEPTH.load(Ordering::SeqCst), 2);
    }

    assert_eq!(DEPTH.load(Ordering::SeqCst), 0);
    assert_eq!((unistd::getuid(), unistd::geteuid()), before);
  }
}
