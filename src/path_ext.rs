use super::*;

pub trait PathExt {
  /// `mkdir -p` with an explicit mode on the leaf.
  fn create(&self, mode: u32) -> Result;
  /// Removes whatever is at the path, then creates it as an empty
  /// directory.
  fn recreate(&self, mode: u32) -> Result;
}

impl PathExt for Utf8Path {
  fn create(&self, mode: u32) -> Result {
    fs::create_dir_all(self).map_err(Error::filesystem(format!("error creating {self}")))?;
    fs::set_permissions(self, fs::Permissions::from_mode(mode))
      .map_err(Error::filesystem(format!("error setting mode on {self}")))?;
    Ok(())
  }

  fn recreate(&self, mode: u32) -> Result {
    match fs::remove_dir_all(self) {
      Ok(()) => {}
      Err(error) if error.kind() == io::ErrorKind::NotFound => {}
      Err(error) => return Err(Error::filesystem(format!("error deleting {self}"))(error)),
    }

    self.create(mode)
  }
}

#[cfg(test)]
mod tests {
  use {super::*, tempfile::TempDir};

  #[test]
  fn create_with_mode() {
    let temp = TempDir::new().unwrap();

    let path = Utf8PathBuf::from_path_buf(temp.path().join("a/b/c")).unwrap();

    path.create(0o754).unwrap();

    assert!(path.is_dir());

    let metadata = fs::metadata(&path).unwrap();
    assert_eq!(metadata.permissions().mode() & 0o777, 0o754);
  }

  #[test]
  fn recreate_empties_the_directory() {
    let temp = TempDir::new().unwrap();

    let path = Utf8PathBuf::from_path_buf(temp.path().join("root")).unwrap();

    path.create(0o754).unwrap();
    fs::write(path.join("leftover"), "x").unwrap();

    path.recreate(0o754).unwrap();

    assert!(path.is_dir());
    assert_eq!(fs::read_dir(&path).unwrap().count(), 0);
  }

  #[test]
  fn recreate_tolerates_absence() {
    let temp = TempDir::new().unwrap();

    let path = Utf8PathBuf::from_path_buf(temp.path().join("fresh")).unwrap();

    path.recreate(0o754).unwrap();

    assert!(path.is_dir());
  }
}
