use super::*;

/// A duration as the sandbox accounts it.
///
/// Stored as microseconds so limits and statistics survive serialization
/// without floating-point drift; surfaced as fractional seconds.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Time {
  micros: u64,
}

impl Time {
  pub const ZERO: Time = Time { micros: 0 };

  pub fn from_micros(micros: u64) -> Self {
    Self { micros }
  }

  pub fn from_seconds(seconds: f64) -> Self {
    Self {
      micros: (seconds * 1e6).round() as u64,
    }
  }

  pub fn micros(self) -> u64 {
    self.micros
  }

  pub fn seconds(self) -> f64 {
    self.micros as f64 / 1e6
  }

  pub fn is_zero(self) -> bool {
    self.micros == 0
  }

  /// Whole seconds for `RLIMIT_CPU`: rounded up, and never less than one
  /// for a nonzero limit, since a zero rlimit would kill the process on its
  /// first tick.
  pub fn rlimit_seconds(self) -> u64 {
    self.micros.div_ceil(1_000_000).max(1)
  }
}

impl From<Duration> for Time {
  fn from(duration: Duration) -> Self {
    Self {
      micros: duration.as_micros() as u64,
    }
  }
}

impl From<Time> for Duration {
  fn from(time: Time) -> Self {
    Duration::from_micros(time.micros)
  }
}

impl fmt::Display for Time {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}s", self.seconds())
  }
}

impl FromStr for Time {
  type Err = Error;

  /// Accepts `us`, `ms` and `s` suffixes; a bare number is seconds.
  fn from_str(s: &str) -> Result<Self> {
    let parse = |digits: &str, scale: f64| -> Result<Time> {
      let value: f64 = digits
        .trim()
        .parse()
        .map_err(|_| Error::Argument(format!("invalid time value `{s}`")))?;
      ensure!(
        value >= 0.0,
        Error::Argument(format!("time value `{s}` is negative"))
      );
      Ok(Time {
        micros: (value * scale).round() as u64,
      })
    };

    if let Some(digits) = s.strip_suffix("us") {
      parse(digits, 1.0)
    } else if let Some(digits) = s.strip_suffix("ms") {
      parse(digits, 1e3)
    } else if let Some(digits) = s.strip_suffix('s') {
      parse(digits, 1e6)
    } else {
      parse(s, 1e6)
    }
  }
}

/// A byte count as the sandbox accounts it.
///
/// Stored as bytes; the rlimit conversions absorb the platform split, with
/// Darwin taking bytes and Linux kibibytes (both for `RLIMIT_AS` and for
/// `ru_maxrss`).
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Space {
  bytes: u64,
}

impl Space {
  pub const ZERO: Space = Space { bytes: 0 };

  pub fn from_bytes(bytes: u64) -> Self {
    Self { bytes }
  }

  pub fn from_kibibytes(kibibytes: u64) -> Self {
    Self {
      bytes: kibibytes * 1024,
    }
  }

  pub fn bytes(self) -> u64 {
    self.bytes
  }

  pub fn kibibytes(self) -> u64 {
    self.bytes / 1024
  }

  pub fn is_zero(self) -> bool {
    self.bytes == 0
  }

  /// The value to hand to `setrlimit(RLIMIT_AS, …)`.
  #[cfg(target_os = "macos")]
  pub fn rlimit_unit(self) -> u64 {
    self.bytes
  }

  /// The value to hand to `setrlimit(RLIMIT_AS, …)`.
  #[cfg(not(target_os = "macos"))]
  pub fn rlimit_unit(self) -> u64 {
    self.bytes / 1024
  }

  /// Converts a `ru_maxrss` reading back into bytes.
  #[cfg(target_os = "macos")]
  pub fn from_rlimit_unit(value: u64) -> Self {
    Self { bytes: value }
  }

  /// Converts a `ru_maxrss` reading back into bytes.
  #[cfg(not(target_os = "macos"))]
  pub fn from_rlimit_unit(value: u64) -> Self {
    Self {
      bytes: value * 1024,
    }
  }
}

impl fmt::Display for Space {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    const MIB: f64 = 1024.0 * 1024.0;

    if self.bytes >= 1024 * 1024 {
      write!(f, "{:.1}MiB", self.bytes as f64 / MIB)
    } else {
      write!(f, "{:.1}KiB", self.bytes as f64 / 1024.0)
    }
  }
}

impl FromStr for Space {
  type Err = Error;

  /// Accepts `B`, `KiB`/`K`, `MiB`/`M` and `GiB`/`G` suffixes; a bare
  /// number is kibibytes.
  fn from_str(s: &str) -> Result<Self> {
    let parse = |digits: &str, scale: u64| -> Result<Space> {
      let value: u64 = digits
        .trim()
        .parse()
        .map_err(|_| Error::Argument(format!("invalid space value `{s}`")))?;
      Ok(Space {
        bytes: value * scale,
      })
    };

    for (suffix, scale) in [
      ("GiB", 1 << 30),
      ("MiB", 1 << 20),
      ("KiB", 1 << 10),
      ("G", 1 << 30),
      ("M", 1 << 20),
      ("K", 1 << 10),
      ("B", 1),
    ] {
      if let Some(digits) = s.strip_suffix(suffix) {
        return parse(digits, scale);
      }
    }

    parse(s, 1 << 10)
  }
}

#[cfg(test)]
mod tests {
  use {super::*, assert_matches::assert_matches};

  #[test]
  fn time_parsing() {
    assert_eq!("1".parse::<Time>().unwrap(), Time::from_micros(1_000_000));
    assert_eq!("0.5s".parse::<Time>().unwrap(), Time::from_micros(500_000));
    assert_eq!("250ms".parse::<Time>().unwrap(), Time::from_micros(250_000));
    assert_eq!("10us".parse::<Time>().unwrap(), Time::from_micros(10));

    assert_matches!("ten".parse::<Time>(), Err(Error::Argument(_)));
    assert_matches!("-1s".parse::<Time>(), Err(Error::Argument(_)));
  }

  #[test]
  fn time_display() {
    assert_eq!(Time::from_micros(500_000).to_string(), "0.5s");
    assert_eq!(Time::from_micros(2_000_000).to_string(), "2s");
  }

  #[test]
  fn time_rlimit_seconds_rounds_up() {
    assert_eq!(Time::from_micros(1).rlimit_seconds(), 1);
    assert_eq!(Time::from_micros(1_000_000).rlimit_seconds(), 1);
    assert_eq!(Time::from_micros(1_000_001).rlimit_seconds(), 2);
  }

  #[test]
  fn space_parsing() {
    assert_eq!("8MiB".parse::<Space>().unwrap(), Space::from_bytes(8 << 20));
    assert_eq!("4K".parse::<Space>().unwrap(), Space::from_bytes(4096));
    assert_eq!("512B".parse::<Space>().unwrap(), Space::from_bytes(512));
    assert_eq!("16".parse::<Space>().unwrap(), Space::from_kibibytes(16));

    assert_matches!("lots".parse::<Space>(), Err(Error::Argument(_)));
  }

  #[test]
  fn space_display() {
    assert_eq!(Space::from_bytes(512).to_string(), "0.5KiB");
    assert_eq!(Space::from_bytes(8 << 20).to_string(), "8.0MiB");
    assert_eq!(Space::from_kibibytes(1536).to_string(), "1.5MiB");
  }

  #[cfg(target_os = "linux")]
  #[test]
  fn space_rlimit_unit_is_kibibytes() {
    assert_eq!(Space::from_bytes(8192).rlimit_unit(), 8);
    assert_eq!(Space::from_rlimit_unit(8), Space::from_bytes(8192));
  }
}
