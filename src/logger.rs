use super::*;

const ERROR_COLOR: &str = "\x1b[31;1m";
const WARNING_COLOR: &str = "\x1b[33;1m";
const RESET_COLOR: &str = "\x1b[m";

/// One row of the `list` command.
#[derive(Debug)]
pub struct BackendSummary {
  pub name: &'static str,
  pub overhead: u32,
  pub features: Vec<&'static str>,
}

/// Everything a command can report as its result.
#[derive(Debug, Default)]
pub enum Value {
  #[default]
  Null,
  Bool(bool),
  Integer(i64),
  Text(String),
  Time(Time),
  Space(Space),
  Mounts(Vec<(Utf8PathBuf, Utf8PathBuf)>),
  Backends(Vec<BackendSummary>),
}

impl Value {
  fn json(&self) -> serde_json::Value {
    match self {
      Value::Null => serde_json::Value::Null,
      Value::Bool(value) => json!(value),
      Value::Integer(value) => json!(value),
      Value::Text(value) => json!(value),
      Value::Time(time) => json!(time.seconds()),
      Value::Space(space) => json!(space.kibibytes()),
      Value::Mounts(mounts) => serde_json::Value::Object(
        mounts
          .iter()
          .map(|(inner, outer)| (inner.to_string(), json!(outer.as_str())))
          .collect(),
      ),
      Value::Backends(backends) => json!(backends
        .iter()
        .map(|backend| {
          json!({
            "name": backend.name,
            "overhead": backend.overhead,
            "features": &backend.features,
          })
        })
        .collect::<Vec<_>>()),
    }
  }

  fn lines(&self) -> Vec<String> {
    match self {
      Value::Null => Vec::new(),
      Value::Bool(value) => vec![value.to_string()],
      Value::Integer(value) => vec![value.to_string()],
      Value::Text(value) => vec![value.clone()],
      Value::Time(time) => vec![time.to_string()],
      Value::Space(space) => vec![space.to_string()],
      Value::Mounts(mounts) => mounts
        .iter()
        .map(|(inner, outer)| format!("{inner} -> {outer}"))
        .collect(),
      Value::Backends(backends) => backends
        .iter()
        .map(|backend| {
          format!(
            "{} (overhead {}): {}",
            backend.name,
            backend.overhead,
            backend.features.join(",")
          )
        })
        .collect(),
    }
  }
}

/// The CLI's output channel.
///
/// On a terminal, errors and warnings stream to stderr as they happen and
/// the result prints as plain lines. Everywhere else a single JSON object
/// is emitted at the end, so machine consumers always see result, errors
/// and warnings together.
pub struct Logger {
  errors: RefCell<Vec<(i32, String)>>,
  json: bool,
  result: RefCell<Value>,
  warnings: RefCell<Vec<(i32, String)>>,
}

impl Logger {
  pub fn new(json: bool) -> Self {
    Self {
      errors: RefCell::new(Vec::new()),
      json,
      result: RefCell::new(Value::Null),
      warnings: RefCell::new(Vec::new()),
    }
  }

  /// Chooses JSON unless stdout is a terminal; `force_json` wins either
  /// way.
  pub fn auto(force_json: bool) -> Self {
    let tty = unsafe { libc::isatty(io::stdout().as_raw_fd()) } == 1;
    Self::new(force_json || !tty)
  }

  pub fn error(&self, code: i32, message: impl Into<String>) {
    let message = message.into();
    if !self.json {
      eprintln!("{ERROR_COLOR}Error {code}{RESET_COLOR}: {message}");
    }
    self.errors.borrow_mut().push((code, message));
  }

  pub fn warning(&self, code: i32, message: impl Into<String>) {
    let message = message.into();
    if !self.json {
      eprintln!("{WARNING_COLOR}Warning {code}{RESET_COLOR}: {message}");
    }
    self.warnings.borrow_mut().push((code, message));
  }

  pub fn result(&self, value: Value) {
    *self.result.borrow_mut() = value;
  }

  pub fn had_errors(&self) -> bool {
    !self.errors.borrow().is_empty()
  }

  /// Writes the accumulated output to stdout.
  pub fn finish(&self) {
    if self.json {
      println!("{}", self.render());
    } else {
      for line in self.result.borrow().lines() {
        println!("{line}");
      }
    }
  }

  fn render(&self) -> serde_json::Value {
    let report = |entries: &[(i32, String)]| {
      entries
        .iter()
        .map(|(code, message)| json!({"code": code, "message": message}))
        .collect::<Vec<_>>()
    };

    json!({
      "result": self.result.borrow().json(),
      "errors": report(&self.errors.borrow()),
      "warnings": report(&self.warnings.borrow()),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn json_object_shape() {
    let logger = Logger::new(true);

    logger.warning(4, "partial support");
    logger.error(5, "supervisor failure");
    logger.result(Value::Bool(false));

    assert_eq!(
      logger.render(),
      json!({
        "result": false,
        "errors": [{"code": 5, "message": "supervisor failure"}],
        "warnings": [{"code": 4, "message": "partial support"}],
      })
    );
    assert!(logger.had_errors());
  }

  #[test]
  fn times_render_as_seconds_and_spaces_as_kibibytes() {
    assert_eq!(Value::Time(Time::from_micros(1_500_000)).json(), json!(1.5));
    assert_eq!(Value::Space(Space::from_bytes(8 << 20)).json(), json!(8192));
  }

  #[test]
  fn mounts_render_as_an_object() {
    let mounts = Value::Mounts(vec![(
      Utf8PathBuf::from("/ro"),
      Utf8PathBuf::from("/usr/bin"),
    )]);

    assert_eq!(mounts.json(), json!({"/ro": "/usr/bin"}));
    assert_eq!(mounts.lines(), vec!["/ro -> /usr/bin"]);
  }

  #[test]
  fn backend_list_rendering() {
    let backends = Value::Backends(vec![BackendSummary {
      name: "unix",
      overhead: 0,
      features: vec!["memory_limit", "signal"],
    }]);

    assert_eq!(
      backends.json(),
      json!([{"name": "unix", "overhead": 0, "features": ["memory_limit", "signal"]}])
    );
    assert_eq!(
      backends.lines(),
      vec!["unix (overhead 0): memory_limit,signal"]
    );
  }
}
