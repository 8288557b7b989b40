use super::*;

/// A backend registration. Backends submit one of these from their own
/// module via `inventory`, so the registry is populated before `main`
/// begins.
pub struct Backend {
  pub name: &'static str,
  pub factory: fn(Utf8PathBuf) -> Box<dyn Sandbox>,
}

inventory::collect!(Backend);

/// Instantiates the named backend, bound to `base` but with no id yet.
pub fn create(name: &str, base: &Utf8Path) -> Result<Box<dyn Sandbox>> {
  inventory::iter::<Backend>
    .into_iter()
    .find(|backend| backend.name == name)
    .map(|backend| (backend.factory)(base.to_owned()))
    .ok_or_else(|| Error::UnknownBackend(name.into()))
}

/// The backends that may run in this process, cheapest first.
pub fn list(base: &Utf8Path) -> Vec<BackendSummary> {
  let mut summaries: Vec<BackendSummary> = inventory::iter::<Backend>
    .into_iter()
    .map(|backend| (backend.factory)(base.to_owned()))
    .filter(|sandbox| sandbox.is_available())
    .map(|sandbox| BackendSummary {
      name: sandbox.backend_name(),
      overhead: sandbox.overhead(),
      features: sandbox.features().names(),
    })
    .collect();

  summaries.sort_by_key(|summary| (summary.overhead, summary.name));

  summaries
}
