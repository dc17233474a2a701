use fail::FailScenario;

/// Fail point configuration active for the lifetime of the value.
///
/// Holding the scenario serializes tests using fail points, since the fail point registry is
/// global to the process. Every configured fail point is turned off on drop.
pub struct CustomFailScenario<'a> {
    _scenario: FailScenario<'a>,
    names: Vec<String>,
}

impl<'a> CustomFailScenario<'a> {
    /// Activates each `(name, action)` pair, for example `("chunk.before_merge", "1*return")`.
    ///
    /// # Panics
    ///
    /// Panics if an action cannot be parsed.
    pub fn setup(failpoints: &[(&str, &str)]) -> CustomFailScenario<'a> {
        let scenario = FailScenario::setup();

        let mut names = Vec::with_capacity(failpoints.len());
        for (name, action) in failpoints {
            if let Err(err) = fail::cfg(*name, action) {
                panic!("invalid action '{action}' for fail point '{name}': {err}");
            }
            names.push(name.to_string());
        }

        Self {
            _scenario: scenario,
            names,
        }
    }
}

impl Drop for CustomFailScenario<'_> {
    fn drop(&mut self) {
        for name in &self.names {
            fail::remove(name);
        }
    }
}
