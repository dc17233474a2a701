use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Variable naming the runtime environment.
const APP_ENVIRONMENT_ENV_NAME: &str = "APP_ENVIRONMENT";

/// Runtime environment of a backfill process.
///
/// Selects the environment configuration file and the log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Environment {
    #[default]
    Dev,
    Prod,
}

/// The value of `APP_ENVIRONMENT` names no known environment.
#[derive(Debug, Error)]
#[error("`{0}` is not a supported environment, use `dev` or `prod`")]
pub struct UnknownEnvironment(String);

impl Environment {
    /// Reads `APP_ENVIRONMENT`, falling back to [`Environment::Dev`] when it is not set.
    pub fn load() -> Result<Environment, UnknownEnvironment> {
        match std::env::var(APP_ENVIRONMENT_ENV_NAME) {
            Ok(value) => value.parse(),
            Err(_) => Ok(Environment::default()),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Prod => "prod",
        }
    }

    pub fn is_prod(&self) -> bool {
        matches!(self, Environment::Prod)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = UnknownEnvironment;

    /// Parses `dev` or `prod`, ignoring case and surrounding whitespace.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(UnknownEnvironment(value.to_string())),
        }
    }
}
