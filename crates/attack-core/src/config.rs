use crate::error::AttackError;
use crate::target::Target;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub target: TargetConfig,
    pub attack: AttackConfig,
    #[serde(default)]
    pub experiments: Vec<ExperimentConfig>,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AttackError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| AttackError::ConfigIo {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `RATE` (requests per second) and `DURATION` (seconds) from the
    /// environment. Unparseable values are ignored.
    pub fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var("RATE").ok().as_deref(),
            std::env::var("DURATION").ok().as_deref(),
        );
    }

    fn apply_overrides(&mut self, rate: Option<&str>, duration_secs: Option<&str>) {
        if let Some(rate) = rate.and_then(|r| r.trim().parse::<f64>().ok()) {
            self.attack.rate = rate;
        }
        if let Some(secs) = duration_secs.and_then(|d| d.trim().parse::<u64>().ok()) {
            self.attack.duration_ms = secs.saturating_mul(1000);
        }
    }

    pub fn validate(&self) -> Result<(), AttackError> {
        if !self.attack.rate.is_finite() || self.attack.rate <= 0.0 {
            return Err(AttackError::InvalidRate {
                rate: self.attack.rate,
            });
        }
        if self.target.timeout_ms == 0 {
            return Err(AttackError::ConfigValidation {
                message: "target.timeout_ms must be greater than zero".to_string(),
            });
        }
        for experiment in &self.experiments {
            if let Some(perturb) = &experiment.perturb {
                if perturb.command.is_empty() {
                    return Err(AttackError::ConfigValidation {
                        message: format!(
                            "experiment '{}': perturb.command must not be empty",
                            experiment.name
                        ),
                    });
                }
            }
        }
        self.target.build()?;
        Ok(())
    }
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Absolute URL to attack
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Request body sent verbatim
    #[serde(default)]
    pub body: Option<String>,
    /// Per-request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Response headers to copy into results and tally
    #[serde(default)]
    pub capture_headers: Vec<String>,
}

impl TargetConfig {
    pub fn build(&self) -> Result<Target, AttackError> {
        let mut target = Target::new(&self.method, &self.url)?;
        for (name, value) in &self.headers {
            target = target.with_header(name, value)?;
        }
        if let Some(body) = &self.body {
            target = target.with_body(body.clone());
        }
        Ok(target)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackConfig {
    /// Requests per second
    pub rate: f64,
    /// Run length in milliseconds, 0 runs until cancelled
    pub duration_ms: u64,
    /// In-flight count above which a warning is logged; never throttles
    #[serde(default)]
    pub max_in_flight: Option<u64>,
}

impl AttackConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub name: String,
    /// Command run partway through the attack to degrade the target
    #[serde(default)]
    pub perturb: Option<PerturbConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerturbConfig {
    /// Delay after the attack starts, in milliseconds
    pub after_ms: u64,
    /// Program and arguments, e.g. `["kubectl", "stop", "pods", "-l", "name=nginx"]`
    pub command: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
[target]
url = "http://172.17.8.102/"
timeout_ms = 5000
capture_headers = ["X-Served-By"]

[target.headers]
Accept = "text/html"

[attack]
rate = 50
duration_ms = 5000
max_in_flight = 1000

[[experiments]]
name = "load-normal"

[[experiments]]
name = "shutdown-all-nginx"
perturb = { after_ms = 1000, command = ["kubectl", "stop", "pods", "-l", "name=nginx"] }
"#;

    #[test]
    fn test_config_serde() {
        let config: Config = toml::from_str(EXAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.target.method, "GET");
        assert_eq!(config.target.headers["Accept"], "text/html");
        assert_eq!(config.attack.rate, 50.0);
        assert_eq!(config.attack.duration(), Duration::from_secs(5));
        assert_eq!(config.attack.max_in_flight, Some(1000));
        assert_eq!(config.experiments.len(), 2);
        assert!(config.experiments[0].perturb.is_none());

        let perturb = config.experiments[1].perturb.as_ref().unwrap();
        assert_eq!(perturb.after_ms, 1000);
        assert_eq!(perturb.command[0], "kubectl");

        let target = config.target.build().unwrap();
        assert_eq!(target.headers()["Accept"], "text/html");
    }

    #[test]
    fn test_overrides() {
        let mut config: Config = toml::from_str(EXAMPLE).unwrap();
        config.apply_overrides(Some("200"), Some("30"));
        assert_eq!(config.attack.rate, 200.0);
        assert_eq!(config.attack.duration_ms, 30_000);

        config.apply_overrides(Some("fast"), Some(""));
        assert_eq!(config.attack.rate, 200.0);
        assert_eq!(config.attack.duration_ms, 30_000);
    }

    #[test]
    fn test_validate_rejects_bad_rate() {
        let mut config: Config = toml::from_str(EXAMPLE).unwrap();
        config.attack.rate = 0.0;
        assert!(matches!(
            config.validate(),
            Err(AttackError::InvalidRate { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let mut config: Config = toml::from_str(EXAMPLE).unwrap();
        config.target.url = "172.17.8.102".to_string();
        assert!(matches!(
            config.validate(),
            Err(AttackError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_empty_perturb_command() {
        let mut config: Config = toml::from_str(EXAMPLE).unwrap();
        config.experiments[1].perturb.as_mut().unwrap().command.clear();
        assert!(matches!(
            config.validate(),
            Err(AttackError::ConfigValidation { .. })
        ));
    }

    #[test]
    fn test_bundled_example_config_is_valid() {
        let config: Config =
            toml::from_str(include_str!("../../../config/example.toml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.experiments.len(), 6);
        assert_eq!(config.target.capture_headers.len(), 2);
    }

    #[test]
    fn test_from_file_missing() {
        let err = Config::from_file("does/not/exist.toml").unwrap_err();
        assert!(matches!(err, AttackError::ConfigIo { .. }));
    }
}
