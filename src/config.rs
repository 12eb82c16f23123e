use std::time::Duration;

use anyhow::{bail, Context};
use ::config::{Config, Environment, File};
use serde::Deserialize;

use crate::reconcile::Bounds;

pub const ENV_PREFIX: &str = "ACTIVITYD";
const DEFAULT_FILE: &str = "activityd";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub admin_emails: Vec<String>,
    pub grades: GradeConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    pub log_level: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct GradeConfig {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl BackendConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl AppConfig {
    /// Defaults, then `activityd.{toml,json,yaml}` (or `$ACTIVITYD_CONFIG`),
    /// then `ACTIVITYD_*` environment variables.
    pub fn load() -> anyhow::Result<Self> {
        let file = std::env::var(format!("{ENV_PREFIX}_CONFIG"))
            .unwrap_or_else(|_| DEFAULT_FILE.to_string());
        Self::build(Some(&file), env_source())
    }

    pub fn build(file: Option<&str>, env: Environment) -> anyhow::Result<Self> {
        let mut builder = Config::builder()
            .set_default("grades.min", 0.0)?
            .set_default("grades.max", 5.0)?
            .set_default("log_level", "info")?;
        if let Some(path) = file {
            builder = builder.add_source(File::with_name(path).required(false));
        }
        let cfg: AppConfig = builder
            .add_source(env)
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("invalid configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let g = self.grades;
        if !g.min.is_finite() || !g.max.is_finite() {
            bail!("grades.min and grades.max must be finite");
        }
        if g.min > g.max {
            bail!("grades.min ({}) is greater than grades.max ({})", g.min, g.max);
        }
        Ok(())
    }

    pub fn grade_bounds(&self) -> Bounds {
        Bounds {
            min: self.grades.min,
            max: self.grades.max,
        }
    }
}

pub fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("admin_emails")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        env_source().source(Some(map))
    }

    #[test]
    fn defaults_apply_without_sources() {
        let cfg = AppConfig::build(None, env(&[])).expect("config");
        assert!(cfg.admin_emails.is_empty());
        assert_eq!(cfg.grade_bounds(), Bounds { min: 0.0, max: 5.0 });
        assert_eq!(cfg.log_level, "info");
        assert!(cfg.backend.url.is_none());
    }

    #[test]
    fn environment_overrides_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("activityd.toml");
        std::fs::write(
            &path,
            "admin_emails = [\"file@example.com\"]\n\
             [grades]\nmax = 10.0\n\
             [backend]\nurl = \"https://db.example.com\"\ntimeout_secs = 5\n",
        )
        .expect("write config");

        let cfg = AppConfig::build(
            path.to_str(),
            env(&[
                ("ACTIVITYD_ADMIN_EMAILS", "a@example.com,b@example.com"),
                ("ACTIVITYD_BACKEND__API_KEY", "anon-key"),
            ]),
        )
        .expect("config");
        assert_eq!(cfg.admin_emails, vec!["a@example.com", "b@example.com"]);
        assert_eq!(cfg.grade_bounds(), Bounds { min: 0.0, max: 10.0 });
        assert_eq!(cfg.backend.url.as_deref(), Some("https://db.example.com"));
        assert_eq!(cfg.backend.api_key.as_deref(), Some("anon-key"));
        assert_eq!(cfg.backend.timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let err = AppConfig::build(
            None,
            env(&[("ACTIVITYD_GRADES__MIN", "6"), ("ACTIVITYD_GRADES__MAX", "5")]),
        )
        .expect_err("invalid");
        assert!(err.to_string().contains("greater than"));
    }
}
