use std::fs;

use envconfig::Envconfig;

use crate::rater::Rater;

/// Environment-driven configuration for the extender binary (spec.md §6
/// CLI/env — listed there as façade responsibility; this crate only
/// needs the handful of knobs the core's scoring policy and load-aware
/// rater depend on).
#[derive(Envconfig, Debug, Clone)]
pub struct Config {
    #[envconfig(from = "PORT", default = "8888")]
    pub port: u16,

    /// binpack | spread
    #[envconfig(from = "PRIORITY", default = "binpack")]
    pub priority: String,

    #[envconfig(from = "POLICY_CONFIG_PATH")]
    pub policy_config_path: Option<String>,

    #[envconfig(from = "PROMETHEUS_URL")]
    pub prometheus_url: Option<String>,

    #[envconfig(from = "IS_LOAD_SCHEDULE", default = "false")]
    pub is_load_schedule: bool,
}

/// The subset of `Config` a policy file is allowed to override. Absent
/// keys leave the env-derived value untouched.
#[derive(serde::Deserialize, Debug, Default)]
struct PolicyFile {
    priority: Option<String>,
}

impl Config {
    /// If `POLICY_CONFIG_PATH` is set, overlay its `priority` onto the
    /// env-derived one. A missing or unreadable file is left to the
    /// caller — env vars alone must always be enough to run.
    pub fn apply_policy_file(mut self) -> anyhow::Result<Self> {
        let Some(path) = self.policy_config_path.clone() else {
            return Ok(self);
        };
        let raw = fs::read_to_string(&path)?;
        let policy: PolicyFile = serde_yaml::from_str(&raw)?;
        if let Some(priority) = policy.priority {
            self.priority = priority;
        }
        Ok(self)
    }

    pub fn rater(&self) -> Rater {
        match self.priority.to_lowercase().as_str() {
            "spread" => Rater::Spread,
            _ => Rater::BinPack,
        }
    }

    pub fn load_aware(&self) -> bool {
        self.is_load_schedule && self.prometheus_url.is_some()
    }
}
