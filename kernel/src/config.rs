//! Engine settings shared by the registry, the interpreter and extensions.
//!
//! Missing fields fall back to [`Default`] values, so a partial TOML table
//! in the host configuration is enough.

use serde::{Deserialize, Serialize};

/// Engine-wide settings. Owned by the [`crate::registry::Registry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on live actions in one result.
    pub max_actions: usize,
    pub duplicate: DuplicateConfig,
    pub vacation: VacationConfig,
}

/// Tracking periods for the `duplicate` test, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplicateConfig {
    pub default_period: u64,
    pub max_period: u64,
}

/// Reply interval bounds for `vacation`, in days.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VacationConfig {
    pub default_days: u64,
    pub min_days: u64,
    pub max_days: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_actions: 32,
            duplicate: DuplicateConfig::default(),
            vacation: VacationConfig::default(),
        }
    }
}

impl Default for DuplicateConfig {
    fn default() -> Self {
        Self {
            default_period: 12 * 60 * 60,
            max_period: 2 * 24 * 60 * 60,
        }
    }
}

impl Default for VacationConfig {
    fn default() -> Self {
        Self {
            default_days: 7,
            min_days: 1,
            max_days: 30,
        }
    }
}

/// A setting that cannot be used as configured.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid setting {field}: {detail}")]
pub struct InvalidSetting {
    pub field: &'static str,
    pub detail: String,
}

impl EngineConfig {
    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidSetting`] naming the first offending field.
    pub fn validate(&self) -> Result<(), InvalidSetting> {
        if self.max_actions == 0 {
            return Err(InvalidSetting {
                field: "max_actions",
                detail: "must be > 0".into(),
            });
        }
        if self.duplicate.default_period == 0 {
            return Err(InvalidSetting {
                field: "duplicate.default_period",
                detail: "must be > 0".into(),
            });
        }
        if self.duplicate.default_period > self.duplicate.max_period {
            return Err(InvalidSetting {
                field: "duplicate.default_period",
                detail: format!(
                    "{} exceeds duplicate.max_period {}",
                    self.duplicate.default_period, self.duplicate.max_period
                ),
            });
        }
        let v = &self.vacation;
        if v.min_days == 0 {
            return Err(InvalidSetting {
                field: "vacation.min_days",
                detail: "must be > 0".into(),
            });
        }
        if v.min_days > v.max_days {
            return Err(InvalidSetting {
                field: "vacation.min_days",
                detail: format!("{} exceeds vacation.max_days {}", v.min_days, v.max_days),
            });
        }
        if v.default_days < v.min_days || v.default_days > v.max_days {
            return Err(InvalidSetting {
                field: "vacation.default_days",
                detail: format!(
                    "{} outside [{}, {}]",
                    v.default_days, v.min_days, v.max_days
                ),
            });
        }
        Ok(())
    }
}
