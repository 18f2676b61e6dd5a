// src/config.rs
//! Reconciliation policy config: TOML file + env overrides.
//!
//! ```toml
//! [reconcile]
//! auto_link_min = "high_confidence"
//! review_min = "medium_confidence"
//! max_candidates = 3
//! batch_size = 500
//! create_deals_for_orphans = false
//! audit_capacity = 2000
//! default_owner = "system"
//! ```
//!
//! Scoring thresholds are not configurable; only what to *do* with a score is.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::scoring::ConfidenceLevel;

// --- env defaults & names ---
pub const DEFAULT_RECONCILE_CONFIG_PATH: &str = "config/reconcile.toml";

pub const ENV_RECONCILE_CONFIG_PATH: &str = "RECONCILE_CONFIG_PATH";
pub const ENV_RECONCILE_BATCH_SIZE: &str = "RECONCILE_BATCH_SIZE";
pub const ENV_RECONCILE_DEFAULT_OWNER: &str = "RECONCILE_DEFAULT_OWNER";

const MAX_AUDIT_CAPACITY: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Matches at or above this tier are linked without asking.
    pub auto_link_min: ConfidenceLevel,
    /// Matches at or above this tier (but below `auto_link_min`) go to review.
    pub review_min: ConfidenceLevel,
    /// Best-N deals kept per activity before one-to-one assignment.
    pub max_candidates: usize,
    /// Max orphan activities per run.
    pub batch_size: usize,
    pub create_deals_for_orphans: bool,
    pub audit_capacity: usize,
    /// Owner for created deals when the request carries no user.
    pub default_owner: String,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            auto_link_min: ConfidenceLevel::HighConfidence,
            review_min: ConfidenceLevel::MediumConfidence,
            max_candidates: 3,
            batch_size: 500,
            create_deals_for_orphans: false,
            audit_capacity: 2000,
            default_owner: "system".to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigRoot {
    #[serde(default)]
    reconcile: ReconcileConfig,
}

impl ReconcileConfig {
    /// Parse and validate a TOML document. A missing `[reconcile]` table means defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let root: ConfigRoot = toml::from_str(s).context("parsing reconcile config")?;
        let cfg = root.reconcile;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from an explicit path (no env overrides).
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading reconcile config from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Resolve the config the way the service does:
    /// 1) `$RECONCILE_CONFIG_PATH` (must exist)
    /// 2) `config/reconcile.toml` if present
    /// 3) built-in defaults
    ///
    /// then apply env overrides.
    pub fn load() -> Result<Self> {
        let mut cfg = match std::env::var(ENV_RECONCILE_CONFIG_PATH) {
            Ok(p) => {
                let pb = PathBuf::from(p);
                if !pb.exists() {
                    return Err(anyhow!(
                        "{ENV_RECONCILE_CONFIG_PATH} points to non-existent path {}",
                        pb.display()
                    ));
                }
                Self::load_from(&pb)?
            }
            Err(_) => {
                let default = PathBuf::from(DEFAULT_RECONCILE_CONFIG_PATH);
                if default.exists() {
                    Self::load_from(&default)?
                } else {
                    Self::default()
                }
            }
        };
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(n) = parse_positive_env(std::env::var(ENV_RECONCILE_BATCH_SIZE).ok()) {
            self.batch_size = n;
        }
        if let Ok(owner) = std::env::var(ENV_RECONCILE_DEFAULT_OWNER) {
            let owner = owner.trim();
            if !owner.is_empty() {
                self.default_owner = owner.to_string();
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.review_min > self.auto_link_min {
            bail!(
                "review_min ({}) must not be above auto_link_min ({})",
                self.review_min,
                self.auto_link_min
            );
        }
        if self.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if self.max_candidates == 0 {
            bail!("max_candidates must be at least 1");
        }
        if self.audit_capacity == 0 || self.audit_capacity > MAX_AUDIT_CAPACITY {
            bail!("audit_capacity must be within 1..={MAX_AUDIT_CAPACITY}");
        }
        if self.default_owner.trim().is_empty() {
            bail!("default_owner must not be empty");
        }
        Ok(())
    }
}

// parse optional positive integer env; junk and zero are ignored
fn parse_positive_env(raw: Option<String>) -> Option<usize> {
    raw.and_then(|s| s.trim().parse::<usize>().ok())
        .filter(|n| *n > 0)
}
