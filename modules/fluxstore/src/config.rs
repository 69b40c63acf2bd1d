use tokio::runtime::Handle;

use crate::error::{Result, StoreError};

const DEFAULT_LABEL: &str = "store";
const DEFAULT_EFFECT_WARN_THRESHOLD: usize = 1024;

/// Per-store settings. Scoped stores and views inherit the runtime of the
/// store they are derived from.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Name used in log fields.
    pub label: String,
    /// Warn when this many effects are in flight at once.
    pub effect_warn_threshold: usize,
    /// Runtime effects are spawned on. `None` means the current runtime.
    pub runtime: Option<Handle>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            label: DEFAULT_LABEL.to_string(),
            effect_warn_threshold: DEFAULT_EFFECT_WARN_THRESHOLD,
            runtime: None,
        }
    }
}

impl StoreConfig {
    /// Load from `FLUXSTORE_LABEL` and `FLUXSTORE_EFFECT_WARN_THRESHOLD`,
    /// after reading a `.env` file if one exists.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(label) = lookup("FLUXSTORE_LABEL").filter(|l| !l.trim().is_empty()) {
            config.label = label.trim().to_string();
        }

        if let Some(raw) = lookup("FLUXSTORE_EFFECT_WARN_THRESHOLD") {
            config.effect_warn_threshold = raw.trim().parse().map_err(|_| {
                StoreError::Config(format!(
                    "FLUXSTORE_EFFECT_WARN_THRESHOLD must be a non-negative integer, got {raw:?}"
                ))
            })?;
        }

        Ok(config)
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_effect_warn_threshold(mut self, threshold: usize) -> Self {
        self.effect_warn_threshold = threshold;
        self
    }

    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub(crate) fn resolve_runtime(&self) -> Result<Handle> {
        match &self.runtime {
            Some(handle) => Ok(handle.clone()),
            None => Ok(Handle::try_current()?),
        }
    }
}
