//! Shared plumbing for reconfigurable filter stages.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{error, info};

use crate::error::Result;

/// A filter stage whose configuration can be replaced at runtime.
pub trait Reconfigurable: Send + Sync {
    /// Stage name used in logs and on the configuration endpoints.
    fn stage_name(&self) -> &'static str;

    /// Parse a JSON configuration string and replace the active one.
    ///
    /// On error the previous configuration stays active.
    fn reconfigure(&self, json: &str) -> Result<()>;

    /// The configuration document currently in effect.
    fn active_config(&self) -> Value;
}

/// Compiled configuration plus the document it was built from.
pub(crate) struct Active<C> {
    pub compiled: Arc<C>,
    pub document: Value,
}

/// Atomically swappable stage configuration.
pub(crate) struct ConfigSlot<C> {
    stage: &'static str,
    inner: RwLock<Active<C>>,
}

impl<C> ConfigSlot<C> {
    pub fn new(stage: &'static str, compiled: C, document: Value) -> Self {
        Self {
            stage,
            inner: RwLock::new(Active {
                compiled: Arc::new(compiled),
                document,
            }),
        }
    }

    /// Snapshot of the compiled configuration.
    pub fn current(&self) -> Arc<C> {
        self.inner.read().compiled.clone()
    }

    pub fn document(&self) -> Value {
        self.inner.read().document.clone()
    }

    /// Compile `json` with `compile` and swap it in only on success.
    pub fn replace_with(&self, json: &str, compile: impl FnOnce(&Value) -> Result<C>) -> Result<()> {
        let parsed = serde_json::from_str::<Value>(json)
            .map_err(|e| crate::error::FilterError::parse(self.stage, e))
            .and_then(|document| compile(&document).map(|compiled| (compiled, document)));

        match parsed {
            Ok((compiled, document)) => {
                *self.inner.write() = Active {
                    compiled: Arc::new(compiled),
                    document,
                };
                info!(stage = self.stage, "Filter reconfigured");
                Ok(())
            }
            Err(e) => {
                error!(stage = self.stage, error = %e, "Rejected filter configuration");
                Err(e)
            }
        }
    }
}
