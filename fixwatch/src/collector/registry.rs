//! Collector-per-project registry owned by the composition root.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::{CollectorConfig, ErrorCollector};
use crate::channel::ChannelError;
use crate::transport::ReportTransport;

/// Holds at most one [`ErrorCollector`] per project id.
pub struct CollectorRegistry<T: ReportTransport + Clone> {
    transport: T,
    collectors: RwLock<HashMap<String, ErrorCollector<T>>>,
}

impl<T: ReportTransport + Clone> CollectorRegistry<T> {
    /// Creates an empty registry. Every collector shares `transport`.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            collectors: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the collector for `project_id`, creating it on first use.
    ///
    /// Re-acquiring an existing collector applies `config` in place; its fix
    /// channel is not reopened.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] if `config.backend_url` is invalid.
    pub fn acquire(
        &self,
        project_id: &str,
        config: CollectorConfig,
    ) -> Result<ErrorCollector<T>, ChannelError> {
        let mut collectors = self.collectors.write();
        if let Some(existing) = collectors.get(project_id) {
            existing.update_config(config)?;
            return Ok(existing.clone());
        }
        let collector = ErrorCollector::new(project_id, config, self.transport.clone())?;
        collectors.insert(project_id.to_string(), collector.clone());
        tracing::info!(project_id, "collector created");
        Ok(collector)
    }

    /// The collector for `project_id`, if one exists.
    #[must_use]
    pub fn get(&self, project_id: &str) -> Option<ErrorCollector<T>> {
        self.collectors.read().get(project_id).cloned()
    }

    /// Destroys and removes the collector for `project_id`.
    /// Returns whether one existed.
    pub fn destroy(&self, project_id: &str) -> bool {
        let removed = self.collectors.write().remove(project_id);
        let Some(collector) = removed else {
            return false;
        };
        collector.destroy();
        true
    }

    /// Destroys every collector.
    pub fn destroy_all(&self) {
        let drained: Vec<_> = self.collectors.write().drain().map(|(_, c)| c).collect();
        for collector in drained {
            collector.destroy();
        }
    }

    /// Number of live collectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.collectors.read().len()
    }

    /// Whether the registry holds no collectors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.collectors.read().is_empty()
    }
}
