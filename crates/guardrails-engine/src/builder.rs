//! Builder for ApprovalService

use crate::config::{ConfigError, GuardrailsConfig};
use crate::directory::ActorDirectory;
use crate::events::NotificationSink;
use crate::service::ApprovalService;
use crate::targets::TargetRegistry;
use guardrails_store::ApprovalStore;
use std::sync::Arc;

/// Builder for constructing an ApprovalService with its collaborators
#[derive(Default)]
pub struct ApprovalServiceBuilder {
    store: Option<Arc<dyn ApprovalStore>>,
    targets: Option<Arc<dyn TargetRegistry>>,
    directory: Option<Arc<dyn ActorDirectory>>,
    sinks: Vec<Arc<dyn NotificationSink>>,
    config: Option<GuardrailsConfig>,
}

impl ApprovalServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the approval store
    pub fn with_store(mut self, store: Arc<dyn ApprovalStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the target registry
    pub fn with_targets(mut self, targets: Arc<dyn TargetRegistry>) -> Self {
        self.targets = Some(targets);
        self
    }

    /// Set the actor directory used for initiator cross-checks
    pub fn with_directory(mut self, directory: Arc<dyn ActorDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Add a notification sink
    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Set the configuration
    pub fn with_config(mut self, config: GuardrailsConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Build the service
    pub fn build(self) -> Result<ApprovalService, ConfigError> {
        let store = self.store.ok_or(ConfigError::MissingComponent("store"))?;
        let targets = self
            .targets
            .ok_or(ConfigError::MissingComponent("target registry"))?;
        let config = self.config.unwrap_or_default();
        let flows = config.configured_flows();

        Ok(ApprovalService {
            store,
            targets,
            directory: self.directory,
            sinks: self.sinks,
            config,
            flows,
        })
    }
}
