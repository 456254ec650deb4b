//! Controller registry.
//!
//! Built once from configuration and passed by reference to whatever needs
//! a controller. Controllers are created lazily the first time their
//! service is requested and shared from then on.

use gda_core::pv::SharedClient;
use gda_core::{GdaError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::controller::{AdController, ControllerConfig};

/// Service name to controller.
pub struct ControllerRegistry {
    client: SharedClient,
    configs: HashMap<String, ControllerConfig>,
    controllers: RwLock<HashMap<String, Arc<AdController>>>,
}

impl std::fmt::Debug for ControllerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerRegistry")
            .field("services", &self.service_names())
            .field("registered", &self.controllers.read().len())
            .finish()
    }
}

impl ControllerRegistry {
    /// Creates the registry. Entries are validated; duplicate service names
    /// are rejected.
    pub fn new(client: SharedClient, configs: impl IntoIterator<Item = ControllerConfig>) -> Result<Self> {
        let mut by_name = HashMap::new();
        for config in configs {
            config.validate()?;
            let name = config.service_name.clone();
            if by_name.insert(name.clone(), config).is_some() {
                return Err(GdaError::Configuration(format!(
                    "duplicate controller service '{name}'"
                )));
            }
        }
        Ok(Self {
            client,
            configs: by_name,
            controllers: RwLock::new(HashMap::new()),
        })
    }

    /// A controller that has already been registered.
    pub fn get(&self, service: &str) -> Option<Arc<AdController>> {
        self.controllers.read().get(service).cloned()
    }

    /// Returns the controller for `service`, building it from its
    /// configuration entry on first use.
    pub fn get_or_register(&self, service: &str) -> Result<Arc<AdController>> {
        if let Some(controller) = self.get(service) {
            return Ok(controller);
        }
        let config = self.configs.get(service).ok_or_else(|| {
            GdaError::NotConfigured(format!("Unable to access ADController for service '{service}'"))
        })?;

        let mut controllers = self.controllers.write();
        // Another caller may have registered it meanwhile.
        if let Some(controller) = controllers.get(service) {
            return Ok(controller.clone());
        }
        let controller = Arc::new(AdController::new(self.client.clone(), config.clone())?);
        controllers.insert(service.to_string(), controller.clone());
        info!(service, detector = controller.detector_name(), "registered controller");
        Ok(controller)
    }

    /// Configured service names, sorted.
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.configs.keys().cloned().collect();
        names.sort();
        names
    }

    /// Configuration entry for `service`.
    pub fn config(&self, service: &str) -> Option<&ControllerConfig> {
        self.configs.get(service)
    }

    /// True if `service` is configured.
    pub fn contains(&self, service: &str) -> bool {
        self.configs.contains_key(service)
    }

    /// Number of configured services.
    pub fn len(&self) -> usize {
        self.configs.len()
    }

    /// True when no service is configured.
    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gda_core::SimulatedIoc;

    fn registry() -> ControllerRegistry {
        ControllerRegistry::new(
            SimulatedIoc::new().shared(),
            [
                ControllerConfig::new("pco", "BL13I-EA-DET-01:"),
                ControllerConfig::new("pixium", "BL13I-EA-DET-02:"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_lazy_registration_shares_controller() {
        let registry = registry();
        assert!(registry.get("pco").is_none());

        let first = registry.get_or_register("pco").unwrap();
        let second = registry.get_or_register("pco").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(registry.get("pco").is_some());
        assert!(registry.get("pixium").is_none());
    }

    #[test]
    fn test_unknown_service_is_not_configured() {
        let err = registry().get_or_register("merlin").unwrap_err();
        assert!(matches!(err, GdaError::NotConfigured(_)));
        assert!(err.to_string().contains("merlin"));
    }

    #[test]
    fn test_duplicate_service_rejected() {
        let result = ControllerRegistry::new(
            SimulatedIoc::new().shared(),
            [
                ControllerConfig::new("pco", "A:"),
                ControllerConfig::new("pco", "B:"),
            ],
        );
        assert!(matches!(result, Err(GdaError::Configuration(_))));
    }

    #[test]
    fn test_service_names_sorted() {
        let registry = registry();
        assert_eq!(registry.service_names(), vec!["pco", "pixium"]);
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("pixium"));
        assert!(!registry.is_empty());
    }
}
