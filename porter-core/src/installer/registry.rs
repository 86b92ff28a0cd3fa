use std::collections::HashMap;
use std::sync::Arc;

use porter_common::error::{PorterError, Result};
use porter_common::model::InstallerType;
use tracing::debug;

use super::{
    ArchiveExtractor, ArchiveManager, DmgManager, Manager, MsiManager, NakedManager,
    UnsupportedManager,
};

/// Installer type to manager table, built once at startup.
#[derive(Default)]
pub struct ManagerRegistry {
    managers: HashMap<InstallerType, Arc<dyn Manager>>,
}

impl ManagerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in manager, with archives going through `extractor`.
    pub fn with_defaults(extractor: Arc<dyn ArchiveExtractor>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ArchiveManager::new(extractor)));
        registry.register(Arc::new(NakedManager));
        registry.register(Arc::new(UnsupportedManager));
        registry.register(Arc::new(DmgManager));
        registry.register(Arc::new(MsiManager));
        registry
    }

    /// Registers `manager` under its own name, replacing any previous one.
    pub fn register(&mut self, manager: Arc<dyn Manager>) -> &mut Self {
        let name = manager.name();
        if self.managers.insert(name, manager).is_some() {
            debug!("Replaced installer manager for {}", name);
        }
        self
    }

    pub fn get(&self, ty: InstallerType) -> Result<Arc<dyn Manager>> {
        self.managers.get(&ty).cloned().ok_or_else(|| {
            PorterError::Config(format!("no installer manager registered for '{ty}'"))
        })
    }
}
