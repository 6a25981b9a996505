use std::sync::Arc;

use crate::config::{Config, ConfigLoader, Role};
use crate::shutdown::Shutdown;

/// Handle given to each spawned role: which role it runs as, a way to read
/// fresh configuration, and the process-wide stop flag.
#[derive(Clone)]
pub struct ServiceContext {
    role: Role,
    config_loader: Arc<ConfigLoader>,
    shutdown: Shutdown,
}

impl ServiceContext {
    pub fn for_role(
        role: Role,
        config_loader: Arc<ConfigLoader>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            role,
            config_loader,
            shutdown,
        }
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn service_name(&self) -> String {
        format!("{:?}", self.role)
    }

    /// Reads a fresh copy of the configuration. Roles reload on every use
    /// rather than caching a snapshot from boot.
    pub fn load_config(&self) -> Config {
        self.config_loader.load().unwrap()
    }

    /// Another handle onto the stop flag, for tasks this role spawns.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Parks the role until the stop flag goes up.
    pub async fn recv_shutdown_signal(&mut self) {
        self.shutdown.recv().await
    }
}
