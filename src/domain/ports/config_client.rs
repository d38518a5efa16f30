//! ConfigClient port
//! Pull boundary towards the service catalog

use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::{DeployInfo, Result, ServiceInfo};

/// One catalog entry: the service record plus its optional deployment overlay
#[derive(Debug, Clone)]
pub struct ServiceDeployment {
    pub info: Arc<ServiceInfo>,
    pub deploy: Option<DeployInfo>,
}

impl ServiceDeployment {
    pub fn new(info: ServiceInfo) -> Self {
        Self {
            info: Arc::new(info),
            deploy: None,
        }
    }

    pub fn with_deploy(mut self, deploy: DeployInfo) -> Self {
        self.deploy = Some(deploy);
        self
    }
}

/// Port towards the configuration source. The supervisor pulls the full
/// target set and diffs it against the live fleet.
#[async_trait]
pub trait ConfigClient: Send + Sync {
    async fn pull(&self) -> Result<Vec<ServiceDeployment>>;
}
