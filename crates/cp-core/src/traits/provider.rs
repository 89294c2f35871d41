//! Cloud provider trait

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::types::{CreateRequest, Instance, InstanceId};

/// Abstraction over a cloud control plane
///
/// Every call is attempted exactly once; implementations must not retry.
#[async_trait]
pub trait InstanceProvider: Send + Sync {
    /// Region identifiers usable for new instances, in provider order
    async fn list_regions(&self) -> Result<Vec<String>, ProviderError>;

    /// Create a batch of instances in one region
    async fn create_instances(
        &self,
        request: &CreateRequest,
    ) -> Result<Vec<Instance>, ProviderError>;

    /// Current public address of an instance, `None` while it has none
    async fn get_address(&self, id: InstanceId) -> Result<Option<String>, ProviderError>;

    /// Delete an instance
    async fn delete_instance(&self, id: InstanceId) -> Result<(), ProviderError>;
}
