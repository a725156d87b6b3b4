//! The store contract consumed by the policy evaluation core.
//!
//! Persistent backends (file, document database, embedded key-value store)
//! are deliberately out of scope; only this interface matters to the Core.
//! `InMemoryStore` in `aegis-core::memstore` is the one concrete backend
//! shipped here, sufficient to exercise the reactor and the demo services.

use crate::error::Result;
use crate::filter::Filter;
use crate::model::{
    Function, Policy, PolicyAndRolePolicyCount, PolicyStore, RequestContext, RolePolicy, Service,
};
use async_trait::async_trait;
use tokio::sync::mpsc;

#[async_trait]
pub trait Store: Send + Sync {
    fn store_type(&self) -> &str;

    async fn read_policy_store(&self) -> Result<PolicyStore>;

    async fn list_all_services(&self) -> Result<Vec<Service>>;
    async fn get_service(&self, name: &str) -> Result<Service>;
    async fn create_service(&self, service: Service) -> Result<()>;
    async fn delete_service(&self, name: &str) -> Result<()>;
    async fn delete_services(&self) -> Result<()>;

    async fn list_all_policies(&self, service_name: &str, filter: Option<&str>)
        -> Result<Vec<Policy>>;
    /// Returns policy/role-policy counts for a service without fetching the
    /// full lists. Defaulted in terms of the list methods; backends with a
    /// cheaper count query may override it.
    async fn count_policies_and_role_policies(&self, service_name: &str) -> Result<PolicyAndRolePolicyCount> {
        let policy_count = self.list_all_policies(service_name, None).await?.len() as i64;
        let role_policy_count = self.list_all_role_policies(service_name, None).await?.len() as i64;
        Ok(PolicyAndRolePolicyCount {
            policy_count,
            role_policy_count,
        })
    }
    async fn get_policy(&self, service_name: &str, id: &str) -> Result<Policy>;
    async fn create_policy(&self, service_name: &str, policy: Policy) -> Result<()>;
    async fn delete_policy(&self, service_name: &str, id: &str) -> Result<()>;
    /// Deletes every policy in the service. Unlike the source this is
    /// specified to succeed on an empty/missing policy set (see
    /// DESIGN.md's Open Question resolution).
    async fn delete_policies(&self, service_name: &str) -> Result<()>;

    async fn list_all_role_policies(
        &self,
        service_name: &str,
        filter: Option<&str>,
    ) -> Result<Vec<RolePolicy>>;
    async fn get_role_policy(&self, service_name: &str, id: &str) -> Result<RolePolicy>;
    async fn create_role_policy(&self, service_name: &str, policy: RolePolicy) -> Result<()>;
    async fn delete_role_policy(&self, service_name: &str, id: &str) -> Result<()>;
    async fn delete_role_policies(&self, service_name: &str) -> Result<()>;

    async fn list_all_functions(&self) -> Result<Vec<Function>>;
    async fn get_function(&self, name: &str) -> Result<Function>;
    async fn create_function(&self, function: Function) -> Result<()>;
    async fn delete_function(&self, name: &str) -> Result<()>;

    /// Subscribes to the store's change stream. Each call starts a fresh
    /// subscription; the returned receiver yields events until `stop_watch`
    /// is called or the store is dropped.
    fn watch(&self) -> mpsc::Receiver<crate::model::StoreChangeEvent>;
    fn stop_watch(&self);

    /// Capability probe for discover-mode recording, the Rust analogue of
    /// the source's `p.Store.(store.DiscoverRequestManager)` type assertion.
    fn as_discover_manager(&self) -> Option<&dyn DiscoverRequestManager> {
        None
    }
}

#[async_trait]
pub trait DiscoverRequestManager: Send + Sync {
    async fn save_discover_request(&self, ctx: &RequestContext) -> Result<()>;
}

pub(crate) fn validate_filter(filter: Option<&str>) -> Result<Option<Filter>> {
    match filter {
        Some(raw) => Filter::parse(raw),
        None => Ok(None),
    }
}
