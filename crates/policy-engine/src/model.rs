//! C5: the indexed, immutable policy snapshot.
//!
//! A `Snapshot` is a read-only view over a `PolicyStore`: per-service
//! policy/role-policy lookup by id, plus the global function table. Once
//! built it is never mutated; the reactor (C6) produces a new one and
//! swaps the pointer readers see.

use aegis_core::model::{Function, Policy, PolicyStore, RolePolicy, Service};
use std::collections::HashMap;
use std::sync::Arc;

/// A service plus by-id indexes over its policies and role policies.
#[derive(Debug, Clone)]
pub struct ServiceIndex {
    service: Service,
    policies_by_id: HashMap<String, usize>,
    role_policies_by_id: HashMap<String, usize>,
}

impl ServiceIndex {
    pub fn build(service: Service) -> Self {
        let policies_by_id = service
            .policies
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id.clone(), i))
            .collect();
        let role_policies_by_id = service
            .role_policies
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id.clone(), i))
            .collect();
        Self {
            service,
            policies_by_id,
            role_policies_by_id,
        }
    }

    pub fn service(&self) -> &Service {
        &self.service
    }

    pub fn policies(&self) -> &[Policy] {
        &self.service.policies
    }

    pub fn role_policies(&self) -> &[RolePolicy] {
        &self.service.role_policies
    }

    pub fn get_policy(&self, id: &str) -> Option<&Policy> {
        self.policies_by_id.get(id).map(|&i| &self.service.policies[i])
    }

    pub fn get_role_policy(&self, id: &str) -> Option<&RolePolicy> {
        self.role_policies_by_id
            .get(id)
            .map(|&i| &self.service.role_policies[i])
    }
}

#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub version: u64,
    services: HashMap<String, Arc<ServiceIndex>>,
    functions: HashMap<String, Function>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self {
            version: 0,
            services: HashMap::new(),
            functions: HashMap::new(),
        }
    }

    pub fn from_policy_store(version: u64, store: &PolicyStore) -> Self {
        let services = store
            .services
            .iter()
            .cloned()
            .map(|s| (s.name.clone(), Arc::new(ServiceIndex::build(s))))
            .collect();
        let functions = store
            .functions
            .iter()
            .cloned()
            .map(|f| (f.name.clone(), f))
            .collect();
        Self {
            version,
            services,
            functions,
        }
    }

    pub fn get_service(&self, name: &str) -> Option<&Arc<ServiceIndex>> {
        self.services.get(name)
    }

    pub fn get_function(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }

    pub fn functions(&self) -> &HashMap<String, Function> {
        &self.functions
    }

    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    /// Copy-on-write: clones the service map (cheap, `Arc` values) and
    /// replaces a single entry, leaving every other service's index shared
    /// with the previous snapshot.
    pub fn with_service_upserted(&self, service: Service) -> Snapshot {
        let mut services = self.services.clone();
        services.insert(service.name.clone(), Arc::new(ServiceIndex::build(service)));
        Snapshot {
            version: self.version + 1,
            services,
            functions: self.functions.clone(),
        }
    }

    pub fn with_service_removed(&self, name: &str) -> Snapshot {
        let mut services = self.services.clone();
        services.remove(name);
        Snapshot {
            version: self.version + 1,
            services,
            functions: self.functions.clone(),
        }
    }

    pub fn with_function_upserted(&self, function: Function) -> Snapshot {
        let mut functions = self.functions.clone();
        functions.insert(function.name.clone(), function);
        Snapshot {
            version: self.version + 1,
            services: self.services.clone(),
            functions,
        }
    }

    pub fn with_function_removed(&self, name: &str) -> Snapshot {
        let mut functions = self.functions.clone();
        functions.remove(name);
        Snapshot {
            version: self.version + 1,
            services: self.services.clone(),
            functions,
        }
    }
}
