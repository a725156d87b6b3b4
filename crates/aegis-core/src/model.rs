//! The policy data model: services, policies, role policies, functions and
//! the request context evaluated against them.

use crate::glob;
use crate::principal;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Name of the service whose role policies and policies apply to every
/// other service in addition to its own.
pub const GLOBAL_SERVICE: &str = "global";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Grant,
    Deny,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "resourceExpression"
    )]
    pub resource_expression: Option<String>,
    #[serde(default)]
    pub actions: Vec<String>,
}

impl Permission {
    /// A permission with no permissions at all (empty action list) is inert
    /// and never matches anything; `["*"]` matches every action.
    pub fn matches(&self, resource: &str, action: &str) -> bool {
        let resource_ok = match (&self.resource, &self.resource_expression) {
            (Some(literal), _) => literal == resource,
            (None, Some(expr)) => glob::matches(expr, resource),
            (None, None) => false,
        };
        if !resource_ok {
            return false;
        }
        self.actions.iter().any(|a| a == "*" || a == action)
    }
}

/// A disjunction of conjunctions of principal strings. An empty DNF
/// matches any subject; each inner `Vec<String>` is a conjunction whose
/// principals must *all* be present in the expanded principal set.
pub type PrincipalDnf = Vec<Vec<String>>;

/// Bare names (`"alice"`) and explicitly kinded ones (`"user:alice"`) are
/// normalized before comparison, so a policy written with either form
/// matches a subject expressed with the other.
pub fn dnf_matches(dnf: &PrincipalDnf, held: &[String]) -> bool {
    if dnf.is_empty() {
        return true;
    }
    let held_normalized: Vec<String> = held.iter().map(|h| principal::normalize(h)).collect();
    dnf.iter().any(|conjunction| {
        conjunction.iter().all(|p| {
            let np = principal::normalize(p);
            held_normalized.iter().any(|h| *h == np)
        })
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub effect: Effect,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub principals: PrincipalDnf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolePolicy {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub effect: Effect,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub principals: Vec<String>,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default, rename = "resourceExpressions")]
    pub resource_expressions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl RolePolicy {
    /// Empty scope (no resources and no expressions) applies to every resource.
    pub fn scope_matches(&self, resource: &str) -> bool {
        if self.resources.is_empty() && self.resource_expressions.is_empty() {
            return true;
        }
        self.resources.iter().any(|r| r == resource)
            || self
                .resource_expressions
                .iter()
                .any(|e| glob::matches(e, resource))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "funcURL")]
    pub func_url: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "localFuncURL"
    )]
    pub local_func_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<String>,
    #[serde(default, rename = "resultCachable")]
    pub result_cachable: bool,
    /// Seconds; 0 means the cached result never expires.
    #[serde(default, rename = "resultTTL")]
    pub result_ttl: i64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    #[serde(default)]
    pub r#type: String,
    #[serde(default)]
    pub policies: Vec<Policy>,
    #[serde(default, rename = "rolePolicies")]
    pub role_policies: Vec<RolePolicy>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyStore {
    #[serde(default)]
    pub functions: Vec<Function>,
    #[serde(default)]
    pub services: Vec<Service>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PolicyAndRolePolicyCount {
    #[serde(rename = "policycount")]
    pub policy_count: i64,
    #[serde(rename = "rolePolicycount")]
    pub role_policy_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(default)]
    pub subject: Vec<String>,
    pub service_name: String,
    pub resource: String,
    pub action: String,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}

/// Reason tags reported alongside a decision, per the Decision API contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reason {
    GrantPolicyFound,
    DenyPolicyFound,
    NoApplicablePolicy,
    DiscoverMode,
    ConditionError,
    EvalTimeout,
    StoreUnavailable,
}

/// Store-change event kinds, mirroring the original PDL's `EventType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    ServiceDelete,
    ServiceAdd,
    PolicyDelete,
    PolicyAdd,
    RolePolicyDelete,
    RolePolicyAdd,
    FunctionDelete,
    FunctionAdd,
    SyncReload,
    FullReload,
}

/// Content of a `POLICY_ADD`/`POLICY_DELETE`/`ROLEPOLICY_*` event.
#[derive(Debug, Clone)]
pub struct ServiceScoped<T> {
    pub service_name: String,
    pub data: T,
}

/// A single store mutation, delivered over the store's `watch()` channel.
/// `id` is a monotonic sequence number used only for diagnostics.
#[derive(Debug, Clone)]
pub struct StoreChangeEvent {
    pub id: i64,
    pub kind: EventType,
    pub content: EventContent,
}

#[derive(Debug, Clone)]
pub enum EventContent {
    Service(Box<Service>),
    ServiceName(String),
    Policy(ServiceScoped<Box<Policy>>),
    PolicyId(ServiceScoped<String>),
    RolePolicy(ServiceScoped<Box<RolePolicy>>),
    RolePolicyId(ServiceScoped<String>),
    Function(Box<Function>),
    FunctionName(String),
    FullStore(Box<PolicyStore>),
    None,
}
