//! C4: the policy matcher. Resolves roles (C3), iterates a service's (and
//! the global service's) policies, and aggregates grant/deny verdicts.

use crate::expr::{self, EvalContext};
use crate::functions::FunctionInvoker;
use crate::model::Snapshot;
use crate::roles;
use aegis_core::error::Result;
use aegis_core::model::{dnf_matches, Effect, Permission, Reason, RequestContext, GLOBAL_SERVICE};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub reason: Reason,
}

/// A request with no matching grant or deny policy is denied. Named rather
/// than inlined so the default can't be silently flipped to an allow-by-default
/// toggle somewhere downstream.
const DEFAULT_ALLOWED_WHEN_NO_POLICY_MATCHES: bool = false;

fn ordered_services(ctx: &RequestContext) -> Vec<&str> {
    if ctx.service_name == GLOBAL_SERVICE {
        vec![GLOBAL_SERVICE]
    } else {
        vec![ctx.service_name.as_str(), GLOBAL_SERVICE]
    }
}

async fn condition_holds(
    condition: &Option<String>,
    ctx: &RequestContext,
    functions: &FunctionInvoker,
    deadline: Duration,
) -> bool {
    let Some(src) = condition else { return true };
    let parsed = match expr::parse(src) {
        Ok(e) => e,
        Err(e) => {
            debug!(error = %e, "policy condition failed to parse, skipping policy");
            return false;
        }
    };
    let ec = EvalContext {
        ctx,
        functions,
        deadline,
    };
    match expr::eval(&parsed, &ec).await {
        Ok(v) => v.as_bool().unwrap_or(false),
        Err(e) => {
            debug!(error = %e, "policy condition evaluation failed, skipping policy");
            false
        }
    }
}

#[instrument(skip(snapshot, functions), fields(service = %ctx.service_name, resource = %ctx.resource, action = %ctx.action))]
pub async fn is_allowed(
    ctx: &RequestContext,
    snapshot: &Snapshot,
    functions: &FunctionInvoker,
    iteration_cap: usize,
    deadline: Duration,
) -> Result<Decision> {
    let expanded = roles::resolve(ctx, snapshot, functions, iteration_cap, deadline).await?;
    let expanded_vec: Vec<String> = expanded.into_iter().collect();

    let mut grant_found = false;
    for service_name in ordered_services(ctx) {
        let Some(idx) = snapshot.get_service(service_name) else {
            continue;
        };
        for policy in idx.policies() {
            if !dnf_matches(&policy.principals, &expanded_vec) {
                continue;
            }
            if !policy
                .permissions
                .iter()
                .any(|p| p.matches(&ctx.resource, &ctx.action))
            {
                continue;
            }
            if !condition_holds(&policy.condition, ctx, functions, deadline).await {
                continue;
            }
            match policy.effect {
                Effect::Deny => {
                    return Ok(Decision {
                        allowed: false,
                        reason: Reason::DenyPolicyFound,
                    });
                }
                Effect::Grant => grant_found = true,
            }
        }
    }

    if grant_found {
        Ok(Decision {
            allowed: true,
            reason: Reason::GrantPolicyFound,
        })
    } else {
        Ok(Decision {
            allowed: DEFAULT_ALLOWED_WHEN_NO_POLICY_MATCHES,
            reason: Reason::NoApplicablePolicy,
        })
    }
}

#[instrument(skip(snapshot, functions), fields(service = %ctx.service_name))]
pub async fn get_all_granted_roles(
    ctx: &RequestContext,
    snapshot: &Snapshot,
    functions: &FunctionInvoker,
    iteration_cap: usize,
    deadline: Duration,
) -> Result<Vec<String>> {
    let expanded = roles::resolve(ctx, snapshot, functions, iteration_cap, deadline).await?;
    Ok(expanded
        .into_iter()
        .filter_map(|p| p.strip_prefix("role:").map(String::from))
        .collect())
}

fn resource_key(perm: &Permission) -> String {
    match (&perm.resource, &perm.resource_expression) {
        (Some(r), _) => format!("r:{r}"),
        (None, Some(e)) => format!("e:{e}"),
        (None, None) => "none".to_string(),
    }
}

#[instrument(skip(snapshot, functions), fields(service = %ctx.service_name))]
pub async fn get_all_granted_permissions(
    ctx: &RequestContext,
    snapshot: &Snapshot,
    functions: &FunctionInvoker,
    iteration_cap: usize,
    deadline: Duration,
) -> Result<Vec<Permission>> {
    let expanded = roles::resolve(ctx, snapshot, functions, iteration_cap, deadline).await?;
    let expanded_vec: Vec<String> = expanded.into_iter().collect();

    let mut granted: HashMap<(String, String), Permission> = HashMap::new();
    let mut denied: HashSet<(String, String)> = HashSet::new();

    for service_name in ordered_services(ctx) {
        let Some(idx) = snapshot.get_service(service_name) else {
            continue;
        };
        for policy in idx.policies() {
            if !dnf_matches(&policy.principals, &expanded_vec) {
                continue;
            }
            if !condition_holds(&policy.condition, ctx, functions, deadline).await {
                continue;
            }
            for perm in &policy.permissions {
                let rk = resource_key(perm);
                for action in &perm.actions {
                    let key = (rk.clone(), action.clone());
                    match policy.effect {
                        Effect::Grant => {
                            granted.entry(key).or_insert_with(|| Permission {
                                resource: perm.resource.clone(),
                                resource_expression: perm.resource_expression.clone(),
                                actions: vec![action.clone()],
                            });
                        }
                        Effect::Deny => {
                            denied.insert(key);
                        }
                    }
                }
            }
        }
    }

    Ok(granted
        .into_iter()
        .filter(|(key, _)| !denied.contains(key))
        .map(|(_, perm)| perm)
        .collect())
}
