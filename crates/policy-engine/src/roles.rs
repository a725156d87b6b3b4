//! C3: role resolution — the fixed-point closure of roles held by a
//! subject within a service, under that service's (and the global
//! service's) role policies.

use crate::expr::{self, EvalContext};
use crate::functions::FunctionInvoker;
use crate::model::Snapshot;
use aegis_core::error::{AegisError, Result};
use aegis_core::model::{Effect, RequestContext, GLOBAL_SERVICE};
use aegis_core::principal::{self, EVERYONE};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, instrument};

/// Runs a role policy's condition, if any. Condition errors are contained:
/// the role policy is treated as not matching, never as a hard failure.
async fn condition_holds(
    condition: &Option<String>,
    ctx: &RequestContext,
    functions: &FunctionInvoker,
    deadline: Duration,
) -> bool {
    let Some(src) = condition else { return true };
    let expr = match expr::parse(src) {
        Ok(e) => e,
        Err(e) => {
            debug!(error = %e, "role policy condition failed to parse, skipping");
            return false;
        }
    };
    let ec = EvalContext {
        ctx,
        functions,
        deadline,
    };
    match expr::eval(&expr, &ec).await {
        Ok(v) => v.as_bool().unwrap_or(false),
        Err(e) => {
            debug!(error = %e, "role policy condition evaluation failed, skipping");
            false
        }
    }
}

/// Computes the expanded principal set: `ctx.subject` plus the implicit
/// `everyone` group plus every `role:<name>` the subject transitively holds
/// in `ctx.service_name` (and the `global` service). Returned for reuse by
/// the matcher (C4), which strips the `role:` prefix for
/// `GetAllGrantedRoles`.
#[instrument(skip(snapshot, functions), fields(service = %ctx.service_name, resource = %ctx.resource))]
pub async fn resolve(
    ctx: &RequestContext,
    snapshot: &Snapshot,
    functions: &FunctionInvoker,
    iteration_cap: usize,
    deadline: Duration,
) -> Result<HashSet<String>> {
    // Bare names (`"alice"`) normalize to `user:alice` here, the single
    // place this set is seeded, so every later comparison against `held`
    // sees only kinded principal strings.
    let mut held: HashSet<String> = ctx.subject.iter().map(|s| principal::normalize(s)).collect();
    held.insert(EVERYONE.to_string());

    let mut denied: HashSet<String> = HashSet::new();

    let services: Vec<&str> = if ctx.service_name == GLOBAL_SERVICE {
        vec![GLOBAL_SERVICE]
    } else {
        vec![ctx.service_name.as_str(), GLOBAL_SERVICE]
    };

    let mut iterations = 0usize;
    loop {
        iterations += 1;
        if iterations > iteration_cap {
            return Err(AegisError::CycleDetected {
                service: ctx.service_name.clone(),
                cap: iteration_cap,
            });
        }

        let mut granted_this_round: HashSet<String> = HashSet::new();
        let mut denied_this_round: HashSet<String> = HashSet::new();

        for service_name in &services {
            let Some(idx) = snapshot.get_service(service_name) else {
                continue;
            };
            for rp in idx.role_policies() {
                let principal_matches = rp.principals.is_empty()
                    || rp
                        .principals
                        .iter()
                        .any(|p| held.contains(&principal::normalize(p)));
                if !principal_matches {
                    continue;
                }
                if !rp.scope_matches(&ctx.resource) {
                    continue;
                }
                if !condition_holds(&rp.condition, ctx, functions, deadline).await {
                    continue;
                }
                for role in &rp.roles {
                    let role_str = format!("role:{role}");
                    match rp.effect {
                        Effect::Deny => {
                            denied_this_round.insert(role_str);
                        }
                        Effect::Grant => {
                            granted_this_round.insert(role_str);
                        }
                    }
                }
            }
        }

        // Deny is authoritative for the whole pass: a role denied this
        // round can never be (re-)granted in this resolution, even if a
        // grant for it was also observed this round.
        denied.extend(denied_this_round.iter().cloned());

        let mut changed = false;
        for role_str in denied_this_round {
            if held.remove(&role_str) {
                changed = true;
            }
        }
        for role_str in granted_this_round {
            if denied.contains(&role_str) {
                continue;
            }
            if held.insert(role_str) {
                changed = true;
            }
        }

        if !changed {
            break;
        }
    }

    Ok(held)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::model::RolePolicy;
    use std::collections::HashMap;

    fn ctx(subject: Vec<&str>) -> RequestContext {
        RequestContext {
            subject: subject.into_iter().map(String::from).collect(),
            service_name: "crm".into(),
            resource: "/node1".into(),
            action: "get".into(),
            attributes: HashMap::new(),
        }
    }

    fn role_policy(id: &str, effect: Effect, roles: Vec<&str>, principals: Vec<&str>) -> RolePolicy {
        RolePolicy {
            id: id.into(),
            name: None,
            effect,
            roles: roles.into_iter().map(String::from).collect(),
            principals: principals.into_iter().map(String::from).collect(),
            resources: vec![],
            resource_expressions: vec![],
            condition: None,
            metadata: HashMap::new(),
        }
    }

    fn snapshot_with(role_policies: Vec<RolePolicy>) -> Snapshot {
        use aegis_core::model::{PolicyStore, Service};
        let store = PolicyStore {
            functions: vec![],
            services: vec![Service {
                name: "crm".into(),
                r#type: "app".into(),
                policies: vec![],
                role_policies,
                metadata: HashMap::new(),
            }],
        };
        Snapshot::from_policy_store(1, &store)
    }

    #[tokio::test]
    async fn transitive_role_closure() {
        let snap = snapshot_with(vec![
            role_policy("rp1", Effect::Grant, vec!["role1"], vec!["user:alice"]),
            role_policy("rp2", Effect::Grant, vec!["role2"], vec!["role:role1"]),
        ]);
        let functions = FunctionInvoker::new_empty();
        let held = resolve(&ctx(vec!["user:alice"]), &snap, &functions, 256, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(held.contains("role:role1"));
        assert!(held.contains("role:role2"));
    }

    #[tokio::test]
    async fn deny_role_policy_prevents_role_from_ever_being_held() {
        let snap = snapshot_with(vec![
            role_policy("rp1", Effect::Grant, vec!["role1"], vec!["user:alice"]),
            role_policy("rp2", Effect::Deny, vec!["role1"], vec!["user:alice"]),
        ]);
        let functions = FunctionInvoker::new_empty();
        let held = resolve(&ctx(vec!["user:alice"]), &snap, &functions, 256, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(!held.contains("role:role1"));
    }

    #[tokio::test]
    async fn unrelated_principal_gets_no_roles() {
        let snap = snapshot_with(vec![role_policy(
            "rp1",
            Effect::Grant,
            vec!["role1"],
            vec!["user:alice"],
        )]);
        let functions = FunctionInvoker::new_empty();
        let held = resolve(&ctx(vec!["user:bob"]), &snap, &functions, 256, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(!held.contains("role:role1"));
    }

    #[tokio::test]
    async fn bare_subject_name_matches_kinded_principal() {
        let snap = snapshot_with(vec![role_policy(
            "rp1",
            Effect::Grant,
            vec!["role1"],
            vec!["user:alice"],
        )]);
        let functions = FunctionInvoker::new_empty();
        let held = resolve(&ctx(vec!["alice"]), &snap, &functions, 256, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(held.contains("role:role1"));
    }

    #[tokio::test]
    async fn iteration_cap_of_zero_reports_cycle_detected() {
        let snap = snapshot_with(vec![role_policy(
            "rp1",
            Effect::Grant,
            vec!["role1"],
            vec!["user:alice"],
        )]);
        let functions = FunctionInvoker::new_empty();
        let err = resolve(&ctx(vec!["user:alice"]), &snap, &functions, 0, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AegisError::CycleDetected { .. }));
    }
}
