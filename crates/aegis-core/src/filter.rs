//! Filter grammar for `ListAllPolicies`/`ListAllRolePolicies`: a single
//! clause `"<field> <op> <value?>"`.

use crate::error::{AegisError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Contains,
    StartsWith,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    /// Presence / non-empty check; takes no value.
    Present,
}

impl Op {
    fn parse(s: &str) -> Option<Op> {
        Some(match s {
            "eq" => Op::Eq,
            "co" => Op::Contains,
            "sw" => Op::StartsWith,
            "gt" => Op::GreaterThan,
            "ge" => Op::GreaterOrEqual,
            "lt" => Op::LessThan,
            "le" => Op::LessOrEqual,
            "pr" => Op::Present,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub op: Op,
    pub value: Option<String>,
}

impl Filter {
    /// An empty filter string matches everything (§8.5: filter idempotence).
    pub fn parse(s: &str) -> Result<Option<Filter>> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(None);
        }
        let mut parts = s.splitn(3, ' ');
        let field = parts
            .next()
            .filter(|f| !f.is_empty())
            .ok_or_else(|| AegisError::InvalidRequest {
                reason: format!("malformed filter: '{s}'"),
            })?;
        let op_str = parts.next().ok_or_else(|| AegisError::InvalidRequest {
            reason: format!("malformed filter: '{s}'"),
        })?;
        let op = Op::parse(op_str).ok_or_else(|| AegisError::InvalidRequest {
            reason: format!("unknown filter operator: '{op_str}'"),
        })?;
        let value = parts.next().map(|v| v.to_string());
        if op != Op::Present && value.is_none() {
            return Err(AegisError::InvalidRequest {
                reason: format!("operator '{op_str}' requires a value"),
            });
        }
        Ok(Some(Filter {
            field: field.to_string(),
            op,
            value,
        }))
    }

    /// Evaluate the filter against a field value extracted by the caller
    /// (the filter grammar is field-agnostic; callers resolve `field` to a
    /// concrete string before calling this).
    pub fn matches_value(&self, field_value: Option<&str>) -> bool {
        match self.op {
            Op::Present => field_value.map(|v| !v.is_empty()).unwrap_or(false),
            _ => {
                let Some(fv) = field_value else {
                    return false;
                };
                let Some(expected) = &self.value else {
                    return false;
                };
                match self.op {
                    Op::Eq => fv == expected,
                    Op::Contains => fv.contains(expected.as_str()),
                    Op::StartsWith => fv.starts_with(expected.as_str()),
                    Op::GreaterThan => fv > expected.as_str(),
                    Op::GreaterOrEqual => fv >= expected.as_str(),
                    Op::LessThan => fv < expected.as_str(),
                    Op::LessOrEqual => fv <= expected.as_str(),
                    Op::Present => unreachable!(),
                }
            }
        }
    }
}
