//! Downstream-to-upstream status translation.
//!
//! A downstream status is expressed in terms of the downstream cluster: its
//! namespaces, its controller and its objects. Before it is written back
//! upstream, a [`StatusTransform`] rewrites it into upstream terms, running
//! each condition through the resource's [`ConditionHandler`] chain.

use crate::Result;
use netsvc_operator_k8s_api::{conditions, Condition};
use serde_json::Value;
use std::sync::Arc;

/// Everything a transform knows about the object whose status it rewrites.
#[derive(Clone, Copy)]
pub struct StatusContext<'a> {
    pub upstream_namespace: &'a str,
    pub downstream_namespace: &'a str,
    /// The controller name reported upstream.
    pub controller_name: &'a str,
    pub condition_handlers: &'a [Arc<dyn ConditionHandler>],
}

/// Rewrites a downstream status document into the upstream status.
pub trait StatusTransform: Send + Sync {
    fn transform(&self, ctx: &StatusContext<'_>, downstream: &Value) -> Result<Value>;
}

/// Filters or rewrites a single condition. Returning `None` drops it.
pub trait ConditionHandler: Send + Sync {
    fn handle(&self, ctx: &StatusContext<'_>, condition: Condition) -> Option<Condition>;
}

/// Copies the status unchanged apart from its top-level `conditions`.
#[derive(Clone, Debug, Default)]
pub struct CopyStatus;

/// Translates policy-attachment statuses, which report one entry per
/// ancestor the policy is attached to.
#[derive(Clone, Debug, Default)]
pub struct PolicyAncestorStatus;

/// Replaces the message of matching conditions.
#[derive(Clone, Debug, Default)]
pub struct RewriteMessage {
    /// Only conditions of this type match, if set.
    pub condition_type: Option<String>,
    /// Only conditions with this reason match, if set.
    pub reason: Option<String>,
    /// Only conditions whose message contains this text match.
    pub contains: String,
    pub message: String,
}

/// Drops conditions by type or reason.
#[derive(Clone, Debug, Default)]
pub struct DropConditions {
    pub types: Vec<String>,
    pub reasons: Vec<String>,
}

/// Replaces mentions of the downstream namespace in condition messages with
/// the upstream namespace.
#[derive(Clone, Debug, Default)]
pub struct RewriteNamespace;

// === impl StatusContext ===

impl StatusContext<'_> {
    /// Runs every condition through the handler chain, in order.
    pub fn handle_conditions(&self, conditions: Vec<Condition>) -> Vec<Condition> {
        conditions
            .into_iter()
            .filter_map(|condition| {
                self.condition_handlers
                    .iter()
                    .try_fold(condition, |c, handler| handler.handle(self, c))
            })
            .collect()
    }

    /// Rewrites the `conditions` list of a status document in place, leaving
    /// documents without one untouched.
    fn rewrite_conditions(&self, status: &mut Value) -> Result<()> {
        if status.get("conditions").is_none() {
            return Ok(());
        }
        let handled = self.handle_conditions(conditions::from_status(status)?);
        conditions::into_status(status, &handled)?;
        Ok(())
    }
}

impl std::fmt::Debug for StatusContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusContext")
            .field("upstream_namespace", &self.upstream_namespace)
            .field("downstream_namespace", &self.downstream_namespace)
            .field("controller_name", &self.controller_name)
            .field("condition_handlers", &self.condition_handlers.len())
            .finish()
    }
}

// === impl StatusTransform ===

impl<F> StatusTransform for F
where
    F: Fn(&StatusContext<'_>, &Value) -> Result<Value> + Send + Sync,
{
    fn transform(&self, ctx: &StatusContext<'_>, downstream: &Value) -> Result<Value> {
        (self)(ctx, downstream)
    }
}

impl StatusTransform for CopyStatus {
    fn transform(&self, ctx: &StatusContext<'_>, downstream: &Value) -> Result<Value> {
        let mut status = downstream.clone();
        ctx.rewrite_conditions(&mut status)?;
        Ok(status)
    }
}

impl StatusTransform for PolicyAncestorStatus {
    fn transform(&self, ctx: &StatusContext<'_>, downstream: &Value) -> Result<Value> {
        let mut status = downstream.clone();
        let ancestors = status
            .get_mut("ancestors")
            .and_then(Value::as_array_mut)
            .into_iter()
            .flatten();
        for ancestor in ancestors {
            if let Some(namespace) = ancestor.pointer_mut("/ancestorRef/namespace") {
                if namespace.as_str() == Some(ctx.downstream_namespace) {
                    *namespace = Value::String(ctx.upstream_namespace.to_string());
                }
            }
            if let Some(fields) = ancestor.as_object_mut() {
                fields.insert(
                    "controllerName".to_string(),
                    Value::String(ctx.controller_name.to_string()),
                );
            }
            ctx.rewrite_conditions(ancestor)?;
        }
        Ok(status)
    }
}

// === impl ConditionHandler ===

impl<F> ConditionHandler for F
where
    F: Fn(&StatusContext<'_>, Condition) -> Option<Condition> + Send + Sync,
{
    fn handle(&self, ctx: &StatusContext<'_>, condition: Condition) -> Option<Condition> {
        (self)(ctx, condition)
    }
}

impl ConditionHandler for RewriteMessage {
    fn handle(&self, _: &StatusContext<'_>, mut condition: Condition) -> Option<Condition> {
        let matches = self
            .condition_type
            .as_ref()
            .map_or(true, |t| *t == condition.type_)
            && self.reason.as_ref().map_or(true, |r| *r == condition.reason)
            && condition.message.contains(&self.contains);
        if matches {
            condition.message = self.message.clone();
        }
        Some(condition)
    }
}

impl ConditionHandler for DropConditions {
    fn handle(&self, _: &StatusContext<'_>, condition: Condition) -> Option<Condition> {
        if self.types.contains(&condition.type_) || self.reasons.contains(&condition.reason) {
            return None;
        }
        Some(condition)
    }
}

impl ConditionHandler for RewriteNamespace {
    fn handle(&self, ctx: &StatusContext<'_>, mut condition: Condition) -> Option<Condition> {
        if !ctx.downstream_namespace.is_empty()
            && ctx.downstream_namespace != ctx.upstream_namespace
        {
            condition.message = condition
                .message
                .replace(ctx.downstream_namespace, ctx.upstream_namespace);
        }
        Some(condition)
    }
}
