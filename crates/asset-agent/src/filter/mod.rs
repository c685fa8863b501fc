//! Per-entity applicability of assets.
//!
//! An asset's filters are predicate expressions evaluated against
//! `{"entity": <entity>}`. Only assets whose filters all hold are installed.

mod expr;

pub use expr::{EvalError, ExpressionEvaluator, PredicateEvaluator};

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::asset::{AssetSpec, RuntimeAsset};
use crate::coordinator::Getter;
use crate::{AssetError, Result};

/// Whether `spec` applies to `entity`.
///
/// An asset without filters always applies. Expressions are evaluated in
/// order and the first one that is false decides. Syntax and type errors
/// fail the whole check; any other evaluation error skips that expression.
pub fn is_applicable(
    evaluator: &dyn PredicateEvaluator,
    spec: &AssetSpec,
    entity: &Value,
) -> Result<bool> {
    if spec.filters.is_empty() {
        return Ok(true);
    }

    let context = json!({ "entity": entity });
    for expression in &spec.filters {
        match evaluator.evaluate(expression, &context) {
            Ok(true) => {}
            Ok(false) => {
                log::debug!(
                    "Asset {} not applicable: filter \"{}\" is false",
                    spec.name,
                    expression
                );
                return Ok(false);
            }
            Err(e @ (EvalError::Syntax(_) | EvalError::Type(_))) => {
                return Err(AssetError::FilterEvaluation {
                    expression: expression.clone(),
                    reason: e.to_string(),
                });
            }
            Err(EvalError::Other(reason)) => {
                log::warn!(
                    "Skipping filter \"{}\" of asset {}: {}",
                    expression,
                    spec.name,
                    reason
                );
            }
        }
    }

    Ok(true)
}

/// A [`Getter`] that only delegates for assets applicable to an entity.
pub struct FilteredGetter {
    inner: Arc<dyn Getter>,
    entity: Value,
    evaluator: Arc<dyn PredicateEvaluator>,
}

impl FilteredGetter {
    pub fn new(
        inner: Arc<dyn Getter>,
        entity: Value,
        evaluator: Arc<dyn PredicateEvaluator>,
    ) -> Self {
        Self {
            inner,
            entity,
            evaluator,
        }
    }

    pub fn entity(&self) -> &Value {
        &self.entity
    }

    /// Check applicability without installing.
    pub fn is_applicable(&self, spec: &AssetSpec) -> Result<bool> {
        is_applicable(self.evaluator.as_ref(), spec, &self.entity)
    }

    /// Resolve `spec` for an explicit entity.
    ///
    /// Returns `Ok(None)` when the asset does not apply; the inner getter is
    /// not consulted in that case or when the filters fail to evaluate.
    pub async fn get_for_entity(
        &self,
        spec: &AssetSpec,
        entity: &Value,
        cancel: &CancellationToken,
    ) -> Result<Option<RuntimeAsset>> {
        if !is_applicable(self.evaluator.as_ref(), spec, entity)? {
            return Ok(None);
        }
        self.inner.get(spec, cancel).await
    }
}

#[async_trait]
impl Getter for FilteredGetter {
    async fn get(
        &self,
        spec: &AssetSpec,
        cancel: &CancellationToken,
    ) -> Result<Option<RuntimeAsset>> {
        self.get_for_entity(spec, &self.entity, cancel).await
    }
}
