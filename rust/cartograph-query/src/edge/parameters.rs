use std::sync::Arc;

use cartograph_schema::{DataSource, Operation, Type, TypedInstance};
use indexmap::IndexMap;

use crate::context::QueryContext;
use crate::discovery::FactDiscoveryStrategy;
use crate::error::{EngineResult, QueryError};
use crate::target::QuerySpecTypeNode;

/// Finds or builds the inputs an operation needs.
///
/// A parameter is taken, in order, from: the value the caller prefers, a
/// top-level fact, a single distinct fact anywhere in the fact tree, an
/// object constructed from its attributes (for parameter types only), and
/// finally a nested query that is not allowed to use the operation itself.
#[derive(Debug, Clone, Copy)]
pub struct ParameterFactory<'a> {
    context: &'a QueryContext,
}

impl<'a> ParameterFactory<'a> {
    /// A factory drawing on `context`
    pub fn new(context: &'a QueryContext) -> Self {
        Self { context }
    }

    /// Produces a value of type `ty` for `operation`
    pub async fn discover(
        &self,
        ty: &Arc<Type>,
        preferred: Option<&TypedInstance>,
        operation: &Operation,
    ) -> EngineResult<TypedInstance> {
        if let Some(preferred) = preferred.filter(|value| value.ty().is_assignable_to(ty)) {
            return Ok(preferred.clone());
        }
        if let Some(fact) = self.existing_fact(ty) {
            return Ok(fact);
        }
        if ty.is_parameter_type() {
            if let Some(constructed) = self.construct(ty, operation).await? {
                return Ok(constructed);
            }
        }
        if let Some(found) = self.nested_find(ty, operation).await? {
            return Ok(found);
        }

        Err(QueryError::UnresolvedOperationParameters {
            operation: operation.reference(),
            parameters: vec![ty.fqn().to_string()],
        })
    }

    fn existing_fact(&self, ty: &Arc<Type>) -> Option<TypedInstance> {
        self.context
            .find_fact(ty, FactDiscoveryStrategy::TopLevelOnly)
            .or_else(|| {
                self.context
                    .find_fact(ty, FactDiscoveryStrategy::AnyDepthExpectOneDistinct)
            })
    }

    async fn construct(
        &self,
        ty: &Arc<Type>,
        operation: &Operation,
    ) -> EngineResult<Option<TypedInstance>> {
        let mut attributes = IndexMap::new();
        for (name, field) in ty.attributes() {
            let field_type = self.context.schema().resolve(field.type_name())?;
            let value = match self.existing_fact(&field_type) {
                Some(value) => value,
                None => match self.nested_find(&field_type, operation).await? {
                    Some(value) => value,
                    None => {
                        tracing::debug!(
                            parameter = %ty,
                            attribute = %name,
                            "Cannot construct parameter object"
                        );
                        return Ok(None);
                    }
                },
            };
            attributes.insert(name.clone(), value);
        }

        let constructed = TypedInstance::object(
            ty.clone(),
            attributes,
            DataSource::derived(format!("Constructed {} for {}", ty, operation.reference())),
        );
        self.context.add_fact(constructed.clone());
        Ok(Some(constructed))
    }

    async fn nested_find(
        &self,
        ty: &Arc<Type>,
        operation: &Operation,
    ) -> EngineResult<Option<TypedInstance>> {
        let node = QuerySpecTypeNode::discover(ty.clone());
        let nested = self
            .context
            .excluding([operation.reference()])
            .nested();

        match nested.find(vec![node.clone()]).await {
            Ok(result) => Ok(result.get(&node).cloned()),
            Err(QueryError::QueryCancelled) => Err(QueryError::QueryCancelled),
            Err(error) => {
                tracing::debug!(
                    parameter = %ty,
                    operation = %operation.reference(),
                    %error,
                    "Nested parameter search failed"
                );
                Ok(None)
            }
        }
    }
}
