//! Remote operation invocation

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use cartograph_common::time::Instant;
use cartograph_common::{ConditionalSend, ConditionalSync};
use cartograph_schema::{
    DataSource, InstanceValue, Operation, OperationInput, Parameter, RemoteCallRef, Service,
    TypedInstance,
};
use futures_core::Stream;
use futures_util::TryStreamExt;
use serde_json::json;
use ulid::Ulid;

use crate::context::QueryContext;
use crate::edge::ParameterFactory;
use crate::error::{EngineResult, InvocationError, QueryError};
use crate::profiler::{OperationType, RemoteCall, RemoteCallOutcome};

/// The values produced by one remote call
pub trait InstanceStream:
    Stream<Item = Result<TypedInstance, InvocationError>> + ConditionalSend
{
}

impl<S> InstanceStream for S where
    S: Stream<Item = Result<TypedInstance, InvocationError>> + ConditionalSend + 'static
{
}

/// A boxed [InstanceStream]
pub type BoxedInstanceStream = Pin<Box<dyn InstanceStream>>;

/// Executes remote calls for the operations it supports (HTTP, SQL,
/// queues...). Implementations live outside the engine.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait OperationInvoker: ConditionalSend + ConditionalSync {
    /// True if this invoker can call `operation`
    fn can_support(&self, service: &Service, operation: &Operation) -> bool;

    /// Calls `operation` with `parameters`, in declaration order. The stream
    /// may be empty, yield a single value or many.
    async fn invoke(
        &self,
        service: &Service,
        operation: &Operation,
        parameters: Vec<(Parameter, TypedInstance)>,
    ) -> Result<BoxedInstanceStream, InvocationError>;
}

/// Routes remote calls to invokers, bounding them by the configured timeout
/// and the query's cancellation token, and records each one on the profiler.
#[derive(Clone)]
pub struct OperationInvocationService {
    invokers: Vec<Arc<dyn OperationInvoker>>,
    timeout: Option<std::time::Duration>,
}

impl std::fmt::Debug for OperationInvocationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationInvocationService")
            .field("invokers", &self.invokers.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl OperationInvocationService {
    /// A service that tries `invokers` in order
    pub fn new(
        invokers: Vec<Arc<dyn OperationInvoker>>,
        timeout: Option<std::time::Duration>,
    ) -> Self {
        Self { invokers, timeout }
    }

    /// Gathers the parameters `operation` needs (preferring values from
    /// `preferred`) and invokes it
    pub async fn invoke_operation(
        &self,
        service: &Arc<Service>,
        operation: &Arc<Operation>,
        context: &QueryContext,
        preferred: &[TypedInstance],
    ) -> EngineResult<TypedInstance> {
        let factory = ParameterFactory::new(context);
        let mut parameters = Vec::with_capacity(operation.parameters().len());
        for parameter in operation.parameters() {
            let candidate = preferred
                .iter()
                .find(|value| value.ty().is_assignable_to(parameter.ty()));
            let value = factory
                .discover(parameter.ty(), candidate, operation)
                .await?;
            parameters.push((parameter.clone(), value));
        }
        self.invoke(service, operation, parameters, context).await
    }

    /// Invokes `operation` with ready parameters
    pub async fn invoke(
        &self,
        service: &Arc<Service>,
        operation: &Arc<Operation>,
        parameters: Vec<(Parameter, TypedInstance)>,
        context: &QueryContext,
    ) -> EngineResult<TypedInstance> {
        let reference = operation.reference();
        if context.is_cancelled() {
            return Err(QueryError::QueryCancelled);
        }
        let invoker = self
            .invokers
            .iter()
            .find(|invoker| invoker.can_support(service, operation))
            .ok_or_else(|| InvocationError::NoInvoker {
                operation: reference.clone(),
            })?;

        let inputs = parameters
            .iter()
            .map(|(parameter, value)| OperationInput {
                type_name: parameter.ty().fqn().to_string(),
                parameter: parameter.name().map(str::to_string),
                value: value.to_raw(),
            })
            .collect::<Vec<_>>();
        let remote_call = RemoteCallRef {
            id: Ulid::new().to_string(),
            operation: reference.clone(),
        };

        let scope = context.start_child(
            service.name(),
            operation.name(),
            OperationType::RemoteCall,
        );
        scope.operation().add_context("remoteCallId", remote_call.id.clone());
        scope.operation().add_context(
            "inputs",
            serde_json::Value::Array(inputs.iter().map(|input| input.value.clone()).collect()),
        );

        let started = Instant::now();
        let call = async {
            let stream = invoker.invoke(service, operation, parameters).await?;
            stream.try_collect::<Vec<_>>().await
        };
        let bounded = async {
            match self.timeout {
                Some(timeout) => tokio::time::timeout(timeout, call).await.map_err(|_| {
                    InvocationError::Timeout {
                        operation: reference.clone(),
                        timeout_ms: timeout.as_millis() as u64,
                    }
                })?,
                None => call.await,
            }
        };
        let outcome = tokio::select! {
            _ = context.cancellation_token().cancelled() => Err(InvocationError::Cancelled {
                operation: reference.clone(),
            }),
            outcome = bounded => outcome,
        };

        let recorded = match &outcome {
            Ok(values) => RemoteCallOutcome::Success {
                values: values.len(),
            },
            Err(InvocationError::Timeout { .. }) => RemoteCallOutcome::TimedOut,
            Err(InvocationError::Cancelled { .. }) => RemoteCallOutcome::Cancelled,
            Err(error) => RemoteCallOutcome::Failed {
                message: error.to_string(),
            },
        };
        scope.operation().add_remote_call(RemoteCall {
            id: remote_call.id.clone(),
            operation: reference.clone(),
            inputs: inputs.clone(),
            response_type: operation.return_type().fqn().to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
            outcome: recorded,
        });

        let values = match outcome {
            Ok(values) => values,
            Err(InvocationError::Cancelled { .. }) => {
                scope.stop(Some(json!({ "cancelled": true })));
                return Err(QueryError::QueryCancelled);
            }
            Err(error) => {
                tracing::warn!(operation = %reference, %error, "Remote call failed");
                scope.stop(Some(json!({ "error": error.to_string() })));
                return Err(error.into());
            }
        };

        let source = DataSource::OperationResult {
            remote_call,
            inputs,
        };
        let result = collapse(operation, values, source).ok_or_else(|| {
            InvocationError::NoResult {
                operation: reference.clone(),
            }
        });
        scope.stop(Some(match &result {
            Ok(value) => value.to_raw(),
            Err(error) => json!({ "error": error.to_string() }),
        }));
        Ok(result?)
    }
}

/// Turns the values a call produced into one fact: nothing is a failure, one
/// value is returned as is, several become a collection of the operation's
/// member type. Every value is stamped with the call's provenance.
fn collapse(
    operation: &Operation,
    values: Vec<TypedInstance>,
    source: DataSource,
) -> Option<TypedInstance> {
    let mut values = values
        .into_iter()
        .map(|value| stamp(value, &source))
        .collect::<Vec<_>>();
    match values.len() {
        0 => None,
        1 => values.pop(),
        _ => {
            let member_type = operation
                .return_type()
                .collection_type()
                .cloned()
                .unwrap_or_else(|| operation.return_type().clone());
            Some(TypedInstance::collection(member_type, values, source))
        }
    }
}

fn stamp(value: TypedInstance, source: &DataSource) -> TypedInstance {
    let value = match value.value() {
        InstanceValue::Collection(members) => TypedInstance::new(
            value.ty().clone(),
            InstanceValue::Collection(
                members
                    .iter()
                    .map(|member| member.with_source(source.clone()))
                    .collect(),
            ),
            source.clone(),
        ),
        _ => value,
    };
    if value.source() == source {
        value
    } else {
        value.with_source(source.clone())
    }
}
