//! A scripted [OperationInvoker] for tests and local experimentation

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cartograph_schema::{DataSource, Operation, Parameter, Schema, Service, TypedInstance};
use parking_lot::Mutex;

use crate::error::InvocationError;
use crate::invocation::{BoxedInstanceStream, OperationInvoker};

/// Computes a response from the parameters a stubbed operation received
pub type StubHandler = Arc<
    dyn Fn(&[(Parameter, TypedInstance)]) -> Result<Vec<TypedInstance>, InvocationError>
        + Send
        + Sync,
>;

#[derive(Clone)]
enum StubResponse {
    Json(serde_json::Value),
    Values(Vec<TypedInstance>),
    Handler(StubHandler),
    Failure(String),
}

#[derive(Default)]
struct StubState {
    responses: HashMap<String, StubResponse>,
    delays: HashMap<String, Duration>,
    invocations: Vec<(String, Vec<TypedInstance>)>,
}

/// Answers operations by name with canned responses and records every call.
///
/// ```
/// # use std::sync::Arc;
/// # use cartograph_schema::Schema;
/// # use cartograph_query::helpers::StubInvoker;
/// let schema = Arc::new(Schema::builder().build().unwrap());
/// let stub = StubInvoker::new(schema);
/// stub.add_response("getCustomerById", serde_json::json!({ "email": "ada@acme.io" }));
/// assert_eq!(stub.invocation_count("getCustomerById"), 0);
/// ```
#[derive(Clone)]
pub struct StubInvoker {
    schema: Arc<Schema>,
    state: Arc<Mutex<StubState>>,
}

impl std::fmt::Debug for StubInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("StubInvoker")
            .field("operations", &state.responses.keys().collect::<Vec<_>>())
            .field("invocations", &state.invocations.len())
            .finish()
    }
}

impl StubInvoker {
    /// A stub converting JSON responses against `schema`
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            state: Arc::new(Mutex::new(StubState::default())),
        }
    }

    fn respond(&self, operation: &str, response: StubResponse) -> &Self {
        self.state
            .lock()
            .responses
            .insert(operation.to_string(), response);
        self
    }

    /// Answers `operation` with `document`, typed as the operation's return
    /// type
    pub fn add_response(&self, operation: &str, document: serde_json::Value) -> &Self {
        self.respond(operation, StubResponse::Json(document))
    }

    /// Answers `operation` with a stream of ready values
    pub fn add_values(&self, operation: &str, values: Vec<TypedInstance>) -> &Self {
        self.respond(operation, StubResponse::Values(values))
    }

    /// Answers `operation` by calling `handler`
    pub fn add_handler<F>(&self, operation: &str, handler: F) -> &Self
    where
        F: Fn(&[(Parameter, TypedInstance)]) -> Result<Vec<TypedInstance>, InvocationError>
            + Send
            + Sync
            + 'static,
    {
        self.respond(operation, StubResponse::Handler(Arc::new(handler)))
    }

    /// Makes `operation` fail with `message`
    pub fn add_failure(&self, operation: &str, message: &str) -> &Self {
        self.respond(operation, StubResponse::Failure(message.to_string()))
    }

    /// Delays every response of `operation`
    pub fn add_delay(&self, operation: &str, delay: Duration) -> &Self {
        self.state
            .lock()
            .delays
            .insert(operation.to_string(), delay);
        self
    }

    /// The parameter values of every call to `operation`, in call order
    pub fn invocations(&self, operation: &str) -> Vec<Vec<TypedInstance>> {
        self.state
            .lock()
            .invocations
            .iter()
            .filter(|(name, _)| name == operation)
            .map(|(_, parameters)| parameters.clone())
            .collect()
    }

    /// How often `operation` was called
    pub fn invocation_count(&self, operation: &str) -> usize {
        self.invocations(operation).len()
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl OperationInvoker for StubInvoker {
    fn can_support(&self, _service: &Service, operation: &Operation) -> bool {
        self.state.lock().responses.contains_key(operation.name())
    }

    async fn invoke(
        &self,
        _service: &Service,
        operation: &Operation,
        parameters: Vec<(Parameter, TypedInstance)>,
    ) -> Result<BoxedInstanceStream, InvocationError> {
        let (response, delay) = {
            let mut state = self.state.lock();
            state.invocations.push((
                operation.name().to_string(),
                parameters.iter().map(|(_, value)| value.clone()).collect(),
            ));
            (
                state.responses.get(operation.name()).cloned(),
                state.delays.get(operation.name()).copied(),
            )
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failed = |message: String| InvocationError::Failed {
            operation: operation.reference(),
            message,
        };
        let values = match response {
            Some(StubResponse::Json(document)) => vec![
                TypedInstance::from_json(
                    operation.return_type().clone(),
                    &document,
                    &self.schema,
                    DataSource::Undefined,
                )
                .map_err(|error| failed(error.to_string()))?,
            ],
            Some(StubResponse::Values(values)) => values,
            Some(StubResponse::Handler(handler)) => handler(&parameters)?,
            Some(StubResponse::Failure(message)) => return Err(failed(message)),
            None => return Err(failed("no stubbed response".into())),
        };

        Ok(Box::pin(futures_util::stream::iter(
            values.into_iter().map(Ok::<_, InvocationError>),
        )))
    }
}
