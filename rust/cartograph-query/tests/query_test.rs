use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use cartograph_query::graph::{Element, Relationship};
use cartograph_query::helpers::StubInvoker;
use cartograph_query::{
    EngineConfig, EngineResult, InvocationConstraints, QueryContext, QueryEngine, QueryError,
    QueryStrategy, QuerySpecTypeNode, StrategyResult,
};
use cartograph_schema::{
    DataSource, OperationDefinition, Schema, ServiceDefinition, TypeDefinition, TypedInstance,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn schema() -> anyhow::Result<Arc<Schema>> {
    Ok(Arc::new(
        Schema::builder()
            .scalar("CustomerId")
            .scalar("Email")
            .scalar("Name")
            .scalar("AccountId")
            .scalar("Balance")
            .type_definition(
                TypeDefinition::new("Customer")
                    .attribute("id", "CustomerId")
                    .attribute("email", "Email")
                    .attribute("name", "Name")
                    .attribute("accountId", "AccountId"),
            )
            .service(
                ServiceDefinition::new("CustomerService")
                    .operation(
                        OperationDefinition::new("getCustomerById")
                            .parameter("CustomerId")
                            .returns("Customer"),
                    )
                    .operation(OperationDefinition::new("currentCustomer").returns("Customer")),
            )
            .service(
                ServiceDefinition::new("AccountService").operation(
                    OperationDefinition::new("getBalance")
                        .parameter("AccountId")
                        .returns("Balance"),
                ),
            )
            .build()?,
    ))
}

fn customer_document() -> serde_json::Value {
    json!({
        "id": 1,
        "email": "ada@acme.io",
        "name": "Ada",
        "accountId": "A-1",
    })
}

fn engine(
    schema: &Arc<Schema>,
    config: EngineConfig,
) -> anyhow::Result<(Arc<QueryEngine>, StubInvoker)> {
    let stub = StubInvoker::new(schema.clone());
    stub.add_response("getCustomerById", customer_document());
    let engine = QueryEngine::builder(schema.clone())
        .invoker(Arc::new(stub.clone()))
        .config(config)
        .build()?;
    Ok((engine, stub))
}

fn fact(schema: &Schema, type_name: &str, value: serde_json::Value) -> anyhow::Result<TypedInstance> {
    Ok(TypedInstance::from_json(
        schema.type_by_name(type_name)?,
        &value,
        schema,
        DataSource::Provided,
    )?)
}

fn target(schema: &Schema, type_name: &str) -> anyhow::Result<QuerySpecTypeNode> {
    Ok(QuerySpecTypeNode::discover(schema.type_by_name(type_name)?))
}

#[test_log::test(tokio::test)]
async fn it_discovers_an_attribute_through_an_operation() -> anyhow::Result<()> {
    let schema = schema()?;
    let (engine, stub) = engine(&schema, EngineConfig::default())?;
    let context = engine.query_context(vec![fact(&schema, "CustomerId", json!(1))?]);
    let email = target(&schema, "Email")?;

    let result = context.find(vec![email.clone()]).await?;

    let value = result.get(&email).expect("email should resolve");
    assert_eq!(value.to_raw(), json!("ada@acme.io"));
    assert!(result.unmatched_nodes().is_empty());
    assert_eq!(stub.invocation_count("getCustomerById"), 1);
    assert_eq!(
        result.path().map(|path| path.description()),
        Some("CustomerId -[CAN_POPULATE]-> Customer -[HAS_ATTRIBUTE]-> Email".to_string())
    );
    Ok(())
}

#[tokio::test]
async fn it_reports_unreachable_targets_as_unmatched() -> anyhow::Result<()> {
    let schema = schema()?;
    let (engine, _) = engine(&schema, EngineConfig::default())?;
    let context = engine.query_context(Vec::new());
    let balance = target(&schema, "Balance")?;

    let result = context.find(vec![balance.clone()]).await?;

    assert_eq!(result.unmatched_nodes(), &[balance.clone()]);
    assert!(result.get(&balance).is_none());
    assert!(result.path().is_none());
    Ok(())
}

#[test_log::test(tokio::test(start_paused = true))]
async fn it_fails_the_search_when_a_remote_call_times_out() -> anyhow::Result<()> {
    let schema = schema()?;
    let config = EngineConfig {
        invocation_timeout_ms: Some(50),
        ..EngineConfig::default()
    };
    let (engine, stub) = engine(&schema, config)?;
    stub.add_response("getBalance", json!(100))
        .add_delay("getBalance", Duration::from_millis(200));
    let context = engine.query_context(vec![fact(&schema, "Customer", customer_document())?]);

    let outcome = context.find(vec![target(&schema, "Balance")?]).await;

    let evaluated_path = match outcome {
        Err(QueryError::SearchFailed { evaluated_path, .. }) => evaluated_path,
        other => panic!("expected a failed search, got {other:?}"),
    };
    let relationships = evaluated_path
        .iter()
        .map(|edge| edge.link().relationship)
        .collect::<Vec<_>>();
    assert_eq!(
        relationships,
        vec![Relationship::IsTypeOf, Relationship::HasAttribute]
    );
    assert_eq!(
        evaluated_path[1].value().map(TypedInstance::to_raw),
        Some(json!("A-1"))
    );
    assert!(evaluated_path.iter().all(|edge| edge.is_success()));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn it_serializes_search_failures() -> anyhow::Result<()> {
    let schema = schema()?;
    let (engine, stub) = engine(&schema, EngineConfig::default())?;
    stub.add_failure("getBalance", "ledger offline");
    let context = engine.query_context(vec![fact(&schema, "Customer", customer_document())?]);

    let error = context
        .find(vec![target(&schema, "Balance")?])
        .await
        .expect_err("the balance call fails");
    let failure = serde_json::to_value(error.failure())?;

    assert_eq!(failure["kind"], json!("searchFailed"));
    assert!(
        failure["message"]
            .as_str()
            .is_some_and(|message| message.contains("ledger offline"))
    );
    assert_eq!(failure["path"].as_array().map(Vec::len), Some(2));
    assert!(failure["profiler"].is_object());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn it_stops_when_the_query_is_cancelled() -> anyhow::Result<()> {
    let schema = schema()?;
    let (engine, stub) = engine(&schema, EngineConfig::default())?;
    stub.add_delay("getCustomerById", Duration::from_secs(10));
    let token = CancellationToken::new();
    let context = engine.query_context_with_cancellation(
        vec![fact(&schema, "CustomerId", json!(1))?],
        token.clone(),
    );
    let email = target(&schema, "Email")?;

    let (outcome, _) = tokio::join!(context.find(vec![email]), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    assert!(matches!(outcome, Err(QueryError::QueryCancelled)));
    assert!(context.profiler().is_balanced());
    Ok(())
}

#[tokio::test]
async fn it_refuses_to_start_a_cancelled_query() -> anyhow::Result<()> {
    let schema = schema()?;
    let (engine, stub) = engine(&schema, EngineConfig::default())?;
    let context = engine.query_context(vec![fact(&schema, "CustomerId", json!(1))?]);
    context.cancel();

    let outcome = context.find(vec![target(&schema, "Email")?]).await;

    assert!(matches!(outcome, Err(QueryError::QueryCancelled)));
    assert_eq!(stub.invocation_count("getCustomerById"), 0);
    Ok(())
}

#[tokio::test]
async fn it_uses_an_existing_fact_without_searching() -> anyhow::Result<()> {
    let schema = schema()?;
    let (engine, stub) = engine(&schema, EngineConfig::default())?;
    let email = fact(&schema, "Email", json!("grace@acme.io"))?;
    let context = engine.query_context(vec![email.clone()]);
    let node = target(&schema, "Email")?;

    let result = context.find(vec![node.clone()]).await?;

    assert!(result.get(&node).is_some_and(|value| value.ptr_eq(&email)));
    assert_eq!(engine.graph_builder().build_count(), 0);
    assert_eq!(stub.invocation_count("getCustomerById"), 0);
    Ok(())
}

#[tokio::test]
async fn it_resolves_the_same_query_the_same_way() -> anyhow::Result<()> {
    let schema = schema()?;
    let (engine, _) = engine(&schema, EngineConfig::default())?;
    let node = target(&schema, "Email")?;

    let mut outcomes = Vec::new();
    for _ in 0..2 {
        let context = engine.query_context(vec![fact(&schema, "CustomerId", json!(1))?]);
        let result = context.find(vec![node.clone()]).await?;
        outcomes.push((result.get(&node).cloned(), result.path().cloned()));
    }

    assert_eq!(outcomes[0], outcomes[1]);
    assert_eq!(engine.graph_builder().schema_build_count(), 1);
    Ok(())
}

#[tokio::test]
async fn it_assembles_a_path_matching_the_evaluated_edges() -> anyhow::Result<()> {
    let schema = schema()?;
    let (engine, _) = engine(&schema, EngineConfig::default())?;
    let customer_id = fact(&schema, "CustomerId", json!(1))?;
    let context = engine.query_context(vec![customer_id.clone()]);

    let result = context.find(vec![target(&schema, "Email")?]).await?;
    let path = result.path().expect("a path is reported");

    assert_eq!(path.links.len(), context.evaluated_edges().len());
    assert_eq!(path.links[0].start, Element::of_type(customer_id.ty()));
    assert_eq!(path.cost(), 4);
    Ok(())
}

#[tokio::test]
async fn it_ignores_repeated_facts() -> anyhow::Result<()> {
    let schema = schema()?;
    let (engine, _) = engine(&schema, EngineConfig::default())?;
    let customer_id = fact(&schema, "CustomerId", json!(1))?;
    let context = engine.query_context(vec![customer_id.clone()]);

    assert!(!context.add_fact(customer_id.clone()));
    assert_eq!(context.facts().len(), 1);

    let result = context.find(vec![target(&schema, "Email")?]).await?;
    assert!(result.is_fully_resolved());
    Ok(())
}

#[tokio::test]
async fn it_stops_every_profiler_operation() -> anyhow::Result<()> {
    let schema = schema()?;
    let (engine, _) = engine(&schema, EngineConfig::default())?;
    let context = engine.query_context(vec![fact(&schema, "CustomerId", json!(1))?]);

    let result = context.find(vec![target(&schema, "Email")?]).await?;

    assert!(context.profiler().is_balanced());
    assert!(result.profiler().is_stopped());
    assert_eq!(result.remote_calls().len(), 1);
    assert_eq!(
        result.remote_calls()[0].operation.to_string(),
        "CustomerService@@getCustomerById"
    );
    Ok(())
}

#[tokio::test]
async fn it_calls_operations_that_need_no_input() -> anyhow::Result<()> {
    let schema = schema()?;
    let (engine, stub) = engine(&schema, EngineConfig::default())?;
    stub.add_response("currentCustomer", customer_document());
    let context = engine.query_context(Vec::new());
    let customer = target(&schema, "Customer")?;

    let result = context.find(vec![customer.clone()]).await?;

    assert_eq!(
        result.get(&customer).map(TypedInstance::to_raw),
        Some(customer_document())
    );
    assert_eq!(stub.invocation_count("currentCustomer"), 1);
    assert!(context.has_fact_of_type(customer.ty()));
    Ok(())
}

#[derive(Debug)]
struct FixedBalance;

#[async_trait::async_trait]
impl QueryStrategy for FixedBalance {
    fn name(&self) -> &str {
        "fixedBalance"
    }

    async fn invoke(
        &self,
        targets: &[QuerySpecTypeNode],
        context: &QueryContext,
        constraints: &InvocationConstraints,
    ) -> EngineResult<StrategyResult> {
        let mut result = StrategyResult::empty();
        for target in constraints.unresolved(targets) {
            if target.ty().fqn() == "Balance" {
                let balance = TypedInstance::scalar(
                    context.schema().type_by_name("Balance")?,
                    0,
                    DataSource::derived("fixed"),
                );
                result.matched.insert(target.clone(), balance);
            }
        }
        Ok(result)
    }
}

#[tokio::test]
async fn it_falls_back_to_custom_strategies() -> anyhow::Result<()> {
    let schema = schema()?;
    let engine = QueryEngine::builder(schema.clone())
        .strategy(Arc::new(FixedBalance))
        .build()?;
    let context = engine.query_context(Vec::new());

    let result = engine.find_type("Balance", &context).await?;

    assert_eq!(
        result.get_type("Balance").map(TypedInstance::to_raw),
        Some(json!(0))
    );
    assert!(result.is_fully_resolved());
    Ok(())
}

#[tokio::test]
async fn it_skips_facts_whose_owner_is_not_held() -> anyhow::Result<()> {
    let schema = schema()?;
    let (engine, stub) = engine(&schema, EngineConfig::default())?;
    let context = engine.query_context(vec![
        fact(&schema, "Email", json!("other@acme.io"))?,
        fact(&schema, "CustomerId", json!(1))?,
    ]);

    let result = engine.find_type("Name", &context).await?;

    assert_eq!(
        result.get_type("Name").map(TypedInstance::to_raw),
        Some(json!("Ada"))
    );
    assert_eq!(
        result.path().map(|path| path.description()),
        Some("CustomerId -[CAN_POPULATE]-> Customer -[HAS_ATTRIBUTE]-> Name".to_string())
    );
    assert_eq!(stub.invocation_count("getCustomerById"), 1);
    Ok(())
}

#[tokio::test]
async fn it_looks_up_the_held_owner_of_a_value() -> anyhow::Result<()> {
    let schema = schema()?;
    let (engine, stub) = engine(&schema, EngineConfig::default())?;
    stub.add_response("getBalance", json!(100));
    let context = engine.query_context(vec![
        fact(&schema, "Email", json!("ada@acme.io"))?,
        fact(&schema, "Customer", customer_document())?,
    ]);

    let result = engine.find_type("Balance", &context).await?;

    assert_eq!(
        result.get_type("Balance").map(TypedInstance::to_raw),
        Some(json!(100))
    );
    assert_eq!(
        result.path().map(|path| path.description()),
        Some(
            "Email -[ATTRIBUTE_OF]-> Customer -[HAS_ATTRIBUTE]-> AccountId \
             -[CAN_POPULATE]-> Balance"
                .to_string()
        )
    );
    assert_eq!(stub.invocations("getBalance")[0][0].to_raw(), json!("A-1"));
    Ok(())
}

#[tokio::test]
async fn it_does_not_read_attributes_of_closed_types() -> anyhow::Result<()> {
    let schema = Arc::new(
        Schema::builder()
            .scalar("CustomerId")
            .scalar("Email")
            .type_definition(
                TypeDefinition::new("Customer")
                    .attribute("id", "CustomerId")
                    .attribute("email", "Email")
                    .closed(),
            )
            .service(
                ServiceDefinition::new("CustomerService").operation(
                    OperationDefinition::new("getCustomerById")
                        .parameter("CustomerId")
                        .returns("Customer"),
                ),
            )
            .build()?,
    );
    let (engine, stub) = engine(&schema, EngineConfig::default())?;
    let context = engine.query_context(vec![fact(&schema, "CustomerId", json!(1))?]);
    let email = target(&schema, "Email")?;

    let result = context.find(vec![email.clone()]).await?;

    assert_eq!(result.unmatched_nodes(), &[email]);
    assert!(result.path().is_none());
    assert_eq!(stub.invocation_count("getCustomerById"), 0);
    Ok(())
}

#[tokio::test]
async fn it_tries_later_facts_against_the_facts_a_walk_added() -> anyhow::Result<()> {
    let schema = schema()?;
    let (engine, stub) = engine(&schema, EngineConfig::default())?;
    let balance_type = schema.type_by_name("Balance")?;
    let calls = AtomicUsize::new(0);
    stub.add_handler("getBalance", move |_| {
        let balance = if calls.fetch_add(1, Ordering::SeqCst) == 0 {
            TypedInstance::null(balance_type.clone(), DataSource::Undefined)
        } else {
            TypedInstance::scalar(balance_type.clone(), 100, DataSource::Undefined)
        };
        Ok(vec![balance])
    });
    let context = engine.query_context(vec![
        fact(&schema, "CustomerId", json!(1))?,
        fact(&schema, "Email", json!("ada@acme.io"))?,
    ]);

    let result = engine.find_type("Balance", &context).await?;

    assert_eq!(
        result.get_type("Balance").map(TypedInstance::to_raw),
        Some(json!(100))
    );
    let email = Element::of_type(&*schema.type_by_name("Email")?);
    assert!(result.path().is_some_and(|path| path.start == email));
    assert_eq!(stub.invocation_count("getCustomerById"), 1);
    assert_eq!(stub.invocation_count("getBalance"), 2);
    assert_eq!(engine.graph_builder().build_count(), 2);
    Ok(())
}

#[derive(Debug)]
struct Exploding;

#[async_trait::async_trait]
impl QueryStrategy for Exploding {
    fn name(&self) -> &str {
        "exploding"
    }

    async fn invoke(
        &self,
        _targets: &[QuerySpecTypeNode],
        _context: &QueryContext,
        _constraints: &InvocationConstraints,
    ) -> EngineResult<StrategyResult> {
        panic!("strategy exploded")
    }
}

#[derive(Debug)]
struct Confused;

#[async_trait::async_trait]
impl QueryStrategy for Confused {
    fn name(&self) -> &str {
        "confused"
    }

    async fn invoke(
        &self,
        _targets: &[QuerySpecTypeNode],
        _context: &QueryContext,
        _constraints: &InvocationConstraints,
    ) -> EngineResult<StrategyResult> {
        Err(QueryError::Inconsistent {
            message: "lost track of a fact".into(),
        })
    }
}

#[tokio::test]
async fn it_reports_a_panicking_strategy_as_a_runtime_failure() -> anyhow::Result<()> {
    let schema = schema()?;
    let engine = QueryEngine::builder(schema.clone())
        .strategy(Arc::new(Exploding))
        .build()?;
    let context = engine.query_context(Vec::new());

    let outcome = engine.find_type("Balance", &context).await;

    match outcome {
        Err(QueryError::SearchRuntime {
            message,
            profiler: Some(_),
        }) => assert_eq!(message, "strategy exploded"),
        other => panic!("expected a runtime failure, got {other:?}"),
    }
    assert!(context.profiler().is_balanced());
    Ok(())
}

#[tokio::test]
async fn it_reports_strategy_errors_as_runtime_failures() -> anyhow::Result<()> {
    let schema = schema()?;
    let engine = QueryEngine::builder(schema.clone())
        .strategy(Arc::new(Confused))
        .build()?;
    let context = engine.query_context(Vec::new());

    let error = engine
        .find_type("Balance", &context)
        .await
        .expect_err("the strategy fails");

    assert_eq!(error.kind(), "searchRuntime");
    assert!(error.to_string().contains("lost track of a fact"));
    assert!(error.profiler().is_some());
    Ok(())
}
