use std::sync::Arc;

use cartograph_query::helpers::StubInvoker;
use cartograph_query::{EngineConfig, QueryEngine, QuerySpecTypeNode};
use cartograph_schema::{
    DataSource, OperationDefinition, Schema, ServiceDefinition, TypeDefinition, TypedInstance,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn schema() -> anyhow::Result<Arc<Schema>> {
    Ok(Arc::new(
        Schema::builder()
            .scalar("OrderId")
            .scalar("CustomerId")
            .type_definition(TypeDefinition::new("Order").attribute("id", "OrderId"))
            .service(
                ServiceDefinition::new("OrderService")
                    .operation(OperationDefinition::new("recentOrder").returns("Order"))
                    .operation(OperationDefinition::new("archivedOrder").returns("Order"))
                    .operation(OperationDefinition::new("pendingOrder").returns("Order"))
                    .operation(
                        OperationDefinition::new("ordersForCustomer")
                            .parameter("CustomerId")
                            .returns("Order[]"),
                    ),
            )
            .build()?,
    ))
}

fn order_ids(value: &TypedInstance) -> Vec<serde_json::Value> {
    value
        .members()
        .iter()
        .filter_map(|order| order.attribute("id").map(TypedInstance::to_raw))
        .collect()
}

#[test_log::test(tokio::test)]
async fn it_collects_values_from_every_successful_operation() -> anyhow::Result<()> {
    let schema = schema()?;
    let stub = StubInvoker::new(schema.clone());
    stub.add_response("recentOrder", json!({ "id": "o-1" }))
        .add_failure("archivedOrder", "archive unavailable")
        .add_response("pendingOrder", json!({ "id": "o-2" }));
    let engine = QueryEngine::builder(schema.clone())
        .invoker(Arc::new(stub.clone()))
        .build()?;
    let context = engine.query_context(Vec::new());
    let orders = QuerySpecTypeNode::gather(schema.type_by_name("Order")?);

    let result = context.find(vec![orders.clone()]).await?;

    let value = result.get(&orders).expect("orders are gathered");
    assert!(value.ty().is_collection());
    assert_eq!(order_ids(value), vec![json!("o-1"), json!("o-2")]);
    assert_eq!(stub.invocation_count("archivedOrder"), 1);
    assert!(result.path().is_none());
    assert!(context.profiler().is_balanced());
    Ok(())
}

#[tokio::test]
async fn it_gathers_through_operations_that_need_inputs() -> anyhow::Result<()> {
    let schema = schema()?;
    let stub = StubInvoker::new(schema.clone());
    stub.add_response("recentOrder", json!({ "id": "o-1" }))
        .add_response("ordersForCustomer", json!([{ "id": "o-7" }, { "id": "o-8" }]));
    let engine = QueryEngine::builder(schema.clone())
        .invoker(Arc::new(stub.clone()))
        .config(EngineConfig {
            gather_concurrency: 1,
            ..EngineConfig::default()
        })
        .build()?;
    let context = engine.query_context(vec![TypedInstance::scalar(
        schema.type_by_name("CustomerId")?,
        42,
        DataSource::Provided,
    )]);

    let result = engine.gather_type("Order", &context).await?;

    let value = result.get_type("Order").expect("orders are gathered");
    assert_eq!(
        order_ids(value),
        vec![json!("o-1"), json!("o-7"), json!("o-8")]
    );
    assert_eq!(stub.invocations("ordersForCustomer")[0][0].to_raw(), json!(42));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn it_keeps_other_results_when_a_searched_candidate_fails() -> anyhow::Result<()> {
    let schema = schema()?;
    let stub = StubInvoker::new(schema.clone());
    stub.add_response("recentOrder", json!({ "id": "o-1" }))
        .add_failure("ordersForCustomer", "orders unavailable");
    let engine = QueryEngine::builder(schema.clone())
        .invoker(Arc::new(stub.clone()))
        .build()?;
    let context = engine.query_context(vec![TypedInstance::scalar(
        schema.type_by_name("CustomerId")?,
        42,
        DataSource::Provided,
    )]);

    let result = engine.gather_type("Order", &context).await?;

    let value = result.get_type("Order").expect("orders are gathered");
    assert_eq!(order_ids(value), vec![json!("o-1")]);
    assert_eq!(stub.invocation_count("ordersForCustomer"), 1);
    assert!(context.profiler().is_balanced());
    Ok(())
}

#[tokio::test]
async fn it_leaves_the_target_unmatched_when_nothing_produces_it() -> anyhow::Result<()> {
    let schema = schema()?;
    let stub = StubInvoker::new(schema.clone());
    stub.add_failure("recentOrder", "down");
    let engine = QueryEngine::builder(schema.clone())
        .invoker(Arc::new(stub))
        .build()?;
    let context = engine.query_context(Vec::new());
    let orders = QuerySpecTypeNode::gather(schema.type_by_name("Order")?);

    let result = context.gather(vec![orders.clone()]).await?;

    assert_eq!(result.unmatched_nodes(), &[orders]);
    Ok(())
}
