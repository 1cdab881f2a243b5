//! HTTP API tests against the router.

mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use common::fixtures::{deployment, succeeding_platform};
use common::{TestNode, WAIT};
use http_body_util::BodyExt;
use nimbus_control::SimulatedPlatform;
use nimbus_durable::{InstanceId, RuntimeStatus};
use serde_json::{json, Value};
use tower::ServiceExt;

async fn send(node: &TestNode, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let app = nimbus_server::api::router(node.runtime.app_state());
    let body = match body {
        Some(value) => Body::from(serde_json::to_vec(&value).unwrap()),
        None => Body::empty(),
    };
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn instance_id(body: &Value) -> InstanceId {
    InstanceId::new(body["instance_id"].as_str().unwrap())
}

#[tokio::test]
async fn health_check() {
    let node = TestNode::new(SimulatedPlatform::new());
    let (status, body) = send(&node, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn deployment_over_http_completes() {
    let node = TestNode::new(succeeding_platform("done"));

    let (status, body) = send(&node, Method::POST, "/deployments", Some(deployment("g1", "t1"))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let id = instance_id(&body);
    assert_eq!(body["status_url"], format!("/orchestrations/{id}"));

    let finished = node.finish(&id).await;
    assert_eq!(finished.runtime_status, RuntimeStatus::Completed);

    let (status, body) = send(&node, Method::GET, &format!("/orchestrations/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["runtime_status"], "completed");
    assert_eq!(body["output"]["logs"], "done");
    assert_eq!(body["output"]["state"], "Succeeded");
}

#[tokio::test]
async fn malformed_deployment_is_rejected() {
    let node = TestNode::new(SimulatedPlatform::new());

    let (status, body) = send(&node, Method::POST, "/deployments", Some(json!({"group": "g1"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("malformed"));
    assert_eq!(node.platform.calls().create, 0);
}

#[tokio::test]
async fn sequence_runs_in_order() {
    let node = TestNode::new(SimulatedPlatform::new());

    let (status, body) = send(&node, Method::POST, "/orchestrations/sequence", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let finished = node.finish(&instance_id(&body)).await;
    assert_eq!(finished.runtime_status, RuntimeStatus::Completed);
    assert_eq!(
        finished.output,
        Some(json!(["Hello Tokyo!", "Hello Seattle!", "Hello London!"]))
    );
    assert_eq!(finished.history_len, 6);
}

#[tokio::test]
async fn fan_out_keeps_dispatch_order() {
    let node = TestNode::new(SimulatedPlatform::new());

    let (_, body) = send(&node, Method::POST, "/orchestrations/fan_out", None).await;

    let finished = node.finish(&instance_id(&body)).await;
    assert_eq!(
        finished.output,
        Some(json!(["Hello Frankfurt!", "Hello Seattle!", "Hello Sarajevo!"]))
    );
}

#[tokio::test]
async fn monitor_continues_as_new_until_limit() {
    let node = TestNode::new(SimulatedPlatform::new());

    let (status, body) = send(
        &node,
        Method::POST,
        "/orchestrations/monitor",
        Some(json!({"limit": 4})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let finished = node.finish(&instance_id(&body)).await;
    assert_eq!(finished.runtime_status, RuntimeStatus::Completed);
    assert_eq!(finished.output, Some(json!({"iterations": 4})));
    assert_eq!(finished.custom_status, Some(json!({"iteration": 4})));
    assert_eq!(finished.epoch, 4);
    assert_eq!(finished.history_len, 2);
}

#[tokio::test]
async fn unknown_program_is_not_found() {
    let node = TestNode::new(SimulatedPlatform::new());
    let (status, _) = send(&node, Method::POST, "/orchestrations/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_instance_is_not_found() {
    let node = TestNode::new(SimulatedPlatform::new());
    let (status, body) = send(&node, Method::GET, "/orchestrations/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("missing"));
}

#[tokio::test]
async fn counter_signals_and_calls() {
    let node = TestNode::new(SimulatedPlatform::new());

    for amount in [5, 7] {
        let (status, _) = send(
            &node,
            Method::POST,
            "/entities/counter/c1/add",
            Some(json!({ "amount": amount })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    // Calls queue behind earlier signals on the same key.
    let (status, body) = send(&node, Method::POST, "/entities/counter/c1/get", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"key": "c1", "value": 12}));

    let (status, body) = send(&node, Method::GET, "/entities/counter/c1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], json!({"value": 12}));

    send(&node, Method::POST, "/entities/counter/c1/reset", None).await;
    let (_, body) = send(&node, Method::POST, "/entities/counter/c1/get", None).await;
    assert_eq!(body["value"], 0);

    send(&node, Method::POST, "/entities/counter/c1/delete", None).await;
    let (_, body) = send(&node, Method::POST, "/entities/counter/c1/get", None).await;
    assert_eq!(body["value"], 0);
    let (_, body) = send(&node, Method::GET, "/entities/counter/c1", None).await;
    assert_eq!(body["state"], json!({"value": 0}));
}

#[tokio::test]
async fn counter_state_and_get_agree_for_unwritten_keys() {
    let node = TestNode::new(SimulatedPlatform::new());

    let (status, body) = send(&node, Method::GET, "/entities/counter/never", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"]["value"], 0);

    let (_, body) = send(&node, Method::POST, "/entities/counter/never/get", None).await;
    assert_eq!(body["value"], 0);
}

#[tokio::test]
async fn counter_rejects_bad_operations() {
    let node = TestNode::new(SimulatedPlatform::new());

    let (status, _) = send(&node, Method::POST, "/entities/counter/c1/add", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&node, Method::POST, "/entities/counter/c1/multiply", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_orchestration_input_is_rejected() {
    let node = TestNode::new(SimulatedPlatform::new());
    let app = nimbus_server::api::router(node.runtime.app_state());
    let request = Request::builder()
        .method(Method::POST)
        .uri("/orchestrations/sequence")
        .body(Body::from("{oops"))
        .unwrap();

    let response = tokio::time::timeout(WAIT, app.oneshot(request))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
