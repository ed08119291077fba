//! Cross-node queue consumer tests

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tokio::net::UnixListener;
use tokio_test::{assert_err, assert_ok};

use common::{register_agent_echo, MockTransport};
use dapi_core::config::DapiConfig;
use dapi_core::constants::codes;
use dapi_core::queues::{ApiRequestQueue, QueueEnvelope, SendSyncRequestQueue};
use dapi_core::results::{DapiResult, WireResponse};
use dapi_core::router::{DistributedRequest, FunctionRegistry, RequestRouter, RequestType};
use dapi_core::wire::{read_frame, write_frame};

fn api_queue(transport: Arc<MockTransport>) -> ApiRequestQueue {
    let registry = Arc::new(FunctionRegistry::new());
    register_agent_echo(&registry, "agent.restart");
    let router = Arc::new(RequestRouter::new(Arc::new(DapiConfig::default()), registry));
    ApiRequestQueue::new(router, transport).0
}

fn request_body() -> String {
    let request = DistributedRequest::new("agent.restart", RequestType::DistributedMaster)
        .with_kwarg("agent_list", json!(["001", "002"]));
    serde_json::to_string(&request).unwrap()
}

#[tokio::test]
async fn test_api_request_replies_with_result() {
    let transport = Arc::new(MockTransport::new(["master", "worker1"]));
    let queue = api_queue(Arc::clone(&transport));

    queue.process(&format!("master req-1 {}", request_body())).await;

    let sent = transport.sent_requests();
    assert_eq!(sent.len(), 1);
    let (node, command, payload) = &sent[0];
    assert_eq!(node, "master");
    assert_eq!(command, "dapi_res");

    let (request_id, body) = payload.split_once(' ').unwrap();
    assert_eq!(request_id, "req-1");
    let response = WireResponse::decode(body.as_bytes()).unwrap();
    match assert_ok!(response.into_result()) {
        DapiResult::AffectedItems(result) => assert_eq!(result.total_affected_items, 2),
        other => panic!("expected affected items, got {other:?}"),
    }
}

#[tokio::test]
async fn test_api_request_with_bad_body_replies_with_error() {
    let transport = Arc::new(MockTransport::new(["master"]));
    let queue = api_queue(Arc::clone(&transport));

    queue.process("master req-2 {not json").await;

    let sent = transport.sent_requests();
    assert_eq!(sent.len(), 1);
    let (_, command, payload) = &sent[0];
    assert_eq!(command, "dapi_err");
    assert!(payload.starts_with("req-2 Error in distributed API: "));
}

#[tokio::test]
async fn test_function_errors_travel_inside_result_reply() {
    let transport = Arc::new(MockTransport::new(["master"]));
    let queue = api_queue(Arc::clone(&transport));
    let body = serde_json::to_string(&DistributedRequest::new("missing", RequestType::LocalAny))
        .unwrap();

    queue.process(&format!("master req-3 {body}")).await;

    let (_, command, payload) = &transport.sent_requests()[0];
    assert_eq!(command, "dapi_res");
    let (_, body) = payload.split_once(' ').unwrap();
    let error = assert_err!(WireResponse::decode(body.as_bytes()).unwrap().into_result());
    assert_eq!(error.code(), Some(codes::INTERNAL_ERROR));
}

#[tokio::test]
async fn test_unreachable_origin_does_not_stop_consumer() {
    let transport = Arc::new(MockTransport::new(["master"]));
    let registry = Arc::new(FunctionRegistry::new());
    register_agent_echo(&registry, "agent.restart");
    let router = Arc::new(RequestRouter::new(Arc::new(DapiConfig::default()), registry));
    let (queue, handle) = ApiRequestQueue::new(router, Arc::clone(&transport) as _);

    handle
        .add_request(format!("worker9 req-4 {}", request_body()))
        .unwrap();
    handle.add_request("malformed").unwrap();
    handle
        .add_request(QueueEnvelope::new("master", request_body()).to_string())
        .unwrap();
    drop(handle);

    // The consumer drains every item, then fails on the closed queue
    assert_err!(queue.run().await);

    let sent = transport.sent_requests();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].0, "worker9");
    assert_eq!(sent[1].0, "master");
    assert_eq!(sent[1].1, "dapi_res");
}

#[tokio::test]
async fn test_sendsync_relays_to_daemon_socket() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("remoted.sock");
    let listener = UnixListener::bind(&path).unwrap();
    let daemon = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let request = read_frame(&mut stream).await.unwrap();
        let request: serde_json::Value = serde_json::from_slice(&request).unwrap();
        assert_eq!(request["command"], json!("getconfig"));
        write_frame(&mut stream, b"ok {\"enabled\": true}").await.unwrap();
    });

    let transport = Arc::new(MockTransport::new(["master"]));
    let daemons = HashMap::from([("dapi-remoted".to_string(), path.clone())]);
    let (queue, _handle) = SendSyncRequestQueue::new(daemons, Arc::clone(&transport) as _);

    let body = json!({"daemon_name": "dapi-remoted", "message": {"command": "getconfig"}});
    queue.process(&format!("master ss-1 {body}")).await;
    daemon.await.unwrap();

    let sent = transport.sent_requests();
    assert_eq!(
        sent,
        vec![(
            "master".to_string(),
            "sendsync_res".to_string(),
            "ss-1 ok {\"enabled\": true}".to_string()
        )]
    );
}

#[tokio::test]
async fn test_sendsync_unknown_daemon_replies_with_error() {
    let transport = Arc::new(MockTransport::new(["master"]));
    let (queue, _handle) = SendSyncRequestQueue::new(HashMap::new(), Arc::clone(&transport) as _);

    let body = json!({"daemon_name": "dapi-nope", "message": "getconfig"});
    queue.process(&format!("master ss-2 {body}")).await;

    let (_, command, payload) = &transport.sent_requests()[0];
    assert_eq!(command, "sendsync_err");
    assert!(payload.starts_with("ss-2 Error in Sendsync: "));
    assert!(payload.contains("dapi-nope"));
}

#[test]
fn test_closed_queue_rejects_new_requests() {
    let transport = Arc::new(MockTransport::new(["master"]));
    let (queue, handle) = SendSyncRequestQueue::new(HashMap::new(), transport);
    drop(queue);
    assert_err!(handle.add_request("master ss-3 {}"));
}

#[test]
fn test_sendsync_run_ends_when_producers_drop() {
    let transport = Arc::new(MockTransport::new(["master"]));
    let (queue, handle) = SendSyncRequestQueue::new(HashMap::new(), transport);
    drop(handle);
    assert_err!(tokio_test::block_on(queue.run()));
}
