use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

use klipper_motion_recorder::moonraker::{
    ChannelError, ClientConfig, MoonrakerClient, STATUS_UPDATE, StatusChannel,
};

/// Minimal Moonraker: answers a few methods and pushes two status updates after a subscribe.
async fn serve_one(listener: TcpListener, seen_api_key: Arc<Mutex<Option<String>>>) {
    let (stream, _) = listener.accept().await.unwrap();
    let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        *seen_api_key.lock().unwrap() = request
            .headers()
            .get("X-Api-Key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        Ok(response)
    };
    let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback).await.unwrap();

    while let Some(Ok(message)) = ws.next().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let request: Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(request["jsonrpc"], "2.0");
        let id = request["id"].clone();

        let reply = match request["method"].as_str().unwrap() {
            "server.info" => json!({ "jsonrpc": "2.0", "id": id, "result": { "klippy_state": "ready" } }),
            "printer.objects.list" => json!({
                "jsonrpc": "2.0", "id": id,
                "result": { "objects": ["toolhead", "motion_report", "print_stats"] }
            }),
            "printer.objects.subscribe" => {
                // updates may overtake the response on the wire
                for eventtime in [1.0, 2.0] {
                    let update = json!({
                        "jsonrpc": "2.0",
                        "method": "notify_status_update",
                        "params": [{ "motion_report": { "live_velocity": eventtime } }, eventtime]
                    });
                    ws.send(Message::text(update.to_string())).await.unwrap();
                }
                json!({ "jsonrpc": "2.0", "id": id, "result": { "eventtime": 0.5, "status": {} } })
            }
            other => json!({
                "jsonrpc": "2.0", "id": id,
                "error": { "code": -32601, "message": format!("Method not found: {}", other) }
            }),
        };
        ws.send(Message::text(reply.to_string())).await.unwrap();
    }
}

async fn start_server() -> (u16, Arc<Mutex<Option<String>>>, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let seen = Arc::new(Mutex::new(None));
    let server = tokio::spawn(serve_one(listener, seen.clone()));
    (port, seen, server)
}

fn config(port: u16) -> ClientConfig {
    ClientConfig {
        api_key: Some("secret".to_string()),
        request_timeout: Duration::from_secs(5),
        ..ClientConfig::new("127.0.0.1", port)
    }
}

#[tokio::test]
async fn test_client_round_trips_requests_and_notifications() {
    let (port, seen_api_key, server) = start_server().await;
    let mut client = MoonrakerClient::new(config(port));

    client.connect().await.unwrap();
    assert!(client.is_connected());
    assert_eq!(seen_api_key.lock().unwrap().as_deref(), Some("secret"));

    assert_eq!(client.klippy_state().await.unwrap(), "ready");
    assert_eq!(
        client.list_objects().await.unwrap(),
        vec!["toolhead", "motion_report", "print_stats"]
    );

    client
        .call_method(
            "printer.objects.subscribe",
            Some(json!({ "objects": { "motion_report": null } })),
        )
        .await
        .unwrap();

    for expected in [1.0, 2.0] {
        let notification = client.next_notification().await.unwrap();
        assert_eq!(notification.method, STATUS_UPDATE);
        assert_eq!(notification.params[1], json!(expected));
    }

    client.disconnect().await.unwrap();
    assert!(!client.is_connected());
    assert!(client.next_notification().await.is_none());

    tokio::time::timeout(Duration::from_secs(2), server)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_rpc_errors_are_reported() {
    let (port, _seen, _server) = start_server().await;
    let mut client = MoonrakerClient::new(config(port));
    client.connect().await.unwrap();

    let err = client.call_method("machine.reboot", None).await.unwrap_err();

    match err {
        ChannelError::Rpc { method, code, .. } => {
            assert_eq!(method, "machine.reboot");
            assert_eq!(code, -32601);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_calls_before_connect_fail() {
    let mut client = MoonrakerClient::new(ClientConfig::new("127.0.0.1", 1));

    let err = client.call_method("server.info", None).await.unwrap_err();

    assert!(matches!(err, ChannelError::NotConnected));
}

#[test]
fn test_incoming_frames_are_classified() {
    use klipper_motion_recorder::moonraker::{ErrorData, IncomingFrame, JsonRpcRequest};

    let response = IncomingFrame::parse(r#"{"jsonrpc":"2.0","id":7,"result":{"objects":[]}}"#).unwrap();
    assert_eq!(
        response,
        IncomingFrame::Response { id: 7, result: Ok(json!({ "objects": [] })) }
    );

    let error = IncomingFrame::parse(
        r#"{"jsonrpc":"2.0","id":8,"error":{"code":400,"message":"Klippy Disconnected"}}"#,
    )
    .unwrap();
    assert_eq!(
        error,
        IncomingFrame::Response {
            id: 8,
            result: Err(ErrorData { code: 400, message: "Klippy Disconnected".to_string() }),
        }
    );

    match IncomingFrame::parse(r#"{"jsonrpc":"2.0","method":"notify_klippy_ready"}"#).unwrap() {
        IncomingFrame::Notification(n) => {
            assert_eq!(n.method, "notify_klippy_ready");
            assert_eq!(n.params, Value::Null);
        }
        other => panic!("unexpected frame: {other:?}"),
    }

    assert!(IncomingFrame::parse(r#"{"jsonrpc":"2.0"}"#).is_err());
    assert!(IncomingFrame::parse("not json").is_err());

    let request = serde_json::to_value(JsonRpcRequest::new(3, "server.info", None)).unwrap();
    assert_eq!(request, json!({ "jsonrpc": "2.0", "method": "server.info", "id": 3 }));
}
