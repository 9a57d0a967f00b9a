use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::time::Duration;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use hot_potato::directory::ws::{HubEvent, HubRequest};
use hot_potato::{
    Address, Body, Directory, DirectoryError, Envelope, Instance, InstanceId, WsDirectory,
};

/// Serves a single client: hands out a fixed id, reports two instances,
/// echoes sends back to the sender, rejects presence for `forbidden` and
/// never answers presence for `silent`.
async fn fake_hub(listener: TcpListener) {
    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

    while let Some(Ok(frame)) = ws.next().await {
        let text = match frame {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => break,
            _ => continue,
        };
        let reply = match serde_json::from_str::<HubRequest>(&text).unwrap() {
            HubRequest::Register { .. } => Some(HubEvent::Registered {
                instance_id: InstanceId::new("a11ce"),
            }),
            HubRequest::Presence { request_id, service } if service == "forbidden" => {
                Some(HubEvent::Error { request_id: Some(request_id), reason: "forbidden".into() })
            }
            HubRequest::Presence { service, .. } if service == "silent" => None,
            HubRequest::Presence { request_id, service } => Some(HubEvent::Presence {
                request_id,
                instances: vec![
                    Instance { id: InstanceId::new("a11ce"), service: service.clone() },
                    Instance { id: InstanceId::new("b0b"), service },
                ],
            }),
            HubRequest::Send { message } | HubRequest::Broadcast { message } => {
                Some(HubEvent::Message { message })
            }
            HubRequest::Deregister => None,
        };
        if let Some(reply) = reply {
            let frame = serde_json::to_string(&reply).unwrap();
            ws.send(WsMessage::Text(frame)).await.unwrap();
        }
    }
}

async fn start_hub() -> (String, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    (url, tokio::spawn(fake_hub(listener)))
}

#[tokio::test]
async fn registers_queries_and_relays_through_the_hub() {
    let (url, hub) = start_hub().await;
    let mut directory = WsDirectory::connect(&url, Duration::from_secs(5)).await.unwrap();

    let id = directory.register("hpp", "0.1.0").await.unwrap();
    assert_eq!(id, InstanceId::new("a11ce"));
    assert_eq!(directory.instance_id(), Some(&id));

    let live = directory.presence("hpp").await.unwrap();
    let ids: Vec<&str> = live.iter().map(|instance| instance.id.as_str()).collect();
    assert_eq!(ids, vec!["a11ce", "b0b"]);

    let token = Envelope::hot_potato(
        Address::instance(InstanceId::new("b0b"), "hpp"),
        Address::instance(id.clone(), "hpp"),
        &Body::HotPotato { expiration: 1_700_000_030 },
    );
    directory.send(token.clone()).await.unwrap();
    assert_eq!(directory.recv().await, Some(token));

    directory.shutdown().await.unwrap();
    assert_eq!(directory.instance_id(), None);
    hub.await.unwrap();
}

#[tokio::test]
async fn hub_rejections_and_silence_become_errors() {
    let (url, _hub) = start_hub().await;
    let mut directory = WsDirectory::connect(&url, Duration::from_millis(200)).await.unwrap();
    directory.register("hpp", "0.1.0").await.unwrap();

    match directory.presence("forbidden").await {
        Err(DirectoryError::Rejected(reason)) => assert_eq!(reason, "forbidden"),
        other => panic!("expected rejection, got {:?}", other),
    }
    assert!(matches!(
        directory.presence("silent").await,
        Err(DirectoryError::Timeout(_))
    ));

    // the connection is still usable afterwards
    assert_eq!(directory.presence("hpp").await.unwrap().len(), 2);
}

#[tokio::test]
async fn sending_requires_registration_and_an_instance_address() {
    let (url, _hub) = start_hub().await;
    let mut directory = WsDirectory::connect(&url, Duration::from_secs(5)).await.unwrap();

    let broadcast = Envelope::hot_potato(
        Address::service("hpp"),
        Address::service("hpp"),
        &Body::GameOver { result: "Game over, X lost!".into() },
    );
    assert!(matches!(
        directory.broadcast(broadcast.clone()).await,
        Err(DirectoryError::NotRegistered)
    ));

    directory.register("hpp", "0.1.0").await.unwrap();
    assert!(matches!(
        directory.send(broadcast).await,
        Err(DirectoryError::NotAnInstance(_))
    ));
}
