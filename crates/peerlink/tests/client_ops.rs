mod common;

use std::sync::Arc;

use common::{RecordingFactory, RecordingObserver, RecordingSignaling, connected, settle, wait_until};
use peerlink::{ChannelState, ClientConfig, LocalStream, P2pClient, P2pClientObserver, P2pError, RemoteId, RemoteStream};
use test_timeout::tokio_timeout_test;

#[test]
fn new_requires_a_runtime() {
    let result = P2pClient::new(
        ClientConfig::default(),
        RecordingSignaling::new(),
        RecordingFactory::auto_answer(),
    );
    assert!(matches!(result, Err(P2pError::InvalidState(_))));
}

#[tokio_timeout_test]
async fn connect_sets_local_identity_once() {
    let h = connected("alice", ClientConfig::default(), RecordingFactory::auto_answer()).await;
    assert_eq!(h.client.local_id(), Some(RemoteId::from("alice")));
    let again = h.client.connect("local", "mallory").await.unwrap();
    assert_eq!(again.as_str(), "alice");
    assert_eq!(h.client.local_id(), Some(RemoteId::from("alice")));
}

#[tokio_timeout_test]
async fn connect_failure_is_passed_through() {
    let client = P2pClient::new(
        ClientConfig::default(),
        RecordingSignaling::new(),
        RecordingFactory::auto_answer(),
    )
    .unwrap();
    assert!(matches!(
        client.connect("local", "").await,
        Err(P2pError::Signaling(_))
    ));
    assert_eq!(client.local_id(), None);
}

#[tokio_timeout_test]
async fn publish_and_send_to_unlisted_remote_are_rejected() {
    let h = connected("alice", ClientConfig::default(), RecordingFactory::auto_answer()).await;
    let err = h
        .client
        .publish("bob", LocalStream::new("cam"))
        .await
        .unwrap_err();
    assert_eq!(err, P2pError::RemoteNotAllowed("bob".into()));
    let err = h.client.send("bob", "hi", true).await.unwrap_err();
    assert_eq!(err, P2pError::RemoteNotAllowed("bob".into()));
    assert_eq!(h.factory.count(), 0);
    assert!(!h.client.is_channel_created("bob"));
}

#[tokio_timeout_test]
async fn publish_before_connect_is_invalid_state() {
    let factory = RecordingFactory::auto_answer();
    let client = P2pClient::new(
        ClientConfig::default(),
        RecordingSignaling::new(),
        factory.clone(),
    )
    .unwrap();
    client.add_allowed_remote("bob");
    let err = client
        .publish("bob", LocalStream::new("cam"))
        .await
        .unwrap_err();
    assert!(matches!(err, P2pError::InvalidState(_)));
    assert_eq!(factory.count(), 0);
}

#[tokio_timeout_test]
async fn add_allowed_remote_is_idempotent() {
    let h = connected("alice", ClientConfig::default(), RecordingFactory::auto_answer()).await;
    h.client.add_allowed_remote("bob");
    h.client.add_allowed_remote("bob");
    assert_eq!(h.client.allowed_remotes(), vec![RemoteId::from("bob")]);
}

#[tokio_timeout_test]
async fn remove_unknown_remote_is_remote_not_existed() {
    let h = connected("alice", ClientConfig::default(), RecordingFactory::auto_answer()).await;
    assert_eq!(
        h.client.remove_allowed_remote("ghost").await,
        Err(P2pError::RemoteNotExisted("ghost".into()))
    );
}

#[tokio_timeout_test]
async fn remove_allowed_remote_without_channel_succeeds() {
    let h = connected("alice", ClientConfig::default(), RecordingFactory::auto_answer()).await;
    h.client.add_allowed_remote("bob");
    h.client.remove_allowed_remote("bob").await.unwrap();
    assert!(h.client.allowed_remotes().is_empty());
}

#[tokio_timeout_test]
async fn remove_allowed_remote_stops_live_channel() {
    let h = connected("alice", ClientConfig::default(), RecordingFactory::auto_answer()).await;
    h.client.add_allowed_remote("bob");
    h.client.publish("bob", LocalStream::new("cam")).await.unwrap();
    assert!(h.client.is_channel_created("bob"));

    h.client.remove_allowed_remote("bob").await.unwrap();
    assert!(!h.client.is_channel_created("bob"));
    let channel = h.factory.latest("bob").unwrap();
    assert_eq!(channel.calls(), vec!["publish:cam", "stop:notify"]);
}

#[tokio_timeout_test]
async fn publish_returns_bound_publication() {
    let h = connected("alice", ClientConfig::default(), RecordingFactory::auto_answer()).await;
    h.client.add_allowed_remote("bob");
    let publication = h
        .client
        .publish("bob", LocalStream::new("cam"))
        .await
        .unwrap();
    assert_eq!(publication.remote_id().as_str(), "bob");
    assert_eq!(publication.stream().id(), "cam");
    assert_eq!(h.factory.count(), 1);

    let stats = publication.stats().await.unwrap();
    assert_eq!(stats.messages_sent, 3);
    publication.stop().await.unwrap();
    assert_eq!(
        h.factory.latest("bob").unwrap().calls(),
        vec!["publish:cam", "connection_stats", "unpublish:cam"]
    );
}

#[tokio_timeout_test]
async fn second_publish_reuses_channel() {
    let h = connected("alice", ClientConfig::default(), RecordingFactory::auto_answer()).await;
    h.client.add_allowed_remote("bob");
    h.client.publish("bob", LocalStream::new("cam")).await.unwrap();
    h.client.publish("bob", LocalStream::new("mic")).await.unwrap();
    h.client.send("bob", "hello", false).await.unwrap();
    assert_eq!(h.factory.count(), 1);
    assert_eq!(
        h.factory.latest("bob").unwrap().calls(),
        vec!["publish:cam", "publish:mic", "send:hello:false"]
    );
}

#[tokio_timeout_test]
async fn operations_without_channel_are_invalid_state() {
    let h = connected("alice", ClientConfig::default(), RecordingFactory::auto_answer()).await;
    h.client.add_allowed_remote("bob");
    assert!(matches!(
        h.client.stop("bob").await,
        Err(P2pError::InvalidState(_))
    ));
    assert!(matches!(
        h.client.unpublish("bob", LocalStream::new("cam")).await,
        Err(P2pError::InvalidState(_))
    ));
    assert!(matches!(
        h.client.connection_stats("bob").await,
        Err(P2pError::InvalidState(_))
    ));
    assert!(matches!(
        h.client.rtc_stats("bob").await,
        Err(P2pError::InvalidState(_))
    ));
    assert_eq!(h.factory.count(), 0);
}

#[tokio_timeout_test]
async fn stop_removes_channel() {
    let h = connected("alice", ClientConfig::default(), RecordingFactory::auto_answer()).await;
    h.client.add_allowed_remote("bob");
    h.client.publish("bob", LocalStream::new("cam")).await.unwrap();
    h.client.stop("bob").await.unwrap();
    assert!(!h.client.is_channel_created("bob"));
    assert_eq!(h.client.channel_state("bob"), None);

    // The stopped notification must not disturb a channel created afterwards.
    h.client.publish("bob", LocalStream::new("cam")).await.unwrap();
    settle().await;
    assert!(h.client.is_channel_created("bob"));
    assert_eq!(h.factory.count(), 2);
}

#[tokio_timeout_test]
async fn channel_stopping_on_its_own_is_erased() {
    let h = connected("alice", ClientConfig::default(), RecordingFactory::auto_answer()).await;
    h.client.add_allowed_remote("bob");
    h.client.publish("bob", LocalStream::new("cam")).await.unwrap();
    let channel = h.factory.latest("bob").unwrap();

    channel.events().stopped();
    assert!(wait_until(|| !h.client.is_channel_created("bob")).await);
    assert_eq!(h.client.channel_state("bob"), None);

    // A fresh publish builds a new incarnation.
    h.client.publish("bob", LocalStream::new("cam")).await.unwrap();
    assert_eq!(h.factory.count(), 2);
    assert!(h.client.is_channel_created("bob"));
}

#[tokio_timeout_test]
async fn stats_are_delegated() {
    let h = connected("alice", ClientConfig::default(), RecordingFactory::auto_answer()).await;
    h.client.add_allowed_remote("bob");
    h.client.send("bob", "ping", true).await.unwrap();
    assert_eq!(h.client.connection_stats("bob").await.unwrap().messages_sent, 3);
    assert!(h.client.rtc_stats("bob").await.unwrap().is_empty());
    assert_eq!(h.client.channel_state("bob"), Some(ChannelState::Active));
}

#[tokio_timeout_test]
async fn inbound_from_unlisted_remote_is_dropped() {
    let h = connected("alice", ClientConfig::default(), RecordingFactory::auto_answer()).await;
    h.signaling.inject("mallory", common::offer());
    settle().await;
    assert_eq!(h.factory.count(), 0);
}

#[tokio_timeout_test]
async fn malformed_inbound_is_dropped() {
    let h = connected("alice", ClientConfig::default(), RecordingFactory::auto_answer()).await;
    h.client.add_allowed_remote("bob");
    h.signaling.inject("bob", "{not json");
    h.signaling.inject("bob", r#"{"data":{"code":1}}"#);
    settle().await;
    assert_eq!(h.factory.count(), 0);
    assert!(h.observer.events().is_empty());
}

#[tokio_timeout_test]
async fn inbound_offer_creates_channel_and_is_forwarded() {
    let h = connected("alice", ClientConfig::default(), RecordingFactory::auto_answer()).await;
    h.client.add_allowed_remote("bob");
    h.signaling.inject("bob", common::offer());
    h.signaling.inject("bob", r#"{"type":"candidates","candidate":"c1"}"#);
    assert!(wait_until(|| h.factory.latest("bob").is_some_and(|c| c.calls().len() == 2)).await);
    let calls = h.factory.latest("bob").unwrap().calls();
    assert_eq!(calls[0], format!("incoming:{}", common::offer()));
    assert!(calls[1].contains("candidates"));
    assert_eq!(h.factory.count(), 1);
}

#[tokio_timeout_test]
async fn channel_events_reach_observers() {
    let h = connected("alice", ClientConfig::default(), RecordingFactory::auto_answer()).await;
    h.client.add_allowed_remote("bob");
    h.client.publish("bob", LocalStream::new("cam")).await.unwrap();
    let channel = h.factory.latest("bob").unwrap();
    channel
        .events()
        .stream_added(RemoteStream::new("mic", "bob".into()));
    channel.events().message_received("hello".into());

    assert!(wait_until(|| h.observer.events().len() == 2).await);
    assert_eq!(h.observer.events(), vec!["stream:bob:mic", "message:bob:hello"]);
}

#[tokio_timeout_test]
async fn server_disconnect_reaches_every_observer_once() {
    let h = connected("alice", ClientConfig::default(), RecordingFactory::auto_answer()).await;
    let second = RecordingObserver::new();
    let second_dyn: Arc<dyn P2pClientObserver> = second.clone();
    assert!(h.client.add_observer(second_dyn.clone()));
    assert!(!h.client.add_observer(second_dyn.clone()));

    h.signaling.inject_disconnect();
    assert!(wait_until(|| h.observer.saw("server-disconnected") && second.saw("server-disconnected")).await);
    settle().await;
    assert_eq!(second.events().len(), 1);

    assert!(h.client.remove_observer(&second_dyn));
    h.signaling.inject_disconnect();
    assert!(wait_until(|| h.observer.events().len() == 2).await);
    settle().await;
    assert_eq!(second.events().len(), 1);
}

#[tokio_timeout_test]
async fn disconnect_is_delegated() {
    let h = connected("alice", ClientConfig::default(), RecordingFactory::auto_answer()).await;
    h.client.disconnect().await.unwrap();
}

#[cfg(feature = "peer-closed-events")]
#[tokio_timeout_test]
async fn stop_reports_peer_connection_closed() {
    let h = connected("alice", ClientConfig::default(), RecordingFactory::auto_answer()).await;
    h.client.add_allowed_remote("bob");
    h.client.publish("bob", LocalStream::new("cam")).await.unwrap();
    h.client.stop("bob").await.unwrap();
    assert!(wait_until(|| h.observer.saw("closed:bob")).await);
}

#[cfg(feature = "peer-closed-events")]
#[tokio_timeout_test]
async fn channel_stopping_on_its_own_reports_peer_connection_closed() {
    let h = connected("alice", ClientConfig::default(), RecordingFactory::auto_answer()).await;
    h.client.add_allowed_remote("bob");
    h.client.publish("bob", LocalStream::new("cam")).await.unwrap();
    h.factory.latest("bob").unwrap().events().stopped();
    assert!(wait_until(|| h.observer.saw("closed:bob")).await);
}

#[cfg(not(feature = "peer-closed-events"))]
#[tokio_timeout_test]
async fn peer_connection_closed_is_not_reported_by_default() {
    let h = connected("alice", ClientConfig::default(), RecordingFactory::auto_answer()).await;
    h.client.add_allowed_remote("bob");
    h.client.publish("bob", LocalStream::new("cam")).await.unwrap();
    h.client.stop("bob").await.unwrap();
    settle().await;
    assert!(!h.observer.saw("closed:bob"));
}
