//! Integration tests for the reconnecting sync client against a live server.

use std::sync::Arc;

use inkwell_collab::auth::{Identity, StaticTokens};
use inkwell_collab::client::{
    ClientConfig, ClientError, ConnectionState, Rebase, ReconnectPolicy, SyncClient, SyncEvent,
};
use inkwell_collab::server::{ServerConfig, SyncServer};
use inkwell_collab::storage::MemoryStore;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

struct TestServer {
    server: Arc<SyncServer>,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Stop accepting, close every connection and wait for the final flush.
    async fn shutdown(self) {
        let _ = self.stop.send(());
        self.handle.await.unwrap();
    }
}

async fn start_test_server(port: u16, store: Arc<MemoryStore>) -> TestServer {
    let config = ServerConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        ..ServerConfig::for_testing()
    };
    let tokens = StaticTokens::new()
        .with_token("alice-token", Identity::new(1, "alice"))
        .with_token("bob-token", Identity::new(2, "bob"));
    let server = Arc::new(SyncServer::new(config, store, Arc::new(tokens)));
    let (stop, stopped) = oneshot::channel::<()>();
    let running = server.clone();
    let handle = tokio::spawn(async move {
        running
            .run_until(async {
                let _ = stopped.await;
            })
            .await
            .unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    TestServer { server, stop, handle }
}

fn client_config(port: u16, token: &str) -> ClientConfig {
    ClientConfig {
        reconnect: ReconnectPolicy::for_testing(),
        ..ClientConfig::new(format!("ws://127.0.0.1:{port}"), 1, Some(token.to_string()))
    }
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..150 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

/// Wait for the next `Synced` event.
async fn next_synced(events: &mut mpsc::Receiver<SyncEvent>) -> (u64, Rebase) {
    loop {
        let event = timeout(Duration::from_secs(3), events.recv())
            .await
            .expect("timed out waiting for sync")
            .expect("event channel closed");
        if let SyncEvent::Synced { version, rebase } = event {
            return (version, rebase);
        }
    }
}

#[tokio::test]
async fn test_two_clients_converge() {
    let port = free_port().await;
    let store = Arc::new(MemoryStore::new().with_document(1, ""));
    let server = start_test_server(port, store).await;

    let mut alice = SyncClient::start(client_config(port, "alice-token"));
    let mut bob = SyncClient::start(client_config(port, "bob-token"));
    let mut bob_events = bob.take_event_rx().unwrap();
    assert!(eventually(|| alice.is_synced() && bob.is_synced()).await);

    alice.insert(0, "Hello").unwrap();
    assert!(eventually(|| bob.text().as_deref() == Some("Hello")).await);

    bob.insert(5, " World").unwrap();
    assert!(eventually(|| alice.text().as_deref() == Some("Hello World")).await);
    assert!(eventually(|| alice.pending_ops() == 0 && bob.pending_ops() == 0).await);
    assert_eq!(bob.text().as_deref(), Some("Hello World"));

    let session = server.server.registry().session(1).await.unwrap();
    assert_eq!(session.content(), "Hello World");

    // Bob saw Alice's edit as a delta against the empty document.
    let mut remote = None;
    while let Ok(event) = bob_events.try_recv() {
        if let SyncEvent::RemoteChange { user_id, delta } = event {
            remote = Some((user_id, delta));
            break;
        }
    }
    let (user_id, delta) = remote.expect("no remote change event");
    assert_eq!(user_id, 1);
    assert_eq!(delta.apply("").unwrap(), "Hello");

    alice.stop().await;
    bob.stop().await;
    assert_eq!(alice.state(), ConnectionState::Idle);
}

#[tokio::test]
async fn test_offline_edits_replayed_after_restart() {
    let port = free_port().await;
    let store = Arc::new(MemoryStore::new().with_document(1, ""));
    let server = start_test_server(port, store.clone()).await;

    let mut client = SyncClient::start(client_config(port, "alice-token"));
    let mut events = client.take_event_rx().unwrap();
    assert_eq!(next_synced(&mut events).await, (0, Rebase::Clean));

    client.insert(0, "abc").unwrap();
    assert!(eventually(|| client.pending_ops() == 0).await);
    assert!(client.draft().is_none());

    server.shutdown().await;
    assert_eq!(store.get(1).unwrap().content, "abc");
    assert!(eventually(|| client.state() != ConnectionState::Connected).await);

    // Offline: edits land locally and wait in the queue.
    client.insert(3, "def").unwrap();
    assert_eq!(client.text().as_deref(), Some("abcdef"));
    assert_eq!(client.pending_ops(), 3);
    assert_eq!(client.draft().unwrap().content, "abcdef");

    // The restarted server re-seeds the document, so the edits are minted again.
    let server = start_test_server(port, store.clone()).await;
    assert_eq!(next_synced(&mut events).await, (3, Rebase::Reminted(3)));

    assert!(eventually(|| client.pending_ops() == 0).await);
    assert_eq!(client.text().as_deref(), Some("abcdef"));
    assert!(client.draft().is_none());
    let session = server.server.registry().session(1).await.unwrap();
    assert_eq!(session.content(), "abcdef");

    client.stop().await;
    server.shutdown().await;
    assert_eq!(store.get(1).unwrap().content, "abcdef");
}

#[tokio::test]
async fn test_rejected_token_is_terminal() {
    let port = free_port().await;
    let store = Arc::new(MemoryStore::new().with_document(1, ""));
    let _server = start_test_server(port, store).await;

    let client = SyncClient::start(client_config(port, "forged-token"));
    timeout(Duration::from_secs(3), client.wait_for_state(ConnectionState::Failed))
        .await
        .expect("client kept retrying")
        .unwrap();
    assert!(!client.is_synced());
}

#[tokio::test]
async fn test_edits_need_initial_state() {
    // Nothing listens on this port.
    let port = free_port().await;
    let config = ClientConfig {
        reconnect: ReconnectPolicy {
            max_attempts: Some(3),
            ..ReconnectPolicy::for_testing()
        },
        ..client_config(port, "alice-token")
    };
    let client = SyncClient::start(config);

    assert!(matches!(client.insert(0, "x"), Err(ClientError::NotSynced)));
    assert!(matches!(client.delete(0, 1), Err(ClientError::NotSynced)));
    timeout(Duration::from_secs(3), client.wait_for_state(ConnectionState::Failed))
        .await
        .expect("client never gave up")
        .unwrap();
    assert_eq!(client.text(), None);
}
