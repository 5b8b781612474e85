use super::*;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;

const WAIT: Duration = Duration::from_secs(5);

async fn next_event(events: &mut mpsc::UnboundedReceiver<ConnectionEvent>) -> Option<ConnectionEvent> {
    tokio::time::timeout(WAIT, events.recv()).await.expect("event within timeout")
}

async fn local_listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let url = format!("ws://{}/ws-rpc", listener.local_addr().expect("addr"));
    (listener, url)
}

#[test]
fn state_displays_lowercase() {
    let names: Vec<String> = [ConnectionState::Connecting, ConnectionState::Open, ConnectionState::Closing, ConnectionState::Closed]
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(names, ["connecting", "open", "closing", "closed"]);
    assert_eq!(ConnectionError::NotOpen(ConnectionState::Closed).to_string(), "connection is closed, not open");
}

#[tokio::test]
async fn unreachable_endpoint_gives_up_under_never_policy() {
    let (listener, url) = local_listener().await;
    drop(listener);

    let (handle, mut events) = ConnectionManager::spawn(url, ReconnectPolicy::never());

    // The manager stops without ever opening, which ends the event stream.
    assert_eq!(next_event(&mut events).await, None);
    assert_eq!(handle.state(), ConnectionState::Closed);
    assert_eq!(handle.send("{}".to_owned()), Err(ConnectionError::NotOpen(ConnectionState::Closed)));
}

#[tokio::test]
async fn relays_text_ignores_binary_and_reports_close() {
    let (listener, url) = local_listener().await;
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut ws = accept_async(stream).await.expect("handshake");
        ws.send(Message::Binary(vec![1, 2, 3].into())).await.expect("binary");
        ws.send(Message::Text("{\"type\":\"connected\",\"version\":\"1\",\"timestamp\":0}".into()))
            .await
            .expect("text");
        let echoed = ws.next().await.expect("client frame").expect("read");
        ws.close(None).await.expect("close");
        echoed
    });

    let (handle, mut events) = ConnectionManager::spawn(url, ReconnectPolicy::never());
    assert_eq!(next_event(&mut events).await, Some(ConnectionEvent::Opened));
    assert!(handle.is_open());

    let frame = next_event(&mut events).await;
    assert_eq!(
        frame,
        Some(ConnectionEvent::Frame("{\"type\":\"connected\",\"version\":\"1\",\"timestamp\":0}".to_owned()))
    );

    handle.send("{\"type\":\"query\"}".to_owned()).expect("send while open");
    assert_eq!(next_event(&mut events).await, Some(ConnectionEvent::Closed));
    assert_eq!(next_event(&mut events).await, None);

    let echoed = server.await.expect("server task");
    assert_eq!(echoed, Message::Text("{\"type\":\"query\"}".into()));
    assert_eq!(handle.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn close_flushes_queued_frames_then_sends_close() {
    let (listener, url) = local_listener().await;
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut ws = accept_async(stream).await.expect("handshake");
        let mut received = Vec::new();
        while let Some(Ok(msg)) = ws.next().await {
            received.push(msg);
        }
        received
    });

    let (handle, mut events) = ConnectionManager::spawn(url, ReconnectPolicy::forever(Duration::from_millis(10)));
    assert_eq!(next_event(&mut events).await, Some(ConnectionEvent::Opened));

    handle.send("first".to_owned()).expect("send");
    handle.send("second".to_owned()).expect("send");
    handle.close();

    assert_eq!(next_event(&mut events).await, Some(ConnectionEvent::Closed));
    // No reconnect after an explicit close, even under a forever policy.
    assert_eq!(next_event(&mut events).await, None);

    let received = server.await.expect("server task");
    assert_eq!(received[0], Message::Text("first".into()));
    assert_eq!(received[1], Message::Text("second".into()));
    assert!(received[2].is_close());
    assert_eq!(handle.send("late".to_owned()), Err(ConnectionError::NotOpen(ConnectionState::Closed)));
}

#[tokio::test]
async fn reconnects_after_drop_and_resets_attempts() {
    let (listener, url) = local_listener().await;
    tokio::spawn(async move {
        // First socket is dropped without a close frame; the second stays up.
        let (stream, _) = listener.accept().await.expect("accept 1");
        drop(accept_async(stream).await.expect("handshake 1"));
        let (stream, _) = listener.accept().await.expect("accept 2");
        let mut ws = accept_async(stream).await.expect("handshake 2");
        while let Some(Ok(_)) = ws.next().await {}
    });

    let (handle, mut events) = ConnectionManager::spawn(url, ReconnectPolicy::bounded(1, Duration::from_millis(10)));
    assert_eq!(next_event(&mut events).await, Some(ConnectionEvent::Opened));
    assert_eq!(next_event(&mut events).await, Some(ConnectionEvent::Closed));
    assert_eq!(next_event(&mut events).await, Some(ConnectionEvent::Opened));
    assert!(handle.is_open());

    let mut states = handle.watch_state();
    handle.close();
    tokio::time::timeout(WAIT, states.wait_for(|s| *s == ConnectionState::Closed))
        .await
        .expect("closed within timeout")
        .expect("state sender alive");
}

#[tokio::test]
async fn spawn_into_shares_the_caller_queue_in_order() {
    #[derive(Debug, PartialEq)]
    enum Input {
        Connection(ConnectionEvent),
        Note(&'static str),
    }
    impl From<ConnectionEvent> for Input {
        fn from(event: ConnectionEvent) -> Self {
            Self::Connection(event)
        }
    }

    let (listener, url) = local_listener().await;
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut ws = accept_async(stream).await.expect("handshake");
        while let Some(Ok(Message::Text(_))) = ws.next().await {
            ws.send(Message::Text("pong".into())).await.expect("reply");
        }
    });

    let (tx, mut rx) = mpsc::unbounded_channel::<Input>();
    let handle = ConnectionManager::spawn_into(url, ReconnectPolicy::never(), tx.clone());
    let opened = tokio::time::timeout(WAIT, rx.recv()).await.expect("opened");
    assert_eq!(opened, Some(Input::Connection(ConnectionEvent::Opened)));

    tx.send(Input::Note("before ping")).expect("queue open");
    handle.send("ping".to_owned()).expect("open");

    assert_eq!(rx.recv().await, Some(Input::Note("before ping")));
    let reply = tokio::time::timeout(WAIT, rx.recv()).await.expect("reply");
    assert_eq!(reply, Some(Input::Connection(ConnectionEvent::Frame("pong".to_owned()))));
    handle.close();
}
