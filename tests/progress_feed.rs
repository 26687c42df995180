use futures_util::SinkExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tubetape::app::App;
use tubetape::bridge::{Display, NotificationKind};
use tubetape::config::AppConfig;
use tubetape::models::{ConnectionState, ProgressEvent, ProgressStatus};
use tubetape::prefs::PreferenceStore;
use tubetape::probe::NoProbe;
use tubetape::progress::{Connector, ProgressChannel, TransportError, WsConnector};
use tubetape::worker::ServiceWorker;

const FRAMES: [&str; 4] = [
    r#"{"status":"started","url":"https://example.com/a"}"#,
    "definitely not json",
    r#"{"status":"converting"}"#,
    r#"{"status":"finished"}"#,
];

/// Serves `FRAMES` on the first connection and then hangs up; the second
/// connection is held open until the test ends.
async fn feed_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        for frame in FRAMES {
            ws.send(Message::Text(frame.to_string())).await.unwrap();
        }
        let _ = ws.close(None).await;
        drop(ws);

        let (stream, _) = listener.accept().await.unwrap();
        let _held = accept_async(stream).await.unwrap();
        std::future::pending::<()>().await;
    });
    addr
}

async fn collect_until_reconnected(rx: &mut UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    let mut connects = 0;
    tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(event) = rx.recv().await {
            if event.status == ProgressStatus::Connected {
                connects += 1;
            }
            events.push(event);
            if connects == 2 {
                break;
            }
        }
    })
    .await
    .expect("feed did not reconnect in time");
    events
}

#[tokio::test]
async fn frames_arrive_in_order_and_bad_ones_do_not_disconnect() {
    let addr = feed_server().await;
    let connector = Arc::new(WsConnector::new(format!("ws://{addr}/ws"), Duration::from_secs(1)));
    let channel = Arc::new(ProgressChannel::new(connector, Duration::from_millis(200)));
    let mut rx = channel.subscribe();
    let mut late = channel.subscribe();
    let state = channel.connection_state();
    let shutdown = CancellationToken::new();
    let handle = channel.spawn(shutdown.clone());

    let events = collect_until_reconnected(&mut rx).await;
    let statuses: Vec<_> = events.iter().map(|e| e.status).collect();
    assert_eq!(
        statuses,
        [
            ProgressStatus::Connected,
            ProgressStatus::Started,
            ProgressStatus::Error,
            ProgressStatus::Converting,
            ProgressStatus::Finished,
            ProgressStatus::Disconnected,
            ProgressStatus::Connected,
        ]
    );
    assert!(events[2].is_decode_error());
    assert_eq!(events[1].payload.as_ref().unwrap()["url"], "https://example.com/a");
    assert_eq!(*state.borrow(), ConnectionState::Connected);

    // Every subscriber sees the same sequence.
    let other = collect_until_reconnected(&mut late).await;
    assert_eq!(other, events);

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn silent_server_hits_the_handshake_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (_socket, _) = listener.accept().await.unwrap();
        std::future::pending::<()>().await;
    });

    let connector = WsConnector::new(format!("ws://{addr}/ws"), Duration::from_millis(200));
    let started = Instant::now();
    let err = connector.connect().await.err().unwrap();
    assert_eq!(err, TransportError::HandshakeTimeout(Duration::from_millis(200)));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn refused_connection_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let connector = WsConnector::new(format!("ws://{addr}/ws"), Duration::from_secs(1));
    assert!(matches!(connector.connect().await, Err(TransportError::Connect(_))));
}

#[tokio::test]
async fn app_relays_progress_as_notifications() {
    let addr = feed_server().await;
    let mut config = AppConfig::default();
    config.progress.reconnect_delay_ms = 200;
    let connector = Arc::new(WsConnector::new(format!("ws://{addr}/ws"), Duration::from_secs(1)));
    let (app, mut notes) = App::new(
        config,
        PreferenceStore::open_in_memory().await.unwrap(),
        Arc::new(ServiceWorker::new("http://127.0.0.1:9")),
        Arc::new(NoProbe),
        connector,
    );
    let shutdown = CancellationToken::new();
    let handle = app.start_progress(shutdown.clone());

    let mut seen = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(note) = notes.recv().await {
            let disconnected = note.display == Display::Persistent;
            seen.push(note);
            if disconnected {
                break;
            }
        }
    })
    .await
    .expect("no disconnect notification");

    let messages: Vec<_> = seen.iter().map(|n| (n.kind, n.message.as_str())).collect();
    assert_eq!(messages[0], (NotificationKind::ConnectionStatus, "connected"));
    assert_eq!(messages[1], (NotificationKind::Started, "Download started..."));
    assert_eq!(messages[2].0, NotificationKind::Error);
    assert_eq!(messages[3], (NotificationKind::Converting, "Converting to audio..."));
    assert_eq!(messages[4], (NotificationKind::Finished, "Conversion finished"));
    assert_eq!(messages[5], (NotificationKind::ConnectionStatus, "disconnected"));

    shutdown.cancel();
    handle.await.unwrap();
}
