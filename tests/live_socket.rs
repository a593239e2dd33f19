use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use simdash::sample::LiveMetric;
use simdash::session::{session, SessionView};
use simdash::stream::{ReconnectingStreamClient, StreamTiming, WsConnector};

/// Serves one script per accepted connection, in order. After its script a
/// connection either closes or idles until the peer goes away.
async fn spawn_ws_server(scripts: Vec<(Vec<&'static str>, bool)>) -> (Url, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let accepted_srv = accepted.clone();
    tokio::spawn(async move {
        let mut scripts = scripts.into_iter();
        while let Ok((sock, _)) = listener.accept().await {
            accepted_srv.fetch_add(1, Ordering::SeqCst);
            let (messages, close_after) = scripts.next().unwrap_or((Vec::new(), false));
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(sock).await else {
                    return;
                };
                for text in messages {
                    if ws.send(Message::Text(text.to_string())).await.is_err() {
                        return;
                    }
                }
                if close_after {
                    let _ = ws.close(None).await;
                }
                while let Some(Ok(_)) = ws.next().await {}
            });
        }
    });
    (Url::parse(&format!("ws://{}/ws", addr)).unwrap(), accepted)
}

fn timing() -> StreamTiming {
    StreamTiming {
        reconnect_delay: Duration::from_millis(50),
        watchdog_period: Duration::from_secs(30),
        max_silence: Duration::from_secs(30),
        connect_timeout: Duration::from_secs(2),
    }
}

async fn wait_for_len(view: &SessionView, len: usize) {
    let mut rx = view.live.clone();
    tokio::time::timeout(Duration::from_secs(5), async {
        while rx.borrow_and_update().len() < len {
            if rx.changed().await.is_err() {
                break;
            }
        }
    })
    .await
    .expect("live snapshot never reached expected length");
}

#[tokio::test]
async fn out_of_order_and_malformed_messages_are_dropped() {
    let (url, _) = spawn_ws_server(vec![(
        vec![
            r#"{"time_step":1,"vehicle_count":10,"using_custom_algo":true}"#,
            r#"{"time_step":2,"vehicle_count":11}"#,
            r#"{"time_step":2,"vehicle_count":99}"#,
            r#"{"time_step":1,"vehicle_count":99}"#,
            "{not json",
            r#"{"time_step":3,"vehicle_count":12}"#,
        ],
        false,
    )])
    .await;

    let (live, _, view) = session(200);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut client = ReconnectingStreamClient::new(WsConnector, url, timing(), live);
    let task = tokio::spawn(async move {
        client.run(shutdown_rx).await;
        client.stats()
    });

    wait_for_len(&view, 3).await;
    let snapshot = view.live.borrow().clone();
    assert_eq!(snapshot.time_indices, vec![1, 2, 3]);
    assert_eq!(snapshot.series(LiveMetric::VehicleCount), &[10.0, 11.0, 12.0]);
    assert!(*view.started.borrow());

    shutdown_tx.send(true).unwrap();
    let stats = task.await.unwrap();
    assert_eq!(stats.accepted, 3);
    assert_eq!(stats.rejected, 2);
    assert_eq!(stats.malformed, 1);
}

#[tokio::test]
async fn peer_close_reconnects_and_keeps_ordering() {
    let (url, accepted) = spawn_ws_server(vec![
        (vec![r#"{"time_step":4}"#, r#"{"time_step":5}"#], true),
        (vec![r#"{"time_step":3}"#, r#"{"time_step":6}"#], false),
    ])
    .await;

    let (live, _, view) = session(200);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut client = ReconnectingStreamClient::new(WsConnector, url, timing(), live);
    let task = tokio::spawn(async move {
        client.run(shutdown_rx).await;
        client.stats()
    });

    wait_for_len(&view, 3).await;
    assert_eq!(view.live.borrow().time_indices, vec![4, 5, 6]);
    assert_eq!(accepted.load(Ordering::SeqCst), 2);

    shutdown_tx.send(true).unwrap();
    let stats = task.await.unwrap();
    assert_eq!(stats.connect_attempts, 2);
    assert_eq!(stats.reconnects_scheduled, 1);
    assert_eq!(stats.rejected, 1);
}

#[tokio::test]
async fn silent_stream_is_replaced_by_watchdog() {
    let (url, accepted) = spawn_ws_server(vec![(Vec::new(), false), (Vec::new(), false)]).await;

    let (live, _, _view) = session(200);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let timing = StreamTiming {
        watchdog_period: Duration::from_millis(100),
        max_silence: Duration::from_millis(100),
        ..timing()
    };
    let mut client = ReconnectingStreamClient::new(WsConnector, url, timing, live);
    let task = tokio::spawn(async move {
        client.run(shutdown_rx).await;
        client.stats()
    });

    tokio::time::sleep(Duration::from_millis(450)).await;
    shutdown_tx.send(true).unwrap();
    let stats = task.await.unwrap();
    assert!(stats.forced_reconnects >= 1);
    assert!(accepted.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn ping_is_answered_once() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = Url::parse(&format!("ws://{}/ws", listener.local_addr().unwrap())).unwrap();
    let pongs = Arc::new(AtomicUsize::new(0));
    let pongs_srv = pongs.clone();
    let server = tokio::spawn(async move {
        let (sock, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(sock).await.unwrap();
        ws.send(Message::Ping(b"hb".to_vec())).await.unwrap();
        ws.send(Message::Text(r#"{"time_step":1}"#.to_string())).await.unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            match msg {
                Message::Pong(payload) => {
                    assert_eq!(payload, b"hb".to_vec());
                    pongs_srv.fetch_add(1, Ordering::SeqCst);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    let (live, _, view) = session(200);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut client = ReconnectingStreamClient::new(WsConnector, url, timing(), live);
    let task = tokio::spawn(async move {
        client.run(shutdown_rx).await;
        client.stats()
    });

    wait_for_len(&view, 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown_tx.send(true).unwrap();
    let stats = task.await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
    assert_eq!(stats.accepted, 1);
    assert_eq!(pongs.load(Ordering::SeqCst), 1);
}
