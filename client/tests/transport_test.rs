//! `SignalingTransport` reconnection-bound scenario (§8, property 10):
//! after the server goes away, the client attempts to reconnect at most
//! five times before giving up and reporting `CONN_LOST`.

use std::time::Duration;

use tokio::net::TcpListener;

use voicesync_client::transport::{SignalingTransport, TransportEvent};

#[tokio::test]
async fn reconnect_gives_up_after_five_attempts_and_reports_conn_lost() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");

    // Accept exactly one connection, upgrade it, then drop everything —
    // simulating the server process dying mid-call.
    let accept_task = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept one connection");
        let ws = tokio_tungstenite::accept_async(stream).await.expect("websocket upgrade");
        drop(ws);
        drop(listener);
    });

    let (transport, mut events) = SignalingTransport::new(format!("ws://{addr}"));
    transport.connect().await.expect("initial connect should succeed");
    accept_task.await.expect("accept task should finish");

    let outcome = tokio::time::timeout(Duration::from_secs(40), async {
        let mut saw_conn_lost = false;
        loop {
            match events.recv().await {
                Some(TransportEvent::Error(error)) if error.code() == "CONN_LOST" => {
                    saw_conn_lost = true;
                }
                Some(TransportEvent::Closed) => return saw_conn_lost,
                Some(_) => continue,
                None => return saw_conn_lost,
            }
        }
    })
    .await
    .expect("transport should give up and close within the timeout");

    assert!(outcome, "expected a CONN_LOST error before the transport closed");
}
