//! Shared helpers for the end-to-end tests: mock backends and a proxy bound
//! to an ephemeral port.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use pipeline::http::parser::{ParseError, parse_http_request};
use pipeline::proxy::{ProxyHandler, UpstreamPool};
use pipeline::server::listener;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Starts a proxy in front of `backends` and returns its address.
pub async fn start_proxy(backends: &[String], dial_timeout: Duration) -> SocketAddr {
    let pool = UpstreamPool::from_addresses(backends.iter().cloned()).unwrap();
    let handler = ProxyHandler::with_dial_timeout(pool, dial_timeout);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(listener::serve(listener, handler));
    addr
}

/// Reads from `socket` until one full request has arrived.
pub async fn read_one_request(socket: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    loop {
        match parse_http_request(&buf) {
            Ok((_, consumed)) => {
                buf.truncate(consumed);
                return buf;
            }
            Err(ParseError::Incomplete) => {}
            Err(e) => panic!("backend got a malformed request: {e}"),
        }

        let mut chunk = [0u8; 1024];
        let n = socket.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed before the request was complete");
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn ok_response(body: &[u8]) -> Vec<u8> {
    let mut response = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    )
    .into_bytes();
    response.extend_from_slice(body);
    response
}

/// A backend that answers every request with `name` and counts connections.
pub async fn start_named_backend(name: &'static str) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let hits = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&hits);
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                read_one_request(&mut socket).await;
                let _ = socket.write_all(&ok_response(name.as_bytes())).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, hits)
}

/// A backend that answers with the exact bytes of the request it received.
pub async fn start_echo_backend() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let request = read_one_request(&mut socket).await;
                let _ = socket.write_all(&ok_response(&request)).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// An address nothing is listening on.
pub async fn closed_port() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    addr
}

/// Sends `raw` to the proxy and reads until the proxy closes the connection.
pub async fn roundtrip(proxy: SocketAddr, raw: &[u8]) -> Vec<u8> {
    let mut client = TcpStream::connect(proxy).await.unwrap();
    client.write_all(raw).await.unwrap();

    let mut response = Vec::new();
    tokio::time::timeout(IO_TIMEOUT, client.read_to_end(&mut response))
        .await
        .expect("proxy did not close the connection")
        .unwrap();
    response
}

/// Splits a response into its head (as text) and body.
pub fn split_response(raw: &[u8]) -> (String, Vec<u8>) {
    let end = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response has no header terminator");
    (
        String::from_utf8_lossy(&raw[..end]).to_string(),
        raw[end + 4..].to_vec(),
    )
}
