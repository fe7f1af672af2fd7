//! End-to-end tests: real sockets on both sides of the proxy.

mod common;

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use common::*;
use pipeline::proxy::dialer::DIAL_TIMEOUT;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[tokio::test]
async fn test_sequential_requests_rotate_backends() {
    let (a, a_hits) = start_named_backend("A").await;
    let (b, b_hits) = start_named_backend("B").await;
    let proxy = start_proxy(&[a, b], DIAL_TIMEOUT).await;

    let mut bodies = Vec::new();
    for _ in 0..3 {
        let response = roundtrip(proxy, b"GET / HTTP/1.1\r\nHost: test\r\n\r\n").await;
        let (head, body) = split_response(&response);
        assert!(head.starts_with("HTTP/1.1 200 OK"), "{head}");
        bodies.push(String::from_utf8(body).unwrap());
    }

    assert_eq!(bodies, vec!["A", "B", "A"]);
    assert_eq!(a_hits.load(Ordering::SeqCst), 2);
    assert_eq!(b_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_request_reaches_backend_verbatim() {
    let backend = start_echo_backend().await;
    let proxy = start_proxy(&[backend], DIAL_TIMEOUT).await;

    let request = b"GET /hello HTTP/1.1\r\nHost: test\r\nX-Test: 1\r\n\r\n";
    let response = roundtrip(proxy, request).await;
    let (_, body) = split_response(&response);
    let body = String::from_utf8(body).unwrap();

    assert!(body.contains("GET"));
    assert!(body.contains("X-Test: 1"));
    assert_eq!(body.as_bytes(), request);
}

#[tokio::test]
async fn test_unusual_header_bytes_reach_backend_verbatim() {
    let backend = start_echo_backend().await;
    let proxy = start_proxy(&[backend], DIAL_TIMEOUT).await;

    let request = b"GET / HTTP/1.1\r\nHost:t\r\nX-A:   v  \r\nX-Name: caf\xe9\r\n\r\n";
    let response = roundtrip(proxy, request).await;
    let (head, body) = split_response(&response);

    assert!(head.starts_with("HTTP/1.1 200 OK"), "{head}");
    assert_eq!(body, request.to_vec());
}

#[tokio::test]
async fn test_request_body_reaches_backend_verbatim() {
    let backend = start_echo_backend().await;
    let proxy = start_proxy(&[backend], DIAL_TIMEOUT).await;

    let request = b"POST /submit HTTP/1.1\r\nHost: test\r\nContent-Length: 9\r\n\r\nkey=value";
    let response = roundtrip(proxy, request).await;
    let (_, body) = split_response(&response);

    assert_eq!(body, request.to_vec());
}

// Documents current behaviour: Host is not rewritten and no forwarding
// headers are added on the way to the backend.
#[tokio::test]
async fn test_proxy_headers_are_not_rewritten() {
    let backend = start_echo_backend().await;
    let proxy = start_proxy(&[backend], DIAL_TIMEOUT).await;

    let request = b"GET / HTTP/1.1\r\nHost: public.example\r\nConnection: keep-alive\r\n\r\n";
    let response = roundtrip(proxy, request).await;
    let (_, body) = split_response(&response);
    let body = String::from_utf8(body).unwrap();

    assert!(body.contains("Host: public.example\r\n"));
    assert!(body.contains("Connection: keep-alive\r\n"));
    assert!(!body.contains("X-Forwarded-For"));
}

#[tokio::test]
async fn test_refused_backend_yields_500() {
    let backend = closed_port().await;
    let proxy = start_proxy(&[backend], DIAL_TIMEOUT).await;

    let response = roundtrip(proxy, b"GET / HTTP/1.1\r\nHost: test\r\n\r\n").await;
    let (head, body) = split_response(&response);

    assert!(head.starts_with("HTTP/1.1 500 Internal Server Error"), "{head}");
    assert!(head.contains("Connection: close"));
    assert_eq!(body, b"500 Internal Server Error".to_vec());
}

#[tokio::test]
async fn test_unreachable_backend_yields_500_within_dial_timeout() {
    let dial_timeout = Duration::from_millis(300);
    // Non-routable: the dial either hangs until the timeout or fails outright
    let proxy = start_proxy(&["10.255.255.1:81".to_string()], dial_timeout).await;

    let started = Instant::now();
    let response = roundtrip(proxy, b"GET / HTTP/1.1\r\nHost: test\r\n\r\n").await;
    let elapsed = started.elapsed();

    let (head, _) = split_response(&response);
    assert!(head.starts_with("HTTP/1.1 500"), "{head}");
    assert!(elapsed < dial_timeout + Duration::from_secs(1), "took {elapsed:?}");
}

#[tokio::test]
async fn test_down_backend_still_gets_its_turn() {
    let (a, a_hits) = start_named_backend("A").await;
    let down = closed_port().await;
    let proxy = start_proxy(&[a, down], DIAL_TIMEOUT).await;

    let first = roundtrip(proxy, b"GET / HTTP/1.1\r\n\r\n").await;
    let second = roundtrip(proxy, b"GET / HTTP/1.1\r\n\r\n").await;
    let third = roundtrip(proxy, b"GET / HTTP/1.1\r\n\r\n").await;

    assert_eq!(split_response(&first).1, b"A".to_vec());
    assert!(split_response(&second).0.starts_with("HTTP/1.1 500"));
    assert_eq!(split_response(&third).1, b"A".to_vec());
    assert_eq!(a_hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_malformed_request_yields_500_without_dialing() {
    let (backend, hits) = start_named_backend("A").await;
    let proxy = start_proxy(&[backend], DIAL_TIMEOUT).await;

    let response = roundtrip(proxy, b"GET / HTTP/1.1\r\nBroken header line\r\n\r\n").await;
    let (head, _) = split_response(&response);

    assert!(head.starts_with("HTTP/1.1 500"), "{head}");
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_client_disconnect_closes_backend_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend = listener.local_addr().unwrap().to_string();
    let proxy = start_proxy(&[backend], DIAL_TIMEOUT).await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    client
        .write_all(b"GET /slow HTTP/1.1\r\nHost: test\r\n\r\n")
        .await
        .unwrap();

    let (mut upstream, _) = tokio::time::timeout(IO_TIMEOUT, listener.accept())
        .await
        .unwrap()
        .unwrap();
    read_one_request(&mut upstream).await;

    // Client gives up before the backend answers
    drop(client);

    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(2), upstream.read(&mut buf))
        .await
        .expect("backend connection was left open")
        .unwrap_or(0);
    assert_eq!(n, 0);
}

#[tokio::test]
async fn test_pipelined_bytes_follow_the_first_request() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend = listener.local_addr().unwrap().to_string();
    let proxy = start_proxy(&[backend], DIAL_TIMEOUT).await;

    let backend_task = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let expected: &[u8] = b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n";
        let mut received = vec![0u8; expected.len()];
        socket.read_exact(&mut received).await.unwrap();
        socket
            .write_all(b"HTTP/1.1 204 No Content\r\n\r\nHTTP/1.1 204 No Content\r\n\r\n")
            .await
            .unwrap();
        socket.shutdown().await.unwrap();
        received == expected
    });

    let response = roundtrip(proxy, b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n").await;

    assert!(backend_task.await.unwrap());
    assert_eq!(
        response,
        b"HTTP/1.1 204 No Content\r\n\r\nHTTP/1.1 204 No Content\r\n\r\n".to_vec()
    );
}

#[tokio::test]
async fn test_large_response_is_relayed_whole() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend = listener.local_addr().unwrap().to_string();
    let proxy = start_proxy(&[backend], DIAL_TIMEOUT).await;

    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_one_request(&mut socket).await;
        let head = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", payload.len());
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(&payload).await.unwrap();
        socket.shutdown().await.unwrap();
    });

    let response = roundtrip(proxy, b"GET /big HTTP/1.1\r\n\r\n").await;
    let (_, body) = split_response(&response);

    assert_eq!(body.len(), expected.len());
    assert!(body == expected);
}

#[tokio::test]
async fn test_concurrent_exchanges_are_independent() {
    let backend = start_echo_backend().await;
    let proxy = start_proxy(&[backend], DIAL_TIMEOUT).await;

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            tokio::spawn(async move {
                let request = format!("GET /item/{i} HTTP/1.1\r\nHost: test\r\n\r\n");
                let response = roundtrip(proxy, request.as_bytes()).await;
                let (_, body) = split_response(&response);
                body == request.into_bytes()
            })
        })
        .collect();

    for task in tasks {
        assert!(task.await.unwrap());
    }
}

#[tokio::test]
async fn test_client_closing_without_request_is_quiet() {
    let (backend, hits) = start_named_backend("A").await;
    let proxy = start_proxy(&[backend], DIAL_TIMEOUT).await;

    let client = TcpStream::connect(proxy).await.unwrap();
    drop(client);

    // Give the proxy a moment to notice, then prove it still serves
    tokio::time::sleep(Duration::from_millis(50)).await;
    let response = roundtrip(proxy, b"GET / HTTP/1.1\r\n\r\n").await;

    assert_eq!(split_response(&response).1, b"A".to_vec());
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
