//! End-to-end tests for the HTTP exposition server over real sockets.

use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use dca_common::{Error, ProcessId, ProgramId};
use dca_core::clock::ManualClock;
use dca_core::http::{HttpConfig, HttpServer, ServerStage};
use dca_core::provider::ScriptedProvider;
use dca_core::telemetry::{DetectionConfig, DetectionPoller, Telemetry};

fn loopback_config() -> HttpConfig {
    HttpConfig {
        bind: Ipv4Addr::LOCALHOST,
        port: 0,
        ..HttpConfig::default()
    }
}

fn start() -> (HttpServer, std::sync::Arc<Telemetry>) {
    let telemetry = Telemetry::shared(0);
    let server = HttpServer::start(telemetry.clone(), loopback_config()).unwrap();
    (server, telemetry)
}

/// Send `request` and read until the server closes the connection.
fn exchange(addr: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    stream.write_all(request).unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).unwrap();
    String::from_utf8(response).unwrap()
}

fn split(response: &str) -> (&str, &str) {
    response.split_once("\r\n\r\n").unwrap()
}

fn content_length(head: &str) -> usize {
    head.lines()
        .find_map(|line| line.strip_prefix("Content-Length: "))
        .unwrap()
        .trim()
        .parse()
        .unwrap()
}

// ============================================================================
// Routing
// ============================================================================

#[test]
fn state_route_serves_telemetry() {
    let (server, telemetry) = start();
    telemetry.set_firmware(Some("19.0.1|AMS 1.9.0"));

    let response = exchange(server.local_addr(), b"GET /state HTTP/1.1\r\nHost: x\r\n\r\n");
    let (head, body) = split(&response);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(head.contains("Content-Type: application/json"));
    assert!(head.contains("Access-Control-Allow-Origin: *"));
    assert!(head.contains("Connection: close"));
    assert_eq!(content_length(head), body.len());

    let v: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(v["service"], "SwitchDCActivity");
    assert_eq!(v["firmware"], "19.0.1|AMS 1.9.0");
    assert_eq!(v["active_program_id"], "0x0000000000000000");
    assert_eq!(v.as_object().unwrap().len(), 20);
}

#[test]
fn root_route_is_state() {
    let (server, _telemetry) = start();
    let response = exchange(server.local_addr(), b"GET / HTTP/1.1\r\n\r\n");
    let (head, body) = split(&response);
    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert!(body.contains("\"service\":\"SwitchDCActivity\""));
}

#[test]
fn published_program_is_visible() {
    let (server, telemetry) = start();
    let provider = ScriptedProvider::new()
        .with_shell(ProcessId(81))
        .with_program(ProcessId(81), ProgramId(0x0100_0000_0000_2000));
    let poller = DetectionPoller::new(provider, ManualClock::new(0), DetectionConfig::default());
    poller.update(&telemetry, true);
    poller.clock().advance(3);
    poller.update(&telemetry, true);

    let response = exchange(server.local_addr(), b"GET /state HTTP/1.1\r\n\r\n");
    let (_, body) = split(&response);
    let v: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(v["active_program_id"], "0x0100000000002000");
    assert_eq!(v["active_game"], "0x0100000000002000");
}

#[test]
fn unknown_routes_get_exact_404() {
    let (server, _telemetry) = start();
    for request in [
        &b"GET /unknown HTTP/1.1\r\n\r\n"[..],
        b"POST /state HTTP/1.1\r\n\r\n",
        b"garbage",
    ] {
        let response = exchange(server.local_addr(), request);
        assert_eq!(
            response,
            "HTTP/1.1 404 Not Found\r\nConnection: close\r\nContent-Length: 0\r\n\r\n"
        );
    }
}

#[test]
fn empty_request_gets_404_and_counts() {
    let (server, _telemetry) = start();
    let mut stream = TcpStream::connect(server.local_addr()).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    stream.shutdown(std::net::Shutdown::Write).unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();
    assert!(response.starts_with("HTTP/1.1 404 Not Found"));
    assert_eq!(server.status().request_count(), 1);
}

// ============================================================================
// Debug counters
// ============================================================================

#[test]
fn debug_route_reports_counters() {
    let (server, _telemetry) = start();
    exchange(server.local_addr(), b"GET /state HTTP/1.1\r\n\r\n");
    exchange(server.local_addr(), b"GET /nope HTTP/1.1\r\n\r\n");

    let response = exchange(server.local_addr(), b"GET /debug HTTP/1.1\r\n\r\n");
    let (head, body) = split(&response);
    assert_eq!(content_length(head), body.len());
    let v: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(v["running"], true);
    assert_eq!(v["listening"], true);
    assert_eq!(v["stage"], ServerStage::Serving.code());
    assert_eq!(v["port"], server.local_addr().port());
    assert_eq!(v["accepted_count"], 3);
    assert_eq!(v["request_count"], 3);
    assert_eq!(v["last_errno"], 0);
    assert!(v["listen_fd"].as_i64().unwrap() >= 0);
}

#[test]
fn counters_grow_monotonically() {
    let (server, _telemetry) = start();
    let mut previous = 0;
    for _ in 0..5 {
        exchange(server.local_addr(), b"GET /state HTTP/1.1\r\n\r\n");
        let accepted = server.status().accepted_count();
        assert!(accepted > previous);
        assert!(server.status().request_count() <= accepted);
        previous = accepted;
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn stop_joins_and_closes_listener() {
    let (mut server, _telemetry) = start();
    let addr = server.local_addr();
    assert!(server.is_running());

    server.stop();
    assert!(!server.is_running());
    assert!(!server.status().is_running());
    assert!(TcpStream::connect_timeout(&addr, Duration::from_millis(500)).is_err());

    // Idempotent.
    server.stop();
}

#[test]
fn stop_is_prompt() {
    let (mut server, _telemetry) = start();
    std::thread::sleep(Duration::from_millis(50));
    let started = std::time::Instant::now();
    server.stop();
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[test]
fn occupied_port_fails_start() {
    let holder = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = holder.local_addr().unwrap().port();

    let config = HttpConfig {
        port,
        ..loopback_config()
    };
    let err = HttpServer::start(Telemetry::shared(0), config).unwrap_err();
    assert!(matches!(err, Error::Socket { stage: "bind", .. }));
    assert_eq!(err.errno(), Some(libc::EADDRINUSE));
}

#[test]
fn drop_stops_server() {
    let addr = {
        let (server, _telemetry) = start();
        server.local_addr()
    };
    assert!(TcpStream::connect_timeout(&addr, Duration::from_millis(500)).is_err());
}
