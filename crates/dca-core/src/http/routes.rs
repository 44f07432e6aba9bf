//! Request classification and response framing.
//!
//! Routing is a prefix match on the raw bytes of the first read; there is no
//! HTTP parser.

/// Largest request read from a client, in bytes.
pub const MAX_REQUEST_BYTES: usize = 1023;

/// Response for anything that is not a known route.
pub const NOT_FOUND_RESPONSE: &[u8] =
    b"HTTP/1.1 404 Not Found\r\nConnection: close\r\nContent-Length: 0\r\n\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Debug,
    State,
    NotFound,
}

/// Classify a raw request by its leading bytes.
pub fn classify(request: &[u8]) -> Route {
    if request.starts_with(b"GET /debug") {
        Route::Debug
    } else if request.starts_with(b"GET /state") || request.starts_with(b"GET / ") {
        Route::State
    } else {
        Route::NotFound
    }
}

/// Frame a JSON body as a complete `200 OK` response.
pub fn json_response(body: &str) -> Vec<u8> {
    let head = format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: application/json\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Connection: close\r\n\
         Content-Length: {}\r\n\
         \r\n",
        body.len()
    );
    let mut out = Vec::with_capacity(head.len() + body.len());
    out.extend_from_slice(head.as_bytes());
    out.extend_from_slice(body.as_bytes());
    out
}
