//! Minimal HTTP/1.1 server that serves an HLS stream for integration tests.
//!
//! Serves `/master.m3u8` (two renditions, relative and absolute URIs),
//! `/hi/index.m3u8` and its segments. Per-path hit counters, injected 500s
//! and stalled responses let tests exercise retry, failure and cancellation.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Default)]
struct State {
    bodies: HashMap<String, Vec<u8>>,
    hits: HashMap<String, usize>,
    failures_left: HashMap<String, usize>,
    stalled: HashMap<String, bool>,
}

#[derive(Clone)]
pub struct HlsServer {
    base: String,
    state: Arc<Mutex<State>>,
}

/// Body of segment `i`; lengths vary so misordered output cannot go unnoticed.
pub fn segment_body(i: usize) -> Vec<u8> {
    let mut body = format!("[segment {i:04}]").into_bytes();
    body.extend(std::iter::repeat(b'a' + (i % 26) as u8).take(100 + i * 37));
    body
}

pub fn expected_output(segments: usize) -> Vec<u8> {
    (0..segments).flat_map(segment_body).collect()
}

pub fn segment_path(i: usize) -> String {
    format!("/hi/seg-{i}.ts")
}

impl HlsServer {
    /// Start a server in a background thread with `segments` segments in the
    /// high rendition. The server runs until the process exits.
    pub fn start(segments: usize) -> HlsServer {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().unwrap().port();
        let base = format!("http://127.0.0.1:{port}");
        let server = HlsServer {
            base: base.clone(),
            state: Arc::new(Mutex::new(State::default())),
        };

        let master = format!(
            "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360
{base}/lo/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=5000000,RESOLUTION=1920x1080
hi/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=64000
audio/index.m3u8
"
        );
        let mut media = String::from("#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXT-X-MEDIA-SEQUENCE:0\n");
        for i in 0..segments {
            media.push_str(&format!("#EXTINF:4.0,\nseg-{i}.ts\n"));
        }
        media.push_str("#EXT-X-ENDLIST\n");

        {
            let mut st = server.state.lock().unwrap();
            st.bodies.insert("/master.m3u8".into(), master.into_bytes());
            st.bodies.insert("/hi/index.m3u8".into(), media.clone().into_bytes());
            for i in 0..segments {
                st.bodies.insert(segment_path(i), segment_body(i));
            }
        }

        let state = Arc::clone(&server.state);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let state = Arc::clone(&state);
                thread::spawn(move || handle(stream, &state));
            }
        });
        server
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn master_url(&self) -> String {
        self.url("/master.m3u8")
    }

    pub fn hits(&self, path: &str) -> usize {
        self.state.lock().unwrap().hits.get(path).copied().unwrap_or(0)
    }

    /// Answer the next `n` requests for `path` with 500.
    pub fn fail_next(&self, path: &str, n: usize) {
        self.state.lock().unwrap().failures_left.insert(path.to_string(), n);
    }

    /// While stalled, requests for `path` get no response at all.
    pub fn stall(&self, path: &str, stalled: bool) {
        self.state.lock().unwrap().stalled.insert(path.to_string(), stalled);
    }
}

enum Reply {
    Body(Vec<u8>),
    Status(&'static str),
    Stall,
}

fn handle(mut stream: TcpStream, state: &Mutex<State>) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let request = match std::str::from_utf8(&buf[..n]) {
        Ok(s) => s,
        Err(_) => return,
    };
    let path = match parse_request(request) {
        Some(("GET", path)) => path.to_string(),
        _ => {
            let _ = stream
                .write_all(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\n\r\n");
            return;
        }
    };

    let mut reply = next_reply(state, &path);
    // Hold the connection open while stalled; the client is expected to give up.
    let stalled_since = Instant::now();
    while matches!(reply, Reply::Stall) {
        if stalled_since.elapsed() > Duration::from_secs(30) {
            return;
        }
        thread::sleep(Duration::from_millis(20));
        if !state.lock().unwrap().stalled.get(&path).copied().unwrap_or(false) {
            reply = serve(state, &path);
        }
    }

    let (status, body) = match reply {
        Reply::Body(b) => ("200 OK", b),
        Reply::Status(s) => (s, Vec::new()),
        Reply::Stall => return,
    };
    let header = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&body);
}

fn next_reply(state: &Mutex<State>, path: &str) -> Reply {
    let mut st = state.lock().unwrap();
    *st.hits.entry(path.to_string()).or_default() += 1;
    if st.stalled.get(path).copied().unwrap_or(false) {
        return Reply::Stall;
    }
    if let Some(left) = st.failures_left.get_mut(path) {
        if *left > 0 {
            *left -= 1;
            return Reply::Status("500 Internal Server Error");
        }
    }
    drop(st);
    serve(state, path)
}

fn serve(state: &Mutex<State>, path: &str) -> Reply {
    match state.lock().unwrap().bodies.get(path) {
        Some(b) => Reply::Body(b.clone()),
        None => Reply::Status("404 Not Found"),
    }
}

/// Returns (method, path) from the request line.
fn parse_request(request: &str) -> Option<(&str, &str)> {
    let line = request.lines().next()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?;
    let path = parts.next()?;
    Some((method, path))
}
