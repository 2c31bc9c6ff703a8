// Common test helpers for auraflowd integration tests
//
// This module provides utilities for:
// - Writing detector recordings
// - Collecting broadcast messages
// - Talking to the WebSocket server without a client library

#![allow(dead_code)]

use auraflowd::broadcast::{BroadcastError, ClientSink};
use futures_util::future::BoxFuture;
use serde_json::json;
use shared::ServerMessage;
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub const NOSE: usize = 0;
pub const LEFT_WRIST: usize = 15;
pub const RIGHT_WRIST: usize = 16;
pub const RIGHT_INDEX: usize = 20;

/// A 33-point pose with hands low and apart, overridden at the given indices.
pub fn pose(overrides: &[(usize, (f64, f64))]) -> Vec<[f64; 2]> {
    let mut points = vec![[0.5, 0.8]; 33];
    points[NOSE] = [0.5, 0.3];
    points[LEFT_WRIST] = [0.7, 0.8];
    points[RIGHT_WRIST] = [0.3, 0.8];
    points[RIGHT_INDEX] = [0.5, 0.5];
    for (index, (x, y)) in overrides {
        points[*index] = [*x, *y];
    }
    points
}

/// 21 hand points with every finger curled.
pub fn fist() -> Vec<[f64; 2]> {
    let mut points = vec![[0.5, 0.5]; 21];
    points[0] = [0.5, 0.9];
    points
}

pub fn frame(pose: Option<Vec<[f64; 2]>>, hands: &[(&str, Vec<[f64; 2]>)]) -> String {
    let hands: Vec<_> = hands
        .iter()
        .map(|(label, landmarks)| json!({"label": label, "score": 0.9, "landmarks": landmarks}))
        .collect();
    json!({"pose": pose, "hands": hands}).to_string()
}

pub fn write_recording(dir: &Path, name: &str, lines: &[String]) -> PathBuf {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
    path
}

/// Broadcast sink that keeps every decoded message.
#[derive(Default)]
pub struct CollectingClient {
    pub received: Mutex<Vec<ServerMessage>>,
}

impl CollectingClient {
    pub fn messages(&self) -> Vec<ServerMessage> {
        self.received.lock().unwrap().clone()
    }
}

impl ClientSink for CollectingClient {
    fn send<'a>(&'a self, payload: &'a str) -> BoxFuture<'a, Result<(), BroadcastError>> {
        Box::pin(async move {
            let message: ServerMessage = serde_json::from_str(payload)?;
            self.received.lock().unwrap().push(message);
            Ok(())
        })
    }
}

/// Open a WebSocket by hand and return the stream positioned after the
/// handshake response.
pub async fn ws_connect(addr: SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET / HTTP/1.1\r\nHost: {}\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\
         Sec-WebSocket-Version: 13\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
        addr
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).await.unwrap();
        head.push(byte[0]);
    }
    let head = String::from_utf8_lossy(&head);
    assert!(head.starts_with("HTTP/1.1 101"), "handshake failed: {}", head);
    stream
}

/// Read one unmasked server text frame.
pub async fn read_text_frame(stream: &mut TcpStream) -> String {
    tokio::time::timeout(Duration::from_secs(5), async {
        let mut header = [0u8; 2];
        stream.read_exact(&mut header).await.unwrap();
        assert_eq!(header[0] & 0x0f, 0x1, "expected a text frame");

        let len = match header[1] & 0x7f {
            126 => {
                let mut ext = [0u8; 2];
                stream.read_exact(&mut ext).await.unwrap();
                u16::from_be_bytes(ext) as usize
            }
            127 => {
                let mut ext = [0u8; 8];
                stream.read_exact(&mut ext).await.unwrap();
                u64::from_be_bytes(ext) as usize
            }
            n => n as usize,
        };

        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload).await.unwrap();
        String::from_utf8(payload).unwrap()
    })
    .await
    .expect("timed out waiting for a frame")
}
