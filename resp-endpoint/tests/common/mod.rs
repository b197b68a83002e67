//! In-process RESP server for integration tests
//!
//! Each request is decoded into its words and passed to a handler that
//! returns the replies to write, possibly none.

#![allow(dead_code)]

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use resp_endpoint::protocol::{RespDecoder, RespEncoder};
use resp_endpoint::{HostAndPort, RespValue};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

pub type Handler = Arc<dyn Fn(&[String]) -> Vec<RespValue> + Send + Sync>;

pub struct FakeServer {
    pub addr: HostAndPort,
    requests: Arc<Mutex<Vec<Vec<String>>>>,
    peers: Arc<Mutex<Vec<mpsc::UnboundedSender<Bytes>>>>,
    accepted: Arc<AtomicUsize>,
}

impl FakeServer {
    pub async fn start(handler: Handler) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let peers = Arc::new(Mutex::new(Vec::new()));
        let accepted = Arc::new(AtomicUsize::new(0));

        let (log, registry, counter) = (requests.clone(), peers.clone(), accepted.clone());
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let (tx, rx) = mpsc::unbounded_channel();
                registry.lock().push(tx);
                tokio::spawn(serve(socket, rx, handler.clone(), log.clone()));
            }
        });

        Self {
            addr: HostAndPort::new("127.0.0.1", port),
            requests,
            peers,
            accepted,
        }
    }

    pub fn url(&self) -> String {
        format!("redis://{}", self.addr)
    }

    /// Write `value` to every open connection
    pub fn push(&self, value: &RespValue) {
        let frame = RespEncoder::to_bytes(value);
        for peer in self.peers.lock().iter() {
            let _ = peer.send(frame.clone());
        }
    }

    /// Drop every open connection
    pub fn kill_connections(&self) {
        self.peers.lock().clear();
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Vec<String>> {
        self.requests.lock().clone()
    }

    pub fn count(&self, keyword: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|words| words.first().is_some_and(|w| w.eq_ignore_ascii_case(keyword)))
            .count()
    }

    /// Wait until `keyword` was received at least `n` times
    pub async fn wait_for(&self, keyword: &str, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.count(keyword) < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("server never received {n} x {keyword}"));
    }
}

async fn serve(
    socket: tokio::net::TcpStream,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    handler: Handler,
    log: Arc<Mutex<Vec<Vec<String>>>>,
) {
    let (mut reader, mut writer) = socket.into_split();
    let mut decoder = RespDecoder::new();
    let mut buf = BytesMut::new();
    loop {
        tokio::select! {
            read = reader.read_buf(&mut buf) => {
                match read {
                    Ok(0) | Err(_) => return,
                    Ok(_) => {}
                }
                while let Some(request) = decoder.decode(&mut buf).unwrap() {
                    let words = words(request);
                    log.lock().push(words.clone());
                    for reply in handler(&words) {
                        if writer.write_all(&RespEncoder::to_bytes(&reply)).await.is_err() {
                            return;
                        }
                    }
                }
            }
            pushed = rx.recv() => match pushed {
                Some(frame) => {
                    if writer.write_all(&frame).await.is_err() {
                        return;
                    }
                }
                None => return,
            },
        }
    }
}

fn words(request: RespValue) -> Vec<String> {
    request
        .into_array()
        .unwrap()
        .iter()
        .map(|word| word.as_string().unwrap())
        .collect()
}

pub fn bulk(s: &str) -> RespValue {
    RespValue::BulkString(Bytes::copy_from_slice(s.as_bytes()))
}

pub fn ok() -> RespValue {
    RespValue::SimpleString("OK".to_string())
}

/// Replies the way a server does to the common commands used in tests
pub fn default_reply(words: &[String]) -> Vec<RespValue> {
    match words[0].to_ascii_uppercase().as_str() {
        "PING" => vec![RespValue::SimpleString("PONG".to_string())],
        "AUTH" | "SELECT" | "SET" => vec![ok()],
        "GET" | "ECHO" => vec![bulk(&words[1])],
        "PUBLISH" => vec![RespValue::Integer(1)],
        "BLPOP" => Vec::new(),
        _ => vec![RespValue::Error(format!("ERR unknown command '{}'", words[0]))],
    }
}
