#![allow(dead_code)]
use std::{
    collections::HashSet,
    net::{SocketAddr, TcpListener as StdTcpListener},
    sync::{Arc, Mutex},
    time::Duration,
};

use base64::Engine;
use http_body_util::{BodyExt, Full};
use hyper::{
    body::Bytes,
    header::{AUTHORIZATION, CONTENT_TYPE},
    Request, StatusCode,
};
use hyper_util::{client::legacy::Client, rt::TokioExecutor};
use serde_json::{json, Value};
use stratum_proxy::{
    config::ProxyConfig,
    utils::unix_time,
    work::{
        codec::{self, HEADER_SIZE},
        job::Job,
        target::{hash_to_u256, target_from_difficulty},
    },
    StratumProxy,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
};

pub const POOL_EXTRANONCE1: &str = "f8000001";
pub const POOL_EXTRANONCE2_SIZE: usize = 4;
pub const POOL_DIFFICULTY: f64 = 1e-8;
pub const COINBASE1: &str = "01000000010000000000000000000000000000000000000000000000000000000000000000ffffffff20020862062f503253482f04b8864e5008";
pub const COINBASE2: &str = "072f736c7573682f000000000100f2052a010000001976a914d23fcdf86f7e756a64a7a9688ef9903327048ed988ac00000000";

static UNIQUE_PORTS: Mutex<Option<HashSet<u16>>> = Mutex::new(None);

/// A local address no other test in this binary was handed.
pub fn get_available_address() -> SocketAddr {
    let mut ports = UNIQUE_PORTS.lock().unwrap();
    let ports = ports.get_or_insert_with(HashSet::new);
    loop {
        let port = StdTcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        if ports.insert(port) {
            return SocketAddr::from(([127, 0, 0, 1], port));
        }
    }
}

/// Notify params for a job on top of a previous block hash made of `prev_byte`.
pub fn notify_params(job_id: &str, prev_byte: u8, clean: bool) -> Value {
    json!([
        job_id,
        hex::encode([prev_byte; 32]),
        COINBASE1,
        COINBASE2,
        [],
        "00000002",
        "1d00ffff",
        format!("{:08x}", unix_time()),
        clean
    ])
}

/// The job the proxy builds from [`notify_params`].
pub fn job(job_id: &str, prev_byte: u8, ntime: u32) -> Job {
    Job {
        job_id: job_id.into(),
        prev_hash: [prev_byte; 32],
        coinbase1: hex::decode(COINBASE1).unwrap(),
        coinbase2: hex::decode(COINBASE2).unwrap(),
        merkle_branch: vec![],
        version: 2,
        bits: 0x1d00ffff,
        ntime,
        clean: true,
    }
}

/// Finds a nonce meeting the mock pool's share target.
pub fn grind(header: &[u8; HEADER_SIZE]) -> u32 {
    let target = target_from_difficulty(POOL_DIFFICULTY);
    let mut header = *header;
    (0..=u32::MAX)
        .find(|nonce| {
            header[76..].copy_from_slice(&nonce.to_le_bytes());
            hash_to_u256(&codec::sha256d(&header)) <= target
        })
        .unwrap()
}

/// A Stratum V1 pool accepting every request, one connection at a time.
pub struct MockPool {
    pub addr: SocketAddr,
    pub requests: async_channel::Receiver<Value>,
    push: async_channel::Sender<String>,
    current_job: Arc<Mutex<Value>>,
}

impl MockPool {
    pub async fn start(first_job: Value) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (requests_tx, requests) = async_channel::unbounded();
        let (push, push_rx) = async_channel::unbounded::<String>();
        let current_job = Arc::new(Mutex::new(first_job));
        let job = current_job.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                serve(stream, requests_tx.clone(), push_rx.clone(), job.clone()).await;
            }
        });
        Self {
            addr,
            requests,
            push,
            current_job,
        }
    }

    /// Sends a new job to the connected proxy.
    pub async fn notify(&self, params: Value) {
        *self.current_job.lock().unwrap() = params.clone();
        let line = json!({"id": null, "method": "mining.notify", "params": params});
        self.push.send(line.to_string()).await.unwrap();
    }

    /// Next request with `method`, skipping everything else.
    pub async fn next_request(&self, method: &str) -> Value {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let request = self.requests.recv().await.unwrap();
                if request["method"] == method {
                    return request;
                }
            }
        })
        .await
        .unwrap()
    }
}

async fn serve(
    stream: TcpStream,
    requests: async_channel::Sender<Value>,
    push: async_channel::Receiver<String>,
    current_job: Arc<Mutex<Value>>,
) {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    loop {
        let out = tokio::select! {
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { return };
                let Ok(request) = serde_json::from_str::<Value>(&line) else { continue };
                let id = request["id"].clone();
                let mut out = vec![];
                if request["method"] == "mining.subscribe" {
                    out.push(json!({
                        "id": id,
                        "result": [[["mining.notify", "1"]], POOL_EXTRANONCE1, POOL_EXTRANONCE2_SIZE],
                        "error": null
                    }));
                    out.push(json!({"id": null, "method": "mining.set_difficulty", "params": [POOL_DIFFICULTY]}));
                    let job = current_job.lock().unwrap().clone();
                    out.push(json!({"id": null, "method": "mining.notify", "params": job}));
                } else if !id.is_null() && request.get("method").is_some() {
                    out.push(json!({"id": id, "result": true, "error": null}));
                }
                let _ = requests.send(request).await;
                out.into_iter().map(|v| v.to_string()).collect::<Vec<_>>()
            }
            pushed = push.recv() => {
                let Ok(line) = pushed else { return };
                vec![line]
            }
        };
        for line in out {
            if write.write_all(format!("{line}\n").as_bytes()).await.is_err() {
                return;
            }
        }
    }
}

pub struct RunningProxy {
    pub getwork: SocketAddr,
    pub stratum: SocketAddr,
}

/// Starts a proxy in front of `pool` and waits until it serves work.
pub async fn start_proxy(pool: &MockPool, custom_user: Option<&str>) -> RunningProxy {
    let getwork = get_available_address();
    let stratum = get_available_address();
    let mut config = ProxyConfig::new("127.0.0.1", pool.addr.port());
    config.getwork_listen_address = "127.0.0.1".into();
    config.getwork_listen_port = getwork.port();
    config.stratum_listen_address = "127.0.0.1".into();
    config.stratum_listen_port = stratum.port();
    config.enable_discovery = false;
    config.autodetect = false;
    config.long_poll_timeout_secs = 30;
    config.custom_user = custom_user.map(str::to_string);
    tokio::spawn(StratumProxy::new(config).start());

    let proxy = RunningProxy { getwork, stratum };
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Ok((_, body)) = getwork_call(&proxy, "/", "probe", json!({"id": 0, "method": "getwork", "params": []})).await {
                if body["result"].is_object() {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .unwrap();
    proxy
}

/// One JSON-RPC call against the getwork listener.
pub async fn getwork_call(
    proxy: &RunningProxy,
    path: &str,
    user: &str,
    body: Value,
) -> Result<(StatusCode, Value), Box<dyn std::error::Error + Send + Sync>> {
    let client: Client<_, Full<Bytes>> = Client::builder(TokioExecutor::new()).build_http();
    let token = base64::engine::general_purpose::STANDARD.encode(format!("{user}:x"));
    let request = Request::builder()
        .method("POST")
        .uri(format!("http://{}{path}", proxy.getwork))
        .header(CONTENT_TYPE, "application/json")
        .header(AUTHORIZATION, format!("Basic {token}"))
        .body(Full::<Bytes>::from(body.to_string()))?;
    let response = client.request(request).await?;
    let status = response.status();
    let body = response.into_body().collect().await?.to_bytes();
    Ok((status, serde_json::from_slice(&body)?))
}

/// A Stratum V1 miner connected to the proxy.
pub struct Miner {
    lines: tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
    write: tokio::net::tcp::OwnedWriteHalf,
}

impl Miner {
    pub async fn connect(addr: SocketAddr) -> Self {
        let (read, write) = TcpStream::connect(addr).await.unwrap().into_split();
        Self {
            lines: BufReader::new(read).lines(),
            write,
        }
    }

    pub async fn send(&mut self, message: Value) {
        self.write
            .write_all(format!("{message}\n").as_bytes())
            .await
            .unwrap();
    }

    pub async fn recv(&mut self) -> Option<Value> {
        let line = tokio::time::timeout(Duration::from_secs(10), self.lines.next_line())
            .await
            .unwrap()
            .unwrap()?;
        Some(serde_json::from_str(&line).unwrap())
    }

    /// Reads until the response to `id`, returning it with the pushes seen on the way.
    pub async fn response(&mut self, id: u64) -> (Value, Vec<Value>) {
        let mut pushes = vec![];
        loop {
            let message = self.recv().await.expect("connection closed");
            if message["id"] == id && message.get("method").is_none() {
                return (message, pushes);
            }
            pushes.push(message);
        }
    }
}
