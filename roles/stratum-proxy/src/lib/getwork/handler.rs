use std::{convert::Infallible, error::Error as StdError, sync::Arc};

use base64::Engine;
use http_body_util::{BodyExt, Full, Limited};
use hyper::{
    body::{Body, Bytes},
    header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE, HOST, WWW_AUTHENTICATE},
    Request, Response, StatusCode,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use v1::json_rpc::{error_codes, JsonRpcError};

use super::{GetworkContext, LONG_POLL_PATH};
use crate::{
    error::{ProxyError, ProxyResult},
    upstream::SubmitOutcome,
    work::codec::{self, WorkUnit, GETWORK_HASH1},
    worker_registry::Credentials,
};

const MAX_BODY_SIZE: usize = 1 << 16;

const X_LONG_POLLING: HeaderName = HeaderName::from_static("x-long-polling");
const X_ROLL_NTIME: HeaderName = HeaderName::from_static("x-roll-ntime");
const X_STRATUM: HeaderName = HeaderName::from_static("x-stratum");
const X_MINING_EXTENSIONS: HeaderName = HeaderName::from_static("x-mining-extensions");

pub type GetworkResponse = Response<Full<Bytes>>;

type Reply = (StatusCode, Result<Value, JsonRpcError>);

#[derive(Debug, Deserialize)]
struct GetworkRequest {
    #[serde(default)]
    id: Value,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    params: Vec<Value>,
}

fn default_method() -> String {
    "getwork".to_string()
}

impl Default for GetworkRequest {
    fn default() -> Self {
        Self {
            id: Value::Null,
            method: default_method(),
            params: vec![],
        }
    }
}

/// Answers getwork HTTP requests.
#[derive(Debug)]
pub struct GetworkHandler {
    ctx: GetworkContext,
}

impl GetworkHandler {
    pub fn new(ctx: GetworkContext) -> Self {
        Self { ctx }
    }

    /// Entry point for the HTTP service. Every failure is turned into a response.
    pub async fn handle<B>(self: Arc<Self>, req: Request<B>) -> Result<GetworkResponse, Infallible>
    where
        B: Body,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        Ok(self.dispatch(req).await)
    }

    async fn dispatch<B>(&self, req: Request<B>) -> GetworkResponse
    where
        B: Body,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        let path = req.uri().path();
        let long_poll = path == LONG_POLL_PATH;
        if !long_poll && path != "/" {
            return plain(StatusCode::NOT_FOUND, "Not found");
        }
        let Some(credentials) = basic_auth(req.headers()) else {
            let mut response = plain(StatusCode::UNAUTHORIZED, "Unauthorized");
            response.headers_mut().insert(
                WWW_AUTHENTICATE,
                HeaderValue::from_static(r#"Basic realm="stratum-mining-proxy""#),
            );
            return response;
        };
        let with_midstate = !self.ctx.settings.no_midstate && !miner_computes_midstate(req.headers());
        let stratum_url = self.stratum_url(req.headers());

        let body = match Limited::new(req.into_body(), MAX_BODY_SIZE).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                debug!("Cannot read getwork request body: {e}");
                return plain(StatusCode::BAD_REQUEST, "Bad request");
            }
        };
        let request = if body.iter().all(u8::is_ascii_whitespace) {
            GetworkRequest::default()
        } else {
            match serde_json::from_slice::<GetworkRequest>(&body) {
                Ok(request) => request,
                Err(e) => {
                    debug!("Malformed getwork request: {e}");
                    return plain(StatusCode::BAD_REQUEST, "Bad request");
                }
            }
        };

        let (status, reply) = if long_poll {
            self.long_poll(&credentials, with_midstate).await
        } else if request.method != "getwork" {
            (
                StatusCode::OK,
                Err(JsonRpcError::new(
                    error_codes::METHOD_NOT_FOUND,
                    "Method not found",
                )),
            )
        } else {
            match request.params.first() {
                None => self.get_work(&credentials, with_midstate).await,
                Some(Value::String(data)) => self.submit(&credentials, data).await,
                Some(_) => (
                    StatusCode::OK,
                    Err(JsonRpcError::new(error_codes::OTHER, "Invalid params")),
                ),
            }
        };
        self.respond(status, request.id, reply, stratum_url)
    }

    async fn get_work(&self, credentials: &Credentials, with_midstate: bool) -> Reply {
        if let Err(e) = self.authorize(credentials).await {
            return (StatusCode::OK, Err(e.to_json_rpc_error()));
        }
        match self.ctx.jobs.generate_work(None, None, with_midstate) {
            Ok(work) => (StatusCode::OK, Ok(work_json(&work))),
            Err(ProxyError::NoJob) => (StatusCode::OK, Err(no_job())),
            Err(e) => (StatusCode::OK, Err(e.to_json_rpc_error())),
        }
    }

    async fn long_poll(&self, credentials: &Credentials, with_midstate: bool) -> Reply {
        // registered before authorizing, a block arriving during the round trip still releases
        let poll = self.ctx.jobs.long_poll();
        if let Err(e) = self.authorize(credentials).await {
            return (StatusCode::OK, Err(e.to_json_rpc_error()));
        }
        if poll.wait(self.ctx.settings.long_poll_timeout).await {
            debug!("Long poll for {} released by a new block", credentials.username);
        }
        match self.ctx.jobs.generate_work(None, None, with_midstate) {
            Ok(work) => (StatusCode::OK, Ok(work_json(&work))),
            Err(ProxyError::NoJob) => (StatusCode::SERVICE_UNAVAILABLE, Err(no_job())),
            Err(e) => (StatusCode::OK, Err(e.to_json_rpc_error())),
        }
    }

    async fn submit(&self, credentials: &Credentials, data: &str) -> Reply {
        match self.forward_submit(credentials, data).await {
            Ok(accepted) => (StatusCode::OK, Ok(Value::Bool(accepted))),
            Err(
                e @ (ProxyError::Unauthorized
                | ProxyError::UpstreamUnavailable
                | ProxyError::MalformedSubmission(_)),
            ) => (StatusCode::OK, Err(e.to_json_rpc_error())),
            Err(e) => {
                info!("Share from {} rejected: {e}", credentials.username);
                (StatusCode::OK, Ok(Value::Bool(false)))
            }
        }
    }

    async fn forward_submit(&self, credentials: &Credentials, data: &str) -> ProxyResult<bool> {
        let header = codec::parse_getwork_data(data)?;
        self.ctx
            .workers
            .ensure_authorized(&self.ctx.upstream, credentials)
            .await?;
        let share = self.ctx.jobs.resolve_header(&header)?;
        let validated = self.ctx.jobs.submit(&share)?;
        if !validated.meets_pool_target() {
            debug!(
                "Share from {} below the pool target, answered locally",
                credentials.username
            );
            return Ok(true);
        }
        if validated.is_block_candidate() {
            info!(
                "Block candidate {} (difficulty {:.0}) from {}",
                validated.hash_display(),
                validated.achieved_difficulty(),
                credentials.username
            );
        }

        let identity = self.ctx.workers.upstream_identity(credentials);
        let outcome = self.ctx.upstream.submit(&identity, &validated).await?;
        let accepted = outcome == SubmitOutcome::Accepted;
        self.ctx.workers.record_submission(credentials, accepted);
        match outcome {
            SubmitOutcome::Accepted => info!("Share from {} accepted", credentials.username),
            SubmitOutcome::Rejected(Some(e)) => {
                info!("Share from {} rejected by pool: {e}", credentials.username)
            }
            SubmitOutcome::Rejected(None) => {
                info!("Share from {} rejected by pool", credentials.username)
            }
        }
        Ok(accepted)
    }

    /// Getwork requests authorize on first use. Work is still handed out without a pool
    /// session, as long as the last job has not gone stale.
    async fn authorize(&self, credentials: &Credentials) -> ProxyResult<()> {
        match self
            .ctx
            .workers
            .ensure_authorized(&self.ctx.upstream, credentials)
            .await
        {
            Ok(()) | Err(ProxyError::UpstreamUnavailable) => Ok(()),
            Err(e) => {
                warn!("Worker {} not authorized: {e}", credentials.username);
                Err(e)
            }
        }
    }

    fn stratum_url(&self, headers: &HeaderMap) -> Option<String> {
        let settings = &self.ctx.settings;
        if let Some(url) = &settings.custom_stratum {
            return Some(url.clone());
        }
        if settings.stratum_listen_port == 0 {
            return None;
        }
        let host = match settings.stratum_listen_address.as_str() {
            "" | "0.0.0.0" | "::" | "[::]" => {
                let host = headers.get(HOST)?.to_str().ok()?;
                strip_port(host).to_string()
            }
            address => address.to_string(),
        };
        Some(format!(
            "stratum+tcp://{host}:{}",
            settings.stratum_listen_port
        ))
    }

    fn respond(
        &self,
        status: StatusCode,
        id: Value,
        reply: Result<Value, JsonRpcError>,
        stratum_url: Option<String>,
    ) -> GetworkResponse {
        let body = match reply {
            Ok(result) => json!({"result": result, "error": null, "id": id}),
            Err(e) => json!({
                "result": null,
                "error": {"code": e.code, "message": e.message},
                "id": id,
            }),
        };
        let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
        *response.status_mut() = status;
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(X_ROLL_NTIME, HeaderValue::from_static("1"));
        let long_poll_url = self
            .ctx
            .settings
            .custom_lp
            .as_deref()
            .unwrap_or(LONG_POLL_PATH);
        if let Ok(value) = HeaderValue::from_str(long_poll_url) {
            headers.insert(X_LONG_POLLING, value);
        }
        if let Some(Ok(value)) = stratum_url.as_deref().map(HeaderValue::from_str) {
            headers.insert(X_STRATUM, value);
        }
        response
    }
}

fn plain(status: StatusCode, text: &'static str) -> GetworkResponse {
    let mut response = Response::new(Full::new(Bytes::from_static(text.as_bytes())));
    *response.status_mut() = status;
    response
}

fn no_job() -> JsonRpcError {
    JsonRpcError::new(error_codes::INTERNAL, "no job available")
}

fn work_json(work: &WorkUnit) -> Value {
    let mut result = json!({
        "data": work.data_hex(),
        "hash1": GETWORK_HASH1,
        "target": work.target_hex(),
    });
    if let Some(midstate) = work.midstate_hex() {
        result["midstate"] = Value::String(midstate);
    }
    result
}

/// Reads Basic credentials. A missing header or an empty username yields `None`.
fn basic_auth(headers: &HeaderMap) -> Option<Credentials> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':').unwrap_or((decoded.as_str(), ""));
    if username.is_empty() {
        return None;
    }
    Some(Credentials::new(username, password))
}

/// Miners announcing the `midstate` extension compute it themselves.
fn miner_computes_midstate(headers: &HeaderMap) -> bool {
    headers
        .get(X_MINING_EXTENSIONS)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("midstate"))
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return host.split_inclusive(']').next().unwrap_or(host);
    }
    host.rsplit_once(':').map_or(host, |(h, _)| h)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        getwork::GetworkSettings,
        job_registry::{JobRegistry, TargetPolicy},
        upstream::{attach_test_pool, UpstreamHandle},
        utils::unix_time,
        work::job::{Job, SessionParams},
        worker_registry::{CredentialStrategy, WorkerRegistry},
    };
    use std::time::Duration;
    use v1::json_rpc::Message;

    fn settings() -> GetworkSettings {
        GetworkSettings {
            long_poll_timeout: Duration::from_millis(50),
            no_midstate: false,
            custom_lp: None,
            custom_stratum: None,
            stratum_listen_address: "0.0.0.0".into(),
            stratum_listen_port: 3333,
        }
    }

    fn job(id: &str) -> Job {
        Job {
            job_id: id.into(),
            prev_hash: [0x55; 32],
            coinbase1: vec![0x01, 0x00],
            coinbase2: vec![0xff],
            merkle_branch: vec![[0x66; 32]],
            version: 2,
            bits: 0x1d00ffff,
            ntime: unix_time(),
            clean: true,
        }
    }

    struct Fixture {
        handler: Arc<GetworkHandler>,
        jobs: Arc<JobRegistry>,
        seen: async_channel::Receiver<Message>,
    }

    fn fixture(settings: GetworkSettings, strategy: CredentialStrategy) -> Fixture {
        let jobs = Arc::new(JobRegistry::new(4, Duration::from_secs(60), TargetPolicy::Diff1));
        jobs.set_session(SessionParams::new(vec![1, 2, 3, 4], 4));
        let upstream = UpstreamHandle::new(Duration::from_secs(5));
        let seen = attach_test_pool(&upstream, |req| {
            let ok = req.params[0] != "bad";
            Some(v1::json_rpc::Response::ok(req.id, Value::Bool(ok)))
        });
        let handler = Arc::new(GetworkHandler::new(GetworkContext {
            jobs: jobs.clone(),
            workers: Arc::new(WorkerRegistry::new(strategy)),
            upstream,
            settings,
        }));
        Fixture { handler, jobs, seen }
    }

    fn request(path: &str, user: Option<&str>, body: Value) -> Request<Full<Bytes>> {
        let mut builder = Request::post(path).header(HOST, "192.168.1.10:8332");
        if let Some(user) = user {
            let token = base64::engine::general_purpose::STANDARD.encode(format!("{user}:x"));
            builder = builder.header(AUTHORIZATION, format!("Basic {token}"));
        }
        builder
            .body(Full::new(Bytes::from(body.to_string())))
            .unwrap()
    }

    async fn call(fixture: &Fixture, req: Request<Full<Bytes>>) -> (StatusCode, HeaderMap, Value) {
        let response = fixture.handler.clone().handle(req).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body = if status == StatusCode::UNAUTHORIZED {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, headers, body)
    }

    fn getwork() -> Value {
        json!({"id": 1, "method": "getwork", "params": []})
    }

    #[tokio::test]
    async fn missing_username_is_challenged() {
        let f = fixture(settings(), CredentialStrategy::PassThrough);
        let (status, headers, _) = call(&f, request("/", None, getwork())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(
            headers[WWW_AUTHENTICATE],
            r#"Basic realm="stratum-mining-proxy""#
        );
        let (status, _, _) = call(&f, request("/", Some(""), getwork())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn work_unit_fields_and_headers() {
        let f = fixture(settings(), CredentialStrategy::PassThrough);
        f.jobs.set_job(job("abc"));
        let (status, headers, body) = call(&f, request("/", Some("w1"), getwork())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], 1);
        let result = &body["result"];
        assert_eq!(result["data"].as_str().unwrap().len(), 256);
        assert_eq!(result["hash1"], GETWORK_HASH1);
        assert_eq!(
            result["target"],
            "ffffffffffffffffffffffffffffffffffffffffffffffffffffffff00000000"
        );
        assert_eq!(result["midstate"].as_str().unwrap().len(), 64);
        assert_eq!(headers[X_LONG_POLLING], "/lp");
        assert_eq!(headers[X_ROLL_NTIME], "1");
        assert_eq!(headers[X_STRATUM], "stratum+tcp://192.168.1.10:3333");
    }

    #[tokio::test]
    async fn midstate_extension_and_overrides() {
        let mut settings = settings();
        settings.custom_lp = Some("http://lp.example:8332/lp".into());
        settings.custom_stratum = Some("stratum+tcp://pool.example:3333".into());
        let f = fixture(settings, CredentialStrategy::PassThrough);
        f.jobs.set_job(job("abc"));
        let mut req = request("/", Some("w1"), getwork());
        req.headers_mut()
            .insert(X_MINING_EXTENSIONS, HeaderValue::from_static("midstate rollntime"));
        let (_, headers, body) = call(&f, req).await;
        assert!(body["result"].get("midstate").is_none());
        assert_eq!(headers[X_LONG_POLLING], "http://lp.example:8332/lp");
        assert_eq!(headers[X_STRATUM], "stratum+tcp://pool.example:3333");
    }

    #[tokio::test]
    async fn no_job_is_reported() {
        let f = fixture(settings(), CredentialStrategy::PassThrough);
        let (status, _, body) = call(&f, request("/", Some("w1"), getwork())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["error"]["code"], -32603);
        assert_eq!(body["error"]["message"], "no job available");
        let (status, _, body) = call(&f, request("/lp", Some("w1"), json!({}))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"]["code"], -32603);
    }

    #[tokio::test]
    async fn long_poll_returns_new_block() {
        let mut settings = settings();
        settings.long_poll_timeout = Duration::from_secs(30);
        let f = fixture(settings, CredentialStrategy::PassThrough);
        f.jobs.set_job(job("old"));
        let handler = f.handler.clone();
        let poll = tokio::spawn(async move {
            let req = request("/lp", Some("w1"), json!({}));
            handler.handle(req).await.unwrap()
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        f.jobs.set_job(job("abc"));
        let response = tokio::time::timeout(Duration::from_secs(5), poll)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&body).unwrap();
        let data = body["result"]["data"].as_str().unwrap();
        let header = codec::parse_getwork_data(data).unwrap();
        assert_eq!(&header[4..36], &[0x55; 32]);
        assert_eq!(
            f.jobs.resolve_header(&header).unwrap().job_id,
            "abc"
        );
    }

    #[tokio::test]
    async fn clean_job_during_authorize_releases_long_poll() {
        let mut settings = settings();
        settings.long_poll_timeout = Duration::from_secs(30);
        let jobs = Arc::new(JobRegistry::new(4, Duration::from_secs(60), TargetPolicy::Diff1));
        jobs.set_session(SessionParams::new(vec![1, 2, 3, 4], 4));
        jobs.set_job(job("old"));
        let upstream = UpstreamHandle::new(Duration::from_secs(30));
        // authorize requests stay unanswered until the test replies
        let seen = attach_test_pool(&upstream, |_| None);
        let handler = Arc::new(GetworkHandler::new(GetworkContext {
            jobs: jobs.clone(),
            workers: Arc::new(WorkerRegistry::new(CredentialStrategy::PassThrough)),
            upstream: upstream.clone(),
            settings,
        }));

        let start = tokio::time::Instant::now();
        let poll = tokio::spawn(handler.handle(request("/lp", Some("w1"), json!({}))));
        let authorize = tokio::time::timeout(Duration::from_secs(5), seen.recv())
            .await
            .unwrap()
            .unwrap();
        let Message::StandardRequest(authorize) = authorize else {
            panic!("expected mining.authorize, got {authorize:?}");
        };
        assert_eq!(authorize.method, "mining.authorize");

        assert!(jobs.set_job(job("abc")).released);
        upstream.resolve(v1::json_rpc::Response::ok(authorize.id, Value::Bool(true)));

        let response = tokio::time::timeout(Duration::from_secs(5), poll)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&body).unwrap();
        let header = codec::parse_getwork_data(body["result"]["data"].as_str().unwrap()).unwrap();
        assert_eq!(jobs.resolve_header(&header).unwrap().job_id, "abc");
    }

    #[tokio::test]
    async fn solved_work_is_forwarded_once() {
        let f = fixture(settings(), CredentialStrategy::PassThrough);
        f.jobs.set_difficulty(1e-8);
        f.jobs.set_job(job("abc"));
        let (_, _, body) = call(&f, request("/", Some("w1"), getwork())).await;
        let mut header =
            codec::parse_getwork_data(body["result"]["data"].as_str().unwrap()).unwrap();
        let nonce = codec::grind_nonce(&header, f.jobs.pool_target());
        header[76..].copy_from_slice(&nonce.to_le_bytes());
        let data = codec::getwork_data_hex(&header);
        let submit = json!({"id": 2, "method": "getwork", "params": [data]});

        let (_, _, body) = call(&f, request("/", Some("w1"), submit.clone())).await;
        assert_eq!(body["result"], true);
        let (_, _, body) = call(&f, request("/", Some("w1"), submit)).await;
        assert_eq!(body["result"], false);

        let mut submits = vec![];
        while let Ok(Message::StandardRequest(r)) = f.seen.try_recv() {
            if r.method == "mining.submit" {
                submits.push(r.params);
            }
        }
        assert_eq!(submits.len(), 1);
        assert_eq!(submits[0][0], "w1");
        assert_eq!(submits[0][4], format!("{nonce:08x}"));
    }

    #[tokio::test]
    async fn unknown_or_easy_shares_stay_local() {
        let f = fixture(settings(), CredentialStrategy::fixed("farm", "x"));
        f.jobs.set_job(job("abc"));
        f.jobs.set_difficulty(1e12);
        let (_, _, body) = call(&f, request("/", Some("w1"), getwork())).await;
        let data = body["result"]["data"].as_str().unwrap().to_string();

        let submit = json!({"id": 3, "method": "getwork", "params": [data]});
        let (_, _, body) = call(&f, request("/", Some("w1"), submit)).await;
        assert_eq!(body["result"], true);

        let mut header = codec::parse_getwork_data(&data).unwrap();
        header[40] ^= 0xff;
        let unknown = json!({"id": 4, "method": "getwork", "params": [codec::getwork_data_hex(&header)]});
        let (_, _, body) = call(&f, request("/", Some("w1"), unknown)).await;
        assert_eq!(body["result"], false);

        let malformed = json!({"id": 5, "method": "getwork", "params": ["zz"]});
        let (_, _, body) = call(&f, request("/", Some("w1"), malformed)).await;
        assert_eq!(body["error"]["code"], 20);

        while let Ok(msg) = f.seen.try_recv() {
            assert_ne!(msg.method(), Some("mining.submit"));
        }
    }

    #[tokio::test]
    async fn rejected_worker_gets_error() {
        let f = fixture(settings(), CredentialStrategy::PassThrough);
        f.jobs.set_job(job("abc"));
        let (_, _, body) = call(&f, request("/", Some("bad"), getwork())).await;
        assert_eq!(body["error"]["code"], 24);
        let (_, _, body) = call(&f, request("/", Some("w1"), json!({"id": 9, "method": "getblock"}))).await;
        assert_eq!(body["error"]["code"], -32601);
    }

    #[test]
    fn basic_auth_parsing() {
        let mut headers = HeaderMap::new();
        let token = base64::engine::general_purpose::STANDARD.encode("alice:pa:ss");
        headers.insert(AUTHORIZATION, format!("Basic {token}").parse().unwrap());
        let creds = basic_auth(&headers).unwrap();
        assert_eq!(creds.username, "alice");
        assert_eq!(creds.password, "pa:ss");

        let token = base64::engine::general_purpose::STANDARD.encode("bob");
        headers.insert(AUTHORIZATION, format!("basic {token}").parse().unwrap());
        assert_eq!(basic_auth(&headers).unwrap().password, "");

        headers.insert(AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert!(basic_auth(&headers).is_none());
    }

    #[test]
    fn host_port_is_stripped() {
        assert_eq!(strip_port("10.0.0.1:8332"), "10.0.0.1");
        assert_eq!(strip_port("proxy.lan"), "proxy.lan");
        assert_eq!(strip_port("[::1]:8332"), "[::1]");
    }
}
