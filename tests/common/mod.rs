#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use snowstream::{
    auth::{Credential, KeyPair},
    channel::ChannelTarget,
    client::{AuthMethod, ClientConfig, StreamingClient},
    encoder::Record,
    transport::{Body, HttpRequest, HttpResponse, Transport},
    Error, Result,
};

pub const PAT: &str = "pat-123";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    Token,
    Hostname,
    Open,
    Append,
    Close,
}

impl Call {
    fn of(request: &HttpRequest) -> Call {
        let path = request.url.path();
        let method = &request.method;
        if *method == Method::POST && path.ends_with("/oauth/token") {
            Call::Token
        } else if *method == Method::POST && path.ends_with("/rows") {
            Call::Append
        } else if *method == Method::GET && path.ends_with("/hostname") {
            Call::Hostname
        } else if *method == Method::PUT {
            Call::Open
        } else if *method == Method::DELETE {
            Call::Close
        } else {
            panic!("unexpected request {} {}", request.method, request.url)
        }
    }
}

/// In-memory server: answers from per-call queues, falling back to a
/// well-behaved default, and records every request.
#[derive(Default)]
pub struct ScriptedTransport {
    queued: Mutex<HashMap<Call, VecDeque<Result<HttpResponse>>>>,
    requests: Mutex<Vec<(Call, HttpRequest)>>,
    committed_offset: AtomicU64,
    served: Mutex<HashMap<Call, u64>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<ScriptedTransport> {
        Arc::new(ScriptedTransport::default())
    }

    pub fn with_committed_offset(offset: u64) -> Arc<ScriptedTransport> {
        let transport = ScriptedTransport::default();
        transport.committed_offset.store(offset, Ordering::SeqCst);
        Arc::new(transport)
    }

    pub fn push(&self, call: Call, response: HttpResponse) {
        self.push_result(call, Ok(response));
    }

    pub fn push_result(&self, call: Call, response: Result<HttpResponse>) {
        self.queued
            .lock()
            .unwrap()
            .entry(call)
            .or_default()
            .push_back(response);
    }

    pub fn requests(&self, call: Call) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| *c == call)
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn count(&self, call: Call) -> usize {
        self.requests(call).len()
    }

    fn default_response(&self, call: Call, n: u64) -> HttpResponse {
        match call {
            Call::Token => {
                let body = json!({ "access_token": format!("bearer-{n}") });
                HttpResponse::new(200, body.to_string())
            }
            Call::Hostname => HttpResponse::new(200, "ingest.acme.example"),
            Call::Open => {
                let committed = self.committed_offset.load(Ordering::SeqCst);
                let body = json!({
                    "next_continuation_token": format!("cont-open-{n}"),
                    "channel_status": { "last_committed_offset_token": committed.to_string() }
                });
                HttpResponse::new(200, body.to_string())
            }
            Call::Append => {
                let body = json!({ "next_continuation_token": format!("cont-{n}") });
                HttpResponse::new(200, body.to_string())
            }
            Call::Close => HttpResponse::new(200, "{}"),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let call = Call::of(&request);
        let offset = query(&request, "offsetToken").and_then(|o| o.parse::<u64>().ok());
        self.requests.lock().unwrap().push((call, request));
        let n = {
            let mut served = self.served.lock().unwrap();
            let n = served.entry(call).or_default();
            *n += 1;
            *n
        };
        let queued = self
            .queued
            .lock()
            .unwrap()
            .get_mut(&call)
            .and_then(VecDeque::pop_front);
        let response = queued.unwrap_or_else(|| Ok(self.default_response(call, n)));
        // accepted appends are what a reopen reports as committed
        if let (Ok(r), Some(offset)) = (&response, offset) {
            if r.is_success() {
                self.committed_offset.store(offset, Ordering::SeqCst);
            }
        }
        response
    }
}

pub fn target() -> ChannelTarget {
    ChannelTarget {
        database: String::from("DEMO"),
        schema: String::from("PUBLIC"),
        table: String::from("CAMERAS"),
        pipe: String::from("CAMERAS-STREAMING"),
    }
}

pub fn config() -> ClientConfig {
    let mut config = ClientConfig::new(
        "ACME-PROD",
        "ingest",
        target(),
        AuthMethod::Pat(String::from(PAT)),
    );
    config.role = String::from("INGEST_ROLE");
    config.channel_base_name = String::from("NYC_CAM");
    config
}

pub fn key_pair() -> Credential {
    let key_pair = KeyPair::from_pem(
        include_str!("../fixtures/rsa_key.p8"),
        String::from("ACME-PROD.INGEST"),
    );
    Credential::KeyPair(key_pair.unwrap())
}

pub fn client(transport: &Arc<ScriptedTransport>) -> StreamingClient<ScriptedTransport> {
    let credential = Credential::static_token(PAT).unwrap();
    StreamingClient::with_transport(config(), credential, transport.clone()).unwrap()
}

pub fn key_pair_client(transport: &Arc<ScriptedTransport>) -> StreamingClient<ScriptedTransport> {
    StreamingClient::with_transport(config(), key_pair(), transport.clone()).unwrap()
}

pub fn batch(n: usize) -> Vec<Record> {
    (0..n)
        .map(|i| match json!({ "camera_id": i, "name": format!("cam {i}") }) {
            Value::Object(m) => m,
            _ => unreachable!(),
        })
        .collect()
}

pub fn query(request: &HttpRequest, key: &str) -> Option<String> {
    request
        .url
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

pub fn form(request: &HttpRequest, key: &str) -> Option<String> {
    match &request.body {
        Body::Form(fields) => fields.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone()),
        _ => None,
    }
}

pub fn stale() -> HttpResponse {
    HttpResponse::new(
        400,
        r#"{"code": "STALE_CONTINUATION_TOKEN_SEQUENCER", "message": "channel was reopened"}"#,
    )
}

pub fn network_error() -> Error {
    Error::Transport {
        status: None,
        message: String::from("connection reset"),
    }
}
