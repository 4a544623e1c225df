use std::io::Cursor;
use std::sync::Arc;

use log::{info, warn};
use serde_json::{json, Value};
use tiny_http::{Header, Method, Response, Server};

use crate::ec::EcTransport;
use crate::optimizer::Optimizer;
use crate::policy::WorkloadClass;
use crate::workload::PlatformInfo;

/// What the diagnostics routes read from.
#[derive(Clone)]
pub struct HttpState {
    pub optimizer: Arc<Optimizer>,
    pub transport: EcTransport,
    pub platform: PlatformInfo,
}

pub struct HttpServer {
    addr: String,
}

impl HttpServer {
    pub fn new(addr: &str) -> Self {
        Self {
            addr: addr.to_string(),
        }
    }

    pub fn start(&self, state: HttpState) {
        let addr = self.addr.clone();

        std::thread::spawn(move || {
            let server = match Server::http(&addr) {
                Ok(server) => server,
                Err(e) => {
                    warn!("diagnostics server cannot bind {}: {}", addr, e);
                    return;
                }
            };
            info!("diagnostics listening on http://{}", addr);

            for req in server.incoming_requests() {
                let (status, body) = route(req.method(), req.url(), &state);
                if let Err(e) = req.respond(json_response(status, &body)) {
                    warn!("failed to answer request: {}", e);
                }
            }
        });
    }
}

fn json_response(status: u16, body: &Value) -> Response<Cursor<Vec<u8>>> {
    let response = Response::from_string(body.to_string()).with_status_code(status);
    match Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]) {
        Ok(header) => response.with_header(header),
        Err(()) => response,
    }
}

fn query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}

/// Maps a request to a status code and JSON body.
pub fn route(method: &Method, url: &str, state: &HttpState) -> (u16, Value) {
    let (path, query) = url.split_once('?').unwrap_or((url, ""));

    match (method, path) {
        (Method::Get, "/status") => {
            let history = state.optimizer.history();
            let last = state.optimizer.last_result().map(|r| {
                json!({
                    "workload": r.workload,
                    "success": r.success,
                    "finished_at": r.finished_at,
                    "throttle_risk": r.throttle_risk,
                    "error": r.error,
                })
            });
            (
                200,
                json!({
                    "platform": state.platform,
                    "ec": state.transport.stats(),
                    "history": { "len": history.len(), "capacity": history.capacity() },
                    "last_pass": last,
                }),
            )
        }
        (Method::Get, "/sensors") => match state.optimizer.read_current_sensors() {
            Ok(snapshot) => (200, json!(snapshot)),
            Err(e) => (503, json!({ "error": e.to_string(), "kind": e.kind() })),
        },
        (Method::Get, "/history") => {
            let samples: Vec<_> = state.optimizer.history().snapshot().iter().cloned().collect();
            (200, json!(samples))
        }
        (Method::Get, "/last") => match state.optimizer.last_result() {
            Some(result) => (200, json!(result)),
            None => (404, json!({ "error": "no optimization pass yet" })),
        },
        (Method::Post, "/optimize") => {
            let requested = query_param(query, "workload").unwrap_or("balanced");
            match requested.parse::<WorkloadClass>() {
                Ok(workload) => {
                    let result = state.optimizer.run_optimization_pass(workload);
                    let status = if result.success { 200 } else { 502 };
                    (status, json!(result))
                }
                Err(e) => (400, json!({ "error": e })),
            }
        }
        (_, "/status" | "/sensors" | "/history" | "/last" | "/optimize") => {
            (405, json!({ "error": "method not allowed" }))
        }
        _ => (404, json!({ "error": "not found" })),
    }
}
