//! HTTP routing and response mapping.
//!
//! [`handle`] implements the request surface independently of the HTTP
//! library: it routes on method and path, parses the JSON body, runs the
//! pipeline, and turns the outcome into a [`Reply`]. [`serve`] adapts it to
//! a `tiny_http` listener, handling every request on its own thread.

use log::{error, info, warn};
use std::io::Read;
use std::sync::Arc;
use std::thread;

use crate::artefact::download::ArtefactFetcher;
use crate::pipeline::{DeployContext, run_deploy};
use crate::request::DeployRequest;

/// The only routed path.
pub const DEPLOY_PATH: &str = "/deploy";

/// Largest request body accepted, in bytes.
pub const MAX_BODY_BYTES: u64 = 64 * 1024;

/// Body of a successful deploy response.
pub const SUCCESS_BODY: &str = "success";

/// Shared state handed to every request thread.
pub struct ReceiverState {
    /// Deploy configuration.
    pub context: DeployContext,
    /// Artefact source.
    pub fetcher: Box<dyn ArtefactFetcher + Send + Sync>,
}

impl ReceiverState {
    /// Bundle a context and fetcher.
    #[must_use]
    pub fn new(context: DeployContext, fetcher: Box<dyn ArtefactFetcher + Send + Sync>) -> Self {
        Self { context, fetcher }
    }
}

/// Status code and plain-text body of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: String,
}

impl Reply {
    fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Handle one request and return the response to send.
///
/// Only `POST /deploy` runs the pipeline. Other paths answer 404, other
/// methods on `/deploy` answer 405, and a body that is not valid JSON or
/// exceeds [`MAX_BODY_BYTES`] answers 400.
pub fn handle(state: &ReceiverState, method: &str, url: &str, body: &mut dyn Read) -> Reply {
    let path = url.split_once('?').map_or(url, |(path, _)| path);
    if path != DEPLOY_PATH {
        return Reply::new(404, "404 page not found");
    }
    if method != "POST" {
        return Reply::new(405, "only POST allowed");
    }

    let Some(request) = parse_body(body) else {
        return Reply::new(400, "invalid JSON");
    };

    match run_deploy(&state.context, state.fetcher.as_ref(), &request) {
        Ok(_) => Reply::new(200, SUCCESS_BODY),
        Err(e) => {
            let status = e.status_code();
            if status >= 500 {
                error!("deploy of {} failed (last stage: {}): {e}", request.project, e.stage());
            } else {
                warn!("deploy of {} refused (last stage: {}): {e}", request.project, e.stage());
            }
            Reply::new(status, e.to_string())
        }
    }
}

fn parse_body(body: &mut dyn Read) -> Option<DeployRequest> {
    let mut raw = Vec::new();
    body.take(MAX_BODY_BYTES + 1).read_to_end(&mut raw).ok()?;
    if raw.len() as u64 > MAX_BODY_BYTES {
        warn!("rejecting request body over {MAX_BODY_BYTES} bytes");
        return None;
    }
    serde_json::from_slice(&raw).ok()
}

/// Serve requests from `server` until it is unblocked or fails.
///
/// Each request is handled on a freshly spawned thread.
pub fn serve(server: &tiny_http::Server, state: Arc<ReceiverState>) {
    for request in server.incoming_requests() {
        let state = Arc::clone(&state);
        thread::spawn(move || respond(&state, request));
    }
    info!("listener stopped");
}

fn respond(state: &ReceiverState, mut request: tiny_http::Request) {
    let method = request.method().as_str().to_owned();
    let url = request.url().to_owned();
    let reply = handle(state, &method, &url, request.as_reader());

    let mut response = tiny_http::Response::from_string(reply.body)
        .with_status_code(tiny_http::StatusCode(reply.status));
    if let Ok(header) =
        tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"text/plain; charset=utf-8"[..])
    {
        response = response.with_header(header);
    }
    if let Err(e) = request.respond(response) {
        warn!("failed to send response for {method} {url}: {e}");
    }
}
