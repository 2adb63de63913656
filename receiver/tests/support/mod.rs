//! Test support for receiver integration tests.
//!
//! Provides a fake GitHub artefact host and a receiver served on an
//! ephemeral port, both backed by `tiny_http`, plus a small HTTP client.
#![allow(dead_code, reason = "each test binary uses a different subset")]

use camino::Utf8PathBuf;
use deployhook_receiver::area::AreaTable;
use deployhook_receiver::artefact::download::GithubFetcher;
use deployhook_receiver::pipeline::DeployContext;
use deployhook_receiver::server::{ReceiverState, serve};
use deployhook_receiver::test_utils::TestSigner;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tiny_http::{Header, Request, Response, Server, StatusCode};

/// Path the fake host serves the signed blob from.
pub const BLOB_PATH: &str = "/blob/artefact.zip";

/// How the fake host answers the artefact API request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostMode {
    /// `302 Found` to the blob URL, as GitHub does.
    Redirect,
    /// `200 OK` with the artefact bytes directly.
    Direct,
    /// `404 Not Found`.
    NotFound,
    /// `302 Found` to a blob URL that redirects again.
    DoubleRedirect,
    /// `302 Found` without a `Location` header.
    RedirectWithoutLocation,
    /// `302 Found` to a blob URL that answers `403 Forbidden`.
    BlobForbidden,
}

/// One request observed by the fake host.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    /// Request path including any query string.
    pub url: String,
    /// Value of the `Authorization` header, if sent.
    pub authorization: Option<String>,
}

/// A fake GitHub REST API and blob store.
pub struct FakeGithub {
    server: Arc<Server>,
    addr: SocketAddr,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
    handle: Option<JoinHandle<()>>,
}

impl FakeGithub {
    /// Serve `artefact` according to `mode`.
    pub fn start(mode: HostMode, artefact: Vec<u8>) -> Self {
        let server = Arc::new(Server::http("127.0.0.1:0").expect("fake host"));
        let addr = server.server_addr().to_ip().expect("IP listener");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let handle = {
            let server = Arc::clone(&server);
            let seen = Arc::clone(&seen);
            thread::spawn(move || {
                for request in server.incoming_requests() {
                    record(&seen, &request);
                    answer(request, mode, addr, &artefact);
                }
            })
        };

        Self {
            server,
            addr,
            seen,
            handle: Some(handle),
        }
    }

    /// Base URL to configure as the API root.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Requests observed so far.
    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().expect("seen lock").clone()
    }

    /// Number of requests observed so far.
    pub fn hits(&self) -> usize {
        self.seen.lock().expect("seen lock").len()
    }
}

impl Drop for FakeGithub {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn record(seen: &Mutex<Vec<SeenRequest>>, request: &Request) {
    let authorization = request
        .headers()
        .iter()
        .find(|header| header.field.equiv("Authorization"))
        .map(|header| header.value.as_str().to_owned());
    seen.lock().expect("seen lock").push(SeenRequest {
        url: request.url().to_owned(),
        authorization,
    });
}

fn answer(request: Request, mode: HostMode, addr: SocketAddr, artefact: &[u8]) {
    let url = request.url().to_owned();
    let response = if url.starts_with("/repos/") {
        match mode {
            HostMode::Redirect => redirect(&format!("http://{addr}{BLOB_PATH}?sig=secret")),
            HostMode::DoubleRedirect => redirect(&format!("http://{addr}/blob/hop?sig=secret")),
            HostMode::BlobForbidden => redirect(&format!("http://{addr}/blob/denied?sig=secret")),
            HostMode::RedirectWithoutLocation => {
                Response::from_data(Vec::new()).with_status_code(StatusCode(302))
            }
            HostMode::Direct => Response::from_data(artefact.to_vec()),
            HostMode::NotFound => {
                Response::from_data(br#"{"message":"Not Found"}"#.to_vec())
                    .with_status_code(StatusCode(404))
            }
        }
    } else if url.starts_with("/blob/hop") {
        redirect(&format!("http://{addr}{BLOB_PATH}"))
    } else if url.starts_with("/blob/denied") {
        Response::from_data(b"AuthenticationFailed".to_vec()).with_status_code(StatusCode(403))
    } else if url.starts_with(BLOB_PATH) {
        Response::from_data(artefact.to_vec())
    } else {
        Response::from_data(b"unexpected path".to_vec()).with_status_code(StatusCode(500))
    };
    let _ = request.respond(response);
}

fn redirect(location: &str) -> Response<std::io::Cursor<Vec<u8>>> {
    Response::from_data(Vec::new())
        .with_status_code(StatusCode(302))
        .with_header(Header::from_bytes("Location", location).expect("location header"))
}

/// Temporary directories and keys for one receiver instance.
pub struct Workspace {
    temp: tempfile::TempDir,
    /// The single configured area, named `sites`.
    pub area: PathBuf,
    /// Scratch root for per-request directories.
    pub scratch: PathBuf,
    /// Where test artefacts are built.
    pub fixtures: PathBuf,
    /// The trusted signer.
    pub signer: TestSigner,
}

impl Workspace {
    /// Create the directory layout.
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("temp dir");
        let area = temp.path().join("area");
        let scratch = temp.path().join("scratch");
        let fixtures = temp.path().join("fixtures");
        for dir in [&area, &scratch, &fixtures] {
            std::fs::create_dir_all(dir).expect("create dir");
        }
        Self {
            temp,
            area,
            scratch,
            fixtures,
            signer: TestSigner::from_seed(11),
        }
    }

    /// Root of the temporary tree.
    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    /// Canonical path of `project` inside the area.
    pub fn project_dir(&self, project: &str) -> PathBuf {
        std::fs::canonicalize(&self.area)
            .expect("canonical area")
            .join(project)
    }

    /// Seed a previous deployment of `project` holding one file.
    pub fn seed_previous(&self, project: &str) {
        let dir = self.area.join(project);
        std::fs::create_dir_all(&dir).expect("project dir");
        std::fs::write(dir.join("previous.txt"), b"previous").expect("previous file");
    }

    /// Return true when no scratch directories remain.
    pub fn scratch_is_empty(&self) -> bool {
        std::fs::read_dir(&self.scratch)
            .expect("read scratch")
            .next()
            .is_none()
    }

    fn context(&self) -> DeployContext {
        let base = Utf8PathBuf::try_from(self.area.clone()).expect("UTF-8 area");
        DeployContext::new(
            AreaTable::new([("sites", base)]),
            self.signer.public_key_file().into_bytes(),
        )
        .with_scratch_root(&self.scratch)
    }
}

/// A receiver listening on an ephemeral local port.
pub struct RunningReceiver {
    server: Arc<Server>,
    addr: SocketAddr,
    handle: Option<JoinHandle<()>>,
}

impl RunningReceiver {
    /// Serve `workspace` with a fetcher rooted at `api_base`.
    pub fn start(workspace: &Workspace, api_base: &str) -> Self {
        let fetcher = GithubFetcher::new(api_base, Duration::from_secs(10));
        let state = Arc::new(ReceiverState::new(workspace.context(), Box::new(fetcher)));
        let server = Arc::new(Server::http("127.0.0.1:0").expect("receiver listener"));
        let addr = server.server_addr().to_ip().expect("IP listener");
        let handle = {
            let server = Arc::clone(&server);
            thread::spawn(move || serve(&server, state))
        };
        Self {
            server,
            addr,
            handle: Some(handle),
        }
    }

    /// URL of `path` on this receiver.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}

impl Drop for RunningReceiver {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Status and body of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: String,
}

fn client() -> ureq::Agent {
    let config = ureq::Agent::config_builder()
        .http_status_as_error(false)
        .timeout_global(Some(Duration::from_secs(30)))
        .build();
    ureq::Agent::new_with_config(config)
}

/// POST `body` as JSON to `url`.
pub fn post_json(url: &str, body: &str) -> HttpReply {
    let mut response = client()
        .post(url)
        .header("Content-Type", "application/json")
        .send(body)
        .expect("POST request");
    HttpReply {
        status: response.status().as_u16(),
        body: response.body_mut().read_to_string().expect("response body"),
    }
}

/// GET `url`.
pub fn get(url: &str) -> HttpReply {
    let mut response = client().get(url).call().expect("GET request");
    HttpReply {
        status: response.status().as_u16(),
        body: response.body_mut().read_to_string().expect("response body"),
    }
}

/// Render a deploy request body.
pub fn deploy_body(project: &str, signature: &str) -> String {
    serde_json::json!({
        "area": "sites",
        "project": project,
        "owner": "acme",
        "repo": "website",
        "artifact_id": "4242",
        "github_token": "ghs_test_token",
        "signature": signature,
    })
    .to_string()
}
