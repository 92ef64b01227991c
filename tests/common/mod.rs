#![allow(dead_code)]

//! An in-process stand-in for Drive v3 and the backend OAuth proxy.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use drive_portal::google_drive::{
    store::{ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, TOKEN_EXPIRY_KEY},
    AuthConfig, DriveClient, DriveEndpoints, MemoryStore, TokenManager, TokenStore,
};
use serde_json::{json, Value};

pub const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
pub const REDIRECT_URI: &str = "http://localhost:3000/google-oauth-callback";
pub const GOOD_CODE: &str = "good-code";
pub const REFRESH_TOKEN: &str = "refresh-1";

type Params = Query<HashMap<String, String>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap()
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub parents: Vec<String>,
    pub content: Vec<u8>,
}

impl Node {
    fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME
    }

    fn to_json(&self) -> Value {
        let mut v = json!({
            "id": self.id,
            "name": self.name,
            "mimeType": self.mime_type,
            "parents": self.parents,
            "modifiedTime": "2024-03-01T10:00:00.000Z",
            "webViewLink": format!("https://drive.google.com/open?id={}", self.id),
        });
        if !self.is_folder() {
            v["size"] = json!(self.content.len().to_string());
        }
        v
    }
}

struct Session {
    name: String,
    mime_type: String,
    parents: Vec<String>,
    total: usize,
    received: Vec<u8>,
}

#[derive(Default)]
pub struct FakeDrive {
    base: Mutex<String>,
    nodes: Mutex<Vec<Node>>,
    sessions: Mutex<HashMap<String, Session>>,
    valid_tokens: Mutex<HashSet<String>>,
    /// Status to answer with for any request touching this id.
    pub failures: Mutex<HashMap<String, u16>>,
    pub upload_log: Mutex<Vec<String>>,
    pub token_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub reject_refresh: AtomicBool,
    /// Keep only the first half of every upload chunk.
    pub partial_acks: AtomicBool,
    /// Keep nothing, answering `308` without a Range header.
    pub stall_uploads: AtomicBool,
    issued: AtomicUsize,
    next_id: AtomicUsize,
}

impl FakeDrive {
    pub fn add_folder(&self, id: &str, name: &str, parent: &str) {
        self.insert(id, name, FOLDER_MIME, parent, Vec::new());
    }

    pub fn add_file(&self, id: &str, name: &str, parent: &str, content: &[u8]) {
        self.insert(id, name, "application/octet-stream", parent, content.to_vec());
    }

    /// Adds an extra parent, as Drive allows.
    pub fn link(&self, id: &str, parent: &str) {
        if let Some(n) = lock(&self.nodes).iter_mut().find(|n| n.id == id) {
            n.parents.push(parent.to_string());
        }
    }

    pub fn node(&self, id: &str) -> Option<Node> {
        lock(&self.nodes).iter().find(|n| n.id == id).cloned()
    }

    pub fn fail(&self, id: &str, status: u16) {
        lock(&self.failures).insert(id.to_string(), status);
    }

    pub fn accept_token(&self, token: &str) {
        lock(&self.valid_tokens).insert(token.to_string());
    }

    pub fn revoke_all(&self) {
        lock(&self.valid_tokens).clear();
    }

    pub fn uploads(&self) -> Vec<String> {
        lock(&self.upload_log).clone()
    }

    fn insert(&self, id: &str, name: &str, mime: &str, parent: &str, content: Vec<u8>) -> Node {
        let node = Node {
            id: id.to_string(),
            name: name.to_string(),
            mime_type: mime.to_string(),
            parents: vec![parent.to_string()],
            content,
        };
        lock(&self.nodes).push(node.clone());
        node
    }

    fn new_id(&self) -> String {
        format!("gen-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn failure(&self, id: &str) -> Option<u16> {
        lock(&self.failures).get(id).copied()
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<(), Response> {
        let ok = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|t| lock(&self.valid_tokens).contains(t))
            .unwrap_or(false);

        if ok {
            Ok(())
        } else {
            Err(google_error(401, "Invalid Credentials"))
        }
    }

    fn issue_token(&self, with_refresh: bool) -> Value {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let access = format!("access-{n}");
        self.accept_token(&access);

        let mut v = json!({ "access_token": access, "expires_in": 3600 });
        if with_refresh {
            v["refresh_token"] = json!(REFRESH_TOKEN);
        }
        v
    }
}

fn google_error(status: u16, message: &str) -> Response {
    let code = StatusCode::from_u16(status).unwrap();
    (
        code,
        Json(json!({ "error": { "code": status, "message": message } })),
    )
        .into_response()
}

fn oauth_error(error: &str, description: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": error, "error_description": description })),
    )
        .into_response()
}

fn unquote(s: &str) -> String {
    s.trim()
        .trim_matches('\'')
        .replace("\\'", "'")
        .replace("\\\\", "\\")
}

fn parent_in(q: &str) -> Option<String> {
    q.split(" and ")
        .find_map(|c| c.trim().strip_suffix(" in parents").map(unquote))
}

fn matches_query(n: &Node, q: &str) -> bool {
    q.split(" and ").all(|clause| {
        let c = clause.trim();
        if let Some(id) = c.strip_suffix(" in parents") {
            let id = unquote(id);
            n.parents.iter().any(|p| *p == id)
        } else if let Some(v) = c.strip_prefix("name = ") {
            n.name == unquote(v)
        } else if let Some(v) = c.strip_prefix("name contains ") {
            n.name.to_lowercase().contains(&unquote(v).to_lowercase())
        } else if let Some(v) = c.strip_prefix("mimeType=") {
            n.mime_type == unquote(v)
        } else {
            c == "trashed=false"
        }
    })
}

async fn list_files(
    State(fake): State<Arc<FakeDrive>>,
    headers: HeaderMap,
    Query(params): Params,
) -> Response {
    if let Err(r) = fake.authorize(&headers) {
        return r;
    }
    fake.list_calls.fetch_add(1, Ordering::SeqCst);

    let q = params.get("q").cloned().unwrap_or_default();
    if let Some(status) = parent_in(&q).and_then(|p| fake.failure(&p)) {
        return google_error(status, "listing failed");
    }

    let mut hits: Vec<Node> = lock(&fake.nodes)
        .iter()
        .filter(|n| matches_query(n, &q))
        .cloned()
        .collect();
    hits.sort_by(|a, b| (!a.is_folder(), &a.name).cmp(&(!b.is_folder(), &b.name)));

    let size = params
        .get("pageSize")
        .and_then(|s| s.parse().ok())
        .unwrap_or(100usize);
    let offset = params
        .get("pageToken")
        .and_then(|s| s.parse().ok())
        .unwrap_or(0usize);

    let page: Vec<Value> = hits.iter().skip(offset).take(size).map(Node::to_json).collect();
    let mut body = json!({ "files": page });
    if offset + size < hits.len() {
        body["nextPageToken"] = json!((offset + size).to_string());
    }
    Json(body).into_response()
}

async fn get_file(
    State(fake): State<Arc<FakeDrive>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Query(params): Params,
) -> Response {
    if let Err(r) = fake.authorize(&headers) {
        return r;
    }
    if let Some(status) = fake.failure(&id) {
        return google_error(status, "request failed");
    }

    match fake.node(&id) {
        None => google_error(404, &format!("File not found: {id}.")),
        Some(n) if params.get("alt").map(String::as_str) == Some("media") => {
            (StatusCode::OK, n.content).into_response()
        }
        Some(n) => Json(n.to_json()).into_response(),
    }
}

async fn create_file(
    State(fake): State<Arc<FakeDrive>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(r) = fake.authorize(&headers) {
        return r;
    }

    let parent = body["parents"][0].as_str().unwrap_or("root").to_string();
    if let Some(status) = fake.failure(&parent) {
        return google_error(status, "insufficient permissions");
    }

    let node = fake.insert(
        &fake.new_id(),
        body["name"].as_str().unwrap_or_default(),
        body["mimeType"].as_str().unwrap_or("application/octet-stream"),
        &parent,
        Vec::new(),
    );
    Json(node.to_json()).into_response()
}

async fn update_file(
    State(fake): State<Arc<FakeDrive>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(r) = fake.authorize(&headers) {
        return r;
    }

    let mut nodes = lock(&fake.nodes);
    match nodes.iter_mut().find(|n| n.id == id) {
        None => google_error(404, &format!("File not found: {id}.")),
        Some(n) => {
            if let Some(name) = body["name"].as_str() {
                n.name = name.to_string();
            }
            Json(n.to_json()).into_response()
        }
    }
}

async fn delete_file(
    State(fake): State<Arc<FakeDrive>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(r) = fake.authorize(&headers) {
        return r;
    }
    if let Some(status) = fake.failure(&id) {
        return google_error(status, "The user does not have sufficient permissions for this file.");
    }

    let mut nodes = lock(&fake.nodes);
    let before = nodes.len();
    nodes.retain(|n| n.id != id);
    if nodes.len() == before {
        return google_error(404, &format!("File not found: {id}."));
    }
    StatusCode::NO_CONTENT.into_response()
}

fn find(hay: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    hay.get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Splits a two-part `multipart/related` body into metadata and content.
fn split_related(body: &[u8], boundary: &str) -> Option<(Value, Vec<u8>)> {
    let separator = format!("\r\n--{boundary}\r\n");
    let closing = format!("\r\n--{boundary}--");

    let json_start = find(body, b"\r\n\r\n", 0)? + 4;
    let json_end = find(body, separator.as_bytes(), json_start)?;
    let data_start = find(body, b"\r\n\r\n", json_end + separator.len())? + 4;
    let data_end = body.len().checked_sub(closing.len())?;

    let meta = serde_json::from_slice(&body[json_start..json_end]).ok()?;
    Some((meta, body[data_start..data_end].to_vec()))
}

async fn start_upload(
    State(fake): State<Arc<FakeDrive>>,
    headers: HeaderMap,
    Query(params): Params,
    body: Bytes,
) -> Response {
    if let Err(r) = fake.authorize(&headers) {
        return r;
    }

    match params.get("uploadType").map(String::as_str) {
        Some("multipart") => {
            let boundary = headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split("boundary=").nth(1))
                .unwrap_or_default()
                .to_string();
            let (meta, content) = match split_related(&body, &boundary) {
                Some(parts) => parts,
                None => return google_error(400, "Malformed multipart body"),
            };

            lock(&fake.upload_log).push("multipart".to_string());
            let node = fake.insert(
                &fake.new_id(),
                meta["name"].as_str().unwrap_or_default(),
                meta["mimeType"].as_str().unwrap_or_default(),
                meta["parents"][0].as_str().unwrap_or("root"),
                content,
            );
            Json(node.to_json()).into_response()
        }
        Some("resumable") => {
            let meta: Value = serde_json::from_slice(&body).unwrap_or_default();
            let total = headers
                .get("x-upload-content-length")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(0usize);

            let sid = fake.new_id();
            lock(&fake.sessions).insert(
                sid.clone(),
                Session {
                    name: meta["name"].as_str().unwrap_or_default().to_string(),
                    mime_type: meta["mimeType"].as_str().unwrap_or_default().to_string(),
                    parents: vec![meta["parents"][0].as_str().unwrap_or("root").to_string()],
                    total,
                    received: Vec::new(),
                },
            );
            lock(&fake.upload_log).push("resumable".to_string());

            let location = format!(
                "{}/upload/drive/v3/files?uploadType=resumable&upload_id={sid}",
                lock(&fake.base)
            );
            (StatusCode::OK, [(header::LOCATION, location)]).into_response()
        }
        _ => google_error(400, "Unsupported uploadType"),
    }
}

async fn upload_chunk(
    State(fake): State<Arc<FakeDrive>>,
    headers: HeaderMap,
    Query(params): Params,
    body: Bytes,
) -> Response {
    if let Err(r) = fake.authorize(&headers) {
        return r;
    }

    let range = headers
        .get(header::CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    lock(&fake.upload_log).push(format!("chunk {range}"));

    let start = range
        .strip_prefix("bytes ")
        .and_then(|r| r.split('-').next())
        .and_then(|s| s.parse::<usize>().ok());

    let sid = params.get("upload_id").cloned().unwrap_or_default();
    let mut sessions = lock(&fake.sessions);
    let session = match sessions.get_mut(&sid) {
        Some(s) => s,
        None => return google_error(404, "No such upload session"),
    };

    if let Some(start) = start {
        if !fake.stall_uploads.load(Ordering::SeqCst) {
            let keep = if fake.partial_acks.load(Ordering::SeqCst) {
                (body.len() / 2).max(1)
            } else {
                body.len()
            };
            session.received.truncate(start);
            session.received.extend_from_slice(&body[..keep]);
        }
    }

    if session.total > 0 && session.received.len() >= session.total {
        let Some(s) = sessions.remove(&sid) else {
            return google_error(404, "No such upload session");
        };
        let node = fake.insert(&fake.new_id(), &s.name, &s.mime_type, &s.parents[0], s.received);
        return Json(node.to_json()).into_response();
    }

    if session.received.is_empty() {
        return StatusCode::PERMANENT_REDIRECT.into_response();
    }
    let ack = format!("bytes=0-{}", session.received.len() - 1);
    (StatusCode::PERMANENT_REDIRECT, [(header::RANGE, ack)]).into_response()
}

async fn exchange_code(State(fake): State<Arc<FakeDrive>>, Json(body): Json<Value>) -> Response {
    fake.token_calls.fetch_add(1, Ordering::SeqCst);
    if body["code"] != GOOD_CODE || body["redirect_uri"] != REDIRECT_URI {
        return oauth_error("invalid_grant", "Malformed auth code.");
    }
    Json(fake.issue_token(true)).into_response()
}

async fn refresh_token(State(fake): State<Arc<FakeDrive>>, Json(body): Json<Value>) -> Response {
    fake.refresh_calls.fetch_add(1, Ordering::SeqCst);
    // slow enough for concurrent callers to pile up behind the first refresh
    tokio::time::sleep(Duration::from_millis(50)).await;

    if fake.reject_refresh.load(Ordering::SeqCst) || body["refresh_token"] != REFRESH_TOKEN {
        return oauth_error("invalid_grant", "Token has been expired or revoked.");
    }
    Json(fake.issue_token(false)).into_response()
}

fn router(fake: Arc<FakeDrive>) -> Router {
    Router::new()
        .route("/drive/v3/files", get(list_files).post(create_file))
        .route(
            "/drive/v3/files/{id}",
            get(get_file).patch(update_file).delete(delete_file),
        )
        .route("/upload/drive/v3/files", post(start_upload).put(upload_chunk))
        .route("/api/google/oauth/token", post(exchange_code))
        .route("/api/google/oauth/refresh", post(refresh_token))
        .layer(DefaultBodyLimit::disable())
        .with_state(fake)
}

pub struct Harness {
    pub fake: Arc<FakeDrive>,
    pub base: String,
    pub store: Arc<MemoryStore>,
    pub tokens: Arc<TokenManager>,
    pub client: Arc<DriveClient>,
}

pub async fn start() -> Harness {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());

    let fake = Arc::new(FakeDrive::default());
    *lock(&fake.base) = base.clone();

    let app = router(fake.clone());
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

    let store = Arc::new(MemoryStore::new());
    let tokens = Arc::new(TokenManager::new(
        AuthConfig::new("test-client", REDIRECT_URI, &base),
        store.clone(),
    ));
    let client = Arc::new(DriveClient::with_endpoints(
        tokens.clone(),
        DriveEndpoints::new(&format!("{base}/drive/v3"), &format!("{base}/upload/drive/v3")),
    ));

    Harness {
        fake,
        base,
        store,
        tokens,
        client,
    }
}

impl Harness {
    /// Runs the full consent round trip.
    pub async fn sign_in(&self) {
        let redirect = self.tokens.start_auth("/drive").unwrap();
        self.tokens
            .handle_callback(GOOD_CODE, &redirect.state)
            .await
            .unwrap();
    }

    /// Writes a token straight into the store, bypassing the proxy.
    pub fn seed_token(&self, access: &str, expires_in: chrono::Duration, refresh: Option<&str>) {
        let expiry = (chrono::Utc::now() + expires_in).timestamp_millis();
        self.store.set(ACCESS_TOKEN_KEY, access).unwrap();
        self.store.set(TOKEN_EXPIRY_KEY, &expiry.to_string()).unwrap();
        if let Some(r) = refresh {
            self.store.set(REFRESH_TOKEN_KEY, r).unwrap();
        }
    }

    /// tenant
    /// ├── ClientX
    /// │   ├── 2024
    /// │   │   └── invoice.pdf
    /// │   └── contract.docx
    /// └── ClientY
    ///     └── notes.txt
    pub fn seed_tree(&self) {
        let f = &self.fake;
        f.add_folder("tenant", "Tenant", "root");
        f.add_folder("client-x", "ClientX", "tenant");
        f.add_folder("x-2024", "2024", "client-x");
        f.add_file("invoice", "invoice.pdf", "x-2024", b"%PDF-1.4 invoice");
        f.add_file("contract", "contract.docx", "client-x", b"contract");
        f.add_folder("client-y", "ClientY", "tenant");
        f.add_file("notes", "notes.txt", "client-y", b"notes");
    }
}
