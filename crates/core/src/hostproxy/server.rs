//! Host proxy HTTP handlers
//!
//! Short, stateless request handlers over the shared [`ProxyState`]. All
//! responses are structured JSON: 400 for decode errors, 404 for unknown
//! sessions or routes, 413 past the message cap, and 5xx only for
//! internal failures.

use super::sessions::CallbackRecord;
use super::ProxyState;
use crate::paths::HOST_PROXY_SERVICE;
use base64::Engine;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::io::Read;
use tiny_http::{Header, Request, Response};
use tracing::{debug, warn};

/// Hard cap on request bodies (Assuan messages included).
pub const MAX_MESSAGE_BYTES: usize = 64 * 1024;

/// Serve one request. Runs on its own thread.
pub(super) fn handle_request(request: Request, state: &ProxyState) {
    let method = request.method().to_string();
    let url = request.url().to_string();
    let (path, query) = match url.split_once('?') {
        Some((path, query)) => (path.to_string(), query.to_string()),
        None => (url.clone(), String::new()),
    };
    debug!(%method, %path, "Host proxy request");

    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    match (method.as_str(), segments.as_slice()) {
        ("GET", ["healthz"]) => respond(
            request,
            200,
            json!({"status": "ok", "service": HOST_PROXY_SERVICE}),
        ),
        ("POST", ["callback", session]) => {
            let session = session.to_string();
            handle_callback_post(request, state, &session, &path, &query)
        }
        ("GET", ["callback", session, "data"]) => {
            let body = match state.sessions.get(session) {
                Some(record) => json!({"received": true, "callback": record}),
                None => json!({"received": false}),
            };
            respond(request, 200, body)
        }
        ("DELETE", ["callback", session]) => {
            if state.sessions.delete(session) {
                respond(request, 200, json!({"status": "deleted"}))
            } else {
                respond(request, 404, json!({"error": "unknown session"}))
            }
        }
        ("POST", ["gpg", "agent"]) => handle_gpg(request),
        ("POST", ["git", "credential"]) => handle_git_credential(request),
        _ => respond(request, 404, json!({"error": "not found"})),
    }
}

fn handle_callback_post(
    mut request: Request,
    state: &ProxyState,
    session: &str,
    path: &str,
    query: &str,
) {
    let headers: Vec<(String, String)> = request
        .headers()
        .iter()
        .map(|h| (h.field.to_string(), h.value.to_string()))
        .collect();
    let body = match read_body(&mut request) {
        Ok(body) => body,
        Err(response) => return respond_raw(request, response),
    };
    state.sessions.record(
        session,
        CallbackRecord {
            method: "POST".to_string(),
            path: path.to_string(),
            query: query.to_string(),
            headers,
            body: String::from_utf8_lossy(&body).into_owned(),
            received_at: Utc::now(),
        },
    );
    respond(request, 200, json!({"status": "recorded"}));
}

#[derive(Debug, Deserialize)]
struct GpgRequest {
    /// base64-encoded Assuan message
    data: String,
}

fn handle_gpg(mut request: Request) {
    let body = match read_body(&mut request) {
        Ok(body) => body,
        Err(response) => return respond_raw(request, response),
    };
    let parsed: GpgRequest = match serde_json::from_slice(&body) {
        Ok(parsed) => parsed,
        Err(e) => {
            return respond(
                request,
                400,
                json!({"success": false, "error": format!("invalid request: {e}")}),
            )
        }
    };
    let message = match base64::engine::general_purpose::STANDARD.decode(&parsed.data) {
        Ok(message) => message,
        Err(e) => {
            return respond(
                request,
                400,
                json!({"success": false, "error": format!("invalid base64: {e}")}),
            )
        }
    };
    if message.len() > MAX_MESSAGE_BYTES {
        return respond(
            request,
            413,
            json!({"success": false, "error": "message exceeds 64 KiB"}),
        );
    }

    match relay_to_gpg_agent(&message) {
        Ok(reply) => respond(
            request,
            200,
            json!({
                "success": true,
                "data": base64::engine::general_purpose::STANDARD.encode(reply),
            }),
        ),
        Err(e) => {
            warn!(error = %e, "GPG agent relay failed");
            respond(request, 502, json!({"success": false, "error": e}))
        }
    }
}

/// Relay one Assuan message to the host gpg-agent and collect its reply.
#[cfg(unix)]
fn relay_to_gpg_agent(message: &[u8]) -> std::result::Result<Vec<u8>, String> {
    use std::io::{BufRead, BufReader, Write};
    use std::os::unix::net::UnixStream;
    use std::time::Duration;

    let socket = gpg_agent_socket().ok_or_else(|| "gpg-agent socket not found".to_string())?;
    let stream = UnixStream::connect(&socket)
        .map_err(|e| format!("cannot connect to gpg-agent at {}: {e}", socket.display()))?;
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .map_err(|e| e.to_string())?;

    let mut reader = BufReader::new(stream.try_clone().map_err(|e| e.to_string())?);
    let mut writer = stream;

    // Consume the agent's greeting line before forwarding.
    let mut greeting = String::new();
    reader.read_line(&mut greeting).map_err(|e| e.to_string())?;

    writer.write_all(message).map_err(|e| e.to_string())?;
    if !message.ends_with(b"\n") {
        writer.write_all(b"\n").map_err(|e| e.to_string())?;
    }
    writer.flush().map_err(|e| e.to_string())?;

    // Assuan replies are lines terminated by an OK or ERR status.
    let mut reply = Vec::new();
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                reply.extend_from_slice(line.as_bytes());
                if line.starts_with("OK") || line.starts_with("ERR") {
                    break;
                }
                if reply.len() > MAX_MESSAGE_BYTES {
                    return Err("agent reply exceeds 64 KiB".to_string());
                }
            }
            Err(e) => return Err(format!("read from gpg-agent failed: {e}")),
        }
    }
    Ok(reply)
}

#[cfg(not(unix))]
fn relay_to_gpg_agent(_message: &[u8]) -> std::result::Result<Vec<u8>, String> {
    Err("GPG forwarding is only supported on unix hosts".to_string())
}

/// Locate the host gpg-agent socket, preferring the restricted
/// remote-forwarding socket.
#[cfg(unix)]
fn gpg_agent_socket() -> Option<std::path::PathBuf> {
    for dir_key in ["agent-extra-socket", "agent-socket"] {
        if let Ok(output) = std::process::Command::new("gpgconf")
            .args(["--list-dirs", dir_key])
            .output()
        {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() && std::path::Path::new(&path).exists() {
                    return Some(path.into());
                }
            }
        }
    }
    directories_next::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".gnupg/S.gpg-agent"))
        .filter(|p| p.exists())
}

#[derive(Debug, Deserialize)]
struct GitCredentialRequest {
    /// Helper verb: get, store, or erase
    action: String,
    /// `key=value` lines as defined by git-credential
    input: String,
}

fn handle_git_credential(mut request: Request) {
    let body = match read_body(&mut request) {
        Ok(body) => body,
        Err(response) => return respond_raw(request, response),
    };
    let parsed: GitCredentialRequest = match serde_json::from_slice(&body) {
        Ok(parsed) => parsed,
        Err(e) => {
            return respond(
                request,
                400,
                json!({"success": false, "error": format!("invalid request: {e}")}),
            )
        }
    };
    // Helper verbs map onto the porcelain subcommands.
    let subcommand = match parsed.action.as_str() {
        "get" => "fill",
        "store" => "approve",
        "erase" => "reject",
        other => {
            return respond(
                request,
                400,
                json!({"success": false, "error": format!("unknown action '{other}'")}),
            )
        }
    };

    match run_git_credential(subcommand, &parsed.input) {
        Ok(output) => respond(request, 200, json!({"success": true, "output": output})),
        Err(e) => {
            warn!(error = %e, "git credential relay failed");
            respond(request, 502, json!({"success": false, "error": e}))
        }
    }
}

/// Invoke the host's native credential machinery.
fn run_git_credential(subcommand: &str, input: &str) -> std::result::Result<String, String> {
    use std::io::Write;
    use std::process::{Command, Stdio};

    let mut child = Command::new("git")
        .args(["credential", subcommand])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("cannot run git: {e}"))?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(input.as_bytes())
            .and_then(|_| stdin.write_all(b"\n"))
            .map_err(|e| format!("cannot write to git: {e}"))?;
    }
    let output = child
        .wait_with_output()
        .map_err(|e| format!("git credential failed: {e}"))?;
    if !output.status.success() {
        return Err(String::from_utf8_lossy(&output.stderr).trim().to_string());
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Read a request body up to the message cap. An oversized body yields a
/// ready-made 413 response.
fn read_body(request: &mut Request) -> std::result::Result<Vec<u8>, Response<std::io::Cursor<Vec<u8>>>> {
    let mut body = Vec::new();
    let mut reader = request.as_reader().take((MAX_MESSAGE_BYTES + 1) as u64);
    if reader.read_to_end(&mut body).is_err() {
        return Err(json_body(400, json!({"error": "unreadable body"})));
    }
    if body.len() > MAX_MESSAGE_BYTES {
        return Err(json_body(413, json!({"error": "body exceeds 64 KiB"})));
    }
    Ok(body)
}

fn json_body(status: u16, body: serde_json::Value) -> Response<std::io::Cursor<Vec<u8>>> {
    let mut response = Response::from_data(body.to_string().into_bytes()).with_status_code(status);
    if let Ok(header) = Header::from_bytes("Content-Type", "application/json") {
        response = response.with_header(header);
    }
    response
}

fn respond(request: Request, status: u16, body: serde_json::Value) {
    respond_raw(request, json_body(status, body));
}

fn respond_raw(request: Request, response: Response<std::io::Cursor<Vec<u8>>>) {
    if let Err(e) = request.respond(response) {
        warn!(error = %e, "Failed to write host proxy response");
    }
}
