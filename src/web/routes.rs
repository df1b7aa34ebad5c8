use crate::artifact::{Artifact, ArtifactKind};
use crate::domain::DomainName;
use crate::error::Error;
use crate::web::page::{Banners, PendingChallenge, render_index};
use crate::{CRATE_NAME, Tracker};
use anyhow::Context;
use http::{Method, StatusCode, header};
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::convert::Infallible;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error};
use url::form_urlencoded;

type HttpResponse = Response<Full<Bytes>>;

const MAX_BODY_SIZE: usize = 64 * 1024;
/// Longest message carried in a redirect's query string
const MAX_REDIRECT_MESSAGE: usize = 400;

#[derive(Debug, Deserialize)]
struct AddDomainRequest {
    domain: String,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NotesRequest {
    notes: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChallengeResponse<'a> {
    domain: &'a DomainName,
    file_name: &'a str,
    file_content: &'a str,
    path: String,
}

/// Answer one request. Never fails: errors become error responses.
pub async fn handle(
    tracker: Arc<Mutex<Tracker>>,
    request: Request<Incoming>,
) -> Result<HttpResponse, Infallible> {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let response = match route(&tracker, request).await {
        Ok(response) => response,
        Err(e) => {
            error!("Handling {method} {path} failed: {e:#}");
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &json!({ "error": format!("{e:#}") }),
            )
        }
    };
    debug!("{method} {path} -> {}", response.status());
    Ok(response)
}

async fn route(
    tracker: &Mutex<Tracker>,
    request: Request<Incoming>,
) -> anyhow::Result<HttpResponse> {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let query = parse_query(request.uri().query());
    let decoded = match path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(urlencoding::decode)
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(decoded) => decoded,
        Err(e) => {
            return Ok(json_response(
                StatusCode::BAD_REQUEST,
                &json!({ "error": format!("Invalid percent-encoding in path: {e}") }),
            ));
        }
    };
    let segments = decoded.iter().map(|segment| &**segment).collect::<Vec<&str>>();

    let response = match (&method, segments.as_slice()) {
        (&Method::GET, []) => index(tracker, &query).await?,
        (&Method::GET, ["health"]) => json_response(StatusCode::OK, &json!({ "status": "ok" })),

        // Form actions of the HTML page
        (&Method::POST, ["domains", "add"]) => {
            let form = read_form(request).await?;
            let domain = form.get("domain").map_or("", String::as_str);
            let notes = form.get("notes").map(String::as_str);
            let result = tracker.lock().await.add_domain(domain, notes).await;
            redirect_after(result.map(|added| format!("Now tracking {}", added.record.name)))
        }
        (&Method::POST, ["domains", "refresh-all"]) => {
            let result = tracker.lock().await.refresh_all().await;
            redirect_after(result.map(|domains| format!("Checked {} domains", domains.len())))
        }
        (&Method::POST, ["domains", name, action]) => {
            let name = match DomainName::from_str(name) {
                Ok(name) => name,
                Err(e) => return Ok(redirect_with("error", &e.to_string())),
            };
            let mut tracker = tracker.lock().await;
            match *action {
                "delete" => redirect_after(
                    tracker
                        .remove_domain(&name)
                        .await
                        .map(|()| format!("Stopped tracking {name}")),
                ),
                "refresh" => redirect_after(
                    tracker
                        .refresh(&name)
                        .await
                        .map(|_| format!("Checked {name}")),
                ),
                "renew" => match tracker.start_renewal(&name).await {
                    Ok(_) => redirect_with("challenge", name.as_str()),
                    Err(e) => redirect_error(&e),
                },
                _ => not_found(),
            }
        }
        (&Method::POST, ["domains", name, "renew", action]) => {
            let name = match DomainName::from_str(name) {
                Ok(name) => name,
                Err(e) => return Ok(redirect_with("error", &e.to_string())),
            };
            let mut tracker = tracker.lock().await;
            match *action {
                "complete" => redirect_after(tracker.complete_renewal(&name).await.map(|done| {
                    format!(
                        "Renewed the certificate of {name}, {} days left",
                        done.days_until_expiry.unwrap_or_default()
                    )
                })),
                "cancel" => redirect_after(
                    tracker
                        .cancel_renewal(&name)
                        .await
                        .map(|_| format!("Cancelled the renewal of {name}")),
                ),
                _ => not_found(),
            }
        }

        // JSON API
        (&Method::GET, ["api", "domains"]) => {
            json_result(StatusCode::OK, tracker.lock().await.list_domains().await)
        }
        (&Method::POST, ["api", "domains"]) => {
            let body: AddDomainRequest = match read_json(request).await {
                Ok(body) => body,
                Err(response) => return Ok(response),
            };
            let result = tracker
                .lock()
                .await
                .add_domain(&body.domain, body.notes.as_deref())
                .await;
            json_result(StatusCode::CREATED, result)
        }
        (method, ["api", "domains", name, rest @ ..]) => {
            let name = match DomainName::from_str(name) {
                Ok(name) => name,
                Err(e) => return Ok(error_response(&e)),
            };
            api_domain(tracker, method, &name, rest, request).await?
        }
        _ => not_found(),
    };
    Ok(response)
}

async fn api_domain(
    tracker: &Mutex<Tracker>,
    method: &Method,
    name: &DomainName,
    rest: &[&str],
    request: Request<Incoming>,
) -> anyhow::Result<HttpResponse> {
    let response = match (method, rest) {
        (&Method::GET, []) => json_result(StatusCode::OK, tracker.lock().await.get_domain(name).await),
        (&Method::DELETE, []) => match tracker.lock().await.remove_domain(name).await {
            Ok(()) => empty_response(StatusCode::NO_CONTENT),
            Err(e) => error_response(&e),
        },
        (&Method::PATCH, []) => {
            let body: NotesRequest = match read_json(request).await {
                Ok(body) => body,
                Err(response) => return Ok(response),
            };
            let result = tracker
                .lock()
                .await
                .set_notes(name, body.notes.as_deref())
                .await;
            json_result(StatusCode::OK, result)
        }
        (&Method::POST, ["refresh"]) => json_result(StatusCode::OK, tracker.lock().await.refresh(name).await),
        (&Method::GET, ["renew"]) => {
            let tracker = tracker.lock().await;
            match tracker.get_domain(name).await {
                Ok(overview) => json_response(StatusCode::OK, &overview.renewal),
                Err(e) => error_response(&e),
            }
        }
        (&Method::POST, ["renew"]) => match tracker.lock().await.start_renewal(name).await {
            Ok(challenge) => json_response(
                StatusCode::OK,
                &ChallengeResponse {
                    domain: name,
                    file_name: &challenge.file_name,
                    file_content: &challenge.file_content,
                    path: challenge.path(),
                },
            ),
            Err(e) => error_response(&e),
        },
        (&Method::DELETE, ["renew"]) => match tracker.lock().await.cancel_renewal(name).await {
            Ok(cancelled) => json_response(StatusCode::OK, &json!({ "cancelled": cancelled })),
            Err(e) => error_response(&e),
        },
        (&Method::POST, ["renew", "complete"]) => {
            json_result(StatusCode::OK, tracker.lock().await.complete_renewal(name).await)
        }
        (&Method::GET, ["download", kind]) => {
            let Ok(kind) = ArtifactKind::from_str(kind) else {
                return Ok(json_response(
                    StatusCode::NOT_FOUND,
                    &json!({ "error": format!("Unknown artifact kind {kind}") }),
                ));
            };
            match tracker.lock().await.download(name, kind).await {
                Ok(artifact) => download_response(artifact)?,
                Err(e) => error_response(&e),
            }
        }
        _ => not_found(),
    };
    Ok(response)
}

async fn index(
    tracker: &Mutex<Tracker>,
    query: &HashMap<String, String>,
) -> anyhow::Result<HttpResponse> {
    let tracker = tracker.lock().await;
    let domains = match tracker.list_domains().await {
        Ok(domains) => domains,
        Err(e) => return Ok(error_response(&e)),
    };
    let banners = Banners {
        notice: query.get("notice").cloned(),
        error: query.get("error").cloned(),
        tool_error: query.get("tool_error").cloned(),
    };
    let challenge_domain = query
        .get("challenge")
        .and_then(|name| DomainName::from_str(name).ok());
    let pending = challenge_domain.as_ref().and_then(|domain| {
        tracker
            .pending_challenge(domain)
            .map(|challenge| PendingChallenge { domain, challenge })
    });
    let html = render_index(&domains, &banners, pending);
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::SERVER, CRATE_NAME)
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .body(Full::new(Bytes::from(html)))?)
}

fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    query
        .map(|query| form_urlencoded::parse(query.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

async fn read_body(request: Request<Incoming>) -> anyhow::Result<Bytes> {
    let body = Limited::new(request.into_body(), MAX_BODY_SIZE)
        .collect()
        .await
        .map_err(|e| anyhow::anyhow!("Reading request body failed: {e}"))?;
    Ok(body.to_bytes())
}

async fn read_form(request: Request<Incoming>) -> anyhow::Result<HashMap<String, String>> {
    let body = read_body(request).await?;
    Ok(form_urlencoded::parse(&body).into_owned().collect())
}

async fn read_json<T: DeserializeOwned>(
    request: Request<Incoming>,
) -> Result<T, HttpResponse> {
    let body = read_body(request).await.map_err(|e| {
        json_response(StatusCode::BAD_REQUEST, &json!({ "error": e.to_string() }))
    })?;
    serde_json::from_slice(&body).map_err(|e| {
        json_response(
            StatusCode::BAD_REQUEST,
            &json!({ "error": format!("Invalid request body: {e}") }),
        )
    })
}

pub(super) fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::DomainNotFound(_)
        | Error::ArtifactNotFound { .. }
        | Error::MissingCertificate { .. }
        | Error::NoPendingRenewal(_) => StatusCode::NOT_FOUND,
        Error::DuplicateDomain(_) | Error::RenewalConflict(_) => StatusCode::CONFLICT,
        Error::InvalidDomain { .. } => StatusCode::BAD_REQUEST,
        Error::ToolInvocation(_) => StatusCode::BAD_GATEWAY,
        Error::ToolValidation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: &Error) -> HttpResponse {
    if let Error::Internal(e) = error {
        error!("Internal error: {e:#}");
    }
    json_response(status_for(error), &json!({ "error": error.to_string() }))
}

fn json_response<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> HttpResponse {
    match serde_json::to_vec(value) {
        Ok(body) => bytes_response(status, "application/json", Bytes::from(body)),
        Err(e) => {
            error!("Serializing response failed: {e}");
            empty_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn json_result<T: Serialize>(status: StatusCode, result: Result<T, Error>) -> HttpResponse {
    match result {
        Ok(value) => json_response(status, &value),
        Err(e) => error_response(&e),
    }
}

fn bytes_response(status: StatusCode, content_type: &str, body: Bytes) -> HttpResponse {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(header::SERVER, http::HeaderValue::from_static(CRATE_NAME));
    if let Ok(content_type) = http::HeaderValue::from_str(content_type) {
        headers.insert(header::CONTENT_TYPE, content_type);
    }
    response
}

fn empty_response(status: StatusCode) -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::SERVER, http::HeaderValue::from_static(CRATE_NAME));
    response
}

fn not_found() -> HttpResponse {
    json_response(StatusCode::NOT_FOUND, &json!({ "error": "No such page" }))
}

fn download_response(artifact: Artifact) -> anyhow::Result<HttpResponse> {
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::SERVER, CRATE_NAME)
        .header(header::CONTENT_TYPE, artifact.media_type())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", artifact.file_name),
        );
    if let Some(modified) = artifact.modified {
        builder = builder.header(header::LAST_MODIFIED, httpdate::fmt_http_date(modified));
    }
    builder
        .body(Full::new(Bytes::from(artifact.bytes)))
        .context("Building download response failed")
}

/// Cut `message` to at most [`MAX_REDIRECT_MESSAGE`] characters
fn truncate_message(message: &str) -> &str {
    match message.char_indices().nth(MAX_REDIRECT_MESSAGE) {
        Some((end, _)) => &message[..end],
        None => message,
    }
}

fn redirect_with(key: &str, value: &str) -> HttpResponse {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair(key, truncate_message(value))
        .finish();
    let mut response = empty_response(StatusCode::SEE_OTHER);
    if let Ok(location) = http::HeaderValue::from_str(&format!("/?{query}")) {
        response.headers_mut().insert(header::LOCATION, location);
    }
    response
}

fn redirect_error(error: &Error) -> HttpResponse {
    match error {
        Error::ToolInvocation(text) | Error::ToolValidation(text) => {
            redirect_with("tool_error", text)
        }
        Error::Internal(e) => {
            error!("Internal error: {e:#}");
            redirect_with("error", &error.to_string())
        }
        other => redirect_with("error", &other.to_string()),
    }
}

fn redirect_after(result: Result<String, Error>) -> HttpResponse {
    match result {
        Ok(notice) => redirect_with("notice", &notice),
        Err(e) => redirect_error(&e),
    }
}
