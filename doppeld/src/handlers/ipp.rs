//! IPP print service emulation.
//!
//! Speaks just enough HTTP and IPP to look like a real printer to CUPS
//! and friends: attribute queries get plausible answers, job queries a
//! synthetic job, and submitted documents are captured to disk as JSON.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use ipp_proto::model::{job_state, op, operation_name, printer_state, status, tag};
use ipp_proto::{Request, ResponseBuilder};

use super::http::RequestHead;
use super::{hexdump, HandlerContext};
use crate::config::expand_home;

/// Cap on the hex chunk-size line; a client that exceeds it is cut off
/// instead of being allowed to feed us forever.
pub const CHUNK_SIZE_LINE_MAX: usize = 1024;

/// Synthetic job id used for every captured submission.
const JOB_ID: i32 = 666;

/// Printer identity defaults, overridable per service.
const DEFAULT_PRINTER_ATTRIBUTES: &[(&str, &str)] = &[
    ("printer-name", "PRINTER_NAME"),
    ("printer-info", "PRINTER_INFO"),
    ("printer-make-and-model", "PRINTER_MAKE PRINTER_MODEL"),
    ("printer-location", "PRINTER_LOCATION"),
    ("printer-privacy-policy-uri", "https://www.example.org/"),
    ("ppd-name", "everywhere"),
];

#[derive(Debug, Serialize)]
struct ClientData {
    ip: String,
    user_agent: String,
}

#[derive(Debug, Serialize)]
struct JobData {
    name: String,
    uuid: String,
    #[serde(rename = "username")]
    user: String,
}

#[derive(Debug, Serialize)]
struct DocumentData {
    name: String,
    format: String,
    #[serde(serialize_with = "serialize_base64")]
    data: Vec<u8>,
}

/// One captured print job, serialized as the on-disk record.
#[derive(Debug, Serialize)]
struct PrintData {
    created_at: DateTime<Utc>,
    service: String,
    client: ClientData,
    job: JobData,
    document: DocumentData,
}

fn serialize_base64<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(data))
}

pub async fn handle(mut ctx: HandlerContext) {
    let mut buf = [0u8; 4096];
    let read = match ctx.stream.read(&mut buf).await {
        Ok(0) => {
            tracing::debug!("client {} disconnected", ctx.peer);
            return;
        }
        Ok(n) => n,
        Err(e) => {
            tracing::warn!("error reading from {}: {e}", ctx.peer);
            return;
        }
    };

    let head = match RequestHead::parse(&buf[..read]) {
        Ok(head) => head,
        Err(e) => {
            tracing::error!(
                "bad http request from {}: {e}\n{}",
                ctx.peer,
                hexdump(&buf[..read])
            );
            return;
        }
    };

    let body = match read_request_body(&mut ctx, &head, &buf[head.body_offset..read]).await {
        Ok(body) => body,
        Err(e) => {
            tracing::error!("error reading request body from {}: {e}", ctx.peer);
            return;
        }
    };

    let request = match Request::parse(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::error!("bad ipp request from {}: {e}\n{}", ctx.peer, hexdump(&body));
            return;
        }
    };

    let op_name = operation_name(request.operation)
        .map(str::to_string)
        .unwrap_or_else(|| format!("<unknown 0x{:04x}>", request.operation));
    tracing::info!(
        "{} <- {} ({}) {op_name}",
        ctx.service,
        ctx.peer.ip(),
        head.user_agent()
    );

    match request.operation {
        op::GET_PRINTER_ATTRIBUTES => on_get_printer_attributes(&mut ctx, &request).await,
        op::VALIDATE_JOB => on_validate_job(&mut ctx, &request).await,
        op::GET_JOBS => on_get_jobs(&mut ctx, &request).await,
        op::PRINT_JOB => on_print_job(&mut ctx, &head, &request).await,
        op::GET_JOB_ATTRIBUTES => on_get_job_attributes(&mut ctx, &request).await,
        _ => on_unhandled(&mut ctx, &request, &op_name).await,
    }
}

/// Body bytes for the request: whatever followed the head, plus a
/// continuation read when the client is waiting on a 100 Continue.
async fn read_request_body(
    ctx: &mut HandlerContext,
    head: &RequestHead,
    initial: &[u8],
) -> Result<Vec<u8>> {
    let mut body = initial.to_vec();
    if head.expects_continue() {
        ctx.stream
            .write_all(b"HTTP/1.1 100 Continue\r\n\r\n")
            .await
            .context("could not acknowledge 100-continue")?;

        if head.is_chunked() {
            body.extend(read_chunked_body(&mut ctx.stream).await?);
        } else {
            let mut buf = [0u8; 4096];
            let n = ctx.stream.read(&mut buf).await?;
            if n == 0 {
                return Err(anyhow!("no request body from {}", ctx.peer));
            }
            body.extend_from_slice(&buf[..n]);
        }
    }
    Ok(body)
}

/// Reassemble a chunked transfer: hex size line, that many bytes, a
/// trailing CRLF, until the zero chunk.
pub async fn read_chunked_body<S>(stream: &mut S) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let mut body = Vec::new();
    loop {
        let size = read_chunk_size(stream).await?;
        if size == 0 {
            break;
        }
        let start = body.len();
        body.resize(start + size, 0);
        stream
            .read_exact(&mut body[start..])
            .await
            .with_context(|| format!("short read on chunk of {size} bytes"))?;
    }
    Ok(body)
}

async fn read_chunk_size<S>(stream: &mut S) -> Result<usize>
where
    S: AsyncRead + Unpin + ?Sized,
{
    // The line may start with the CRLF terminating the previous chunk;
    // skipping blanks handles both positions.
    loop {
        let mut line = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            if stream.read(&mut byte).await? == 0 || byte[0] == b'\n' {
                break;
            }
            line.push(byte[0]);
            if line.len() >= CHUNK_SIZE_LINE_MAX {
                return Err(anyhow!(
                    "chunk size line exceeded {CHUNK_SIZE_LINE_MAX} bytes"
                ));
            }
        }
        let text = String::from_utf8_lossy(&line);
        let text = text.trim();
        if text.is_empty() {
            if line.is_empty() {
                // Plain EOF with no size line terminates the body.
                return Ok(0);
            }
            continue;
        }
        return usize::from_str_radix(text, 16)
            .with_context(|| format!("invalid chunk size line {text:?}"));
    }
}

fn scheme(ctx: &HandlerContext) -> &'static str {
    if ctx.srv_tls {
        "ipps"
    } else {
        "ipp"
    }
}

fn printer_uri(ctx: &HandlerContext) -> String {
    format!("{}://{}:{}/printer", scheme(ctx), ctx.srv_host, ctx.srv_port)
}

fn job_uri(ctx: &HandlerContext) -> String {
    format!(
        "{}://{}:{}/jobs/{JOB_ID}",
        scheme(ctx),
        ctx.srv_host,
        ctx.srv_port
    )
}

async fn respond(ctx: &mut HandlerContext, payload: Vec<u8>) {
    let mut response = format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: application/ipp\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n",
        payload.len()
    )
    .into_bytes();
    response.extend_from_slice(&payload);
    if let Err(e) = ctx.stream.write_all(&response).await {
        tracing::error!("error writing ipp response to {}: {e}", ctx.peer);
    }
}

async fn on_get_printer_attributes(ctx: &mut HandlerContext, request: &Request) {
    let value = |name: &str, default: &'static str| -> String {
        ctx.ipp_overrides
            .get(name)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    };
    let defaults: std::collections::HashMap<&str, &str> =
        DEFAULT_PRINTER_ATTRIBUTES.iter().copied().collect();

    let mut b = ResponseBuilder::new(status::OK, request.request_id);
    b.begin_group(tag::PRINTER_ATTRIBUTES);
    b.name("printer-name", &value("printer-name", defaults["printer-name"]));
    b.text("printer-info", &value("printer-info", defaults["printer-info"]));
    b.text(
        "printer-make-and-model",
        &value("printer-make-and-model", defaults["printer-make-and-model"]),
    );
    b.text(
        "printer-location",
        &value("printer-location", defaults["printer-location"]),
    );
    b.uri(
        "printer-privacy-policy-uri",
        &value(
            "printer-privacy-policy-uri",
            defaults["printer-privacy-policy-uri"],
        ),
    );
    b.name("ppd-name", &value("ppd-name", defaults["ppd-name"]));
    b.uri("printer-uri-supported", &printer_uri(ctx));
    b.keyword(
        "uri-security-supported",
        if ctx.srv_tls { "tls" } else { "none" },
    );
    b.keyword("uri-authentication-supported", "none");
    b.enumeration("printer-state", printer_state::IDLE);
    b.keyword("printer-state-reasons", "none");
    b.keyword("ipp-versions-supported", "1.1");
    b.enumeration("operations-supported", i32::from(op::PRINT_JOB));
    b.enumeration_additional(i32::from(op::VALIDATE_JOB));
    b.enumeration_additional(i32::from(op::CANCEL_JOB));
    b.enumeration_additional(i32::from(op::GET_JOB_ATTRIBUTES));
    b.enumeration_additional(i32::from(op::GET_PRINTER_ATTRIBUTES));
    b.boolean("multiple-document-jobs-supported", false);
    b.charset("charset-configured", "utf-8");
    b.charset("charset-supported", "utf-8");
    b.natural_language("natural-language-configured", "en");
    b.natural_language("generated-natural-language-supported", "en");
    b.mime_media_type("document-format-default", "application/pdf");
    b.mime_media_type("document-format-supported", "application/pdf");
    b.boolean("printer-is-accepting-jobs", true);
    b.integer("queued-job-count", 0);
    b.keyword("pdl-override-supported", "not-attempted");
    b.integer("printer-up-time", Utc::now().timestamp() as i32);
    b.keyword("compression-supported", "none");
    respond(ctx, b.build()).await;
}

async fn on_validate_job(ctx: &mut HandlerContext, request: &Request) {
    let ops = request.operation_attributes();
    let jobs = request.job_attributes();
    tracing::debug!(
        "validating job name={:?} uuid={:?} user={:?}",
        ops.and_then(|g| g.get_str("job-name")),
        jobs.and_then(|g| g.get_str("job-uuid")),
        ops.and_then(|g| g.get_str("requesting-user-name")),
    );
    respond(ctx, ResponseBuilder::new(status::OK, request.request_id).build()).await;
}

async fn on_get_jobs(ctx: &mut HandlerContext, request: &Request) {
    let user = request
        .operation_attributes()
        .and_then(|g| g.get_str("requesting-user-name"))
        .unwrap_or("<unknown>");
    tracing::debug!("responding with empty job list to user {user}");
    // Always empty, even for completed-jobs queries; no client has
    // minded so far.
    respond(ctx, ResponseBuilder::new(status::OK, request.request_id).build()).await;
}

async fn on_get_job_attributes(ctx: &mut HandlerContext, request: &Request) {
    let mut b = ResponseBuilder::new(status::OK, request.request_id);
    b.uri("job-uri", &job_uri(ctx));
    b.integer("job-id", JOB_ID);
    b.enumeration("job-state", job_state::COMPLETED);
    b.keyword("job-state-reasons", "job-completed-successfully");
    b.uri("job-printer-uri", &printer_uri(ctx));
    b.name("job-name", &format!("Print job {JOB_ID}"));
    b.name("job-originating-user-name", "doppel");
    b.integer("time-at-creation", 0);
    b.integer("time-at-completed", 0);
    b.integer("job-printer-up-time", Utc::now().timestamp() as i32);
    respond(ctx, b.build()).await;
}

async fn on_print_job(ctx: &mut HandlerContext, head: &RequestHead, request: &Request) {
    let created_at = Utc::now();
    let ops = request.operation_attributes();
    let jobs = request.job_attributes();
    let get = |group: Option<&ipp_proto::AttributeGroup>, name: &str| -> String {
        group
            .and_then(|g| g.get_str(name))
            .unwrap_or_default()
            .to_string()
    };

    let data = PrintData {
        created_at,
        service: ctx.service.clone(),
        client: ClientData {
            ip: ctx.peer.ip().to_string(),
            user_agent: head.user_agent().to_string(),
        },
        job: JobData {
            name: get(ops, "job-name"),
            uuid: get(jobs, "job-uuid"),
            user: get(ops, "requesting-user-name"),
        },
        document: DocumentData {
            name: get(jobs, "document-name-supplied"),
            format: get(ops, "document-format"),
            data: request.document_data.clone(),
        },
    };

    // Capture failures must not leak to the client; it still gets a
    // normal job acknowledgement.
    match save_print_data(&ctx.save_path, created_at, &data) {
        Ok(path) => tracing::info!("document saved to {}", path.display()),
        Err(e) => tracing::error!("could not save document: {e}"),
    }

    let mut b = ResponseBuilder::new(status::OK, request.request_id);
    b.uri("job-uri", &job_uri(ctx));
    b.integer("job-id", JOB_ID);
    b.enumeration("job-state", job_state::PENDING);
    b.keyword("job-state-reasons", "job-incoming");
    b.keyword_additional("job-data-insufficient");
    respond(ctx, b.build()).await;
}

fn save_print_data(
    save_path: &Path,
    created_at: DateTime<Utc>,
    data: &PrintData,
) -> Result<PathBuf> {
    let dir = expand_home(save_path);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("could not create directory {}", dir.display()))?;
    let path = dir.join(format!("{}.json", created_at.timestamp_micros()));
    let json = serde_json::to_vec(data).context("could not serialize print data")?;
    std::fs::write(&path, json)
        .with_context(|| format!("could not write {}", path.display()))?;
    Ok(path)
}

async fn on_unhandled(ctx: &mut HandlerContext, request: &Request, op_name: &str) {
    tracing::warn!(
        "unhandled request from {}: operation={op_name} groups={}",
        ctx.peer,
        request.groups.len()
    );
    respond(
        ctx,
        ResponseBuilder::new(
            status::SERVER_ERROR_OPERATION_NOT_SUPPORTED,
            request.request_id,
        )
        .build(),
    )
    .await;
}
