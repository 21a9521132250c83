//! S3 transport over presigned SigV4 requests.
//!
//! Uploads use the multipart API: the stream is cut into `part_size` parts
//! handed to an uploader task through a one-slot channel, so at most one part
//! is buffered while another is on the wire. The upload is created when the
//! sink is opened, completed on commit and aborted if the sink is dropped
//! uncommitted.
//!
//! The transport is called from blocking threads and drives its requests on
//! the runtime behind `handle`; it must not be used from async context.

use super::{ObjectMetadata, ObjectSink, Transport};
use crate::config::StoreConfig;
use crate::utils::errors::{BackupError, Result};
use bytes::Bytes;
use futures_util::TryStreamExt;
use reqwest::StatusCode;
use rusty_s3::actions::{CreateMultipartUpload, S3Action};
use rusty_s3::{Bucket, Credentials, UrlStyle};
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::io::{StreamReader, SyncIoBridge};
use tracing::{debug, info, warn};

/// Duration for presigned URL validity.
const PRESIGN_DURATION: Duration = Duration::from_secs(3600);

/// S3 refuses part numbers above this.
const MAX_PARTS: u16 = 10_000;

/// Longest error body quoted in an error message.
const MAX_ERROR_BODY: usize = 512;

struct Client {
    http: reqwest::Client,
    endpoint: url::Url,
    region: String,
    credentials: Option<Credentials>,
}

impl Client {
    fn bucket(&self, name: &str) -> Result<Bucket> {
        Bucket::new(
            self.endpoint.clone(),
            UrlStyle::Path,
            name.to_string(),
            self.region.clone(),
        )
        .map_err(|e| BackupError::Config(format!("invalid bucket '{name}': {e}")))
    }
}

pub struct S3Transport {
    client: Arc<Client>,
    part_size: usize,
    handle: Handle,
}

impl S3Transport {
    pub fn new(config: &StoreConfig, handle: Handle) -> Result<Self> {
        config.validate()?;

        let endpoint = if config.domain.contains("://") {
            config.domain.clone()
        } else {
            format!("https://{}", config.domain)
        };
        let endpoint = endpoint.parse::<url::Url>().map_err(|e| {
            BackupError::Config(format!("invalid S3 endpoint URL '{endpoint}': {e}"))
        })?;

        let credentials = match (&config.access_key, &config.secret_key) {
            (Some(key), Some(secret)) => Some(Credentials::new(key, secret)),
            _ => None,
        };
        if credentials.is_none() {
            warn!("No S3 credentials configured, sending unsigned requests");
        }

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| BackupError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client: Arc::new(Client {
                http,
                endpoint,
                region: config.region.clone(),
                credentials,
            }),
            part_size: config.part_size,
            handle,
        })
    }
}

/// Classify a non-success response.
pub(crate) fn status_error(status: StatusCode, body: &str, bucket: &str, key: &str) -> BackupError {
    let mut message = format!("HTTP {status}");
    let body = body.trim();
    if !body.is_empty() {
        let end = body
            .char_indices()
            .map(|(i, _)| i)
            .find(|i| *i >= MAX_ERROR_BODY)
            .unwrap_or(body.len());
        message.push_str(": ");
        message.push_str(&body[..end]);
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackupError::Auth {
            key: key.to_string(),
            message,
        },
        StatusCode::NOT_FOUND => BackupError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        },
        _ => BackupError::Transport {
            key: key.to_string(),
            message,
        },
    }
}

fn request_error(key: &str, err: reqwest::Error) -> BackupError {
    BackupError::Transport {
        key: key.to_string(),
        message: err.to_string(),
    }
}

/// Send `request`, turning failures and non-2xx statuses into errors.
async fn send(
    request: reqwest::RequestBuilder,
    bucket: &str,
    key: &str,
) -> Result<reqwest::Response> {
    let response = request.send().await.map_err(|e| request_error(key, e))?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &body, bucket, key))
}

/// Send `request` and return its body. S3 can answer 200 and still report
/// failure in the body, so an `<Error>` document is treated as failure.
async fn send_for_body(request: reqwest::RequestBuilder, bucket: &str, key: &str) -> Result<String> {
    let response = send(request, bucket, key).await?;
    let status = response.status();
    let body = response.bytes().await.map_err(|e| request_error(key, e))?;
    let body = std::str::from_utf8(&body)
        .map_err(|e| BackupError::Transport {
            key: key.to_string(),
            message: format!("response is not UTF-8: {e}"),
        })?
        .to_string();
    if body.contains("<Error>") {
        return Err(status_error(status, &body, bucket, key));
    }
    Ok(body)
}

impl Transport for S3Transport {
    fn open_write(&self, bucket: &str, key: &str) -> Result<Box<dyn ObjectSink>> {
        let client = Arc::clone(&self.client);
        let handle = self.handle.clone();

        let url = client
            .bucket(bucket)?
            .create_multipart_upload(client.credentials.as_ref(), key)
            .sign(PRESIGN_DURATION);
        let body = handle.block_on(send_for_body(client.http.post(url.as_str()), bucket, key))?;
        let upload_id = CreateMultipartUpload::parse_response(&body)
            .map_err(|e| BackupError::Transport {
                key: key.to_string(),
                message: format!("malformed CreateMultipartUpload response: {e}"),
            })?
            .upload_id()
            .to_string();
        info!("Started multipart upload of {}/{}", bucket, key);
        debug!("Upload id {}", upload_id);

        let upload = Arc::new(Upload {
            client,
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id,
        });
        let (parts_tx, parts_rx) = mpsc::channel(1);
        let uploader = handle.spawn(upload_parts(Arc::clone(&upload), parts_rx));

        Ok(Box::new(S3Sink {
            upload,
            handle,
            part_size: self.part_size,
            buffer: Vec::with_capacity(self.part_size),
            next_part: 1,
            parts_tx: Some(parts_tx),
            uploader: Some(uploader),
            committed: false,
        }))
    }

    fn open_read(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<(Box<dyn Read + Send>, ObjectMetadata)> {
        let url = self
            .client
            .bucket(bucket)?
            .get_object(self.client.credentials.as_ref(), key)
            .sign(PRESIGN_DURATION);
        let response = self
            .handle
            .block_on(send(self.client.http.get(url.as_str()), bucket, key))?;

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let metadata = ObjectMetadata {
            content_length: response.content_length(),
            etag: header("etag"),
            last_modified: header("last-modified"),
        };
        info!(
            "Fetching {}/{} ({} bytes)",
            bucket,
            key,
            metadata
                .content_length
                .map_or_else(|| "unknown".to_string(), |n| n.to_string())
        );

        let stream_key = key.to_string();
        let stream = response.bytes_stream().map_err(move |e| {
            BackupError::Transport {
                key: stream_key.clone(),
                message: e.to_string(),
            }
            .into_io()
        });
        let reader = StreamReader::new(Box::pin(stream));
        let reader = SyncIoBridge::new_with_handle(reader, self.handle.clone());
        Ok((Box::new(reader), metadata))
    }
}

struct Upload {
    client: Arc<Client>,
    bucket: String,
    key: String,
    upload_id: String,
}

struct Part {
    number: u16,
    body: Bytes,
}

impl Upload {
    async fn put_part(&self, part: Part) -> Result<String> {
        let url = self
            .client
            .bucket(&self.bucket)?
            .upload_part(
                self.client.credentials.as_ref(),
                &self.key,
                part.number,
                &self.upload_id,
            )
            .sign(PRESIGN_DURATION);
        let size = part.body.len();
        let response = send(
            self.client.http.put(url.as_str()).body(part.body),
            &self.bucket,
            &self.key,
        )
        .await?;

        let etag = response
            .headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| BackupError::Transport {
                key: self.key.clone(),
                message: format!("part {} response carries no ETag", part.number),
            })?;
        debug!("Uploaded part {} of {} ({} bytes)", part.number, self.key, size);
        Ok(etag)
    }

    async fn complete(&self, etags: &[String]) -> Result<()> {
        let bucket = self.client.bucket(&self.bucket)?;
        let action = bucket.complete_multipart_upload(
            self.client.credentials.as_ref(),
            &self.key,
            &self.upload_id,
            etags.iter().map(String::as_str),
        );
        let url = action.sign(PRESIGN_DURATION);
        let body = action.body();
        send_for_body(
            self.client.http.post(url.as_str()).body(body),
            &self.bucket,
            &self.key,
        )
        .await?;
        Ok(())
    }

    async fn abort(&self) -> Result<()> {
        let url = self
            .client
            .bucket(&self.bucket)?
            .abort_multipart_upload(self.client.credentials.as_ref(), &self.key, &self.upload_id)
            .sign(PRESIGN_DURATION);
        send(self.client.http.delete(url.as_str()), &self.bucket, &self.key).await?;
        Ok(())
    }
}

/// Upload parts in order until the channel closes; returns their ETags.
async fn upload_parts(upload: Arc<Upload>, mut parts: mpsc::Receiver<Part>) -> Result<Vec<String>> {
    let mut etags = Vec::new();
    while let Some(part) = parts.recv().await {
        etags.push(upload.put_part(part).await?);
    }
    Ok(etags)
}

struct S3Sink {
    upload: Arc<Upload>,
    handle: Handle,
    part_size: usize,
    buffer: Vec<u8>,
    next_part: u16,
    parts_tx: Option<mpsc::Sender<Part>>,
    uploader: Option<JoinHandle<Result<Vec<String>>>>,
    committed: bool,
}

impl S3Sink {
    /// Wait for the uploader to finish and collect its result.
    fn join_uploader(&mut self) -> Result<Vec<String>> {
        self.parts_tx = None;
        let uploader = self.uploader.take().ok_or_else(|| BackupError::Transport {
            key: self.upload.key.clone(),
            message: "upload already finished".into(),
        })?;
        match self.handle.block_on(uploader) {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(BackupError::Cancelled),
        }
    }

    fn send_part(&mut self) -> Result<()> {
        if self.next_part > MAX_PARTS {
            return Err(BackupError::Transport {
                key: self.upload.key.clone(),
                message: format!("object exceeds {MAX_PARTS} parts of {} bytes", self.part_size),
            });
        }

        let body = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.part_size));
        let part = Part {
            number: self.next_part,
            body: Bytes::from(body),
        };
        self.next_part += 1;

        let sent = match &self.parts_tx {
            Some(tx) => tx.blocking_send(part).is_ok(),
            None => false,
        };
        if sent {
            return Ok(());
        }

        // The uploader only hangs up early when a part failed.
        match self.join_uploader() {
            Err(e) => Err(e),
            Ok(_) => Err(BackupError::Transport {
                key: self.upload.key.clone(),
                message: "uploader stopped unexpectedly".into(),
            }),
        }
    }
}

impl Write for S3Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let room = self.part_size - self.buffer.len();
        let n = room.min(buf.len());
        self.buffer.extend_from_slice(&buf[..n]);
        if self.buffer.len() == self.part_size {
            self.send_part().map_err(BackupError::into_io)?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ObjectSink for S3Sink {
    fn commit(mut self: Box<Self>) -> Result<()> {
        if !self.buffer.is_empty() || self.next_part == 1 {
            self.send_part()?;
        }
        let etags = self.join_uploader()?;
        self.handle.block_on(self.upload.complete(&etags))?;
        self.committed = true;

        info!(
            "Completed multipart upload of {}/{} ({} parts)",
            self.upload.bucket,
            self.upload.key,
            etags.len()
        );
        Ok(())
    }
}

impl Drop for S3Sink {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        self.parts_tx = None;
        if let Some(uploader) = self.uploader.take() {
            uploader.abort();
        }

        warn!("Aborting multipart upload of {}", self.upload.key);
        if let Err(e) = self.handle.block_on(self.upload.abort()) {
            warn!("Failed to abort multipart upload of {}: {}", self.upload.key, e);
        }
    }
}
