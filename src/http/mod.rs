//! HTTP client facade (C2): GET/PUT/POST with headers, streaming bodies,
//! and Range reads, classifying transport errors into `TransferError`.

pub mod retry;

use crate::error::TransferError;
use bytes::Bytes;
use reqwest::{Client, Method, StatusCode};
use std::collections::HashMap;
use std::time::Duration;

/// Maximum body excerpt length captured on an HTTP error response (§7).
const MAX_BODY_EXCERPT: usize = 10_000;

/// Thin wrapper around `reqwest::Client` that classifies errors per the
/// taxonomy in §7 and exposes the handful of request shapes the transfer
/// stages need.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

/// A request body shape: raw bytes, a streamed file chunk, or pre-built
/// multipart/form-data.
pub enum RequestBody {
    Bytes(Bytes),
    Multipart(reqwest::multipart::Form),
}

/// The subset of a `HEAD` response `GetAssetMetadata` needs.
#[derive(Debug, Clone)]
pub struct HeadInfo {
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub accept_ranges: bool,
}

impl HttpClient {
    pub fn new(socket_timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(socket_timeout)
            .build()
            .expect("reqwest client configuration is always valid");
        Self { client }
    }

    #[cfg(test)]
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Issue a `PUT`/`POST` with the given headers and body, returning `Ok`
    /// only on a 2xx response.
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        headers: &HashMap<String, String>,
        body: RequestBody,
    ) -> Result<(), TransferError> {
        let mut request = self.client.request(method, url);
        for (k, v) in headers {
            request = request.header(k, v);
        }
        request = match body {
            RequestBody::Bytes(bytes) => request.body(bytes),
            RequestBody::Multipart(form) => request.multipart(form),
        };

        let response = request.send().await.map_err(classify_send_error)?;
        check_status(response).await.map(|_| ())
    }

    /// `GET <url>` with `Range: bytes=low-high`; verifies the server
    /// honored the requested range before returning any bytes (§6.4, §8
    /// invariant 6).
    pub async fn get_range(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        low: u64,
        high_inclusive: u64,
    ) -> Result<Bytes, TransferError> {
        let requested_len = high_inclusive - low + 1;
        let mut request = self
            .client
            .get(url)
            .header("Range", format!("bytes={}-{}", low, high_inclusive));
        for (k, v) in headers {
            request = request.header(k, v);
        }

        let response = request.send().await.map_err(classify_send_error)?;
        let response = check_status(response).await?;

        let content_length = response.content_length().unwrap_or(0);
        if content_length != requested_len {
            return Err(TransferError::RangeViolation {
                requested_len,
                actual_len: content_length,
            });
        }

        response.bytes().await.map_err(classify_body_error)
    }

    /// `POST <url>` as `application/x-www-form-urlencoded`, parsing a JSON
    /// response body (used by the DAM handshake stages).
    pub async fn post_form_json(
        &self,
        url: &str,
        fields: &[(String, String)],
    ) -> Result<serde_json::Value, TransferError> {
        let response = self
            .client
            .post(url)
            .form(fields)
            .send()
            .await
            .map_err(classify_send_error)?;
        let response = check_status(response).await?;
        let text = response.text().await.map_err(classify_body_error)?;
        serde_json::from_str(&text)
            .map_err(|e| TransferError::Validation(format!("invalid JSON response: {}", e)))
    }

    /// `HEAD <url>`, used by `GetAssetMetadata` to discover a download
    /// source's size/type/range-support before parts are created.
    pub async fn head(&self, url: &str, headers: &HashMap<String, String>) -> Result<HeadInfo, TransferError> {
        let mut request = self.client.head(url);
        for (k, v) in headers {
            request = request.header(k, v);
        }
        let response = request.send().await.map_err(classify_send_error)?;
        let response = check_status(response).await?;

        let content_length = response.content_length();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let accept_ranges = response
            .headers()
            .get(reqwest::header::ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("bytes"))
            .unwrap_or(false);

        Ok(HeadInfo {
            content_length,
            content_type,
            accept_ranges,
        })
    }

    /// `POST <url>` as `application/x-www-form-urlencoded`, discarding the body.
    pub async fn post_form(
        &self,
        url: &str,
        fields: &[(String, String)],
    ) -> Result<(), TransferError> {
        let response = self
            .client
            .post(url)
            .form(fields)
            .send()
            .await
            .map_err(classify_send_error)?;
        check_status(response).await.map(|_| ())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, TransferError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body_excerpt = excerpt_body(response, status).await;
    Err(TransferError::HttpResponse {
        status: status.as_u16(),
        body_excerpt,
    })
}

async fn excerpt_body(response: reqwest::Response, status: StatusCode) -> String {
    let is_text = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("text/") || ct.contains("json") || ct.contains("xml"))
        .unwrap_or(false);

    if !is_text {
        return status.canonical_reason().unwrap_or("").to_string();
    }

    match response.text().await {
        Ok(text) => text.chars().take(MAX_BODY_EXCERPT).collect(),
        Err(_) => status.canonical_reason().unwrap_or("").to_string(),
    }
}

fn classify_send_error(err: reqwest::Error) -> TransferError {
    if err.is_timeout() || err.is_connect() {
        TransferError::HttpConnect(err.to_string())
    } else if err.is_body() || err.is_decode() {
        TransferError::HttpStream(err.to_string())
    } else {
        TransferError::HttpConnect(err.to_string())
    }
}

fn classify_body_error(err: reqwest::Error) -> TransferError {
    TransferError::HttpStream(err.to_string())
}
