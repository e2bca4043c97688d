//! `AEMInitiateUpload` (C10, §4.6, §6.1): batches assets sharing a parent
//! path into one `initiateUpload.json` handshake and turns the response
//! into each asset's `AssetMultipart` target.

use crate::controller::TransferController;
use crate::http::HttpClient;
use crate::model::{AssetMultipart, TransferAsset};
use crate::pipeline::concurrent_map::BatchWorker;
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;

const STAGE_NAME: &str = "AEMInitiateUpload";

pub struct AEMInitiateUpload {
    http: HttpClient,
}

impl AEMInitiateUpload {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }
}

/// `checkAddBatch` predicate: only batch assets that share a parent path.
pub fn same_parent(batch: &[TransferAsset], candidate: &TransferAsset) -> bool {
    match (batch.first().and_then(target_url), target_url(candidate)) {
        (Some(existing), Some(next)) => parent_of(existing) == parent_of(next),
        _ => false,
    }
}

fn target_url(asset: &TransferAsset) -> Option<&str> {
    asset.target.endpoint().as_url()
}

fn parent_of(url: &str) -> &str {
    url.rsplit_once('/').map(|(parent, _)| parent).unwrap_or(url)
}

impl BatchWorker for AEMInitiateUpload {
    type In = TransferAsset;
    type Out = TransferAsset;

    fn call(&self, batch: Vec<TransferAsset>, ctrl: Arc<TransferController>) -> BoxFuture<'static, Vec<TransferAsset>> {
        let http = self.http.clone();
        Box::pin(async move { run_batch(http, batch, ctrl).await })
    }
}

async fn run_batch(http: HttpClient, batch: Vec<TransferAsset>, ctrl: Arc<TransferController>) -> Vec<TransferAsset> {
    if batch.is_empty() {
        return Vec::new();
    }

    let Some(parent) = batch.first().and_then(target_url).map(parent_of) else {
        fail_all(&ctrl, &batch, "target asset has no URL to derive a parent path from");
        return Vec::new();
    };
    let url = format!("{}.initiateUpload.json", parent);

    let mut fields = Vec::with_capacity(batch.len() * 2);
    for asset in &batch {
        fields.push(("fileName".to_string(), asset.filename().unwrap_or_default().to_string()));
        fields.push(("fileSize".to_string(), asset.content_length().unwrap_or(0).to_string()));
    }

    let response = match http.post_form_json(&url, &fields).await {
        Ok(value) => value,
        Err(err) => {
            fail_all(&ctrl, &batch, &err.to_string());
            return Vec::new();
        }
    };

    let complete_uri = response.get("completeURI").and_then(Value::as_str);
    let files = response.get("files").and_then(Value::as_array);
    let (complete_uri, files) = match (complete_uri, files) {
        (Some(uri), Some(files)) if files.len() == batch.len() => (uri.to_string(), files),
        _ => {
            fail_all(&ctrl, &batch, "invalid initiateUpload response: completeURI/files mismatch");
            return Vec::new();
        }
    };

    let mut out = Vec::with_capacity(batch.len());
    for (mut asset, file) in batch.into_iter().zip(files.iter()) {
        match build_multipart(file, &complete_uri) {
            Ok(multipart) => match asset.with_multipart(multipart) {
                Ok(updated) => out.push(updated.with_accept_ranges(true)),
                Err(err) => {
                    ctrl.notify_error(asset.id(), STAGE_NAME, err.code().to_string(), err.to_string());
                }
            },
            Err(reason) => {
                ctrl.notify_error(asset.id(), STAGE_NAME, "EVALIDATION".to_string(), reason);
            }
        }
    }
    out
}

fn build_multipart(file: &Value, complete_uri: &str) -> Result<AssetMultipart, String> {
    let min_part_size = file
        .get("minPartSize")
        .and_then(Value::as_u64)
        .filter(|n| *n >= 1)
        .ok_or("minPartSize missing or < 1")?;
    let max_part_size = file
        .get("maxPartSize")
        .and_then(Value::as_u64)
        .filter(|n| *n >= min_part_size)
        .ok_or("maxPartSize missing or < minPartSize")?;
    let upload_uris: Vec<String> = file
        .get("uploadURIs")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    if upload_uris.is_empty() {
        return Err("uploadURIs missing or empty".to_string());
    }
    let upload_token = file
        .get("uploadToken")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or("uploadToken missing or empty")?
        .to_string();
    let mime_type = file
        .get("mimeType")
        .and_then(Value::as_str)
        .unwrap_or("application/octet-stream");

    let multipart = AssetMultipart::new(upload_uris, min_part_size, max_part_size)
        .map_err(|e| e.to_string())?
        .with_complete_url(complete_uri.to_string())
        .with_upload_token(upload_token)
        .with_part_headers(std::iter::once(("Content-Type".to_string(), mime_type.to_string())).collect());
    Ok(multipart)
}

fn fail_all(ctrl: &Arc<TransferController>, batch: &[TransferAsset], message: &str) {
    for asset in batch {
        ctrl.notify_error(asset.id(), STAGE_NAME, "EVALIDATION".to_string(), message.to_string());
    }
}
