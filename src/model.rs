//! Asset/part data model (C9).

use crate::error::TransferError;
use crate::range::ByteRange;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counter backing `AssetId` — identity that survives moves and
/// task-boundary crossings, per the Open Questions guidance (§9): a
/// stable ID rather than pointer/object identity.
static NEXT_ASSET_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity for a `TransferAsset`, assigned once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AssetId(u64);

impl AssetId {
    fn next() -> Self {
        Self(NEXT_ASSET_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// The source or target endpoint of a transfer: a URL, or an in-memory blob.
#[derive(Debug, Clone)]
pub enum AssetEndpoint {
    Url(String),
    Blob(Bytes),
}

impl AssetEndpoint {
    pub fn is_file_url(&self) -> bool {
        matches!(self, AssetEndpoint::Url(u) if u.starts_with("file://"))
    }

    pub fn is_http_url(&self) -> bool {
        matches!(self, AssetEndpoint::Url(u) if u.starts_with("http://") || u.starts_with("https://"))
    }

    pub fn as_url(&self) -> Option<&str> {
        match self {
            AssetEndpoint::Url(u) => Some(u),
            AssetEndpoint::Blob(_) => None,
        }
    }
}

/// Identifies one endpoint of a transfer: a URL or blob, plus headers.
/// Immutable after construction.
#[derive(Debug, Clone)]
pub struct Asset {
    endpoint: AssetEndpoint,
    headers: HashMap<String, String>,
    part_headers: HashMap<String, String>,
}

impl Asset {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            endpoint: AssetEndpoint::Url(url.into()),
            headers: HashMap::new(),
            part_headers: HashMap::new(),
        }
    }

    pub fn blob(data: Bytes) -> Self {
        Self {
            endpoint: AssetEndpoint::Blob(data),
            headers: HashMap::new(),
            part_headers: HashMap::new(),
        }
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_part_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.part_headers = headers;
        self
    }

    pub fn endpoint(&self) -> &AssetEndpoint {
        &self.endpoint
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn part_headers(&self) -> &HashMap<String, String> {
        &self.part_headers
    }
}

/// `filename?`, `contentType?`, `contentLength`.
#[derive(Debug, Clone)]
pub struct AssetMetadata {
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub content_length: u64,
}

impl AssetMetadata {
    pub fn new(content_length: u64) -> Self {
        Self {
            filename: None,
            content_type: None,
            content_length,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        let filename = filename.into();
        if self.content_type.is_none() {
            self.content_type = Some(
                mime_guess::from_path(&filename)
                    .first_or_octet_stream()
                    .to_string(),
            );
        }
        self.filename = Some(filename);
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Streaming requires a finite, non-negative length; reject transfers
    /// where a length is required but `< 1`.
    pub fn require_nonzero_length(&self) -> Result<(), TransferError> {
        if self.content_length < 1 {
            return Err(TransferError::Unsupported(
                "contentLength must be >= 1 to transfer".to_string(),
            ));
        }
        Ok(())
    }

    pub fn content_type_or_default(&self) -> &str {
        self.content_type
            .as_deref()
            .unwrap_or("application/octet-stream")
    }
}

/// Result of a DAM `initiateUpload` handshake: pre-signed target URLs plus
/// part-size bounds.
#[derive(Debug, Clone)]
pub struct AssetMultipart {
    pub target_urls: Vec<String>,
    pub min_part_size: u64,
    pub max_part_size: u64,
    pub part_headers: HashMap<String, String>,
    pub complete_url: Option<String>,
    pub upload_token: Option<String>,
}

impl AssetMultipart {
    pub fn new(target_urls: Vec<String>, min_part_size: u64, max_part_size: u64) -> Result<Self, TransferError> {
        if target_urls.is_empty() {
            return Err(TransferError::IllegalArgument(
                "targetUrls must be non-empty".to_string(),
            ));
        }
        if min_part_size < 1 {
            return Err(TransferError::IllegalArgument(
                "minPartSize must be >= 1".to_string(),
            ));
        }
        if max_part_size < min_part_size {
            return Err(TransferError::IllegalArgument(
                "maxPartSize must be >= minPartSize".to_string(),
            ));
        }
        Ok(Self {
            target_urls,
            min_part_size,
            max_part_size,
            part_headers: HashMap::new(),
            complete_url: None,
            upload_token: None,
        })
    }

    pub fn with_complete_url(mut self, url: impl Into<String>) -> Self {
        self.complete_url = Some(url.into());
        self
    }

    pub fn with_upload_token(mut self, token: impl Into<String>) -> Self {
        self.upload_token = Some(token.into());
        self
    }

    pub fn with_part_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.part_headers = headers;
        self
    }
}

/// Name-conflict resolution strategy — exactly one is in effect.
#[derive(Debug, Clone, Default)]
pub enum NameConflictPolicy {
    /// Update the existing asset in place.
    #[default]
    Default,
    Replace,
    CreateVersion {
        label: Option<String>,
        comment: Option<String>,
    },
}

/// Ties a `source` to a `target`, plus the bookkeeping the pipeline needs.
#[derive(Debug, Clone)]
pub struct TransferAsset {
    id: AssetId,
    pub source: Asset,
    pub target: Asset,
    pub metadata: Option<AssetMetadata>,
    pub multipart: Option<AssetMultipart>,
    pub accept_ranges: bool,
    pub name_conflict_policy: NameConflictPolicy,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl TransferAsset {
    pub fn new(source: Asset, target: Asset) -> Self {
        Self {
            id: AssetId::next(),
            source,
            target,
            metadata: None,
            multipart: None,
            accept_ranges: false,
            name_conflict_policy: NameConflictPolicy::default(),
            start_time: None,
            end_time: None,
        }
    }

    pub fn id(&self) -> AssetId {
        self.id
    }

    pub fn with_metadata(mut self, metadata: AssetMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_multipart(mut self, multipart: AssetMultipart) -> Result<Self, TransferError> {
        if let Some(meta) = &self.metadata {
            validate_multipart_against_length(&multipart, meta.content_length)?;
        }
        self.multipart = Some(multipart);
        Ok(self)
    }

    pub fn with_accept_ranges(mut self, accept_ranges: bool) -> Self {
        self.accept_ranges = accept_ranges;
        self
    }

    pub fn with_name_conflict_policy(mut self, policy: NameConflictPolicy) -> Self {
        self.name_conflict_policy = policy;
        self
    }

    pub fn content_length(&self) -> Option<u64> {
        self.metadata.as_ref().map(|m| m.content_length)
    }

    pub fn filename(&self) -> Option<&str> {
        self.metadata.as_ref().and_then(|m| m.filename.as_deref())
    }

    pub fn mark_started(&mut self, at: DateTime<Utc>) {
        self.start_time = Some(at);
    }

    pub fn mark_ended(&mut self, at: DateTime<Utc>) {
        self.end_time = Some(at);
    }
}

fn validate_multipart_against_length(
    multipart: &AssetMultipart,
    content_length: u64,
) -> Result<(), TransferError> {
    let required = content_length.div_ceil(multipart.target_urls.len() as u64).max(1);
    if required > multipart.max_part_size {
        return Err(TransferError::IllegalArgument(format!(
            "contentLength {} cannot be covered by {} URLs within maxPartSize {}",
            content_length,
            multipart.target_urls.len(),
            multipart.max_part_size
        )));
    }
    Ok(())
}

/// A unit of byte transfer: a contiguous sub-range of one asset, plus the
/// source it reads from (upload) or writes into (download), and the
/// target URL(s) it is sent to (usually one).
pub struct TransferPart {
    pub asset_id: AssetId,
    pub source: Asset,
    pub target_urls: Vec<String>,
    pub range: ByteRange,
    pub total_size: u64,
    pub headers: HashMap<String, String>,
}

impl TransferPart {
    pub fn new(
        asset_id: AssetId,
        source: Asset,
        target_urls: Vec<String>,
        range: ByteRange,
        total_size: u64,
        headers: HashMap<String, String>,
        max_part_size: u64,
    ) -> Result<Self, TransferError> {
        if range.len() > max_part_size {
            return Err(TransferError::IllegalArgument(format!(
                "part length {} exceeds maxPartSize {}",
                range.len(),
                max_part_size
            )));
        }
        Ok(Self {
            asset_id,
            source,
            target_urls,
            range,
            total_size,
            headers,
        })
    }

    /// A part is chunked iff its length is less than the asset's total size.
    pub fn is_chunked(&self) -> bool {
        self.range.len() < self.total_size
    }
}
