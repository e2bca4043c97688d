//! Request generators (C11): body construction and header shaping for the
//! two upload wire formats a `TransferPart` can be sent with.

use crate::http::RequestBody;
use crate::model::TransferPart;
use bytes::Bytes;
use std::collections::HashMap;

/// A fully assembled request: headers plus body, ready for
/// `HttpClient::send`.
pub struct PreparedRequest {
    pub headers: HashMap<String, String>,
    pub body: RequestBody,
}

/// Builds the body/headers for one `TransferPart`'s upload request.
pub trait RequestGenerator: Send + Sync + 'static {
    fn build(&self, part: &TransferPart, data: Bytes, content_type: &str, filename: Option<&str>) -> PreparedRequest;

    /// HTTP method the prepared request is sent with.
    fn method(&self) -> reqwest::Method;
}

/// Raw-bytes `PUT` to a pre-signed block URL (§6.2). No body wrapping;
/// `Content-Length`/`Content-Type` plus the caller's per-part headers.
pub struct BlockRequestGenerator;

impl RequestGenerator for BlockRequestGenerator {
    fn build(&self, part: &TransferPart, data: Bytes, content_type: &str, _filename: Option<&str>) -> PreparedRequest {
        let mut headers = part.headers.clone();
        headers.insert("Content-Length".to_string(), data.len().to_string());
        headers.insert("Content-Type".to_string(), content_type.to_string());
        PreparedRequest {
            headers,
            body: RequestBody::Bytes(data),
        }
    }

    fn method(&self) -> reqwest::Method {
        reqwest::Method::PUT
    }
}

/// `multipart/form-data` POST to the create-asset servlet (§6.3). When the
/// part is a chunk (`length < totalSize`), adds the `file@Offset`/
/// `chunk@Length`/`file@Length` fields and the `x-chunked-*` headers.
pub struct FormRequestGenerator;

impl RequestGenerator for FormRequestGenerator {
    fn build(&self, part: &TransferPart, data: Bytes, content_type: &str, filename: Option<&str>) -> PreparedRequest {
        let mut headers = part.headers.clone();
        let chunked = part.is_chunked();
        let chunk_len = data.len() as u64;

        let mut form = reqwest::multipart::Form::new().text("_charset_", "utf-8");
        if chunked {
            form = form
                .text("file@Offset", part.range.low.to_string())
                .text("chunk@Length", chunk_len.to_string())
                .text("file@Length", part.total_size.to_string());
            headers.insert("x-chunked-content-type".to_string(), content_type.to_string());
            headers.insert("x-chunked-total-size".to_string(), part.total_size.to_string());
        }

        let mut file_part = reqwest::multipart::Part::bytes(data.to_vec()).mime_str(content_type).unwrap_or_else(|_| reqwest::multipart::Part::bytes(data.to_vec()));
        if let Some(name) = filename {
            file_part = file_part.file_name(name.to_string());
        }
        form = form.part("file", file_part);

        PreparedRequest {
            headers,
            body: RequestBody::Multipart(form),
        }
    }

    fn method(&self) -> reqwest::Method {
        reqwest::Method::POST
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::fixed_asset_id;
    use crate::range::ByteRange;

    fn test_part(low: u64, high: u64, total: u64) -> TransferPart {
        TransferPart::new(
            fixed_asset_id(1),
            crate::model::Asset::url("file:///src.bin"),
            vec!["https://example.test/upload".into()],
            ByteRange::new(low, high),
            total,
            HashMap::new(),
            total,
        )
        .unwrap()
    }

    #[test]
    fn block_generator_sets_content_headers() {
        let part = test_part(0, 10, 10);
        let data = Bytes::from_static(b"0123456789");
        let req = BlockRequestGenerator.build(&part, data, "image/jpeg", None);
        assert_eq!(req.headers.get("Content-Length").unwrap(), "10");
        assert_eq!(req.headers.get("Content-Type").unwrap(), "image/jpeg");
        assert!(matches!(req.body, RequestBody::Bytes(_)));
    }

    #[test]
    fn form_generator_adds_chunk_headers_only_when_chunked() {
        let whole_part = test_part(0, 1024, 1024);
        let data = Bytes::from(vec![0u8; 1024]);
        let req = FormRequestGenerator.build(&whole_part, data, "image/jpeg", Some("photo.jpg"));
        assert!(!req.headers.contains_key("x-chunked-total-size"));

        let chunk_part = test_part(0, 512, 1024);
        let data = Bytes::from(vec![0u8; 512]);
        let req = FormRequestGenerator.build(&chunk_part, data, "image/jpeg", Some("photo.jpg"));
        assert_eq!(req.headers.get("x-chunked-total-size").unwrap(), "1024");
        assert_eq!(req.headers.get("x-chunked-content-type").unwrap(), "image/jpeg");
        assert!(matches!(req.body, RequestBody::Multipart(_)));
    }
}
