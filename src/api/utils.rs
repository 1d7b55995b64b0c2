//! Request guards for job intake

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, header::CONTENT_TYPE};
use http_body_util::{BodyExt, LengthLimitError, Limited};

use crate::api::error::ApiError;

/// `application/json` with optional parameters. Look-alikes such as
/// `application/jsonp` or `text/json` are rejected.
pub fn require_json(headers: &HeaderMap) -> Result<(), ApiError> {
    let raw = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::InvalidPayload("missing Content-Type header".into()))?;

    let media_type: mime::Mime = raw
        .parse()
        .map_err(|_| ApiError::InvalidPayload(format!("invalid Content-Type: {raw}")))?;

    if media_type.essence_str() != mime::APPLICATION_JSON.essence_str() {
        return Err(ApiError::InvalidPayload(format!(
            "Content-Type must be application/json, got: {}",
            media_type.essence_str()
        )));
    }
    Ok(())
}

/// Collect the (already decompressed) body, stopping as soon as it crosses
/// `limit` bytes.
pub async fn read_limited(body: Body, limit: usize) -> Result<Bytes, ApiError> {
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => {
            Err(ApiError::PayloadTooLarge(limit))
        }
        Err(err) => Err(ApiError::InvalidPayload(err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(content_type: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        headers
    }

    #[test]
    fn test_require_json_accepts_parameters() {
        assert!(require_json(&headers("application/json")).is_ok());
        assert!(require_json(&headers("application/json; charset=utf-8")).is_ok());
    }

    #[test]
    fn test_require_json_rejects_other_types() {
        for content_type in [
            "application/jsonp",
            "application/json-patch+json",
            "text/json",
            "invalid",
        ] {
            assert!(
                matches!(require_json(&headers(content_type)), Err(ApiError::InvalidPayload(_))),
                "{content_type} accepted"
            );
        }
        assert!(require_json(&HeaderMap::new()).is_err());
    }

    #[tokio::test]
    async fn test_read_limited_at_limit() {
        let bytes = read_limited(Body::from(vec![b'{'; 64]), 64).await.unwrap();
        assert_eq!(bytes.len(), 64);
    }

    #[tokio::test]
    async fn test_read_limited_over_limit() {
        let result = read_limited(Body::from(vec![b' '; 65]), 64).await;
        assert!(matches!(result, Err(ApiError::PayloadTooLarge(64))));
    }
}
