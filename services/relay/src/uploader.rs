//! Delivery of frames to the remote ingestion endpoint.

use crate::classifier::UploadFailure;
use crate::config::UploadConfig;
use crate::frame::FrameRecord;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::SecondsFormat;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use tracing::{debug, info, instrument};

/// Header carrying the API credential.
pub const API_KEY_HEADER: &str = "X-API-KEY";

/// Accepts frames for delivery.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Deliver one frame. Any error is classified by the caller.
    async fn submit(&self, frame: &FrameRecord, payload: Bytes) -> Result<(), UploadFailure>;
}

/// Multipart HTTP uploader.
pub struct HttpUploader {
    client: Client,
    endpoint: String,
    api_key: String,
    store_id: String,
}

impl HttpUploader {
    /// Create a new uploader for the configured endpoint.
    pub fn new(config: &UploadConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .build()?;

        info!(
            endpoint = %config.endpoint,
            store_id = %config.store_id,
            "HTTP uploader initialized"
        );

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            store_id: config.store_id.clone(),
        })
    }

    fn build_form(&self, frame: &FrameRecord, payload: Bytes) -> Result<Form, UploadFailure> {
        let image = Part::stream(payload)
            .file_name(frame.file_name())
            .mime_str("image/jpeg")
            .map_err(|e| UploadFailure::Local(e.to_string()))?;

        Ok(Form::new()
            .part("image", image)
            .text(
                "timestamp",
                frame.captured_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            )
            .text("store_id", self.store_id.clone()))
    }
}

#[async_trait]
impl FrameSink for HttpUploader {
    #[instrument(skip(self, frame, payload), fields(frame_id = %frame.id, size_bytes = payload.len()))]
    async fn submit(&self, frame: &FrameRecord, payload: Bytes) -> Result<(), UploadFailure> {
        let form = self.build_form(frame, payload)?;

        let response = self
            .client
            .post(&self.endpoint)
            .header(API_KEY_HEADER, &self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(status = status.as_u16(), "Frame accepted by endpoint");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(UploadFailure::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{classify, RetryDecision};
    use crate::config;
    use axum::extract::{Multipart, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::Router;
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug, Default, Clone)]
    struct Received {
        api_key: Option<String>,
        file_name: Option<String>,
        image: Vec<u8>,
        timestamp: String,
        store_id: String,
    }

    type Seen = Arc<Mutex<Vec<Received>>>;

    async fn accept(State(seen): State<Seen>, headers: HeaderMap, mut multipart: Multipart) -> StatusCode {
        let mut received = Received {
            api_key: headers
                .get("x-api-key")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            ..Default::default()
        };

        while let Some(field) = multipart.next_field().await.unwrap() {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "image" => {
                    received.file_name = field.file_name().map(str::to_string);
                    received.image = field.bytes().await.unwrap().to_vec();
                }
                "timestamp" => received.timestamp = field.text().await.unwrap(),
                "store_id" => received.store_id = field.text().await.unwrap(),
                _ => {}
            }
        }

        seen.lock().push(received);
        StatusCode::CREATED
    }

    async fn spawn_server(seen: Seen) -> String {
        let router = Router::new()
            .route("/upload-images/", post(accept))
            .route(
                "/unavailable/",
                post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "overloaded") }),
            )
            .route(
                "/unauthorized/",
                post(|| async { (StatusCode::UNAUTHORIZED, "invalid api key") }),
            )
            .route(
                "/slow/",
                post(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    StatusCode::OK
                }),
            )
            .with_state(seen);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn uploader(endpoint: String) -> HttpUploader {
        let mut upload = config::test_config(PathBuf::from("/tmp/frames")).upload;
        upload.endpoint = endpoint;
        upload.request_timeout_ms = 300;
        HttpUploader::new(&upload).unwrap()
    }

    fn frame() -> FrameRecord {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 45).unwrap();
        FrameRecord::new(
            at,
            PathBuf::from("/store/frame_2024-01-15T10-30-45-000Z.jpg"),
            None,
        )
    }

    #[tokio::test]
    async fn test_multipart_fields() {
        let seen: Seen = Arc::default();
        let base = spawn_server(seen.clone()).await;
        let uploader = uploader(format!("{base}/upload-images/"));

        uploader
            .submit(&frame(), Bytes::from_static(b"\xff\xd8jpeg"))
            .await
            .unwrap();

        let received = seen.lock().clone();
        assert_eq!(received.len(), 1);
        let received = &received[0];
        assert_eq!(received.api_key.as_deref(), Some("test-key"));
        assert_eq!(
            received.file_name.as_deref(),
            Some("frame_2024-01-15T10-30-45-000Z.jpg")
        );
        assert_eq!(received.image, b"\xff\xd8jpeg");
        assert_eq!(received.timestamp, "2024-01-15T10:30:45.000Z");
        assert_eq!(received.store_id, "111");
    }

    #[tokio::test]
    async fn test_server_error_body_is_surfaced() {
        let base = spawn_server(Arc::default()).await;
        let uploader = uploader(format!("{base}/unavailable/"));

        let failure = uploader
            .submit(&frame(), Bytes::from_static(b"jpeg"))
            .await
            .unwrap_err();
        assert_eq!(
            failure,
            UploadFailure::Status {
                status: 503,
                body: "overloaded".to_string()
            }
        );
        assert_eq!(classify(&failure), RetryDecision::Retryable);
    }

    #[tokio::test]
    async fn test_auth_rejection_is_terminal() {
        let base = spawn_server(Arc::default()).await;
        let uploader = uploader(format!("{base}/unauthorized/"));

        let failure = uploader
            .submit(&frame(), Bytes::from_static(b"jpeg"))
            .await
            .unwrap_err();
        assert!(matches!(failure, UploadFailure::Status { status: 401, .. }));
        assert_eq!(classify(&failure), RetryDecision::Terminal);
    }

    #[tokio::test]
    async fn test_request_timeout_is_retryable() {
        let base = spawn_server(Arc::default()).await;
        let uploader = uploader(format!("{base}/slow/"));

        let failure = uploader
            .submit(&frame(), Bytes::from_static(b"jpeg"))
            .await
            .unwrap_err();
        assert!(matches!(failure, UploadFailure::Timeout(_)), "{failure:?}");
        assert_eq!(classify(&failure), RetryDecision::Retryable);
    }

    #[tokio::test]
    async fn test_connection_refused_is_retryable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let uploader = uploader(format!("http://{addr}/upload-images/"));
        let failure = uploader
            .submit(&frame(), Bytes::from_static(b"jpeg"))
            .await
            .unwrap_err();
        assert!(matches!(failure, UploadFailure::Connect(_)), "{failure:?}");
        assert_eq!(classify(&failure), RetryDecision::Retryable);
    }
}
