//! High-level calls against the processing API.
//!
//! Every mutating call resolves the anti-forgery token afresh and attaches it;
//! credentials travel through the transport's cookie jar on every call.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;

use super::error::ApiError;
use super::form::{self, SubmitRequest};
use super::transport::{ApiRequest, RawResponse, Transport};
use crate::jobs::{self, Job, Scalar};

pub const HISTORY_PATH: &str = "/api/history/";
pub const PING_PATH: &str = "/api/test/";

const UPLOAD_FAILED: &str = "Upload failed";
const HISTORY_FAILED: &str = "Failed to load history";
const CLEAR_FAILED: &str = "Failed to clear history";
const DOWNLOAD_FAILED: &str = "Download failed";

/// Result of one processed variant (hardware or software path).
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessedOutput {
    /// Processing time as reported by the server.
    pub time: Option<String>,
    pub payload: ResultPayload,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ResultPayload {
    /// Decoded image bytes.
    Image(Vec<u8>),
    /// Reference to a video artifact.
    Video(String),
}

/// Output returned synchronously in the submission response.
#[derive(Clone, Debug, PartialEq)]
pub struct InlineResult {
    /// Local file the user uploaded.
    pub original_preview: PathBuf,
    pub hardware: ProcessedOutput,
    pub software: Option<ProcessedOutput>,
}

/// One card in the results panel.
#[derive(Clone, Debug, PartialEq)]
pub struct ResultCard {
    pub title: String,
    pub source: CardSource,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CardSource {
    Local(PathBuf),
    Payload(ResultPayload),
}

impl InlineResult {
    /// Original preview, the hardware result, and the software result if any.
    pub fn cards(&self) -> Vec<ResultCard> {
        let mut cards = vec![ResultCard {
            title: "Original".into(),
            source: CardSource::Local(self.original_preview.clone()),
        }];
        cards.push(card("Hardware", &self.hardware));
        if let Some(sw) = &self.software {
            cards.push(card("SciPy", sw));
        }
        cards
    }
}

fn card(label: &str, out: &ProcessedOutput) -> ResultCard {
    let title = match &out.time {
        Some(t) => format!("{label} ({t})"),
        None => label.to_string(),
    };
    ResultCard {
        title,
        source: CardSource::Payload(out.payload.clone()),
    }
}

/// Every way a submission can end.
#[derive(Debug)]
pub enum SubmitOutcome {
    /// Processing finished within the request.
    InlineResult(InlineResult),
    /// Work was queued; progress is visible in the jobs table.
    Accepted { message: String },
    Failed(ApiError),
}

#[derive(Deserialize)]
struct AcceptedBody {
    message: String,
}

#[derive(Deserialize)]
struct InlineBody {
    #[serde(default)]
    hw_time: Option<Scalar>,
    #[serde(default)]
    hw_image: Option<String>,
    #[serde(default)]
    video_url: Option<String>,
    #[serde(default)]
    sw_time: Option<Scalar>,
    #[serde(default)]
    sw_image: Option<String>,
}

#[derive(Deserialize)]
struct PingBody {
    message: String,
}

/// Client for the processing API. Cheap to clone.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Validate, upload, and classify the response.
    ///
    /// Invalid input short-circuits before any request is made.
    pub async fn submit(&self, req: &SubmitRequest) -> SubmitOutcome {
        let params = match req.validate() {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("submission rejected locally: {e}");
                return SubmitOutcome::Failed(e);
            }
        };
        let bytes = match tokio::fs::read(&req.file).await {
            Ok(b) => b,
            Err(e) => {
                return SubmitOutcome::Failed(ApiError::Validation(format!(
                    "Cannot read {}: {e}",
                    req.file.display()
                )));
            }
        };

        let endpoint = form::endpoint(req.kind);
        let token = self.transport.page_context().token();
        let fields = req.fields(params.as_ref(), bytes);
        tracing::info!("submitting {} to {endpoint}", req.file.display());

        match self
            .transport
            .send(ApiRequest::post_form(endpoint, token, fields))
            .await
        {
            Ok(resp) => classify_submission(&resp, &req.file),
            Err(e) => {
                tracing::error!("submit to {endpoint} failed: {e:#}");
                SubmitOutcome::Failed(ApiError::transport(UPLOAD_FAILED, &e))
            }
        }
    }

    /// Complete job list visible to the current session, in server order.
    pub async fn fetch_all(&self) -> Result<Vec<Job>, ApiError> {
        let resp = self
            .transport
            .send(ApiRequest::get(HISTORY_PATH))
            .await
            .map_err(|e| ApiError::transport(HISTORY_FAILED, &e))?;
        if !resp.is_success() {
            return Err(ApiError::fixed_status(resp.status, HISTORY_FAILED));
        }
        jobs::parse_history(&resp.body).map_err(|e| ApiError::protocol(HISTORY_FAILED, e))
    }

    /// Delete every job record of the caller.
    pub async fn clear_all(&self) -> Result<(), ApiError> {
        let token = self.transport.page_context().token();
        let resp = self
            .transport
            .send(ApiRequest::delete(HISTORY_PATH, token))
            .await
            .map_err(|e| ApiError::transport(CLEAR_FAILED, &e))?;
        if !resp.is_success() {
            return Err(ApiError::from_status(resp.status, &resp.body, CLEAR_FAILED));
        }
        Ok(())
    }

    /// Fetch an artifact such as a processed video.
    pub async fn download(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        let resp = self
            .transport
            .send(ApiRequest::get(url))
            .await
            .map_err(|e| ApiError::transport(DOWNLOAD_FAILED, &e))?;
        if !resp.is_success() {
            return Err(ApiError::from_status(resp.status, &resp.body, DOWNLOAD_FAILED));
        }
        Ok(resp.body)
    }

    /// Connectivity probe.
    pub async fn ping(&self) -> Result<String, ApiError> {
        let resp = self
            .transport
            .send(ApiRequest::get(PING_PATH))
            .await
            .map_err(|e| ApiError::transport("Server unreachable", &e))?;
        if !resp.is_success() {
            return Err(ApiError::fixed_status(resp.status, "Server unreachable"));
        }
        resp.json::<PingBody>()
            .map(|b| b.message)
            .map_err(|e| ApiError::protocol("Unexpected probe response", e))
    }
}

/// Map a submission response onto its outcome.
pub fn classify_submission(resp: &RawResponse, original: &std::path::Path) -> SubmitOutcome {
    if resp.status == 202 {
        return match resp.json::<AcceptedBody>() {
            Ok(b) => SubmitOutcome::Accepted { message: b.message },
            Err(e) => SubmitOutcome::Failed(ApiError::protocol(UPLOAD_FAILED, e)),
        };
    }
    if !resp.is_success() {
        return SubmitOutcome::Failed(ApiError::from_status(
            resp.status,
            &resp.body,
            UPLOAD_FAILED,
        ));
    }

    // Oldest protocol: the processed JPEG itself is the body.
    if resp.is_image() {
        return SubmitOutcome::InlineResult(InlineResult {
            original_preview: original.to_path_buf(),
            hardware: ProcessedOutput {
                time: None,
                payload: ResultPayload::Image(resp.body.clone()),
            },
            software: None,
        });
    }

    match parse_inline(resp) {
        Ok((hardware, software)) => SubmitOutcome::InlineResult(InlineResult {
            original_preview: original.to_path_buf(),
            hardware,
            software,
        }),
        Err(e) => SubmitOutcome::Failed(e),
    }
}

fn parse_inline(resp: &RawResponse) -> Result<(ProcessedOutput, Option<ProcessedOutput>), ApiError> {
    let body: InlineBody = resp
        .json()
        .map_err(|e| ApiError::protocol(UPLOAD_FAILED, e))?;

    let hw_payload = match (non_empty(body.hw_image), non_empty(body.video_url)) {
        (Some(b64), _) => ResultPayload::Image(decode_image(&b64)?),
        (None, Some(url)) => ResultPayload::Video(url),
        (None, None) => {
            return Err(ApiError::protocol(
                UPLOAD_FAILED,
                "response has neither hw_image nor video_url",
            ));
        }
    };
    let hardware = ProcessedOutput {
        time: body.hw_time.map(|t| t.to_string()),
        payload: hw_payload,
    };

    let software = match non_empty(body.sw_image) {
        Some(b64) => Some(ProcessedOutput {
            time: body.sw_time.map(|t| t.to_string()),
            payload: ResultPayload::Image(decode_image(&b64)?),
        }),
        None => None,
    };
    Ok((hardware, software))
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|v| !v.is_empty())
}

fn decode_image(b64: &str) -> Result<Vec<u8>, ApiError> {
    STANDARD
        .decode(b64.trim())
        .map_err(|e| ApiError::protocol(UPLOAD_FAILED, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::FakeTransport;
    use crate::api::transport::{FormField, Method};
    use crate::jobs::{JobKind, JobStatus};

    fn client(fake: FakeTransport) -> (ApiClient, Arc<FakeTransport>) {
        let fake = Arc::new(fake);
        (ApiClient::new(fake.clone()), fake)
    }

    /// Write a throwaway upload file and return its path.
    fn upload_file(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("media_jobs_tui_{}_{name}", std::process::id()));
        std::fs::write(&path, b"fake-bytes").unwrap();
        path
    }

    fn grayscale_req(name: &str) -> SubmitRequest {
        let mut req = SubmitRequest::new(JobKind::ImageGrayscale);
        req.file = upload_file(name);
        req
    }

    #[tokio::test]
    async fn test_sync_grayscale_yields_two_cards() {
        let (api, fake) = client(FakeTransport::new().with_cookies("csrftoken=tok"));
        fake.push_json(200, r#"{"hw_time":"12ms","hw_image":"QUJD"}"#);

        let req = grayscale_req("gs.jpg");
        let SubmitOutcome::InlineResult(result) = api.submit(&req).await else {
            panic!("expected inline result");
        };
        let titles: Vec<String> = result.cards().into_iter().map(|c| c.title).collect();
        assert_eq!(titles, vec!["Original", "Hardware (12ms)"]);
        assert_eq!(result.hardware.payload, ResultPayload::Image(b"ABC".to_vec()));

        let sent = fake.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method, Method::Post);
        assert_eq!(sent[0].path, "/api/grayscale/");
        assert_eq!(sent[0].csrf_token.as_deref(), Some("tok"));
        assert!(matches!(
            &sent[0].form.as_ref().unwrap()[0],
            FormField::File { name, bytes, .. } if name == "image" && bytes == b"fake-bytes"
        ));
    }

    #[tokio::test]
    async fn test_software_card_only_with_payload() {
        let (api, fake) = client(FakeTransport::new());
        fake.push_json(
            200,
            r#"{"hw_time":"3ms","hw_image":"QUJD","sw_time":"0.4100 s","sw_image":"REVG"}"#,
        );
        fake.push_json(200, r#"{"hw_time":"3ms","hw_image":"QUJD","sw_time":"1 s","sw_image":""}"#);

        let req = grayscale_req("sw.jpg");
        let SubmitOutcome::InlineResult(with_sw) = api.submit(&req).await else {
            panic!("expected inline result");
        };
        assert_eq!(with_sw.cards().len(), 3);
        assert_eq!(with_sw.cards()[2].title, "SciPy (0.4100 s)");

        let SubmitOutcome::InlineResult(without_sw) = api.submit(&req).await else {
            panic!("expected inline result");
        };
        assert_eq!(without_sw.cards().len(), 2);
    }

    #[tokio::test]
    async fn test_accepted_is_not_inline() {
        let (api, fake) = client(FakeTransport::new());
        fake.push_json(202, r#"{"message":"Job queued","job_id":"job_1"}"#);
        let mut req = grayscale_req("clip.mp4");
        req.kind = JobKind::VideoGrayscale;

        match api.submit(&req).await {
            SubmitOutcome::Accepted { message } => assert_eq!(message, "Job queued"),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(fake.requests()[0].path, "/api/video/grayscale/");
    }

    #[tokio::test]
    async fn test_invalid_kernel_sends_nothing() {
        let (api, fake) = client(FakeTransport::new());
        let mut req = grayscale_req("k.jpg");
        req.kind = JobKind::ImageFilter;
        req.kernel = "1 2 3 4 5 6 7 8".into();

        let outcome = api.submit(&req).await;
        assert!(matches!(outcome, SubmitOutcome::Failed(ref e) if e.is_validation()));
        assert!(fake.requests().is_empty());
    }

    #[tokio::test]
    async fn test_filter_submission_fields() {
        let (api, fake) = client(FakeTransport::new().with_cookies("csrftoken=tok"));
        fake.push_json(202, r#"{"message":"Job queued"}"#);
        let mut req = grayscale_req("filter.mp4");
        req.kind = JobKind::VideoFilter;
        req.apply_preset(0);

        assert!(matches!(api.submit(&req).await, SubmitOutcome::Accepted { .. }));
        let sent = &fake.requests()[0];
        assert_eq!(sent.path, "/api/video/filter/");
        assert_eq!(sent.text_field("filter"), Some("-1 -1 -1 -1 8 -1 -1 -1 -1"));
        assert_eq!(sent.text_field("factor"), Some("1"));
        assert_eq!(sent.text_field("use_scipy"), None);
    }

    #[tokio::test]
    async fn test_failure_reasons() {
        let (api, fake) = client(FakeTransport::new());
        fake.push_json(400, r#"{"error":"No image uploaded"}"#);
        fake.push(RawResponse {
            status: 500,
            content_type: Some("text/html".into()),
            body: b"<h1>oops</h1>".to_vec(),
        });
        fake.push_json(200, r#"{"unexpected":true}"#);
        fake.push_network_error("connection refused");

        let req = grayscale_req("f.jpg");
        let reasons: Vec<String> = {
            let mut v = Vec::new();
            for _ in 0..4 {
                match api.submit(&req).await {
                    SubmitOutcome::Failed(e) => v.push(e.to_string()),
                    other => panic!("unexpected outcome {other:?}"),
                }
            }
            v
        };
        assert_eq!(reasons[0], "No image uploaded");
        assert_eq!(reasons[1], "Upload failed");
        assert_eq!(reasons[2], "Upload failed");
        assert!(reasons[3].starts_with("Upload failed"));
    }

    #[tokio::test]
    async fn test_raw_image_body_is_inline() {
        let (api, fake) = client(FakeTransport::new());
        fake.push(RawResponse {
            status: 200,
            content_type: Some("image/jpeg".into()),
            body: vec![0xff, 0xd8, 0xff],
        });
        let req = grayscale_req("raw.jpg");
        let SubmitOutcome::InlineResult(r) = api.submit(&req).await else {
            panic!("expected inline result");
        };
        assert_eq!(r.hardware.payload, ResultPayload::Image(vec![0xff, 0xd8, 0xff]));
        assert_eq!(r.cards()[1].title, "Hardware");
    }

    #[tokio::test]
    async fn test_sync_video_result() {
        let (api, fake) = client(FakeTransport::new());
        fake.push_json(200, r#"{"hw_time":"2.1 s","video_url":"/media/job_1/out.mp4"}"#);
        let mut req = grayscale_req("v.mp4");
        req.kind = JobKind::VideoGrayscale;
        let SubmitOutcome::InlineResult(r) = api.submit(&req).await else {
            panic!("expected inline result");
        };
        assert_eq!(
            r.hardware.payload,
            ResultPayload::Video("/media/job_1/out.mp4".into())
        );
    }

    #[tokio::test]
    async fn test_fetch_all_uses_fixed_message() {
        let (api, fake) = client(FakeTransport::new());
        fake.push_json(500, r#"{"error":"db down"}"#);
        fake.push_json(200, r#"{"not":"a list"}"#);
        fake.push_json(200, r#"[{"id":"a","kind":"video-filter","status":"running","progress":40}]"#);

        assert_eq!(api.fetch_all().await.unwrap_err().to_string(), "Failed to load history");
        assert_eq!(api.fetch_all().await.unwrap_err().to_string(), "Failed to load history");
        let jobs = api.fetch_all().await.unwrap();
        assert_eq!(jobs[0].status, JobStatus::Running);

        // GET never carries the mutating token.
        assert!(fake.requests().iter().all(|r| r.csrf_token.is_none()));
    }

    #[tokio::test]
    async fn test_clear_all_carries_token_and_server_message() {
        let (api, fake) = client(FakeTransport::new().with_cookies("csrftoken=t%3D1"));
        fake.push_json(204, "");
        fake.push_json(403, r#"{"error":"CSRF verification failed"}"#);

        assert!(api.clear_all().await.is_ok());
        let err = api.clear_all().await.unwrap_err();
        assert_eq!(err.to_string(), "CSRF verification failed");

        let sent = fake.requests();
        assert_eq!(sent[0].method, Method::Delete);
        assert_eq!(sent[0].path, HISTORY_PATH);
        assert_eq!(sent[0].csrf_token.as_deref(), Some("t=1"));
    }

    #[tokio::test]
    async fn test_ping_reads_message() {
        let (api, fake) = client(FakeTransport::new());
        fake.push_json(200, r#"{"message":"Working fine!"}"#);
        assert_eq!(api.ping().await.unwrap(), "Working fine!");
    }
}
