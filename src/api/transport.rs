//! HTTP transport used by the API client.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, Url, cookie::CookieStore, cookie::Jar, multipart};
use serde::de::DeserializeOwned;
use std::sync::{Arc, RwLock};

use super::token::{self, PageContext};
use crate::config::ServerCfg;

/// HTTP verbs the processing API uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

/// One multipart field.
#[derive(Clone, Debug, PartialEq)]
pub enum FormField {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        mime: String,
        bytes: Vec<u8>,
    },
}

/// A request described independently of the HTTP library.
#[derive(Clone, Debug)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the server base url, or an absolute url.
    pub path: String,
    /// Anti-forgery token, attached as a header on mutating calls.
    pub csrf_token: Option<String>,
    pub form: Option<Vec<FormField>>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            csrf_token: None,
            form: None,
        }
    }

    pub fn post_form(path: impl Into<String>, token: String, form: Vec<FormField>) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            csrf_token: Some(token),
            form: Some(form),
        }
    }

    pub fn delete(path: impl Into<String>, token: String) -> Self {
        Self {
            method: Method::Delete,
            path: path.into(),
            csrf_token: Some(token),
            form: None,
        }
    }

    /// Value of a text field, if present.
    #[cfg(test)]
    pub fn text_field(&self, name: &str) -> Option<&str> {
        self.form.as_ref()?.iter().find_map(|f| match f {
            FormField::Text { name: n, value } if n == name => Some(value.as_str()),
            _ => None,
        })
    }
}

/// Status, content type, and body of a completed request.
#[derive(Clone, Debug)]
pub struct RawResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// True for raw image bodies (the oldest synchronous protocol).
    pub fn is_image(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.trim_start().starts_with("image/"))
    }

    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }
}

/// Sends requests with same-origin credentials and exposes the page context
/// the anti-forgery token is resolved from.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, req: ApiRequest) -> Result<RawResponse>;

    /// Current markup snapshot and cookies, read fresh on every call.
    fn page_context(&self) -> PageContext;

    /// Replace the markup snapshot with the body of the given page.
    async fn load_page(&self, path: &str) -> Result<()>;

    /// Absolute url for a path or url returned by the server.
    fn resolve_url(&self, path: &str) -> Result<Url>;
}

/// reqwest-backed transport with a cookie jar shared across all calls.
pub struct HttpTransport {
    http: Client,
    base: Url,
    jar: Arc<Jar>,
    markup: RwLock<Option<String>>,
}

impl HttpTransport {
    /// Build the client and seed the jar with the configured session cookies.
    pub fn new(cfg: &ServerCfg) -> Result<Self> {
        let base = Url::parse(&cfg.base_url)
            .map_err(|e| anyhow!("invalid base_url {:?}: {e}", cfg.base_url))?;
        let jar = Arc::new(Jar::default());
        for pair in cfg.session_cookie.split(';') {
            let pair = pair.trim();
            if !pair.is_empty() {
                jar.add_cookie_str(pair, &base);
            }
        }
        let http = Client::builder()
            .cookie_provider(jar.clone())
            .timeout(cfg.timeout())
            .build()?;
        Ok(Self {
            http,
            base,
            jar,
            markup: RwLock::new(None),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, req: ApiRequest) -> Result<RawResponse> {
        let url = self.resolve_url(&req.path)?;
        let mut builder = match req.method {
            Method::Get => self.http.get(url),
            Method::Post => self.http.post(url),
            Method::Delete => self.http.delete(url),
        };
        if let Some(token) = req.csrf_token {
            builder = builder.header(token::HEADER, token);
        }
        if let Some(fields) = req.form {
            builder = builder.multipart(to_multipart(fields)?);
        }

        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.bytes().await?.to_vec();
        tracing::debug!("{:?} {} -> {status}", req.method, req.path);
        Ok(RawResponse {
            status,
            content_type,
            body,
        })
    }

    fn page_context(&self) -> PageContext {
        let markup = self.markup.read().ok().and_then(|m| m.clone());
        let cookies = self
            .jar
            .cookies(&self.base)
            .and_then(|v| v.to_str().ok().map(str::to_string));
        PageContext { markup, cookies }
    }

    async fn load_page(&self, path: &str) -> Result<()> {
        let resp = self.send(ApiRequest::get(path)).await?;
        if !resp.is_success() {
            return Err(anyhow!("page {path} returned HTTP {}", resp.status));
        }
        let text = String::from_utf8_lossy(&resp.body).into_owned();
        match self.markup.write() {
            Ok(mut slot) => *slot = Some(text),
            Err(_) => return Err(anyhow!("page markup lock poisoned")),
        }
        Ok(())
    }

    fn resolve_url(&self, path: &str) -> Result<Url> {
        Ok(self.base.join(path)?)
    }
}

fn to_multipart(fields: Vec<FormField>) -> Result<multipart::Form> {
    let mut form = multipart::Form::new();
    for field in fields {
        form = match field {
            FormField::Text { name, value } => form.text(name, value),
            FormField::File {
                name,
                file_name,
                mime,
                bytes,
            } => form.part(
                name,
                multipart::Part::bytes(bytes)
                    .file_name(file_name)
                    .mime_str(&mime)?,
            ),
        };
    }
    Ok(form)
}
