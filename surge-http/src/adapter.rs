use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use common_metrics::subs::HttpMetrics;
use common_metrics::MetricsCollector;
use common_types::{Operation, OperationResult, ParamValue, SurgeError};
use reqwest::Method;
use surge_core::adapter::{not_connected, unsupported, ProtocolAdapter};
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

use crate::config::{AuthMode, HttpConfig};
use crate::pool::HttpClientPool;

/// Response bodies are read up to this ceiling and truncated beyond it.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

const SUPPORTED: &[&str] = &[
    "http_get",
    "http_post",
    "http_put",
    "http_patch",
    "http_delete",
    "http_head",
    "http_options",
    "http_trace",
    "http_connect",
    "upload",
    "http_request",
];

pub struct HttpAdapter {
    config: HttpConfig,
    pool: RwLock<Option<Arc<HttpClientPool>>>,
    connected: AtomicBool,
    collector: Arc<MetricsCollector>,
}

impl HttpAdapter {
    pub fn new(config: HttpConfig) -> Self {
        let collector = Arc::new(MetricsCollector::with_protocol(Box::new(HttpMetrics::new())));
        Self {
            config,
            pool: RwLock::new(None),
            connected: AtomicBool::new(false),
            collector,
        }
    }

    /// Outstanding pool leases, for leak probes in tests and teardown.
    pub async fn in_flight(&self) -> usize {
        match self.pool.read().await.as_ref() {
            Some(pool) => pool.in_flight(),
            None => 0,
        }
    }

    fn method_for(&self, op: &Operation) -> Result<(Method, bool), SurgeError> {
        let method = match op.op_type() {
            "http_get" => Method::GET,
            "http_post" => Method::POST,
            "http_put" => Method::PUT,
            "http_patch" => Method::PATCH,
            "http_delete" => Method::DELETE,
            "http_head" => Method::HEAD,
            "http_options" => Method::OPTIONS,
            "http_trace" => Method::TRACE,
            "http_connect" => Method::CONNECT,
            "upload" => return Ok((Method::POST, true)),
            "http_request" => {
                let name = op
                    .param("method")
                    .and_then(ParamValue::as_str)
                    .unwrap_or(&self.config.method);
                Method::from_bytes(name.to_ascii_uppercase().as_bytes()).map_err(|_| {
                    SurgeError::ConfigInvalid(format!("invalid http method {name:?}"))
                })?
            }
            other => return Err(SurgeError::UnsupportedOperation(other.to_owned())),
        };
        Ok((method, false))
    }

    fn build_url(&self, path: &str, op: &Operation) -> Result<Url, SurgeError> {
        let base = self.config.parsed_base_url()?;
        let mut url = base
            .join(path)
            .map_err(|err| SurgeError::ConfigInvalid(format!("invalid path {path:?}: {err}")))?;
        if let Some(query) = op.param("query").and_then(ParamValue::as_map) {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in query {
                if let Some(value) = value.as_str() {
                    pairs.append_pair(name, value);
                }
            }
        }
        Ok(url)
    }

    async fn build_multipart(&self, op: &Operation) -> Result<reqwest::multipart::Form, SurgeError> {
        let upload = self.config.upload.clone().unwrap_or_default();
        let mut form = reqwest::multipart::Form::new();
        for (name, value) in &upload.fields {
            form = form.text(name.clone(), value.clone());
        }

        let patterns: Vec<String> = match op.param("files").and_then(ParamValue::as_list) {
            Some(list) => list
                .iter()
                .filter_map(|v| v.as_str().map(str::to_owned))
                .collect(),
            None => upload.files.clone(),
        };
        let mut paths = Vec::new();
        for pattern in &patterns {
            if pattern.contains(['*', '?', '[']) {
                let matched = glob::glob(pattern).map_err(|err| {
                    SurgeError::ConfigInvalid(format!("invalid upload glob {pattern:?}: {err}"))
                })?;
                for entry in matched.flatten() {
                    paths.push(entry);
                }
            } else {
                paths.push(pattern.into());
            }
        }
        if paths.is_empty() {
            return Err(SurgeError::ConfigInvalid(
                "upload has no files to attach".into(),
            ));
        }

        for path in paths {
            let data = tokio::fs::read(&path).await.map_err(|err| {
                SurgeError::ConfigInvalid(format!("cannot read upload file {path:?}: {err}"))
            })?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "upload.bin".to_owned());
            form = form.part(
                upload.field.clone(),
                reqwest::multipart::Part::bytes(data).file_name(file_name),
            );
        }
        Ok(form)
    }

    fn attach_body(
        &self,
        mut request: reqwest::RequestBuilder,
        op: &Operation,
    ) -> Result<reqwest::RequestBuilder, SurgeError> {
        let content_type = op
            .param("content_type")
            .and_then(ParamValue::as_str)
            .unwrap_or(&self.config.content_type);
        if let Some(body) = op.param("body") {
            request = match content_type {
                "application/json" => request.json(&body.to_json()),
                "application/x-www-form-urlencoded" => {
                    let map = body.as_map().ok_or_else(|| {
                        SurgeError::ConfigInvalid(
                            "form bodies must be a map of string fields".into(),
                        )
                    })?;
                    let mut fields = HashMap::new();
                    for (name, value) in map {
                        let value = value.as_str().ok_or_else(|| {
                            SurgeError::ConfigInvalid(format!(
                                "form field {name:?} is not a string"
                            ))
                        })?;
                        fields.insert(name.clone(), value.to_owned());
                    }
                    request.form(&fields)
                }
                _ => match body {
                    ParamValue::Str(text) => request
                        .header(http::header::CONTENT_TYPE, content_type)
                        .body(text.clone()),
                    ParamValue::Bytes(data) => request
                        .header(http::header::CONTENT_TYPE, content_type)
                        .body(data.clone()),
                    other => request
                        .header(http::header::CONTENT_TYPE, content_type)
                        .body(other.to_json().to_string()),
                },
            };
        } else if let Some(value) = op.value() {
            request = request
                .header(http::header::CONTENT_TYPE, content_type)
                .body(value.to_vec());
        }
        Ok(request)
    }

    async fn perform(
        &self,
        client: &reqwest::Client,
        method: Method,
        path: &str,
        upload: bool,
        op: &Operation,
    ) -> Result<OperationResult, SurgeError> {
        let url = self.build_url(path, op)?;
        let mut request = client.request(method.clone(), url);

        match self.config.auth.mode {
            AuthMode::None | AuthMode::MutualTls => {}
            AuthMode::Basic => {
                request = request.basic_auth(
                    &self.config.auth.username,
                    Some(&self.config.auth.password),
                );
            }
            AuthMode::Bearer => {
                request = request.bearer_auth(&self.config.auth.token);
            }
        }

        if let Some(headers) = op.param("headers").and_then(ParamValue::as_map) {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name, value);
                }
            }
        }

        if upload {
            request = request.multipart(self.build_multipart(op).await?);
        } else if matches!(method, Method::POST | Method::PUT | Method::PATCH)
            || op.param("body").is_some()
        {
            request = self.attach_body(request, op)?;
        }

        let mut response = request
            .send()
            .await
            .map_err(|err| self.map_send_error(&err))?;

        let status = response.status().as_u16();
        let response_content_type = response
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let mut header_map = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                header_map.insert(name.to_string(), ParamValue::from(value));
            }
        }

        let mut body = Vec::new();
        let mut truncated = false;
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    if body.len() + chunk.len() > MAX_BODY_BYTES {
                        body.extend_from_slice(&chunk[..MAX_BODY_BYTES - body.len()]);
                        truncated = true;
                        break;
                    }
                    body.extend_from_slice(&chunk);
                }
                Ok(None) => break,
                Err(err) => {
                    return Err(SurgeError::Transport(format!(
                        "failed reading response body: {err}"
                    )))
                }
            }
        }

        let success = self.config.is_success_status(status);
        let mut result = if success {
            OperationResult::ok(Duration::ZERO)
        } else {
            OperationResult::fail(
                Duration::ZERO,
                SurgeError::Protocol(format!("server returned status {status}")),
            )
        };
        result = result
            .with_metadata("status_code", i64::from(status))
            .with_metadata("method", method.as_str())
            .with_metadata("path", path)
            .with_metadata("content_length", body.len())
            .with_metadata("response_headers", ParamValue::Map(header_map));
        if truncated {
            result = result.with_metadata("truncated", true);
        }
        if let Some(content_type) = response_content_type {
            result = result.with_metadata("content_type", content_type);
        }
        Ok(result.with_value(body))
    }

    fn map_send_error(&self, err: &reqwest::Error) -> SurgeError {
        if err.is_redirect() {
            SurgeError::TooManyRedirects(self.config.redirect.max_redirects as u32)
        } else if err.is_connect() || err.is_timeout() {
            SurgeError::Transport(err.to_string())
        } else if err.is_request() || err.is_body() || err.is_decode() {
            SurgeError::Protocol(err.to_string())
        } else {
            SurgeError::Transport(err.to_string())
        }
    }

    async fn probe(&self, pool: &Arc<HttpClientPool>) -> Result<(), SurgeError> {
        let lease = pool.acquire(self.config.pool.acquire_timeout).await?;
        let url = self.config.parsed_base_url()?;
        let sent = tokio::time::timeout(HEALTH_PROBE_TIMEOUT, lease.client.get(url).send()).await;
        match sent {
            Err(_) => Err(SurgeError::Transport("health probe timed out".into())),
            Ok(Err(err)) => Err(self.map_send_error(&err)),
            Ok(Ok(response)) => {
                let status = response.status().as_u16();
                if self.config.accepts_status(status) {
                    debug!(status, "http health probe ok");
                    Ok(())
                } else {
                    Err(SurgeError::Protocol(format!(
                        "health probe got status {status}"
                    )))
                }
            }
        }
    }
}

#[async_trait]
impl ProtocolAdapter for HttpAdapter {
    fn protocol_name(&self) -> &'static str {
        "http"
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn supported_operations(&self) -> &'static [&'static str] {
        SUPPORTED
    }

    fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    async fn connect(&self) -> Result<(), SurgeError> {
        self.config.validate()?;
        let pool = Arc::new(HttpClientPool::new(&self.config)?);
        if let Err(err) = self.probe(&pool).await {
            pool.close();
            self.connected.store(false, Ordering::Release);
            return Err(err);
        }
        *self.pool.write().await = Some(pool);
        self.connected.store(true, Ordering::Release);
        info!(base_url = %self.config.base_url, "http adapter connected");
        Ok(())
    }

    async fn execute(&self, op: &Operation) -> OperationResult {
        if !self.is_connected() {
            return not_connected(op);
        }
        let pool = match self.pool.read().await.as_ref() {
            Some(pool) => pool.clone(),
            None => return not_connected(op),
        };

        let acquire_started = Instant::now();
        let (method, upload) = match self.method_for(op) {
            Ok(found) => found,
            Err(SurgeError::UnsupportedOperation(_)) => return unsupported(op, acquire_started),
            Err(err) => return OperationResult::fail(Duration::ZERO, err).read(op.is_read()),
        };
        let is_read = matches!(
            method,
            Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
        );
        let path = op
            .param("path")
            .and_then(ParamValue::as_str)
            .unwrap_or(&self.config.path)
            .to_owned();

        let lease = match pool.acquire(self.config.pool.acquire_timeout).await {
            Ok(lease) => lease,
            // Failure latency includes the time spent waiting on the pool;
            // that wait is what the caller actually experienced.
            Err(err) => {
                return OperationResult::fail(acquire_started.elapsed(), err)
                    .read(is_read)
                    .with_metadata("method", method.as_str())
                    .with_metadata("path", path)
            }
        };

        let started = Instant::now();
        match self.perform(&lease.client, method.clone(), &path, upload, op).await {
            Ok(mut result) => {
                result.duration = started.elapsed();
                result.is_read = is_read;
                result
            }
            Err(err) => OperationResult::fail(started.elapsed(), err)
                .read(is_read)
                .with_metadata("method", method.as_str())
                .with_metadata("path", path),
        }
    }

    async fn health_check(&self) -> Result<(), SurgeError> {
        let pool = self
            .pool
            .read()
            .await
            .as_ref()
            .cloned()
            .ok_or(SurgeError::PoolClosed)?;
        self.probe(&pool).await
    }

    async fn close(&self) -> Result<(), SurgeError> {
        self.connected.store(false, Ordering::Release);
        if let Some(pool) = self.pool.write().await.take() {
            pool.close();
        }
        Ok(())
    }
}
