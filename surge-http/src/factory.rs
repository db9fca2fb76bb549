use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use common_types::{BenchmarkConfig, Operation, ParamValue};
use rand::Rng;
use surge_core::factory::OperationFactory;
use surge_core::template;

use crate::config::{HttpConfig, RequestTemplate};

const READ_METHODS: &[&str] = &["GET", "HEAD", "OPTIONS", "TRACE"];

/// Selects the next request template by weight bucket and renders it into
/// an operation. Templates of weight 0 fall back to round-robin when no
/// template carries weight.
pub struct HttpOperationFactory {
    config: HttpConfig,
    bench: BenchmarkConfig,
    /// Template index repeated once per unit of weight.
    buckets: Vec<usize>,
    round_robin: AtomicUsize,
}

impl HttpOperationFactory {
    pub fn new(config: HttpConfig, bench: BenchmarkConfig) -> Self {
        let mut buckets = Vec::new();
        for (index, template) in config.requests.iter().enumerate() {
            for _ in 0..template.weight {
                buckets.push(index);
            }
        }
        Self {
            config,
            bench,
            buckets,
            round_robin: AtomicUsize::new(0),
        }
    }

    fn select(&self) -> Option<&RequestTemplate> {
        if self.config.requests.is_empty() {
            return None;
        }
        if self.buckets.is_empty() {
            let index =
                self.round_robin.fetch_add(1, Ordering::Relaxed) % self.config.requests.len();
            return Some(&self.config.requests[index]);
        }
        let index = rand::thread_rng().gen_range(0..self.buckets.len());
        Some(&self.config.requests[self.buckets[index]])
    }

    fn upload_op(&self, job_id: u64) -> Operation {
        let path = self
            .config
            .upload
            .as_ref()
            .map(|upload| upload.path.clone())
            .unwrap_or_else(|| self.config.path.clone());
        Operation::new("upload", format!("upload:{job_id}"))
            .with_param("path", path)
            .with_op_kind(false)
    }

    fn default_op(&self, job_id: u64) -> Operation {
        let method = self.config.method.to_ascii_uppercase();
        let is_read = READ_METHODS.contains(&method.as_str());
        Operation::new(
            format!("http_{}", method.to_ascii_lowercase()),
            format!("{method} {}", self.config.path),
        )
        .with_param("path", self.config.path.clone())
        .with_metadata("job_id", job_id.to_string())
        .with_op_kind(is_read)
    }

    fn template_op(&self, template: &RequestTemplate, job_id: u64) -> Operation {
        let vars: HashMap<String, ParamValue> = template
            .params
            .iter()
            .map(|(k, v)| (k.clone(), ParamValue::from(v.as_str())))
            .collect();

        let method = template.method.to_ascii_uppercase();
        let is_read = READ_METHODS.contains(&method.as_str());
        let path = template::substitute(&template.path, &vars);
        let name = if template.name.is_empty() {
            format!("{method} {path}")
        } else {
            template.name.clone()
        };

        let mut op = Operation::new(
            format!("http_{}", method.to_ascii_lowercase()),
            name,
        )
        .with_param("path", path)
        .with_metadata("job_id", job_id.to_string())
        .with_op_kind(is_read);

        if !template.headers.is_empty() {
            let headers: HashMap<String, ParamValue> = template
                .headers
                .iter()
                .map(|(k, v)| {
                    (k.clone(), ParamValue::from(template::substitute(v, &vars)))
                })
                .collect();
            op = op.with_param("headers", ParamValue::Map(headers));
        }
        if let Some(body) = &template.body {
            let rendered = template::substitute_json(body, &vars);
            op = op.with_param("body", ParamValue::from_json(&rendered));
        }
        if let Some(content_type) = &template.content_type {
            op = op.with_param("content_type", content_type.as_str());
        }
        op
    }
}

impl OperationFactory for HttpOperationFactory {
    fn protocol(&self) -> &'static str {
        "http"
    }

    fn build(&self, job_id: u64) -> Operation {
        if self.bench.test_case == "upload" {
            return self.upload_op(job_id);
        }
        match self.select() {
            Some(template) => self.template_op(template, job_id),
            None => self.default_op(job_id),
        }
    }
}
