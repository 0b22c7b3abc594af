//! File and webhook sinks (spec §4.11), grounded in
//! `elspeth_core::sinks`'s typed sanitized-URL artifact factories.

use crate::error::{EngineError, Result};
use elspeth_core::plugin::{PluginContext, Sink};
use elspeth_core::row::PipelineRow;
use elspeth_core::sinks::{ArtifactDescriptor, ArtifactType, OutputTargetValidation, SanitizedWebhookUrl};
use async_trait::async_trait;
use elspeth_net::AuditedHttpClient;
use serde_json::Value;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Which field names a sink writes for each row: normalized (the
/// contract's canonical names), or the original source header — which, for
/// a resumed append, must be supplied out of band before validation.
pub enum HeaderMode {
    /// Use each field's normalized name.
    Normalized,
    /// Use the original source header; requires
    /// [`FileSink::set_resume_field_resolution`] before
    /// `validate_output_target` or the first write.
    Original,
}

/// Writes emitted rows as newline-delimited JSON to a local file.
pub struct FileSink {
    name: String,
    path: PathBuf,
    header_mode: HeaderMode,
    resume_field_resolution: Option<std::collections::HashMap<String, String>>,
    file: Option<std::fs::File>,
    bytes_written: u64,
    rows_written: u64,
    rendered_rows: Vec<Value>,
}

impl FileSink {
    /// Build a sink writing JSONL rows to `path`, declaring `name` as the
    /// artifact it produces.
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, header_mode: HeaderMode) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            header_mode,
            resume_field_resolution: None,
            file: None,
            bytes_written: 0,
            rows_written: 0,
            rendered_rows: Vec::new(),
        }
    }

    /// Supply the normalized→original field mapping a resumed append with
    /// `headers: original` needs before validation or the first write.
    pub fn set_resume_field_resolution(&mut self, mapping: std::collections::HashMap<String, String>) {
        self.resume_field_resolution = Some(mapping);
    }

    fn resolve_name(&self, normalized: &str) -> Result<String> {
        match self.header_mode {
            HeaderMode::Normalized => Ok(normalized.to_string()),
            HeaderMode::Original => self
                .resume_field_resolution
                .as_ref()
                .and_then(|mapping| mapping.get(normalized).cloned())
                .ok_or_else(|| {
                    EngineError::InvalidOutputTarget {
                        sink: "file".to_string(),
                        detail: format!("no original-header resolution supplied for field '{normalized}'"),
                    }
                }),
        }
    }

    fn render_row(&self, row: &PipelineRow) -> Result<Value> {
        let mut object = serde_json::Map::new();
        for (name, value) in row.to_dict() {
            object.insert(self.resolve_name(&name)?, value);
        }
        Ok(Value::Object(object))
    }
}

#[async_trait]
impl Sink for FileSink {
    async fn on_start(&mut self, _ctx: &PluginContext) -> elspeth_core::error::Result<()> {
        if matches!(self.header_mode, HeaderMode::Original) && self.resume_field_resolution.is_none() {
            return Err(elspeth_core::error::Error::InvalidResult(
                "file sink configured with headers: original but no field resolution was supplied".to_string(),
            ));
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| elspeth_core::error::Error::InvalidResult(err.to_string()))?;
        self.file = Some(file);
        Ok(())
    }

    async fn write(&mut self, rows: &[PipelineRow], _ctx: &PluginContext) -> elspeth_core::error::Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| elspeth_core::error::Error::InvalidResult("file sink written to before on_start".to_string()))?;
        for row in rows {
            let rendered = self
                .render_row(row)
                .map_err(|err| elspeth_core::error::Error::InvalidResult(err.to_string()))?;
            let mut line = serde_json::to_vec(&rendered).map_err(elspeth_core::error::Error::from)?;
            line.push(b'\n');
            self.bytes_written += line.len() as u64;
            self.rows_written += 1;
            file.write_all(&line)
                .map_err(|err| elspeth_core::error::Error::InvalidResult(err.to_string()))?;
            self.rendered_rows.push(rendered);
        }
        Ok(())
    }

    fn produces(&self) -> Vec<ArtifactDescriptor> {
        vec![ArtifactDescriptor::for_file(self.name.clone(), &self.path.display().to_string(), "", 0)]
    }

    async fn collect_artifacts(&self) -> HashMap<String, ArtifactDescriptor> {
        if self.rendered_rows.is_empty() {
            return HashMap::new();
        }
        let content_hash = elspeth_hash::stable_hash(&Value::Array(self.rendered_rows.clone()))
            .unwrap_or_default();
        let descriptor = self.collect_artifact(content_hash);
        HashMap::from([(self.name.clone(), descriptor)])
    }

    fn validate_output_target(&self) -> OutputTargetValidation {
        if matches!(self.header_mode, HeaderMode::Original) && self.resume_field_resolution.is_none() {
            return OutputTargetValidation::invalid(
                "headers: original requires a field resolution mapping before validation",
            );
        }
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
                OutputTargetValidation::invalid(format!("parent directory {} does not exist", parent.display()))
            }
            _ => OutputTargetValidation::ok(),
        }
    }
}

impl FileSink {
    /// The artifact descriptor for everything written so far, to be
    /// collected once the sink is done.
    pub fn collect_artifact(&self, content_hash: impl Into<String>) -> ArtifactDescriptor {
        ArtifactDescriptor::for_file(self.name.clone(), &self.path.display().to_string(), content_hash, self.bytes_written)
    }

    /// How many rows this sink has written so far.
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }
}

/// Posts each emitted batch as a JSON array to a webhook endpoint,
/// through the audited HTTP client so deliveries are recorded and
/// SSRF-guarded like any other outbound call.
pub struct WebhookSink {
    name: String,
    url: SanitizedWebhookUrl,
    client: Arc<AuditedHttpClient>,
    state_id: elspeth_core::ids::StateId,
    last_delivery: Mutex<Option<WebhookDelivery>>,
}

struct WebhookDelivery {
    content_hash: String,
    request_size: u64,
    response_code: u16,
}

impl WebhookSink {
    /// Build a sink posting batches to `url` through `client`, recording
    /// calls under `state_id` and declaring `name` as the artifact it
    /// produces.
    pub fn new(
        name: impl Into<String>,
        url: SanitizedWebhookUrl,
        client: Arc<AuditedHttpClient>,
        state_id: elspeth_core::ids::StateId,
    ) -> Self {
        Self {
            name: name.into(),
            url,
            client,
            state_id,
            last_delivery: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Sink for WebhookSink {
    async fn write(&mut self, rows: &[PipelineRow], ctx: &PluginContext) -> elspeth_core::error::Result<()> {
        let batch = Value::Array(rows.iter().map(PipelineRow::to_dict).map(Value::Object).collect());
        let mut scoped_ctx = ctx.clone();
        scoped_ctx.state_id = Some(self.state_id.clone());
        let request_size = serde_json::to_vec(&batch).map(|bytes| bytes.len() as u64).unwrap_or(0);
        let content_hash = elspeth_hash::stable_hash(&batch).unwrap_or_default();
        let response = self
            .client
            .request(&scoped_ctx, reqwest::Method::POST, self.url.sanitized_url(), Some(&batch))
            .await
            .map_err(|err| elspeth_core::error::Error::InvalidResult(err.to_string()))?;
        *self.last_delivery.lock().await = Some(WebhookDelivery {
            content_hash,
            request_size,
            response_code: response.status,
        });
        Ok(())
    }

    fn produces(&self) -> Vec<ArtifactDescriptor> {
        vec![ArtifactDescriptor::for_webhook(self.name.clone(), &self.url, "", 0, 0)]
    }

    async fn collect_artifacts(&self) -> HashMap<String, ArtifactDescriptor> {
        match self.collect_artifact().await {
            Some(descriptor) => HashMap::from([(self.name.clone(), descriptor)]),
            None => HashMap::new(),
        }
    }

    fn validate_output_target(&self) -> OutputTargetValidation {
        OutputTargetValidation::ok()
    }
}

impl WebhookSink {
    /// The artifact descriptor for the most recent delivery, if any write
    /// has happened yet.
    pub async fn collect_artifact(&self) -> Option<ArtifactDescriptor> {
        let delivery = self.last_delivery.lock().await;
        let delivery = delivery.as_ref()?;
        Some(ArtifactDescriptor::for_webhook(
            self.name.clone(),
            &self.url,
            delivery.content_hash.clone(),
            delivery.request_size,
            delivery.response_code,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use elspeth_core::contract::{FieldContract, FieldSource, FieldType, SchemaContract, SchemaMode};
    use elspeth_core::ids::RunId;
    use elspeth_core::row::{coerce_row, Tier3Row};
    use std::collections::BTreeMap;

    fn sample_row() -> PipelineRow {
        let contract = Arc::new(SchemaContract::new(
            SchemaMode::Flexible,
            vec![FieldContract {
                normalized_name: "id".to_string(),
                original_name: "id".to_string(),
                field_type: FieldType::Int,
                required: true,
                source: FieldSource::Declared,
            }],
        ));
        let raw = Tier3Row::new(BTreeMap::from([("id".to_string(), serde_json::json!(1))]));
        coerce_row(&raw, &contract).unwrap()
    }

    #[tokio::test]
    async fn file_sink_writes_jsonl_and_reports_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let mut sink = FileSink::new("results", &path, HeaderMode::Normalized);
        let ctx = PluginContext::bare(RunId::generate(), serde_json::json!({}));
        sink.on_start(&ctx).await.unwrap();
        sink.write(&[sample_row()], &ctx).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("\"id\":1"));
        let descriptor = sink.collect_artifact("fakehash");
        assert_eq!(descriptor.artifact_type, ArtifactType::File);
        assert_eq!(descriptor.name, "results");
        assert!(descriptor.size_bytes > 0);

        let collected = sink.collect_artifacts().await;
        assert_eq!(collected.len(), 1);
        assert!(collected.contains_key("results"));
    }

    #[test]
    fn original_headers_without_resolution_fails_validation() {
        let sink = FileSink::new("results", "/tmp/whatever.jsonl", HeaderMode::Original);
        let validation = sink.validate_output_target();
        assert!(!validation.valid);
    }
}
