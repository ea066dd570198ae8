//! Built-in job handlers.

use async_trait::async_trait;
use log::info;
use serde_json::{json, Map, Value};

use super::job::{Job, JobTarget};
use super::pipeline::{HandlerResult, JobHandler};
use crate::error::CmsError;
use crate::query::QueryEngine;

/// Action name of [`TranslationJob`].
pub const TRANSLATION_ACTION: &str = "create-translation";

/// Duplicates the target record into another language.
///
/// Payload: `{"language": "<code>", "values": {...}}`, where `values` is
/// optional and overrides translatable fields of the copy.
pub struct TranslationJob {
    engine: QueryEngine,
}

impl TranslationJob {
    pub fn new(engine: QueryEngine) -> Self {
        Self { engine }
    }

    /// Target and payload for translating `record_id` into `language`.
    pub fn request(
        collection: impl Into<String>,
        record_id: u64,
        language: &str,
        values: Map<String, Value>,
    ) -> (JobTarget, Value) {
        (
            JobTarget::record(collection, record_id),
            json!({ "language": language, "values": values }),
        )
    }
}

struct TranslationRequest<'a> {
    collection: &'a str,
    record_id: u64,
    language: &'a str,
    values: Map<String, Value>,
}

fn parse_request(job: &Job) -> Result<TranslationRequest<'_>, CmsError> {
    let (Some(collection), Some(record_id)) = (job.target_collection.as_deref(), job.target_record_id) else {
        return Err(CmsError::InvalidQuery(
            "translation job needs a target collection and record".to_string(),
        ));
    };
    let language = job
        .payload_field("language")
        .and_then(Value::as_str)
        .filter(|language| !language.is_empty())
        .ok_or_else(|| CmsError::InvalidQuery("translation job payload needs a 'language'".to_string()))?;
    let values = match job.payload_field("values") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(values)) => values.clone(),
        Some(_) => {
            return Err(CmsError::InvalidQuery(
                "translation job 'values' must be an object".to_string(),
            ))
        }
    };
    Ok(TranslationRequest {
        collection,
        record_id,
        language,
        values,
    })
}

#[async_trait]
impl JobHandler for TranslationJob {
    async fn before_process(&self, job: &Job) -> HandlerResult {
        let request = parse_request(job)?;
        let collection = self.engine.registry().collection(request.collection)?;
        if !collection.is_translatable() {
            return Err(CmsError::InvalidQuery(format!(
                "collection '{}' is not translatable",
                request.collection
            ))
            .into());
        }
        Ok(())
    }

    async fn callback(&self, job: &Job) -> HandlerResult {
        let request = parse_request(job)?;
        let record = self
            .engine
            .query(request.collection)
            .create_translation(request.record_id, request.language, request.values)?;
        info!(
            "Job {} translated record {} of '{}' into '{}' as {}",
            job.id, request.record_id, request.collection, request.language, record.id
        );
        Ok(())
    }
}
