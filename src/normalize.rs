//! Record normalizer
//!
//! Stateless mapping from a raw API object onto a [`Record`], driven by the
//! endpoint's [`RecordFields`]. Output depends only on the inputs, so
//! normalizing the same payload twice yields identical records.

use crate::config::{DisplayNameRule, EndpointSpec, RecordFields};
use crate::{Record, ResourceId};
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Normalization errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    /// Payload lacks the declared ID or display-name fields
    #[error("malformed {endpoint} record: {reason}")]
    MalformedRecord {
        /// Endpoint name
        endpoint: String,
        /// What was missing
        reason: String,
    },
}

/// Stateless normalizer
pub struct Normalizer;

impl Normalizer {
    /// Map `raw` from `spec` onto a [`Record`]
    ///
    /// # Errors
    /// Returns [`NormalizeError::MalformedRecord`] when the declared ID path or
    /// display-name paths are absent or blank.
    pub fn normalize(
        raw: &Value,
        spec: &EndpointSpec,
        resource_id: Option<&ResourceId>,
    ) -> Result<Record, NormalizeError> {
        let fields = &spec.fields;
        let malformed = |reason: String| NormalizeError::MalformedRecord {
            endpoint: spec.name.clone(),
            reason,
        };

        let external_id = match &fields.id_path {
            Some(path) => scalar_at(raw, path)
                .ok_or_else(|| malformed(format!("no ID at '{path}'")))?,
            None => resource_id
                .map(|rid| rid.as_str().to_string())
                .unwrap_or_else(|| spec.name.clone()),
        };

        let display_name = Self::display_name(raw, fields, &external_id).map_err(malformed)?;

        Ok(Record {
            object_type: spec.name.clone(),
            external_id,
            display_name,
            payload: raw.clone(),
            created_at: fields.created_path.as_deref().and_then(|p| timestamp_at(raw, p)),
            updated_at: fields.updated_path.as_deref().and_then(|p| timestamp_at(raw, p)),
            parent_resource_id: resource_id.cloned(),
        })
    }

    /// Normalize a batch, splitting good records from failures
    pub fn normalize_all(
        raws: &[Value],
        spec: &EndpointSpec,
        resource_id: Option<&ResourceId>,
    ) -> (Vec<Record>, Vec<NormalizeError>) {
        let mut records = Vec::with_capacity(raws.len());
        let mut errors = Vec::new();
        for raw in raws {
            match Self::normalize(raw, spec, resource_id) {
                Ok(record) => records.push(record),
                Err(e) => errors.push(e),
            }
        }
        (records, errors)
    }

    fn display_name(raw: &Value, fields: &RecordFields, external_id: &str) -> Result<String, String> {
        match &fields.display_name {
            DisplayNameRule::ExternalId => Ok(external_id.to_string()),
            DisplayNameRule::First { paths } => paths
                .iter()
                .find_map(|path| scalar_at(raw, path))
                .ok_or_else(|| format!("no display name at any of {paths:?}")),
            DisplayNameRule::Join { paths, separator } => {
                let parts = paths
                    .iter()
                    .map(|path| scalar_at(raw, path).ok_or_else(|| format!("no display name part at '{path}'")))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(parts.join(separator))
            }
        }
    }
}

/// Value at a dotted path
pub fn value_at<'a>(raw: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(raw, |value, segment| value.get(segment))
}

/// Non-blank string or number at a dotted path, as a string
fn scalar_at(raw: &Value, path: &str) -> Option<String> {
    match value_at(raw, path)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn timestamp_at(raw: &Value, path: &str) -> Option<DateTime<Utc>> {
    let text = value_at(raw, path)?.as_str()?;
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}
