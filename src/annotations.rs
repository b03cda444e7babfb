//! Annotation extraction from the VMI descriptor.
//!
//! Only `metadata.annotations` is consumed; the rest of the descriptor is
//! skipped. A null or missing `metadata` or `annotations` reads as empty, and
//! a null annotation value reads as the empty string.

use std::collections::BTreeMap;

use facet_value::{VObject, Value};

use crate::error::HookError;

pub type Annotations = BTreeMap<String, String>;

fn decode_error(message: impl std::fmt::Display) -> HookError {
    HookError::DescriptorDecode {
        message: message.to_string(),
    }
}

/// Look up `key` as a nested object. Null and absent both yield `None`.
fn object_field<'a>(object: &'a VObject, key: &str) -> Result<Option<&'a VObject>, HookError> {
    match object.get(key) {
        None => Ok(None),
        Some(value) if value.is_null() => Ok(None),
        Some(value) => value
            .as_object()
            .map(Some)
            .ok_or_else(|| decode_error(format!("`{key}` is not a JSON object"))),
    }
}

/// Decode a VMI descriptor payload and return its annotation map.
pub fn extract_annotations(vmi: &[u8]) -> Result<Annotations, HookError> {
    let text = std::str::from_utf8(vmi).map_err(decode_error)?;
    let descriptor: Value = facet_json::from_str(text).map_err(decode_error)?;
    let descriptor = descriptor
        .as_object()
        .ok_or_else(|| decode_error("descriptor is not a JSON object"))?;

    let Some(metadata) = object_field(descriptor, "metadata")? else {
        return Ok(Annotations::new());
    };
    let Some(annotations) = object_field(metadata, "annotations")? else {
        return Ok(Annotations::new());
    };

    annotations
        .iter()
        .map(|(key, value)| {
            let value = if value.is_null() {
                String::new()
            } else {
                value
                    .as_string()
                    .map(|s| s.as_str().to_string())
                    .ok_or_else(|| {
                        decode_error(format!("annotation `{}` is not a string", key.as_str()))
                    })?
            };
            Ok((key.as_str().to_string(), value))
        })
        .collect()
}
