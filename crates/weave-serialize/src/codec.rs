//! Custom-object envelopes.
//!
//! A custom value with a registered serializer is persisted as
//!
//! ```json
//! {"_type": "CustomWeaveType", "weave_type": {"type": "<serializer id>"},
//!  "files": {"obj": "<file digest>"}, "load_op": "<op ref uri>"}
//! ```
//!
//! or, for serializers with an inline codec,
//!
//! ```json
//! {"_type": "CustomWeaveType", "weave_type": {"type": "<serializer id>"},
//!  "load_op": null, "inline_data": ...}
//! ```
//!
//! This module does the local half of the work: running the serializer
//! against a staging artifact and back. Uploads and downloads live in
//! [`SerializeContext`](crate::SerializeContext).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use weave_types::{CustomValue, Op};

use crate::artifact::MemTraceFilesArtifact;
use crate::error::{SerializeError, SerializeResult};
use crate::registry::{SerializerRegistry, DEFAULT_FILE_NAME};

/// `_type` tag of a custom-object envelope.
pub const CUSTOM_TYPE_TAG: &str = "CustomWeaveType";

/// Names the serializer that produced an envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeaveTypeDescriptor {
    #[serde(rename = "type")]
    pub type_id: String,
}

/// Persisted form of a custom value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CustomEnvelope {
    #[serde(rename = "_type")]
    pub tag: String,
    pub weave_type: WeaveTypeDescriptor,
    /// File name to uploaded file digest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub load_op: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<JsonValue>,
}

impl CustomEnvelope {
    pub fn is_inline(&self) -> bool {
        self.inline_data.is_some()
    }
}

/// Output of running a serializer, before any upload.
#[derive(Debug)]
pub struct EncodedCustom {
    pub weave_type: WeaveTypeDescriptor,
    pub files: BTreeMap<String, Vec<u8>>,
    pub inline_data: Option<JsonValue>,
    /// Op that loads the files back; absent for inline payloads.
    pub load_op: Option<Op>,
}

/// Run the first matching serializer on `value`.
///
/// Returns `None` when no serializer matches. Inline codecs are preferred
/// over file output.
pub fn encode(registry: &SerializerRegistry, value: &CustomValue) -> SerializeResult<Option<EncodedCustom>> {
    let Some(serializer) = registry.find(value) else {
        return Ok(None);
    };
    let weave_type = WeaveTypeDescriptor {
        type_id: serializer.id().to_string(),
    };
    if let Some(inline) = serializer.inline() {
        let data = (inline.serialize)(value).map_err(|e| SerializeError::codec(serializer.id(), e))?;
        return Ok(Some(EncodedCustom {
            weave_type,
            files: BTreeMap::new(),
            inline_data: Some(data),
            load_op: None,
        }));
    }
    let mut artifact = MemTraceFilesArtifact::new();
    serializer
        .save(value, &mut artifact, DEFAULT_FILE_NAME)
        .map_err(|e| SerializeError::codec(serializer.id(), e))?;
    Ok(Some(EncodedCustom {
        weave_type,
        files: artifact.into_files(),
        inline_data: None,
        load_op: Some(serializer.load_op()),
    }))
}

/// Decode with a locally registered serializer.
///
/// Returns `None` when `weave_type` is not registered here, so the caller
/// can fall back to the envelope's load op.
pub fn decode(
    registry: &SerializerRegistry,
    weave_type: &WeaveTypeDescriptor,
    artifact: &MemTraceFilesArtifact,
    inline_data: Option<&JsonValue>,
) -> SerializeResult<Option<CustomValue>> {
    let Some(serializer) = registry.by_id(&weave_type.type_id) else {
        return Ok(None);
    };
    let codec_err = |e: anyhow::Error| SerializeError::codec(serializer.id(), e);
    let value = match (inline_data, serializer.inline()) {
        (Some(data), Some(inline)) => (inline.deserialize)(data).map_err(codec_err)?,
        (Some(_), None) => {
            return Err(SerializeError::codec(
                serializer.id(),
                "envelope has inline data but serializer has no inline codec",
            ))
        }
        (None, _) => serializer.load(artifact, DEFAULT_FILE_NAME).map_err(codec_err)?,
    };
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datetime::DATETIME_TYPE_ID;
    use crate::registry::Serializer;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[derive(Debug, PartialEq)]
    struct Blob(Vec<u8>);

    fn blob_registry() -> SerializerRegistry {
        let registry = SerializerRegistry::with_builtins();
        registry.register(Serializer::for_type::<Blob, _, _>(
            |value, artifact, name| {
                let blob = value
                    .downcast_ref::<Blob>()
                    .ok_or_else(|| anyhow::anyhow!("not a blob"))?;
                artifact.write(name, blob.0.clone());
                Ok(())
            },
            |artifact, name| {
                let bytes = artifact
                    .read(name)
                    .ok_or_else(|| anyhow::anyhow!("missing {name}"))?;
                Ok(CustomValue::new(Blob(bytes.to_vec())))
            },
        ));
        registry
    }

    #[test]
    fn inline_serializers_skip_files() {
        let registry = blob_registry();
        let dt = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let encoded = encode(&registry, &CustomValue::new(dt)).unwrap().unwrap();
        assert_eq!(encoded.weave_type.type_id, DATETIME_TYPE_ID);
        assert!(encoded.files.is_empty());
        assert!(encoded.load_op.is_none());
        assert!(encoded.inline_data.is_some());
    }

    #[test]
    fn file_serializers_round_trip() {
        let registry = blob_registry();
        let encoded = encode(&registry, &CustomValue::new(Blob(vec![1, 2, 3])))
            .unwrap()
            .unwrap();
        assert_eq!(encoded.files.get(DEFAULT_FILE_NAME), Some(&vec![1, 2, 3]));
        assert!(encoded.load_op.is_some());

        let artifact = MemTraceFilesArtifact::from_files(encoded.files);
        let back = decode(&registry, &encoded.weave_type, &artifact, None)
            .unwrap()
            .unwrap();
        assert_eq!(back.downcast_ref::<Blob>(), Some(&Blob(vec![1, 2, 3])));
    }

    #[test]
    fn unmatched_values_encode_to_nothing() {
        let registry = SerializerRegistry::new();
        assert!(encode(&registry, &CustomValue::new(5u64)).unwrap().is_none());
    }

    #[test]
    fn unknown_type_ids_decode_to_nothing() {
        let registry = SerializerRegistry::new();
        let descriptor = WeaveTypeDescriptor {
            type_id: "nobody.Knows".into(),
        };
        let res = decode(&registry, &descriptor, &MemTraceFilesArtifact::new(), None).unwrap();
        assert!(res.is_none());
    }

    #[test]
    fn envelope_wire_shape() {
        let env = CustomEnvelope {
            tag: CUSTOM_TYPE_TAG.into(),
            weave_type: WeaveTypeDescriptor {
                type_id: DATETIME_TYPE_ID.into(),
            },
            files: None,
            load_op: None,
            inline_data: Some(json!("2024-01-02T03:04:05+00:00")),
        };
        let wire = serde_json::to_value(&env).unwrap();
        assert_eq!(
            wire,
            json!({
                "_type": "CustomWeaveType",
                "weave_type": {"type": "datetime.datetime"},
                "load_op": null,
                "inline_data": "2024-01-02T03:04:05+00:00",
            })
        );
        let back: CustomEnvelope = serde_json::from_value(wire).unwrap();
        assert_eq!(back, env);
    }
}
