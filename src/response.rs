//! Response decoder (spec §4.5, component G). A `Response` is the
//! canonical shape every client sends back for a completed call: an inline
//! JSON payload, a pointer to an out-of-band blob, an explicit null, or an
//! error. Field names are matched case-insensitively on the wire, since
//! peers are free-form clients, not generated from this crate's types.

use std::collections::HashMap;

use serde::de::{DeserializeOwned, Error as DeError, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::blob::BlobStore;
use crate::error::{HubError, HubResult};

/// The decoded shape of a completed call (spec §4.5).
#[derive(Debug, Clone)]
pub enum Response {
    /// Payload small enough to travel inline in the frame.
    Inline(Value),
    /// Payload too large to inline; fetch it from the blob store.
    Blob { path: String },
    /// An explicit, intentional "no value".
    Null,
    /// The client reported a failure instead of a result.
    Error { message: String },
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            message: message.into(),
        }
    }
}

impl Serialize for Response {
    fn serialize<S: Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(None)?;
        match self {
            Response::Inline(value) => {
                map.serialize_entry("ResponseType", "JsonObject")?;
                map.serialize_entry("JsonData", value)?;
            }
            Response::Blob { path } => {
                map.serialize_entry("ResponseType", "FilePath")?;
                map.serialize_entry("FilePath", path)?;
            }
            Response::Null => {
                map.serialize_entry("ResponseType", "Null")?;
            }
            Response::Error { message } => {
                map.serialize_entry("ResponseType", "Error")?;
                map.serialize_entry("ErrorMessage", message)?;
            }
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Response {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Self, D::Error> {
        struct EnvelopeVisitor;

        impl<'de> Visitor<'de> for EnvelopeVisitor {
            type Value = Response;

            fn expecting(
                &self,
                f: &mut std::fmt::Formatter<'_>,
            ) -> std::fmt::Result {
                f.write_str("a response envelope object")
            }

            fn visit_map<A>(
                self,
                mut map: A,
            ) -> Result<Self::Value, A::Error>
            where
                A: serde::de::MapAccess<'de>,
            {
                let mut raw: HashMap<String, Value> = HashMap::new();
                while let Some((key, value)) =
                    map.next_entry::<String, Value>()?
                {
                    raw.insert(key, value);
                }
                response_from_map(raw).map_err(A::Error::custom)
            }
        }

        deserializer.deserialize_map(EnvelopeVisitor)
    }
}

pub(crate) fn field_ci<'a>(
    raw: &'a HashMap<String, Value>,
    name: &str,
) -> Option<&'a Value> {
    raw.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v)
}

pub(crate) fn response_from_map(
    raw: HashMap<String, Value>,
) -> Result<Response, String> {
    let kind = field_ci(&raw, "ResponseType")
        .and_then(Value::as_str)
        .ok_or("missing ResponseType field")?
        .to_ascii_lowercase();

    match kind.as_str() {
        "jsonobject" | "inline" | "json" => {
            let data = field_ci(&raw, "JsonData").cloned().unwrap_or(Value::Null);
            Ok(Response::Inline(data))
        }
        "filepath" | "blob" => {
            let path = field_ci(&raw, "FilePath")
                .and_then(Value::as_str)
                .ok_or("FilePath response missing FilePath field")?;
            Ok(Response::Blob {
                path: path.to_string(),
            })
        }
        "null" => Ok(Response::Null),
        "error" => {
            let message = field_ci(&raw, "ErrorMessage")
                .and_then(Value::as_str)
                .unwrap_or_default();
            Ok(Response::Error {
                message: message.to_string(),
            })
        }
        other => Err(format!("unrecognized ResponseType: {other}")),
    }
}

/// A `serde::Deserializer` over a JSON object whose keys are remapped to the
/// target struct's field names case-insensitively before being handed to
/// `serde_json`'s own deserializer. Peers send `UserId`, `userId`, `user_id`
/// or `USERID` interchangeably; this makes all of them land on whatever
/// casing the Rust struct actually declares.
struct CaseInsensitiveDeserializer(Value);

fn remap_object_keys(value: Value, fields: &[&str]) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, v) in map {
                let renamed = fields
                    .iter()
                    .find(|f| f.eq_ignore_ascii_case(&key))
                    .map(|f| f.to_string())
                    .unwrap_or(key);
                out.insert(renamed, v);
            }
            Value::Object(out)
        }
        other => other,
    }
}

impl<'de> Deserializer<'de> for CaseInsensitiveDeserializer {
    type Error = serde_json::Error;

    fn deserialize_struct<V>(
        self,
        name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        remap_object_keys(self.0, fields).deserialize_struct(
            name, fields, visitor,
        )
    }

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        self.0.deserialize_any(visitor)
    }

    serde::forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf option unit unit_struct newtype_struct seq tuple
        tuple_struct map enum identifier ignored_any
    }
}

/// Inline payloads may arrive already-structured, or as a JSON string that
/// itself embeds JSON (a client that serialized its result twice). One
/// unwrap pass handles the common case without looping indefinitely.
fn normalize_inline_payload(value: Value) -> Value {
    if let Value::String(s) = &value {
        if let Ok(inner) = serde_json::from_str::<Value>(s) {
            return inner;
        }
    }
    value
}

fn decode_value<T: DeserializeOwned>(payload: Value) -> HubResult<T> {
    let payload = normalize_inline_payload(payload);
    T::deserialize(CaseInsensitiveDeserializer(payload))
        .map_err(|e| HubError::DecodeFailed(e.to_string()))
}

/// Decodes a completed call's [`Response`] into the caller's expected type
/// (spec §4.5). An `Error` envelope is surfaced as `Err` rather than a
/// null sentinel value — the idiomatic Rust equivalent of "returns null but
/// logs the failure" for a typed caller; callers that want the raw envelope
/// (including `Error`) should match on [`Response`] directly instead of
/// calling this.
pub async fn decode<T: DeserializeOwned>(
    response: Response,
    blob_store: &dyn BlobStore,
    temp_folder: &str,
    auto_delete_temp_files: bool,
) -> HubResult<T> {
    match response {
        Response::Null => serde_json::from_value(Value::Null)
            .map_err(|e| HubError::DecodeFailed(e.to_string())),
        Response::Error { message } => {
            tracing::error!(error = %message, "client call returned an error");
            Err(HubError::ClientError(message))
        }
        Response::Inline(payload) => decode_value(payload),
        Response::Blob { path } => {
            let bytes = blob_store
                .read(&path)
                .await
                .map_err(|_| HubError::BlobMissing { path: path.clone() })?;
            let value: Value = serde_json::from_slice(&bytes)
                .map_err(|e| HubError::DecodeFailed(e.to_string()))?;
            let decoded = decode_value(value)?;

            if auto_delete_temp_files && path.starts_with(temp_folder) {
                if let Err(e) = blob_store.delete(&path).await {
                    tracing::warn!(
                        path,
                        error = %e,
                        "failed to delete temp blob after read"
                    );
                }
            }
            Ok(decoded)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Payload {
        user_id: String,
        count: i32,
    }

    #[test]
    fn decodes_inline_envelope_with_mismatched_casing() {
        let json = serde_json::json!({
            "ResponseType": "JsonObject",
            "JsonData": { "UserId": "u1", "Count": 3 },
        });
        let response: Response = serde_json::from_value(json).unwrap();
        match response {
            Response::Inline(value) => {
                let payload: Payload = decode_value(value).unwrap();
                assert_eq!(
                    payload,
                    Payload {
                        user_id: "u1".into(),
                        count: 3,
                    }
                );
            }
            other => panic!("expected Inline, got {other:?}"),
        }
    }

    #[test]
    fn decodes_doubly_encoded_string_payload() {
        let json = serde_json::json!({
            "responsetype": "jsonobject",
            "jsondata": "{\"user_id\":\"u2\",\"count\":7}",
        });
        let response: Response = serde_json::from_value(json).unwrap();
        match response {
            Response::Inline(value) => {
                let payload: Payload = decode_value(value).unwrap();
                assert_eq!(payload.user_id, "u2");
                assert_eq!(payload.count, 7);
            }
            other => panic!("expected Inline, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_response_type() {
        let json = serde_json::json!({ "ResponseType": "Weird" });
        let result: Result<Response, _> = serde_json::from_value(json);
        assert!(result.is_err());
    }
}
