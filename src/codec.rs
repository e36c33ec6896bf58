// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Typed views over opaque payloads.
//!
//! The cache and ledger only ever see `serde_json::Value`. An [`Encoder`]
//! turns a caller type into that representation and a [`Decoder`] turns it
//! back, so feature code keeps its own types while the storage layer stays
//! schema-agnostic. Read-only types only need a decoder.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Converts a caller type into the opaque payload.
pub trait Encoder<T: ?Sized>: Send + Sync {
    fn encode(&self, value: &T) -> Result<Value, serde_json::Error>;
}

/// Converts the opaque payload back into a caller type.
pub trait Decoder<T>: Send + Sync {
    fn decode(&self, payload: &Value) -> Result<T, serde_json::Error>;
}

/// Both directions. Implemented for anything that is an encoder and a decoder.
pub trait Codec<T>: Encoder<T> + Decoder<T> {}

impl<T, C: Encoder<T> + Decoder<T>> Codec<T> for C {}

/// The serde-backed codec used by the typed convenience methods.
pub struct JsonCodec<T: ?Sized>(PhantomData<fn() -> PhantomData<T>>);

impl<T: ?Sized> JsonCodec<T> {
    #[must_use]
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T: ?Sized> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T: Serialize + ?Sized> Encoder<T> for JsonCodec<T> {
    fn encode(&self, value: &T) -> Result<Value, serde_json::Error> {
        serde_json::to_value(value)
    }
}

impl<T: DeserializeOwned> Decoder<T> for JsonCodec<T> {
    fn decode(&self, payload: &Value) -> Result<T, serde_json::Error> {
        T::deserialize(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Job {
        id: u32,
        title: String,
    }

    #[test]
    fn test_json_codec_roundtrip() {
        let codec = JsonCodec::<Job>::new();
        let job = Job { id: 1, title: "Pull cable".into() };

        let payload = codec.encode(&job).unwrap();
        assert_eq!(payload, json!({"id": 1, "title": "Pull cable"}));
        assert_eq!(codec.decode(&payload).unwrap(), job);
    }

    #[test]
    fn test_json_codec_rejects_wrong_shape() {
        let codec = JsonCodec::<Job>::new();
        assert!(codec.decode(&json!({"id": "one"})).is_err());
    }

    #[derive(Debug, Deserialize)]
    struct ReadOnlyJob {
        title: String,
    }

    fn decode_with<T, D: Decoder<T>>(decoder: &D, payload: &Value) -> Result<T, serde_json::Error> {
        decoder.decode(payload)
    }

    #[test]
    fn test_decode_only_type_needs_no_serialize() {
        let job: ReadOnlyJob = decode_with(&JsonCodec::<ReadOnlyJob>::new(), &json!({"title": "Trench"})).unwrap();
        assert_eq!(job.title, "Trench");
    }

    #[test]
    fn test_encode_unsized_value() {
        let codec = JsonCodec::<str>::new();
        assert_eq!(codec.encode("panel").unwrap(), json!("panel"));
    }
}
