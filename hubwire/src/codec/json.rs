use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::value::RawValue;

use super::Codec;
use crate::{Message, error::Result};

/// JSON encoding. Arguments and results are kept as raw JSON fragments
/// until decoded, so routing never parses the payload.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    type Value = Box<RawValue>;

    fn name(&self) -> &'static str {
        "json"
    }

    fn streams_text(&self) -> bool {
        true
    }

    fn to_value<T: Serialize + ?Sized>(&self, value: &T) -> Result<Self::Value> {
        Ok(serde_json::value::to_raw_value(value)?)
    }

    fn from_value<T: DeserializeOwned>(&self, value: Option<&Self::Value>) -> Result<T> {
        Ok(serde_json::from_str(value.map_or("null", |v| v.get()))?)
    }

    fn encode(&self, msg: &Message<Self::Value>) -> Result<Bytes> {
        Ok(serde_json::to_vec(msg)?.into())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Message<Self::Value>> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
