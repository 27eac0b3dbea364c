use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};

use super::Codec;
use crate::{Message, error::Result};

/// The MessagePack encoding of nil, used for absent values.
const NIL: &[u8] = &[0xc0];

/// MessagePack encoding. Each argument and result is an independently encoded
/// MessagePack blob embedded as binary in the envelope.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessagePackCodec;

impl Codec for MessagePackCodec {
    type Value = Bytes;

    fn name(&self) -> &'static str {
        "msgpack"
    }

    fn streams_text(&self) -> bool {
        false
    }

    fn to_value<T: Serialize + ?Sized>(&self, value: &T) -> Result<Self::Value> {
        Ok(rmp_serde::to_vec_named(value)?.into())
    }

    fn from_value<T: DeserializeOwned>(&self, value: Option<&Self::Value>) -> Result<T> {
        Ok(rmp_serde::from_slice(value.map_or(NIL, |v| &v[..]))?)
    }

    fn encode(&self, msg: &Message<Self::Value>) -> Result<Bytes> {
        Ok(rmp_serde::to_vec_named(msg)?.into())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Message<Self::Value>> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessageKind;

    #[test]
    fn test_msgpack_envelope() {
        let codec = MessagePackCodec;
        let args = vec![codec.to_value("alice").unwrap()];
        let mut msg = Message::request("Echo", "echo", args);
        msg.id = "E".into();

        let bytes = codec.encode(&msg).unwrap();
        let decoded = codec.decode(&bytes).unwrap();
        assert_eq!(decoded.kind(), MessageKind::Request);
        assert_eq!(decoded.hub, "Echo");
        assert_eq!(decoded.id, "E");
        let args = decoded.arguments.unwrap();
        assert_eq!(codec.from_value::<String>(args.first()).unwrap(), "alice");
    }

    #[test]
    fn test_absent_value_is_nil() {
        let codec = MessagePackCodec;
        codec.from_value::<()>(None).unwrap();
        assert_eq!(codec.from_value::<Option<u32>>(None).unwrap(), None);
    }
}
