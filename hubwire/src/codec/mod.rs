//! Wire encodings.
//!
//! A [`Codec`] turns whole envelopes into bytes and back, and converts single
//! values to and from its deferred value type. Arguments travel as a list of
//! deferred values so the router can route a request without knowing the
//! parameter types of the target method.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    Message,
    error::{Error, ErrorKind, Result},
};

mod json;
pub use json::JsonCodec;

mod msgpack;
pub use msgpack::MessagePackCodec;

/// Serializer port used by the router, the client stubs and the skeletons.
pub trait Codec: Send + Sync + 'static {
    /// Encoded form of a single argument or result, decoded lazily.
    type Value: Serialize + DeserializeOwned + Clone + std::fmt::Debug + Send + Sync + 'static;

    fn name(&self) -> &'static str;

    /// Whether encoded frames are UTF-8 text rather than binary.
    fn streams_text(&self) -> bool;

    /// # Errors
    ///
    /// Returns an error if the value cannot be serialized.
    fn to_value<T: Serialize + ?Sized>(&self, value: &T) -> Result<Self::Value>;

    /// Decodes a value. An absent value decodes as null, so unit results
    /// and optional parameters can be omitted on the wire.
    ///
    /// # Errors
    ///
    /// Returns an error if the value does not match the requested type.
    fn from_value<T: DeserializeOwned>(&self, value: Option<&Self::Value>) -> Result<T>;

    /// # Errors
    ///
    /// Returns an error if the envelope cannot be serialized.
    fn encode(&self, msg: &Message<Self::Value>) -> Result<Bytes>;

    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid envelope.
    fn decode(&self, bytes: &[u8]) -> Result<Message<Self::Value>>;
}

/// Incremental container for the arguments of an outgoing request.
pub struct ArgWriter<C: Codec> {
    codec: Arc<C>,
    values: Vec<C::Value>,
}

impl<C: Codec> ArgWriter<C> {
    #[must_use]
    pub fn new(codec: Arc<C>) -> Self {
        Self {
            codec,
            values: Vec::new(),
        }
    }

    /// Appends the next argument in declaration order.
    ///
    /// # Errors
    ///
    /// Returns an error if the argument cannot be serialized.
    pub fn push<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<&mut Self> {
        self.values.push(self.codec.to_value(value)?);
        Ok(self)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn into_values(self) -> Vec<C::Value> {
        self.values
    }
}

/// Arguments of an inbound request, read back in declaration order.
pub struct Arguments<C: Codec> {
    codec: Arc<C>,
    values: std::vec::IntoIter<C::Value>,
    position: usize,
}

impl<C: Codec> Arguments<C> {
    #[must_use]
    pub fn new(codec: Arc<C>, values: Vec<C::Value>) -> Self {
        Self {
            codec,
            values: values.into_iter(),
            position: 0,
        }
    }

    /// Decodes the next argument.
    ///
    /// # Errors
    ///
    /// Returns an error if no argument is left or if it does not match `T`.
    pub fn next<T: DeserializeOwned>(&mut self) -> Result<T> {
        let position = self.position;
        self.position += 1;
        let Some(value) = self.values.next() else {
            return Err(Error::new(
                ErrorKind::ArgumentCountMismatch,
                format!("missing argument at position {position}"),
            ));
        };
        self.codec.from_value(Some(&value)).map_err(|e| {
            Error::new(
                ErrorKind::DeserializeFailed,
                format!("argument {position}: {}", e.msg),
            )
        })
    }

    /// Number of arguments not consumed yet.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.values.len()
    }

    /// Encodes a return value with the same codec.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be serialized.
    pub fn reply<T: Serialize + ?Sized>(&self, value: &T) -> Result<C::Value> {
        self.codec.to_value(value)
    }
}
