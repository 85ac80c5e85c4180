//! Value serializers.
//!
//! The cache stores opaque bytes; a [`Serializer`] turns values into those
//! bytes and back.

use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Error produced by a serializer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerializerError {
    Encode(String),
    Decode(String),
}

impl std::fmt::Display for SerializerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encode(msg) => write!(f, "could not encode value: {msg}"),
            Self::Decode(msg) => write!(f, "could not decode value: {msg}"),
        }
    }
}

impl std::error::Error for SerializerError {}

/// Converts values of type `V` to and from bytes.
pub trait Serializer<V> {
    fn write(&self, value: &V) -> Result<Vec<u8>, SerializerError>;

    fn read(&self, bytes: &[u8]) -> Result<V, SerializerError>;
}

/// Stores byte vectors as they are.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesSerializer;

impl Serializer<Vec<u8>> for BytesSerializer {
    fn write(&self, value: &Vec<u8>) -> Result<Vec<u8>, SerializerError> {
        Ok(value.clone())
    }

    fn read(&self, bytes: &[u8]) -> Result<Vec<u8>, SerializerError> {
        Ok(bytes.to_vec())
    }
}

/// Stores strings as UTF-8.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringSerializer;

impl Serializer<String> for StringSerializer {
    fn write(&self, value: &String) -> Result<Vec<u8>, SerializerError> {
        Ok(value.as_bytes().to_vec())
    }

    fn read(&self, bytes: &[u8]) -> Result<String, SerializerError> {
        String::from_utf8(bytes.to_vec()).map_err(|e| SerializerError::Decode(e.to_string()))
    }
}

/// Stores any serde type with bincode.
pub struct BincodeSerializer<V> {
    _value: PhantomData<fn() -> V>,
}

impl<V> BincodeSerializer<V> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _value: PhantomData,
        }
    }
}

impl<V> Default for BincodeSerializer<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> std::fmt::Debug for BincodeSerializer<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BincodeSerializer")
    }
}

impl<V: Serialize + DeserializeOwned> Serializer<V> for BincodeSerializer<V> {
    fn write(&self, value: &V) -> Result<Vec<u8>, SerializerError> {
        bincode::serialize(value).map_err(|e| SerializerError::Encode(e.to_string()))
    }

    fn read(&self, bytes: &[u8]) -> Result<V, SerializerError> {
        bincode::deserialize(bytes).map_err(|e| SerializerError::Decode(e.to_string()))
    }
}
