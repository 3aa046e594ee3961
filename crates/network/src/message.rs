//! Typed messages exchanged between brokers

use bytes::Bytes;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::{NetworkError, NetworkResult};

/// A message that can travel over the network
pub trait NetworkMessage: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Routing key for the message
    fn message_type() -> &'static str;

    /// Encode as CBOR
    fn encode(&self) -> NetworkResult<Bytes> {
        let mut buffer = Vec::new();
        ciborium::into_writer(self, &mut buffer)
            .map_err(|e| NetworkError::Serialization(e.to_string()))?;
        Ok(Bytes::from(buffer))
    }

    /// Decode from CBOR
    fn decode(bytes: &[u8]) -> NetworkResult<Self> {
        ciborium::from_reader(bytes).map_err(|e| NetworkError::Serialization(e.to_string()))
    }
}

/// A request with a typed response
pub trait ServiceMessage: NetworkMessage {
    /// Response returned by the handling service
    type Response: NetworkMessage;
}

pub(crate) const RESPONSE_SUFFIX: &str = ".response";

/// Message type used for the response to `message_type`
///
/// Responses travel under their own type so that a node sending a request to
/// itself never mistakes the request for the response.
pub(crate) fn response_type(message_type: &str) -> String {
    format!("{message_type}{RESPONSE_SUFFIX}")
}

/// Frame carried in response envelopes
#[derive(Debug, Serialize, Deserialize)]
pub(crate) enum ResponseFrame {
    Ok(Bytes),
    NoHandler(String),
    Err(String),
}

impl ResponseFrame {
    pub(crate) fn encode(&self) -> NetworkResult<Bytes> {
        let mut buffer = Vec::new();
        ciborium::into_writer(self, &mut buffer)
            .map_err(|e| NetworkError::Serialization(e.to_string()))?;
        Ok(Bytes::from(buffer))
    }

    pub(crate) fn decode(bytes: &[u8]) -> NetworkResult<Self> {
        ciborium::from_reader(bytes).map_err(|e| NetworkError::Serialization(e.to_string()))
    }
}
