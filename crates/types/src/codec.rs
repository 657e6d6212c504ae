//! Centralized serialization and deserialization functions.
//!
//! Persisted checkpoint records are encoded with postcard through this module
//! so that every storage backend agrees on the byte format.

use serde::{Serialize, de::DeserializeOwned};
use snafu::Snafu;

/// Error type for codec operations.
#[derive(Debug, Snafu)]
pub enum CodecError {
    /// Encoding failed.
    #[snafu(display("Encoding failed: {source}"))]
    Encode {
        /// The underlying postcard error.
        source: postcard::Error,
    },

    /// Decoding failed.
    #[snafu(display("Decoding failed: {source}"))]
    Decode {
        /// The underlying postcard error.
        source: postcard::Error,
    },
}

/// Encodes a value to bytes using postcard serialization.
///
/// # Errors
///
/// Returns `CodecError::Encode` if serialization fails.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(value).map_err(|source| CodecError::Encode { source })
}

/// Decodes bytes to a value using postcard deserialization.
///
/// # Errors
///
/// Returns `CodecError::Decode` if deserialization fails.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    postcard::from_bytes(bytes).map_err(|source| CodecError::Decode { source })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::{
        checkpoint::{CheckpointRequest, CheckpointRequestState, CheckpointRequestType, CheckpointType},
        types::{BlockRange, CheckpointRequestId},
    };

    #[test]
    fn test_checkpoint_request_survives_codec() {
        let mut request = CheckpointRequest::received(
            CheckpointRequestId::new(17),
            "nightly-2024-05-01",
            Utc.with_ymd_and_hms(2024, 5, 1, 3, 0, 0).unwrap(),
            CheckpointRequestType::DeleteData,
            CheckpointType::Light,
        );
        request.state = CheckpointRequestState::Saved;

        let bytes = encode(&request).expect("encode request");
        let decoded: CheckpointRequest = decode(&bytes).expect("decode request");
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_block_range_survives_codec() {
        let range = BlockRange::new(4096, 8192).unwrap();
        let decoded: BlockRange = decode(&encode(&range).unwrap()).unwrap();
        assert_eq!(decoded, range);
    }

    #[test]
    fn test_decode_truncated_input() {
        let request = CheckpointRequest::received(
            CheckpointRequestId::new(1),
            "c",
            Utc::now(),
            CheckpointRequestType::Create,
            CheckpointType::Normal,
        );
        let bytes = encode(&request).unwrap();
        let result: Result<CheckpointRequest, _> = decode(&bytes[..bytes.len() / 2]);
        assert!(matches!(result, Err(CodecError::Decode { .. })));
    }

    #[test]
    fn test_decode_empty_input() {
        let result: Result<CheckpointRequest, _> = decode(&[]);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().starts_with("Decoding failed"));
    }
}
