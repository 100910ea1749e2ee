//! Encode/decode [`WireMessage`] to/from bytes.
//!
//! Per spec.md §4.2: "an implementation may use a self-describing format
//! (tagged JSON with a type-name field) or a binary equivalent; the contract
//! is that the decoded value can be reliably discriminated by concrete kind
//! at the receiver." We use tagged JSON, matching the teacher's pervasive use
//! of `serde_json` for wire and storage payloads.

use crate::error::CodecError;
use crate::message::WireMessage;

pub fn encode(message: &WireMessage) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(message)?)
}

pub fn decode(bytes: &[u8]) -> Result<WireMessage, CodecError> {
    serde_json::from_slice(bytes).map_err(CodecError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;
    use crate::message::DetectorMessage;
    use uuid::Uuid;

    #[test]
    fn round_trips_detector_message_with_kind_preserved() {
        let msg = WireMessage::Detector(DetectorMessage::Ping {
            message_id: Uuid::new_v4(),
            from: Endpoint::new("127.0.0.1", 9000),
        });
        let bytes = encode(&msg).unwrap();
        let decoded = decode(&bytes).unwrap();
        match decoded {
            WireMessage::Detector(DetectorMessage::Ping { from, .. }) => {
                assert_eq!(from, Endpoint::new("127.0.0.1", 9000));
            }
            other => panic!("expected Ping, got {:?}", other),
        }
    }

    #[test]
    fn decode_failure_is_an_error_not_a_panic() {
        assert!(decode(b"not json").is_err());
    }
}
