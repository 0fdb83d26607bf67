//! Binary framing and JSON encoding shared by every wire type.
//!
//! A binary frame is a 4-byte big-endian body length followed by the
//! bincode body. Each framed type declares its own size cap, which is
//! enforced on both encode and decode. The JSON form is what clients of
//! the RPC gateway see: empty values are omitted and every field falls
//! back to its default when absent.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::CodecError;

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX: usize = 4;

/// Encode/decode capability implemented by every message-like type.
pub trait Frame: Serialize + DeserializeOwned {
    /// Largest body accepted for this type.
    const MAX_FRAME: usize;

    /// Serialize to a length-prefixed binary frame.
    fn to_frame(&self) -> Result<Vec<u8>, CodecError> {
        let body = bincode::serialize(self).map_err(|e| CodecError::Malformed(e.to_string()))?;
        if body.len() > Self::MAX_FRAME {
            return Err(CodecError::Oversize {
                size: body.len(),
                max: Self::MAX_FRAME,
            });
        }

        let mut frame = Vec::with_capacity(LENGTH_PREFIX + body.len());
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Deserialize from a length-prefixed binary frame.
    fn from_frame(data: &[u8]) -> Result<Self, CodecError> {
        let body = unframe(data, Self::MAX_FRAME)?;
        bincode::deserialize(body).map_err(|e| CodecError::Malformed(e.to_string()))
    }

    /// Serialize to JSON with empty values omitted.
    fn to_json(&self) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(&self.to_json_value()?)?)
    }

    /// Same as [`Frame::to_json`] but keeps the `serde_json::Value`, for
    /// embedding in RPC responses.
    fn to_json_value(&self) -> Result<Value, CodecError> {
        let mut value = serde_json::to_value(self)?;
        prune_empty(&mut value);
        Ok(value)
    }

    /// Deserialize from JSON.
    fn from_json(data: &[u8]) -> Result<Self, CodecError> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Validate the length prefix and return the body slice.
pub fn unframe(data: &[u8], max: usize) -> Result<&[u8], CodecError> {
    if data.len() < LENGTH_PREFIX {
        return Err(CodecError::Truncated {
            expected: LENGTH_PREFIX,
            available: data.len(),
        });
    }

    let mut prefix = [0u8; LENGTH_PREFIX];
    prefix.copy_from_slice(&data[..LENGTH_PREFIX]);
    let len = u32::from_be_bytes(prefix) as usize;
    if len > max {
        return Err(CodecError::Oversize { size: len, max });
    }

    let body = &data[LENGTH_PREFIX..];
    if body.len() < len {
        return Err(CodecError::Truncated {
            expected: len,
            available: body.len(),
        });
    }
    if body.len() > len {
        return Err(CodecError::Malformed(format!(
            "{} trailing bytes after frame",
            body.len() - len
        )));
    }
    Ok(body)
}

/// Keys that stay in the JSON output even when their value is empty.
const ALWAYS_KEPT: &[&str] = &["type"];

/// Drop nulls, empty strings, zero numbers and empty containers from JSON
/// objects. Array elements are pruned internally but never removed, so
/// positions are preserved.
fn prune_empty(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for child in map.values_mut() {
                prune_empty(child);
            }
            map.retain(|key, child| ALWAYS_KEPT.contains(&key.as_str()) || !is_empty(child));
        }
        Value::Array(items) => items.iter_mut().for_each(prune_empty),
        _ => {}
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize, Default)]
    #[serde(default)]
    struct Probe {
        name: String,
        count: u32,
        tags: Vec<String>,
    }

    impl Frame for Probe {
        const MAX_FRAME: usize = 64;
    }

    #[test]
    fn test_frame_prefix_records_body_length() {
        let probe = Probe {
            name: "x".into(),
            count: 3,
            tags: vec![],
        };
        let frame = probe.to_frame().unwrap();
        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(len, frame.len() - LENGTH_PREFIX);
        assert_eq!(Probe::from_frame(&frame).unwrap(), probe);
    }

    #[test]
    fn test_encode_rejects_oversize() {
        let probe = Probe {
            name: "y".repeat(100),
            ..Default::default()
        };
        assert!(matches!(
            probe.to_frame(),
            Err(CodecError::Oversize { max: 64, .. })
        ));
    }

    #[test]
    fn test_decode_distinguishes_truncated_from_malformed() {
        let frame = Probe::default().to_frame().unwrap();

        let short = &frame[..frame.len() - 1];
        assert!(matches!(
            Probe::from_frame(short),
            Err(CodecError::Truncated { .. })
        ));
        assert!(matches!(
            Probe::from_frame(&[0, 0]),
            Err(CodecError::Truncated { .. })
        ));

        let mut garbage = vec![0, 0, 0, 2];
        garbage.extend_from_slice(&[0xff, 0xff]);
        assert!(matches!(
            Probe::from_frame(&garbage),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_rejects_declared_oversize() {
        let frame = [0u8, 0, 1, 0];
        assert!(matches!(
            Probe::from_frame(&frame),
            Err(CodecError::Oversize { size: 256, .. })
        ));
    }

    #[test]
    fn test_json_omits_empty_values() {
        let json = Probe::default().to_json().unwrap();
        assert_eq!(json, b"{}");

        let back = Probe::from_json(&json).unwrap();
        assert_eq!(back, Probe::default());
    }
}
