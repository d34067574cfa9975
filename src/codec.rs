//! Payload codecs for the text and JSON message variants
//!
//! Absent and empty values map to the empty payload, and an empty payload
//! decodes back to `""` or `null`.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Decode a payload as UTF-8 text (lossy)
pub fn load_text(data: &[u8]) -> String {
    if data.is_empty() {
        return String::new();
    }
    String::from_utf8_lossy(data).into_owned()
}

/// Encode optional text; `None` and `""` both become the empty payload
pub fn dump_text(data: Option<&str>) -> Bytes {
    match data {
        Some(text) if !text.is_empty() => Bytes::copy_from_slice(text.as_bytes()),
        _ => Bytes::new(),
    }
}

/// Decode a payload as JSON; empty payloads decode to `null`
pub fn load_json(data: &[u8]) -> Result<Value, serde_json::Error> {
    if data.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(data)
}

/// Decode a payload straight into a typed value
pub fn load_json_as<T: DeserializeOwned>(data: &[u8]) -> Result<T, serde_json::Error> {
    serde_json::from_value(load_json(data)?)
}

/// Encode an optional value as JSON; `None` becomes the empty payload
pub fn dump_json<T: Serialize + ?Sized>(data: Option<&T>) -> Result<Bytes, serde_json::Error> {
    match data {
        Some(value) => Ok(Bytes::from(serde_json::to_vec(value)?)),
        None => Ok(Bytes::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_empty_cases() {
        assert_eq!(load_text(b""), "");
        assert!(dump_text(None).is_empty());
        assert!(dump_text(Some("")).is_empty());
    }

    #[test]
    fn test_text_encodes_utf8() {
        assert_eq!(dump_text(Some("hello")), Bytes::from_static(b"hello"));
        assert_eq!(load_text("héllo".as_bytes()), "héllo");
    }

    #[test]
    fn test_text_decode_is_lossy() {
        assert_eq!(load_text(&[0x66, 0xff, 0x6f]), "f\u{fffd}o");
    }

    #[test]
    fn test_json_empty_cases() {
        assert_eq!(load_json(b"").unwrap(), Value::Null);
        assert!(dump_json::<Value>(None).unwrap().is_empty());
    }

    #[test]
    fn test_json_encode_decode() {
        let payload = dump_json(Some(&json!({"a": 1, "b": [true]}))).unwrap();
        assert_eq!(load_json(&payload).unwrap(), json!({"a": 1, "b": [true]}));
    }

    #[test]
    fn test_json_invalid_payload() {
        assert!(load_json(b"{not json").is_err());
    }

    #[test]
    fn test_load_json_as_typed() {
        #[derive(serde::Deserialize, PartialEq, Debug)]
        struct Ping {
            seq: u32,
        }
        let ping: Ping = load_json_as(br#"{"seq":7}"#).unwrap();
        assert_eq!(ping, Ping { seq: 7 });
    }
}
