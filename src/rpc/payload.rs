use anyhow::anyhow;
use bytes::Bytes;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum PayloadKind {
    Request = 0,
    /// fire-and-forget, no response expected
    Command = 1,
    Response = 2,
}

/// The RPC envelope carried in the body of a Data block
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Payload {
    pub kind: PayloadKind,
    pub name: String,
    /// correlates requests and responses, 0 for commands
    pub id: u32,
    pub data: Bytes,
    /// empty for success
    pub error: String,
}
impl Payload {
    pub fn command(name: &str, data: impl Into<Bytes>) -> Payload {
        Payload {
            kind: PayloadKind::Command,
            name: name.to_string(),
            id: 0,
            data: data.into(),
            error: String::new(),
        }
    }

    pub fn request(name: &str, id: u32, data: impl Into<Bytes>) -> Payload {
        Payload {
            kind: PayloadKind::Request,
            name: name.to_string(),
            id,
            data: data.into(),
            error: String::new(),
        }
    }

    /// a response to `request`, echoing its id and name
    pub fn response_to(request: &Payload, error: &str, data: impl Into<Bytes>) -> Payload {
        Payload {
            kind: PayloadKind::Response,
            name: request.name.clone(),
            id: request.id,
            data: data.into(),
            error: error.to_string(),
        }
    }

    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }
}

/// Turns payloads into bytes and back. The wire representation is up to the implementation, but
///  all fields must survive the round trip.
pub trait Serializer: Send + Sync {
    fn encode(&self, payload: &Payload) -> anyhow::Result<Vec<u8>>;

    fn decode(&self, buf: &[u8]) -> anyhow::Result<Payload>;
}

/// Represents payloads as JSON objects, with the binary `data` as standard base64 text.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

#[derive(Serialize, Deserialize)]
struct PayloadJson {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    name: String,
    #[serde(default)]
    id: u32,
    #[serde(default, with = "base64_bytes", skip_serializing_if = "Option::is_none")]
    data: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Serializer for JsonSerializer {
    fn encode(&self, payload: &Payload) -> anyhow::Result<Vec<u8>> {
        let json = PayloadJson {
            kind: payload.kind.into(),
            name: payload.name.clone(),
            id: payload.id,
            data: (!payload.data.is_empty()).then(|| payload.data.to_vec()),
            error: (!payload.error.is_empty()).then(|| payload.error.clone()),
        };
        Ok(serde_json::to_vec(&json)?)
    }

    fn decode(&self, buf: &[u8]) -> anyhow::Result<Payload> {
        let json: PayloadJson = serde_json::from_slice(buf)?;
        let kind = PayloadKind::try_from(json.kind)
            .map_err(|_| anyhow!("invalid payload type {}", json.kind))?;

        Ok(Payload {
            kind,
            name: json.name,
            id: json.id,
            data: json.data.map(Bytes::from).unwrap_or_default(),
            error: json.error.unwrap_or_default(),
        })
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match bytes {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(s) => STANDARD.decode(&s).map(Some).map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_encode_request() {
        let payload = Payload::request("status", 7, &b"hi"[..]);
        let encoded = JsonSerializer.encode(&payload).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(json, serde_json::json!({
            "type": 0,
            "name": "status",
            "id": 7,
            "data": "aGk=",
        }));
    }

    #[test]
    fn test_encode_error_response() {
        let request = Payload::request("status", 3, Bytes::new());
        let response = Payload::response_to(&request, "timeout", Bytes::new());
        let encoded = JsonSerializer.encode(&response).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(json, serde_json::json!({
            "type": 2,
            "name": "status",
            "id": 3,
            "error": "timeout",
        }));
    }

    #[rstest]
    #[case::command(Payload::command("ping", Bytes::new()))]
    #[case::command_with_data(Payload::command("move", &b"\x00\x01\xff"[..]))]
    #[case::request(Payload::request("status", 42, &b"abc"[..]))]
    #[case::response(Payload::response_to(&Payload::request("x", 9, Bytes::new()), "", &b"ok"[..]))]
    #[case::error(Payload::response_to(&Payload::request("x", 9, Bytes::new()), "denied", Bytes::new()))]
    fn test_round_trip(#[case] payload: Payload) {
        let encoded = JsonSerializer.encode(&payload).unwrap();
        assert_eq!(JsonSerializer.decode(&encoded).unwrap(), payload);
    }

    #[rstest]
    #[case::minimal(r#"{"type":1,"name":"ping"}"#, Some(Payload::command("ping", Bytes::new())))]
    #[case::null_fields(r#"{"type":0,"name":"a","id":5,"data":null,"error":null}"#, Some(Payload::request("a", 5, Bytes::new())))]
    #[case::invalid_kind(r#"{"type":3,"name":"ping"}"#, None)]
    #[case::missing_kind(r#"{"name":"ping"}"#, None)]
    #[case::invalid_base64(r#"{"type":1,"name":"ping","data":"***"}"#, None)]
    #[case::not_json("ping", None)]
    fn test_decode(#[case] json: &str, #[case] expected: Option<Payload>) {
        match JsonSerializer.decode(json.as_bytes()) {
            Ok(actual) => assert_eq!(Some(actual), expected),
            Err(e) => {
                println!("{}", e);
                assert!(expected.is_none());
            }
        }
    }
}
