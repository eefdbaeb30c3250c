//! Client identity and the self-origin payload marker

use uuid::Uuid;

/// Opaque session identifier, fixed for the client's lifetime.
///
/// Generated ids look like `CLIENTID_<u32>_END`, which stays inside the
/// 23-byte limit MQTT 3.1.1 brokers are required to accept.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    /// Generate a fresh random identity
    pub fn generate() -> Self {
        let suffix = Uuid::new_v4().as_u128() as u32;
        Self(format!("CLIENTID_{suffix}_END"))
    }

    /// Use a caller-chosen identity
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Marker prepended to every outbound payload
    pub fn marker(&self) -> String {
        format!("[ClientID:{}]", self.0)
    }

    /// Prefix `payload` with this client's marker
    pub fn frame_payload(&self, payload: &[u8]) -> Vec<u8> {
        let marker = self.marker();
        let mut framed = Vec::with_capacity(marker.len() + payload.len());
        framed.extend_from_slice(marker.as_bytes());
        framed.extend_from_slice(payload);
        framed
    }
}

impl std::fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
