/// Decides whether a payload is worth keeping for later delivery
///
/// Consulted whenever a payload would be parked in the retry queue.
/// A payload that lacks the routing information the peer needs can never
/// succeed on replay, so it is rejected instead of queued.
///
/// # Flow
/// ```text
/// send(payload) ──not connected──> check(payload)
///                                   ├─ Ok  ──> retry queue (Queued)
///                                   └─ Err ──> rejected, never queued
/// ```
pub trait DeliveryGuard: Send + Sync {
    /// `Err(reason)` when the payload is structurally unsendable
    fn check(&self, payload: &str) -> Result<(), String>;
}

/// Guard that accepts every payload
pub struct AcceptAll;

impl DeliveryGuard for AcceptAll {
    fn check(&self, _payload: &str) -> Result<(), String> {
        Ok(())
    }
}

/// JSON guard requiring a non-empty string field on envelopes of one type
///
/// # Example
/// ```ignore
/// // {"type":"message"} envelopes must carry a provider
/// let guard = JsonFieldGuard::new("type", "message", "provider");
/// ```
pub struct JsonFieldGuard {
    type_field: String,
    type_value: String,
    required_field: String,
}

impl JsonFieldGuard {
    pub fn new(
        type_field: impl Into<String>,
        type_value: impl Into<String>,
        required_field: impl Into<String>,
    ) -> Self {
        Self {
            type_field: type_field.into(),
            type_value: type_value.into(),
            required_field: required_field.into(),
        }
    }
}

impl DeliveryGuard for JsonFieldGuard {
    fn check(&self, payload: &str) -> Result<(), String> {
        let json: serde_json::Value = serde_json::from_str(payload)
            .map_err(|e| format!("payload is not valid JSON: {}", e))?;

        if json.get(&self.type_field).and_then(|v| v.as_str()) != Some(self.type_value.as_str()) {
            return Ok(());
        }

        match json.get(&self.required_field).and_then(|v| v.as_str()) {
            Some(value) if !value.trim().is_empty() => Ok(()),
            _ => Err(format!("missing required field '{}'", self.required_field)),
        }
    }
}
