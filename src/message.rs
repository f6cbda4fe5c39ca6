use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppResult, RunnerError};

/// Ordered key→value mapping carried by a frame.
pub type Payload = serde_json::Map<String, Value>;

/// Frame types understood by the worker.
pub mod kind {
    pub const HATCH: &str = "hatch";
    pub const STOP: &str = "stop";
    pub const QUIT: &str = "quit";

    pub const CLIENT_READY: &str = "client_ready";
    pub const CLIENT_STOPPED: &str = "client_stopped";
    pub const HATCHING: &str = "hatching";
    pub const HATCH_COMPLETE: &str = "hatch_complete";
    pub const STATS: &str = "stats";
    pub const HEARTBEAT: &str = "heartbeat";
}

/// One frame on the coordinator wire: a type tag, an optional free-form
/// payload, and the sending node's identity. The envelope never interprets
/// payloads; that is the runner's business.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Option<Payload>,
    pub node_id: String,
}

impl Message {
    pub fn new(kind: &str, data: Option<Payload>, node_id: &str) -> Self {
        Self {
            kind: kind.to_owned(),
            data,
            node_id: node_id.to_owned(),
        }
    }

    /// A data-less control frame.
    pub fn control(kind: &str, node_id: &str) -> Self {
        Self::new(kind, None, node_id)
    }
}

/// Parsed payload of a `hatch` frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HatchOrder {
    pub num_clients: u64,
    pub hatch_rate: f64,
}

impl HatchOrder {
    /// Extract `hatch_rate` and `num_clients` from a hatch payload.
    ///
    /// # Errors
    ///
    /// Returns an error if either field is missing or not numeric; callers
    /// log and ignore the frame.
    pub fn from_payload(data: Option<&Payload>) -> AppResult<Self> {
        let data = data.ok_or(RunnerError::HatchFieldMissing { field: "data" })?;

        let hatch_rate = data
            .get("hatch_rate")
            .ok_or(RunnerError::HatchFieldMissing {
                field: "hatch_rate",
            })?
            .as_f64()
            .ok_or(RunnerError::HatchFieldInvalid {
                field: "hatch_rate",
            })?;

        let num_clients = data
            .get("num_clients")
            .ok_or(RunnerError::HatchFieldMissing {
                field: "num_clients",
            })?
            .as_u64()
            .ok_or(RunnerError::HatchFieldInvalid {
                field: "num_clients",
            })?;

        Ok(Self {
            num_clients,
            hatch_rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, AppResult};

    #[test]
    fn frame_round_trips_through_json() -> AppResult<()> {
        let mut data = Payload::new();
        data.insert("count".to_owned(), Value::from(4));
        let frame = Message::new(kind::HATCH_COMPLETE, Some(data), "node-1");

        let encoded = serde_json::to_string(&frame)
            .map_err(|err| AppError::Message(format!("serialize failed: {}", err)))?;
        if !encoded.contains("\"type\":\"hatch_complete\"") {
            return Err(AppError::Message(format!("Missing type tag: {}", encoded)));
        }

        let decoded: Message = serde_json::from_str(&encoded)
            .map_err(|err| AppError::Message(format!("deserialize failed: {}", err)))?;
        if decoded != frame {
            return Err(AppError::Message("Round trip mismatch".to_owned()));
        }
        Ok(())
    }

    #[test]
    fn control_frame_has_no_data() -> AppResult<()> {
        let frame = Message::control(kind::CLIENT_READY, "node-1");
        let encoded = serde_json::to_string(&frame)
            .map_err(|err| AppError::Message(format!("serialize failed: {}", err)))?;
        if !encoded.contains("\"data\":null") {
            return Err(AppError::Message(format!("Expected null data: {}", encoded)));
        }
        Ok(())
    }

    #[test]
    fn hatch_order_accepts_integer_rate() -> AppResult<()> {
        let mut data = Payload::new();
        data.insert("hatch_rate".to_owned(), Value::from(2));
        data.insert("num_clients".to_owned(), Value::from(8));
        let order = HatchOrder::from_payload(Some(&data))?;
        if order.num_clients != 8 {
            return Err(AppError::Message(format!(
                "Expected 8 clients, got {}",
                order.num_clients
            )));
        }
        if (order.hatch_rate - 2.0).abs() > f64::EPSILON {
            return Err(AppError::Message(format!(
                "Expected rate 2.0, got {}",
                order.hatch_rate
            )));
        }
        Ok(())
    }

    #[test]
    fn hatch_order_rejects_missing_fields() {
        let mut data = Payload::new();
        data.insert("hatch_rate".to_owned(), Value::from(1.5));
        match HatchOrder::from_payload(Some(&data)) {
            Err(AppError::Runner(RunnerError::HatchFieldMissing {
                field: "num_clients",
            })) => {}
            other => panic!("Expected missing num_clients, got {:?}", other),
        }

        match HatchOrder::from_payload(None) {
            Err(AppError::Runner(RunnerError::HatchFieldMissing { field: "data" })) => {}
            other => panic!("Expected missing data, got {:?}", other),
        }
    }

    #[test]
    fn hatch_order_rejects_non_numeric_fields() {
        let mut data = Payload::new();
        data.insert("hatch_rate".to_owned(), Value::from("fast"));
        data.insert("num_clients".to_owned(), Value::from(8));
        match HatchOrder::from_payload(Some(&data)) {
            Err(AppError::Runner(RunnerError::HatchFieldInvalid {
                field: "hatch_rate",
            })) => {}
            other => panic!("Expected invalid hatch_rate, got {:?}", other),
        }
    }
}
