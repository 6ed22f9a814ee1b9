//! Request/reply messages exchanged with the compute worker.
//!
//! Every request carries a fresh correlation id; the worker echoes it on the
//! matching reply. Replies may arrive in any order.

use super::error::EngineError;
use crate::core::mesh::{MeshError, MeshGeometry, Primitive};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub type CorrelationId = Uuid;

/// Shape the caller expects the reply's result payload to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnShape {
    Status,
    Int,
    Float,
    Boolean,
    Text,
    IntArray,
    FloatArray,
    Json,
    Mesh,
    LinesMesh,
    LitLinesMesh,
}

impl ReturnShape {
    pub fn is_mesh(self) -> bool {
        matches!(
            self,
            ReturnShape::Mesh | ReturnShape::LinesMesh | ReturnShape::LitLinesMesh
        )
    }

    pub fn primitive(self) -> Option<Primitive> {
        match self {
            ReturnShape::Mesh => Some(Primitive::Triangles),
            ReturnShape::LinesMesh | ReturnShape::LitLinesMesh => Some(Primitive::Lines),
            _ => None,
        }
    }
}

/// A single positional argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CommandArg {
    Value(serde_json::Value),
    Bytes(Vec<u8>),
}

macro_rules! impl_value_arg {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for CommandArg {
                fn from(v: $ty) -> Self {
                    CommandArg::Value(v.into())
                }
            }
        )*
    };
}

impl_value_arg!(
    bool,
    i32,
    i64,
    u32,
    u64,
    f32,
    f64,
    &str,
    String,
    Vec<f64>,
    Vec<i32>,
    serde_json::Value,
);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandPayload {
    pub command: String,
    pub return_shape: ReturnShape,
    pub args: Vec<CommandArg>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message", rename_all = "snake_case")]
pub enum RequestBody {
    /// Handshake sent once when a command centre starts.
    Initialize { settings: serde_json::Value },
    Command(CommandPayload),
    /// Several commands executed by the worker as one unit.
    CommandList { commands: Vec<CommandPayload> },
}

impl RequestBody {
    pub fn label(&self) -> String {
        match self {
            RequestBody::Initialize { .. } => "initialize".to_string(),
            RequestBody::Command(payload) => payload.command.clone(),
            RequestBody::CommandList { commands } => format!("command_list[{}]", commands.len()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub message_id: CorrelationId,
    pub timestamp_ms: u64,
    #[serde(flatten)]
    pub body: RequestBody,
}

impl Request {
    pub fn new(message_id: CorrelationId, body: RequestBody) -> Self {
        Self {
            message_id,
            timestamp_ms: now_ms(),
            body,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Completed,
    Exception,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub message_id: CorrelationId,
    pub status: ReplyStatus,
    #[serde(default)]
    pub result: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console_message: Option<String>,
}

impl Reply {
    pub fn completed(message_id: CorrelationId, result: serde_json::Value) -> Self {
        Self {
            message_id,
            status: ReplyStatus::Completed,
            result,
            console_message: None,
        }
    }

    pub fn exception(message_id: CorrelationId, diagnostic: impl Into<String>) -> Self {
        Self {
            message_id,
            status: ReplyStatus::Exception,
            result: serde_json::Value::Null,
            console_message: Some(diagnostic.into()),
        }
    }

    pub fn with_console_message(mut self, message: impl Into<String>) -> Self {
        self.console_message = Some(message.into());
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == ReplyStatus::Completed
    }

    pub fn decode<T: DeserializeOwned>(&self, command: &str) -> Result<T, EngineError> {
        T::deserialize(&self.result).map_err(|source| EngineError::Decode {
            command: command.to_string(),
            source,
        })
    }

    /// Decodes and validates a contour mesh payload requested as `shape`.
    pub fn decode_mesh(
        &self,
        command: &str,
        shape: ReturnShape,
    ) -> Result<MeshGeometry, EngineError> {
        let mut mesh: MeshGeometry = self.decode(command)?;
        let invalid = |source: MeshError| EngineError::InvalidMesh {
            command: command.to_string(),
            source,
        };
        if let Some(expected) = shape.primitive() {
            mesh.settle_primitive(expected).map_err(invalid)?;
        }
        mesh.validate().map_err(invalid)?;
        Ok(mesh)
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serializes_flat_with_message_tag() {
        let id = Uuid::new_v4();
        let request = Request::new(
            id,
            RequestBody::Command(CommandPayload {
                command: "get_map_rmsd_approx".into(),
                return_shape: ReturnShape::Float,
                args: vec![CommandArg::from(3)],
            }),
        );
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["message"], "command");
        assert_eq!(value["command"], "get_map_rmsd_approx");
        assert_eq!(value["return_shape"], "float");
        assert_eq!(value["args"][0], json!({"kind": "value", "value": 3}));
        assert_eq!(value["message_id"], json!(id.to_string()));
    }

    #[test]
    fn bytes_argument_survives_a_round_trip() {
        let payload = CommandPayload {
            command: "read_ccp4_map".into(),
            return_shape: ReturnShape::Int,
            args: vec![CommandArg::Bytes(vec![1, 2, 3]), CommandArg::from("map.ccp4")],
        };
        let text = serde_json::to_string(&RequestBody::Command(payload.clone())).unwrap();
        let back: RequestBody = serde_json::from_str(&text).unwrap();
        assert_eq!(back, RequestBody::Command(payload));
    }

    #[test]
    fn reply_without_result_defaults_to_null() {
        let id = Uuid::new_v4();
        let reply: Reply = serde_json::from_value(json!({
            "message_id": id,
            "status": "exception",
            "console_message": "bad map"
        }))
        .unwrap();
        assert!(!reply.is_completed());
        assert!(reply.result.is_null());
    }

    #[test]
    fn decode_reports_command_on_type_mismatch() {
        let reply = Reply::completed(Uuid::new_v4(), json!("not a number"));
        let err = reply.decode::<f64>("get_map_rmsd_approx").unwrap_err();
        assert!(matches!(err, EngineError::Decode { ref command, .. } if command == "get_map_rmsd_approx"));
    }

    #[test]
    fn decode_mesh_rejects_inconsistent_geometry() {
        let reply = Reply::completed(
            Uuid::new_v4(),
            json!({
                "primitive": "triangles",
                "vertices": [0.0, 0.0, 0.0],
                "normals": [0.0, 0.0, 1.0],
                "colours": [1.0, 1.0, 1.0, 1.0],
                "indices": [0, 1, 2]
            }),
        );
        assert!(matches!(
            reply.decode_mesh("get_map_contours_mesh", ReturnShape::Mesh),
            Err(EngineError::InvalidMesh { .. })
        ));
    }

    fn square_outline(primitive: Option<&str>) -> Reply {
        let mut mesh = json!({
            "vertices": [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0],
            "normals": vec![0.0; 12],
            "colours": vec![1.0; 16],
            "indices": [0, 1, 2, 3]
        });
        if let Some(primitive) = primitive {
            mesh["primitive"] = json!(primitive);
        }
        Reply::completed(Uuid::new_v4(), mesh)
    }

    #[test]
    fn decode_mesh_takes_topology_from_lines_shape() {
        for shape in [ReturnShape::LinesMesh, ReturnShape::LitLinesMesh] {
            let mesh = square_outline(None)
                .decode_mesh("get_map_contours_mesh", shape)
                .unwrap();
            assert_eq!(mesh.primitive(), Primitive::Lines);
        }
    }

    #[test]
    fn decode_mesh_rejects_topology_disagreeing_with_shape() {
        let err = square_outline(Some("triangles"))
            .decode_mesh("get_map_contours_mesh", ReturnShape::LinesMesh)
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidMesh {
                source: MeshError::PrimitiveMismatch { .. },
                ..
            }
        ));
    }

    #[test]
    fn command_list_label_counts_commands() {
        let body = RequestBody::CommandList { commands: vec![] };
        assert_eq!(body.label(), "command_list[0]");
    }
}
