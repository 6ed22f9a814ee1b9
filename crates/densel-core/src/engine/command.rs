use super::protocol::{CommandArg, CommandPayload, ReturnShape};
use serde::{Deserialize, Serialize};

/// A semantic command for the compute engine.
///
/// Built fluently, then shared immutably once issued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandDescriptor {
    pub command: String,
    #[serde(default)]
    pub args: Vec<CommandArg>,
    pub return_shape: ReturnShape,
    /// Whether the command mutates persistent engine entities.
    #[serde(default)]
    pub changes_molecules: bool,
}

impl CommandDescriptor {
    pub fn new(command: impl Into<String>, return_shape: ReturnShape) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            return_shape,
            changes_molecules: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<CommandArg>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn bytes(mut self, data: Vec<u8>) -> Self {
        self.args.push(CommandArg::Bytes(data));
        self
    }

    pub fn changes_molecules(mut self) -> Self {
        self.changes_molecules = true;
        self
    }

    pub fn to_payload(&self) -> CommandPayload {
        CommandPayload {
            command: self.command.clone(),
            return_shape: self.return_shape,
            args: self.args.clone(),
        }
    }
}
