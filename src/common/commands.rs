use super::types::MessagePayload;

/// Command from a mesh handle down to its swarm task.
#[derive(Debug, Clone)]
pub enum MeshCommand {
    Publish(MessagePayload),
    Leave,
}
