use crate::models::{Channel, FeatureRequest, Message};
use tokio::sync::broadcast;

/// Events that cross the hub: emitted by REST handlers, MCP tools and the
/// invocation engine; consumed by the WebSocket dispatcher.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    NewMessage {
        workspace_id: String,
        message: Message,
    },
    MessageEdited {
        workspace_id: String,
        message: Message,
    },
    MessageDeleted {
        workspace_id: String,
        channel_id: String,
        id: String,
    },
    Reaction {
        workspace_id: String,
        channel_id: String,
        message_id: String,
        user_name: String,
        emoji: String,
        added: bool,
    },
    AgentStatus {
        workspace_id: String,
        agent_name: String,
        status: String,
    },
    AgentTyping {
        workspace_id: String,
        channel_id: String,
        agent_name: String,
        is_typing: bool,
        error: Option<String>,
    },
    AgentStreaming {
        workspace_id: String,
        channel_id: String,
        agent_name: String,
        chunk: String,
    },
    ChannelCreated {
        workspace_id: String,
        channel: Channel,
    },
    /// Feature requests are hub-global; broadcast to every workspace.
    FeatureUpdate { feature: FeatureRequest },
}

impl ChatEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ChatEvent::NewMessage { .. } => "new_message",
            ChatEvent::MessageEdited { .. } => "message_edited",
            ChatEvent::MessageDeleted { .. } => "message_deleted",
            ChatEvent::Reaction { .. } => "reaction",
            ChatEvent::AgentStatus { .. } => "agent_status",
            ChatEvent::AgentTyping { .. } => "agent_typing",
            ChatEvent::AgentStreaming { .. } => "agent_streaming",
            ChatEvent::ChannelCreated { .. } => "channel_created",
            ChatEvent::FeatureUpdate { .. } => "feature_update",
        }
    }

    /// Workspace the event belongs to; `None` means every workspace sees it.
    pub fn workspace_id(&self) -> Option<&str> {
        match self {
            ChatEvent::NewMessage { workspace_id, .. }
            | ChatEvent::MessageEdited { workspace_id, .. }
            | ChatEvent::MessageDeleted { workspace_id, .. }
            | ChatEvent::Reaction { workspace_id, .. }
            | ChatEvent::AgentStatus { workspace_id, .. }
            | ChatEvent::AgentTyping { workspace_id, .. }
            | ChatEvent::AgentStreaming { workspace_id, .. }
            | ChatEvent::ChannelCreated { workspace_id, .. } => Some(workspace_id),
            ChatEvent::FeatureUpdate { .. } => None,
        }
    }

    /// Channel targeting, used for `new_message` subscription filtering.
    pub fn channel_id(&self) -> Option<&str> {
        match self {
            ChatEvent::NewMessage { message, .. } => Some(&message.channel_id),
            _ => None,
        }
    }

    /// Wire frame: `{"type": ..., "data": {...}}`.
    pub fn to_frame(&self) -> serde_json::Value {
        let data = match self {
            ChatEvent::NewMessage { message, .. }
            | ChatEvent::MessageEdited { message, .. } => {
                serde_json::to_value(message).unwrap_or_default()
            }
            ChatEvent::MessageDeleted { channel_id, id, .. } => {
                serde_json::json!({"id": id, "channel_id": channel_id})
            }
            ChatEvent::Reaction {
                channel_id,
                message_id,
                user_name,
                emoji,
                added,
                ..
            } => serde_json::json!({
                "channel_id": channel_id,
                "message_id": message_id,
                "user_name": user_name,
                "emoji": emoji,
                "added": added,
            }),
            ChatEvent::AgentStatus {
                agent_name, status, ..
            } => serde_json::json!({"agent_name": agent_name, "status": status}),
            ChatEvent::AgentTyping {
                channel_id,
                agent_name,
                is_typing,
                error,
                ..
            } => serde_json::json!({
                "channel_id": channel_id,
                "agent_name": agent_name,
                "is_typing": is_typing,
                "error": error,
            }),
            ChatEvent::AgentStreaming {
                channel_id,
                agent_name,
                chunk,
                ..
            } => serde_json::json!({
                "channel_id": channel_id,
                "agent_name": agent_name,
                "chunk": chunk,
            }),
            ChatEvent::ChannelCreated { channel, .. } => {
                serde_json::to_value(channel).unwrap_or_default()
            }
            ChatEvent::FeatureUpdate { feature } => {
                serde_json::to_value(feature).unwrap_or_default()
            }
        };
        serde_json::json!({"type": self.event_type(), "data": data})
    }
}

pub struct EventBus {
    pub sender: broadcast::Sender<ChatEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        EventBus { sender }
    }

    pub fn publish(&self, event: ChatEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }
}
