use serde::{Deserialize, Serialize};

use crate::models::{
    Channel, MessageWithUser, ReactionGroup, Reminder, UserResponse,
};

/// Events pushed from the server to websocket clients.
///
/// Wire shape is `{"type": "<kind>", "payload": ...}`; every broadcast
/// serializes the event once and fans the same frame out to each recipient.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum WsEvent {
    /// First frame on every connection, written before the connection is
    /// registered so clients can tell a live socket from a half-open one.
    Welcome { message: String },

    NewMessage(MessageWithUser),

    MessageDeleted {
        message_id: String,
        channel_id: String,
    },

    UserOnline { user_id: String },

    UserOffline { user_id: String },

    Typing {
        user_id: String,
        channel_id: String,
    },

    ChannelUpdate(Channel),

    ReactionUpdate {
        message_id: String,
        reactions: Vec<ReactionGroup>,
    },

    MessageStreamStart {
        message_id: String,
        channel_id: String,
        user: UserResponse,
        #[serde(skip_serializing_if = "Option::is_none")]
        thread_id: Option<String>,
    },

    MessageStreamDelta {
        message_id: String,
        channel_id: String,
        delta: String,
        full_text: String,
    },

    MessageStreamEnd {
        message_id: String,
        channel_id: String,
        content: String,
    },

    Reminder(Reminder),

    AppCodeUpdated {
        app_id: String,
        html_content: String,
        css_content: String,
        js_content: String,
        updated_at: String,
    },

    AppStreamStart {
        message_id: String,
        app_id: String,
    },

    AppStreamDelta {
        message_id: String,
        app_id: String,
        delta: String,
        full_text: String,
    },

    AppStreamEnd {
        message_id: String,
        app_id: String,
        content: String,
    },
}

impl WsEvent {
    pub fn welcome() -> Self {
        WsEvent::Welcome {
            message: "connected".into(),
        }
    }
}

/// Frames clients may send over the socket. Anything else is logged and
/// dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Rebroadcast to the channel, excluding the sender.
    Typing { channel_id: String },
    Subscribe { channel_id: String },
    SubscribeApp { app_id: String },
    UnsubscribeApp { app_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_frames_use_snake_case_type_tags() {
        let json = serde_json::to_string(&WsEvent::UserOnline {
            user_id: "u1".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"user_online","payload":{"user_id":"u1"}}"#);
    }

    #[test]
    fn welcome_frame_matches_protocol() {
        let json = serde_json::to_string(&WsEvent::welcome()).unwrap();
        assert_eq!(
            json,
            r#"{"type":"welcome","payload":{"message":"connected"}}"#
        );
    }

    #[test]
    fn client_frames_parse() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"subscribe_app","payload":{"app_id":"a1"}}"#).unwrap();
        match frame {
            ClientFrame::SubscribeApp { app_id } => assert_eq!(app_id, "a1"),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn stream_delta_carries_delta_and_accumulated_text() {
        let event = WsEvent::MessageStreamDelta {
            message_id: "m".into(),
            channel_id: "c".into(),
            delta: "lo".into(),
            full_text: "hello".into(),
        };
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(value["type"], "message_stream_delta");
        assert_eq!(value["payload"]["delta"], "lo");
        assert_eq!(value["payload"]["full_text"], "hello");
    }
}
