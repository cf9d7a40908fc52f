use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::room::{ChatMessage, CodeFile, NewFile, RoomSnapshot, User};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "joinRoom", rename_all = "camelCase")]
    JoinRoom {
        #[serde(default)]
        room_id: String,
        #[serde(default)]
        username: String,
    },
    #[serde(rename = "leaveRoom", rename_all = "camelCase")]
    LeaveRoom { room_id: String },
    #[serde(rename = "sendCodeChange", rename_all = "camelCase")]
    SendCodeChange {
        room_id: String,
        code: String,
        #[serde(default)]
        file_id: Option<String>,
    },
    #[serde(rename = "createFile", rename_all = "camelCase")]
    CreateFile { room_id: String, file: NewFile },
    #[serde(rename = "deleteFile", rename_all = "camelCase")]
    DeleteFile { room_id: String, file_id: String },
    #[serde(rename = "renameFile", rename_all = "camelCase")]
    RenameFile {
        room_id: String,
        file_id: String,
        new_name: String,
    },
    #[serde(rename = "sendSelection", rename_all = "camelCase")]
    SendSelection {
        room_id: String,
        #[serde(default)]
        selection: Value,
        #[serde(default)]
        cursor: Value,
        #[serde(default)]
        file_id: Option<String>,
    },
    #[serde(rename = "sendChatMessage", rename_all = "camelCase")]
    SendChatMessage { room_id: String, message: String },
    #[serde(rename = "saveRoom", rename_all = "camelCase")]
    SaveRoom { room_id: String },
    #[serde(rename = "loadRoom", rename_all = "camelCase")]
    LoadRoom { room_id: String },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "roomJoined")]
    RoomJoined(RoomSnapshot),
    #[serde(rename = "userJoined")]
    UserJoined {
        username: String,
        id: String,
        users: Vec<User>,
    },
    #[serde(rename = "userLeft")]
    UserLeft {
        username: String,
        id: String,
        users: Vec<User>,
    },
    #[serde(rename = "codeChange", rename_all = "camelCase")]
    CodeChange {
        code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_id: Option<String>,
    },
    #[serde(rename = "fileCreated")]
    FileCreated { file: CodeFile },
    #[serde(rename = "fileDeleted", rename_all = "camelCase")]
    FileDeleted { file_id: String },
    #[serde(rename = "fileRenamed", rename_all = "camelCase")]
    FileRenamed { file_id: String, new_name: String },
    #[serde(rename = "selectionChange", rename_all = "camelCase")]
    SelectionChange {
        id: String,
        username: String,
        selection: Value,
        cursor: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_id: Option<String>,
    },
    #[serde(rename = "chatMessage")]
    Chat(ChatMessage),
    #[serde(rename = "roomSaved", rename_all = "camelCase")]
    RoomSaved { room_id: String, saved_at: String },
    #[serde(rename = "roomRestored")]
    RoomRestored(RoomSnapshot),
    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}
