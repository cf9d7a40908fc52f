use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Opaque id of one live transport connection.
pub type ConnectionId = String;

pub const WELCOME_CODE: &str = "// Welcome to Devsync!\n// Start coding together...\n";
pub const DEFAULT_LANGUAGE: &str = "javascript";
pub const UNKNOWN_CREATOR: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: ConnectionId,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub username: String,
    pub text: String,
    pub timestamp: i64,
}

/// A file as stored by a room. `created_by` is always assigned by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeFile {
    pub id: String,
    pub name: String,
    pub content: String,
    pub language: String,
    pub created_by: String,
    #[serde(default)]
    pub is_active: bool,
    pub created_at: i64,
}

/// A file as proposed by a client in `createFile`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub content: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub created_at: Option<i64>,
}

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

/// Full state of a room as delivered to a joining client and as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub code: String,
    pub language: String,
    pub files: Vec<CodeFile>,
    pub messages: Vec<ChatMessage>,
    pub users: Vec<User>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined { users: Vec<User> },
    AlreadyMember,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveOutcome {
    Left { user: User, remaining: Vec<User> },
    NotMember,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(CodeFile),
    DuplicateId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostOutcome {
    Posted(ChatMessage),
    NotMember,
}

/// Where a content write landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentWrite {
    Legacy,
    File,
    UnknownFile,
}

/// One collaboration session. Users and files keep insertion order so every
/// client renders them the same way.
#[derive(Debug)]
pub struct Room {
    id: String,
    users: Vec<User>,
    files: Vec<CodeFile>,
    legacy_code: String,
    language: String,
    messages: Vec<ChatMessage>,
    next_message_seq: u64,
    retired: bool,
}

impl Room {
    pub fn new(id: impl Into<String>) -> Self {
        Room {
            id: id.into(),
            users: Vec::new(),
            files: Vec::new(),
            legacy_code: WELCOME_CODE.to_string(),
            language: DEFAULT_LANGUAGE.to_string(),
            messages: Vec::new(),
            next_message_seq: 0,
            retired: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn contains(&self, connection_id: &str) -> bool {
        self.users.iter().any(|u| u.id == connection_id)
    }

    pub fn username_of(&self, connection_id: &str) -> Option<&str> {
        self.users
            .iter()
            .find(|u| u.id == connection_id)
            .map(|u| u.username.as_str())
    }

    pub fn users(&self) -> &[User] {
        &self.users
    }

    pub fn member_ids(&self) -> impl Iterator<Item = &str> {
        self.users.iter().map(|u| u.id.as_str())
    }

    pub fn legacy_code(&self) -> &str {
        &self.legacy_code
    }

    pub fn file(&self, file_id: &str) -> Option<&CodeFile> {
        self.files.iter().find(|f| f.id == file_id)
    }

    pub fn files(&self) -> &[CodeFile] {
        &self.files
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// A retired room has been dropped from the registry and must not gain
    /// new members.
    pub fn is_retired(&self) -> bool {
        self.retired
    }

    pub(crate) fn retire(&mut self) {
        self.retired = true;
    }

    pub fn add_user(&mut self, connection_id: &str, username: &str) -> JoinOutcome {
        if self.contains(connection_id) {
            return JoinOutcome::AlreadyMember;
        }
        self.users.push(User {
            id: connection_id.to_string(),
            username: username.to_string(),
        });
        JoinOutcome::Joined {
            users: self.users.clone(),
        }
    }

    pub fn remove_user(&mut self, connection_id: &str) -> LeaveOutcome {
        match self.users.iter().position(|u| u.id == connection_id) {
            Some(pos) => {
                let user = self.users.remove(pos);
                LeaveOutcome::Left {
                    user,
                    remaining: self.users.clone(),
                }
            }
            None => LeaveOutcome::NotMember,
        }
    }

    /// Writes `content` to the addressed file, or to the legacy buffer when no
    /// file is named. Unknown files are left alone; nothing is created.
    pub fn set_content(&mut self, file_id: Option<&str>, content: String) -> ContentWrite {
        match file_id {
            None => {
                self.legacy_code = content;
                ContentWrite::Legacy
            }
            Some(id) => match self.files.iter_mut().find(|f| f.id == id) {
                Some(file) => {
                    file.content = content;
                    ContentWrite::File
                }
                None => ContentWrite::UnknownFile,
            },
        }
    }

    pub fn create_file(&mut self, connection_id: &str, file: NewFile) -> CreateOutcome {
        if self.file(&file.id).is_some() {
            return CreateOutcome::DuplicateId;
        }
        let created_by = self
            .username_of(connection_id)
            .unwrap_or(UNKNOWN_CREATOR)
            .to_string();
        let file = CodeFile {
            id: file.id,
            name: file.name,
            content: file.content,
            language: file.language,
            created_by,
            is_active: file.is_active,
            created_at: file.created_at.unwrap_or_else(now_millis),
        };
        self.files.push(file.clone());
        CreateOutcome::Created(file)
    }

    pub fn delete_file(&mut self, file_id: &str) -> Option<CodeFile> {
        let pos = self.files.iter().position(|f| f.id == file_id)?;
        Some(self.files.remove(pos))
    }

    pub fn rename_file(&mut self, file_id: &str, new_name: &str) -> bool {
        match self.files.iter_mut().find(|f| f.id == file_id) {
            Some(file) => {
                file.name = new_name.to_string();
                true
            }
            None => false,
        }
    }

    pub fn append_message(&mut self, connection_id: &str, text: &str) -> PostOutcome {
        let Some(username) = self.username_of(connection_id) else {
            return PostOutcome::NotMember;
        };
        let timestamp = now_millis();
        let message = ChatMessage {
            id: format!("{}-{}", timestamp, self.next_message_seq),
            username: username.to_string(),
            text: text.to_string(),
            timestamp,
        };
        self.next_message_seq += 1;
        self.messages.push(message.clone());
        PostOutcome::Posted(message)
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            code: self.legacy_code.clone(),
            language: self.language.clone(),
            files: self.files.clone(),
            messages: self.messages.clone(),
            users: self.users.clone(),
        }
    }

    /// Replaces the room's content with a saved state. The live roster is kept;
    /// saved users describe who was present at save time, not who is here now.
    pub fn restore(&mut self, saved: RoomSnapshot) {
        self.legacy_code = saved.code;
        self.language = saved.language;
        self.files = saved.files;
        // Never rewind the sequence: ids handed out before the restore stay unique.
        self.next_message_seq = self.next_message_seq.max(saved.messages.len() as u64);
        self.messages = saved.messages;
    }
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
