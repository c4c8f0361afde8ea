//! In-memory Data Store
//!
//! Sessions, their transcripts and the files uploaded into each room. Nothing
//! survives a restart.

use axum::body::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{Session, Transcript, UploadedFile};

struct SessionRecord {
    id: Uuid,
    room_name: String,
    created_at: DateTime<Utc>,
    is_active: bool,
    transcripts: Vec<Transcript>,
}

/// A stored upload: metadata plus content.
#[derive(Clone)]
pub struct StoredFile {
    pub meta: UploadedFile,
    pub bytes: Bytes,
}

#[derive(Default)]
struct Tables {
    /// Kept in creation order.
    sessions: Vec<SessionRecord>,
    files: HashMap<String, Vec<StoredFile>>,
    next_transcript_id: u64,
}

impl Tables {
    fn find(&self, id: Uuid) -> Option<&SessionRecord> {
        self.sessions.iter().find(|s| s.id == id)
    }

    fn find_mut(&mut self, id: Uuid) -> Option<&mut SessionRecord> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    fn view(&self, record: &SessionRecord) -> Session {
        let files = self
            .files
            .get(&record.room_name)
            .map(|files| files.iter().map(|f| f.meta.clone()).collect())
            .unwrap_or_default();
        Session {
            id: record.id,
            room_name: record.room_name.clone(),
            created_at: record.created_at,
            is_active: record.is_active,
            transcripts: record.transcripts.clone(),
            files,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("a session for room '{0}' already exists")]
    DuplicateRoom(String),
}

/// Shared store behind a single `RwLock`.
#[derive(Default)]
pub struct Store {
    tables: RwLock<Tables>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an active session for `room_name`. Room names are unique.
    pub async fn create_session(&self, room_name: &str) -> Result<Session, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.sessions.iter().any(|s| s.room_name == room_name) {
            return Err(StoreError::DuplicateRoom(room_name.to_string()));
        }
        let record = SessionRecord {
            id: Uuid::new_v4(),
            room_name: room_name.to_string(),
            created_at: Utc::now(),
            is_active: true,
            transcripts: Vec::new(),
        };
        let session = tables.view(&record);
        tables.sessions.push(record);
        Ok(session)
    }

    pub async fn list_sessions(&self) -> Vec<Session> {
        let tables = self.tables.read().await;
        tables.sessions.iter().map(|s| tables.view(s)).collect()
    }

    pub async fn get_session(&self, id: Uuid) -> Option<Session> {
        let tables = self.tables.read().await;
        tables.find(id).map(|s| tables.view(s))
    }

    /// Removes a session and the files uploaded into its room.
    pub async fn delete_session(&self, id: Uuid) -> Option<Session> {
        let mut tables = self.tables.write().await;
        let index = tables.sessions.iter().position(|s| s.id == id)?;
        let record = tables.sessions.remove(index);
        let session = tables.view(&record);
        tables.files.remove(&record.room_name);
        Some(session)
    }

    pub async fn set_active(&self, id: Uuid, is_active: bool) -> Option<Session> {
        let mut tables = self.tables.write().await;
        tables.find_mut(id)?.is_active = is_active;
        tables.find(id).map(|s| tables.view(s))
    }

    /// Appends a user message to the session's transcript.
    pub async fn add_transcript(&self, id: Uuid, user_message: &str) -> Option<Transcript> {
        let mut tables = self.tables.write().await;
        tables.next_transcript_id += 1;
        let transcript = Transcript {
            id: tables.next_transcript_id,
            timestamp: Utc::now(),
            user_message: Some(user_message.to_string()),
            assistant_message: None,
        };
        tables.find_mut(id)?.transcripts.push(transcript.clone());
        Some(transcript)
    }

    pub async fn add_files(&self, room: &str, files: Vec<StoredFile>) {
        let mut tables = self.tables.write().await;
        tables
            .files
            .entry(room.to_string())
            .or_default()
            .extend(files);
    }

    pub async fn room_files(&self, room: &str) -> Vec<UploadedFile> {
        let tables = self.tables.read().await;
        tables
            .files
            .get(room)
            .map(|files| files.iter().map(|f| f.meta.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn file(&self, room: &str, id: Uuid) -> Option<StoredFile> {
        let tables = self.tables.read().await;
        tables
            .files
            .get(room)?
            .iter()
            .find(|f| f.meta.id == id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(name: &str, bytes: &'static [u8]) -> StoredFile {
        StoredFile {
            meta: UploadedFile {
                id: Uuid::new_v4(),
                name: name.to_string(),
                mime_type: "text/plain".to_string(),
                size: bytes.len() as u64,
                uploaded_at: Utc::now(),
                file: format!("/files/{}", name),
            },
            bytes: Bytes::from_static(bytes),
        }
    }

    #[tokio::test]
    async fn test_sessions_are_listed_in_creation_order() {
        let store = Store::new();
        let a = store.create_session("room-a").await.unwrap();
        let b = store.create_session("room-b").await.unwrap();

        let listed: Vec<Uuid> = store.list_sessions().await.iter().map(|s| s.id).collect();

        assert_eq!(listed, vec![a.id, b.id]);
        assert!(a.is_active);
    }

    #[tokio::test]
    async fn test_room_names_are_unique() {
        let store = Store::new();
        store.create_session("room-a").await.unwrap();
        assert_eq!(
            store.create_session("room-a").await.unwrap_err(),
            StoreError::DuplicateRoom("room-a".to_string())
        );
    }

    #[tokio::test]
    async fn test_transcripts_and_activity() {
        let store = Store::new();
        let session = store.create_session("room-a").await.unwrap();

        let first = store.add_transcript(session.id, "hello").await.unwrap();
        let second = store.add_transcript(session.id, "again").await.unwrap();
        assert!(second.id > first.id);
        assert!(store.add_transcript(Uuid::new_v4(), "nobody").await.is_none());

        let updated = store.set_active(session.id, false).await.unwrap();
        assert!(!updated.is_active);
        assert_eq!(updated.transcripts.len(), 2);
        assert_eq!(updated.transcripts[0].user_message.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_files_follow_the_room() {
        let store = Store::new();
        let session = store.create_session("room-a").await.unwrap();
        let file = stored("a.txt", b"alpha");
        let id = file.meta.id;
        store.add_files("room-a", vec![file]).await;
        store.add_files("room-b", vec![stored("b.txt", b"beta")]).await;

        let viewed = store.get_session(session.id).await.unwrap();
        assert_eq!(viewed.files.len(), 1);
        assert_eq!(viewed.files[0].name, "a.txt");
        assert_eq!(store.file("room-a", id).await.unwrap().bytes, "alpha");
        assert!(store.file("room-b", id).await.is_none());

        store.delete_session(session.id).await.unwrap();
        assert!(store.room_files("room-a").await.is_empty());
        assert_eq!(store.room_files("room-b").await.len(), 1);
        assert!(store.get_session(session.id).await.is_none());
    }
}
