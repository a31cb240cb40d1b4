//! Content trees as the server publishes them.
//!
//! Child collections are `Option<Vec<_>>` because the server sends `null` for "not
//! loaded" as well as for "empty"; the converter turns both into empty collections so
//! nothing past the conversion boundary has to tell the two apart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reference to another server entity by uuid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEntityRef {
    #[serde(default)]
    pub uuid: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSongBundle {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub abbreviation: String,
    pub name: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub copyright: String,
    #[serde(default)]
    pub hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub songs: Option<Vec<ServerSong>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSong {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub number: Option<u32>,
    #[serde(default)]
    pub language: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub verses: Option<Vec<ServerVerse>>,
    #[serde(default)]
    pub abc_melodies: Option<Vec<ServerAbcMelody>>,
    #[serde(default)]
    pub metadata: Option<Vec<ServerSongMetadata>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerVerse {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub index: i32,
    #[serde(default)]
    pub abc_lyrics: Option<String>,
    /// Per-verse melody fragments, each pointing at its parent melody.
    #[serde(default)]
    pub abc_melodies: Option<Vec<ServerAbcSubMelody>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerAbcMelody {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub melody: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerAbcSubMelody {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub melody: String,
    pub parent: ServerEntityRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSongMetadata {
    #[serde(default)]
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerDocumentGroup {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub groups: Option<Vec<ServerDocumentGroup>>,
    #[serde(default)]
    pub items: Option<Vec<ServerDocument>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerDocument {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub index: i32,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// One root the server knows about, as listed by its update manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub uuid: String,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
}
