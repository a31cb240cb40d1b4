//! Record definitions for everything stored in the local database.
//!
//! Every entity is stored as its own row, keyed by a numeric id that the store
//! allocates per schema (see [`LocalStore::next_id`](crate::local_db_state::LocalStore::next_id)).
//! Parent/child relations are expressed as back-references (`bundle_id`, `song_id`,
//! `parent_id`, ...), so deleting a tree means walking those references from the root
//! down and removing children before their parents.
//!
//! # Identity
//!
//! - **id**: local and store-assigned as the highest id of the schema + 1, so ids freed
//!   by deleting the newest rows are handed out again. Never compared across trees.
//! - **uuid**: server-assigned, the only identity that survives a server update. Legacy
//!   rows may carry an empty uuid.
//! - **hash**: only meaningful on roots; fingerprint of the whole server-side tree.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A row type that lives in its own named LMDB database.
pub trait Record: Serialize + DeserializeOwned {
    /// Name of the LMDB database holding rows of this type.
    const SCHEMA: &'static str;

    fn id(&self) -> u64;
}

pub const SONG_BUNDLES: &str = "song_bundles";
pub const SONGS: &str = "songs";
pub const VERSES: &str = "verses";
pub const ABC_MELODIES: &str = "abc_melodies";
pub const ABC_SUB_MELODIES: &str = "abc_sub_melodies";
pub const SONG_METADATA: &str = "song_metadata";
pub const SONG_LISTS: &str = "song_lists";
pub const SONG_LIST_SONGS: &str = "song_list_songs";
pub const DOCUMENT_GROUPS: &str = "document_groups";
pub const DOCUMENTS: &str = "documents";
pub const SETTINGS: &str = "settings";

/// Every numeric-keyed schema, in creation order.
pub const RECORD_SCHEMAS: [&str; 10] = [
    SONG_BUNDLES,
    SONGS,
    VERSES,
    ABC_MELODIES,
    ABC_SUB_MELODIES,
    SONG_METADATA,
    SONG_LISTS,
    SONG_LIST_SONGS,
    DOCUMENT_GROUPS,
    DOCUMENTS,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongBundle {
    pub id: u64,
    pub uuid: String,
    pub hash: String,
    pub abbreviation: String,
    pub name: String,
    pub language: String,
    pub author: String,
    pub copyright: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Song {
    pub id: u64,
    pub bundle_id: u64,
    pub uuid: String,
    pub name: String,
    pub number: Option<u32>,
    pub language: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    /// Melody the user picked last. Always one of this song's own melodies.
    pub last_used_melody: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verse {
    pub id: u64,
    pub song_id: u64,
    pub uuid: String,
    pub name: String,
    pub content: String,
    pub language: String,
    pub index: i32,
    pub abc_lyrics: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbcMelody {
    pub id: u64,
    pub song_id: u64,
    pub uuid: String,
    pub name: String,
    pub melody: String,
}

/// Melody fragment for one verse. Belongs to both a melody and a verse of the same song.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbcSubMelody {
    pub id: u64,
    pub verse_id: u64,
    pub melody_id: u64,
    pub uuid: String,
    pub melody: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SongMetadataType {
    AlternativeTitle,
    Copyright,
    Author,
    Year,
    TextSource,
    ScriptureReference,
    Superscription,
}

impl SongMetadataType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "AlternativeTitle" => Some(SongMetadataType::AlternativeTitle),
            "Copyright" => Some(SongMetadataType::Copyright),
            "Author" => Some(SongMetadataType::Author),
            "Year" => Some(SongMetadataType::Year),
            "TextSource" => Some(SongMetadataType::TextSource),
            "ScriptureReference" => Some(SongMetadataType::ScriptureReference),
            "Superscription" => Some(SongMetadataType::Superscription),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongMetadata {
    pub id: u64,
    pub song_id: u64,
    pub kind: SongMetadataType,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongList {
    pub id: u64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// One entry of a user's song list. Holds user state that must survive bundle updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongListSong {
    pub id: u64,
    pub list_id: u64,
    pub index: u32,
    pub song_id: u64,
    pub selected_verses: Vec<u64>,
}

/// Document group. Root groups (`is_root`) are the bundles of the document domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentGroup {
    pub id: u64,
    pub parent_id: Option<u64>,
    pub uuid: String,
    pub hash: String,
    pub name: String,
    pub language: String,
    /// Number of documents in this group's whole subtree.
    pub size: u32,
    pub is_root: bool,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: u64,
    pub group_id: u64,
    pub uuid: String,
    pub name: String,
    pub content: String,
    pub language: String,
    pub index: i32,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Record for SongBundle {
    const SCHEMA: &'static str = SONG_BUNDLES;
    fn id(&self) -> u64 {
        self.id
    }
}

impl Record for Song {
    const SCHEMA: &'static str = SONGS;
    fn id(&self) -> u64 {
        self.id
    }
}

impl Record for Verse {
    const SCHEMA: &'static str = VERSES;
    fn id(&self) -> u64 {
        self.id
    }
}

impl Record for AbcMelody {
    const SCHEMA: &'static str = ABC_MELODIES;
    fn id(&self) -> u64 {
        self.id
    }
}

impl Record for AbcSubMelody {
    const SCHEMA: &'static str = ABC_SUB_MELODIES;
    fn id(&self) -> u64 {
        self.id
    }
}

impl Record for SongMetadata {
    const SCHEMA: &'static str = SONG_METADATA;
    fn id(&self) -> u64 {
        self.id
    }
}

impl Record for SongList {
    const SCHEMA: &'static str = SONG_LISTS;
    fn id(&self) -> u64 {
        self.id
    }
}

impl Record for SongListSong {
    const SCHEMA: &'static str = SONG_LIST_SONGS;
    fn id(&self) -> u64 {
        self.id
    }
}

impl Record for DocumentGroup {
    const SCHEMA: &'static str = DOCUMENT_GROUPS;
    fn id(&self) -> u64 {
        self.id
    }
}

impl Record for Document {
    const SCHEMA: &'static str = DOCUMENTS;
    fn id(&self) -> u64 {
        self.id
    }
}

/// Detached snapshot of a stored root (song bundle or root document group).
///
/// Cheap to clone and independent of the store, so it stays usable after the row it
/// describes has been deleted by an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleSummary {
    pub id: u64,
    pub uuid: String,
    pub name: String,
    pub language: String,
    pub hash: String,
    pub modified_at: DateTime<Utc>,
    /// Songs in a song bundle, documents in a document group's subtree.
    pub size: u32,
}

impl From<&SongBundle> for BundleSummary {
    fn from(bundle: &SongBundle) -> Self {
        BundleSummary {
            id: bundle.id,
            uuid: bundle.uuid.clone(),
            name: bundle.name.clone(),
            language: bundle.language.clone(),
            hash: bundle.hash.clone(),
            modified_at: bundle.modified_at,
            size: 0,
        }
    }
}

impl From<&DocumentGroup> for BundleSummary {
    fn from(group: &DocumentGroup) -> Self {
        BundleSummary {
            id: group.id,
            uuid: group.uuid.clone(),
            name: group.name.clone(),
            language: group.language.clone(),
            hash: group.hash.clone(),
            modified_at: group.modified_at,
            size: group.size,
        }
    }
}
