//! Server tree → local tree conversion.
//!
//! Conversion is a single recursive pass that allocates every local id from an explicit
//! conversion state. The caller seeds the state from the store's allocators, the pass
//! advances it, and every recursive call sees the counters already advanced by the
//! siblings converted before it. Nothing here touches the store, so the same input and
//! starting counters always give the same tree.

use std::cmp::Ordering;

use log::warn;
use serde::Serialize;

use crate::app_response::AppResponse;
use crate::local_db_model::{
    AbcMelody, AbcSubMelody, Document, DocumentGroup, Song, SongBundle, SongMetadata,
    SongMetadataType, Verse,
};
use crate::local_db_state::LocalStore;
use crate::server_model::{
    ServerDocument, ServerDocumentGroup, ServerSong, ServerSongBundle, ServerVerse,
};

/// Melody name prefixes, in the order melodies are listed after the default one.
const MELODY_ORDINALS: [&[&str]; 5] = [
    &["Eerste", "First"],
    &["Tweede", "Second"],
    &["Derde", "Third"],
    &["Vierde", "Fourth", "Forth"],
    &["Vyfde", "Vijfde", "Fifth"],
];

#[derive(Debug, Clone, PartialEq)]
pub struct SongTree {
    pub song: Song,
    pub verses: Vec<Verse>,
    pub melodies: Vec<AbcMelody>,
    pub sub_melodies: Vec<AbcSubMelody>,
    pub metadata: Vec<SongMetadata>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SongBundleTree {
    pub bundle: SongBundle,
    pub songs: Vec<SongTree>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentGroupTree {
    pub group: DocumentGroup,
    pub groups: Vec<DocumentGroupTree>,
    pub items: Vec<Document>,
}

impl DocumentGroupTree {
    pub fn group_count(&self) -> usize {
        1 + self.groups.iter().map(|it| it.group_count()).sum::<usize>()
    }
}

/// A sub-melody that was left out because one of its references did not resolve.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DroppedReference {
    pub song_uuid: String,
    pub sub_melody_uuid: String,
    pub parent_uuid: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SongConversionState {
    pub bundle_id: u64,
    pub song_id: u64,
    pub verse_id: u64,
    pub melody_id: u64,
    pub sub_melody_id: u64,
    pub metadata_id: u64,
    pub total_verses: usize,
    pub dropped: Vec<DroppedReference>,
}

impl SongConversionState {
    pub fn starting_at(first_id: u64) -> Self {
        SongConversionState {
            bundle_id: first_id,
            song_id: first_id,
            verse_id: first_id,
            melody_id: first_id,
            sub_melody_id: first_id,
            metadata_id: first_id,
            total_verses: 0,
            dropped: Vec::new(),
        }
    }

    /// Seeds every counter with the store's next free id for that schema.
    pub fn from_store(store: &LocalStore) -> Result<Self, AppResponse> {
        store.read(|txn| {
            Ok(SongConversionState {
                bundle_id: txn.next_id::<SongBundle>()?,
                song_id: txn.next_id::<Song>()?,
                verse_id: txn.next_id::<Verse>()?,
                melody_id: txn.next_id::<AbcMelody>()?,
                sub_melody_id: txn.next_id::<AbcSubMelody>()?,
                metadata_id: txn.next_id::<SongMetadata>()?,
                total_verses: 0,
                dropped: Vec::new(),
            })
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentConversionState {
    pub group_id: u64,
    pub document_id: u64,
    pub total_documents: usize,
}

impl DocumentConversionState {
    pub fn starting_at(first_id: u64) -> Self {
        DocumentConversionState {
            group_id: first_id,
            document_id: first_id,
            total_documents: 0,
        }
    }

    pub fn from_store(store: &LocalStore) -> Result<Self, AppResponse> {
        store.read(|txn| {
            Ok(DocumentConversionState {
                group_id: txn.next_id::<DocumentGroup>()?,
                document_id: txn.next_id::<Document>()?,
                total_documents: 0,
            })
        })
    }
}

fn take(counter: &mut u64) -> u64 {
    let id = *counter;
    *counter += 1;
    id
}

/// Case-insensitive name order with an exact-match tie break, so the order is total.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

fn melody_rank(name: &str, default_melody_name: &str) -> usize {
    if name == default_melody_name {
        return 0;
    }
    MELODY_ORDINALS
        .iter()
        .position(|prefixes| prefixes.iter().any(|prefix| name.starts_with(prefix)))
        .map_or(MELODY_ORDINALS.len() + 1, |position| position + 1)
}

/// Default melody first, then "First", "Second", ... melodies, then the rest by name.
pub fn compare_melody_names(a: &str, b: &str, default_melody_name: &str) -> Ordering {
    melody_rank(a, default_melody_name)
        .cmp(&melody_rank(b, default_melody_name))
        .then_with(|| compare_names(a, b))
}

pub fn convert_song_bundle(
    bundle: ServerSongBundle,
    state: &mut SongConversionState,
    default_melody_name: &str,
) -> SongBundleTree {
    let bundle_id = take(&mut state.bundle_id);

    let mut server_songs = bundle.songs.unwrap_or_default();
    server_songs.sort_by_key(|it| it.id);

    let songs = server_songs
        .into_iter()
        .map(|song| convert_song(song, bundle_id, state, default_melody_name))
        .collect();

    SongBundleTree {
        bundle: SongBundle {
            id: bundle_id,
            uuid: bundle.uuid,
            hash: bundle.hash.unwrap_or_default(),
            abbreviation: bundle.abbreviation,
            name: bundle.name,
            language: bundle.language,
            author: bundle.author,
            copyright: bundle.copyright,
            created_at: bundle.created_at,
            modified_at: bundle.modified_at,
        },
        songs,
    }
}

fn convert_song(
    song: ServerSong,
    bundle_id: u64,
    state: &mut SongConversionState,
    default_melody_name: &str,
) -> SongTree {
    let song_id = take(&mut state.song_id);

    let mut server_melodies = song.abc_melodies.unwrap_or_default();
    server_melodies.sort_by(|a, b| compare_melody_names(&a.name, &b.name, default_melody_name));
    let melodies: Vec<AbcMelody> = server_melodies
        .into_iter()
        .map(|melody| AbcMelody {
            id: take(&mut state.melody_id),
            song_id,
            uuid: melody.uuid,
            name: melody.name,
            melody: melody.melody,
        })
        .collect();

    let mut server_verses = song.verses.unwrap_or_default();
    server_verses.sort_by_key(|it| it.index);

    // Sub-melodies are resolved once every melody and verse of the song has an id.
    let mut pending_sub_melodies = Vec::new();
    let verses: Vec<Verse> = server_verses
        .into_iter()
        .enumerate()
        .map(|(position, verse)| {
            let ServerVerse {
                uuid,
                name,
                content,
                language,
                index,
                abc_lyrics,
                abc_melodies,
                ..
            } = verse;
            pending_sub_melodies.extend(
                abc_melodies
                    .unwrap_or_default()
                    .into_iter()
                    .map(|sub| (position, sub)),
            );
            Verse {
                id: take(&mut state.verse_id),
                song_id,
                uuid,
                name,
                content,
                language,
                index,
                abc_lyrics,
            }
        })
        .collect();

    let mut sub_melodies = Vec::new();
    for (position, sub) in pending_sub_melodies {
        let parent = melodies
            .iter()
            .find(|it| !sub.parent.uuid.is_empty() && it.uuid == sub.parent.uuid);
        let verse = verses.get(position);

        match (parent, verse) {
            (Some(parent), Some(verse)) => sub_melodies.push(AbcSubMelody {
                id: take(&mut state.sub_melody_id),
                verse_id: verse.id,
                melody_id: parent.id,
                uuid: sub.uuid,
                melody: sub.melody,
            }),
            _ => {
                warn!(
                    "Dropping sub melody {} of song {}: parent melody {} not found",
                    sub.uuid, song.uuid, sub.parent.uuid
                );
                state.dropped.push(DroppedReference {
                    song_uuid: song.uuid.clone(),
                    sub_melody_uuid: sub.uuid,
                    parent_uuid: sub.parent.uuid,
                });
            }
        }
    }

    let mut server_metadata = song.metadata.unwrap_or_default();
    server_metadata.sort_by_key(|it| it.id);
    let metadata = server_metadata
        .into_iter()
        .filter_map(|it| {
            let kind = SongMetadataType::parse(&it.kind)?;
            Some(SongMetadata {
                id: take(&mut state.metadata_id),
                song_id,
                kind,
                value: it.value,
            })
        })
        .collect();

    state.total_verses += verses.len();

    SongTree {
        song: Song {
            id: song_id,
            bundle_id,
            uuid: song.uuid,
            name: song.name,
            number: song.number,
            language: song.language,
            created_at: song.created_at,
            modified_at: song.modified_at,
            last_used_melody: None,
        },
        verses,
        melodies,
        sub_melodies,
        metadata,
    }
}

/// Converts a document group and its whole subtree.
///
/// `size` of every group is the number of documents in its subtree, computed on the
/// way back up. `state.total_documents` grows by the number of documents converted.
pub fn convert_document_group(
    group: ServerDocumentGroup,
    state: &mut DocumentConversionState,
    parent_id: Option<u64>,
    is_root: bool,
) -> DocumentGroupTree {
    let group_id = take(&mut state.group_id);
    let documents_before = state.total_documents;

    let mut server_groups = group.groups.unwrap_or_default();
    server_groups.sort_by(|a, b| compare_names(&a.name, &b.name));
    let groups: Vec<DocumentGroupTree> = server_groups
        .into_iter()
        .map(|child| convert_document_group(child, state, Some(group_id), false))
        .collect();

    let mut server_items = group.items.unwrap_or_default();
    server_items.sort_by_key(|it| it.index);
    let items: Vec<Document> = server_items
        .into_iter()
        .map(|document| convert_document(document, group_id, state))
        .collect();

    state.total_documents += items.len();
    let size = (state.total_documents - documents_before) as u32;

    DocumentGroupTree {
        group: DocumentGroup {
            id: group_id,
            parent_id,
            uuid: group.uuid,
            hash: group.hash.unwrap_or_default(),
            name: group.name,
            language: group.language,
            size,
            is_root,
            created_at: group.created_at,
            modified_at: group.modified_at,
        },
        groups,
        items,
    }
}

fn convert_document(
    document: ServerDocument,
    group_id: u64,
    state: &mut DocumentConversionState,
) -> Document {
    Document {
        id: take(&mut state.document_id),
        group_id,
        uuid: document.uuid,
        name: document.name,
        content: document.content,
        language: document.language,
        index: document.index,
        created_at: document.created_at,
        modified_at: document.modified_at,
    }
}
