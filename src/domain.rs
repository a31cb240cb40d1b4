//! The two content domains as implementations of one tree-merge strategy.
//!
//! [`BundleRepository`](crate::repository::BundleRepository) owns the lifecycle (write new,
//! migrate, delete old, dedup); a [`BundleDomain`] supplies everything that depends on the
//! shape of the tree: conversion, writing, cascading delete and orphan detection.

use std::collections::{HashMap, HashSet};
use std::fmt::{Display, Formatter};

use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::app_response::AppResponse;
use crate::config::SyncConfig;
use crate::converter::{
    convert_document_group, convert_song_bundle, DocumentConversionState, DocumentGroupTree,
    SongBundleTree, SongConversionState,
};
use crate::local_db_model::{
    AbcMelody, AbcSubMelody, BundleSummary, Document, DocumentGroup, Song, SongBundle,
    SongMetadata, Verse,
};
use crate::local_db_state::{LocalStore, WriteTxn};
use crate::migrator::{migrate_last_used_melodies, replace_song_list_songs, MigrationReport};
use crate::preferences::{
    DOCUMENT_SEARCH_SELECTED_GROUPS, SONG_SEARCH_SELECTED_BUNDLES,
    SONG_STRING_SEARCH_SELECTED_BUNDLES,
};
use crate::server_model::{ServerDocumentGroup, ServerSongBundle};
use crate::song_list;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContentKind {
    Songs,
    Documents,
}

impl Display for ContentKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentKind::Songs => write!(f, "song bundle"),
            ContentKind::Documents => write!(f, "document group"),
        }
    }
}

pub trait BundleDomain: Send + Sync + 'static {
    type ServerTree: DeserializeOwned + Send + 'static;
    type Tree: Send;

    const KIND: ContentKind;
    /// Preference keys holding the uuids of roots selected for search.
    const SEARCH_SELECTION_KEYS: &'static [&'static str];

    fn server_uuid(tree: &Self::ServerTree) -> &str;

    fn server_name(tree: &Self::ServerTree) -> &str;

    /// A tree without any item is never imported.
    fn is_empty(tree: &Self::ServerTree) -> bool;

    /// Converts with ids allocated from the store's current counters.
    fn convert(
        store: &LocalStore,
        tree: Self::ServerTree,
        config: &SyncConfig,
    ) -> Result<Self::Tree, AppResponse>;

    fn summary(tree: &Self::Tree) -> BundleSummary;

    fn write(txn: &mut WriteTxn<'_>, tree: &Self::Tree) -> Result<(), AppResponse>;

    /// Every stored root, in id order.
    fn roots(store: &LocalStore) -> Result<Vec<BundleSummary>, AppResponse>;

    /// Deletes a root and everything below it, children before parents. Returns the
    /// number of items removed.
    fn delete_tree(txn: &mut WriteTxn<'_>, root_id: u64) -> Result<usize, AppResponse>;

    fn deleted_message(name: &str, items: usize) -> String;

    fn migrate_user_state(
        store: &LocalStore,
        tree: &Self::Tree,
        config: &SyncConfig,
    ) -> Result<MigrationReport, AppResponse>;

    /// Repairs user state that referenced deleted rows. Runs in the delete's transaction.
    fn after_delete(txn: &mut WriteTxn<'_>) -> Result<(), AppResponse>;

    /// Removes rows not reachable from a live root. Returns the number of removed rows.
    fn sweep_orphans(txn: &mut WriteTxn<'_>) -> Result<usize, AppResponse>;

    /// Returns false when the root does not exist.
    fn set_uuid(txn: &mut WriteTxn<'_>, root_id: u64, uuid: &str) -> Result<bool, AppResponse>;
}

pub struct Songs;

impl BundleDomain for Songs {
    type ServerTree = ServerSongBundle;
    type Tree = SongBundleTree;

    const KIND: ContentKind = ContentKind::Songs;
    const SEARCH_SELECTION_KEYS: &'static [&'static str] = &[
        SONG_SEARCH_SELECTED_BUNDLES,
        SONG_STRING_SEARCH_SELECTED_BUNDLES,
    ];

    fn server_uuid(tree: &ServerSongBundle) -> &str {
        &tree.uuid
    }

    fn server_name(tree: &ServerSongBundle) -> &str {
        &tree.name
    }

    fn is_empty(tree: &ServerSongBundle) -> bool {
        tree.songs.as_ref().map_or(true, |songs| songs.is_empty())
    }

    fn convert(
        store: &LocalStore,
        tree: ServerSongBundle,
        config: &SyncConfig,
    ) -> Result<SongBundleTree, AppResponse> {
        let mut state = SongConversionState::from_store(store)?;
        let converted = convert_song_bundle(tree, &mut state, &config.default_melody_name);

        if !state.dropped.is_empty() {
            info!(
                "Dropped {} unresolved sub melodies while converting {}",
                state.dropped.len(),
                converted.bundle.uuid
            );
        }
        debug!(
            "Converted song bundle {} with {} songs and {} verses",
            converted.bundle.uuid,
            converted.songs.len(),
            state.total_verses
        );
        Ok(converted)
    }

    fn summary(tree: &SongBundleTree) -> BundleSummary {
        BundleSummary {
            size: tree.songs.len() as u32,
            ..BundleSummary::from(&tree.bundle)
        }
    }

    fn write(txn: &mut WriteTxn<'_>, tree: &SongBundleTree) -> Result<(), AppResponse> {
        txn.create(&tree.bundle)?;
        for song in &tree.songs {
            txn.create(&song.song)?;
            for melody in &song.melodies {
                txn.create(melody)?;
            }
            for verse in &song.verses {
                txn.create(verse)?;
            }
            for sub_melody in &song.sub_melodies {
                txn.create(sub_melody)?;
            }
            for metadata in &song.metadata {
                txn.create(metadata)?;
            }
        }
        Ok(())
    }

    fn roots(store: &LocalStore) -> Result<Vec<BundleSummary>, AppResponse> {
        store.read(|txn| {
            let mut song_counts: HashMap<u64, u32> = HashMap::new();
            for song in txn.all::<Song>()? {
                *song_counts.entry(song.bundle_id).or_default() += 1;
            }

            Ok(txn
                .all::<SongBundle>()?
                .iter()
                .map(|bundle| BundleSummary {
                    size: song_counts.get(&bundle.id).copied().unwrap_or(0),
                    ..BundleSummary::from(bundle)
                })
                .collect())
        })
    }

    fn delete_tree(txn: &mut WriteTxn<'_>, root_id: u64) -> Result<usize, AppResponse> {
        if txn.get::<SongBundle>(root_id)?.is_none() {
            return Err(AppResponse::NotFound(format!("Song bundle {root_id} not found")));
        }

        let song_ids: HashSet<u64> = txn
            .filter::<Song, _>(|it| it.bundle_id == root_id)?
            .iter()
            .map(|it| it.id)
            .collect();
        let verse_ids: HashSet<u64> = txn
            .filter::<Verse, _>(|it| song_ids.contains(&it.song_id))?
            .iter()
            .map(|it| it.id)
            .collect();
        let melody_ids: HashSet<u64> = txn
            .filter::<AbcMelody, _>(|it| song_ids.contains(&it.song_id))?
            .iter()
            .map(|it| it.id)
            .collect();
        let sub_melodies = txn.filter::<AbcSubMelody, _>(|it| {
            verse_ids.contains(&it.verse_id) || melody_ids.contains(&it.melody_id)
        })?;
        let metadata = txn.filter::<SongMetadata, _>(|it| song_ids.contains(&it.song_id))?;

        for sub_melody in sub_melodies {
            txn.delete::<AbcSubMelody>(sub_melody.id)?;
        }
        for item in metadata {
            txn.delete::<SongMetadata>(item.id)?;
        }
        for id in &verse_ids {
            txn.delete::<Verse>(*id)?;
        }
        for id in &melody_ids {
            txn.delete::<AbcMelody>(*id)?;
        }
        for id in &song_ids {
            txn.delete::<Song>(*id)?;
        }
        txn.delete::<SongBundle>(root_id)?;

        Ok(song_ids.len())
    }

    fn deleted_message(name: &str, items: usize) -> String {
        format!("Deleted all {items} songs for {name}")
    }

    fn migrate_user_state(
        store: &LocalStore,
        tree: &SongBundleTree,
        config: &SyncConfig,
    ) -> Result<MigrationReport, AppResponse> {
        let melodies = migrate_last_used_melodies(store, tree, &config.default_melody_name)?;
        let song_lists = replace_song_list_songs(store, tree)?;
        Ok(melodies.merge(song_lists))
    }

    fn after_delete(txn: &mut WriteTxn<'_>) -> Result<(), AppResponse> {
        song_list::clean_up_all(txn).map(|_| ())
    }

    fn sweep_orphans(txn: &mut WriteTxn<'_>) -> Result<usize, AppResponse> {
        let bundle_ids: HashSet<u64> = txn.all::<SongBundle>()?.iter().map(|it| it.id).collect();
        let mut removed = 0;

        let mut songs = Vec::new();
        for song in txn.all::<Song>()? {
            if bundle_ids.contains(&song.bundle_id) {
                songs.push(song);
            } else {
                txn.delete::<Song>(song.id)?;
                removed += 1;
            }
        }
        let song_ids: HashSet<u64> = songs.iter().map(|it| it.id).collect();

        let mut verse_ids = HashSet::new();
        for verse in txn.all::<Verse>()? {
            if song_ids.contains(&verse.song_id) {
                verse_ids.insert(verse.id);
            } else {
                txn.delete::<Verse>(verse.id)?;
                removed += 1;
            }
        }

        // melody id -> owning song
        let mut melody_songs = HashMap::new();
        for melody in txn.all::<AbcMelody>()? {
            if song_ids.contains(&melody.song_id) {
                melody_songs.insert(melody.id, melody.song_id);
            } else {
                txn.delete::<AbcMelody>(melody.id)?;
                removed += 1;
            }
        }

        for sub_melody in txn.all::<AbcSubMelody>()? {
            if !verse_ids.contains(&sub_melody.verse_id)
                || !melody_songs.contains_key(&sub_melody.melody_id)
            {
                txn.delete::<AbcSubMelody>(sub_melody.id)?;
                removed += 1;
            }
        }

        for metadata in txn.all::<SongMetadata>()? {
            if !song_ids.contains(&metadata.song_id) {
                txn.delete::<SongMetadata>(metadata.id)?;
                removed += 1;
            }
        }

        for mut song in songs {
            let Some(melody_id) = song.last_used_melody else {
                continue;
            };
            if melody_songs.get(&melody_id) != Some(&song.id) {
                song.last_used_melody = None;
                txn.save(&song)?;
            }
        }

        removed += song_list::clean_up_all(txn)?;
        Ok(removed)
    }

    fn set_uuid(txn: &mut WriteTxn<'_>, root_id: u64, uuid: &str) -> Result<bool, AppResponse> {
        let Some(mut bundle) = txn.get::<SongBundle>(root_id)? else {
            return Ok(false);
        };
        bundle.uuid = uuid.to_string();
        txn.save(&bundle)?;
        Ok(true)
    }
}

pub struct Documents;

impl Documents {
    fn write_group(txn: &mut WriteTxn<'_>, tree: &DocumentGroupTree) -> Result<(), AppResponse> {
        txn.create(&tree.group)?;
        for child in &tree.groups {
            Self::write_group(txn, child)?;
        }
        for document in &tree.items {
            txn.create(document)?;
        }
        Ok(())
    }

    fn delete_group(
        txn: &mut WriteTxn<'_>,
        group_id: u64,
        children: &HashMap<u64, Vec<u64>>,
        documents: &HashMap<u64, Vec<u64>>,
    ) -> Result<usize, AppResponse> {
        let mut deleted = 0;
        for child in children.get(&group_id).into_iter().flatten() {
            deleted += Self::delete_group(txn, *child, children, documents)?;
        }
        for document in documents.get(&group_id).into_iter().flatten() {
            txn.delete::<Document>(*document)?;
            deleted += 1;
        }
        txn.delete::<DocumentGroup>(group_id)?;
        Ok(deleted)
    }
}

impl BundleDomain for Documents {
    type ServerTree = ServerDocumentGroup;
    type Tree = DocumentGroupTree;

    const KIND: ContentKind = ContentKind::Documents;
    const SEARCH_SELECTION_KEYS: &'static [&'static str] = &[DOCUMENT_SEARCH_SELECTED_GROUPS];

    fn server_uuid(tree: &ServerDocumentGroup) -> &str {
        &tree.uuid
    }

    fn server_name(tree: &ServerDocumentGroup) -> &str {
        &tree.name
    }

    fn is_empty(tree: &ServerDocumentGroup) -> bool {
        let no_groups = tree.groups.as_ref().map_or(true, |groups| groups.is_empty());
        let no_items = tree.items.as_ref().map_or(true, |items| items.is_empty());
        no_groups && no_items
    }

    fn convert(
        store: &LocalStore,
        tree: ServerDocumentGroup,
        _config: &SyncConfig,
    ) -> Result<DocumentGroupTree, AppResponse> {
        let mut state = DocumentConversionState::from_store(store)?;
        let converted = convert_document_group(tree, &mut state, None, true);
        debug!(
            "Converted document group {} with {} groups and {} documents",
            converted.group.uuid,
            converted.group_count(),
            state.total_documents
        );
        Ok(converted)
    }

    fn summary(tree: &DocumentGroupTree) -> BundleSummary {
        BundleSummary::from(&tree.group)
    }

    fn write(txn: &mut WriteTxn<'_>, tree: &DocumentGroupTree) -> Result<(), AppResponse> {
        Self::write_group(txn, tree)
    }

    fn roots(store: &LocalStore) -> Result<Vec<BundleSummary>, AppResponse> {
        Ok(store
            .filter::<DocumentGroup, _>(|it| it.is_root)?
            .iter()
            .map(BundleSummary::from)
            .collect())
    }

    fn delete_tree(txn: &mut WriteTxn<'_>, root_id: u64) -> Result<usize, AppResponse> {
        if txn.get::<DocumentGroup>(root_id)?.is_none() {
            return Err(AppResponse::NotFound(format!("Document group {root_id} not found")));
        }

        let mut children: HashMap<u64, Vec<u64>> = HashMap::new();
        for group in txn.all::<DocumentGroup>()? {
            if let Some(parent_id) = group.parent_id {
                children.entry(parent_id).or_default().push(group.id);
            }
        }
        let mut documents: HashMap<u64, Vec<u64>> = HashMap::new();
        for document in txn.all::<Document>()? {
            documents.entry(document.group_id).or_default().push(document.id);
        }

        Self::delete_group(txn, root_id, &children, &documents)
    }

    fn deleted_message(name: &str, _items: usize) -> String {
        format!("Deleted all for {name}")
    }

    fn migrate_user_state(
        _store: &LocalStore,
        _tree: &DocumentGroupTree,
        _config: &SyncConfig,
    ) -> Result<MigrationReport, AppResponse> {
        Ok(MigrationReport::default())
    }

    fn after_delete(_txn: &mut WriteTxn<'_>) -> Result<(), AppResponse> {
        Ok(())
    }

    fn sweep_orphans(txn: &mut WriteTxn<'_>) -> Result<usize, AppResponse> {
        let groups = txn.all::<DocumentGroup>()?;

        let mut children: HashMap<u64, Vec<u64>> = HashMap::new();
        for group in &groups {
            if let Some(parent_id) = group.parent_id {
                children.entry(parent_id).or_default().push(group.id);
            }
        }

        let mut reachable = HashSet::new();
        let mut pending: Vec<u64> = groups
            .iter()
            .filter(|it| it.is_root)
            .map(|it| it.id)
            .collect();
        while let Some(id) = pending.pop() {
            if reachable.insert(id) {
                pending.extend(children.get(&id).into_iter().flatten().copied());
            }
        }

        let mut removed = 0;
        for document in txn.all::<Document>()? {
            if !reachable.contains(&document.group_id) {
                txn.delete::<Document>(document.id)?;
                removed += 1;
            }
        }
        for group in groups {
            if !reachable.contains(&group.id) {
                txn.delete::<DocumentGroup>(group.id)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn set_uuid(txn: &mut WriteTxn<'_>, root_id: u64, uuid: &str) -> Result<bool, AppResponse> {
        let Some(mut group) = txn.get::<DocumentGroup>(root_id)? else {
            return Ok(false);
        };
        group.uuid = uuid.to_string();
        txn.save(&group)?;
        Ok(true)
    }
}
