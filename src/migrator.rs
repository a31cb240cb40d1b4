//! Carries user state from an old bundle version onto its freshly written replacement.
//!
//! Runs after the new tree is committed and before the old one is deleted, so both
//! versions are in the store and can be matched by uuid. Every song (and every song
//! list entry) is migrated in its own transaction: one failure is logged and counted,
//! the rest of the bundle still migrates.

use std::collections::HashMap;

use log::{debug, warn};
use serde::Serialize;

use crate::app_response::AppResponse;
use crate::converter::{SongBundleTree, SongTree};
use crate::local_db_model::{AbcMelody, Song, SongListSong, Verse};
use crate::local_db_state::LocalStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub migrated: usize,
    pub failed: usize,
}

impl MigrationReport {
    fn record(&mut self, outcome: Result<bool, AppResponse>, what: &str) {
        match outcome {
            Ok(true) => self.migrated += 1,
            Ok(false) => {}
            Err(e) => {
                warn!("Failed to migrate {what}: {e}");
                self.failed += 1;
            }
        }
    }

    pub fn merge(self, other: MigrationReport) -> MigrationReport {
        MigrationReport {
            migrated: self.migrated + other.migrated,
            failed: self.failed + other.failed,
        }
    }
}

/// Copies non-default melody selections onto the matching melodies of the new songs.
pub fn migrate_last_used_melodies(
    store: &LocalStore,
    tree: &SongBundleTree,
    default_melody_name: &str,
) -> Result<MigrationReport, AppResponse> {
    let previous = previous_songs(store, tree)?;
    let mut report = MigrationReport::default();

    for song in &tree.songs {
        let Some(old) = previous.get(song.song.uuid.as_str()) else {
            continue;
        };
        let outcome = migrate_last_used_melody(store, song, old, default_melody_name);
        report.record(outcome, &format!("melody selection of song {}", song.song.uuid));
    }

    debug!(
        "Migrated {} melody selections into bundle {} ({} failed)",
        report.migrated, tree.bundle.uuid, report.failed
    );
    Ok(report)
}

/// Old songs by uuid, outside the new bundle. The most recent one wins when a uuid occurs
/// in several old bundles.
fn previous_songs(
    store: &LocalStore,
    tree: &SongBundleTree,
) -> Result<HashMap<String, Song>, AppResponse> {
    let mut previous: HashMap<String, Song> = HashMap::new();
    let previous_songs =
        store.filter::<Song, _>(|it| it.bundle_id != tree.bundle.id && !it.uuid.is_empty())?;
    for song in previous_songs {
        match previous.get(&song.uuid) {
            Some(existing) if existing.id > song.id => {}
            _ => {
                previous.insert(song.uuid.clone(), song);
            }
        }
    }
    Ok(previous)
}

fn migrate_last_used_melody(
    store: &LocalStore,
    song: &SongTree,
    old: &Song,
    default_melody_name: &str,
) -> Result<bool, AppResponse> {
    let Some(old_melody_id) = old.last_used_melody else {
        return Ok(false);
    };

    store.write(|txn| {
        let Some(old_melody) = txn.get::<AbcMelody>(old_melody_id)? else {
            return Ok(false);
        };
        if old_melody.name == default_melody_name || old_melody.uuid.is_empty() {
            return Ok(false);
        }

        let Some(new_melody) = song.melodies.iter().find(|it| it.uuid == old_melody.uuid) else {
            return Ok(false);
        };

        let mut stored = txn.get::<Song>(song.song.id)?.ok_or_else(|| {
            AppResponse::NotFound(format!("Song {} not found after write", song.song.id))
        })?;
        stored.last_used_melody = Some(new_melody.id);
        txn.save(&stored)?;
        Ok(true)
    })
}

/// Re-points song list entries at the matching songs of the new bundle.
///
/// Verse selections are remapped by uuid; selected verses without counterpart are dropped.
pub fn replace_song_list_songs(
    store: &LocalStore,
    tree: &SongBundleTree,
) -> Result<MigrationReport, AppResponse> {
    let new_songs: HashMap<&str, &SongTree> = tree
        .songs
        .iter()
        .filter(|it| !it.song.uuid.is_empty())
        .map(|it| (it.song.uuid.as_str(), it))
        .collect();

    let mut report = MigrationReport::default();
    if new_songs.is_empty() {
        return Ok(report);
    }

    for entry in store.all::<SongListSong>()? {
        let outcome = store.write(|txn| {
            let Some(old_song) = txn.get::<Song>(entry.song_id)? else {
                return Ok(false);
            };
            if old_song.bundle_id == tree.bundle.id {
                return Ok(false);
            }
            let Some(new_song) = new_songs.get(old_song.uuid.as_str()) else {
                return Ok(false);
            };

            let mut selected_verses = Vec::new();
            for verse_id in &entry.selected_verses {
                let Some(old_verse) = txn.get::<Verse>(*verse_id)? else {
                    continue;
                };
                if old_verse.uuid.is_empty() {
                    continue;
                }
                let new_verse = new_song.verses.iter().find(|it| it.uuid == old_verse.uuid);
                if let Some(new_verse) = new_verse {
                    selected_verses.push(new_verse.id);
                }
            }

            let mut updated = entry.clone();
            updated.song_id = new_song.song.id;
            updated.selected_verses = selected_verses;
            txn.save(&updated)?;
            Ok(true)
        });
        report.record(outcome, &format!("song list entry {}", entry.id));
    }

    Ok(report)
}
