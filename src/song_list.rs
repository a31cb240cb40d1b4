//! The user's song lists. Entries reference songs by local id, so they need repair
//! whenever songs are replaced or removed.

use std::collections::HashSet;

use chrono::Utc;
use log::debug;

use crate::app_response::AppResponse;
use crate::local_db_model::{Song, SongList, SongListSong, Verse};
use crate::local_db_state::{LocalStore, WriteTxn};

pub const DEFAULT_SONG_LIST_NAME: &str = "Default";

pub fn create_if_not_exists(store: &LocalStore, name: &str) -> Result<SongList, AppResponse> {
    store.write(|txn| find_or_create(txn, name))
}

fn find_or_create(txn: &mut WriteTxn<'_>, name: &str) -> Result<SongList, AppResponse> {
    if let Some(existing) = txn
        .filter::<SongList, _>(|it| it.name == name)?
        .into_iter()
        .next()
    {
        return Ok(existing);
    }

    let now = Utc::now();
    let list = SongList {
        id: txn.next_id::<SongList>()?,
        name: name.to_string(),
        created_at: now,
        modified_at: now,
    };
    txn.create(&list)?;
    Ok(list)
}

/// Entries of the first song list, by index. Entries whose song is gone are left out.
pub fn list(store: &LocalStore) -> Result<Vec<SongListSong>, AppResponse> {
    store.read(|txn| {
        let Some(first) = txn.all::<SongList>()?.into_iter().next() else {
            return Ok(Vec::new());
        };

        let mut entries = Vec::new();
        for entry in txn.all::<SongListSong>()? {
            if entry.list_id == first.id && txn.get::<Song>(entry.song_id)?.is_some() {
                entries.push(entry);
            }
        }
        entries.sort_by_key(|it| (it.index, it.id));
        Ok(entries)
    })
}

/// Appends a song to the first list. The default list is created when there is none.
pub fn add_song(store: &LocalStore, song_id: u64) -> Result<SongListSong, AppResponse> {
    store.write(|txn| {
        if txn.get::<Song>(song_id)?.is_none() {
            return Err(AppResponse::NotFound(format!("Song {song_id} not found")));
        }

        let list = match txn.all::<SongList>()?.into_iter().next() {
            Some(first) => first,
            None => find_or_create(txn, DEFAULT_SONG_LIST_NAME)?,
        };
        let index = txn
            .filter::<SongListSong, _>(|it| it.list_id == list.id)?
            .len() as u32;

        let entry = SongListSong {
            id: txn.next_id::<SongListSong>()?,
            list_id: list.id,
            index,
            song_id,
            selected_verses: Vec::new(),
        };
        txn.create(&entry)?;
        Ok(entry)
    })
}

/// Replaces the verse selection of the entry at `index`. Verses of other songs are ignored.
pub fn save_selected_verses(
    store: &LocalStore,
    index: u32,
    verse_ids: &[u64],
) -> Result<(), AppResponse> {
    let Some(mut entry) = list(store)?.into_iter().find(|it| it.index == index) else {
        return Err(AppResponse::NotFound(format!("No song list entry at index {index}")));
    };

    store.write(|txn| {
        let mut verses: Vec<Verse> = txn.filter(|it: &Verse| {
            it.song_id == entry.song_id && verse_ids.contains(&it.id)
        })?;
        verses.sort_by_key(|it| it.index);

        entry.selected_verses = verses.iter().map(|it| it.id).collect();
        txn.save(&entry)
    })
}

/// Drops entries whose song no longer exists, forgets deleted verses and renumbers every
/// list to 0..n. Returns the number of removed entries.
pub fn clean_up_all(txn: &mut WriteTxn<'_>) -> Result<usize, AppResponse> {
    let song_ids: HashSet<u64> = txn.all::<Song>()?.iter().map(|it| it.id).collect();
    let verse_ids: HashSet<u64> = txn.all::<Verse>()?.iter().map(|it| it.id).collect();

    let mut removed = 0;
    for mut entry in txn.all::<SongListSong>()? {
        if !song_ids.contains(&entry.song_id) {
            txn.delete::<SongListSong>(entry.id)?;
            removed += 1;
            continue;
        }

        let selected = entry.selected_verses.len();
        entry.selected_verses.retain(|id| verse_ids.contains(id));
        if entry.selected_verses.len() != selected {
            txn.save(&entry)?;
        }
    }

    for list in txn.all::<SongList>()? {
        renumber(txn, list.id)?;
    }

    if removed > 0 {
        debug!("Removed {removed} song list entries without song");
    }
    Ok(removed)
}

fn renumber(txn: &mut WriteTxn<'_>, list_id: u64) -> Result<(), AppResponse> {
    let mut entries = txn.filter::<SongListSong, _>(|it| it.list_id == list_id)?;
    entries.sort_by_key(|it| (it.index, it.id));

    for (index, mut entry) in entries.into_iter().enumerate() {
        let index = index as u32;
        if entry.index != index {
            entry.index = index;
            txn.save(&entry)?;
        }
    }
    Ok(())
}
