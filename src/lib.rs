//! # Bundle Sync Core
//!
//! Merge engine that keeps server-published song bundles and document groups in a local
//! LMDB store, built for FFI integration with mobile applications.
//!
//! ## Features
//!
//! - **Tree conversion**: server JSON trees become local rows with store-allocated ids
//! - **Replace-on-update**: the new version is written before the old one is deleted
//! - **User state migration**: melody selections and song lists survive bundle updates
//! - **Maintenance**: duplicate removal, orphan sweep and legacy uuid backfill
//! - **Auto sync**: interval-gated, network-gated update runs over all stored roots
//!
//! ## Quick Start
//!
//! ```no_run
//! use bundle_sync_core::{create_store, free_response, import_song_bundle};
//! use std::ffi::CString;
//!
//! let name = CString::new("hymnbook").unwrap();
//! let handle = create_store(name.as_ptr(), std::ptr::null());
//!
//! let bundle = CString::new(
//!     r#"{"uuid":"b-1","name":"Hymns","createdAt":"2024-01-01T00:00:00Z",
//!         "modifiedAt":"2024-01-01T00:00:00Z","songs":[]}"#,
//! ).unwrap();
//! let result = import_song_bundle(handle, bundle.as_ptr());
//! free_response(result as *mut _);
//! ```
//!
//! ## FFI Functions
//!
//! Every function except [`create_store`], [`destroy_store`] and [`free_response`] returns a JSON
//! [`OperationResult`] that must be released with [`free_response`].
//!
//! - [`create_store`] - Open the store and its preferences
//! - [`import_song_bundle`] / [`import_document_group`] - Store a new root
//! - [`update_song_bundle`] / [`update_document_group`] - Replace a stored root
//! - [`delete_song_bundle`] / [`delete_document_group`] - Cascading delete
//! - [`get_song_bundles`] / [`get_document_roots`] - List stored roots
//! - [`check_song_updates`] / [`check_document_updates`] - Compare against a manifest
//! - [`run_maintenance`] - Uuid backfill, dedup and orphan sweep for both domains
//! - [`close_store`] - Explicit connection cleanup
//! - [`destroy_store`] - Release the handle returned by [`create_store`]

pub mod app_response;
pub mod auto_sync;
pub mod config;
pub mod converter;
pub mod domain;
pub mod local_db_model;
pub mod local_db_state;
pub mod migrator;
pub mod preferences;
pub mod repository;
pub mod server_model;
pub mod song_list;
pub mod update_detector;

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::sync::Arc;

use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use crate::app_response::{AppResponse, OperationResult};
pub use crate::config::SyncConfig;
pub use crate::domain::{BundleDomain, ContentKind, Documents, Songs};
pub use crate::local_db_model::BundleSummary;
pub use crate::local_db_state::LocalStore;
pub use crate::repository::BundleRepository;

use crate::preferences::{Preferences, StorePreferences};
use crate::server_model::{ManifestEntry, ServerDocumentGroup, ServerSongBundle};

/// Everything an FFI caller holds on to between calls.
pub struct SyncHandle {
    store: Arc<LocalStore>,
    preferences: Arc<dyn Preferences>,
    config: SyncConfig,
}

impl SyncHandle {
    pub fn open(name: String, config: SyncConfig) -> Result<Self, AppResponse> {
        let store = Arc::new(LocalStore::init(name, &config)?);
        let preferences: Arc<dyn Preferences> = Arc::new(StorePreferences::new(store.clone()));
        Ok(SyncHandle {
            store,
            preferences,
            config,
        })
    }

    pub fn songs(&self) -> BundleRepository<Songs> {
        self.repository()
    }

    pub fn documents(&self) -> BundleRepository<Documents> {
        self.repository()
    }

    fn repository<D: BundleDomain>(&self) -> BundleRepository<D> {
        BundleRepository::new(
            self.store.clone(),
            self.preferences.clone(),
            self.config.clone(),
        )
    }
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct MaintenanceReport {
    uuids_assigned: usize,
    duplicates_removed: Vec<BundleSummary>,
    orphans_removed: usize,
}

impl MaintenanceReport {
    fn run<D: BundleDomain>(
        &mut self,
        repository: &BundleRepository<D>,
        manifest: &[ManifestEntry],
    ) -> Result<(), AppResponse> {
        if !manifest.is_empty() {
            self.uuids_assigned += repository
                .backfill_uuids(manifest)
                .into_result()?
                .unwrap_or(0);
        }
        self.duplicates_removed
            .extend(repository.remove_duplicates().into_result()?.unwrap_or_default());
        self.orphans_removed += repository.sweep_orphans().into_result()?.unwrap_or(0);
        Ok(())
    }
}

/// Opens (or creates) the store `<name>.lmdb`.
///
/// `config_json` may be null or `"{}"`; missing fields take their defaults.
///
/// # Returns
///
/// A pointer to the [`SyncHandle`], or null when the name is invalid or the store
/// cannot be opened.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn create_store(name: *const c_char, config_json: *const c_char) -> *mut SyncHandle {
    if name.is_null() {
        warn!("Null name pointer passed to create_store");
        return std::ptr::null_mut();
    }

    let name_str = match unsafe { CStr::from_ptr(name).to_str() } {
        Ok(s) => s.to_string(),
        Err(e) => {
            warn!("Invalid UTF-8 in name parameter: {e}");
            return std::ptr::null_mut();
        }
    };

    let config = if config_json.is_null() {
        SyncConfig::default()
    } else {
        let parsed = unsafe { CStr::from_ptr(config_json).to_str() }
            .map_err(|e| AppResponse::BadRequest(format!("Invalid UTF-8 in config: {e}")))
            .and_then(SyncConfig::from_json);
        match parsed {
            Ok(config) => config,
            Err(e) => {
                warn!("❌ Invalid store configuration: {e}");
                return std::ptr::null_mut();
            }
        }
    };

    info!("Opening store at: {name_str}.lmdb");
    match SyncHandle::open(name_str, config) {
        Ok(handle) => {
            info!("✅ Store initialized successfully");
            Box::into_raw(Box::new(handle))
        }
        Err(e) => {
            warn!("❌ Failed to initialize store: {e}");
            std::ptr::null_mut()
        }
    }
}

/// Imports a song bundle given as server JSON. Fails if its uuid is already stored.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn import_song_bundle(
    handle: *mut SyncHandle,
    json_ptr: *const c_char,
) -> *const c_char {
    let handle = match handle_ref(handle, "import_song_bundle") {
        Ok(handle) => handle,
        Err(error_ptr) => return error_ptr,
    };
    let bundle: ServerSongBundle = match parse_json(json_ptr, "song bundle") {
        Ok(bundle) => bundle,
        Err(error_ptr) => return error_ptr,
    };
    result_to_c_string(&handle.songs().import(bundle))
}

/// Replaces the stored song bundle with the same uuid by the given server version.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn update_song_bundle(
    handle: *mut SyncHandle,
    json_ptr: *const c_char,
) -> *const c_char {
    let handle = match handle_ref(handle, "update_song_bundle") {
        Ok(handle) => handle,
        Err(error_ptr) => return error_ptr,
    };
    let bundle: ServerSongBundle = match parse_json(json_ptr, "song bundle") {
        Ok(bundle) => bundle,
        Err(error_ptr) => return error_ptr,
    };
    result_to_c_string(&handle.songs().update(bundle))
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn delete_song_bundle(handle: *mut SyncHandle, id: u64) -> *const c_char {
    match handle_ref(handle, "delete_song_bundle") {
        Ok(handle) => result_to_c_string(&handle.songs().delete(id)),
        Err(error_ptr) => error_ptr,
    }
}

/// Imports a root document group given as server JSON.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn import_document_group(
    handle: *mut SyncHandle,
    json_ptr: *const c_char,
) -> *const c_char {
    let handle = match handle_ref(handle, "import_document_group") {
        Ok(handle) => handle,
        Err(error_ptr) => return error_ptr,
    };
    let group: ServerDocumentGroup = match parse_json(json_ptr, "document group") {
        Ok(group) => group,
        Err(error_ptr) => return error_ptr,
    };
    result_to_c_string(&handle.documents().import(group))
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn update_document_group(
    handle: *mut SyncHandle,
    json_ptr: *const c_char,
) -> *const c_char {
    let handle = match handle_ref(handle, "update_document_group") {
        Ok(handle) => handle,
        Err(error_ptr) => return error_ptr,
    };
    let group: ServerDocumentGroup = match parse_json(json_ptr, "document group") {
        Ok(group) => group,
        Err(error_ptr) => return error_ptr,
    };
    result_to_c_string(&handle.documents().update(group))
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn delete_document_group(handle: *mut SyncHandle, id: u64) -> *const c_char {
    match handle_ref(handle, "delete_document_group") {
        Ok(handle) => result_to_c_string(&handle.documents().delete(id)),
        Err(error_ptr) => error_ptr,
    }
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn get_song_bundles(handle: *mut SyncHandle) -> *const c_char {
    match handle_ref(handle, "get_song_bundles") {
        Ok(handle) => result_to_c_string(&handle.songs().local_bundles()),
        Err(error_ptr) => error_ptr,
    }
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn get_document_roots(handle: *mut SyncHandle) -> *const c_char {
    match handle_ref(handle, "get_document_roots") {
        Ok(handle) => result_to_c_string(&handle.documents().local_bundles()),
        Err(error_ptr) => error_ptr,
    }
}

/// Lists the stored song bundles that `manifest_json` (`[{uuid, hash, ...}]`) has
/// newer versions of, using the configured update policy.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn check_song_updates(
    handle: *mut SyncHandle,
    manifest_json: *const c_char,
) -> *const c_char {
    let handle = match handle_ref(handle, "check_song_updates") {
        Ok(handle) => handle,
        Err(error_ptr) => return error_ptr,
    };
    let manifest: Vec<ManifestEntry> = match parse_json(manifest_json, "manifest") {
        Ok(manifest) => manifest,
        Err(error_ptr) => return error_ptr,
    };
    result_to_c_string(&handle.songs().check_updates(&manifest))
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn check_document_updates(
    handle: *mut SyncHandle,
    manifest_json: *const c_char,
) -> *const c_char {
    let handle = match handle_ref(handle, "check_document_updates") {
        Ok(handle) => handle,
        Err(error_ptr) => return error_ptr,
    };
    let manifest: Vec<ManifestEntry> = match parse_json(manifest_json, "manifest") {
        Ok(manifest) => manifest,
        Err(error_ptr) => return error_ptr,
    };
    result_to_c_string(&handle.documents().check_updates(&manifest))
}

/// Runs the maintenance passes of both domains.
///
/// `manifest_json` is optional (null skips the uuid backfill). Legacy roots are given
/// their uuid first, so the following duplicate removal can see them.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn run_maintenance(
    handle: *mut SyncHandle,
    manifest_json: *const c_char,
) -> *const c_char {
    let handle = match handle_ref(handle, "run_maintenance") {
        Ok(handle) => handle,
        Err(error_ptr) => return error_ptr,
    };
    let manifest: Vec<ManifestEntry> = if manifest_json.is_null() {
        Vec::new()
    } else {
        match parse_json(manifest_json, "manifest") {
            Ok(manifest) => manifest,
            Err(error_ptr) => return error_ptr,
        }
    };

    let mut report = MaintenanceReport::default();
    let outcome = report
        .run(&handle.songs(), &manifest)
        .and_then(|_| report.run(&handle.documents(), &manifest));

    match outcome {
        Ok(()) => result_to_c_string(&OperationResult::with_data("Maintenance done", report)),
        Err(e) => {
            warn!("❌ Maintenance failed: {e}");
            result_to_c_string(&OperationResult::<()>::from_error("Maintenance failed", e))
        }
    }
}

/// Flushes and closes the store. The handle stays valid but every later call fails
/// with "not connected".
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn close_store(handle: *mut SyncHandle) -> *const c_char {
    let handle = match handle_ref(handle, "close_store") {
        Ok(handle) => handle,
        Err(error_ptr) => return error_ptr,
    };

    match handle.store.close_database() {
        Ok(()) => result_to_c_string(&OperationResult::<()>::success(
            "Store connection closed successfully",
        )),
        Err(e) => {
            result_to_c_string(&OperationResult::<()>::from_error("Could not close store", e))
        }
    }
}

/// Closes the store if still open and frees the handle. The pointer must not be used
/// afterwards. Null is ignored.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn destroy_store(handle: *mut SyncHandle) {
    if handle.is_null() {
        return;
    }

    let handle = unsafe { Box::from_raw(handle) };
    if let Err(e) = handle.store.close_database() {
        warn!("Failed to close store while destroying handle: {e}");
    }
    info!("Store handle released");
}

/// Releases a string returned by any of the functions above.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn free_response(ptr: *mut c_char) {
    if ptr.is_null() {
        return;
    }
    drop(unsafe { CString::from_raw(ptr) });
}

fn handle_ref<'a>(
    handle: *mut SyncHandle,
    function: &str,
) -> Result<&'a SyncHandle, *const c_char> {
    match unsafe { handle.as_ref() } {
        Some(handle) => Ok(handle),
        None => Err(error_to_c_string(AppResponse::BadRequest(format!(
            "Null handle pointer passed to {function}"
        )))),
    }
}

fn parse_json<T: DeserializeOwned>(
    ptr: *const c_char,
    field_name: &str,
) -> Result<T, *const c_char> {
    let json = c_ptr_to_string(ptr, field_name)?;
    serde_json::from_str(&json).map_err(|e| {
        error_to_c_string(AppResponse::SerializationError(format!(
            "Invalid {field_name} JSON: {e}"
        )))
    })
}

fn error_to_c_string(error: AppResponse) -> *const c_char {
    let message = error.to_string();
    result_to_c_string(&OperationResult::<()>::from_error(message, error))
}

/// Serializes `result` into a C string owned by the caller.
///
/// Returns a null pointer if serialization or C string creation fails.
fn result_to_c_string<T: Serialize>(result: &OperationResult<T>) -> *const c_char {
    let json = match serde_json::to_string(result) {
        Ok(j) => j,
        Err(e) => {
            warn!("Error serializing response: {e}");
            return std::ptr::null();
        }
    };

    match CString::new(json) {
        Ok(c_str) => c_str.into_raw(),
        Err(e) => {
            warn!("Error creating CString: {e}");
            std::ptr::null()
        }
    }
}

fn c_ptr_to_string(ptr: *const c_char, field_name: &str) -> Result<String, *const c_char> {
    if ptr.is_null() {
        return Err(error_to_c_string(AppResponse::BadRequest(format!(
            "Null {field_name} pointer"
        ))));
    }

    match unsafe { CStr::from_ptr(ptr).to_str() } {
        Ok(s) => Ok(s.to_string()),
        Err(e) => Err(error_to_c_string(AppResponse::BadRequest(format!(
            "Invalid UTF-8 in {field_name}: {e}"
        )))),
    }
}
