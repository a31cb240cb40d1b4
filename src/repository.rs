//! Import, update, delete and maintenance of stored roots.
//!
//! Every public operation returns an [`OperationResult`]; failures are logged with the
//! root's name and uuid and reported, never propagated as panics.

use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::app_response::{AppResponse, OperationResult};
use crate::config::SyncConfig;
use crate::domain::BundleDomain;
use crate::local_db_model::BundleSummary;
use crate::local_db_state::LocalStore;
use crate::preferences::Preferences;
use crate::server_model::ManifestEntry;
use crate::update_detector::{bundles_with_updates, is_bundle_local};

pub struct BundleRepository<D: BundleDomain> {
    store: Arc<LocalStore>,
    preferences: Arc<dyn Preferences>,
    config: SyncConfig,
    domain: PhantomData<fn() -> D>,
}

impl<D: BundleDomain> BundleRepository<D> {
    pub fn new(
        store: Arc<LocalStore>,
        preferences: Arc<dyn Preferences>,
        config: SyncConfig,
    ) -> Self {
        BundleRepository {
            store,
            preferences,
            config,
            domain: PhantomData,
        }
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Stores a root that is not present locally yet and selects it for search.
    pub fn import(&self, server_tree: D::ServerTree) -> OperationResult<BundleSummary> {
        let name = D::server_name(&server_tree).to_string();
        let uuid = D::server_uuid(&server_tree).to_string();

        if !self.store.is_connected() {
            warn!("Cannot import {} {name} ({uuid}): store not connected", D::KIND);
            return OperationResult::from_error(
                format!("Could not import {name}"),
                AppResponse::not_connected(),
            );
        }
        if D::is_empty(&server_tree) {
            warn!("Refusing to import empty {} {name} ({uuid})", D::KIND);
            return OperationResult::failure(format!("{name} has no content"));
        }
        match D::roots(&self.store) {
            Ok(roots) if is_bundle_local(&roots, &uuid) => {
                return OperationResult::failure(format!("{name} already exists"));
            }
            Ok(_) => {}
            Err(e) => return OperationResult::from_error(format!("Could not import {name}"), e),
        }

        let summary = match self.convert_and_write(server_tree) {
            Ok((summary, _)) => summary,
            Err(e) => {
                error!("❌ Failed to store {} {name} ({uuid}): {e}", D::KIND);
                return OperationResult::from_error(format!("Failed to import {name}"), e);
            }
        };

        self.select_for_search(&summary.uuid);
        info!("Imported {} {} ({}) as {}", D::KIND, name, uuid, summary.id);
        OperationResult::with_data(format!("{name} added!"), summary)
    }

    /// Replaces the stored version(s) of a root with a new server version.
    ///
    /// The new tree is written first; the old one is only located and deleted after the
    /// write committed and user state was migrated, so a failed write leaves the old
    /// version untouched.
    pub fn update(&self, server_tree: D::ServerTree) -> OperationResult<BundleSummary> {
        let name = D::server_name(&server_tree).to_string();
        let uuid = D::server_uuid(&server_tree).to_string();

        if !self.store.is_connected() {
            warn!("Cannot update {} {name} ({uuid}): store not connected", D::KIND);
            return OperationResult::from_error(
                format!("Could not update {name}"),
                AppResponse::not_connected(),
            );
        }
        if D::is_empty(&server_tree) {
            warn!("Refusing to update {} {name} ({uuid}) with an empty tree", D::KIND);
            return OperationResult::failure(format!("{name} has no content"));
        }

        let (summary, tree) = match self.convert_and_write(server_tree) {
            Ok(written) => written,
            Err(e) => {
                error!("❌ Failed to store new version of {} {name} ({uuid}): {e}", D::KIND);
                return OperationResult::from_error(format!("Failed to update {name}"), e);
            }
        };

        match D::migrate_user_state(&self.store, &tree, &self.config) {
            Ok(report) if report.failed > 0 => warn!(
                "Migrated user state into {name} ({uuid}) with {} failures",
                report.failed
            ),
            Ok(report) => debug!("Migrated {} user selections into {name}", report.migrated),
            Err(e) => warn!("Failed to migrate user state into {name} ({uuid}): {e}"),
        }

        let previous: Vec<BundleSummary> = match self.find_by_uuid(&uuid) {
            Ok(found) => found.into_iter().filter(|it| it.id != summary.id).collect(),
            Err(e) => {
                warn!("Could not look up previous versions of {name} ({uuid}): {e}");
                Vec::new()
            }
        };

        if previous.is_empty() {
            info!("No previous version of {} {name} ({uuid}) found", D::KIND);
            self.select_for_search(&summary.uuid);
        }
        for old in &previous {
            match self.delete_tree(old) {
                Ok(items) => {
                    debug!("Removed previous version {} of {name} ({items} items)", old.id)
                }
                Err(e) => error!("❌ Failed to remove previous version {} of {name}: {e}", old.id),
            }
        }

        info!("Updated {} {} ({}) to {}", D::KIND, name, uuid, summary.id);
        OperationResult::with_data(format!("{name} updated!"), summary)
    }

    /// Deletes a root with its whole tree and unselects it for search.
    pub fn delete(&self, root_id: u64) -> OperationResult<BundleSummary> {
        if !self.store.is_connected() {
            return OperationResult::from_error(
                "Could not delete",
                AppResponse::not_connected(),
            );
        }

        let roots = match D::roots(&self.store) {
            Ok(roots) => roots,
            Err(e) => return OperationResult::from_error("Could not delete", e),
        };
        let Some(root) = roots.iter().find(|it| it.id == root_id).cloned() else {
            return OperationResult::from_error(
                format!("Could not delete {} {root_id}", D::KIND),
                AppResponse::NotFound(format!("{} {root_id} not found", D::KIND)),
            );
        };

        let items = match self.delete_tree(&root) {
            Ok(items) => items,
            Err(e) => {
                error!("❌ Failed to delete {} {} ({}): {e}", D::KIND, root.name, root.uuid);
                return OperationResult::from_error(format!("Failed to delete {}", root.name), e);
            }
        };

        let uuid_still_stored = roots
            .iter()
            .any(|it| it.id != root.id && it.uuid == root.uuid);
        if !root.uuid.is_empty() && !uuid_still_stored {
            for key in D::SEARCH_SELECTION_KEYS {
                if let Err(e) = self.preferences.remove_uuid(key, &root.uuid) {
                    warn!("Could not unselect {} for search: {e}", root.uuid);
                }
            }
        }

        info!("Deleted {} {} ({})", D::KIND, root.name, root.uuid);
        OperationResult::with_data(D::deleted_message(&root.name, items), root)
    }

    /// Keeps only the most recently imported root per uuid. Returns the removed roots.
    pub fn remove_duplicates(&self) -> OperationResult<Vec<BundleSummary>> {
        let mut roots = match D::roots(&self.store) {
            Ok(roots) => roots,
            Err(e) => return OperationResult::from_error("Could not remove duplicates", e),
        };
        roots.sort_by(|a, b| b.id.cmp(&a.id));

        let mut approved: HashSet<String> = HashSet::new();
        let mut removed = Vec::new();
        for root in roots {
            if root.uuid.is_empty() || approved.insert(root.uuid.clone()) {
                continue;
            }

            info!(
                "Removing duplicate {} {} ({}) with id {}",
                D::KIND,
                root.name,
                root.uuid,
                root.id
            );
            match self.delete_tree(&root) {
                Ok(_) => removed.push(root),
                Err(e) => error!("❌ Failed to remove duplicate {}: {e}", root.id),
            }
        }

        OperationResult::with_data(format!("Removed {} duplicates", removed.len()), removed)
    }

    pub fn sweep_orphans(&self) -> OperationResult<usize> {
        match self.store.write(|txn| D::sweep_orphans(txn)) {
            Ok(removed) => {
                if removed > 0 {
                    info!("Removed {removed} orphaned {} rows", D::KIND);
                }
                OperationResult::with_data(format!("Removed {removed} orphans"), removed)
            }
            Err(e) => {
                error!("❌ Orphan sweep for {} failed: {e}", D::KIND);
                OperationResult::from_error("Could not remove orphans", e)
            }
        }
    }

    pub fn local_bundles(&self) -> OperationResult<Vec<BundleSummary>> {
        match D::roots(&self.store) {
            Ok(roots) => OperationResult::with_data(format!("{} items", roots.len()), roots),
            Err(e) => OperationResult::from_error("Could not load local items", e),
        }
    }

    /// Local roots the manifest has a newer version of.
    pub fn check_updates(&self, manifest: &[ManifestEntry]) -> OperationResult<Vec<BundleSummary>> {
        match D::roots(&self.store) {
            Ok(roots) => {
                let stale: Vec<BundleSummary> =
                    bundles_with_updates(self.config.update_policy, manifest, &roots)
                        .into_iter()
                        .cloned()
                        .collect();
                OperationResult::with_data(format!("{} updates available", stale.len()), stale)
            }
            Err(e) => OperationResult::from_error("Could not check for updates", e),
        }
    }

    /// Gives roots stored before uuids existed the uuid of the manifest entry with the
    /// same name, so they can be updated.
    pub fn backfill_uuids(&self, manifest: &[ManifestEntry]) -> OperationResult<usize> {
        let roots = match D::roots(&self.store) {
            Ok(roots) => roots,
            Err(e) => return OperationResult::from_error("Could not backfill uuids", e),
        };

        let mut updated = 0;
        for root in roots.iter().filter(|it| it.uuid.is_empty()) {
            let Some(entry) = manifest.iter().find(|entry| {
                !entry.uuid.is_empty() && entry.name.as_deref() == Some(root.name.as_str())
            }) else {
                continue;
            };

            match self.store.write(|txn| D::set_uuid(txn, root.id, &entry.uuid)) {
                Ok(true) => {
                    info!("Assigned uuid {} to {} {}", entry.uuid, D::KIND, root.name);
                    updated += 1;
                }
                Ok(false) => {}
                Err(e) => warn!("Could not assign uuid to {}: {e}", root.name),
            }
        }

        OperationResult::with_data(format!("Assigned {updated} uuids"), updated)
    }

    /// Root with `id`, if it still exists.
    pub fn find(&self, id: u64) -> Result<Option<BundleSummary>, AppResponse> {
        Ok(D::roots(&self.store)?.into_iter().find(|it| it.id == id))
    }

    pub fn find_by_uuid(&self, uuid: &str) -> Result<Vec<BundleSummary>, AppResponse> {
        if uuid.is_empty() {
            return Ok(Vec::new());
        }
        Ok(D::roots(&self.store)?
            .into_iter()
            .filter(|it| it.uuid == uuid)
            .collect())
    }

    fn convert_and_write(
        &self,
        server_tree: D::ServerTree,
    ) -> Result<(BundleSummary, D::Tree), AppResponse> {
        let tree = D::convert(&self.store, server_tree, &self.config)?;
        self.store.write(|txn| D::write(txn, &tree))?;
        Ok((D::summary(&tree), tree))
    }

    fn delete_tree(&self, root: &BundleSummary) -> Result<usize, AppResponse> {
        self.store.write(|txn| {
            let items = D::delete_tree(txn, root.id)?;
            D::after_delete(txn)?;
            Ok(items)
        })
    }

    fn select_for_search(&self, uuid: &str) {
        if uuid.is_empty() {
            return;
        }
        for key in D::SEARCH_SELECTION_KEYS {
            if let Err(e) = self.preferences.add_uuid(key, uuid) {
                warn!("Could not select {uuid} for search: {e}");
            }
        }
    }
}
