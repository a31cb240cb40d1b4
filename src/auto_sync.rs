//! Periodic update of stored roots from the server.
//!
//! One run checks the interval gate, then drives the songs and documents flows
//! concurrently. Within a flow roots are handled one at a time: the caller's
//! `may_use_network` predicate is consulted before each of them, and a failing root is
//! logged and counted without stopping the loop. No store transaction is open while a
//! network call is awaited.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;

use crate::app_response::AppResponse;
use crate::domain::{BundleDomain, ContentKind, Documents, Songs};
use crate::local_db_model::BundleSummary;
use crate::preferences::Preferences;
use crate::repository::BundleRepository;
use crate::server_model::ManifestEntry;
use crate::update_detector::has_update;

#[derive(Debug, Clone, PartialEq)]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        TransportError {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TransportError {}

impl From<TransportError> for AppResponse {
    fn from(err: TransportError) -> Self {
        AppResponse::NetworkError(err.message)
    }
}

/// Where server trees of one domain come from.
#[async_trait]
pub trait ContentServer<D: BundleDomain>: Send + Sync {
    async fn fetch_manifest(&self) -> Result<Vec<ManifestEntry>, TransportError>;
    async fn fetch_tree(&self, uuid: &str) -> Result<D::ServerTree, TransportError>;
}

/// Receives the roots that are being updated, e.g. to show a spinner next to them.
pub trait UpdateObserver: Send + Sync {
    fn add_updating(&self, kind: ContentKind, bundle: &BundleSummary);
    fn remove_updating(&self, kind: ContentKind, bundle: &BundleSummary);
}

pub struct NoopObserver;

impl UpdateObserver for NoopObserver {
    fn add_updating(&self, _kind: ContentKind, _bundle: &BundleSummary) {}
    fn remove_updating(&self, _kind: ContentKind, _bundle: &BundleSummary) {}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncRunSummary {
    pub checked: usize,
    pub updated: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerReport {
    pub songs: SyncRunSummary,
    pub documents: SyncRunSummary,
}

/// Update flow of one content domain.
pub struct DomainSync<D: BundleDomain, S: ContentServer<D>> {
    repository: BundleRepository<D>,
    server: S,
}

impl<D: BundleDomain, S: ContentServer<D>> DomainSync<D, S> {
    pub fn new(repository: BundleRepository<D>, server: S) -> Self {
        DomainSync { repository, server }
    }

    pub fn repository(&self) -> &BundleRepository<D> {
        &self.repository
    }

    pub async fn run(
        &self,
        observer: &dyn UpdateObserver,
        may_use_network: &(dyn Fn() -> bool + Sync),
    ) -> Result<SyncRunSummary, AppResponse> {
        let mut summary = SyncRunSummary::default();
        if !may_use_network() {
            debug!("Network not allowed, skipping {} auto update", D::KIND);
            return Ok(summary);
        }

        let config = self.repository.config();
        self.repository
            .store()
            .wait_for_connection(
                Duration::from_millis(config.connection_timeout_ms),
                Duration::from_millis(config.connection_poll_ms),
            )
            .await?;

        let bundles = D::roots(self.repository.store())?;
        if bundles.is_empty() {
            return Ok(summary);
        }

        let manifest = self.server.fetch_manifest().await.map_err(|e| {
            error!("❌ Could not fetch {} update manifest: {e}", D::KIND);
            AppResponse::from(e)
        })?;

        for (position, bundle) in bundles.iter().enumerate() {
            if !may_use_network() {
                info!("Network no longer allowed, stopping {} auto update", D::KIND);
                summary.skipped += bundles.len() - position;
                break;
            }
            summary.checked += 1;

            // The user may have deleted it while earlier roots were updating.
            match self.repository.find(bundle.id) {
                Ok(Some(_)) => {}
                Ok(None) => {
                    summary.skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!("Could not reload {} {}: {e}", D::KIND, bundle.uuid);
                    summary.failed += 1;
                    continue;
                }
            }

            if !has_update(config.update_policy, &manifest, bundle) {
                continue;
            }

            // The stored row is gone once the update deletes it; observers get this copy.
            let snapshot = bundle.clone();
            debug!("Auto updating {} {}...", D::KIND, snapshot.name);
            observer.add_updating(D::KIND, &snapshot);
            let result = self.fetch_and_update(&snapshot.uuid).await;
            observer.remove_updating(D::KIND, &snapshot);

            match result {
                Ok(_) => summary.updated += 1,
                Err(e) => {
                    error!(
                        "❌ Failed to auto update {} {} ({}): {e}",
                        D::KIND,
                        snapshot.name,
                        snapshot.uuid
                    );
                    summary.failed += 1;
                }
            }
        }

        info!(
            "{} auto update done: {} checked, {} updated, {} failed, {} skipped",
            D::KIND,
            summary.checked,
            summary.updated,
            summary.failed,
            summary.skipped
        );
        Ok(summary)
    }

    pub async fn fetch_and_import(&self, uuid: &str) -> Result<BundleSummary, AppResponse> {
        let tree = self.server.fetch_tree(uuid).await?;
        self.repository
            .import(tree)
            .into_result()?
            .ok_or_else(|| AppResponse::NotFound(format!("Nothing imported for {uuid}")))
    }

    pub async fn fetch_and_update(&self, uuid: &str) -> Result<BundleSummary, AppResponse> {
        let tree = self.server.fetch_tree(uuid).await?;
        self.repository
            .update(tree)
            .into_result()?
            .ok_or_else(|| AppResponse::NotFound(format!("Nothing updated for {uuid}")))
    }
}

/// Midnight UTC of the day `at` falls on.
pub fn start_of_day(at: DateTime<Utc>) -> DateTime<Utc> {
    at.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// Whether `interval_days` have passed since the last recorded check.
pub fn is_check_interval_passed(
    preferences: &dyn Preferences,
    default_interval_days: i64,
    now: DateTime<Utc>,
) -> bool {
    let interval_days = preferences.check_interval_days(default_interval_days);
    if interval_days <= 0 {
        return false;
    }

    match preferences.last_update_check() {
        None => true,
        Some(last_check) => {
            let next_check = chrono::Duration::try_days(interval_days)
                .and_then(|interval| last_check.checked_add_signed(interval));
            let Some(next_check) = next_check else {
                warn!("Update check interval of {interval_days} days is out of range");
                return false;
            };
            if now < next_check {
                debug!("Next update check: {next_check}");
                return false;
            }
            true
        }
    }
}

pub struct AutoSyncScheduler<SS, DS>
where
    SS: ContentServer<Songs>,
    DS: ContentServer<Documents>,
{
    songs: DomainSync<Songs, SS>,
    documents: DomainSync<Documents, DS>,
    preferences: Arc<dyn Preferences>,
    default_interval_days: i64,
}

impl<SS, DS> AutoSyncScheduler<SS, DS>
where
    SS: ContentServer<Songs>,
    DS: ContentServer<Documents>,
{
    pub fn new(
        songs: DomainSync<Songs, SS>,
        documents: DomainSync<Documents, DS>,
        preferences: Arc<dyn Preferences>,
    ) -> Self {
        let default_interval_days = songs.repository().config().check_interval_days;
        AutoSyncScheduler {
            songs,
            documents,
            preferences,
            default_interval_days,
        }
    }

    pub fn songs(&self) -> &DomainSync<Songs, SS> {
        &self.songs
    }

    pub fn documents(&self) -> &DomainSync<Documents, DS> {
        &self.documents
    }

    pub async fn run(
        &self,
        observer: &dyn UpdateObserver,
        may_use_network: &(dyn Fn() -> bool + Sync),
    ) -> Option<SchedulerReport> {
        self.run_at(Utc::now(), observer, may_use_network).await
    }

    /// Returns `None` when the run was skipped by the interval gate or the network gate.
    pub async fn run_at(
        &self,
        now: DateTime<Utc>,
        observer: &dyn UpdateObserver,
        may_use_network: &(dyn Fn() -> bool + Sync),
    ) -> Option<SchedulerReport> {
        if !may_use_network() {
            return None;
        }
        if !is_check_interval_passed(self.preferences.as_ref(), self.default_interval_days, now) {
            return None;
        }

        if let Err(e) = self.preferences.set_last_update_check(start_of_day(now)) {
            warn!("Could not store last update check: {e}");
        }

        let (songs, documents) = tokio::join!(
            self.songs.run(observer, may_use_network),
            self.documents.run(observer, may_use_network),
        );

        Some(SchedulerReport {
            songs: songs.unwrap_or_else(|e| {
                error!("❌ Failed to run auto updater for songs: {e}");
                SyncRunSummary::default()
            }),
            documents: documents.unwrap_or_else(|e| {
                error!("❌ Failed to run auto updater for documents: {e}");
                SyncRunSummary::default()
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preferences::{MemoryPreferences, AUTO_UPDATE_CHECK_INTERVAL_DAYS};
    use serde_json::json;

    fn at(value: &str) -> DateTime<Utc> {
        value.parse().unwrap()
    }

    #[test]
    fn start_of_day_drops_time_of_day() {
        assert_eq!(
            start_of_day(at("2024-03-05T17:45:12Z")),
            at("2024-03-05T00:00:00Z")
        );
    }

    #[test]
    fn first_check_always_runs() {
        let preferences = MemoryPreferences::new();
        assert!(is_check_interval_passed(&preferences, 3, at("2024-03-05T10:00:00Z")));
    }

    #[test]
    fn interval_counts_from_start_of_day() {
        let preferences = MemoryPreferences::new();
        preferences
            .set_last_update_check(start_of_day(at("2024-03-05T23:59:00Z")))
            .unwrap();

        assert!(!is_check_interval_passed(&preferences, 3, at("2024-03-07T23:59:59Z")));
        assert!(is_check_interval_passed(&preferences, 3, at("2024-03-08T00:00:00Z")));
    }

    #[test]
    fn huge_interval_never_passes() {
        let preferences = MemoryPreferences::new();
        preferences
            .set_last_update_check(at("2024-03-05T00:00:00Z"))
            .unwrap();

        preferences.set(AUTO_UPDATE_CHECK_INTERVAL_DAYS, json!(i64::MAX / 1000)).unwrap();
        assert!(!is_check_interval_passed(&preferences, 3, at("2030-01-01T00:00:00Z")));

        preferences.set(AUTO_UPDATE_CHECK_INTERVAL_DAYS, json!(100_000_000)).unwrap();
        assert!(!is_check_interval_passed(&preferences, 3, at("2030-01-01T00:00:00Z")));
    }

    #[test]
    fn zero_interval_disables_checks() {
        let preferences = MemoryPreferences::new();
        preferences.set(AUTO_UPDATE_CHECK_INTERVAL_DAYS, json!(0)).unwrap();

        assert!(!is_check_interval_passed(&preferences, 3, at("2030-01-01T00:00:00Z")));
    }
}
