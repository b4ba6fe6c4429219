/*============================================================
  Synavera Project: Syn-Upd
  Module: tests::update_flow
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Drive UpdateManager end to end against an HTTP feed.

  Revision History:
    2025-11-17 COD  Added end-to-end update scenarios.
============================================================*/

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use synupd_core::catalog::CATALOG_FILE_NAME;
use synupd_core::{
    CatalogCodec, ContentHasher, FileUpdateLock, Logger, NoopUpdateLock, ReleaseApplier,
    ReleaseEntry, ReleaseVersion, ReleasesFileCodec, Result, Sha1Hasher, SynupdError,
    UpdateInfo, UpdateIntention, UpdateLock, UpdateManager, UpdaterConfig,
};
use synupd_core::progress::{silent, Progress};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct RecordingApplier {
    plans: Mutex<Vec<Vec<String>>>,
}

#[async_trait::async_trait]
impl ReleaseApplier for RecordingApplier {
    async fn apply(&self, info: &UpdateInfo, progress: Progress) -> Result<()> {
        let names = info
            .releases_to_apply
            .iter()
            .map(|entry| entry.filename.clone())
            .collect();
        self.plans.lock().expect("lock").push(names);
        progress(100);
        Ok(())
    }
}

fn entry(filename: &str, body: &[u8]) -> ReleaseEntry {
    let parsed = synupd_core::catalog::parse_package_filename(filename).expect("filename");
    ReleaseEntry::new(
        parsed.package_name,
        parsed.version,
        filename,
        body.len() as u64,
        Sha1Hasher.hash_bytes(body).expect("hash"),
        parsed.is_delta,
    )
}

fn manager(server: &MockServer, root: &Path) -> (UpdateManager, Arc<RecordingApplier>) {
    let applier = Arc::new(RecordingApplier::default());
    let config = UpdaterConfig {
        update_source: format!("{}/app", server.uri()),
        root_dir: Some(root.to_path_buf()),
        ..UpdaterConfig::default()
    };
    let manager = UpdateManager::from_config(&config, applier.clone(), Arc::new(Logger::silent()))
        .expect("manager")
        .with_lock(Arc::new(NoopUpdateLock));
    (manager, applier)
}

async fn serve(server: &MockServer, route: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}

/// Installation at 1.0.0 with its full package in the local cache.
fn install_v1(root: &Path) {
    let packages = root.join("packages");
    std::fs::create_dir_all(&packages).expect("mkdir");
    let v1 = entry("app-1.0.0-full.nupkg", b"full 1.0.0 body");
    std::fs::write(packages.join(&v1.filename), b"full 1.0.0 body").expect("write");
    std::fs::write(
        packages.join(CATALOG_FILE_NAME),
        ReleasesFileCodec.serialize(&[v1]),
    )
    .expect("write catalog");
}

struct Feed {
    catalog: Vec<ReleaseEntry>,
}

impl Feed {
    /// 1.0.0 .. 1.2.0 with small deltas and large fulls.
    fn standard() -> Self {
        Self {
            catalog: vec![
                entry("app-1.0.0-full.nupkg", b"full 1.0.0 body"),
                entry("app-1.1.0-full.nupkg", &[1_u8; 4096]),
                entry("app-1.1.0-delta.nupkg", b"d110"),
                entry("app-1.2.0-full.nupkg", &[2_u8; 4096]),
                entry("app-1.2.0-delta.nupkg", b"d120"),
            ],
        }
    }

    fn body(&self) -> Vec<u8> {
        ReleasesFileCodec.serialize(&self.catalog).into_bytes()
    }
}

#[tokio::test]
async fn update_downloads_cheapest_delta_chain() {
    let server = MockServer::start().await;
    let feed = Feed::standard();
    serve(&server, "/app/RELEASES", feed.body()).await;
    serve(&server, "/app/app-1.1.0-delta.nupkg", b"d110".to_vec()).await;
    serve(&server, "/app/app-1.2.0-delta.nupkg", b"d120".to_vec()).await;

    let root = tempfile::tempdir().expect("root");
    install_v1(root.path());
    let (manager, _) = manager(&server, root.path());

    let info = manager
        .check_for_update(false, false, UpdateIntention::Update, silent())
        .await
        .expect("check");
    let names: Vec<&str> = info
        .releases_to_apply
        .iter()
        .map(|entry| entry.filename.as_str())
        .collect();
    assert_eq!(names, vec!["app-1.1.0-delta.nupkg", "app-1.2.0-delta.nupkg"]);
    assert_eq!(
        info.currently_installed_version.as_ref().map(|e| e.version.clone()),
        Some(ReleaseVersion::new(1, 0, 0))
    );

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    manager
        .download_releases(
            &info.releases_to_apply,
            Arc::new(move |p| sink.lock().expect("lock").push(p)),
        )
        .await
        .expect("download");

    for path in info.package_paths() {
        assert!(path.is_file(), "{} should exist", path.display());
    }
    let seen = seen.lock().expect("lock").clone();
    assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(seen.last(), Some(&100));

    let requests = server.received_requests().await.expect("recording");
    let catalog_request = requests
        .iter()
        .find(|request| request.url.path() == "/app/RELEASES")
        .expect("catalog requested");
    let query = catalog_request.url.query().unwrap_or_default();
    assert!(query.contains("id=app"));
    assert!(query.contains("localVersion=1.0.0"));
}

#[tokio::test]
async fn same_version_is_a_noop() {
    let server = MockServer::start().await;
    let feed = Feed {
        catalog: vec![entry("app-1.0.0-full.nupkg", b"full 1.0.0 body")],
    };
    serve(&server, "/app/RELEASES", feed.body()).await;

    let root = tempfile::tempdir().expect("root");
    install_v1(root.path());
    let (manager, applier) = manager(&server, root.path());

    let applied = manager.update_app(false, silent()).await.expect("update");
    assert!(applied.is_none());
    assert_eq!(*applier.plans.lock().expect("lock"), vec![Vec::<String>::new()]);
}

#[tokio::test]
async fn corrupted_package_is_deleted() {
    let server = MockServer::start().await;
    let feed = Feed::standard();
    serve(&server, "/app/RELEASES", feed.body()).await;
    serve(&server, "/app/app-1.1.0-delta.nupkg", b"XXXX".to_vec()).await;

    let root = tempfile::tempdir().expect("root");
    let (manager, _) = manager(&server, root.path());
    let target = feed.catalog[2].clone();

    let result = manager.download_release(&target).await;
    assert!(matches!(result, Err(SynupdError::HashMismatch { .. })));
    assert!(!manager.package_directory().join(&target.filename).exists());
}

#[tokio::test]
async fn update_app_retries_with_full_packages() {
    let server = MockServer::start().await;
    let feed = Feed::standard();
    serve(&server, "/app/RELEASES", feed.body()).await;
    serve(&server, "/app/app-1.1.0-delta.nupkg", b"d110".to_vec()).await;
    // Truncated upload: wrong size for the second delta.
    serve(&server, "/app/app-1.2.0-delta.nupkg", b"d12".to_vec()).await;
    serve(&server, "/app/app-1.2.0-full.nupkg", vec![2_u8; 4096]).await;

    let root = tempfile::tempdir().expect("root");
    install_v1(root.path());
    let (manager, applier) = manager(&server, root.path());

    let applied = manager
        .update_app(false, silent())
        .await
        .expect("second attempt succeeds");

    assert_eq!(
        applied.map(|entry| entry.filename),
        Some("app-1.2.0-full.nupkg".to_string())
    );
    assert_eq!(
        *applier.plans.lock().expect("lock"),
        vec![vec!["app-1.2.0-full.nupkg".to_string()]]
    );
    assert!(!manager
        .package_directory()
        .join("app-1.2.0-delta.nupkg")
        .exists());
}

#[tokio::test]
async fn update_app_gives_up_after_second_failure() {
    let server = MockServer::start().await;
    let feed = Feed::standard();
    serve(&server, "/app/RELEASES", feed.body()).await;

    let root = tempfile::tempdir().expect("root");
    install_v1(root.path());
    let (manager, applier) = manager(&server, root.path());

    let result = manager.update_app(false, silent()).await;
    assert!(matches!(result, Err(SynupdError::Network(_))));
    assert!(applier.plans.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn mixed_case_package_falls_back_to_lowercase() {
    let server = MockServer::start().await;
    let feed = Feed {
        catalog: vec![entry("App-1.0.0-full.nupkg", b"bootstrap")],
    };
    serve(&server, "/app/RELEASES", feed.body()).await;
    serve(&server, "/app/app-1.0.0-full.nupkg", b"bootstrap".to_vec()).await;

    let root = tempfile::tempdir().expect("root");
    let (manager, applier) = manager(&server, root.path());

    let info = manager.full_install(silent()).await.expect("install");
    assert!(info.is_bootstrapping());
    assert!(manager
        .package_directory()
        .join("App-1.0.0-full.nupkg")
        .is_file());
    assert_eq!(applier.plans.lock().expect("lock").len(), 1);
}

#[tokio::test]
async fn garbage_remote_catalog_is_corrupt() {
    let server = MockServer::start().await;
    serve(&server, "/app/RELEASES", b"<html>not found</html>".to_vec()).await;

    let root = tempfile::tempdir().expect("root");
    install_v1(root.path());
    let (manager, _) = manager(&server, root.path());

    let result = manager
        .check_for_update(false, false, UpdateIntention::Update, silent())
        .await;
    assert!(matches!(result, Err(SynupdError::CorruptCatalog(_))));
}

#[tokio::test]
async fn held_lock_blocks_mutation_but_not_checks() {
    let server = MockServer::start().await;
    let feed = Feed::standard();
    serve(&server, "/app/RELEASES", feed.body()).await;

    let root = tempfile::tempdir().expect("root");
    let locks = tempfile::tempdir().expect("locks");
    install_v1(root.path());
    let lock = FileUpdateLock::in_directory(locks.path(), root.path(), Duration::from_millis(100));
    let _held = lock.acquire().await.expect("external holder");

    let (manager, _) = manager(&server, root.path());
    let manager = manager.with_lock(Arc::new(lock.clone()));

    let info = manager
        .check_for_update(false, false, UpdateIntention::Update, silent())
        .await
        .expect("checks take no lock");
    let result = manager
        .download_releases(&info.releases_to_apply, silent())
        .await;
    assert!(matches!(result, Err(SynupdError::UpdateInProgress { .. })));
}

#[tokio::test]
async fn held_lock_protects_package_directory_from_resets() {
    let server = MockServer::start().await;
    serve(&server, "/app/RELEASES", Feed::standard().body()).await;

    let root = tempfile::tempdir().expect("root");
    let locks = tempfile::tempdir().expect("locks");
    let packages = root.path().join("packages");
    std::fs::create_dir_all(&packages).expect("mkdir");
    let in_flight = packages.join("app-1.1.0-delta.nupkg.partial");
    std::fs::write(&in_flight, b"half a download").expect("write");

    let lock = FileUpdateLock::in_directory(locks.path(), root.path(), Duration::from_millis(100));
    let held = lock.acquire().await.expect("external holder");
    let (manager, _) = manager(&server, root.path());
    let manager = manager.with_lock(Arc::new(lock.clone()));

    let install = manager
        .check_for_update(false, false, UpdateIntention::Install, silent())
        .await;
    assert!(matches!(install, Err(SynupdError::UpdateInProgress { .. })));
    assert!(in_flight.is_file());

    // No readable local catalog: an update check would have to start over.
    let update = manager
        .check_for_update(false, false, UpdateIntention::Update, silent())
        .await;
    assert!(matches!(update, Err(SynupdError::UpdateInProgress { .. })));
    assert!(in_flight.is_file());

    drop(held);
    let info = manager
        .check_for_update(false, false, UpdateIntention::Install, silent())
        .await
        .expect("install check once the holder is gone");
    assert!(info.is_bootstrapping());
    assert!(!in_flight.exists());
}
