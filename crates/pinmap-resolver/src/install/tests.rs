//! Installer tests against a mock CDN and a temporary project

use super::*;

use std::time::Duration;

use pinmap_config::LOCKFILE_NAME;
use pinmap_registry::{FetchClient, ProviderSet};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Project {
    _dir: TempDir,
    root: Utf8PathBuf,
    base: Url,
}

impl Project {
    fn new(manifest: serde_json::Value) -> Self {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        std::fs::write(root.join("package.json"), serde_json::to_string_pretty(&manifest).unwrap()).unwrap();
        let base = Url::from_directory_path(&root).unwrap();
        Self { _dir: dir, root, base }
    }

    fn lockfile(&self) -> Utf8PathBuf {
        self.root.join(LOCKFILE_NAME)
    }

    fn read(&self, file: &str) -> Option<String> {
        std::fs::read_to_string(self.root.join(file)).ok()
    }
}

fn cdn(server: &MockServer) -> Url {
    Url::parse(&format!("{}/", server.uri())).unwrap()
}

async fn installer(server: &MockServer, project: &Project, opts: InstallOptions) -> Installer {
    let resolver = Arc::new(Resolver::new(
        FetchClient::new().unwrap(),
        ProviderSet::with_cdn(cdn(server)),
    ));
    Installer::load(resolver, project.base.clone(), project.lockfile(), opts)
        .await
        .unwrap()
}

async fn mock_text(server: &MockServer, at: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

async fn mock_json(server: &MockServer, at: &str, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

fn write_lock(project: &Project, lock: &LockResolutions) {
    let rendered = lock.render(&project.base).unwrap();
    std::fs::write(project.lockfile(), rendered).unwrap();
}

#[tokio::test]
async fn test_install_declared_dependency() {
    let server = MockServer::start().await;
    let project = Project::new(json!({ "name": "root", "dependencies": { "app": "^1.0.0" } }));
    mock_text(&server, "/npm:app@1", "1.2.3").await;

    let installer = installer(&server, &project, InstallOptions::default()).await;
    let txn = installer.start_install().await.unwrap();
    let resolved = installer.install("app", &project.base, &project.base).await.unwrap();
    assert_eq!(resolved, format!("{}npm:app@1.2.3/", cdn(&server)));
    assert!(installer.has_new_installs());
    assert!(txn.complete().await.unwrap());

    let lockfile = project.read(LOCKFILE_NAME).unwrap();
    assert!(lockfile.contains("url = \"./\""));
    assert!(lockfile.contains(&format!("app = \"{}npm:app@1.2.3/\"", cdn(&server))));
}

#[tokio::test]
async fn test_existing_lock_entry_is_reused() {
    let server = MockServer::start().await;
    let project = Project::new(json!({ "dependencies": { "app": "^1.0.0" } }));
    let locked = format!("{}npm:app@1.0.0/", cdn(&server));
    let mut lock = LockResolutions::new();
    lock.set(project.base.as_str(), "app", &locked);
    write_lock(&project, &lock);

    let installer = installer(&server, &project, InstallOptions::default()).await;
    assert!(installer.has_lock());
    let txn = installer.start_install().await.unwrap();
    let resolved = installer.install("app", &project.base, &project.base).await.unwrap();
    assert_eq!(resolved, locked);
    assert!(!installer.has_new_installs());
    assert!(!txn.complete().await.unwrap());
}

#[tokio::test]
async fn test_frozen_lock_blocks_new_installs() {
    let server = MockServer::start().await;
    let project = Project::new(json!({ "dependencies": { "app": "^1.0.0", "other": "^2.0.0" } }));
    let mut lock = LockResolutions::new();
    lock.set(project.base.as_str(), "other", &format!("{}npm:other@2.0.0/", cdn(&server)));
    write_lock(&project, &lock);
    let before = project.read(LOCKFILE_NAME).unwrap();

    let opts = InstallOptions {
        freeze_lock: true,
        ..Default::default()
    };
    let installer = installer(&server, &project, opts).await;
    let txn = installer.start_install().await.unwrap();

    // Locked names still resolve
    assert!(installer.install("other", &project.base, &project.base).await.is_ok());

    let err = installer.install("app", &project.base, &project.base).await.unwrap_err();
    assert!(matches!(err, PinmapError::NotInstalled { ref name, .. } if name == "app"));
    txn.abort();

    assert_eq!(project.read(LOCKFILE_NAME).unwrap(), before);
}

#[tokio::test]
async fn test_undeclared_dependency_is_saved_to_manifest() {
    let server = MockServer::start().await;
    let project = Project::new(json!({ "name": "root" }));
    mock_text(&server, "/npm:lodash", "4.17.21").await;
    mock_json(&server, "/npm:lodash@4.17.21/package.json", json!({ "name": "lodash", "version": "4.17.21" })).await;

    let installer = installer(&server, &project, InstallOptions::default()).await;
    let txn = installer.start_install().await.unwrap();
    installer.install("lodash", &project.base, &project.base).await.unwrap();
    assert!(txn.complete().await.unwrap());

    let manifest: serde_json::Value = serde_json::from_str(&project.read("package.json").unwrap()).unwrap();
    assert_eq!(manifest["dependencies"]["lodash"], "^4.17.21");
}

#[tokio::test]
async fn test_save_field_and_aliases() {
    let server = MockServer::start().await;
    let project = Project::new(json!({ "name": "root" }));
    mock_text(&server, "/npm:preact@10", "10.19.2").await;

    let opts = InstallOptions {
        save: Some(DependencyKind::Dev),
        ..Default::default()
    };
    let installer = installer(&server, &project, opts).await;
    let txn = installer.start_install().await.unwrap();
    let target = InstallTarget::parse("npm:preact@10", &project.base, None).unwrap();
    installer
        .install_target("react", &target, &project.base, true, &project.base)
        .await
        .unwrap();
    let local = InstallTarget::Url(project.base.join("packages/ui/").unwrap());
    installer
        .install_target("ui", &local, &project.base, true, &project.base)
        .await
        .unwrap();
    txn.complete().await.unwrap();

    let manifest: serde_json::Value = serde_json::from_str(&project.read("package.json").unwrap()).unwrap();
    assert_eq!(manifest["devDependencies"]["react"], "npm:preact@10");
    assert_eq!(manifest["devDependencies"]["ui"], "file:packages/ui");
}

#[tokio::test]
async fn test_builtins_resolve_through_stdlib() {
    let server = MockServer::start().await;
    let project = Project::new(json!({}));
    mock_text(&server, "/npm:@jspm/core@2", "2.0.1").await;

    let installer = installer(&server, &project, InstallOptions::default()).await;
    let txn = installer.start_install().await.unwrap();
    let resolved = installer.install("fs", &project.base, &project.base).await.unwrap();
    assert_eq!(resolved, format!("{}npm:@jspm/core@2.0.1|nodelibs/fs", cdn(&server)));
    assert_eq!(installer.lookup(&project.base, "fs"), Some(resolved));
    txn.abort();
}

async fn dedup_fixture(server: &MockServer, project: &Project) {
    let cdn = cdn(server);
    let mut lock = LockResolutions::new();
    lock.set(project.base.as_str(), "lib", &format!("{}npm:lib@1.0.0/", cdn));
    lock.set(&format!("{}npm:lib@1.0.0/", cdn), "shared", &format!("{}npm:shared@1.1.0/", cdn));
    write_lock(project, &lock);

    mock_json(
        server,
        "/npm:lib@1.0.0/package.json",
        json!({ "name": "lib", "version": "1.0.0", "dependencies": { "shared": "^1.0.0" } }),
    )
    .await;
    mock_text(server, "/npm:shared@1", "1.3.0").await;
}

#[tokio::test]
async fn test_dedup_reuses_installed_version() {
    let server = MockServer::start().await;
    let project = Project::new(json!({ "dependencies": { "lib": "^1.0.0", "shared": "^1.0.0" } }));
    dedup_fixture(&server, &project).await;

    let installer = installer(&server, &project, InstallOptions::default()).await;
    let txn = installer.start_install().await.unwrap();
    let resolved = installer.install("shared", &project.base, &project.base).await.unwrap();
    assert_eq!(resolved, format!("{}npm:shared@1.1.0/", cdn(&server)));

    let shared: Vec<String> = installer
        .installs()
        .entries()
        .filter(|(_, name, _)| *name == "shared")
        .map(|(_, _, resolved)| resolved.to_string())
        .collect();
    assert_eq!(shared.len(), 2);
    assert!(shared.iter().all(|resolved| resolved.ends_with("npm:shared@1.1.0/")));
    assert_eq!(
        installer.get_best_match(&PackageTarget::new("npm", "shared", vec![VersionRange::Wildcard])),
        Some(ExactPackage::new("npm", "shared", "1.1.0"))
    );
    txn.abort();
}

#[tokio::test]
async fn test_dedup_latest_upgrades_compatible_installs() {
    let server = MockServer::start().await;
    let project = Project::new(json!({ "dependencies": { "lib": "^1.0.0", "shared": "^1.0.0" } }));
    dedup_fixture(&server, &project).await;

    let opts = InstallOptions {
        latest: true,
        ..Default::default()
    };
    let installer = installer(&server, &project, opts).await;
    let txn = installer.start_install().await.unwrap();
    let resolved = installer.install("shared", &project.base, &project.base).await.unwrap();
    let latest = format!("{}npm:shared@1.3.0/", cdn(&server));
    assert_eq!(resolved, latest);

    let lib_scope = cdn(&server).join("npm:lib@1.0.0/").unwrap();
    assert_eq!(installer.lookup(&lib_scope, "shared"), Some(latest));
    txn.abort();
}

#[tokio::test]
async fn test_replace_points_lock_at_local_copy() {
    let server = MockServer::start().await;
    let project = Project::new(json!({}));
    let cdn = cdn(&server);
    let mut lock = LockResolutions::new();
    lock.set(project.base.as_str(), "lit", &format!("{}npm:lit@2.7.0/", cdn));
    lock.set(&format!("{}npm:lit@2.7.0/", cdn), "lit-html", &format!("{}npm:lit-html@2.7.0/", cdn));
    write_lock(&project, &lock);

    let installer = installer(&server, &project, InstallOptions::default()).await;
    let txn = installer.start_install().await.unwrap();
    let vendored = project.base.join("vendor/lit/").unwrap();
    let target = InstallTarget::parse("lit@2", &project.base, None).unwrap();

    assert!(installer.replace(&target, &vendored).unwrap());
    assert_eq!(installer.lookup(&project.base, "lit"), Some(vendored.to_string()));
    assert_eq!(
        installer.lookup(&vendored, "lit-html"),
        Some(format!("{}npm:lit-html@2.7.0/", cdn))
    );

    // Already replaced
    assert!(!installer.replace(&target, &vendored).unwrap());
    let missing = InstallTarget::parse("react@18", &project.base, None).unwrap();
    let other = project.base.join("vendor/react/").unwrap();
    assert!(installer.replace(&missing, &other).is_err());
    txn.abort();
}

#[tokio::test]
async fn test_prune_drops_unreachable_entries() {
    let server = MockServer::start().await;
    let project = Project::new(json!({ "dependencies": { "app": "^1.0.0" } }));
    let cdn = cdn(&server);
    let mut lock = LockResolutions::new();
    lock.set(project.base.as_str(), "app", &format!("{}npm:app@1.2.3/", cdn));
    lock.set(project.base.as_str(), "stale", &format!("{}npm:stale@0.1.0/", cdn));
    lock.set(&format!("{}npm:stale@0.1.0/", cdn), "deep", &format!("{}npm:deep@1.0.0/", cdn));
    write_lock(&project, &lock);

    let opts = InstallOptions {
        prune: true,
        ..Default::default()
    };
    let installer = installer(&server, &project, opts).await;
    let txn = installer.start_install().await.unwrap();
    assert!(txn.complete().await.unwrap());

    let installs = installer.installs();
    assert_eq!(installs.len(), 1);
    assert!(installs.get(project.base.as_str(), "app").is_some());
    assert!(!project.read(LOCKFILE_NAME).unwrap().contains("stale"));
}

#[tokio::test]
async fn test_aborted_transaction_restores_lock() {
    let server = MockServer::start().await;
    let project = Project::new(json!({ "dependencies": { "app": "1.0.0" } }));

    let installer = installer(&server, &project, InstallOptions::default()).await;
    let txn = installer.start_install().await.unwrap();
    installer.install("app", &project.base, &project.base).await.unwrap();
    assert_eq!(installer.installs().len(), 1);
    drop(txn);

    assert!(installer.installs().is_empty());
    assert!(!project.lockfile().exists());
}

#[tokio::test]
async fn test_install_requires_transaction() {
    let server = MockServer::start().await;
    let project = Project::new(json!({}));
    let installer = installer(&server, &project, InstallOptions::default()).await;
    let err = installer.install("app", &project.base, &project.base).await.unwrap_err();
    assert!(matches!(err, PinmapError::Internal { .. }));
}

#[tokio::test]
async fn test_transactions_are_serialized() {
    let server = MockServer::start().await;
    let project = Project::new(json!({}));
    let installer = installer(&server, &project, InstallOptions::default()).await;

    let first = installer.start_install().await.unwrap();
    let blocked = tokio::time::timeout(Duration::from_millis(50), installer.start_install()).await;
    assert!(blocked.is_err());

    first.abort();
    let second = tokio::time::timeout(Duration::from_secs(1), installer.start_install()).await;
    assert!(second.is_ok());
}

#[test]
fn test_package_url_strips_subpath() {
    let url = package_url("https://ga.jspm.io/npm:@jspm/core@2.0.1|nodelibs/fs").unwrap();
    assert_eq!(url.as_str(), "https://ga.jspm.io/npm:@jspm/core@2.0.1/");
    let url = package_url("https://ga.jspm.io/npm:lit@2.7.0/").unwrap();
    assert_eq!(url.as_str(), "https://ga.jspm.io/npm:lit@2.7.0/");
}
