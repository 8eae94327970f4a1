//! End-to-end supervisor tests against scripted runtime and registry.
//!
//! These drive the public control plane the way the binary does, with a
//! mock container runtime (recording operations, spawning shell stand-ins
//! for the compose child) and a mock registry.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use fblaster::compose::ImageRef;
use fblaster::config::{
    RegistryCredentials, Settings, TrackedImages, COMPOSE_FILE, DERIVED_COMPOSE_FILE,
};
use fblaster::process::ChildProcess;
use fblaster::registry::{RegistryError, TagClient};
use fblaster::runtime::{ContainerRuntime, ContainerState, RuntimeError};
use fblaster::store;
use fblaster::supervisor::run_with;

const MANIFEST: &str = "\
services:
  cat:
    image: reg:7420/cat-image:10.0.0
    restart: always
  dog:
    image: reg:7420/dog-image:10.0.0
  redis:
    image: redis:5.0-alpine
";

// ============================================================================
// Test doubles
// ============================================================================

/// Registry serving a fixed tag list per image.
struct StaticRegistry {
    tags: Mutex<HashMap<String, Vec<String>>>,
    calls: AtomicUsize,
}

impl StaticRegistry {
    fn new() -> Self {
        Self {
            tags: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    fn publish(&self, image: &str, tags: &[&str]) {
        self.tags.lock().unwrap().insert(
            image.to_string(),
            tags.iter().map(|t| t.to_string()).collect(),
        );
    }
}

#[async_trait]
impl TagClient for StaticRegistry {
    async fn list_tags(
        &self,
        _registry: &str,
        image: &str,
    ) -> Result<Vec<String>, RegistryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .tags
            .lock()
            .unwrap()
            .get(image)
            .cloned()
            .unwrap_or_default())
    }
}

/// Runtime recording pulls and spawns; the workload child is a shell sleep.
struct RecordingRuntime {
    pulls: Mutex<Vec<String>>,
    spawns: AtomicUsize,
    stops: AtomicUsize,
}

impl RecordingRuntime {
    fn new() -> Self {
        Self {
            pulls: Mutex::new(Vec::new()),
            spawns: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ContainerRuntime for RecordingRuntime {
    async fn login(&self, _: &str, _: &str, _: &str) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn pull(&self, image: &ImageRef) -> Result<(), RuntimeError> {
        self.pulls.lock().unwrap().push(image.to_string());
        Ok(())
    }

    async fn container_id(&self, _service: &str) -> Result<Option<String>, RuntimeError> {
        Ok(None)
    }

    async fn inspect_state(&self, container_id: &str) -> Result<ContainerState, RuntimeError> {
        Err(RuntimeError::NoSuchContainer(container_id.to_string()))
    }

    async fn restart_service(&self, _: &str, _: Duration) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn stop_all(&self, _: Duration) -> Result<(), RuntimeError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn signal_container(&self, _: &str, _: &str) -> Result<(), RuntimeError> {
        Ok(())
    }

    fn spawn_workload(&self) -> Result<ChildProcess, RuntimeError> {
        self.spawns.fetch_add(1, Ordering::SeqCst);
        Ok(ChildProcess::spawn(
            "sh",
            &["-c", "sleep 600"],
            &std::env::temp_dir(),
        )?)
    }
}

// ============================================================================
// Harness
// ============================================================================

fn settings(dir: &Path, poll_ms: u64, debounce_ms: u64) -> Settings {
    Settings {
        directory: dir.to_path_buf(),
        tracked: TrackedImages::new(["cat-image", "dog-image"]),
        credentials: RegistryCredentials::default(),
        shutdown_timeout: Duration::from_secs(1),
        poll_interval: Duration::from_millis(poll_ms),
        debounce: Duration::from_millis(debounce_ms),
        health_check_interval: Duration::from_secs(3600),
        ill_health_tolerance: Duration::from_secs(3600),
        insecure: false,
    }
}

fn write_manifest(dir: &Path) {
    std::fs::write(dir.join(COMPOSE_FILE), MANIFEST).unwrap();
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_single_update_deploys_once_and_persists() {
    let dir = TempDir::new().unwrap();
    write_manifest(dir.path());

    let registry = Arc::new(StaticRegistry::new());
    registry.publish("cat-image", &["10.0.0"]);
    registry.publish("dog-image", &["10.0.0", "10.0.1"]);
    let runtime = Arc::new(RecordingRuntime::new());

    let shutdown = CancellationToken::new();
    let task = tokio::spawn(run_with(
        settings(dir.path(), 40, 80),
        Arc::clone(&runtime),
        registry,
        shutdown.clone(),
    ));

    tokio::time::sleep(Duration::from_millis(800)).await;
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(runtime.spawns.load(Ordering::SeqCst), 2);
    assert_eq!(
        runtime.pulls.lock().unwrap().as_slice(),
        &["reg:7420/dog-image:10.0.1".to_string()]
    );

    let derived = std::fs::read_to_string(dir.path().join(DERIVED_COMPOSE_FILE)).unwrap();
    assert!(derived.contains("dog-image:10.0.1"));
    assert!(derived.contains("cat-image:10.0.0"));
    assert!(derived.contains("redis:5.0-alpine"));
    assert!(derived.contains("restart: always"));

    let stored = store::load(dir.path()).unwrap().unwrap();
    assert_eq!(
        stored,
        vec![
            ImageRef::new("reg:7420", "cat-image", "10.0.0"),
            ImageRef::new("reg:7420", "dog-image", "10.0.1"),
        ]
    );
}

#[tokio::test]
async fn test_two_updates_within_debounce_deploy_together() {
    let dir = TempDir::new().unwrap();
    write_manifest(dir.path());

    let registry = Arc::new(StaticRegistry::new());
    registry.publish("cat-image", &["10.0.0", "10.0.2"]);
    registry.publish("dog-image", &["10.0.0", "10.0.1"]);
    let runtime = Arc::new(RecordingRuntime::new());

    let shutdown = CancellationToken::new();
    let task = tokio::spawn(run_with(
        settings(dir.path(), 40, 120),
        Arc::clone(&runtime),
        registry,
        shutdown.clone(),
    ));

    tokio::time::sleep(Duration::from_millis(900)).await;
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    // One initial spawn, one combined upgrade respawn.
    assert_eq!(runtime.spawns.load(Ordering::SeqCst), 2);

    let derived = std::fs::read_to_string(dir.path().join(DERIVED_COMPOSE_FILE)).unwrap();
    assert!(derived.contains("cat-image:10.0.2"));
    assert!(derived.contains("dog-image:10.0.1"));

    let stored = store::load(dir.path()).unwrap().unwrap();
    assert_eq!(stored.len(), 2);
}

#[tokio::test]
async fn test_supervisor_restart_resumes_from_persisted_versions() {
    let dir = TempDir::new().unwrap();
    write_manifest(dir.path());

    let registry = Arc::new(StaticRegistry::new());
    registry.publish("cat-image", &["10.0.0"]);
    registry.publish("dog-image", &["10.0.0", "10.0.1"]);
    let runtime = Arc::new(RecordingRuntime::new());

    // First run upgrades dog and persists.
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(run_with(
        settings(dir.path(), 40, 80),
        Arc::clone(&runtime),
        Arc::clone(&registry),
        shutdown.clone(),
    ));
    tokio::time::sleep(Duration::from_millis(800)).await;
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(runtime.spawns.load(Ordering::SeqCst), 2);

    // Second run starts from the store: dog is already 10.0.1, so nothing
    // is newer and no upgrade respawn happens.
    let runtime2 = Arc::new(RecordingRuntime::new());
    let shutdown2 = CancellationToken::new();
    let task2 = tokio::spawn(run_with(
        settings(dir.path(), 40, 80),
        Arc::clone(&runtime2),
        registry,
        shutdown2.clone(),
    ));
    tokio::time::sleep(Duration::from_millis(500)).await;
    shutdown2.cancel();
    tokio::time::timeout(Duration::from_secs(5), task2)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(runtime2.spawns.load(Ordering::SeqCst), 1);
    assert!(runtime2.pulls.lock().unwrap().is_empty());
    let derived = std::fs::read_to_string(dir.path().join(DERIVED_COMPOSE_FILE)).unwrap();
    assert!(derived.contains("dog-image:10.0.1"));
}

#[tokio::test]
async fn test_next_major_tag_is_never_deployed() {
    let dir = TempDir::new().unwrap();
    write_manifest(dir.path());

    let registry = Arc::new(StaticRegistry::new());
    registry.publish("cat-image", &["10.0.0", "400.0.0"]);
    registry.publish("dog-image", &["10.0.0"]);
    let runtime = Arc::new(RecordingRuntime::new());

    let shutdown = CancellationToken::new();
    let task = tokio::spawn(run_with(
        settings(dir.path(), 40, 80),
        Arc::clone(&runtime),
        Arc::clone(&registry),
        shutdown.clone(),
    ));

    tokio::time::sleep(Duration::from_millis(500)).await;
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    // Polling happened, but nothing was selected.
    assert!(registry.calls.load(Ordering::SeqCst) > 0);
    assert_eq!(runtime.spawns.load(Ordering::SeqCst), 1);
    assert!(runtime.pulls.lock().unwrap().is_empty());
    let derived = std::fs::read_to_string(dir.path().join(DERIVED_COMPOSE_FILE)).unwrap();
    assert!(derived.contains("cat-image:10.0.0"));
}
