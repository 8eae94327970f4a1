//! Scripted [`ContainerRuntime`](super::ContainerRuntime) for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::compose::ImageRef;
use crate::process::{ChildProcess, ProcessError};

use super::{ContainerHealth, ContainerRuntime, ContainerState, RuntimeError};

/// Clonable stand-in for inspection outcomes.
#[derive(Debug, Clone)]
enum StateScript {
    State(ContainerState),
    NoSuchContainer,
    Fail(String),
}

/// Recording, scriptable runtime.
///
/// Every operation is logged; inspection results and container ids are
/// configured per key. Delays are settable so tests can hold operations
/// in flight and observe cancellation or dedup behaviour.
pub struct MockRuntime {
    pub logins: Mutex<Vec<(String, String)>>,
    pub pulls: Mutex<Vec<ImageRef>>,
    pub restarts: Mutex<Vec<String>>,
    pub signals: Mutex<Vec<(String, String)>>,
    pub stop_all_calls: AtomicUsize,
    pub container_id_calls: AtomicUsize,
    pub workloads_spawned: AtomicUsize,

    /// Milliseconds each pull takes.
    pub pull_delay: AtomicU64,
    /// Milliseconds each restart takes (recorded at call start).
    pub restart_delay: AtomicU64,
    /// Number of leading pull calls that fail.
    pub pull_failures: AtomicUsize,
    /// When set, signal delivery fails.
    pub fail_signals: AtomicUsize,

    container_ids: Mutex<HashMap<String, String>>,
    states: Mutex<HashMap<String, StateScript>>,
    /// Shell script run as the workload child.
    pub workload_script: Mutex<String>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self {
            logins: Mutex::new(Vec::new()),
            pulls: Mutex::new(Vec::new()),
            restarts: Mutex::new(Vec::new()),
            signals: Mutex::new(Vec::new()),
            stop_all_calls: AtomicUsize::new(0),
            container_id_calls: AtomicUsize::new(0),
            workloads_spawned: AtomicUsize::new(0),
            pull_delay: AtomicU64::new(0),
            restart_delay: AtomicU64::new(0),
            pull_failures: AtomicUsize::new(0),
            fail_signals: AtomicUsize::new(0),
            container_ids: Mutex::new(HashMap::new()),
            states: Mutex::new(HashMap::new()),
            workload_script: Mutex::new("sleep 600".to_string()),
        }
    }

    pub fn set_container_id(&self, service: &str, id: &str) {
        self.container_ids
            .lock()
            .unwrap()
            .insert(service.to_string(), id.to_string());
    }

    pub fn set_state(&self, container: &str, state: Result<ContainerState, RuntimeError>) {
        let script = match state {
            Ok(state) => StateScript::State(state),
            Err(RuntimeError::NoSuchContainer(_)) => StateScript::NoSuchContainer,
            Err(e) => StateScript::Fail(e.to_string()),
        };
        self.states
            .lock()
            .unwrap()
            .insert(container.to_string(), script);
    }

    pub fn healthy_state() -> ContainerState {
        ContainerState {
            health: Some(ContainerHealth {
                status: "healthy".to_string(),
            }),
        }
    }

    pub fn unhealthy_state() -> ContainerState {
        ContainerState {
            health: Some(ContainerHealth {
                status: "unhealthy".to_string(),
            }),
        }
    }

    fn process_failure(what: &str) -> RuntimeError {
        RuntimeError::Process(ProcessError::CommandFailed {
            command: what.to_string(),
            stderr: "scripted failure".to_string(),
        })
    }
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn login(
        &self,
        registry: &str,
        username: &str,
        _password: &str,
    ) -> Result<(), RuntimeError> {
        self.logins
            .lock()
            .unwrap()
            .push((registry.to_string(), username.to_string()));
        Ok(())
    }

    async fn pull(&self, image: &ImageRef) -> Result<(), RuntimeError> {
        let delay = self.pull_delay.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self
            .pull_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Self::process_failure("docker pull"));
        }
        self.pulls.lock().unwrap().push(image.clone());
        Ok(())
    }

    async fn container_id(&self, service: &str) -> Result<Option<String>, RuntimeError> {
        self.container_id_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.container_ids.lock().unwrap().get(service).cloned())
    }

    async fn inspect_state(&self, container_id: &str) -> Result<ContainerState, RuntimeError> {
        let script = self.states.lock().unwrap().get(container_id).cloned();
        match script {
            Some(StateScript::State(state)) => Ok(state),
            Some(StateScript::NoSuchContainer) | None => {
                Err(RuntimeError::NoSuchContainer(container_id.to_string()))
            }
            Some(StateScript::Fail(message)) => Err(Self::process_failure(&message)),
        }
    }

    async fn restart_service(
        &self,
        service: &str,
        _timeout: Duration,
    ) -> Result<(), RuntimeError> {
        self.restarts.lock().unwrap().push(service.to_string());
        let delay = self.restart_delay.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(())
    }

    async fn stop_all(&self, _timeout: Duration) -> Result<(), RuntimeError> {
        self.stop_all_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn signal_container(
        &self,
        container: &str,
        signal: &str,
    ) -> Result<(), RuntimeError> {
        if self.fail_signals.load(Ordering::SeqCst) > 0 {
            return Err(Self::process_failure("docker kill"));
        }
        self.signals
            .lock()
            .unwrap()
            .push((container.to_string(), signal.to_string()));
        Ok(())
    }

    fn spawn_workload(&self) -> Result<ChildProcess, RuntimeError> {
        self.workloads_spawned.fetch_add(1, Ordering::SeqCst);
        let script = self.workload_script.lock().unwrap().clone();
        Ok(ChildProcess::spawn(
            "sh",
            &["-c", script.as_str()],
            &std::env::temp_dir(),
        )?)
    }
}
