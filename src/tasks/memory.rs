//! In-memory container engine, used for dry runs and lifecycle tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};
use tracing::debug;
use uuid::Uuid;

use super::engine::{ContainerEngine, ContainerSpec, EngineError, RemoveOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Created,
    Running,
    Exited,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryContainer {
    pub id: String,
    pub spec: ContainerSpec,
    pub status: ContainerStatus,
}

/// Thread-safe fake engine that keeps containers in a map.
///
/// Container names are unique, and stopping or removing an unknown id fails
/// with [`EngineError::NotFound`] just like a real daemon.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEngine {
    state: Arc<RwLock<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    pulled: HashSet<String>,
    unpullable: HashSet<String>,
    containers: HashMap<String, MemoryContainer>,
    created: Vec<ContainerSpec>,
    stopped: Vec<String>,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every pull of `image` fail with not-found.
    pub fn with_unpullable(self, image: impl Into<String>) -> Self {
        self.write_state().unpullable.insert(image.into());
        self
    }

    /// Specs of every container ever created, in creation order.
    pub fn created(&self) -> Vec<ContainerSpec> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .created
            .clone()
    }

    /// Ids passed to successful stops, in order.
    pub fn stopped(&self) -> Vec<String> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .stopped
            .clone()
    }

    pub fn container(&self, id: &str) -> Option<MemoryContainer> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .containers
            .get(id)
            .cloned()
    }

    pub fn container_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .containers
            .len()
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, MemoryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_container<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut MemoryContainer) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let mut state = self.write_state();
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(format!("no such container: {id}")))?;
        f(container)
    }
}

#[async_trait]
impl ContainerEngine for InMemoryEngine {
    async fn pull_image(&self, image: &str) -> Result<(), EngineError> {
        let mut state = self.write_state();
        if state.unpullable.contains(image) {
            return Err(EngineError::NotFound(format!(
                "pull access denied for {image}"
            )));
        }
        state.pulled.insert(image.to_string());
        debug!(image, "pull complete");
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        let mut state = self.write_state();
        if !state.pulled.contains(&spec.image) {
            return Err(EngineError::NotFound(format!("no such image: {}", spec.image)));
        }
        if !spec.name.is_empty() && state.containers.values().any(|c| c.spec.name == spec.name) {
            return Err(EngineError::Conflict(format!(
                "container name {:?} is already in use",
                spec.name
            )));
        }

        let id = Uuid::new_v4().simple().to_string();
        state.created.push(spec.clone());
        state.containers.insert(
            id.clone(),
            MemoryContainer {
                id: id.clone(),
                spec: spec.clone(),
                status: ContainerStatus::Created,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        self.with_container(id, |container| {
            container.status = ContainerStatus::Running;
            Ok(())
        })
    }

    async fn copy_logs(&self, id: &str) -> Result<(), EngineError> {
        self.with_container(id, |_| Ok(()))
    }

    async fn stop_container(&self, id: &str) -> Result<(), EngineError> {
        self.with_container(id, |container| {
            container.status = ContainerStatus::Exited;
            Ok(())
        })?;
        self.write_state().stopped.push(id.to_string());
        Ok(())
    }

    async fn remove_container(&self, id: &str, options: RemoveOptions) -> Result<(), EngineError> {
        let mut state = self.write_state();
        let running = match state.containers.get(id) {
            None => return Err(EngineError::NotFound(format!("no such container: {id}"))),
            Some(container) => container.status == ContainerStatus::Running,
        };
        if running && !options.force {
            return Err(EngineError::Conflict(format!(
                "cannot remove running container {id}, stop it first"
            )));
        }
        state.containers.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> ContainerSpec {
        ContainerSpec {
            name: name.to_string(),
            image: "demo:latest".to_string(),
            env: Vec::new(),
            exposed_ports: Vec::new(),
            nano_cpus: 0,
            memory: 0,
            restart_policy: String::new(),
            publish_all_ports: true,
        }
    }

    #[tokio::test]
    async fn names_are_unique() {
        let engine = InMemoryEngine::new();
        engine.pull_image("demo:latest").await.expect("pull");

        engine.create_container(&spec("web")).await.expect("first");
        let second = engine.create_container(&spec("web")).await;

        assert!(matches!(second, Err(EngineError::Conflict(_))));
        assert_eq!(engine.container_count(), 1);
    }

    #[tokio::test]
    async fn create_requires_a_pulled_image() {
        let engine = InMemoryEngine::new();
        let result = engine.create_container(&spec("web")).await;
        assert!(matches!(result, Err(EngineError::NotFound(_))));
    }

    #[tokio::test]
    async fn running_containers_need_force_to_remove() {
        let engine = InMemoryEngine::new();
        engine.pull_image("demo:latest").await.expect("pull");
        let id = engine.create_container(&spec("web")).await.expect("create");
        engine.start_container(&id).await.expect("start");

        let plain = engine.remove_container(&id, RemoveOptions::TEARDOWN).await;
        assert!(matches!(plain, Err(EngineError::Conflict(_))));

        engine
            .remove_container(&id, RemoveOptions::DISCARD)
            .await
            .expect("forced remove");
        assert!(engine.container(&id).is_none());
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let engine = InMemoryEngine::new();
        assert!(matches!(
            engine.stop_container("nope").await,
            Err(EngineError::NotFound(_))
        ));
        assert!(matches!(
            engine.remove_container("nope", RemoveOptions::TEARDOWN).await,
            Err(EngineError::NotFound(_))
        ));
        assert!(engine.stopped().is_empty());
    }

    #[tokio::test]
    async fn unpullable_images_fail() {
        let engine = InMemoryEngine::new().with_unpullable("private/app:1");
        assert!(matches!(
            engine.pull_image("private/app:1").await,
            Err(EngineError::NotFound(_))
        ));
        assert!(engine.pull_image("demo:latest").await.is_ok());
    }
}
