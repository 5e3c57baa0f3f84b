use cube::tasks::{
    memory::{ContainerStatus, InMemoryEngine},
    types::{Action, Config, DockerClient, DockerError},
};

fn config(name: &str, image: &str) -> Config {
    Config {
        name: name.to_string(),
        image: image.to_string(),
        cpu: 0.25,
        memory: 64 * 1024 * 1024,
        ..Default::default()
    }
}

#[tokio::test]
async fn run_starts_a_container() {
    let engine = InMemoryEngine::new();
    let client = DockerClient::new(engine.clone());

    let outcome = client.run(&config("web", "nginx:latest")).await.expect("run");

    assert_eq!(outcome.action, Action::Start);
    let container_id = outcome.container_id.expect("container id");
    assert!(!container_id.is_empty());

    let container = engine.container(&container_id).expect("container exists");
    assert_eq!(container.status, ContainerStatus::Running);
    assert_eq!(container.spec.nano_cpus, 250_000_000);
    assert!(container.spec.publish_all_ports);
}

#[tokio::test]
async fn stopping_twice_reports_not_found() {
    let engine = InMemoryEngine::new();
    let client = DockerClient::new(engine.clone());
    let container_id = client
        .run(&config("web", "nginx:latest"))
        .await
        .expect("run")
        .container_id
        .expect("container id");

    let first = client.stop(&container_id).await.expect("first stop");
    assert_eq!(first.action, Action::Stop);
    assert_eq!(engine.container_count(), 0);

    let second = client.stop(&container_id).await.expect_err("second stop");
    assert!(matches!(second, DockerError::Stop { .. }));
    assert!(second.is_not_found());
}

#[tokio::test]
async fn failed_pull_creates_nothing() {
    let engine = InMemoryEngine::new().with_unpullable("ghost:latest");
    let client = DockerClient::new(engine.clone());

    let err = client
        .run(&config("ghost", "ghost:latest"))
        .await
        .expect_err("pull should fail");

    assert!(matches!(err, DockerError::Pull { .. }));
    assert!(engine.created().is_empty());
    assert_eq!(engine.container_count(), 0);
}

#[tokio::test]
async fn duplicate_names_fail_at_create() {
    let engine = InMemoryEngine::new();
    let client = DockerClient::new(engine.clone());
    client.run(&config("web", "nginx:latest")).await.expect("first run");

    let err = client
        .run(&config("web", "nginx:latest"))
        .await
        .expect_err("name clash");

    assert!(matches!(err, DockerError::Create { .. }));
    assert_eq!(engine.container_count(), 1);
}
