use cube::tasks::{
    memory::{ContainerStatus, InMemoryEngine},
    types::{DockerClient, State, Task, TaskEvent},
};
use cube::worker::{Worker, WorkerError, WorkerResult};

fn worker(engine: &InMemoryEngine) -> Worker<InMemoryEngine> {
    Worker::new("worker-test", DockerClient::new(engine.clone()))
}

fn demo_task() -> Task {
    Task {
        cpu: 0.5,
        memory: 104_857_600,
        ..Task::new("demo", "demo:latest")
    }
}

/// Moves a new task through `Scheduled` and returns the result of the
/// `Running` event.
async fn schedule_and_run(worker: &Worker<InMemoryEngine>, task: &Task) -> WorkerResult<Task> {
    worker
        .submit_event(TaskEvent::new(State::Scheduled, task.clone()))
        .await?;
    worker.run_task().await?;
    worker
        .submit_event(TaskEvent::new(State::Running, task.clone()))
        .await?;
    worker.run_task().await
}

#[tokio::test]
async fn scheduled_then_running() {
    let engine = InMemoryEngine::new();
    let worker = worker(&engine);
    let task = demo_task();

    worker
        .submit_event(TaskEvent::new(State::Scheduled, task.clone()))
        .await
        .expect("submit scheduled");
    let scheduled = worker.run_task().await.expect("apply scheduled");
    assert_eq!(scheduled.state, State::Scheduled);
    assert!(scheduled.container_id.is_none());
    assert!(engine.created().is_empty());

    worker
        .submit_event(TaskEvent::new(State::Running, task.clone()))
        .await
        .expect("submit running");
    let running = worker.run_task().await.expect("apply running");

    assert_eq!(running.state, State::Running);
    assert!(running.start_time.is_some());
    let container_id = running.container_id.clone().expect("container id");
    assert!(!container_id.is_empty());

    let created = engine.created();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].nano_cpus, 500_000_000);
    assert_eq!(created[0].memory, 104_857_600);

    assert_eq!(worker.db.get(&task.id).await, Some(running));
    assert_eq!(worker.events.events_for(&task.id).await.len(), 2);
}

#[tokio::test]
async fn running_to_completed_stops_the_container() {
    let engine = InMemoryEngine::new();
    let worker = worker(&engine);
    let task = demo_task();

    let running = schedule_and_run(&worker, &task).await.expect("run");
    let container_id = running.container_id.expect("container id");

    let stop = worker.request_stop(task.id).await.expect("request stop");
    assert_eq!(stop.state, State::Completed);
    let completed = worker.run_task().await.expect("apply stop");

    assert_eq!(completed.state, State::Completed);
    assert!(completed.finish_time.is_some());
    assert_eq!(completed.container_id.as_deref(), Some(container_id.as_str()));
    assert_eq!(engine.stopped(), vec![container_id.clone()]);
    assert!(engine.container(&container_id).is_none());
}

#[tokio::test]
async fn stop_of_a_vanished_container_still_completes() {
    let engine = InMemoryEngine::new();
    let worker = worker(&engine);
    let task = demo_task();

    let container_id = schedule_and_run(&worker, &task)
        .await
        .expect("run")
        .container_id
        .expect("container id");

    // Removed behind the worker's back.
    DockerClient::new(engine.clone())
        .stop(&container_id)
        .await
        .expect("external stop");

    worker.request_stop(task.id).await.expect("request stop");
    let completed = worker.run_task().await.expect("apply stop");
    assert_eq!(completed.state, State::Completed);
}

#[tokio::test]
async fn failed_pull_marks_task_failed() {
    let engine = InMemoryEngine::new().with_unpullable("ghost:latest");
    let worker = worker(&engine);
    let task = Task::new("ghost", "ghost:latest");

    let err = schedule_and_run(&worker, &task).await.expect_err("pull fails");
    assert!(matches!(err, WorkerError::Runtime { task_id, .. } if task_id == task.id));

    let stored = worker.db.get(&task.id).await.expect("task stored");
    assert_eq!(stored.state, State::Failed);
    assert!(stored.container_id.is_none());
    assert!(stored.finish_time.is_some());
    assert!(engine.created().is_empty());
}

#[tokio::test]
async fn known_tasks_reject_impossible_targets_at_submit() {
    let engine = InMemoryEngine::new();
    let worker = worker(&engine);
    let task = demo_task();

    worker
        .submit_event(TaskEvent::new(State::Scheduled, task.clone()))
        .await
        .expect("submit scheduled");
    worker.run_task().await.expect("apply scheduled");

    let err = worker
        .submit_event(TaskEvent::new(State::Pending, task.clone()))
        .await
        .expect_err("scheduled cannot go back to pending");

    assert!(matches!(
        err,
        WorkerError::InvalidStateTransition {
            from: State::Scheduled,
            to: State::Pending,
            ..
        }
    ));
    assert_eq!(worker.queue_len().await, 0);
    // Rejected events are still logged.
    assert_eq!(worker.events.events_for(&task.id).await.len(), 2);
    assert_eq!(worker.db.get(&task.id).await.map(|t| t.state), Some(State::Scheduled));
}

#[tokio::test]
async fn new_tasks_cannot_skip_scheduling() {
    let engine = InMemoryEngine::new();
    let worker = worker(&engine);
    let task = demo_task();

    let err = worker
        .submit_event(TaskEvent::new(State::Running, task.clone()))
        .await
        .expect_err("pending cannot run");

    assert!(matches!(
        err,
        WorkerError::InvalidStateTransition {
            from: State::Pending,
            to: State::Running,
            ..
        }
    ));
    assert_eq!(worker.queue_len().await, 0);
    assert_eq!(worker.events.events_for(&task.id).await.len(), 1);
    assert!(engine.created().is_empty());
}

#[tokio::test]
async fn new_tasks_are_checked_against_pending_at_submit() {
    let engine = InMemoryEngine::new();
    let worker = worker(&engine);
    let task = demo_task();

    let err = worker
        .submit_event(TaskEvent::new(State::Completed, task.clone()))
        .await
        .expect_err("pending cannot complete");

    assert!(matches!(
        err,
        WorkerError::InvalidStateTransition {
            from: State::Pending,
            to: State::Completed,
            ..
        }
    ));
    assert!(worker.db.get(&task.id).await.is_none());
    assert!(matches!(
        worker.run_task().await,
        Err(WorkerError::NoTasksInQueue)
    ));
}

#[tokio::test]
async fn queued_targets_count_before_they_are_applied() {
    let engine = InMemoryEngine::new();
    let worker = worker(&engine);
    let task = demo_task();

    for state in [State::Scheduled, State::Running, State::Completed] {
        worker
            .submit_event(TaskEvent::new(state, task.clone()))
            .await
            .expect("accepted against the queued target");
    }
    assert_eq!(worker.queue_len().await, 3);

    // Checked against the newest queued target, not the empty table.
    let err = worker
        .submit_event(TaskEvent::new(State::Pending, task.clone()))
        .await
        .expect_err("completed is terminal");
    assert!(matches!(
        err,
        WorkerError::InvalidStateTransition {
            from: State::Completed,
            ..
        }
    ));

    let mut last = None;
    for _ in 0..3 {
        last = Some(worker.run_task().await.expect("apply"));
    }
    let completed = last.expect("three events applied");
    assert_eq!(completed.state, State::Completed);
    assert_eq!(engine.stopped().len(), 1);
}

#[tokio::test]
async fn settled_events_fall_back_to_the_stored_state() {
    let engine = InMemoryEngine::new().with_unpullable("ghost:latest");
    let worker = worker(&engine);
    let task = Task::new("ghost", "ghost:latest");

    schedule_and_run(&worker, &task).await.expect_err("pull fails");

    // The Running target was settled as Failed, so nothing may follow.
    let err = worker
        .submit_event(TaskEvent::new(State::Completed, task.clone()))
        .await
        .expect_err("failed is terminal");
    assert!(matches!(
        err,
        WorkerError::InvalidStateTransition {
            from: State::Failed,
            ..
        }
    ));
}

#[tokio::test]
async fn terminal_tasks_stay_terminal() {
    let engine = InMemoryEngine::new();
    let worker = worker(&engine);
    let task = demo_task();

    worker
        .submit_event(TaskEvent::new(State::Scheduled, task.clone()))
        .await
        .expect("submit scheduled");
    worker.run_task().await.expect("apply scheduled");
    worker
        .submit_event(TaskEvent::new(State::Failed, task.clone()))
        .await
        .expect("submit failed");
    let failed = worker.run_task().await.expect("apply failed");
    assert!(failed.finish_time.is_some());
    assert_eq!(failed.state, State::Failed);

    let err = worker
        .submit_event(TaskEvent::new(State::Running, task.clone()))
        .await
        .expect_err("failed is terminal");
    assert!(matches!(err, WorkerError::InvalidStateTransition { .. }));
}

#[tokio::test]
async fn empty_queue_reports_no_tasks() {
    let engine = InMemoryEngine::new();
    let worker = worker(&engine);

    let err = worker.run_task().await.expect_err("empty queue");
    assert!(matches!(err, WorkerError::NoTasksInQueue));
}

#[tokio::test]
async fn stop_of_unknown_task_is_not_found() {
    let engine = InMemoryEngine::new();
    let worker = worker(&engine);
    let task = demo_task();

    let err = worker.request_stop(task.id).await.expect_err("unknown task");
    assert!(matches!(err, WorkerError::TaskNotFound(id) if id == task.id));
    assert!(worker.events.is_empty().await);
}

#[tokio::test]
async fn running_container_is_visible_in_engine() {
    let engine = InMemoryEngine::new();
    let worker = worker(&engine);

    let running = schedule_and_run(&worker, &demo_task()).await.expect("run");

    let container = engine
        .container(running.container_id.as_deref().expect("container id"))
        .expect("container");
    assert_eq!(container.status, ContainerStatus::Running);
    assert_eq!(worker.task_count().await, 1);
}
