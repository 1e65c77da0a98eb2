//! Integration tests for offline task submission and removal

mod support;

use std::sync::Arc;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;

use offline_librarian::db::{Database, TaskState};
use offline_librarian::services::{TaskError, TaskService};

use support::{FakeClient, Fixture};

const MAGNET: &str =
    "magnet:?xt=urn:btih:C12FE1C06BBA254A9DC9F519B335AA7C1367A88A&dn=Some+Release%20Pack";
const HASH: &str = "c12fe1c06bba254a9dc9f519b335aa7c1367a88a";

async fn service(fixture: &Fixture) -> (TaskService, Database, Arc<FakeClient>) {
    let db = Database::connect_in_memory().await.unwrap();
    let client = Arc::new(FakeClient::new());
    let service = TaskService::new(db.clone(), client.clone(), fixture.config.clone());
    (service, db, client)
}

#[tokio::test]
async fn test_submit_tracks_task_under_info_hash() {
    let fixture = Fixture::new();
    let (service, _db, client) = service(&fixture).await;

    let task = service.submit(MAGNET, "studio").await.unwrap();

    assert_eq!(task.id, HASH);
    assert_eq!(task.name, "Some Release Pack");
    assert_eq!(task.state, TaskState::Pending);
    assert_eq!(task.library_name, "studio");

    let submitted = client.submitted.lock().clone();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].1, fixture.library("studio").download_path);
}

#[tokio::test]
async fn test_submit_prefers_remote_task_id() {
    let fixture = Fixture::new();
    let (service, _db, client) = service(&fixture).await;
    *client.submit_id.lock() = Some("remote-42".to_string());

    let task = service.submit(MAGNET, "movies").await.unwrap();
    assert_eq!(task.id, "remote-42");
}

#[tokio::test]
async fn test_submit_rejects_unknown_library() {
    let fixture = Fixture::new();
    let (service, _db, client) = service(&fixture).await;

    let err = service.submit(MAGNET, "nope").await.unwrap_err();
    assert_matches!(err, TaskError::UnknownLibrary(name) if name == "nope");
    assert!(client.submitted.lock().is_empty());
}

#[tokio::test]
async fn test_submit_without_any_id_fails() {
    let fixture = Fixture::new();
    let (service, _db, _client) = service(&fixture).await;

    let err = service.submit("magnet:?dn=nothing", "studio").await.unwrap_err();
    assert_matches!(err, TaskError::MissingTaskId);
}

#[tokio::test]
async fn test_resubmitting_an_active_task_conflicts() {
    let fixture = Fixture::new();
    let (service, _db, client) = service(&fixture).await;

    service.submit(MAGNET, "studio").await.unwrap();
    let err = service.submit(MAGNET, "studio").await.unwrap_err();

    assert_matches!(err, TaskError::AlreadyActive(id) if id == HASH);
    // The duplicate never reaches the remote service
    assert_eq!(client.submitted.lock().len(), 1);
}

#[tokio::test]
async fn test_resubmitting_a_finished_task_rearms_it() {
    let fixture = Fixture::new();
    let (service, db, _client) = service(&fixture).await;

    service.submit(MAGNET, "studio").await.unwrap();
    db.offline_tasks()
        .transition(HASH, &TaskState::ACTIVE, TaskState::Failed, Some("tracker gone"))
        .await
        .unwrap();

    let task = service.submit(MAGNET, "studio").await.unwrap();
    assert_eq!(task.state, TaskState::Pending);
    assert_eq!(task.last_error, None);
}

#[tokio::test]
async fn test_remove_marks_task_removed_and_cancels_remote_job() {
    let fixture = Fixture::new();
    let (service, _db, client) = service(&fixture).await;

    service.submit(MAGNET, "studio").await.unwrap();
    let task = service.remove(HASH).await.unwrap();

    assert_eq!(task.state, TaskState::Removed);
    assert_eq!(*client.removed.lock(), vec![HASH.to_string()]);

    let err = service.remove(HASH).await.unwrap_err();
    assert_matches!(err, TaskError::AlreadyFinished { state: TaskState::Removed, .. });
}

#[tokio::test]
async fn test_remove_unknown_task_is_not_found() {
    let fixture = Fixture::new();
    let (service, _db, _client) = service(&fixture).await;

    let err = service.remove("missing").await.unwrap_err();
    assert_matches!(err, TaskError::NotFound(_));
}
