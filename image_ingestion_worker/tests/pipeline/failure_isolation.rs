use claims::assert_matches;
use image_ingestion_worker::{
    domain::entities::collection_record::ProjectedPosition,
    handlers::ingestion_queue::{PipelineEvent, ResetError},
    ports::handle_store::HandleStore,
};

use crate::helpers::{image_file, spawn_pipeline, FailingWrite, PipelineOptions, TestPipeline};

async fn snapshot_ids(pipeline: &TestPipeline) -> Vec<String> {
    pipeline
        .queue
        .snapshot()
        .await
        .records
        .iter()
        .map(|record| record.id().to_string())
        .collect()
}

/// Ids of every position update, in emission order
fn updated_ids(events: &[PipelineEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            PipelineEvent::PositionsUpdated { updates, .. } => Some(updates),
            _ => None,
        })
        .flatten()
        .map(|update| update.id.clone())
        .collect()
}

#[tokio::test]
async fn a_failed_vector_write_does_not_break_the_next_item() {
    // Arrange
    let mut pipeline = spawn_pipeline(PipelineOptions {
        milestones: vec![1, 2, 3, 10],
        ..PipelineOptions::default()
    })
    .await;
    pipeline.flaky_store.fail_once(FailingWrite::Vector("a.png"));

    // Act
    pipeline.queue.enqueue(image_file("a.png")).unwrap();
    pipeline.queue.enqueue(image_file("b.png")).unwrap();
    let events = pipeline.drain_events().await;

    // Assert
    assert_eq!(events.len(), 2);
    assert_matches!(
        &events[0],
        PipelineEvent::ItemFailed { item_id, error, .. }
            if item_id == "a.png" && error.contains("disk hiccup")
    );
    // The full reprojection still sees the point of a.png: it is left out
    assert_eq!(updated_ids(&events), vec!["b.png".to_string()]);
    assert_eq!(snapshot_ids(&pipeline).await, vec!["b.png".to_string()]);

    let record = pipeline.handle_store.get("b.png").await.unwrap();
    assert_eq!(record.position, Some(ProjectedPosition([1.0, 0.0, 0.0])));
}

#[tokio::test]
async fn a_rejected_vector_store_insert_drops_only_that_item() {
    // Arrange
    let mut pipeline = spawn_pipeline(PipelineOptions {
        milestones: vec![100],
        ..PipelineOptions::default()
    })
    .await;
    pipeline.vector_store.fail_inserts_of("b.png");

    // Act
    for name in ["a.png", "b.png", "c.png"] {
        pipeline.queue.enqueue(image_file(name)).unwrap();
    }
    let events = pipeline.drain_events().await;

    // Assert
    assert_matches!(
        &events[1],
        PipelineEvent::ItemFailed { sequence_index: 1, item_id, .. } if item_id == "b.png"
    );
    assert_eq!(
        updated_ids(&events),
        vec!["a.png".to_string(), "c.png".to_string()]
    );
    assert_eq!(
        snapshot_ids(&pipeline).await,
        vec!["a.png".to_string(), "c.png".to_string()]
    );
    // Only its identity was persisted
    assert_eq!(pipeline.handle_store.get("b.png").await.unwrap().vector, None);
}

#[tokio::test]
async fn a_failed_projection_removes_the_item_from_the_collection() {
    // Arrange
    let mut pipeline = spawn_pipeline(PipelineOptions {
        milestones: vec![1, 2, 3],
        ..PipelineOptions::default()
    })
    .await;
    pipeline.vector_store.fail_next_projection();

    // Act
    pipeline.queue.enqueue(image_file("a.png")).unwrap();
    pipeline.queue.enqueue(image_file("b.png")).unwrap();
    let events = pipeline.drain_events().await;

    // Assert
    assert_matches!(
        &events[0],
        PipelineEvent::ItemFailed { item_id, .. } if item_id == "a.png"
    );
    assert_eq!(updated_ids(&events), vec!["b.png".to_string()]);
    assert_eq!(snapshot_ids(&pipeline).await, vec!["b.png".to_string()]);
}

#[tokio::test]
async fn a_failed_position_write_does_not_break_the_next_item() {
    // Arrange
    let mut pipeline = spawn_pipeline(PipelineOptions {
        milestones: vec![1, 2],
        ..PipelineOptions::default()
    })
    .await;
    pipeline
        .flaky_store
        .fail_once(FailingWrite::Position("a.png"));

    // Act
    pipeline.queue.enqueue(image_file("a.png")).unwrap();
    pipeline.queue.enqueue(image_file("b.png")).unwrap();
    let events = pipeline.drain_events().await;

    // Assert
    assert_matches!(
        &events[0],
        PipelineEvent::ItemFailed { item_id, .. } if item_id == "a.png"
    );
    assert_matches!(&events[1], PipelineEvent::PositionsUpdated { .. });
    assert_eq!(snapshot_ids(&pipeline).await, vec!["b.png".to_string()]);
    assert!(pipeline.queue.snapshot().await.records[0].position().is_some());
}

#[tokio::test]
async fn a_reset_failing_on_the_durable_store_still_empties_the_collection() {
    // Arrange
    let mut pipeline = spawn_pipeline(PipelineOptions::default()).await;
    pipeline.queue.enqueue(image_file("a.png")).unwrap();
    pipeline.queue.enqueue(image_file("b.png")).unwrap();
    pipeline.drain_events().await;
    pipeline.flaky_store.fail_next_clear();

    // Act
    let result = pipeline.queue.reset().await;

    // Assert
    assert_matches!(result, Err(ResetError::HandleStoreError(_)));

    let snapshot = pipeline.queue.snapshot().await;
    assert_eq!(snapshot.generation, 1);
    assert!(snapshot.records.is_empty());
    assert!(pipeline.vector_store.point_ids().is_empty());

    // Ids of the previous generation are not taken for duplicates
    pipeline.queue.enqueue(image_file("a.png")).unwrap();
    let events = pipeline.drain_events().await;
    assert_matches!(
        &events[..],
        [PipelineEvent::PositionsUpdated { generation: 1, .. }]
    );

    // The next reset clears what was left behind
    pipeline.queue.reset().await.unwrap();
    assert!(pipeline.handle_store.get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn a_reset_failing_on_the_vector_store_changes_nothing() {
    // Arrange
    let mut pipeline = spawn_pipeline(PipelineOptions::default()).await;
    pipeline.queue.enqueue(image_file("a.png")).unwrap();
    pipeline.queue.enqueue(image_file("b.png")).unwrap();
    pipeline.drain_events().await;
    pipeline.vector_store.fail_next_clear();

    // Act
    let result = pipeline.queue.reset().await;

    // Assert
    assert_matches!(result, Err(ResetError::VectorStoreError(_)));

    let snapshot = pipeline.queue.snapshot().await;
    assert_eq!(snapshot.generation, 0);
    assert_eq!(snapshot.records.len(), 2);
    assert_eq!(pipeline.handle_store.get_all().await.unwrap().len(), 2);
}
