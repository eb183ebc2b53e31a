use chrono::{Duration as ChronoDuration, Utc};
use chrono_tz::Tz;
use std::time::Duration;
use uuid::Uuid;

use radio_recorder::database::recordings;
use radio_recorder::models::{DeliveryKind, DeliveryStatus, RecordingDelivery, RecordingStatus};
use radio_recorder::scheduler::Scheduler;

mod common;
use common::*;

#[tokio::test]
async fn test_recording_round_trips_through_store() {
    let env = TestEnv::new().await;
    let recurring = template(&env.path("KEXP.mp3"), "0 8 * * 1-5", 7);
    env.database.insert_recording(&recurring).await.unwrap();

    let stored = env.database.require_recording(recurring.id).await.unwrap();
    assert_eq!(stored.recurrence.as_deref(), Some("0 8 * * 1-5"));
    assert_eq!(stored.max_episodes, 7);
    assert_eq!(stored.podcast, recurring.podcast);
    assert_eq!(stored.podcast_group, recurring.podcast_group);
    assert_eq!(stored.status, RecordingStatus::Scheduled);

    assert!(env.database.get_recording(Uuid::new_v4()).await.unwrap().is_none());
    assert!(env.database.require_recording(Uuid::new_v4()).await.is_err());
}

#[tokio::test]
async fn test_status_transitions_are_guarded() {
    let env = TestEnv::new().await;
    let now = Utc::now();
    let one_shot = job(&env.path("guarded.mp3"), now, 60);
    env.database.insert_recording(&one_shot).await.unwrap();
    let output = one_shot.output_file.clone();

    // requeue and attempts only apply to running jobs
    assert!(!env.database.record_attempt(one_shot.id, 1, None).await.unwrap());
    assert!(!recordings::requeue(&env.database.pool(), one_shot.id, now).await.unwrap());

    assert!(env.database.mark_in_progress(one_shot.id, &output, now).await.unwrap());
    // a second claim loses
    assert!(!env.database.mark_in_progress(one_shot.id, &output, now).await.unwrap());
    assert!(env.database.record_attempt(one_shot.id, 1, Some("timeout")).await.unwrap());

    assert!(env.database.mark_completed(one_shot.id, now, 1024).await.unwrap());
    // terminal states are final
    assert!(!env.database.mark_failed(one_shot.id, now, "late failure").await.unwrap());
    assert!(!env.database.mark_completed(one_shot.id, now, 2048).await.unwrap());

    let stored = env.database.require_recording(one_shot.id).await.unwrap();
    assert_eq!(stored.status, RecordingStatus::Completed);
    assert_eq!(stored.file_size, Some(1024));
    assert_eq!(stored.attempts, 1);
}

#[tokio::test]
async fn test_templates_never_leave_scheduled() {
    let env = TestEnv::new().await;
    let recurring = template(&env.path("KEXP.mp3"), "0 * * * *", 0);
    env.database.insert_recording(&recurring).await.unwrap();
    let now = Utc::now();

    assert!(!env
        .database
        .mark_in_progress(recurring.id, &recurring.output_file, now)
        .await
        .unwrap());
    assert!(!env.database.mark_completed(recurring.id, now, 10).await.unwrap());
    assert!(!env.database.mark_failed(recurring.id, now, "boom").await.unwrap());

    let stored = env.database.require_recording(recurring.id).await.unwrap();
    assert_eq!(stored.status, RecordingStatus::Scheduled);
}

#[tokio::test]
async fn test_transaction_rollback_discards_transition() {
    let env = TestEnv::new().await;
    let now = Utc::now();
    let running = job(&env.path("tx.mp3"), now, 60);
    env.database.insert_recording(&running).await.unwrap();
    env.database
        .mark_in_progress(running.id, &running.output_file, now)
        .await
        .unwrap();

    let mut tx = env.database.begin().await.unwrap();
    assert!(recordings::mark_failed(&mut *tx, running.id, now, "rolled back").await.unwrap());
    tx.rollback().await.unwrap();

    let stored = env.database.require_recording(running.id).await.unwrap();
    assert_eq!(stored.status, RecordingStatus::InProgress);
    assert!(stored.error.is_none());
}

#[tokio::test]
async fn test_delivery_status_is_recorded_per_step() {
    let env = TestEnv::new().await;
    let mut recording = job(&env.path("delivery.mp3"), Utc::now(), 60);
    recording.delivery = RecordingDelivery::from_flags(true, true, false);
    env.database.insert_recording(&recording).await.unwrap();

    let stored = env.database.require_recording(recording.id).await.unwrap();
    assert_eq!(stored.delivery.copy.status, Some(DeliveryStatus::Pending));
    assert_eq!(stored.delivery.upload.status, Some(DeliveryStatus::Pending));
    assert_eq!(stored.delivery.notify.status, None);

    env.database
        .set_delivery_status(recording.id, DeliveryKind::Upload, DeliveryStatus::Failed, Some("HTTP 507"))
        .await
        .unwrap();

    let stored = env.database.require_recording(recording.id).await.unwrap();
    assert_eq!(stored.delivery.upload.status, Some(DeliveryStatus::Failed));
    assert_eq!(stored.delivery.upload.message.as_deref(), Some("HTTP 507"));
    assert_eq!(stored.delivery.copy.status, Some(DeliveryStatus::Pending));
    assert_eq!(stored.delivery.notify.status, None);
}

#[tokio::test]
async fn test_output_path_claims_and_counts() {
    let env = TestEnv::new().await;
    let now = Utc::now();
    let first = job(&env.path("claimed.mp3"), now, 60);
    env.database.insert_recording(&first).await.unwrap();
    let mut second = job(&env.path("other.mp3"), now, 60);
    second.status = RecordingStatus::Failed;
    env.database.insert_recording(&second).await.unwrap();

    let path = first.output_file.clone();
    assert!(env.database.output_path_claimed(&path, None).await.unwrap());
    assert!(!env.database.output_path_claimed(&path, Some(first.id)).await.unwrap());
    assert!(!env
        .database
        .output_path_claimed(&env.path("free.mp3").display().to_string(), None)
        .await
        .unwrap());

    let counts = env.database.count_recordings_by_status().await.unwrap();
    assert_eq!(counts.get(&RecordingStatus::Scheduled), Some(&1));
    assert_eq!(counts.get(&RecordingStatus::Failed), Some(&1));
    assert_eq!(counts.get(&RecordingStatus::Completed), None);

    assert!(env.database.delete_recording(first.id).await.unwrap());
    assert!(!env.database.delete_recording(first.id).await.unwrap());
}

#[tokio::test]
async fn test_restore_rebuilds_triggers_from_store() {
    let env = TestEnv::new().await;
    let now = Utc::now();

    let recurring = template(&env.path("KEXP.mp3"), "0 8 * * *", 0);
    env.database.insert_recording(&recurring).await.unwrap();

    let upcoming = job(&env.path("upcoming.mp3"), now + ChronoDuration::hours(1), 600);
    env.database.insert_recording(&upcoming).await.unwrap();

    // started ten minutes ago, still inside its hour-long window
    let open_window = job(&env.path("open.mp3"), now - ChronoDuration::minutes(10), 3600);
    env.database.insert_recording(&open_window).await.unwrap();

    let expired = job(&env.path("expired.mp3"), now - ChronoDuration::hours(2), 600);
    env.database.insert_recording(&expired).await.unwrap();

    let broken = template(&env.path("broken.mp3"), "61 * * * *", 0);
    env.database.insert_recording(&broken).await.unwrap();

    let mut finished = job(&env.path("finished.mp3"), now + ChronoDuration::hours(1), 600);
    finished.status = RecordingStatus::Completed;
    env.database.insert_recording(&finished).await.unwrap();

    let scheduler = Scheduler::with_timezone(Tz::UTC, Duration::from_millis(50));
    let summary = scheduler.restore(&env.database).await.unwrap();

    assert_eq!(summary.recurring, 1);
    assert_eq!(summary.one_shot, 2);
    assert_eq!(summary.expired, 1);
    assert_eq!(summary.invalid, 1);

    assert!(scheduler.has_trigger(recurring.id).await);
    let next = scheduler.next_fire_time(upcoming.id).await.unwrap();
    // stored timestamps keep millisecond precision
    assert!((next - upcoming.start_time).num_milliseconds().abs() < 1);
    // a missed start inside the window fires on the next tick
    assert!(scheduler.next_fire_time(open_window.id).await.unwrap() <= now);
    assert!(!scheduler.has_trigger(expired.id).await);
    assert!(!scheduler.has_trigger(broken.id).await);
    assert!(!scheduler.has_trigger(finished.id).await);
}
