use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use std::sync::Arc;
use uuid::Uuid;

use radio_recorder::models::{DeliveryStatus, RecordingDelivery, RecordingStatus};
use radio_recorder::recorder::RecordingExecutor;
use radio_recorder::services::{LocalCopier, Notifier, RemoteUploader, RetentionService};

mod common;
use common::*;

#[tokio::test]
async fn test_one_shot_recording_completes() {
    let env = TestEnv::new().await;
    let capture = Arc::new(FakeCapture::default());
    let executor = executor(&env, capture.clone());

    let output = env.path("KEXP_20240501_1200.mp3");
    let recording = job(&output, Utc::now(), 60);
    env.database.insert_recording(&recording).await.unwrap();

    executor.execute(recording.id, Utc::now()).await.unwrap();

    let stored = env.database.require_recording(recording.id).await.unwrap();
    assert_eq!(stored.status, RecordingStatus::Completed);
    assert_eq!(stored.attempts, 1);
    assert_eq!(stored.file_size, Some((60 * BYTES_PER_SECOND) as i64));
    assert!(stored.actual_start_time.is_some());
    assert!(stored.end_time.is_some());
    assert!(stored.error.is_none());

    let calls = capture.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].seconds, 60);
    assert_eq!(calls[0].output, output);
    assert_eq!(calls[0].url, "http://radio.example/live");
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let env = TestEnv::new().await;
    let capture = Arc::new(FakeCapture::failing(1));
    let executor = executor(&env, capture.clone());

    let recording = job(&env.path("retry.mp3"), Utc::now(), 30);
    env.database.insert_recording(&recording).await.unwrap();

    executor.execute(recording.id, Utc::now()).await.unwrap();

    let stored = env.database.require_recording(recording.id).await.unwrap();
    assert_eq!(stored.status, RecordingStatus::Completed);
    assert_eq!(stored.attempts, 2);
    assert!(stored.error.is_none());
    assert_eq!(capture.calls().len(), 2);
}

#[tokio::test]
async fn test_recording_fails_after_max_attempts() {
    let env = TestEnv::new().await;
    let capture = Arc::new(FakeCapture::failing(10));
    let executor = executor(&env, capture.clone());

    let recording = job(&env.path("doomed.mp3"), Utc::now(), 30);
    env.database.insert_recording(&recording).await.unwrap();

    executor.execute(recording.id, Utc::now()).await.unwrap();

    let stored = env.database.require_recording(recording.id).await.unwrap();
    assert_eq!(stored.status, RecordingStatus::Failed);
    assert_eq!(stored.attempts, 3);
    assert!(stored.end_time.is_some());
    let error = stored.error.expect("failure reason is persisted");
    assert!(error.contains("Connection refused"), "unexpected error: {error}");
    assert!(error.chars().count() <= 500);

    // no fourth attempt
    assert_eq!(capture.calls().len(), 3);
}

#[tokio::test]
async fn test_partial_file_is_resumed_and_joined() {
    let env = TestEnv::new().await;
    let capture = Arc::new(FakeCapture::default());
    let executor = executor(&env, capture.clone());

    let output = env.path("resume.mp3");
    write_audio(&output, 20).await;
    let recording = job(&output, Utc::now(), 60);
    env.database.insert_recording(&recording).await.unwrap();

    executor.execute(recording.id, Utc::now()).await.unwrap();

    let stored = env.database.require_recording(recording.id).await.unwrap();
    assert_eq!(stored.status, RecordingStatus::Completed);
    assert_eq!(stored.file_size, Some((60 * BYTES_PER_SECOND) as i64));

    let calls = capture.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].seconds, 40);
    assert_ne!(calls[0].output, output, "the remainder goes to a separate segment");

    // only the joined recording remains
    let mut entries = tokio::fs::read_dir(env.recordings_path()).await.unwrap();
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.unwrap() {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    assert_eq!(names, vec!["resume.mp3".to_string()]);
}

#[tokio::test]
async fn test_failed_join_keeps_partial_and_segment() {
    let env = TestEnv::new().await;
    let capture = Arc::new(FakeCapture {
        fail_concat: true,
        ..Default::default()
    });
    let executor = executor(&env, capture.clone());

    let output = env.path("unjoinable.mp3");
    write_audio(&output, 20).await;
    let recording = job(&output, Utc::now(), 60);
    env.database.insert_recording(&recording).await.unwrap();

    executor.execute(recording.id, Utc::now()).await.unwrap();

    let stored = env.database.require_recording(recording.id).await.unwrap();
    assert_eq!(stored.status, RecordingStatus::Failed);
    assert_eq!(stored.attempts, 3);
    assert!(stored.error.unwrap().contains("Concatenation failed"));

    let partial = tokio::fs::metadata(&output).await.unwrap();
    assert_eq!(partial.len(), 20 * BYTES_PER_SECOND);
    let part = env.path("unjoinable.mp3.part");
    assert_eq!(
        tokio::fs::metadata(&part).await.unwrap().len(),
        40 * BYTES_PER_SECOND
    );
}

#[tokio::test]
async fn test_partial_covering_duration_needs_no_capture() {
    let env = TestEnv::new().await;
    let capture = Arc::new(FakeCapture::default());
    let executor = executor(&env, capture.clone());

    let output = env.path("already.mp3");
    write_audio(&output, 60).await;
    let recording = job(&output, Utc::now(), 60);
    env.database.insert_recording(&recording).await.unwrap();

    executor.execute(recording.id, Utc::now()).await.unwrap();

    let stored = env.database.require_recording(recording.id).await.unwrap();
    assert_eq!(stored.status, RecordingStatus::Completed);
    assert!(capture.calls().is_empty());
}

#[tokio::test]
async fn test_only_scheduled_jobs_are_executed() {
    let env = TestEnv::new().await;
    let capture = Arc::new(FakeCapture::default());
    let executor = executor(&env, capture.clone());

    let mut finished = job(&env.path("finished.mp3"), Utc::now(), 60);
    finished.status = RecordingStatus::Completed;
    env.database.insert_recording(&finished).await.unwrap();

    executor.execute(finished.id, Utc::now()).await.unwrap();
    // deleted jobs are ignored
    executor.execute(Uuid::new_v4(), Utc::now()).await.unwrap();

    assert!(capture.calls().is_empty());
    let stored = env.database.require_recording(finished.id).await.unwrap();
    assert_eq!(stored.status, RecordingStatus::Completed);
    assert_eq!(stored.attempts, 0);
}

#[tokio::test]
async fn test_template_firings_spawn_distinct_episodes() {
    let env = TestEnv::new().await;
    let capture = Arc::new(FakeCapture::default());
    let executor = executor(&env, capture.clone());

    let recurring = template(&env.path("KEXP.mp3"), "0 12 * * 3", 0);
    env.database.insert_recording(&recurring).await.unwrap();

    // two firings on the same Wednesday
    let first = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let second = first + ChronoDuration::hours(2);
    executor.execute(recurring.id, first).await.unwrap();
    executor.execute(recurring.id, second).await.unwrap();

    let episodes = env.database.list_terminal_episodes(recurring.id).await.unwrap();
    assert_eq!(episodes.len(), 2);

    let mut files: Vec<String> = episodes
        .iter()
        .map(|e| {
            assert_eq!(e.status, RecordingStatus::Completed);
            assert_eq!(e.template_id, Some(recurring.id));
            assert_eq!(e.podcast_group, recurring.podcast_group);
            assert!(e.recurrence.is_none());
            e.output_path().file_name().unwrap().to_string_lossy().into_owned()
        })
        .collect();
    files.sort();
    assert_eq!(files, vec!["KEXP240501-Wed-2.mp3", "KEXP240501-Wed.mp3"]);

    let stored = env.database.require_recording(recurring.id).await.unwrap();
    assert_eq!(stored.status, RecordingStatus::Scheduled);
    assert_eq!(stored.attempts, 0);
    assert!(stored.actual_start_time.is_none());
}

#[tokio::test]
async fn test_template_retention_keeps_newest_episodes() {
    let env = TestEnv::new().await;
    let capture = Arc::new(FakeCapture::default());
    let executor = executor(&env, capture.clone());

    let recurring = template(&env.path("KEXP.mp3"), "0 12 * * *", 2);
    env.database.insert_recording(&recurring).await.unwrap();

    let day_one = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    for day in 0..3 {
        executor
            .execute(recurring.id, day_one + ChronoDuration::days(day))
            .await
            .unwrap();
        // keep completion timestamps apart
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    let episodes = env.database.list_terminal_episodes(recurring.id).await.unwrap();
    let files: Vec<String> = episodes
        .iter()
        .map(|e| e.output_path().file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(files, vec!["KEXP240503-Fri.mp3", "KEXP240502-Thu.mp3"]);

    assert!(!env.path("KEXP240501-Wed.mp3").exists());
    assert!(env.path("KEXP240502-Thu.mp3").exists());
    assert!(env.path("KEXP240503-Fri.mp3").exists());
}

#[tokio::test]
async fn test_retention_prunes_oldest_terminal_episodes() {
    let env = TestEnv::new().await;
    let retention = RetentionService::new(env.database.clone());

    let recurring = template(&env.path("KEXP.mp3"), "0 8 * * *", 0);
    env.database.insert_recording(&recurring).await.unwrap();

    let base = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
    let mut episodes = Vec::new();
    for day in 0..5 {
        let output = env.path(&format!("episode-{day}.mp3"));
        write_audio(&output, 1).await;
        let mut episode = job(&output, base + ChronoDuration::days(day), 60);
        episode.template_id = Some(recurring.id);
        episode.status = RecordingStatus::Completed;
        episode.end_time = Some(base + ChronoDuration::days(day));
        env.database.insert_recording(&episode).await.unwrap();
        episodes.push(episode);
    }
    // an episode still waiting to run is never pruned
    let mut pending = job(&env.path("pending.mp3"), base + ChronoDuration::days(10), 60);
    pending.template_id = Some(recurring.id);
    env.database.insert_recording(&pending).await.unwrap();
    // one file already removed by hand
    tokio::fs::remove_file(env.path("episode-0.mp3")).await.unwrap();

    let report = retention.prune(recurring.id, 0).await.unwrap();
    assert!(report.removed.is_empty());

    let report = retention.prune(recurring.id, 2).await.unwrap();
    assert_eq!(report.kept, 2);
    assert_eq!(report.removed.len(), 3);
    assert_eq!(report.file_errors, 0);

    let remaining = env.database.list_terminal_episodes(recurring.id).await.unwrap();
    let ids: Vec<Uuid> = remaining.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![episodes[4].id, episodes[3].id]);
    assert!(!env.path("episode-1.mp3").exists());
    assert!(env.path("episode-4.mp3").exists());
    assert!(env.database.get_recording(pending.id).await.unwrap().is_some());
    assert!(env.database.get_recording(recurring.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_completed_recording_is_delivered() {
    let env = TestEnv::new().await;
    let capture = Arc::new(FakeCapture::default());
    let uploader = Arc::new(FakeUploader::default());
    let notifier = Arc::new(FakeNotifier::default());
    let copy_dir = env.dir.path().join("secondary");

    let executor = RecordingExecutor::new(
        env.database.clone(),
        capture,
        Arc::new(FakeProbe),
        post_processor_with(
            &env.database,
            Some(LocalCopier::new(&copy_dir)),
            Some(uploader.clone() as Arc<dyn RemoteUploader>),
            Some(notifier.clone() as Arc<dyn Notifier>),
        ),
        settings(),
    );

    let mut recording = job(&env.path("delivered.mp3"), Utc::now(), 10);
    recording.delivery = RecordingDelivery::from_flags(true, true, true);
    env.database.insert_recording(&recording).await.unwrap();

    executor.execute(recording.id, Utc::now()).await.unwrap();

    let stored = env.database.require_recording(recording.id).await.unwrap();
    assert_eq!(stored.status, RecordingStatus::Completed);
    assert_eq!(stored.delivery.copy.status, Some(DeliveryStatus::Success));
    assert_eq!(stored.delivery.upload.status, Some(DeliveryStatus::Success));
    assert_eq!(stored.delivery.notify.status, Some(DeliveryStatus::Success));

    assert!(copy_dir.join("delivered.mp3").exists());
    assert_eq!(*uploader.uploads.lock().unwrap(), vec!["delivered.mp3".to_string()]);
    let messages = notifier.messages.lock().unwrap();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].0.contains("KEXP"));
}

#[tokio::test]
async fn test_delivery_failure_does_not_fail_recording() {
    let env = TestEnv::new().await;
    let capture = Arc::new(FakeCapture::default());
    let uploader = Arc::new(FakeUploader {
        fail: true,
        ..Default::default()
    });

    let executor = RecordingExecutor::new(
        env.database.clone(),
        capture,
        Arc::new(FakeProbe),
        post_processor_with(&env.database, None, Some(uploader as Arc<dyn RemoteUploader>), None),
        settings(),
    );

    let mut recording = job(&env.path("undelivered.mp3"), Utc::now(), 10);
    recording.delivery = RecordingDelivery::from_flags(true, true, false);
    env.database.insert_recording(&recording).await.unwrap();

    executor.execute(recording.id, Utc::now()).await.unwrap();

    let stored = env.database.require_recording(recording.id).await.unwrap();
    assert_eq!(stored.status, RecordingStatus::Completed);
    // copy requested without a configured destination
    assert_eq!(stored.delivery.copy.status, Some(DeliveryStatus::Failed));
    assert_eq!(stored.delivery.upload.status, Some(DeliveryStatus::Failed));
    assert!(stored.delivery.upload.message.unwrap().contains("507"));
    assert_eq!(stored.delivery.notify.status, None);
}
