use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use ytlive_core::relay::{MediaRelay, PublishMode, RelayError, RelayResult};
use ytlive_core::{JobOutcome, RelayEngine, RelaySection};

/// Relay fake: `download` writes `<id>.mp4` into the working directory,
/// `publish` succeeds or fails per script, and every call is recorded.
#[derive(Default)]
struct FakeRelay {
    fail_download: HashSet<String>,
    fail_copy: HashSet<String>,
    fail_transcode: HashSet<String>,
    downloads: Mutex<Vec<String>>,
    publishes: Mutex<Vec<(String, PublishMode)>>,
}

impl FakeRelay {
    fn fail_download(mut self, ids: &[&str]) -> Self {
        self.fail_download = ids.iter().map(|id| id.to_string()).collect();
        self
    }

    fn fail_copy(mut self, ids: &[&str]) -> Self {
        self.fail_copy = ids.iter().map(|id| id.to_string()).collect();
        self
    }

    fn fail_transcode(mut self, ids: &[&str]) -> Self {
        self.fail_transcode = ids.iter().map(|id| id.to_string()).collect();
        self
    }

    fn downloads(&self) -> Vec<String> {
        self.downloads.lock().unwrap().clone()
    }

    fn publishes(&self) -> Vec<(String, PublishMode)> {
        self.publishes.lock().unwrap().clone()
    }
}

fn file_id(input: &Path) -> String {
    input
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default()
        .to_string()
}

#[async_trait::async_trait]
impl MediaRelay for FakeRelay {
    async fn download(&self, video_id: &str, work_dir: &Path) -> RelayResult<PathBuf> {
        self.downloads.lock().unwrap().push(video_id.to_string());
        if self.fail_download.contains(video_id) {
            return Err(RelayError::Download {
                id: video_id.to_string(),
                reason: "scripted failure".to_string(),
            });
        }
        let path = work_dir.join(format!("{video_id}.mp4"));
        tokio::fs::write(&path, b"media").await.unwrap();
        Ok(path)
    }

    async fn publish(&self, input: &Path, mode: PublishMode) -> RelayResult<()> {
        let id = file_id(input);
        self.publishes.lock().unwrap().push((id.clone(), mode));
        let failing = match mode {
            PublishMode::Copy => &self.fail_copy,
            PublishMode::Transcode => &self.fail_transcode,
        };
        if failing.contains(&id) {
            return Err(RelayError::Publish {
                mode,
                reason: "scripted failure".to_string(),
            });
        }
        Ok(())
    }
}

fn engine(dir: &TempDir, relay: Arc<FakeRelay>) -> (RelayEngine, PathBuf) {
    let work_dir = dir.path().join("work");
    let section = RelaySection {
        work_dir: work_dir.clone(),
        pause_between_seconds: 0,
    };
    (RelayEngine::new(relay, &section), work_dir)
}

fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|id| id.to_string()).collect()
}

#[tokio::test]
async fn copy_publish_success_removes_artifact_and_work_dir() {
    let dir = TempDir::new().unwrap();
    let relay = Arc::new(FakeRelay::default());
    let (engine, work_dir) = engine(&dir, relay.clone());

    let report = engine.run(&ids(&["v1"])).await.unwrap();
    assert_eq!(report.jobs.len(), 1);
    assert_eq!(report.jobs[0].outcome, JobOutcome::Done);
    assert_eq!(report.jobs[0].mode, Some(PublishMode::Copy));
    assert_eq!(relay.publishes(), vec![("v1".to_string(), PublishMode::Copy)]);
    // artifact removed and the emptied working directory reclaimed
    assert!(!work_dir.exists());
}

#[tokio::test]
async fn copy_failure_falls_back_to_transcode() {
    let dir = TempDir::new().unwrap();
    let relay = Arc::new(FakeRelay::default().fail_copy(&["v1"]));
    let (engine, work_dir) = engine(&dir, relay.clone());

    let report = engine.run(&ids(&["v1"])).await.unwrap();
    assert_eq!(report.jobs[0].outcome, JobOutcome::Done);
    assert_eq!(report.jobs[0].mode, Some(PublishMode::Transcode));
    assert_eq!(
        relay.publishes(),
        vec![
            ("v1".to_string(), PublishMode::Copy),
            ("v1".to_string(), PublishMode::Transcode)
        ]
    );
    assert!(!work_dir.join("v1.mp4").exists());
}

#[tokio::test]
async fn publish_failure_in_both_modes_still_cleans_up() {
    let dir = TempDir::new().unwrap();
    let relay = Arc::new(
        FakeRelay::default()
            .fail_copy(&["v1"])
            .fail_transcode(&["v1"]),
    );
    let (engine, work_dir) = engine(&dir, relay.clone());

    let report = engine.run(&ids(&["v1", "v2"])).await.unwrap();
    assert_eq!(report.jobs[0].outcome, JobOutcome::PublishFailed);
    // the failed video must not leak its download
    assert!(!work_dir.join("v1.mp4").exists());
    // and the rest of the selection still runs
    assert_eq!(report.jobs[1].outcome, JobOutcome::Done);
    assert!(!work_dir.join("v2.mp4").exists());
}

#[tokio::test]
async fn download_failure_skips_to_the_next_video() {
    let dir = TempDir::new().unwrap();
    let relay = Arc::new(FakeRelay::default().fail_download(&["v1"]));
    let (engine, _work_dir) = engine(&dir, relay.clone());

    let report = engine.run(&ids(&["v1", "v2"])).await.unwrap();
    assert_eq!(report.jobs[0].outcome, JobOutcome::DownloadFailed);
    assert_eq!(report.jobs[1].outcome, JobOutcome::Done);
    assert_eq!(relay.downloads(), vec!["v1".to_string(), "v2".to_string()]);
    // nothing was published for the failed download
    assert_eq!(relay.publishes(), vec![("v2".to_string(), PublishMode::Copy)]);
}

#[tokio::test]
async fn channel_shaped_id_is_rejected_before_download() {
    let dir = TempDir::new().unwrap();
    let relay = Arc::new(FakeRelay::default());
    let (engine, _work_dir) = engine(&dir, relay.clone());

    let report = engine.run(&ids(&["UCabc123"])).await.unwrap();
    assert_eq!(report.jobs[0].outcome, JobOutcome::RejectedId);
    assert!(relay.downloads().is_empty());
}

#[tokio::test]
async fn stop_before_run_schedules_nothing() {
    let dir = TempDir::new().unwrap();
    let relay = Arc::new(FakeRelay::default());
    let (engine, _work_dir) = engine(&dir, relay.clone());

    engine.stop_handle().stop();
    let report = engine.run(&ids(&["v1", "v2"])).await.unwrap();
    assert!(report.interrupted);
    assert!(report.jobs.is_empty());
    assert!(relay.downloads().is_empty());
}

#[tokio::test]
async fn preexisting_files_keep_the_work_dir_in_place() {
    let dir = TempDir::new().unwrap();
    let relay = Arc::new(FakeRelay::default());
    let (engine, work_dir) = engine(&dir, relay);

    std::fs::create_dir_all(&work_dir).unwrap();
    std::fs::write(work_dir.join("unrelated.bin"), b"keep me").unwrap();

    engine.run(&ids(&["v1"])).await.unwrap();
    assert!(work_dir.join("unrelated.bin").exists());
    assert!(!work_dir.join("v1.mp4").exists());
}

#[tokio::test]
async fn no_artifact_remains_for_any_processed_id() {
    let dir = TempDir::new().unwrap();
    let relay = Arc::new(
        FakeRelay::default()
            .fail_download(&["v2"])
            .fail_copy(&["v3"])
            .fail_transcode(&["v3"]),
    );
    let (engine, work_dir) = engine(&dir, relay);

    let selection = ids(&["v1", "v2", "v3"]);
    let report = engine.run(&selection).await.unwrap();
    assert_eq!(report.jobs.len(), 3);
    for id in &selection {
        assert!(
            !work_dir.join(format!("{id}.mp4")).exists(),
            "artifact for {id} leaked"
        );
    }
}
