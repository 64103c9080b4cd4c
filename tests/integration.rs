use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ai_watermark_eraser::data_url::OUTPUT_MIME;
use ai_watermark_eraser::{
    BatchEvent, DataUrl, Error, RecordStatus, Result, SaveMode, Session, StatusKind,
    WatermarkRemover,
};
use tokio::sync::Semaphore;

/// Answers every call the same way and remembers what it was sent.
#[derive(Clone)]
struct ScriptedRemover {
    outcome: std::result::Result<Vec<u8>, String>,
    calls: Arc<Mutex<Vec<(String, String)>>>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl ScriptedRemover {
    fn succeeding(payload: &[u8]) -> Self {
        Self::with(Ok(payload.to_vec()))
    }

    fn failing(message: &str) -> Self {
        Self::with(Err(message.to_string()))
    }

    fn with(outcome: std::result::Result<Vec<u8>, String>) -> Self {
        Self {
            outcome,
            calls: Arc::default(),
            active: Arc::default(),
            max_active: Arc::default(),
        }
    }

    fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

impl WatermarkRemover for ScriptedRemover {
    async fn remove_watermark(&self, image_data: &str, mime_type: &str) -> Result<DataUrl> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.calls
            .lock()
            .unwrap()
            .push((image_data.to_string(), mime_type.to_string()));
        tokio::task::yield_now().await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        match &self.outcome {
            Ok(bytes) => Ok(DataUrl::from_bytes(bytes, OUTPUT_MIME)),
            Err(message) => Err(Error::Api {
                status: 429,
                message: message.clone(),
            }),
        }
    }
}

/// Blocks every call until a permit is released.
struct GatedRemover {
    gate: Arc<Semaphore>,
}

impl WatermarkRemover for GatedRemover {
    async fn remove_watermark(&self, _image_data: &str, _mime_type: &str) -> Result<DataUrl> {
        let permit = self.gate.acquire().await.expect("gate closed");
        permit.forget();
        Ok(DataUrl::from_bytes(b"done", OUTPUT_MIME))
    }
}

fn write_images(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
    names
        .iter()
        .map(|name| {
            let path = dir.join(name);
            std::fs::write(&path, name.as_bytes()).unwrap();
            path
        })
        .collect()
}

#[tokio::test]
async fn batch_completes_every_pending_record() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_images(dir.path(), &["a.png", "b.jpg", "c.webp"]);
    let session = Session::new(ScriptedRemover::succeeding(b"clean"));
    session.add_files(&files).unwrap();

    let summary = session.start_batch().await.unwrap();
    assert_eq!(summary.completed, 3);
    assert_eq!(summary.failed, 0);

    let calls = session.client().calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(session.client().max_active.load(Ordering::SeqCst), 1);

    // Sent in display order, as data URLs of the source bytes.
    let sent: Vec<Vec<u8>> = calls
        .iter()
        .map(|(data, _)| DataUrl::parse(data).unwrap().decode().unwrap())
        .collect();
    assert_eq!(sent, [b"a.png".to_vec(), b"b.jpg".to_vec(), b"c.webp".to_vec()]);

    for record in session.records() {
        assert_eq!(record.kind(), StatusKind::Completed);
        assert!(record.error().is_none());
        let processed = record.processed_url().unwrap();
        assert_eq!(processed.mime_type(), "image/png");
        assert_eq!(processed.decode().unwrap(), b"clean");
    }
}

#[tokio::test]
async fn failures_are_recorded_and_do_not_stop_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_images(dir.path(), &["a.png", "b.png"]);
    let session = Session::new(ScriptedRemover::failing("rate limited"));
    session.add_files(&files).unwrap();

    let mut events = Vec::new();
    let summary = session
        .start_batch_with_progress(|e| events.push(e))
        .await
        .unwrap();

    assert_eq!(summary.failed, 2);
    assert_eq!(session.client().calls().len(), 2);
    for record in session.records() {
        assert_eq!(
            record.status,
            RecordStatus::Error {
                message: "rate limited".to_string()
            }
        );
        assert!(record.processed_url().is_none());
    }
    assert!(matches!(events[0], BatchEvent::Started { .. }));
    assert!(matches!(&events[1], BatchEvent::Failed { message, .. } if message == "rate limited"));
    assert_eq!(events.len(), 4);
}

#[tokio::test]
async fn empty_batch_is_a_no_op() {
    let session = Session::new(ScriptedRemover::succeeding(b"x"));
    assert!(!session.can_start_batch());

    let summary = session.start_batch().await.unwrap();
    assert_eq!(summary.total(), 0);
    assert!(session.client().calls().is_empty());
    assert!(session.records().is_empty());
}

#[tokio::test]
async fn finished_records_are_not_reprocessed() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_images(dir.path(), &["a.png"]);
    let session = Session::new(ScriptedRemover::succeeding(b"x"));
    session.add_files(&files).unwrap();

    session.start_batch().await.unwrap();
    let second = session.start_batch().await.unwrap();
    assert_eq!(second.total(), 0);
    assert_eq!(session.client().calls().len(), 1);
}

#[tokio::test]
async fn second_batch_is_rejected_while_one_runs() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_images(dir.path(), &["a.png", "b.png"]);
    let late = write_images(dir.path(), &["late.png"]);
    let gate = Arc::new(Semaphore::new(0));
    let session = Session::new(GatedRemover { gate: gate.clone() });
    let ids = session.add_files(&files).unwrap();

    let running = session.start_batch();
    let meanwhile = async {
        while !session.is_processing() {
            tokio::task::yield_now().await;
        }
        assert!(!session.can_start_batch());
        assert!(matches!(session.start_batch().await, Err(Error::BatchInFlight)));

        // The first record is out for processing and cannot be removed.
        assert_eq!(session.record(ids[0]).unwrap().kind(), StatusKind::Processing);
        assert!(matches!(session.remove(ids[0]), Err(Error::RecordBusy(_))));

        // Added during the batch: waits for the next one.
        session.add_files(&late).unwrap();
        gate.add_permits(2);
    };

    let (summary, ()) = tokio::join!(running, meanwhile);
    let summary = summary.unwrap();
    assert_eq!(summary.completed, 2);
    assert!(!session.is_processing());

    let records = session.records();
    assert_eq!(records.len(), 3);
    assert_eq!(records[2].original_name, "late.png");
    assert_eq!(records[2].kind(), StatusKind::Pending);
    assert!(session.can_start_batch());
}

#[tokio::test]
async fn dropped_batch_fails_the_record_in_flight() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_images(dir.path(), &["a.png", "b.png"]);
    let gate = Arc::new(Semaphore::new(0));
    let session = Session::new(GatedRemover { gate: gate.clone() });
    let ids = session.add_files(&files).unwrap();

    let timed_out =
        tokio::time::timeout(Duration::from_millis(50), session.start_batch()).await;
    assert!(timed_out.is_err());
    assert!(!session.is_processing());

    let first = session.record(ids[0]).unwrap();
    assert_eq!(
        first.status,
        RecordStatus::Error {
            message: "batch cancelled".to_string()
        }
    );
    assert_eq!(session.record(ids[1]).unwrap().kind(), StatusKind::Pending);

    // The failed record is released like any other.
    session.remove(ids[0]).unwrap();
    assert_eq!(session.live_blobs(), 1);

    // The untouched record goes out with the next batch.
    gate.add_permits(1);
    let summary = session.start_batch().await.unwrap();
    assert_eq!(summary.completed, 1);
    assert_eq!(session.pending_count(), 0);
}

#[tokio::test]
async fn progress_callback_can_query_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_images(dir.path(), &["a.png", "b.png"]);
    let session = Session::new(ScriptedRemover::succeeding(b"x"));
    session.add_files(&files).unwrap();

    let mut seen = Vec::new();
    session
        .start_batch_with_progress(|event| {
            if let BatchEvent::Completed { .. } = event {
                seen.push(session.completed_count());
            }
        })
        .await
        .unwrap();
    assert_eq!(seen, [1, 2]);
}

#[tokio::test]
async fn records_removed_mid_batch_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_images(dir.path(), &["a.png", "b.png", "c.png"]);
    let gate = Arc::new(Semaphore::new(0));
    let session = Session::new(GatedRemover { gate: gate.clone() });
    let ids = session.add_files(&files).unwrap();

    let running = session.start_batch();
    let meanwhile = async {
        while !session.is_processing() {
            tokio::task::yield_now().await;
        }
        session.remove(ids[1]).unwrap();
        gate.add_permits(3);
    };

    let (summary, ()) = tokio::join!(running, meanwhile);
    let summary = summary.unwrap();
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.skipped, 1);

    let names: Vec<_> = session
        .records()
        .into_iter()
        .map(|r| {
            let kind = r.kind();
            (r.original_name, kind)
        })
        .collect();
    assert_eq!(
        names,
        [
            ("a.png".to_string(), StatusKind::Completed),
            ("c.png".to_string(), StatusKind::Completed)
        ]
    );
}

#[tokio::test]
async fn add_remove_clear_keep_order_and_release_blobs() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_images(dir.path(), &["a.png", "b.png", "c.png"]);
    let session = Session::new(ScriptedRemover::succeeding(b"x"));

    let ids = session.add_files(&files).unwrap();
    assert_eq!(session.live_blobs(), 3);

    session.remove(ids[0]).unwrap();
    let names: Vec<_> = session.records().into_iter().map(|r| r.original_name).collect();
    assert_eq!(names, ["b.png", "c.png"]);
    assert_eq!(session.live_blobs(), 2);
    assert!(matches!(session.remove(ids[0]), Err(Error::RecordNotFound(_))));

    assert_eq!(session.clear(), 2);
    assert!(session.records().is_empty());
    assert_eq!(session.live_blobs(), 0);
}

#[tokio::test]
async fn downloads_only_cover_completed_records() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let files = write_images(dir.path(), &["cat.jpg"]);
    let session = Session::new(ScriptedRemover::succeeding(b"png bytes"));
    let ids = session.add_files(&files).unwrap();

    assert!(session.download_all(&out, SaveMode::AsReturned).is_empty());
    assert!(matches!(
        session.download(ids[0], &out, SaveMode::AsReturned),
        Err(Error::NotCompleted(_))
    ));

    session.start_batch().await.unwrap();
    let outcomes = session.download_all(&out, SaveMode::AsReturned);
    assert_eq!(outcomes.len(), 1);
    let path = outcomes[0].result.as_ref().unwrap();
    assert_eq!(path.file_name().unwrap(), "no-watermark-cat.jpg");
    assert_eq!(std::fs::read(path).unwrap(), b"png bytes");
}

#[tokio::test]
async fn directories_are_expanded_into_records() {
    let dir = tempfile::tempdir().unwrap();
    write_images(dir.path(), &["b.png", "a.jpg", "readme.txt"]);
    let session = Session::new(ScriptedRemover::succeeding(b"x"));

    session.add_files(&[dir.path().to_path_buf()]).unwrap();
    let names: Vec<_> = session.records().into_iter().map(|r| r.original_name).collect();
    assert_eq!(names, ["a.jpg", "b.png"]);
    assert_eq!(session.pending_count(), 2);
}
