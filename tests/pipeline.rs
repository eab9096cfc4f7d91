use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use assert_fs::TempDir;
use assert_fs::prelude::*;
use facescan::config::PipelineOptions;
use facescan::processor::ItemProcessor;
use facescan::shutdown::{ShutdownCoordinator, ShutdownState};
use facescan::*;
use rstest::*;

/// 根据文件内容决定结果的处理器：
/// 数字 n 表示 n 张人脸，`err` 返回错误，`sleep` 睡眠 500ms
#[derive(Default)]
struct ScriptedProcessor {
    calls: AtomicUsize,
}

impl ItemProcessor for ScriptedProcessor {
    fn process(&self, data: &[u8]) -> Result<Vec<FaceRecord>, ProcessError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match data {
            b"err" => Err(ProcessError::Detect("detector exploded".to_string())),
            b"sleep" => {
                std::thread::sleep(Duration::from_millis(500));
                Ok(vec![])
            }
            _ => {
                let n: usize = std::str::from_utf8(data).unwrap().trim().parse().unwrap();
                Ok((0..n).map(|i| face(i as i32)).collect())
            }
        }
    }
}

fn face(i: i32) -> FaceRecord {
    FaceRecord {
        det_score: 0.9,
        bbox: BBox { x1: i, y1: i, x2: i + 10, y2: i + 10 },
        quality_score: 0.1,
        embedding: vec![0.0; 8],
        embedding_dtype: EmbeddingDtype::Float32,
    }
}

fn id(dir: &Path, name: &str) -> ItemId {
    ItemId::from_path(dir.join(name)).unwrap()
}

fn options() -> PipelineOptions {
    PipelineOptions { future_timeout: Duration::from_secs(5), ..Default::default() }
}

#[rstest]
#[case::serial(1)]
#[case::parallel(4)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mixed_results(#[case] workers: usize) -> Result<()> {
    let images = TempDir::new()?;
    images.child("a.jpg").write_str("1")?;
    images.child("b.jpg").write_str("0")?;
    images.child("c.jpg").write_str("err")?;
    let output = TempDir::new()?;

    let pipeline = PipelineBuilder::new(images.path(), output.path().join("faces.bin"))
        .options(options())
        .max_workers(workers)
        .build();
    let report = pipeline.run(Arc::new(ScriptedProcessor::default())).await?;

    assert_eq!(report.processed, 3);
    assert_eq!(report.failed, 1);
    assert!(report.final_saved);
    assert!(!report.interrupted);

    let store = pipeline.store().load();
    assert_eq!(store.len(), 3);
    assert_eq!(store[&id(images.path(), "a.jpg")], ItemResult::success(vec![face(0)]));
    assert_eq!(store[&id(images.path(), "b.jpg")], ItemResult::success(vec![]));
    assert_eq!(store[&id(images.path(), "c.jpg")], ItemResult::failure("detector exploded"));
    assert!(!pipeline.store().tmp_path().exists());

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn resume_skips_existing() -> Result<()> {
    let images = TempDir::new()?;
    for name in ["a.jpg", "b.jpg", "c.jpg", "d.jpg", "e.jpg"] {
        images.child(name).write_str("2")?;
    }
    let output = TempDir::new()?;
    let store = ResultStore::new(output.path().join("faces.bin"));

    // 之前的运行已经处理过 a 和 d
    let mut previous = ResultMap::new();
    previous.insert(id(images.path(), "a.jpg"), ItemResult::failure("old"));
    previous.insert(id(images.path(), "d.jpg"), ItemResult::failure("old"));
    store.save(&previous, &ResultMap::new())?;

    let processor = Arc::new(ScriptedProcessor::default());
    let pipeline = PipelineBuilder::new(images.path(), store.path()).options(options()).build();
    let report = pipeline.run(processor.clone()).await?;

    assert_eq!(report.total, 3);
    assert_eq!(report.processed, 3);
    assert_eq!(processor.calls.load(Ordering::SeqCst), 3);

    let saved = store.load();
    assert_eq!(saved.len(), 5);
    for (key, value) in &previous {
        assert_eq!(&saved[key], value);
    }
    assert_eq!(saved[&id(images.path(), "b.jpg")].face_count(), Some(2));

    // 再跑一次不会处理任何图片
    let report = pipeline.run(processor.clone()).await?;
    assert_eq!(report.total, 0);
    assert_eq!(processor.calls.load(Ordering::SeqCst), 3);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn checkpoint_every_three() -> Result<()> {
    let images = TempDir::new()?;
    for i in 0..7 {
        images.child(format!("{i}.jpg")).write_str("1")?;
    }
    let output = TempDir::new()?;

    let pipeline = PipelineBuilder::new(images.path(), output.path().join("faces.bin"))
        .options(PipelineOptions { checkpoint_every: 3, ..options() })
        .max_workers(2)
        .build();
    let report = pipeline.run(Arc::new(ScriptedProcessor::default())).await?;

    assert_eq!(report.checkpoints, vec![3, 6]);
    assert!(report.final_saved);
    assert_eq!(pipeline.store().load().len(), 7);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timeout_is_recorded() -> Result<()> {
    let images = TempDir::new()?;
    images.child("fast.jpg").write_str("1")?;
    images.child("slow.jpg").write_str("sleep")?;
    let output = TempDir::new()?;

    let pipeline = PipelineBuilder::new(images.path(), output.path().join("faces.bin"))
        .options(PipelineOptions { future_timeout: Duration::from_millis(50), ..options() })
        .max_workers(2)
        .build();
    let report = pipeline.run(Arc::new(ScriptedProcessor::default())).await?;

    assert_eq!(report.processed, 2);
    assert_eq!(report.timed_out, 1);

    let store = pipeline.store().load();
    assert!(store[&id(images.path(), "slow.jpg")].is_timeout());
    assert!(store[&id(images.path(), "fast.jpg")].is_success());

    Ok(())
}

/// 处理到第 `after` 张图片时连续发送两次停止请求
struct InterruptingProcessor {
    shutdown: Arc<ShutdownCoordinator>,
    after: usize,
    calls: AtomicUsize,
    requests: AtomicUsize,
}

impl ItemProcessor for InterruptingProcessor {
    fn process(&self, _data: &[u8]) -> Result<Vec<FaceRecord>, ProcessError> {
        let calls = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if calls == self.after {
            for name in ["SIGINT", "SIGINT"] {
                if self.shutdown.on_signal(name) {
                    self.requests.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
        std::thread::sleep(Duration::from_millis(10));
        Ok(vec![])
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_saves_completed_work() -> Result<()> {
    let images = TempDir::new()?;
    for i in 0..20 {
        images.child(format!("{i:02}.jpg")).write_str("0")?;
    }
    let output = TempDir::new()?;
    let shutdown = Arc::new(ShutdownCoordinator::new());
    let processor = Arc::new(InterruptingProcessor {
        shutdown: shutdown.clone(),
        after: 3,
        calls: AtomicUsize::new(0),
        requests: AtomicUsize::new(0),
    });

    let pipeline = PipelineBuilder::new(images.path(), output.path().join("faces.bin"))
        .options(options())
        .max_workers(1)
        .shutdown(shutdown.clone())
        .build();
    let report = pipeline.run(processor.clone()).await?;

    assert!(report.interrupted);
    assert!(report.final_saved);
    assert!(report.processed < 20);
    assert_eq!(processor.requests.load(Ordering::SeqCst), 1);
    assert_eq!(shutdown.state(), ShutdownState::Terminated);

    // 已完成的结果都被保存
    let saved = pipeline.store().load();
    assert_eq!(saved.len() as u64, report.processed);

    // 重新运行只处理剩下的图片
    let pipeline = PipelineBuilder::new(images.path(), pipeline.store().path())
        .options(options())
        .build();
    let resumed = pipeline.run(Arc::new(ScriptedProcessor::default())).await?;
    assert_eq!(resumed.total, 20 - report.processed);
    assert_eq!(pipeline.store().load().len(), 20);

    Ok(())
}

#[tokio::test]
async fn missing_directory_is_fatal() {
    let output = TempDir::new().unwrap();
    let pipeline =
        PipelineBuilder::new(output.path().join("missing"), output.path().join("faces.bin")).build();
    let err = pipeline.run(Arc::new(ScriptedProcessor::default())).await.unwrap_err();
    assert!(matches!(err, PipelineError::Discovery(_)));
    assert!(!output.path().join("faces.bin").exists());
}

#[tokio::test]
async fn corrupted_store_starts_fresh() -> Result<()> {
    let images = TempDir::new()?;
    images.child("a.jpg").write_str("1")?;
    let output = TempDir::new()?;
    output.child("faces.bin").write_binary(b"\xff\xff\xff\xff\xff\xff\xff\xffgarbage")?;

    let pipeline =
        PipelineBuilder::new(images.path(), output.path().join("faces.bin")).options(options()).build();
    let report = pipeline.run(Arc::new(ScriptedProcessor::default())).await?;

    assert_eq!(report.processed, 1);
    assert_eq!(pipeline.store().load().len(), 1);
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn symlinks_are_processed() -> Result<()> {
    let images = TempDir::new()?;
    images.child("a.jpg").write_str("2")?;
    images.child("link.jpg").symlink_to_file(images.child("a.jpg").path())?;
    images.child("broken.jpg").symlink_to_file(images.child("gone.jpg").path())?;
    let output = TempDir::new()?;

    let pipeline =
        PipelineBuilder::new(images.path(), output.path().join("faces.bin")).options(options()).build();
    let report = pipeline.run(Arc::new(ScriptedProcessor::default())).await?;

    assert_eq!(report.processed, 3);
    assert_eq!(report.failed, 1);
    let store = pipeline.store().load();
    assert_eq!(store[&id(images.path(), "link.jpg")].face_count(), Some(2));
    assert!(!store[&id(images.path(), "broken.jpg")].is_success());
    Ok(())
}
