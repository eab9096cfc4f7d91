use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use indicatif::ProgressBar;
use log::{info, warn};
use parking_lot::Mutex;

use crate::checkpoint::{CheckpointPolicy, Checkpointer};
use crate::config::PipelineOptions;
use crate::discover::{compute_pending, discover};
use crate::error::PipelineError;
use crate::executor::{Completion, WorkerPool};
use crate::processor::ItemProcessor;
use crate::progress::Throughput;
use crate::shutdown::ShutdownCoordinator;
use crate::store::ResultStore;
use crate::types::{ItemId, ResultMap};

/// 一次运行的统计
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// 本次需要处理的数量（已扣除之前的结果）
    pub total: u64,
    pub processed: u64,
    pub failed: u64,
    pub timed_out: u64,
    /// 每次自动保存时的已处理数量
    pub checkpoints: Vec<u64>,
    pub final_saved: bool,
    /// 是否因为收到停止请求而提前结束
    pub interrupted: bool,
}

pub struct PipelineBuilder {
    image_dir: PathBuf,
    output: PathBuf,
    options: PipelineOptions,
    max_workers: usize,
    pb: ProgressBar,
    shutdown: Option<Arc<ShutdownCoordinator>>,
}

impl PipelineBuilder {
    pub fn new(image_dir: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            image_dir: image_dir.into(),
            output: output.into(),
            options: PipelineOptions::default(),
            max_workers: 4,
            pb: ProgressBar::hidden(),
            shutdown: None,
        }
    }

    pub fn options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn progress(mut self, pb: ProgressBar) -> Self {
        self.pb = pb;
        self
    }

    pub fn shutdown(mut self, shutdown: Arc<ShutdownCoordinator>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            image_dir: self.image_dir,
            store: ResultStore::new(self.output),
            options: self.options,
            max_workers: self.max_workers.max(1),
            pb: self.pb,
            shutdown: self.shutdown.unwrap_or_default(),
        }
    }
}

/// 可断点续跑的批量处理流水线
pub struct Pipeline {
    image_dir: PathBuf,
    store: ResultStore,
    options: PipelineOptions,
    max_workers: usize,
    pb: ProgressBar,
    shutdown: Arc<ShutdownCoordinator>,
}

impl Pipeline {
    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// 扫描目录并加载已有结果，返回 (已有结果, 待处理列表)
    pub fn prepare(&self) -> Result<(ResultMap, Vec<ItemId>), PipelineError> {
        let discovered = discover(&self.image_dir)?;
        let existing = self.store.load();
        let pending = compute_pending(discovered, &existing);
        Ok((existing, pending))
    }

    pub async fn run(&self, processor: Arc<dyn ItemProcessor>) -> Result<RunReport, PipelineError> {
        let (existing, pending) = self.prepare()?;
        Ok(self.run_pending(existing, pending, processor).await)
    }

    /// 处理 `pending` 中的所有任务，直到全部完成或收到停止请求
    pub async fn run_pending(
        &self,
        existing: ResultMap,
        pending: Vec<ItemId>,
        processor: Arc<dyn ItemProcessor>,
    ) -> RunReport {
        let opts = &self.options;
        let mut report = RunReport { total: pending.len() as u64, ..Default::default() };
        if pending.is_empty() {
            info!("全部完成，没有需要处理的图片");
            self.shutdown.terminate();
            return report;
        }
        info!("开始处理 {} 张图片", report.total);

        let accumulator = Arc::new(Mutex::new(ResultMap::new()));
        let mut checkpointer = Checkpointer::new(
            self.store.clone(),
            Arc::new(existing),
            accumulator.clone(),
            CheckpointPolicy { every: opts.checkpoint_every, every_sec: opts.checkpoint_every_sec },
            self.pb.clone(),
        );

        self.pb.set_length(report.total);
        self.pb.set_position(0);
        let throughput = Throughput::new(report.total);
        let mut pool = WorkerPool::spawn(pending, processor, self.max_workers, opts.future_timeout);

        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.requested() => None,
                next = pool.next() => next,
            };
            let Some(Completion { id, result }) = next else {
                break;
            };

            if result.is_timeout() {
                report.timed_out += 1;
                self.pb.println(format!("处理超时: {}", id));
            } else if let Some(error) = result.error() {
                report.failed += 1;
                self.pb.println(format!("处理失败 {}: {}", id, error));
            }

            {
                let mut accumulator = accumulator.lock();
                if accumulator.contains_key(&id) {
                    warn!("重复的结果，已忽略: {}", id);
                } else {
                    accumulator.insert(id, result);
                }
            }
            report.processed += 1;

            let now = Instant::now();
            self.pb.inc(1);
            self.pb.set_message(throughput.message(report.processed, now));

            if checkpointer.should_checkpoint(report.processed, now) {
                self.pb.suspend(|| info!("自动保存……"));
                checkpointer.checkpoint(opts.save_timeout).await;
                report.checkpoints.push(report.processed);
            }
        }

        if self.shutdown.is_requested() {
            report.interrupted = true;
            self.shutdown.begin_draining();
            let abandoned = pool.cancel();
            self.pb.abandon_with_message("已中断");
            warn!("停止提交新任务，{} 个任务未完成", abandoned);
        } else {
            self.pb.finish_with_message("处理完成");
        }

        info!("最终保存……");
        report.final_saved = checkpointer.checkpoint(opts.max_shutdown_wait).await;
        self.shutdown.terminate();

        info!(
            "本次处理 {}/{} 张，失败 {} 张，超时 {} 张",
            report.processed, report.total, report.failed, report.timed_out
        );
        report
    }
}
