use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::ProgressBar;
use log::{error, info};
use parking_lot::Mutex;

use crate::store::ResultStore;
use crate::types::ResultMap;

/// 何时触发自动保存
#[derive(Debug, Clone, Copy)]
pub struct CheckpointPolicy {
    /// 每处理多少张图片保存一次
    pub every: u64,
    /// 距离上次保存超过多久保存一次
    pub every_sec: Duration,
}

impl CheckpointPolicy {
    pub fn should_checkpoint(&self, processed: u64, last_checkpoint: Instant, now: Instant) -> bool {
        (self.every > 0 && processed % self.every == 0)
            || now.saturating_duration_since(last_checkpoint) > self.every_sec
    }
}

/// 将内存中的新结果与启动时加载的结果合并保存
///
/// 累积的结果在运行期间不会被清空，每次保存都包含所有尚未落盘的结果，
/// 所以某次保存失败后，下一次保存会把它补上。
pub struct Checkpointer {
    store: ResultStore,
    base: Arc<ResultMap>,
    accumulator: Arc<Mutex<ResultMap>>,
    policy: CheckpointPolicy,
    last_checkpoint: Instant,
    pb: ProgressBar,
}

impl Checkpointer {
    pub fn new(
        store: ResultStore,
        base: Arc<ResultMap>,
        accumulator: Arc<Mutex<ResultMap>>,
        policy: CheckpointPolicy,
        pb: ProgressBar,
    ) -> Self {
        Self { store, base, accumulator, policy, last_checkpoint: Instant::now(), pb }
    }

    pub fn should_checkpoint(&self, processed: u64, now: Instant) -> bool {
        self.policy.should_checkpoint(processed, self.last_checkpoint, now)
    }

    /// 保存一次，失败只记录日志
    ///
    /// 被更新的快照取代而跳过写入也算成功，那份快照已经包含本次的全部结果
    pub async fn checkpoint(&mut self, timeout: Duration) -> bool {
        // 在锁内复制一份快照，保存过程中不持有锁
        let delta = Arc::new(self.accumulator.lock().clone());
        self.last_checkpoint = Instant::now();

        match self.store.save_with_timeout(self.base.clone(), delta, timeout).await {
            Ok(Some(total)) => {
                self.pb.suspend(|| info!("已保存: 共 {} 条结果", total));
                true
            }
            Ok(None) => {
                self.pb.suspend(|| info!("已有更新的快照落盘，跳过本次保存"));
                true
            }
            Err(e) => {
                self.pb.suspend(|| error!("{}", e));
                false
            }
        }
    }
}
