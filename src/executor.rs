use std::sync::Arc;
use std::time::Duration;

use log::{debug, error};
use tokio::sync::Semaphore;
use tokio::task::{JoinSet, spawn_blocking};

use crate::processor::{ItemProcessor, process_item};
use crate::types::{ItemId, ItemResult};

/// 一个任务的最终结果
#[derive(Debug)]
pub struct Completion {
    pub id: ItemId,
    pub result: ItemResult,
}

/// 固定并发数的工作池
///
/// 所有任务在创建时一次性提交，每个任务需要先拿到一个工作槽位才会开始执行，
/// 完成顺序与提交顺序无关。
///
/// 超时是“软”超时：超时只会让任务被记录为 `Failure{"timeout"}`，
/// 实际的处理线程不会被打断，它会一直占用槽位直到自然结束，之后的结果被丢弃。
pub struct WorkerPool {
    tasks: JoinSet<Option<Completion>>,
    slots: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn spawn(
        items: Vec<ItemId>,
        processor: Arc<dyn ItemProcessor>,
        concurrency: usize,
        timeout: Duration,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for id in items {
            tasks.spawn(run_item(id, processor.clone(), slots.clone(), timeout));
        }
        Self { tasks, slots }
    }

    /// 按完成顺序返回下一个结果，所有任务结束后返回 None
    pub async fn next(&mut self) -> Option<Completion> {
        loop {
            match self.tasks.join_next().await? {
                Ok(Some(completion)) => return Some(completion),
                // 任务在开始前被取消
                Ok(None) => continue,
                Err(e) => error!("任务异常退出: {}", e),
            }
        }
    }

    /// 取消所有还没开始的任务，正在执行的任务继续在后台运行，不再等待其结果
    ///
    /// 返回被放弃等待的任务数量
    pub fn cancel(mut self) -> usize {
        self.slots.close();
        let abandoned = self.tasks.len();
        self.tasks.detach_all();
        abandoned
    }
}

async fn run_item(
    id: ItemId,
    processor: Arc<dyn ItemProcessor>,
    slots: Arc<Semaphore>,
    timeout: Duration,
) -> Option<Completion> {
    let Ok(permit) = slots.acquire_owned().await else {
        debug!("取消任务: {}", id);
        return None;
    };

    let path = id.clone();
    let handle = spawn_blocking(move || {
        // 槽位跟随实际的处理过程释放，而不是跟随超时
        let _permit = permit;
        process_item(&*processor, &path)
    });

    let result = match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => ItemResult::failure(e.to_string()),
        Err(_) => ItemResult::timeout(),
    };
    Some(Completion { id, result })
}
