use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use log::warn;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShutdownState {
    Running = 0,
    ShutdownRequested = 1,
    Draining = 2,
    Terminated = 3,
}

impl ShutdownState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Running,
            1 => Self::ShutdownRequested,
            2 => Self::Draining,
            _ => Self::Terminated,
        }
    }
}

/// 协调中断信号与正在运行的流水线
///
/// 状态只会向前推进：Running → ShutdownRequested → Draining → Terminated
pub struct ShutdownCoordinator {
    requested: AtomicBool,
    state: AtomicU8,
    notify: watch::Sender<bool>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
            state: AtomicU8::new(ShutdownState::Running as u8),
            notify: watch::Sender::new(false),
        }
    }

    /// 请求停止，只有第一次调用返回 true
    pub fn request(&self) -> bool {
        if self.requested.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.advance(ShutdownState::ShutdownRequested);
        self.notify.send_replace(true);
        true
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ShutdownState {
        ShutdownState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// 流水线已经观察到停止请求，开始取消未开始的任务
    pub fn begin_draining(&self) {
        self.advance(ShutdownState::Draining);
    }

    /// 最终保存已经结束
    pub fn terminate(&self) {
        self.advance(ShutdownState::Terminated);
    }

    /// 等待停止请求
    pub async fn requested(&self) {
        let mut rx = self.notify.subscribe();
        // Sender 由自身持有，wait_for 不会因为通道关闭而返回错误
        let _ = rx.wait_for(|requested| *requested).await;
    }

    /// 信号回调，重复的信号只记录日志
    pub fn on_signal(&self, name: &str) -> bool {
        if self.request() {
            warn!("收到 {} 信号，停止处理并保存结果……", name);
            true
        } else {
            warn!("收到 {} 信号，正在停止中……", name);
            false
        }
    }

    fn advance(&self, to: ShutdownState) {
        self.state.fetch_max(to as u8, Ordering::SeqCst);
    }
}

/// 注册 SIGINT / SIGTERM 处理，信号转发给 `coordinator`
pub fn listen_signals(
    coordinator: Arc<ShutdownCoordinator>,
) -> Result<JoinHandle<()>, PipelineError> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt()).map_err(PipelineError::Signal)?;
        let mut sigterm = signal(SignalKind::terminate()).map_err(PipelineError::Signal)?;
        Ok(tokio::spawn(async move {
            loop {
                let name = tokio::select! {
                    Some(()) = sigint.recv() => "SIGINT",
                    Some(()) = sigterm.recv() => "SIGTERM",
                    else => break,
                };
                coordinator.on_signal(name);
            }
        }))
    }

    #[cfg(not(unix))]
    {
        Ok(tokio::spawn(async move {
            loop {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    log::error!("监听 Ctrl-C 失败: {}", e);
                    break;
                }
                coordinator.on_signal("Ctrl-C");
            }
        }))
    }
}
