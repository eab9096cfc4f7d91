use std::time::{Duration, Instant};

use indicatif::ProgressStyle;

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}")
        .expect("invalid progress template")
        .progress_chars("#>-")
}

/// 处理速度统计，仅用于展示
#[derive(Debug, Clone)]
pub struct Throughput {
    start: Instant,
    total: u64,
}

impl Throughput {
    pub fn new(total: u64) -> Self {
        Self { start: Instant::now(), total }
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    /// 返回 (每秒处理数量, 预计剩余时间)
    pub fn measure(&self, processed: u64, now: Instant) -> (f64, Duration) {
        rate_and_eta(processed, self.total, now.saturating_duration_since(self.start))
    }

    pub fn message(&self, processed: u64, now: Instant) -> String {
        let (speed, eta) = self.measure(processed, now);
        format!("({:.1} img/s) ETA: {}s", speed, eta.as_secs())
    }
}

fn rate_and_eta(processed: u64, total: u64, elapsed: Duration) -> (f64, Duration) {
    let elapsed = elapsed.as_secs_f64();
    let speed = if elapsed > 0.0 { processed as f64 / elapsed } else { 0.0 };
    let eta = if speed > 0.0 {
        Duration::from_secs_f64(total.saturating_sub(processed) as f64 / speed)
    } else {
        Duration::ZERO
    };
    (speed, eta)
}
