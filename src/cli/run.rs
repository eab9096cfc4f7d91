use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use indicatif::ProgressBar;
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::{FaceOptions, Opts, PipelineOptions};
use crate::error::PipelineError;
use crate::pipeline::PipelineBuilder;
use crate::processor::face_processor;
use crate::progress::pb_style;
use crate::shutdown::{ShutdownCoordinator, listen_signals};

#[derive(Parser, Debug, Clone)]
pub struct RunCommand {
    #[command(flatten)]
    pub pipeline: PipelineOptions,
    #[command(flatten)]
    pub face: FaceOptions,
    /// 图片所在目录，会递归扫描所有文件
    pub image_dir: PathBuf,
    /// 结果文件，已存在时会跳过其中已经处理过的图片
    pub output: PathBuf,
    /// 同时处理的图片数量
    #[arg(long, value_name = "N", default_value_t = 4, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_workers: u32,
}

impl SubCommandExtend for RunCommand {
    async fn run(&self, _opts: &Opts) -> Result<()> {
        if !self.image_dir.is_dir() {
            return Err(PipelineError::Discovery(self.image_dir.clone()).into());
        }

        let shutdown = Arc::new(ShutdownCoordinator::new());
        listen_signals(shutdown.clone())?;

        let pipeline = PipelineBuilder::new(&self.image_dir, &self.output)
            .options(self.pipeline.clone())
            .max_workers(self.max_workers as usize)
            .progress(ProgressBar::no_length().with_style(pb_style()))
            .shutdown(shutdown)
            .build();

        let (existing, pending) = pipeline.prepare()?;
        if pending.is_empty() {
            info!("全部完成，共 {} 条结果", existing.len());
            return Ok(());
        }

        let processor = face_processor(&self.face)?;
        let report = pipeline.run_pending(existing, pending, processor).await;

        // 收到停止请求时直接退出，不等待仍在运行的处理线程和保存线程
        if report.interrupted {
            info!("退出");
            std::process::exit(0);
        }

        info!("完成");
        Ok(())
    }
}
