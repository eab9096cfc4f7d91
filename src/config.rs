use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::cli::*;

/// 流水线的各项阈值，均可以通过环境变量设置
#[derive(Parser, Debug, Clone)]
pub struct PipelineOptions {
    /// 每处理多少张图片自动保存一次
    #[arg(long, env = "CHECKPOINT_EVERY", value_name = "N", default_value_t = 20000, value_parser = clap::value_parser!(u64).range(1..))]
    pub checkpoint_every: u64,
    /// 距离上次保存超过多少秒自动保存一次
    #[arg(long, env = "CHECKPOINT_EVERY_SEC", value_name = "SECS", default_value = "500", value_parser = parse_seconds)]
    pub checkpoint_every_sec: Duration,
    /// 单张图片的处理超时（秒），超时的图片记录为 timeout，但处理线程不会被打断
    #[arg(long, env = "FUTURE_TIMEOUT", value_name = "SECS", default_value = "10", value_parser = parse_seconds)]
    pub future_timeout: Duration,
    /// 自动保存的最长等待时间（秒）
    #[arg(long, env = "SAVE_TIMEOUT", value_name = "SECS", default_value = "3", value_parser = parse_seconds)]
    pub save_timeout: Duration,
    /// 最终保存的最长等待时间（秒）
    #[arg(long, env = "MAX_SHUTDOWN_WAIT", value_name = "SECS", default_value = "5", value_parser = parse_seconds)]
    pub max_shutdown_wait: Duration,
    /// 正常退出时等待残留工作线程的最长时间（秒）
    #[arg(long, env = "THREAD_SHUTDOWN_TIMEOUT", value_name = "SECS", default_value = "3", value_parser = parse_seconds)]
    pub runtime_shutdown_wait: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            checkpoint_every: 20000,
            checkpoint_every_sec: Duration::from_secs(500),
            future_timeout: Duration::from_secs(10),
            save_timeout: Duration::from_secs(3),
            max_shutdown_wait: Duration::from_secs(5),
            runtime_shutdown_wait: Duration::from_secs(3),
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct FaceOptions {
    /// YuNet 人脸检测模型
    #[arg(long, value_name = "ONNX", default_value = "face_detection_yunet_2023mar.onnx")]
    pub detector_model: PathBuf,
    /// SFace 人脸特征模型
    #[arg(long, value_name = "ONNX", default_value = "face_recognition_sface_2021dec.onnx")]
    pub recognizer_model: PathBuf,
    /// 人脸检测置信度阈值
    #[arg(long, value_name = "SCORE", default_value_t = 0.5)]
    pub score_threshold: f32,
    /// 非极大值抑制阈值
    #[arg(long, value_name = "IOU", default_value_t = 0.3)]
    pub nms_threshold: f32,
    /// 非极大值抑制前保留的最大候选框数量
    #[arg(long, value_name = "K", default_value_t = 5000)]
    pub top_k: i32,
    /// 检测时图片长边的最大尺寸
    #[arg(long, value_name = "SIZE", default_value_t = 640)]
    pub det_size: i32,
    /// CUDA 设备编号，负数表示使用 CPU
    #[arg(long, value_name = "N", default_value_t = 0, allow_negative_numbers = true)]
    pub device_id: i32,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "facescan", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 批量检测目录中的人脸，结果保存到文件，支持断点续跑
    ///
    /// 人脸检测依赖 opencv 特性（cargo build --features opencv），
    /// 未启用时只能处理空目录，遇到待处理的图片会直接报错退出。
    Run(RunCommand),
}

fn parse_seconds(s: &str) -> Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|_| format!("无效的秒数: {}", s))?;
    Duration::try_from_secs_f64(secs).map_err(|_| format!("无效的秒数: {}", s))
}
