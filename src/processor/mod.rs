use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use log::debug;

use crate::config::FaceOptions;
use crate::error::{PipelineError, ProcessError};
use crate::types::{BBox, EmbeddingDtype, FaceRecord, ItemId, ItemResult};

#[cfg(feature = "opencv")]
pub mod yunet;

/// 单张图片的处理逻辑
///
/// 会在多个工作线程上同时调用，内部的任何错误都应该通过 `ProcessError` 返回
pub trait ItemProcessor: Send + Sync {
    fn process(&self, data: &[u8]) -> Result<Vec<FaceRecord>, ProcessError>;
}

/// 读取并处理一个任务，所有错误（包括 panic）都被转换为 `ItemResult::Failure`
pub fn process_item(processor: &dyn ItemProcessor, id: &ItemId) -> ItemResult {
    let result = std::fs::read(id.as_path()).map_err(ProcessError::from).and_then(|data| {
        panic::catch_unwind(AssertUnwindSafe(|| processor.process(&data)))
            .unwrap_or_else(|payload| Err(ProcessError::Panic(panic_message(payload))))
    });
    match result {
        Ok(faces) => ItemResult::success(faces),
        Err(e) => ItemResult::failure(e.to_string()),
    }
}

/// 根据命令行参数创建人脸处理器
#[cfg(feature = "opencv")]
pub fn face_processor(opts: &FaceOptions) -> Result<Arc<dyn ItemProcessor>, PipelineError> {
    for model in [&opts.detector_model, &opts.recognizer_model] {
        if !model.is_file() {
            return Err(PipelineError::Backend(format!("模型文件不存在: {}", model.display())));
        }
    }
    Ok(Arc::new(FaceProcessor::new(yunet::YuNetDetector::new(opts.clone()))))
}

#[cfg(not(feature = "opencv"))]
pub fn face_processor(_opts: &FaceOptions) -> Result<Arc<dyn ItemProcessor>, PipelineError> {
    Err(PipelineError::Backend("编译时未启用 opencv 特性".to_string()))
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown".to_string()
    }
}

/// 检测器输出的原始人脸
#[derive(Debug, Clone)]
pub struct RawFace {
    /// (x1, y1, x2, y2)，可能超出图片范围
    pub bbox: [f32; 4],
    pub score: f32,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct Detection {
    pub width: u32,
    pub height: u32,
    pub faces: Vec<RawFace>,
}

/// 人脸检测 + 特征提取
pub trait FaceDetector: Send + Sync {
    /// 解码图片并检测人脸，无法解码时返回 `ProcessError::Decode`
    fn detect(&self, data: &[u8]) -> Result<Detection, ProcessError>;
}

/// 对检测结果做后处理：边框裁剪、质量评分
pub struct FaceProcessor<D> {
    detector: D,
}

impl<D: FaceDetector> FaceProcessor<D> {
    pub fn new(detector: D) -> Self {
        Self { detector }
    }
}

impl<D: FaceDetector> ItemProcessor for FaceProcessor<D> {
    fn process(&self, data: &[u8]) -> Result<Vec<FaceRecord>, ProcessError> {
        let detection = self.detector.detect(data)?;
        let (width, height) = (detection.width, detection.height);
        Ok(detection
            .faces
            .into_iter()
            .filter_map(|face| {
                let record = to_face_record(face, width, height);
                if record.is_none() {
                    debug!("丢弃退化的人脸边框");
                }
                record
            })
            .collect())
    }
}

fn to_face_record(face: RawFace, width: u32, height: u32) -> Option<FaceRecord> {
    let bbox = BBox::clamped(face.bbox, width, height)?;
    let image_area = width as u64 * height as u64;
    let rel_size = if image_area > 0 { bbox.area() as f64 / image_area as f64 } else { 0.0 };
    let quality_score = (face.score as f64 * (rel_size + 1e-6).sqrt()) as f32;
    Some(FaceRecord {
        det_score: face.score,
        bbox,
        quality_score,
        embedding: face.embedding,
        embedding_dtype: EmbeddingDtype::Float32,
    })
}
