use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// 结果文件中保存的完整映射
pub type ResultMap = BTreeMap<ItemId, ItemResult>;

/// 任务的唯一标识，即图片的路径
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// 路径不是合法的 UTF-8 时返回 None
    ///
    /// 不做有损转换，否则不同的文件名可能得到同一个标识，且无法再打开原文件
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        path.as_ref().to_str().map(Self::new)
    }

    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// 单张图片的处理结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ItemResult {
    Success { face_count: usize, faces: Vec<FaceRecord> },
    Failure { error: String },
}

impl ItemResult {
    /// 成功结果，face_count 始终等于 faces 的长度
    pub fn success(faces: Vec<FaceRecord>) -> Self {
        Self::Success { face_count: faces.len(), faces }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure { error: error.into() }
    }

    pub fn timeout() -> Self {
        Self::failure(TIMEOUT_ERROR)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Failure { error } if error == TIMEOUT_ERROR)
    }

    /// 成功时返回人脸数量
    pub fn face_count(&self) -> Option<usize> {
        match self {
            Self::Success { face_count, .. } => Some(*face_count),
            Self::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error } => Some(error),
        }
    }
}

/// 超时任务记录的错误信息
pub const TIMEOUT_ERROR: &str = "timeout";

/// 人脸边框，坐标已被限制在图片范围内，且 x1 < x2, y1 < y2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BBox {
    /// 将浮点坐标截断为整数并限制在 `width x height` 的图片内
    ///
    /// 截断后面积为零的边框返回 None
    pub fn clamped(raw: [f32; 4], width: u32, height: u32) -> Option<Self> {
        let x1 = (raw[0] as i32).max(0);
        let y1 = (raw[1] as i32).max(0);
        let x2 = (raw[2] as i32).min(width as i32 - 1);
        let y2 = (raw[3] as i32).min(height as i32 - 1);
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(Self { x1, y1, x2, y2 })
    }

    pub fn area(&self) -> u64 {
        (self.x2 - self.x1) as u64 * (self.y2 - self.y1) as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmbeddingDtype {
    Float32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRecord {
    /// 检测置信度，范围 [0, 1]
    pub det_score: f32,
    pub bbox: BBox,
    /// 综合了置信度与人脸相对面积的质量评分
    pub quality_score: f32,
    pub embedding: Vec<f32>,
    pub embedding_dtype: EmbeddingDtype,
}
