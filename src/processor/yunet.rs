use std::cell::RefCell;

use log::{info, warn};
use opencv::core::{Mat, Ptr, Scalar, Size, Vector};
use opencv::objdetect::{FaceDetectorYN, FaceRecognizerSF};
use opencv::prelude::*;
use opencv::{core, dnn, imgcodecs, imgproc};

use super::{Detection, FaceDetector, RawFace};
use crate::config::FaceOptions;
use crate::error::ProcessError;

// YuNet 每一行的格式：x, y, w, h, 5 个关键点 (10), score
const YUNET_COLS: i32 = 15;

thread_local! {
    // 模型不是线程安全的，每个工作线程各自持有一份
    static MODELS: RefCell<Option<Models>> = const { RefCell::new(None) };
}

struct Models {
    detector: Ptr<FaceDetectorYN>,
    recognizer: Ptr<FaceRecognizerSF>,
}

impl Models {
    fn create(opts: &FaceOptions, backend: (i32, i32)) -> opencv::Result<Self> {
        let detector = FaceDetectorYN::create(
            &opts.detector_model.to_string_lossy(),
            "",
            Size::new(opts.det_size, opts.det_size),
            opts.score_threshold,
            opts.nms_threshold,
            opts.top_k,
            backend.0,
            backend.1,
        )?;
        let recognizer = FaceRecognizerSF::create(
            &opts.recognizer_model.to_string_lossy(),
            "",
            backend.0,
            backend.1,
        )?;
        Ok(Self { detector, recognizer })
    }
}

/// OpenCV YuNet 人脸检测 + SFace 特征提取
pub struct YuNetDetector {
    opts: FaceOptions,
    backend: (i32, i32),
}

impl YuNetDetector {
    pub fn new(opts: FaceOptions) -> Self {
        let backend = select_backend(opts.device_id);
        Self { opts, backend }
    }

    fn detect_image(&self, models: &mut Models, img: &Mat) -> opencv::Result<Vec<RawFace>> {
        // 长边缩放到 det_size 以内，检测完成后再把坐标映射回原图
        let longest = img.cols().max(img.rows());
        let scale = if longest > self.opts.det_size {
            self.opts.det_size as f64 / longest as f64
        } else {
            1.0
        };
        let mut resized = Mat::default();
        let input = if scale < 1.0 {
            imgproc::resize(
                img,
                &mut resized,
                Size::default(),
                scale,
                scale,
                imgproc::InterpolationFlags::INTER_AREA as i32,
            )?;
            &resized
        } else {
            img
        };

        models.detector.set_input_size(Size::new(input.cols(), input.rows()))?;
        let mut faces = Mat::default();
        models.detector.detect(input, &mut faces)?;

        let mut result = Vec::with_capacity(faces.rows().max(0) as usize);
        for i in 0..faces.rows() {
            let mut face_box = Mat::new_rows_cols_with_default(1, YUNET_COLS, core::CV_32F, Scalar::all(0.))?;
            for j in 0..YUNET_COLS {
                *face_box.at_2d_mut::<f32>(0, j)? = *faces.at_2d::<f32>(i, j)?;
            }

            let mut aligned = Mat::default();
            models.recognizer.align_crop(input, &face_box, &mut aligned)?;
            let mut feature = Mat::default();
            models.recognizer.feature(&aligned, &mut feature)?;

            let (x, y) = (*face_box.at_2d::<f32>(0, 0)?, *face_box.at_2d::<f32>(0, 1)?);
            let (w, h) = (*face_box.at_2d::<f32>(0, 2)?, *face_box.at_2d::<f32>(0, 3)?);
            let s = scale as f32;
            result.push(RawFace {
                bbox: [x / s, y / s, (x + w) / s, (y + h) / s],
                score: *face_box.at_2d::<f32>(0, YUNET_COLS - 1)?,
                embedding: feature.data_typed::<f32>()?.to_vec(),
            });
        }
        Ok(result)
    }
}

impl FaceDetector for YuNetDetector {
    fn detect(&self, data: &[u8]) -> Result<Detection, ProcessError> {
        let buf = Vector::<u8>::from_slice(data);
        let img = match imgcodecs::imdecode(&buf, imgcodecs::IMREAD_COLOR) {
            Ok(img) if !img.empty() => img,
            _ => return Err(ProcessError::Decode),
        };

        let faces = MODELS.with(|models| {
            let mut models = models.borrow_mut();
            if models.is_none() {
                *models = Some(Models::create(&self.opts, self.backend)?);
            }
            let models = models.as_mut().expect("models initialized above");
            self.detect_image(models, &img)
        });
        let faces = faces.map_err(|e| ProcessError::Detect(e.to_string()))?;

        Ok(Detection { width: img.cols() as u32, height: img.rows() as u32, faces })
    }
}

/// device_id 为负数时使用 CPU，否则尝试使用对应的 CUDA 设备
fn select_backend(device_id: i32) -> (i32, i32) {
    let cpu = (dnn::DNN_BACKEND_OPENCV, dnn::DNN_TARGET_CPU);
    if device_id < 0 {
        info!("使用 CPU 推理");
        return cpu;
    }
    match core::set_device(device_id) {
        Ok(()) => {
            info!("使用 CUDA 设备 {}", device_id);
            (dnn::DNN_BACKEND_CUDA, dnn::DNN_TARGET_CUDA)
        }
        Err(e) => {
            warn!("无法使用 CUDA 设备 {}: {}，回退到 CPU", device_id, e);
            cpu
        }
    }
}
