use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use parking_lot::Mutex;
use tokio::task::spawn_blocking;

use crate::error::{PipelineError, StoreError};
use crate::types::{ItemId, ItemResult, ResultMap};

/// 结果文件
///
/// 整个文件是一个 bincode 编码的 `ResultMap`，保存时先写入 `<path>.tmp`，
/// 再通过 rename 原子替换，因此磁盘上的文件要么是旧快照，要么是新快照。
#[derive(Clone)]
pub struct ResultStore {
    path: PathBuf,
    tmp_path: PathBuf,
    /// 写入锁，内部记录已经落盘的最新快照代数
    writer: Arc<Mutex<u64>>,
    generation: Arc<Mutex<u64>>,
}

impl ResultStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut tmp_path = OsString::from(path.as_os_str());
        tmp_path.push(".tmp");
        Self {
            path,
            tmp_path: PathBuf::from(tmp_path),
            writer: Arc::new(Mutex::new(0)),
            generation: Arc::new(Mutex::new(0)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tmp_path(&self) -> &Path {
        &self.tmp_path
    }

    /// 读取已有的结果
    ///
    /// 文件不存在或者无法解析时返回空结果，不会中止运行
    pub fn load(&self) -> ResultMap {
        if !self.path.exists() {
            return ResultMap::new();
        }
        match read_map(&self.path) {
            Ok(map) => {
                info!("已加载 {} 条结果", map.len());
                map
            }
            Err(source) => {
                let e = PipelineError::Load { path: self.path.clone(), source };
                warn!("{}，将从头开始", e);
                ResultMap::new()
            }
        }
    }

    /// 合并 `base` 和 `delta` 并原子写入，`delta` 中的同名键优先
    ///
    /// 返回写入的结果数量，已有更新的快照落盘时跳过写入并返回 None
    pub fn save(&self, base: &ResultMap, delta: &ResultMap) -> Result<Option<usize>, StoreError> {
        let generation = self.next_generation();
        self.save_generation(generation, base, delta)
    }

    /// 在后台线程中保存，最多等待 `timeout`
    ///
    /// 超时后保存线程不会被取消，它仍可能稍后完成写入。返回 Ok 表示 rename 已在期限内完成。
    pub async fn save_with_timeout(
        &self,
        base: Arc<ResultMap>,
        delta: Arc<ResultMap>,
        timeout: Duration,
    ) -> Result<Option<usize>, PipelineError> {
        let generation = self.next_generation();
        let store = self.clone();
        let handle = spawn_blocking(move || store.save_generation(generation, &base, &delta));

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(result)) => Ok(result?),
            Ok(Err(e)) => Err(StoreError::Join(e.to_string()).into()),
            Err(_) => Err(PipelineError::SaveTimeout(timeout)),
        }
    }

    fn next_generation(&self) -> u64 {
        let mut generation = self.generation.lock();
        *generation += 1;
        *generation
    }

    fn save_generation(
        &self,
        generation: u64,
        base: &ResultMap,
        delta: &ResultMap,
    ) -> Result<Option<usize>, StoreError> {
        let mut committed = self.writer.lock();
        // 一个超时的旧保存可能排在新保存之后执行，此时不能用旧快照覆盖新快照
        if generation < *committed {
            info!("跳过过期的保存 (第 {} 次，已落盘第 {} 次)", generation, *committed);
            return Ok(None);
        }

        let merged = merge(base, delta);
        let file = File::create(&self.tmp_path)?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, &merged)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);
        fs::rename(&self.tmp_path, &self.path)?;

        *committed = generation;
        Ok(Some(merged.len()))
    }
}

/// 借用合并后的视图，序列化结果与 `ResultMap` 相同
fn merge<'a>(base: &'a ResultMap, delta: &'a ResultMap) -> BTreeMap<&'a ItemId, &'a ItemResult> {
    let mut merged: BTreeMap<&ItemId, &ItemResult> = base.iter().collect();
    merged.extend(delta.iter());
    merged
}

/// 整个文件读入内存后再解码，损坏文件中过大的长度前缀只会导致解码失败，不会按该长度分配内存
fn read_map(path: &Path) -> Result<ResultMap, StoreError> {
    let bytes = fs::read(path)?;
    Ok(bincode::deserialize(&bytes)?)
}
