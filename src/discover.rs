use std::path::Path;

use log::{info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::error::PipelineError;
use crate::types::{ItemId, ResultMap};

/// 递归列出 `root` 下的所有文件
///
/// 不按后缀名过滤，无法解码的文件会在处理阶段记录为失败。同一目录下按文件名排序，
/// 因此相同的目录结构总是得到相同的顺序。
///
/// 符号链接本身不会被跟随：指向文件的链接和失效的链接都作为普通文件列出，
/// 指向目录的链接被忽略。文件名不是 UTF-8 的文件会被跳过并记录警告。
pub fn discover(root: impl AsRef<Path>) -> Result<Vec<ItemId>, PipelineError> {
    let root = root.as_ref();
    if !root.is_dir() {
        return Err(PipelineError::Discovery(root.to_path_buf()));
    }

    info!("开始扫描目录: {}", root.display());
    let entries = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) if is_item(&entry) => {
                let id = ItemId::from_path(entry.path());
                if id.is_none() {
                    warn!("跳过文件名不是 UTF-8 的文件: {}", entry.path().display());
                }
                id
            }
            Ok(_) => None,
            Err(e) => {
                warn!("跳过无法访问的路径: {}", e);
                None
            }
        })
        .collect::<Vec<_>>();
    info!("扫描完成，共 {} 个文件", entries.len());

    Ok(entries)
}

fn is_item(entry: &DirEntry) -> bool {
    let file_type = entry.file_type();
    file_type.is_file() || (file_type.is_symlink() && !entry.path().is_dir())
}

/// 去掉已经有结果的条目，保持扫描顺序
pub fn compute_pending(discovered: Vec<ItemId>, existing: &ResultMap) -> Vec<ItemId> {
    discovered.into_iter().filter(|id| !existing.contains_key(id)).collect()
}
