//! 目录复制与清理

use std::fs;
use std::path::Path;

use fleet_core::{FleetError, FleetResult};
use walkdir::WalkDir;

/// 把 `src` 的内容合并到 `dst`，同名文件被覆盖
pub fn copy_dir_all(src: &Path, dst: &Path) -> FleetResult<()> {
    fs::create_dir_all(dst)?;

    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(|e| FleetError::Io(e.into()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| FleetError::Internal(format!("计算相对路径失败: {e}")))?;
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }

    Ok(())
}

/// 删除文件或目录，不存在时视为成功
pub fn remove_path(path: &Path) -> FleetResult<()> {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
