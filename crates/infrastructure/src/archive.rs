//! zip 归档的打包与解包
//!
//! 条目路径相对于被打包目录本身（不含顶层目录名），解包时拒绝越界路径。
//! 同步函数会阻塞，异步调用方应使用 `*_blocking` 包装。

use std::fs::{self, File};
use std::io::{Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};

use fleet_core::{FleetError, FleetResult};
use tracing::debug;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

fn archive_error(context: &str, e: impl std::fmt::Display) -> FleetError {
    FleetError::Archive(format!("{context}: {e}"))
}

fn write_directory<W: Write + Seek>(dir: &Path, writer: W) -> FleetResult<W> {
    let mut zip = ZipWriter::new(writer);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o755)
        .large_file(true);

    let mut buffer = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| archive_error("遍历目录失败", e))?;
        let path = entry.path();
        let name = path
            .strip_prefix(dir)
            .map_err(|e| archive_error("计算相对路径失败", e))?
            .to_string_lossy()
            .replace('\\', "/");

        if entry.file_type().is_dir() {
            zip.add_directory(name.as_str(), options)
                .map_err(|e| archive_error("写入目录条目失败", e))?;
        } else if entry.file_type().is_file() {
            zip.start_file(name.as_str(), options)
                .map_err(|e| archive_error("写入文件条目失败", e))?;
            File::open(path)?.read_to_end(&mut buffer)?;
            zip.write_all(&buffer)?;
            buffer.clear();
        }
    }

    zip.finish().map_err(|e| archive_error("完成归档失败", e))
}

/// 把目录内容打包为内存中的 zip
pub fn pack_directory(dir: &Path) -> FleetResult<Vec<u8>> {
    let cursor = write_directory(dir, Cursor::new(Vec::new()))?;
    let data = cursor.into_inner();
    debug!("打包 {} 完成 ({} 字节)", dir.display(), data.len());
    Ok(data)
}

/// 把目录内容打包到文件，必要时创建父目录
pub fn pack_directory_to_file(dir: &Path, output: &Path) -> FleetResult<()> {
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = File::create(output)?;
    write_directory(dir, file)?;
    Ok(())
}

fn extract<R: Read + Seek>(reader: R, dest: &Path) -> FleetResult<()> {
    let mut archive = ZipArchive::new(reader).map_err(|e| archive_error("读取归档失败", e))?;
    fs::create_dir_all(dest)?;
    archive
        .extract(dest)
        .map_err(|e| archive_error("解压归档失败", e))?;
    Ok(())
}

/// 解压内存中的 zip 到目标目录（覆盖同名文件）
pub fn unpack(data: &[u8], dest: &Path) -> FleetResult<()> {
    extract(Cursor::new(data), dest)
}

pub fn unpack_file(archive: &Path, dest: &Path) -> FleetResult<()> {
    extract(File::open(archive)?, dest)
}

/// 是否为可读取的 zip 文件
pub fn is_zip_file(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    File::open(path)
        .map(|file| ZipArchive::new(file).is_ok())
        .unwrap_or(false)
}

pub async fn pack_directory_blocking(dir: PathBuf) -> FleetResult<Vec<u8>> {
    tokio::task::spawn_blocking(move || pack_directory(&dir))
        .await
        .map_err(|e| FleetError::Internal(format!("打包任务失败: {e}")))?
}

pub async fn pack_directory_to_file_blocking(dir: PathBuf, output: PathBuf) -> FleetResult<()> {
    tokio::task::spawn_blocking(move || pack_directory_to_file(&dir, &output))
        .await
        .map_err(|e| FleetError::Internal(format!("打包任务失败: {e}")))?
}

pub async fn unpack_blocking(data: Vec<u8>, dest: PathBuf) -> FleetResult<()> {
    tokio::task::spawn_blocking(move || unpack(&data, &dest))
        .await
        .map_err(|e| FleetError::Internal(format!("解包任务失败: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("world/region")).unwrap();
        fs::write(dir.path().join("server.properties"), "motd=hi").unwrap();
        fs::write(dir.path().join("world/level.dat"), [1u8, 2, 3]).unwrap();
        fs::create_dir_all(dir.path().join("empty")).unwrap();
        dir
    }

    #[test]
    fn test_pack_and_unpack_preserves_layout() {
        let source = sample_tree();
        let data = pack_directory(source.path()).unwrap();

        let target = TempDir::new().unwrap();
        unpack(&data, target.path()).unwrap();

        assert_eq!(
            fs::read_to_string(target.path().join("server.properties")).unwrap(),
            "motd=hi"
        );
        assert_eq!(fs::read(target.path().join("world/level.dat")).unwrap(), vec![1, 2, 3]);
        assert!(target.path().join("world/region").is_dir());
        assert!(target.path().join("empty").is_dir());
    }

    #[test]
    fn test_pack_to_file_and_detect() {
        let source = sample_tree();
        let out = TempDir::new().unwrap();
        let archive = out.path().join("nested/alpha.zip");
        pack_directory_to_file(source.path(), &archive).unwrap();

        assert!(is_zip_file(&archive));
        assert!(!is_zip_file(&source.path().join("server.properties")));
        assert!(!is_zip_file(source.path()));
    }

    #[test]
    fn test_unpack_garbage_fails() {
        let target = TempDir::new().unwrap();
        let err = unpack(b"not a zip", target.path()).unwrap_err();
        assert!(matches!(err, FleetError::Archive(_)));
    }

    #[tokio::test]
    async fn test_blocking_wrappers() {
        let source = sample_tree();
        let data = pack_directory_blocking(source.path().to_path_buf()).await.unwrap();
        let target = TempDir::new().unwrap();
        unpack_blocking(data, target.path().to_path_buf()).await.unwrap();
        assert!(target.path().join("world/level.dat").exists());
    }
}
