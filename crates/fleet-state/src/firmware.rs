use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::debug;

/// 固件清单协作者
///
/// 返回当前存在待部署固件制品的设备标识集合。
/// 查询失败时本轮打标被跳过，上一轮的值保持不变。
#[async_trait]
pub trait FirmwareInventory: Send + Sync {
    async fn pending_updates(&self) -> anyhow::Result<HashSet<String>>;
}

/// 基于本地目录的固件清单
///
/// 目录下每个 `<deviceId>.bin` 文件视为该设备的待部署制品。
pub struct DirectoryInventory {
    dir: PathBuf,
}

impl DirectoryInventory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl FirmwareInventory for DirectoryInventory {
    async fn pending_updates(&self) -> anyhow::Result<HashSet<String>> {
        let mut pending = HashSet::new();

        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("bin") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                pending.insert(stem.to_string());
            }
        }

        debug!(count = pending.len(), "Firmware artifacts listed");
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_bin_stems_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("X22_0C_A6_D2.bin"), b"fw").unwrap();
        std::fs::write(dir.path().join("X22_1B_C3_F7.bin"), b"fw").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let inventory = DirectoryInventory::new(dir.path());
        let pending = inventory.pending_updates().await.unwrap();

        assert_eq!(pending.len(), 2);
        assert!(pending.contains("X22_0C_A6_D2"));
        assert!(!pending.contains("notes"));
    }

    #[tokio::test]
    async fn missing_directory_is_an_error() {
        let inventory = DirectoryInventory::new("/nonexistent/firmware");
        assert!(inventory.pending_updates().await.is_err());
    }
}
