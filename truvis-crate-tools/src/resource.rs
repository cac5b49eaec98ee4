use std::path::{Path, PathBuf};

/// 统一资源路径管理
///
/// 所有路径基于工作区根目录（通过 `CARGO_MANIFEST_DIR` 推导）。
/// 避免使用硬编码相对路径，确保在不同构建环境下路径一致。
///
/// # 使用示例
/// ```ignore
/// let config = TruvisPath::config_path("registry.toml");        // config/registry.toml
/// let scenario = TruvisPath::scenario_path("boot.toml");        // config/scenarios/boot.toml
/// ```
pub struct TruvisPath {}
// 核心路径
impl TruvisPath {
    /// 获取工作区根目录
    pub fn workspace_path() -> PathBuf {
        // 从 truvis-crate-tools 推导到 workspace root
        match Path::new(env!("CARGO_MANIFEST_DIR")).parent() {
            Some(parent) => parent.to_path_buf(),
            None => PathBuf::from("."),
        }
    }
}
// 配置目录
impl TruvisPath {
    /// 获取 `config/` 目录下的文件路径
    pub fn config_path(filename: &str) -> PathBuf {
        Self::workspace_path().join("config").join(filename)
    }

    /// 获取 `config/scenarios/` 目录下的回放脚本路径
    pub fn scenario_path(filename: &str) -> PathBuf {
        Self::workspace_path().join("config").join("scenarios").join(filename)
    }
}
