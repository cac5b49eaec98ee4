use crate::handles::ResourceKind;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// 单个资源种类的表配置
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KindConfig {
    /// 表的初始容量，省略时使用该种类的默认值；会被限制在 1..=65535
    pub initial_capacity: Option<usize>,

    /// 这些 id 上的 Replace 调用会被忽略（只记录一次日志）
    pub locked_ids: Vec<u32>,
}

/// 注册表配置，对应 TOML 文件；所有字段都可以省略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// persistent 栈的深度，至少为 1
    pub persistent_cache_depth: usize,

    /// 所有命令队列的初始容量
    pub queue_initial_capacity: usize,

    /// 采样哈希命中后是否再比较完整内容
    pub verify_payload_bytes: bool,

    /// replay 工具使用的日志级别
    pub log_level: String,

    pub sequence: KindConfig,
    pub font: KindConfig,
    pub sample_bank: KindConfig,
}
impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            persistent_cache_depth: 16,
            queue_initial_capacity: 16,
            verify_payload_bytes: true,
            log_level: "info".to_string(),
            sequence: KindConfig::default(),
            font: KindConfig::default(),
            sample_bank: KindConfig::default(),
        }
    }
}

impl RegistryConfig {
    pub fn kind(&self, kind: ResourceKind) -> &KindConfig {
        match kind {
            ResourceKind::Sequence => &self.sequence,
            ResourceKind::SoundFont => &self.font,
            ResourceKind::SampleBank => &self.sample_bank,
        }
    }

    /// 表的初始容量：sequence 128，sound font 40，sample bank 3
    pub fn initial_capacity(&self, kind: ResourceKind) -> usize {
        let default = match kind {
            ResourceKind::Sequence => 128,
            ResourceKind::SoundFont => 40,
            ResourceKind::SampleBank => 3,
        };
        self.kind(kind).initial_capacity.unwrap_or(default)
    }

    /// 从 TOML 文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content =
            fs::read_to_string(path.as_ref()).with_context(|| format!("读取配置文件失败: {:?}", path.as_ref()))?;

        Self::from_toml_str(&content).with_context(|| format!("解析 TOML 配置失败: {:?}", path.as_ref()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: RegistryConfig = toml::from_str(content)?;
        if config.persistent_cache_depth == 0 {
            anyhow::bail!("persistent_cache_depth 必须至少为 1");
        }
        Ok(config)
    }

    /// 保存配置到 TOML 文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self).context("序列化配置失败")?;

        fs::write(path.as_ref(), content).with_context(|| format!("写入配置文件失败: {:?}", path.as_ref()))?;

        Ok(())
    }
}
