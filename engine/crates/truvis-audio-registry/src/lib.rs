//! 音频资源描述符的运行时注册表
//!
//! 管理三张可增长的资源表（sequence、sound font、sample bank），并负责：
//! - 初始化窗口期间的延迟命令：Queueing 阶段的替换进入 init queue，在 Ready 时一次性应用
//! - 资源尚未驻留内存时的延迟命令：进入 load queue，在加载完成回调中按 id 应用
//! - 分级缓存记录：Permanent 集合、Loaded 集合与有界的 Persistent 栈
//! - ADPCM 采样的内容哈希去重与引用计数
//!
//! 整个注册表是单线程的上下文对象 [`AudioRegistry`]，所有调用都通过 `&mut` 进行。
//!
//! # 使用示例
//! ```ignore
//! use truvis_audio_registry::{AudioRegistry, RegistryBaseline, RegistryConfig};
//!
//! let mut registry = AudioRegistry::new(RegistryConfig::default(), RegistryBaseline::default());
//! registry.begin_queueing()?;
//! registry.replace_sequence(5, entry)?;   // Applied::Deferred
//! registry.ready()?;                      // init queue drain，替换生效
//! ```

pub mod alloc;
pub mod cache;
pub mod command_queue;
pub mod config;
pub mod error;
pub mod font;
pub mod handles;
pub mod hooks;
pub mod lifecycle;
pub mod payload;
pub mod refcount;
pub mod registry;
pub mod sample_bank;
pub mod sequence;
pub mod sound_font;
pub mod table;

pub use cache::CacheSearch;
pub use config::RegistryConfig;
pub use error::{Applied, RegistryError, RegistryResult};
pub use handles::{CachePolicy, DataLocation, LoadStatus, Medium, ResourceEntry, ResourceKind};
pub use hooks::{EngineHooks, NullHooks, RecordingHooks};
pub use lifecycle::InitPhase;
pub use registry::{AudioRegistry, DrainReport, MaterializedData, RegistryBaseline};
pub use sequence::{SequenceAux, SequenceFlags};
