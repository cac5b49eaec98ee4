//! 注册表的错误类型
//!
//! 所有失败都以返回值的形式给出；任何返回 `Err` 的操作都不会留下部分修改的共享状态。

use crate::handles::ResourceKind;
use crate::lifecycle::InitPhase;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// 扩容时分配失败，或已经达到 16 位容量上限
    #[error("{what}: capacity exhausted at {capacity}")]
    CapacityExhausted { what: &'static str, capacity: usize },

    #[error("{kind} id {id} out of range (count {count})")]
    OutOfRange { kind: ResourceKind, id: u32, count: usize },

    /// 生命周期尚未允许该调用
    #[error("audio registry is not ready for this call")]
    NotReady,

    #[error("failed to allocate payload storage")]
    PayloadAllocationFailed,

    /// 低字节为 0xFE / 0xFF 的 id 是保留值
    #[error("{kind} id {id:#x} is reserved")]
    ReservedId { kind: ResourceKind, id: u32 },

    #[error("invalid init phase transition {from:?} -> {to:?}")]
    InvalidTransition { from: InitPhase, to: InitPhase },

    #[error("{what} limit of {limit} reached")]
    LimitReached { what: &'static str, limit: usize },

    #[error("{kind} {id} is not resident in memory")]
    NotResident { kind: ResourceKind, id: u32 },

    #[error("stale or unknown handle")]
    InvalidHandle,

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("malformed payload: {0}")]
    MalformedPayload(&'static str),

    #[error("patch of {len} bytes at offset {offset} exceeds resource size {size}")]
    PatchOutOfBounds { offset: usize, len: usize, size: usize },
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// 变更调用实际走了哪条路径
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// 已直接写入表
    Immediate,
    /// 已进入延迟队列
    Deferred,
    /// 与队列中已有命令重复，被丢弃（先到先得）
    Discarded,
    /// 目标被配置为锁定，调用被忽略
    Ignored,
}
