//! 初始化阶段门控
//!
//! 阶段只能前进：NotReady -> Queueing -> Queued -> Ready。

use crate::error::{RegistryError, RegistryResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitPhase {
    /// 拒绝所有变更调用
    #[default]
    NotReady,
    /// 注册窗口：不安全的变更进入 init queue
    Queueing,
    /// 注册窗口已关闭，等待 drain
    Queued,
    /// init queue 已 drain，变更直接生效
    Ready,
}

/// 一次变更调用应当走的路径
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationRoute {
    Reject,
    Defer,
    Apply,
}

#[derive(Debug, Default)]
pub struct Lifecycle {
    phase: InitPhase,
    /// init queue 正在 drain，只在 Queued 阶段内为 true
    draining: bool,
}
impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn phase(&self) -> InitPhase {
        self.phase
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.phase == InitPhase::Ready
    }

    /// Replace 类调用在当前阶段的路径
    ///
    /// Queued 阶段只有 drain 重新发起的调用会被应用；外部调用被拒绝，
    /// 否则它会被随后 drain 出来的更早的命令覆盖。
    pub fn route(&self) -> MutationRoute {
        match self.phase {
            InitPhase::NotReady => MutationRoute::Reject,
            InitPhase::Queueing => MutationRoute::Defer,
            InitPhase::Queued if self.draining => MutationRoute::Apply,
            InitPhase::Queued => MutationRoute::Reject,
            InitPhase::Ready => MutationRoute::Apply,
        }
    }

    /// 开始 drain init queue，直到下一次阶段变化
    pub fn begin_drain(&mut self) -> RegistryResult<()> {
        if self.phase != InitPhase::Queued {
            return Err(RegistryError::InvalidTransition {
                from: self.phase,
                to: InitPhase::Ready,
            });
        }
        self.draining = true;
        Ok(())
    }

    /// 前进到 `to`；原地不动或后退都是错误
    pub fn advance_to(&mut self, to: InitPhase) -> RegistryResult<()> {
        if to <= self.phase {
            return Err(RegistryError::InvalidTransition { from: self.phase, to });
        }
        log::info!("audio registry phase {:?} -> {:?}", self.phase, to);
        self.phase = to;
        self.draining = false;
        Ok(())
    }

    /// NotReady 时拒绝
    pub fn check_mutable(&self) -> RegistryResult<()> {
        match self.phase {
            InitPhase::NotReady => Err(RegistryError::NotReady),
            _ => Ok(()),
        }
    }

    /// 只有 Ready 之后才允许
    pub fn check_ready(&self) -> RegistryResult<()> {
        if self.is_ready() { Ok(()) } else { Err(RegistryError::NotReady) }
    }
}
