//! 分配策略
//!
//! 表、命令队列和采样数据在申请新缓冲区之前都会询问 [`AllocationPolicy`]。
//! 生产环境使用 [`SystemAllocator`]；测试通过 [`CountdownAllocator`] 在任意一步注入失败。

use std::cell::Cell;

pub trait AllocationPolicy {
    /// 是否允许为 `what` 分配 `bytes` 字节
    fn allow(&self, what: &'static str, bytes: usize) -> bool;
}

/// 总是放行，实际是否成功由 `try_reserve_exact` 决定
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;
impl AllocationPolicy for SystemAllocator {
    #[inline]
    fn allow(&self, _what: &'static str, _bytes: usize) -> bool {
        true
    }
}

/// 允许前 `remaining` 次分配，之后全部拒绝
#[derive(Debug, Default)]
pub struct CountdownAllocator {
    remaining: Cell<usize>,
    refused: Cell<usize>,
}
impl CountdownAllocator {
    pub fn new(allowed: usize) -> Self {
        Self {
            remaining: Cell::new(allowed),
            refused: Cell::new(0),
        }
    }

    /// 重新设置允许的次数
    pub fn reset(&self, allowed: usize) {
        self.remaining.set(allowed);
    }

    /// 已经拒绝的次数
    pub fn refused(&self) -> usize {
        self.refused.get()
    }
}
impl AllocationPolicy for CountdownAllocator {
    fn allow(&self, what: &'static str, bytes: usize) -> bool {
        let remaining = self.remaining.get();
        if remaining == 0 {
            self.refused.set(self.refused.get() + 1);
            log::debug!("allocation of {} bytes for {} refused", bytes, what);
            return false;
        }
        self.remaining.set(remaining - 1);
        true
    }
}
impl<T: AllocationPolicy + ?Sized> AllocationPolicy for std::rc::Rc<T> {
    fn allow(&self, what: &'static str, bytes: usize) -> bool {
        (**self).allow(what, bytes)
    }
}

/// 申请一个容量恰好为 `capacity` 的空 Vec；被策略拒绝或系统分配失败时返回 None
pub(crate) fn try_alloc_vec<T>(policy: &dyn AllocationPolicy, what: &'static str, capacity: usize) -> Option<Vec<T>> {
    if !policy.allow(what, capacity.saturating_mul(size_of::<T>())) {
        return None;
    }
    let mut buf = Vec::new();
    buf.try_reserve_exact(capacity).ok()?;
    Some(buf)
}
