//! 延迟命令队列
//!
//! FIFO 队列，存放带标签的命令。容量从初始值开始翻倍增长（上限 65535），从不收缩。
//! `push_if_absent` 以 `(op, arg_a, arg_b)` 去重：已有相同键时新命令被丢弃（先到先得）。

use crate::alloc::{AllocationPolicy, try_alloc_vec};
use crate::error::RegistryError;
use crate::handles::MAX_TABLE_CAPACITY;

/// 可以放入 [`CommandQueue`] 的命令
pub trait QueuedCommand {
    fn op(&self) -> u32;
    /// 目标资源 id
    fn arg_a(&self) -> u32;
    fn arg_b(&self) -> u32;

    #[inline]
    fn key(&self) -> (u32, u32, u32) {
        (self.op(), self.arg_a(), self.arg_b())
    }
}

/// 入队失败时把命令交还给调用者，由调用者决定如何释放其中的资源
#[derive(Debug)]
pub struct PushError<C> {
    pub command: C,
    pub source: RegistryError,
}

#[derive(Debug)]
pub enum PushOutcome<C> {
    Queued,
    /// 队列里已有相同键的命令，新命令原样交还
    Duplicate(C),
}

pub struct CommandQueue<C> {
    entries: Vec<C>,
    capacity: usize,
}
// new & init
impl<C: QueuedCommand> CommandQueue<C> {
    pub fn new(initial_capacity: usize) -> Self {
        let capacity = initial_capacity.clamp(1, MAX_TABLE_CAPACITY);
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }
}
// getters
impl<C: QueuedCommand> CommandQueue<C> {
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &C> {
        self.entries.iter()
    }

    /// 是否已有 `(op, arg_a, arg_b)` 相同的命令
    pub fn contains(&self, op: u32, arg_a: u32, arg_b: u32) -> bool {
        self.entries.iter().any(|cmd| cmd.key() == (op, arg_a, arg_b))
    }
}
// push
impl<C: QueuedCommand> CommandQueue<C> {
    /// 追加命令，不去重
    pub fn push(&mut self, command: C, policy: &dyn AllocationPolicy) -> Result<(), PushError<C>> {
        if self.entries.len() >= self.capacity {
            if let Err(source) = self.grow(policy) {
                return Err(PushError { command, source });
            }
        }
        self.entries.push(command);
        Ok(())
    }

    /// 仅当队列中没有相同键的命令时追加
    pub fn push_if_absent(&mut self, command: C, policy: &dyn AllocationPolicy) -> Result<PushOutcome<C>, PushError<C>> {
        let (op, arg_a, arg_b) = command.key();
        if self.contains(op, arg_a, arg_b) {
            log::debug!("command ({}, {}, {}) already queued, dropping the new one", op, arg_a, arg_b);
            return Ok(PushOutcome::Duplicate(command));
        }
        self.push(command, policy)?;
        Ok(PushOutcome::Queued)
    }

    fn grow(&mut self, policy: &dyn AllocationPolicy) -> Result<(), RegistryError> {
        let old_capacity = self.capacity;
        if old_capacity >= MAX_TABLE_CAPACITY {
            return Err(RegistryError::CapacityExhausted {
                what: "command queue",
                capacity: old_capacity,
            });
        }
        let new_capacity = (old_capacity * 2).min(MAX_TABLE_CAPACITY);
        let Some(mut new_entries) = try_alloc_vec::<C>(policy, "command queue", new_capacity) else {
            return Err(RegistryError::CapacityExhausted {
                what: "command queue",
                capacity: old_capacity,
            });
        };
        new_entries.append(&mut self.entries);
        self.entries = new_entries;
        self.capacity = new_capacity;
        Ok(())
    }
}
// drain
impl<C: QueuedCommand> CommandQueue<C> {
    /// 按 FIFO 顺序把每条命令交给 `f` 一次，然后清空；容量保留
    pub fn drain(&mut self, mut f: impl FnMut(C)) -> usize {
        let count = self.entries.len();
        for command in self.entries.drain(..) {
            f(command);
        }
        count
    }

    /// 丢弃全部命令，不调用回调
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// 按队列顺序取出所有目标为 `target` 的命令，其余命令保持原有顺序
    pub fn take_matching(&mut self, target: u32) -> Vec<C> {
        if !self.entries.iter().any(|cmd| cmd.arg_a() == target) {
            return Vec::new();
        }
        let mut matched = Vec::new();
        let mut rest = Vec::with_capacity(self.capacity);
        for command in self.entries.drain(..) {
            if command.arg_a() == target {
                matched.push(command);
            } else {
                rest.push(command);
            }
        }
        self.entries = rest;
        matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::{CountdownAllocator, SystemAllocator};

    #[derive(Debug, PartialEq)]
    struct TestCommand {
        op: u32,
        a: u32,
        b: u32,
        payload: &'static str,
    }
    impl QueuedCommand for TestCommand {
        fn op(&self) -> u32 {
            self.op
        }
        fn arg_a(&self) -> u32 {
            self.a
        }
        fn arg_b(&self) -> u32 {
            self.b
        }
    }

    fn cmd(op: u32, a: u32, b: u32, payload: &'static str) -> TestCommand {
        TestCommand { op, a, b, payload }
    }

    #[test]
    fn test_push_if_absent_first_wins() {
        let mut queue = CommandQueue::new(16);
        let first = queue.push_if_absent(cmd(3, 1, 2, "A"), &SystemAllocator).unwrap();
        let second = queue.push_if_absent(cmd(3, 1, 2, "B"), &SystemAllocator).unwrap();

        assert!(matches!(first, PushOutcome::Queued));
        assert!(matches!(second, PushOutcome::Duplicate(TestCommand { payload: "B", .. })));
        assert_eq!(queue.len(), 1);

        let mut seen = Vec::new();
        let drained = queue.drain(|c| seen.push(c.payload));
        assert_eq!(drained, 1);
        assert_eq!(seen, vec!["A"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_push_never_dedups() {
        let mut queue = CommandQueue::new(4);
        queue.push(cmd(0, 1, 0, "x"), &SystemAllocator).unwrap();
        queue.push(cmd(0, 1, 0, "y"), &SystemAllocator).unwrap();
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_drain_is_fifo_and_keeps_capacity() {
        let mut queue = CommandQueue::new(2);
        for (i, name) in ["a", "b", "c", "d", "e"].into_iter().enumerate() {
            queue.push(cmd(0, i as u32, 0, name), &SystemAllocator).unwrap();
        }
        assert_eq!(queue.capacity(), 8);

        let mut order = Vec::new();
        queue.drain(|c| order.push(c.payload));
        assert_eq!(order, vec!["a", "b", "c", "d", "e"]);
        assert_eq!(queue.capacity(), 8);
    }

    #[test]
    fn test_clear_skips_callback() {
        let mut queue = CommandQueue::new(4);
        queue.push(cmd(0, 0, 0, "a"), &SystemAllocator).unwrap();
        queue.clear();
        let drained = queue.drain(|_| panic!("cleared queue must not call back"));
        assert_eq!(drained, 0);
    }

    #[test]
    fn test_grow_failure_returns_command() {
        let mut queue = CommandQueue::new(1);
        queue.push(cmd(0, 0, 0, "kept"), &SystemAllocator).unwrap();

        let err = queue.push(cmd(0, 1, 0, "rejected"), &CountdownAllocator::new(0)).unwrap_err();
        assert_eq!(err.command.payload, "rejected");
        assert!(matches!(err.source, RegistryError::CapacityExhausted { capacity: 1, .. }));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.capacity(), 1);
    }

    #[test]
    fn test_take_matching_preserves_order() {
        let mut queue = CommandQueue::new(8);
        queue.push(cmd(0, 7, 0, "a"), &SystemAllocator).unwrap();
        queue.push(cmd(1, 3, 0, "b"), &SystemAllocator).unwrap();
        queue.push(cmd(2, 7, 1, "c"), &SystemAllocator).unwrap();
        queue.push(cmd(0, 4, 0, "d"), &SystemAllocator).unwrap();

        let matched: Vec<_> = queue.take_matching(7).into_iter().map(|c| c.payload).collect();
        assert_eq!(matched, vec!["a", "c"]);
        let rest: Vec<_> = queue.iter().map(|c| c.payload).collect();
        assert_eq!(rest, vec!["b", "d"]);
        assert!(queue.take_matching(99).is_empty());
    }
}
