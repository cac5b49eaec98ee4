//! 可增长的资源表
//!
//! 一张表由三列按 id 对齐的数组组成：记录本身、加载状态、以及资源种类自定义的附加列。
//! 扩容时三列作为一个整体翻倍：先分配全部新缓冲区，任何一步失败都丢弃已分配的部分，
//! 表保持原样。id 一旦分配就不会失效。

use crate::alloc::{AllocationPolicy, try_alloc_vec};
use crate::error::{RegistryError, RegistryResult};
use crate::handles::{LoadStatus, MAX_TABLE_CAPACITY, ResourceEntry, ResourceKind, is_reserved_id};

pub struct ResourceTable<A> {
    kind: ResourceKind,

    entries: Vec<ResourceEntry>,
    status: Vec<LoadStatus>,
    /// 附加列，例如 sequence 的音色库列表
    aux: Vec<A>,

    /// 逻辑容量，三列的实际容量都不小于它
    capacity: usize,
}
// new & init
impl<A: Clone + Default> ResourceTable<A> {
    pub fn new(kind: ResourceKind, capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_TABLE_CAPACITY);
        Self {
            kind,
            entries: Vec::with_capacity(capacity),
            status: Vec::with_capacity(capacity),
            aux: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// 使用来源介质中的原始记录初始化，容量至少能容纳全部原始记录
    pub fn with_baseline(
        kind: ResourceKind,
        capacity: usize,
        baseline: impl IntoIterator<Item = (ResourceEntry, A)>,
    ) -> Self {
        let baseline: Vec<(ResourceEntry, A)> = baseline.into_iter().take(MAX_TABLE_CAPACITY).collect();
        let mut table = Self::new(kind, capacity.max(baseline.len()));
        for (entry, aux) in baseline {
            table.entries.push(entry);
            table.status.push(LoadStatus::NotLoaded);
            table.aux.push(aux);
        }
        table
    }
}
// getters
impl<A> ResourceTable<A> {
    #[inline]
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// 已分配的 id 数量（包含被跳过的保留 id）
    #[inline]
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn entries(&self) -> &[ResourceEntry] {
        &self.entries
    }

    #[inline]
    pub fn statuses(&self) -> &[LoadStatus] {
        &self.status
    }

    #[inline]
    pub fn statuses_mut(&mut self) -> &mut [LoadStatus] {
        &mut self.status
    }

    fn check_id(&self, id: u32) -> RegistryResult<usize> {
        if is_reserved_id(id) {
            return Err(RegistryError::ReservedId { kind: self.kind, id });
        }
        let index = id as usize;
        if index >= self.entries.len() {
            return Err(RegistryError::OutOfRange {
                kind: self.kind,
                id,
                count: self.entries.len(),
            });
        }
        Ok(index)
    }

    pub fn get(&self, id: u32) -> RegistryResult<&ResourceEntry> {
        let index = self.check_id(id)?;
        Ok(&self.entries[index])
    }

    pub fn get_mut(&mut self, id: u32) -> RegistryResult<&mut ResourceEntry> {
        let index = self.check_id(id)?;
        Ok(&mut self.entries[index])
    }

    pub fn status(&self, id: u32) -> RegistryResult<LoadStatus> {
        let index = self.check_id(id)?;
        Ok(self.status[index])
    }

    pub fn set_status(&mut self, id: u32, status: LoadStatus) -> RegistryResult<()> {
        let index = self.check_id(id)?;
        self.status[index] = status;
        Ok(())
    }

    pub fn aux(&self, id: u32) -> RegistryResult<&A> {
        let index = self.check_id(id)?;
        Ok(&self.aux[index])
    }

    pub fn aux_mut(&mut self, id: u32) -> RegistryResult<&mut A> {
        let index = self.check_id(id)?;
        Ok(&mut self.aux[index])
    }

    /// 覆盖已有 id 的记录，附加列保持不变
    pub fn replace(&mut self, id: u32, entry: ResourceEntry) -> RegistryResult<()> {
        *self.get_mut(id)? = entry;
        Ok(())
    }
}
// append & grow
impl<A: Clone + Default> ResourceTable<A> {
    /// 下一个将被分配的 id，跳过低字节为保留值的 id
    pub fn next_id(&self) -> u32 {
        let mut id = self.entries.len() as u32;
        while is_reserved_id(id) {
            id += 1;
        }
        id
    }

    /// 追加一条记录并返回新 id；容量不足时先整体扩容
    pub fn append(&mut self, entry: ResourceEntry, aux: A, policy: &dyn AllocationPolicy) -> RegistryResult<u32> {
        let id = self.next_id();
        let index = id as usize;
        if index >= MAX_TABLE_CAPACITY {
            return Err(RegistryError::CapacityExhausted {
                what: self.kind.name(),
                capacity: self.capacity,
            });
        }
        while index >= self.capacity {
            self.grow(policy)?;
        }

        // 被跳过的保留 id 也占一个槽位，保持三列对齐
        while self.entries.len() < index {
            self.entries.push(ResourceEntry::default());
            self.status.push(LoadStatus::NotLoaded);
            self.aux.push(A::default());
        }
        self.entries.push(entry);
        self.status.push(LoadStatus::NotLoaded);
        self.aux.push(aux);

        Ok(id)
    }

    /// 容量翻倍（上限 65535），全部列要么一起成功，要么表保持不变
    pub fn grow(&mut self, policy: &dyn AllocationPolicy) -> RegistryResult<()> {
        let old_capacity = self.capacity;
        if old_capacity >= MAX_TABLE_CAPACITY {
            return Err(RegistryError::CapacityExhausted {
                what: self.kind.name(),
                capacity: old_capacity,
            });
        }
        let new_capacity = (old_capacity * 2).min(MAX_TABLE_CAPACITY);

        let exhausted = || {
            log::error!("Error resizing {} tables to {}", self.kind, new_capacity);
            RegistryError::CapacityExhausted {
                what: self.kind.name(),
                capacity: old_capacity,
            }
        };

        // 先分配全部新缓冲区；提前返回时局部变量被释放，旧表不受影响
        let mut new_entries = try_alloc_vec::<ResourceEntry>(policy, "table entries", new_capacity).ok_or_else(exhausted)?;
        let mut new_status = try_alloc_vec::<LoadStatus>(policy, "table load status", new_capacity).ok_or_else(exhausted)?;
        let mut new_aux = try_alloc_vec::<A>(policy, "table aux column", new_capacity).ok_or_else(exhausted)?;

        new_entries.extend_from_slice(&self.entries);
        new_status.extend_from_slice(&self.status);
        new_aux.extend_from_slice(&self.aux);

        self.entries = new_entries;
        self.status = new_status;
        self.aux = new_aux;
        self.capacity = new_capacity;

        log::info!("Resized {} tables to {}", self.kind, new_capacity);
        Ok(())
    }
}
