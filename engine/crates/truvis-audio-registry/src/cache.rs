//! 分级缓存
//!
//! | 层级 | 存储 | 语义 |
//! |---|---|---|
//! | permanent | `HashSet<u32>` | 只增不减，reset 不影响 |
//! | persistent | 有界栈 | LIFO，pop 时按 kind 从栈顶查找；reset 清空 |
//! | loaded | `HashSet<u32>` | "曾经加载完成"，用于保证一次性初始化；reset 不影响 |
//!
//! 键是 [`CacheKey::packed`]。

use crate::handles::{CacheKey, CachePolicy, ResourceKind};
use std::collections::HashSet;

/// 缓存查询时要求的层级
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSearch {
    /// 必须在 permanent 集合中
    Permanent,
    /// 任意层级
    Either,
}

/// `register` 对 persistent 栈做了什么
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistentPush {
    Pushed,
    /// 栈中已有相同的键
    Duplicate,
    /// 栈已满，资源仍然可用，只是不再被追踪
    Full,
    /// 缓存策略不是 LoadPersistent
    NotRequested,
}

#[derive(Debug)]
pub struct TieredCache {
    permanent: HashSet<u32>,
    loaded: HashSet<u32>,
    persistent: Vec<CacheKey>,
    persistent_depth: usize,
}
// new & init
impl TieredCache {
    /// 深度至少为 1
    pub fn new(persistent_depth: usize) -> Self {
        let persistent_depth = persistent_depth.max(1);
        Self {
            permanent: HashSet::new(),
            loaded: HashSet::new(),
            persistent: Vec::with_capacity(persistent_depth),
            persistent_depth,
        }
    }
}
// getters
impl TieredCache {
    #[inline]
    pub fn is_loaded(&self, key: CacheKey) -> bool {
        self.loaded.contains(&key.packed())
    }

    #[inline]
    pub fn is_permanent(&self, key: CacheKey) -> bool {
        self.permanent.contains(&key.packed())
    }

    #[inline]
    pub fn persistent_len(&self) -> usize {
        self.persistent.len()
    }

    #[inline]
    pub fn persistent_depth(&self) -> usize {
        self.persistent_depth
    }

    /// 栈底到栈顶
    pub fn persistent_entries(&self) -> &[CacheKey] {
        &self.persistent
    }

    /// 层级条件是否满足；驻留检查由调用者负责
    pub fn admits(&self, key: CacheKey, search: CacheSearch) -> bool {
        if search == CacheSearch::Permanent && !self.is_permanent(key) {
            return false;
        }
        self.is_loaded(key)
    }
}
// register & evict
impl TieredCache {
    /// 加载完成后登记；总是进入 loaded 集合
    pub fn register(&mut self, key: CacheKey, policy: CachePolicy) -> PersistentPush {
        self.loaded.insert(key.packed());

        match policy {
            CachePolicy::LoadPermanent => {
                self.permanent.insert(key.packed());
                PersistentPush::NotRequested
            }
            CachePolicy::LoadPersistent => {
                if self.persistent.len() >= self.persistent_depth {
                    log::debug!("persistent cache full, {} {} is not tracked", key.kind, key.index);
                    return PersistentPush::Full;
                }
                if self.persistent.iter().any(|k| k.packed() == key.packed()) {
                    log::debug!("{} {} already in persistent cache", key.kind, key.index);
                    return PersistentPush::Duplicate;
                }
                self.persistent.push(key);
                PersistentPush::Pushed
            }
            CachePolicy::None | CachePolicy::Either => PersistentPush::NotRequested,
        }
    }

    /// 移除最近压入的 `kind` 条目，其余条目保持顺序；没有匹配时什么都不做
    pub fn pop_persistent(&mut self, kind: ResourceKind) -> Option<CacheKey> {
        let position = self.persistent.iter().rposition(|k| k.kind == kind)?;
        Some(self.persistent.remove(position))
    }

    /// 清空 persistent 栈；permanent 和 loaded 不受影响
    pub fn reset(&mut self) {
        self.persistent.clear();
    }
}
