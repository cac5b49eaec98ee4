use std::collections::HashMap;
use std::hash::Hash;

/// 句柄 -> 引用计数
///
/// 计数降到 0 时条目被移除；不存在的句柄计数视为 0。
#[derive(Debug)]
pub struct RefCounter<K> {
    counts: HashMap<K, u32>,
}
impl<K> Default for RefCounter<K> {
    fn default() -> Self {
        Self { counts: HashMap::new() }
    }
}
impl<K: Copy + Eq + Hash> RefCounter<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 计数加一，返回新的计数
    pub fn inc(&mut self, key: K) -> u32 {
        let count = self.counts.entry(key).or_insert(0);
        *count += 1;
        *count
    }

    /// 计数减一，返回剩余计数；降到 0 时移除
    pub fn dec(&mut self, key: K) -> u32 {
        let Some(count) = self.counts.get_mut(&key) else {
            return 0;
        };
        *count -= 1;
        let remaining = *count;
        if remaining == 0 {
            self.counts.remove(&key);
        }
        remaining
    }

    #[inline]
    pub fn get(&self, key: K) -> u32 {
        self.counts.get(&key).copied().unwrap_or(0)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
