//! 采样数据与去重
//!
//! 压缩编码（ADPCM / SmallADPCM）的采样带有 loop 与 codebook 两张表，被大量乐器、鼓、音效共享。
//! 插入时按内容计算 32 位 FNV-1a 哈希，命中则共享已有的槽位并增加引用计数；
//! 其余编码的采样每次都独立深拷贝。
//!
//! 槽位存放在 slotmap 中，外部只拿到 [`PayloadHandle`]，释放到计数为 0 时槽位被回收。

use crate::alloc::AllocationPolicy;
use crate::error::{RegistryError, RegistryResult};
use crate::handles::{Medium, PayloadHandle};
use crate::refcount::RefCounter;
use serde::{Deserialize, Serialize};
use slotmap::{SecondaryMap, SlotMap};
use std::collections::HashMap;

pub const FNV1_32A_INIT: u32 = 0x811c_9dc5;

/// FNV-1a，乘以 FNV prime 用移位相加表示
pub fn fnv1a_32(bytes: &[u8], seed: u32) -> u32 {
    let mut hval = seed;
    for &b in bytes {
        hval ^= b as u32;
        hval = hval
            .wrapping_add(hval << 1)
            .wrapping_add(hval << 4)
            .wrapping_add(hval << 7)
            .wrapping_add(hval << 8)
            .wrapping_add(hval << 24);
    }
    hval
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleCodec {
    Adpcm = 0,
    S8 = 1,
    S16InMemory = 2,
    SmallAdpcm = 3,
    Reverb = 4,
    S16 = 5,
}
impl SampleCodec {
    /// 是否带有 codebook，只有这类采样参与去重
    #[inline]
    pub fn is_compressible(self) -> bool {
        matches!(self, SampleCodec::Adpcm | SampleCodec::SmallAdpcm)
    }
}

/// 采样字节的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleAddress {
    /// 相对于所属 sample bank 的偏移，加载时才能解析
    Offset(u32),
    /// 已经驻留内存的绝对地址
    Absolute(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdpcmLoop {
    pub start: u32,
    pub loop_end: u32,
    /// 循环次数；为 0 时没有 predictor state
    pub count: u32,
    pub sample_end: u32,
    #[serde(default)]
    pub predictor_state: Option<[i16; 16]>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdpcmBook {
    pub order: u32,
    pub num_predictors: u32,
    /// 至少 `8 * order * num_predictors` 个系数，多余部分在拷贝时被截掉
    pub codebook: Vec<i16>,
}
impl AdpcmBook {
    #[inline]
    pub fn coefficient_count(&self) -> usize {
        8usize.saturating_mul(self.order as usize).saturating_mul(self.num_predictors as usize)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub codec: SampleCodec,
    pub medium: Medium,
    /// 地址、loop、book 是否已经解析为内存中的值
    #[serde(default)]
    pub relocated: bool,
    pub size: u32,
    pub address: SampleAddress,
    #[serde(default)]
    pub loop_data: Option<AdpcmLoop>,
    #[serde(default)]
    pub book: Option<AdpcmBook>,
}
impl Sample {
    /// 参与哈希的规范字节序列（大端）
    ///
    /// 头部不含 loop / book 两个引用；loop 只在 `count != 0` 时包含 predictor state；
    /// book 只包含头部声明长度内的系数。
    pub fn canonical_bytes(&self) -> RegistryResult<Vec<u8>> {
        let mut out = Vec::with_capacity(64);
        out.push(self.codec as u8);
        out.push(medium_code(self.medium));
        out.push(self.relocated as u8);
        out.push(0);
        out.extend_from_slice(&self.size.to_be_bytes());
        let (tag, addr) = match self.address {
            SampleAddress::Offset(addr) => (0u8, addr),
            SampleAddress::Absolute(addr) => (1u8, addr),
        };
        out.push(tag);
        out.extend_from_slice(&addr.to_be_bytes());

        if let Some(lp) = &self.loop_data {
            for v in [lp.start, lp.loop_end, lp.count, lp.sample_end] {
                out.extend_from_slice(&v.to_be_bytes());
            }
            if lp.count != 0 {
                let state = lp.predictor_state.ok_or(RegistryError::MalformedPayload("looping sample without predictor state"))?;
                for s in state {
                    out.extend_from_slice(&s.to_be_bytes());
                }
            }
        }

        if let Some(book) = &self.book {
            let needed = book.coefficient_count();
            if book.codebook.len() < needed {
                return Err(RegistryError::MalformedPayload("codebook shorter than order * predictors"));
            }
            out.extend_from_slice(&book.order.to_be_bytes());
            out.extend_from_slice(&book.num_predictors.to_be_bytes());
            for c in &book.codebook[..needed] {
                out.extend_from_slice(&c.to_be_bytes());
            }
        }

        Ok(out)
    }

    #[inline]
    pub fn content_hash(&self) -> RegistryResult<u32> {
        Ok(fnv1a_32(&self.canonical_bytes()?, FNV1_32A_INIT))
    }

    /// 字节数估计，只用于询问分配策略
    fn footprint(&self) -> usize {
        let loop_bytes = self.loop_data.as_ref().map_or(0, |lp| if lp.count != 0 { 48 } else { 16 });
        let book_bytes = self.book.as_ref().map_or(0, |b| 8 + 2 * b.coefficient_count());
        16 + loop_bytes + book_bytes
    }

    /// 拷贝到注册表自己的存储中：截掉多余的 codebook，丢掉不需要的 predictor state，
    /// 绝对地址的采样视为已解析、位于 cart
    fn owned_copy(&self) -> Sample {
        let mut copy = self.clone();
        match self.address {
            SampleAddress::Absolute(_) => {
                copy.medium = Medium::Cart;
                copy.relocated = true;
            }
            SampleAddress::Offset(_) => copy.relocated = false,
        }
        if let Some(lp) = &mut copy.loop_data {
            if lp.count == 0 {
                lp.predictor_state = None;
            }
        }
        if let Some(book) = &mut copy.book {
            let needed = book.coefficient_count();
            book.codebook.truncate(needed);
        }
        copy
    }
}

fn medium_code(medium: Medium) -> u8 {
    match medium {
        Medium::Ram => 0,
        Medium::Unk => 1,
        Medium::Cart => 2,
        Medium::DiskDrive => 3,
    }
}

/// 采样存储，带内容去重与引用计数
pub struct PayloadStore {
    samples: SlotMap<PayloadHandle, Sample>,
    ref_counts: RefCounter<PayloadHandle>,

    /// 内容哈希 -> 共享槽位
    dedup: HashMap<u32, PayloadHandle>,
    /// 槽位登记时使用的哈希，释放时据此清理 `dedup`
    hash_of: SecondaryMap<PayloadHandle, u32>,

    /// 哈希命中后是否再比较完整内容
    verify_bytes: bool,
}
// new & init
impl PayloadStore {
    pub fn new(verify_bytes: bool) -> Self {
        Self {
            samples: SlotMap::with_key(),
            ref_counts: RefCounter::new(),
            dedup: HashMap::new(),
            hash_of: SecondaryMap::new(),
            verify_bytes,
        }
    }
}
// getters
impl PayloadStore {
    #[inline]
    pub fn get(&self, handle: PayloadHandle) -> Option<&Sample> {
        self.samples.get(handle)
    }

    #[inline]
    pub fn ref_count(&self, handle: PayloadHandle) -> u32 {
        self.ref_counts.get(handle)
    }

    /// 存活的槽位数量
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// 参与去重的槽位数量
    #[inline]
    pub fn shared_len(&self) -> usize {
        self.dedup.len()
    }
}
// insert & release
impl PayloadStore {
    /// 深拷贝 `src` 并返回句柄；压缩编码的采样内容相同则共享同一个槽位
    pub fn insert_copy(&mut self, src: &Sample, policy: &dyn AllocationPolicy) -> RegistryResult<PayloadHandle> {
        let hash = if src.codec.is_compressible() {
            Some(src.content_hash()?)
        } else {
            // 不参与去重，但格式错误一样要拒绝
            src.canonical_bytes()?;
            None
        };

        let copy = src.owned_copy();
        let mut shareable = hash;
        if let Some(hash) = hash {
            if let Some(&existing) = self.dedup.get(&hash) {
                let same = !self.verify_bytes || self.samples.get(existing).is_some_and(|s| *s == copy);
                if same {
                    let count = self.ref_counts.inc(existing);
                    log::debug!("sample {:#010x} shared, {} references", hash, count);
                    return Ok(existing);
                }
                log::warn!("sample hash collision on {:#010x}, storing an independent copy", hash);
                shareable = None;
            }
        }

        if !policy.allow("sample payload", copy.footprint()) {
            return Err(RegistryError::PayloadAllocationFailed);
        }

        let handle = self.samples.insert(copy);
        self.ref_counts.inc(handle);
        if let Some(hash) = shareable {
            self.dedup.insert(hash, handle);
            self.hash_of.insert(handle, hash);
        }
        Ok(handle)
    }

    /// 增加一个引用
    pub fn retain(&mut self, handle: PayloadHandle) -> RegistryResult<u32> {
        if !self.samples.contains_key(handle) {
            return Err(RegistryError::InvalidHandle);
        }
        Ok(self.ref_counts.inc(handle))
    }

    /// 释放一个引用，返回剩余计数；降到 0 时槽位被回收
    pub fn release(&mut self, handle: PayloadHandle) -> RegistryResult<u32> {
        if !self.samples.contains_key(handle) {
            return Err(RegistryError::InvalidHandle);
        }
        let remaining = self.ref_counts.dec(handle);
        if remaining > 0 {
            return Ok(remaining);
        }

        self.samples.remove(handle);
        if let Some(hash) = self.hash_of.remove(handle) {
            if self.dedup.get(&hash) == Some(&handle) {
                self.dedup.remove(&hash);
            }
        }
        Ok(0)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::alloc::{CountdownAllocator, SystemAllocator};
    use pretty_assertions::assert_eq;

    pub(crate) fn adpcm_sample(seed: i16) -> Sample {
        Sample {
            codec: SampleCodec::Adpcm,
            medium: Medium::Cart,
            relocated: false,
            size: 0x400,
            address: SampleAddress::Offset(0x1000),
            loop_data: Some(AdpcmLoop {
                start: 0,
                loop_end: 0x3F0,
                count: 0,
                sample_end: 0x3F0,
                predictor_state: None,
            }),
            book: Some(AdpcmBook {
                order: 2,
                num_predictors: 1,
                codebook: (0..16).map(|i| i * seed).collect(),
            }),
        }
    }

    #[test]
    fn test_fnv1a_known_values() {
        assert_eq!(fnv1a_32(b"", FNV1_32A_INIT), 0x811c_9dc5);
        assert_eq!(fnv1a_32(b"a", FNV1_32A_INIT), 0xe40c_292c);
        assert_eq!(fnv1a_32(b"foobar", FNV1_32A_INIT), 0xbf9c_f968);
    }

    #[test]
    fn test_identical_samples_share_slot() {
        let mut store = PayloadStore::new(true);
        let a = store.insert_copy(&adpcm_sample(3), &SystemAllocator).unwrap();
        let b = store.insert_copy(&adpcm_sample(3), &SystemAllocator).unwrap();

        assert_eq!(a, b);
        assert_eq!(store.ref_count(a), 2);
        assert_eq!(store.len(), 1);

        assert_eq!(store.release(a).unwrap(), 1);
        assert!(store.get(a).is_some());
        assert_eq!(store.release(a).unwrap(), 0);
        assert!(store.get(a).is_none());
        assert_eq!(store.shared_len(), 0);
        assert_eq!(store.release(a), Err(RegistryError::InvalidHandle));
    }

    #[test]
    fn test_different_samples_get_separate_slots() {
        let mut store = PayloadStore::new(true);
        let a = store.insert_copy(&adpcm_sample(3), &SystemAllocator).unwrap();
        let b = store.insert_copy(&adpcm_sample(5), &SystemAllocator).unwrap();
        assert_ne!(a, b);
        assert_eq!(store.ref_count(a), 1);
        assert_eq!(store.ref_count(b), 1);
    }

    #[test]
    fn test_uncompressed_samples_never_shared() {
        let mut store = PayloadStore::new(true);
        let mut pcm = adpcm_sample(1);
        pcm.codec = SampleCodec::S16;
        pcm.book = None;

        let a = store.insert_copy(&pcm, &SystemAllocator).unwrap();
        let b = store.insert_copy(&pcm, &SystemAllocator).unwrap();
        assert_ne!(a, b);
        assert_eq!(store.shared_len(), 0);
    }

    #[test]
    fn test_extra_codebook_entries_ignored() {
        let mut store = PayloadStore::new(true);
        let a = store.insert_copy(&adpcm_sample(2), &SystemAllocator).unwrap();

        let mut padded = adpcm_sample(2);
        if let Some(book) = &mut padded.book {
            book.codebook.extend_from_slice(&[99, 99]);
        }
        let b = store.insert_copy(&padded, &SystemAllocator).unwrap();

        assert_eq!(a, b);
        assert_eq!(store.get(a).unwrap().book.as_ref().unwrap().codebook.len(), 16);
    }

    #[test]
    fn test_short_codebook_rejected() {
        let mut store = PayloadStore::new(true);
        let mut bad = adpcm_sample(2);
        if let Some(book) = &mut bad.book {
            book.codebook.truncate(4);
        }
        assert!(matches!(
            store.insert_copy(&bad, &SystemAllocator),
            Err(RegistryError::MalformedPayload(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_absolute_address_marks_relocated() {
        let mut store = PayloadStore::new(true);
        let mut sample = adpcm_sample(1);
        sample.address = SampleAddress::Absolute(0x8040_0000);
        sample.medium = Medium::Ram;

        let handle = store.insert_copy(&sample, &SystemAllocator).unwrap();
        let stored = store.get(handle).unwrap();
        assert_eq!(stored.medium, Medium::Cart);
        assert!(stored.relocated);
    }

    #[test]
    fn test_allocation_failure() {
        let mut store = PayloadStore::new(true);
        let result = store.insert_copy(&adpcm_sample(1), &CountdownAllocator::new(0));
        assert_eq!(result, Err(RegistryError::PayloadAllocationFailed));
        assert!(store.is_empty());
        assert_eq!(store.shared_len(), 0);
    }

    /// 让两个不同采样落到同一个哈希上
    fn store_with_forged_collision(verify_bytes: bool) -> (PayloadStore, PayloadHandle, Sample) {
        let mut store = PayloadStore::new(verify_bytes);
        let a = store.insert_copy(&adpcm_sample(3), &SystemAllocator).unwrap();
        let b = adpcm_sample(5);
        let hash_b = b.content_hash().unwrap();
        store.dedup.insert(hash_b, a);
        (store, a, b)
    }

    #[test]
    fn test_hash_collision_stores_independent_copy() {
        let (mut store, a, b) = store_with_forged_collision(true);

        let handle = store.insert_copy(&b, &SystemAllocator).unwrap();
        assert_ne!(handle, a);
        assert_eq!(store.len(), 2);
        assert_eq!(store.ref_count(a), 1);
        assert_eq!(store.ref_count(handle), 1);
        assert_eq!(store.get(handle), Some(&b.owned_copy()));

        // 独立副本不登记到去重表，释放时不影响原槽位
        assert_eq!(store.release(handle), Ok(0));
        assert_eq!(store.len(), 1);
        assert_eq!(store.insert_copy(&adpcm_sample(3), &SystemAllocator), Ok(a));
        assert_eq!(store.ref_count(a), 2);
    }

    #[test]
    fn test_hash_collision_aliases_without_verification() {
        let (mut store, a, b) = store_with_forged_collision(false);

        assert_eq!(store.insert_copy(&b, &SystemAllocator), Ok(a));
        assert_eq!(store.len(), 1);
        assert_eq!(store.ref_count(a), 2);
    }
}
