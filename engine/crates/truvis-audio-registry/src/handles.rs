use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use std::fmt;

new_key_type! { pub struct PayloadHandle; }
new_key_type! { pub struct BlobHandle; }
new_key_type! { pub struct FontHandle; }

/// 每种资源表的 id 上限（16 位）
pub const MAX_TABLE_CAPACITY: usize = u16::MAX as usize;

/// 低字节为该值的 id 表示 "disabled"
pub const ID_DISABLED_LOW_BYTE: u32 = 0xFF;
/// 低字节为该值的 id 表示 "unspecified / previous"
pub const ID_PREVIOUS_LOW_BYTE: u32 = 0xFE;

/// id 的低字节是否为保留的哨兵值
#[inline]
pub fn is_reserved_id(id: u32) -> bool {
    let low = id & 0xFF;
    low == ID_DISABLED_LOW_BYTE || low == ID_PREVIOUS_LOW_BYTE
}

/// 资源种类，数值即缓存键的高字节
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Sequence = 0,
    SoundFont = 1,
    SampleBank = 2,
}
impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [ResourceKind::Sequence, ResourceKind::SoundFont, ResourceKind::SampleBank];

    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            ResourceKind::Sequence => "sequence",
            ResourceKind::SoundFont => "sound font",
            ResourceKind::SampleBank => "sample bank",
        }
    }
}
impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 分级缓存的键：(kind, realIndex)
///
/// 集合与栈的成员判断都使用压缩后的 u32：`kind << 24 | index`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub kind: ResourceKind,
    pub index: u32,
}
impl CacheKey {
    #[inline]
    pub fn new(kind: ResourceKind, index: u32) -> Self {
        Self { kind, index }
    }

    #[inline]
    pub fn packed(&self) -> u32 {
        ((self.kind as u32) << 24) | (self.index & 0x00FF_FFFF)
    }
}

/// 资源字节所在的存储介质
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Medium {
    Ram,
    Unk,
    #[default]
    Cart,
    DiskDrive,
}

/// 资源的缓存策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// 不记录任何缓存层级
    #[default]
    None,
    /// 加载完成后进入 Permanent 集合
    LoadPermanent,
    /// 加载完成后压入 Persistent 栈
    LoadPersistent,
    /// 常驻或临时驻留都算命中
    Either,
}

/// 单条资源的加载状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    #[default]
    NotLoaded,
    Complete,
    Permanent,
}

/// 资源数据的位置：仍在来源介质中，或已经驻留内存
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataLocation {
    /// 来源介质中的设备地址，字节尚未搬入内存
    Origin { addr: u32 },
    /// 驻留内存的字节块（sequence / sample bank）
    Blob(BlobHandle),
    /// 驻留内存的音色库结构（sound font）
    Font(FontHandle),
}
impl Default for DataLocation {
    fn default() -> Self {
        DataLocation::Origin { addr: 0 }
    }
}
impl DataLocation {
    #[inline]
    pub fn is_resident(&self) -> bool {
        !matches!(self, DataLocation::Origin { .. })
    }
}

/// 资源表中的一条记录
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResourceEntry {
    pub location: DataLocation,
    pub size: u32,
    pub medium: Medium,
    pub cache_policy: CachePolicy,
    /// 各资源种类自定义的附加字段
    ///
    /// sound font: `[bank1 << 8 | bank2, num_instruments << 8 | num_drums, num_sfx]`
    pub short_data: [u16; 3],
}
impl ResourceEntry {
    /// 指向来源介质的记录
    pub fn from_origin(addr: u32, size: u32, medium: Medium, cache_policy: CachePolicy) -> Self {
        Self {
            location: DataLocation::Origin { addr },
            size,
            medium,
            cache_policy,
            short_data: [0; 3],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_ids() {
        assert!(is_reserved_id(0xFE));
        assert!(is_reserved_id(0xFF));
        assert!(is_reserved_id(0x1FE));
        assert!(!is_reserved_id(0x100));
        assert!(!is_reserved_id(0xFD));
    }

    #[test]
    fn test_cache_key_packing() {
        assert_eq!(CacheKey::new(ResourceKind::Sequence, 5).packed(), 5);
        assert_eq!(CacheKey::new(ResourceKind::SoundFont, 5).packed(), 0x0100_0005);
        assert_ne!(
            CacheKey::new(ResourceKind::SoundFont, 3).packed(),
            CacheKey::new(ResourceKind::SampleBank, 3).packed()
        );
    }

    #[test]
    fn test_load_status_order() {
        assert!(LoadStatus::Permanent > LoadStatus::Complete);
        assert!(LoadStatus::Complete > LoadStatus::NotLoaded);
    }
}
