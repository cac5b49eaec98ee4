//! sequence 的注册接口
//!
//! 除了表记录本身，每个 sequence 还有两列附加数据：最多 4 个音色库 id 的列表，以及一组标志位。
//! 两列与表一起扩容。

use crate::command_queue::{PushOutcome, QueuedCommand};
use crate::error::{Applied, RegistryError, RegistryResult};
use crate::handles::{DataLocation, ResourceEntry, ResourceKind};
use crate::lifecycle::MutationRoute;
use crate::registry::{AudioRegistry, BlobPatch, apply_patch, blob_size, push_init};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

pub const MAX_FONTS_PER_SEQUENCE: usize = 4;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct SequenceFlags: u8 {
        const ENEMY = 1 << 0;
        const FANFARE = 1 << 1;
        const FANFARE_KAMARO = 1 << 2;
        const RESTORE = 1 << 3;
        const RESUME = 1 << 4;
        const RESUME_PREV = 1 << 5;
        const SKIP_HARP_INTRO = 1 << 6;
        const NO_AMBIENCE = 1 << 7;
    }
}

/// sequence 表的附加列
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SequenceAux {
    /// 音色库 id，最多 [`MAX_FONTS_PER_SEQUENCE`] 个
    pub fonts: Vec<u8>,
    pub flags: SequenceFlags,
}
impl SequenceAux {
    pub fn new(fonts: impl IntoIterator<Item = u8>, flags: SequenceFlags) -> Self {
        Self {
            fonts: fonts.into_iter().take(MAX_FONTS_PER_SEQUENCE).collect(),
            flags,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SequenceCommand {
    ReplaceSequence { id: u32, entry: Box<ResourceEntry> },
    ReplaceSequenceFont { id: u32, font_num: u32, font: u8 },
    SetSequenceFlags { id: u32, flags: SequenceFlags },
}
impl QueuedCommand for SequenceCommand {
    fn op(&self) -> u32 {
        match self {
            SequenceCommand::ReplaceSequence { .. } => 0,
            SequenceCommand::ReplaceSequenceFont { .. } => 1,
            SequenceCommand::SetSequenceFlags { .. } => 2,
        }
    }

    fn arg_a(&self) -> u32 {
        match self {
            SequenceCommand::ReplaceSequence { id, .. }
            | SequenceCommand::ReplaceSequenceFont { id, .. }
            | SequenceCommand::SetSequenceFlags { id, .. } => *id,
        }
    }

    fn arg_b(&self) -> u32 {
        match self {
            SequenceCommand::ReplaceSequenceFont { font_num, .. } => *font_num,
            SequenceCommand::ReplaceSequence { .. } | SequenceCommand::SetSequenceFlags { .. } => 0,
        }
    }
}

// table
impl AudioRegistry {
    /// 追加一个 sequence，返回新 id
    pub fn add_sequence(&mut self, entry: ResourceEntry) -> RegistryResult<u32> {
        self.lifecycle.check_mutable()?;
        self.sequences.table.append(entry, SequenceAux::default(), self.allocator.as_ref())
    }

    pub fn sequence(&self, id: u32) -> RegistryResult<&ResourceEntry> {
        self.sequences.table.get(id)
    }

    /// NotReady 时拒绝；Queueing 时进入 init queue（同一 id 先到先得）；之后直接覆盖
    pub fn replace_sequence(&mut self, id: u32, entry: ResourceEntry) -> RegistryResult<Applied> {
        self.lifecycle.check_mutable()?;
        if self.is_locked(ResourceKind::Sequence, id) {
            return Ok(Applied::Ignored);
        }
        match self.lifecycle.route() {
            MutationRoute::Reject => Err(RegistryError::NotReady),
            MutationRoute::Defer => self.defer_sequence(SequenceCommand::ReplaceSequence {
                id,
                entry: Box::new(entry),
            }),
            MutationRoute::Apply => {
                self.sequences.table.replace(id, entry)?;
                Ok(Applied::Immediate)
            }
        }
    }

    /// 还原为来源介质中的原始记录，只在 Ready 之后可用
    pub fn restore_sequence(&mut self, id: u32) -> RegistryResult<()> {
        self.lifecycle.check_ready()?;
        let (entry, _) = self.sequences.baseline(id)?.clone();
        self.sequences.table.replace(id, entry)
    }

    fn defer_sequence(&mut self, command: SequenceCommand) -> RegistryResult<Applied> {
        log::debug!("deferring sequence command {:?}", command.key());
        match push_init(self.sequences.init_queue.as_mut(), command, self.allocator.as_ref()) {
            Ok(PushOutcome::Queued) => Ok(Applied::Deferred),
            Ok(PushOutcome::Duplicate(_)) => Ok(Applied::Discarded),
            Err(err) => Err(err.source),
        }
    }

    pub(crate) fn apply_sequence_init_command(&mut self, command: SequenceCommand) {
        let id = command.arg_a();
        let result = match command {
            SequenceCommand::ReplaceSequence { id, entry } => self.replace_sequence(id, *entry).map(|_| ()),
            SequenceCommand::ReplaceSequenceFont { id, font_num, font } => {
                self.replace_sequence_font(id, font_num, font).map(|_| ())
            }
            SequenceCommand::SetSequenceFlags { id, flags } => self.set_sequence_flags(id, flags).map(|_| ()),
        };
        if let Err(err) = result {
            log::warn!("queued command for sequence {} failed: {}", id, err);
        }
    }
}
// fonts
impl AudioRegistry {
    /// 第 `font_num` 个音色库
    pub fn sequence_font(&self, id: u32, font_num: usize) -> RegistryResult<Option<u8>> {
        Ok(self.sequences.table.aux(id)?.fonts.get(font_num).copied())
    }

    pub fn sequence_fonts(&self, id: u32) -> RegistryResult<&[u8]> {
        Ok(&self.sequences.table.aux(id)?.fonts)
    }

    /// 插入到列表最前面，返回新的数量
    pub fn add_sequence_font(&mut self, id: u32, font: u8) -> RegistryResult<usize> {
        self.lifecycle.check_mutable()?;
        let aux = self.sequences.table.aux_mut(id)?;
        if aux.fonts.len() >= MAX_FONTS_PER_SEQUENCE {
            return Err(RegistryError::LimitReached {
                what: "sequence fonts",
                limit: MAX_FONTS_PER_SEQUENCE,
            });
        }
        aux.fonts.insert(0, font);
        Ok(aux.fonts.len())
    }

    /// 替换第 `font_num` 个音色库；列表不够长时改为插入
    pub fn replace_sequence_font(&mut self, id: u32, font_num: u32, font: u8) -> RegistryResult<Applied> {
        self.lifecycle.check_mutable()?;
        if self.is_locked(ResourceKind::Sequence, id) {
            return Ok(Applied::Ignored);
        }
        match self.lifecycle.route() {
            MutationRoute::Reject => Err(RegistryError::NotReady),
            MutationRoute::Defer => self.defer_sequence(SequenceCommand::ReplaceSequenceFont { id, font_num, font }),
            MutationRoute::Apply => {
                let index = font_num as usize;
                if index >= MAX_FONTS_PER_SEQUENCE {
                    return Err(RegistryError::InvalidArgument("sequence font slot out of range"));
                }
                let aux = self.sequences.table.aux_mut(id)?;
                if index >= aux.fonts.len() {
                    self.add_sequence_font(id, font)?;
                } else {
                    aux.fonts[index] = font;
                }
                Ok(Applied::Immediate)
            }
        }
    }

    /// 还原第 `font_num` 个音色库，只对来源介质中存在的 sequence 有效
    pub fn restore_sequence_font(&mut self, id: u32, font_num: usize) -> RegistryResult<()> {
        self.lifecycle.check_ready()?;
        let (_, baseline) = self.sequences.baseline(id)?;
        let font = *baseline
            .fonts
            .get(font_num)
            .ok_or(RegistryError::InvalidArgument("font slot not present in the original sequence"))?;

        let aux = self.sequences.table.aux_mut(id)?;
        let slot = aux
            .fonts
            .get_mut(font_num)
            .ok_or(RegistryError::InvalidArgument("font slot no longer present"))?;
        *slot = font;
        Ok(())
    }
}
// flags
impl AudioRegistry {
    pub fn sequence_flags(&self, id: u32) -> RegistryResult<SequenceFlags> {
        Ok(self.sequences.table.aux(id)?.flags)
    }

    pub fn set_sequence_flags(&mut self, id: u32, flags: SequenceFlags) -> RegistryResult<Applied> {
        match self.lifecycle.route() {
            MutationRoute::Reject => Err(RegistryError::NotReady),
            MutationRoute::Defer => self.defer_sequence(SequenceCommand::SetSequenceFlags { id, flags }),
            MutationRoute::Apply => {
                self.sequences.table.aux_mut(id)?.flags = flags;
                Ok(Applied::Immediate)
            }
        }
    }

    pub fn restore_sequence_flags(&mut self, id: u32) -> RegistryResult<()> {
        self.lifecycle.check_ready()?;
        let flags = self.sequences.baseline(id)?.1.flags;
        self.sequences.table.aux_mut(id)?.flags = flags;
        Ok(())
    }
}
// data
impl AudioRegistry {
    /// 修改 sequence 字节：已驻留时立即写入，否则等加载完成时应用
    pub fn patch_sequence_data(&mut self, id: u32, offset: u32, bytes: &[u8]) -> RegistryResult<Applied> {
        self.lifecycle.check_mutable()?;
        let location = self.sequences.table.get(id)?.location;
        match location {
            DataLocation::Blob(handle) => {
                let blob = self.blobs.get_mut(handle).ok_or(RegistryError::InvalidHandle)?;
                apply_patch(blob, offset as usize, bytes)?;
                Ok(Applied::Immediate)
            }
            _ => {
                let patch = BlobPatch {
                    id,
                    offset,
                    bytes: bytes.to_vec(),
                };
                self.sequences
                    .load_queue
                    .push(patch, self.allocator.as_ref())
                    .map_err(|err| err.source)?;
                log::debug!("sequence {} not resident, patch queued", id);
                Ok(Applied::Deferred)
            }
        }
    }

    /// 登记一段驻留内存的 sequence 字节，返回新 id
    pub fn add_sequence_bytes(&mut self, bytes: Vec<u8>, entry: ResourceEntry) -> RegistryResult<u32> {
        self.lifecycle.check_mutable()?;
        let size = blob_size(bytes.len())?;
        let handle = self.blobs.insert(bytes);
        let entry = ResourceEntry {
            location: DataLocation::Blob(handle),
            size,
            ..entry
        };
        let result = self.sequences.table.append(entry, SequenceAux::default(), self.allocator.as_ref());
        if result.is_err() {
            self.blobs.remove(handle);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::handles::{CachePolicy, Medium};
    use crate::registry::{MaterializedData, RegistryBaseline};
    use pretty_assertions::assert_eq;

    fn origin(addr: u32) -> ResourceEntry {
        ResourceEntry::from_origin(addr, 0x40, Medium::Cart, CachePolicy::None)
    }

    fn registry(config: RegistryConfig) -> AudioRegistry {
        let baseline = RegistryBaseline {
            sequences: (0..8)
                .map(|i| (origin(i * 0x100), SequenceAux::new([i as u8, 1], SequenceFlags::RESTORE)))
                .collect(),
            ..Default::default()
        };
        AudioRegistry::new(config, baseline)
    }

    #[test]
    fn test_replace_across_phases() {
        let mut registry = registry(RegistryConfig::default());
        let v1 = origin(0xA000);
        let v2 = origin(0xB000);
        let prior = registry.sequence(5).unwrap().clone();

        assert_eq!(registry.replace_sequence(5, v1), Err(RegistryError::NotReady));
        assert_eq!(registry.sequence(5).unwrap(), &prior);

        registry.begin_queueing().unwrap();
        assert_eq!(registry.replace_sequence(5, v2.clone()), Ok(Applied::Deferred));
        assert_eq!(registry.sequence(5).unwrap(), &prior);

        let report = registry.ready().unwrap();
        assert_eq!(report.sequences, 1);
        assert_eq!(registry.sequence(5).unwrap(), &v2);
    }

    #[test]
    fn test_first_queued_replace_wins() {
        let mut registry = registry(RegistryConfig::default());
        registry.begin_queueing().unwrap();
        assert_eq!(registry.replace_sequence(3, origin(0x1)), Ok(Applied::Deferred));
        assert_eq!(registry.replace_sequence(3, origin(0x2)), Ok(Applied::Discarded));
        registry.ready().unwrap();
        assert_eq!(registry.sequence(3).unwrap(), &origin(0x1));
    }

    #[test]
    fn test_locked_sequence_ignored() {
        let mut config = RegistryConfig::default();
        config.sequence.locked_ids = vec![2];
        let mut registry = registry(config);
        registry.begin_queueing().unwrap();
        registry.ready().unwrap();

        assert_eq!(registry.replace_sequence(2, origin(0xFFFF)), Ok(Applied::Ignored));
        assert_eq!(registry.replace_sequence_font(2, 0, 9), Ok(Applied::Ignored));
        assert_eq!(registry.sequence(2).unwrap(), &origin(0x200));
    }

    #[test]
    fn test_restore_only_when_ready() {
        let mut registry = registry(RegistryConfig::default());
        registry.begin_queueing().unwrap();
        let custom = registry.add_sequence(origin(0x9000)).unwrap();
        assert_eq!(registry.restore_sequence(1), Err(RegistryError::NotReady));

        registry.ready().unwrap();
        registry.replace_sequence(1, origin(0x7777)).unwrap();
        registry.restore_sequence(1).unwrap();
        assert_eq!(registry.sequence(1).unwrap(), &origin(0x100));

        assert!(matches!(registry.restore_sequence(custom), Err(RegistryError::OutOfRange { .. })));
    }

    #[test]
    fn test_add_sequence_skips_sentinels_after_baseline() {
        let mut registry = AudioRegistry::new(
            RegistryConfig::default(),
            RegistryBaseline {
                sequences: (0..0xFE).map(|i| (origin(i), SequenceAux::default())).collect(),
                ..Default::default()
            },
        );
        registry.begin_queueing().unwrap();
        assert_eq!(registry.add_sequence(origin(1)), Ok(0x100));
        assert!(matches!(registry.sequence(0xFE), Err(RegistryError::ReservedId { .. })));
    }

    #[test]
    fn test_sequence_fonts() {
        let mut registry = registry(RegistryConfig::default());
        registry.begin_queueing().unwrap();
        registry.ready().unwrap();

        assert_eq!(registry.sequence_fonts(4).unwrap(), &[4, 1]);
        assert_eq!(registry.add_sequence_font(4, 20), Ok(3));
        assert_eq!(registry.sequence_fonts(4).unwrap(), &[20, 4, 1]);
        assert_eq!(registry.add_sequence_font(4, 21), Ok(4));
        assert!(matches!(
            registry.add_sequence_font(4, 22),
            Err(RegistryError::LimitReached { limit: 4, .. })
        ));

        registry.replace_sequence_font(4, 1, 30).unwrap();
        assert_eq!(registry.sequence_font(4, 1), Ok(Some(30)));
        assert_eq!(registry.sequence_font(4, 7), Ok(None));

        registry.restore_sequence_font(4, 1).unwrap();
        assert_eq!(registry.sequence_font(4, 1), Ok(Some(1)));
    }

    #[test]
    fn test_replace_font_past_end_adds() {
        let mut registry = registry(RegistryConfig::default());
        registry.begin_queueing().unwrap();
        let id = registry.add_sequence(origin(0)).unwrap();
        assert_eq!(registry.replace_sequence_font(id, 2, 5), Ok(Applied::Deferred));
        registry.ready().unwrap();
        assert_eq!(registry.sequence_fonts(id).unwrap(), &[5]);
    }

    #[test]
    fn test_flags() {
        let mut registry = registry(RegistryConfig::default());
        registry.begin_queueing().unwrap();
        registry.set_sequence_flags(0, SequenceFlags::FANFARE | SequenceFlags::ENEMY).unwrap();
        assert_eq!(registry.sequence_flags(0), Ok(SequenceFlags::RESTORE));

        registry.ready().unwrap();
        assert_eq!(registry.sequence_flags(0), Ok(SequenceFlags::FANFARE | SequenceFlags::ENEMY));
        registry.restore_sequence_flags(0).unwrap();
        assert_eq!(registry.sequence_flags(0), Ok(SequenceFlags::RESTORE));
    }

    #[test]
    fn test_patch_waits_for_materialization() {
        let mut registry = registry(RegistryConfig::default());
        registry.begin_queueing().unwrap();

        assert_eq!(registry.patch_sequence_data(6, 1, &[0xAA]), Ok(Applied::Deferred));
        assert_eq!(registry.pending_load_commands(ResourceKind::Sequence), 1);

        registry.on_materialized(ResourceKind::Sequence, 6, MaterializedData::Bytes(vec![0; 4])).unwrap();
        assert_eq!(registry.pending_load_commands(ResourceKind::Sequence), 0);
        assert_eq!(registry.resident_bytes(ResourceKind::Sequence, 6), Some(&[0, 0xAA, 0, 0][..]));

        assert_eq!(registry.patch_sequence_data(6, 3, &[0xBB]), Ok(Applied::Immediate));
        assert_eq!(registry.resident_bytes(ResourceKind::Sequence, 6), Some(&[0, 0xAA, 0, 0xBB][..]));
    }

    #[test]
    fn test_flags_in_toml() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Doc {
            flags: SequenceFlags,
        }

        let doc = Doc {
            flags: SequenceFlags::ENEMY | SequenceFlags::RESTORE,
        };
        let text = toml::to_string(&doc).unwrap();
        assert_eq!(toml::from_str::<Doc>(&text).unwrap(), doc);
    }

    #[test]
    fn test_patch_skips_init_queue() {
        let mut registry = registry(RegistryConfig::default());
        registry.begin_queueing().unwrap();

        assert_eq!(registry.patch_sequence_data(2, 0, &[0x11]), Ok(Applied::Deferred));
        assert_eq!(registry.patch_sequence_data(2, 0, &[0x22]), Ok(Applied::Deferred));
        assert_eq!(registry.ready().unwrap().sequences, 0);
        assert_eq!(registry.pending_load_commands(ResourceKind::Sequence), 2);

        // 按入队顺序应用，后写的覆盖先写的
        registry.on_materialized(ResourceKind::Sequence, 2, MaterializedData::Bytes(vec![0; 2])).unwrap();
        assert_eq!(registry.resident_bytes(ResourceKind::Sequence, 2), Some(&[0x22, 0][..]));
    }

    #[test]
    fn test_add_sequence_bytes() {
        let mut registry = registry(RegistryConfig::default());
        registry.begin_queueing().unwrap();
        let id = registry.add_sequence_bytes(vec![1, 2, 3], origin(0)).unwrap();
        assert_eq!(registry.sequence(id).unwrap().size, 3);
        assert_eq!(registry.resident_bytes(ResourceKind::Sequence, id), Some(&[1, 2, 3][..]));
    }
}
