//! sound font 的注册接口
//!
//! 音色库有两种状态：还在来源介质中（记录指向设备地址），或者已经驻留内存成为 [`SoundFont`]。
//! 针对驻留音色库的修改直接生效；否则进入 load queue，等加载器交付音色库时按顺序应用。
//!
//! 表的附加列 [`SoundFontMeta`] 记录逻辑上的数量：即使 Add 还在 load queue 中等待，
//! 返回的下标也已经计入。

use crate::command_queue::{PushError, PushOutcome, QueuedCommand};
use crate::error::{Applied, RegistryError, RegistryResult};
use crate::handles::{CachePolicy, DataLocation, FontHandle, Medium, ResourceEntry, ResourceKind};
use crate::lifecycle::MutationRoute;
use crate::payload::PayloadStore;
use crate::registry::{AudioRegistry, push_init};
use crate::sound_font::{
    Drum, DrumDesc, Instrument, InstrumentDesc, MAX_DRUMS, MAX_INSTRUMENTS, MAX_SOUND_EFFECTS, SoundEffect,
    SoundEffectDesc, SoundFont, SoundFontMeta, copy_drum, copy_instrument, copy_sound_effect, release_drum,
    release_instrument, release_sound_effect,
};

#[derive(Debug, Clone, PartialEq)]
pub enum SoundFontCommand {
    ReplaceSoundFont { id: u32, entry: Box<ResourceEntry> },
    SetSampleBank { id: u32, bank_num: u32, bank: u8 },
    AddDrum { id: u32, index: u32, drum: Drum },
    ReplaceDrum { id: u32, index: u32, drum: Drum },
    AddSoundEffect { id: u32, index: u32, sfx: SoundEffect },
    ReplaceSoundEffect { id: u32, index: u32, sfx: SoundEffect },
    AddInstrument { id: u32, index: u32, instrument: Instrument },
    ReplaceInstrument { id: u32, index: u32, instrument: Instrument },
}
impl QueuedCommand for SoundFontCommand {
    fn op(&self) -> u32 {
        match self {
            SoundFontCommand::ReplaceSoundFont { .. } => 0,
            SoundFontCommand::SetSampleBank { .. } => 1,
            SoundFontCommand::AddDrum { .. } => 2,
            SoundFontCommand::ReplaceDrum { .. } => 3,
            SoundFontCommand::AddSoundEffect { .. } => 4,
            SoundFontCommand::ReplaceSoundEffect { .. } => 5,
            SoundFontCommand::AddInstrument { .. } => 6,
            SoundFontCommand::ReplaceInstrument { .. } => 7,
        }
    }

    fn arg_a(&self) -> u32 {
        match self {
            SoundFontCommand::ReplaceSoundFont { id, .. }
            | SoundFontCommand::SetSampleBank { id, .. }
            | SoundFontCommand::AddDrum { id, .. }
            | SoundFontCommand::ReplaceDrum { id, .. }
            | SoundFontCommand::AddSoundEffect { id, .. }
            | SoundFontCommand::ReplaceSoundEffect { id, .. }
            | SoundFontCommand::AddInstrument { id, .. }
            | SoundFontCommand::ReplaceInstrument { id, .. } => *id,
        }
    }

    fn arg_b(&self) -> u32 {
        match self {
            SoundFontCommand::ReplaceSoundFont { .. } => 0,
            SoundFontCommand::SetSampleBank { bank_num, .. } => *bank_num,
            SoundFontCommand::AddDrum { index, .. }
            | SoundFontCommand::ReplaceDrum { index, .. }
            | SoundFontCommand::AddSoundEffect { index, .. }
            | SoundFontCommand::ReplaceSoundEffect { index, .. }
            | SoundFontCommand::AddInstrument { index, .. }
            | SoundFontCommand::ReplaceInstrument { index, .. } => *index,
        }
    }
}

/// 释放一条不会被应用的命令携带的采样
pub(crate) fn release_font_command(payloads: &mut PayloadStore, command: SoundFontCommand) {
    match command {
        SoundFontCommand::AddDrum { drum, .. } | SoundFontCommand::ReplaceDrum { drum, .. } => {
            release_drum(payloads, drum)
        }
        SoundFontCommand::AddSoundEffect { sfx, .. } | SoundFontCommand::ReplaceSoundEffect { sfx, .. } => {
            release_sound_effect(payloads, sfx)
        }
        SoundFontCommand::AddInstrument { instrument, .. } | SoundFontCommand::ReplaceInstrument { instrument, .. } => {
            release_instrument(payloads, instrument)
        }
        SoundFontCommand::ReplaceSoundFont { .. } | SoundFontCommand::SetSampleBank { .. } => {}
    }
}

/// 把命令应用到驻留的音色库
///
/// 被替换下来的旧项、以及越界或超过上限而被拒绝的新项，都会释放各自的采样。
/// 越界的 Replace 不修改音色库，也不算错误。
pub(crate) fn apply_font_command(
    body: &mut SoundFont,
    payloads: &mut PayloadStore,
    command: SoundFontCommand,
) -> RegistryResult<()> {
    match command {
        SoundFontCommand::ReplaceSoundFont { .. } => {
            return Err(RegistryError::InvalidArgument("sound font replacement does not apply to a font body"));
        }
        SoundFontCommand::SetSampleBank { bank_num, bank, .. } => {
            if !body.set_sample_bank(bank_num, bank) {
                return Err(RegistryError::InvalidArgument("sample bank number must be 1 or 2"));
            }
        }

        SoundFontCommand::AddDrum { drum, .. } => {
            if let Err((drum, err)) = body.add_drum(drum) {
                release_drum(payloads, drum);
                return Err(err);
            }
        }
        SoundFontCommand::AddSoundEffect { sfx, .. } => {
            if let Err((sfx, err)) = body.add_sound_effect(sfx) {
                release_sound_effect(payloads, sfx);
                return Err(err);
            }
        }
        SoundFontCommand::AddInstrument { instrument, .. } => {
            if let Err((instrument, err)) = body.add_instrument(instrument) {
                release_instrument(payloads, instrument);
                return Err(err);
            }
        }

        SoundFontCommand::ReplaceDrum { index, drum, .. } => match body.replace_drum(index, drum) {
            Ok(old) => old.into_iter().for_each(|old| release_drum(payloads, old)),
            Err(rejected) => release_drum(payloads, rejected),
        },
        SoundFontCommand::ReplaceSoundEffect { index, sfx, .. } => match body.replace_sound_effect(index, sfx) {
            Ok(old) | Err(old) => release_sound_effect(payloads, old),
        },
        SoundFontCommand::ReplaceInstrument { index, instrument, .. } => {
            match body.replace_instrument(index, instrument) {
                Ok(old) => old.into_iter().for_each(|old| release_instrument(payloads, old)),
                Err(rejected) => release_instrument(payloads, rejected),
            }
        }
    }
    Ok(())
}

/// Add 还在 load queue 中时，先把下标计入逻辑数量
fn count_pending_add(meta: &mut SoundFontMeta, command: &SoundFontCommand) {
    match command {
        SoundFontCommand::AddInstrument { index, .. } => meta.num_instruments = *index as u16 + 1,
        SoundFontCommand::AddDrum { index, .. } => meta.num_drums = *index as u16 + 1,
        SoundFontCommand::AddSoundEffect { index, .. } => meta.num_sfx = *index as u16 + 1,
        _ => {}
    }
}

// table
impl AudioRegistry {
    /// 追加一个音色库；记录指向驻留音色库时，附加列与 short data 取自音色库本身
    pub fn add_sound_font(&mut self, mut entry: ResourceEntry) -> RegistryResult<u32> {
        self.lifecycle.check_mutable()?;
        let meta = self.meta_for_entry(&mut entry);
        self.fonts.table.append(entry, meta, self.allocator.as_ref())
    }

    pub fn sound_font(&self, id: u32) -> RegistryResult<&ResourceEntry> {
        self.fonts.table.get(id)
    }

    pub fn sound_font_meta(&self, id: u32) -> RegistryResult<SoundFontMeta> {
        self.fonts.table.aux(id).copied()
    }

    /// 驻留内存的音色库，还在来源介质中时为 None
    pub fn sound_font_body(&self, id: u32) -> Option<&SoundFont> {
        match self.fonts.table.get(id).ok()?.location {
            DataLocation::Font(handle) => self.font_bodies.get(handle),
            _ => None,
        }
    }

    pub fn replace_sound_font(&mut self, id: u32, entry: ResourceEntry) -> RegistryResult<Applied> {
        self.lifecycle.check_mutable()?;
        if self.is_locked(ResourceKind::SoundFont, id) {
            return Ok(Applied::Ignored);
        }
        match self.lifecycle.route() {
            MutationRoute::Reject => Err(RegistryError::NotReady),
            MutationRoute::Defer => self.defer_font(SoundFontCommand::ReplaceSoundFont {
                id,
                entry: Box::new(entry),
            }),
            MutationRoute::Apply => {
                let mut entry = entry;
                let meta = self.meta_for_entry(&mut entry);
                self.fonts.table.replace(id, entry)?;
                *self.fonts.table.aux_mut(id)? = meta;
                Ok(Applied::Immediate)
            }
        }
    }

    pub fn restore_sound_font(&mut self, id: u32) -> RegistryResult<()> {
        self.lifecycle.check_ready()?;
        let (entry, meta) = self.fonts.baseline(id)?.clone();
        self.fonts.table.replace(id, entry)?;
        *self.fonts.table.aux_mut(id)? = meta;
        Ok(())
    }

    /// 创建一个空的驻留音色库（sample bank 为 1 / 255），缓存策略 Either
    pub fn create_empty_sound_font(&mut self) -> RegistryResult<u32> {
        self.lifecycle.check_mutable()?;
        let handle = self.font_bodies.insert(SoundFont::default());
        let entry = ResourceEntry {
            location: DataLocation::Font(handle),
            size: 0,
            medium: Medium::Cart,
            cache_policy: CachePolicy::Either,
            short_data: [0; 3],
        };
        let result = self.add_sound_font(entry);
        if result.is_err() {
            self.font_bodies.remove(handle);
        }
        result
    }

    fn meta_for_entry(&self, entry: &mut ResourceEntry) -> SoundFontMeta {
        let body = match entry.location {
            DataLocation::Font(handle) => self.font_bodies.get(handle),
            _ => None,
        };
        match body {
            Some(body) => {
                let meta = SoundFontMeta::from_font(body);
                entry.short_data = meta.to_short_data();
                meta
            }
            None => SoundFontMeta::from_short_data(entry.short_data),
        }
    }

    fn resident_font(&self, id: u32) -> RegistryResult<Option<FontHandle>> {
        match self.fonts.table.get(id)?.location {
            DataLocation::Font(handle) if self.font_bodies.contains_key(handle) => Ok(Some(handle)),
            _ => Ok(None),
        }
    }
}
// body mutations
impl AudioRegistry {
    /// 设置第 `bank_num`（1 或 2）个 sample bank
    pub fn set_sound_font_sample_bank(&mut self, id: u32, bank_num: u32, bank: u8) -> RegistryResult<Applied> {
        self.lifecycle.check_mutable()?;
        match self.lifecycle.route() {
            MutationRoute::Reject => return Err(RegistryError::NotReady),
            MutationRoute::Defer => return self.defer_font(SoundFontCommand::SetSampleBank { id, bank_num, bank }),
            MutationRoute::Apply => {}
        }

        self.fonts.table.get(id)?;
        let bank_count = self.sample_banks.table.count();
        if bank as usize >= bank_count {
            return Err(RegistryError::OutOfRange {
                kind: ResourceKind::SampleBank,
                id: bank as u32,
                count: bank_count,
            });
        }
        if !(1..=2).contains(&bank_num) {
            return Err(RegistryError::InvalidArgument("sample bank number must be 1 or 2"));
        }
        self.apply_or_park_font_command(SoundFontCommand::SetSampleBank { id, bank_num, bank })
    }

    /// 返回新乐器的下标
    pub fn add_instrument(&mut self, id: u32, desc: &InstrumentDesc) -> RegistryResult<u32> {
        self.lifecycle.check_mutable()?;
        let index = self.next_font_index(id, |meta| meta.num_instruments, "instrument", MAX_INSTRUMENTS)?;
        let instrument = copy_instrument(&mut self.payloads, desc, self.allocator.as_ref())?;
        self.add_to_font(SoundFontCommand::AddInstrument { id, index, instrument })
    }

    pub fn add_drum(&mut self, id: u32, desc: &DrumDesc) -> RegistryResult<u32> {
        self.lifecycle.check_mutable()?;
        let index = self.next_font_index(id, |meta| meta.num_drums, "drum", MAX_DRUMS)?;
        let drum = copy_drum(&mut self.payloads, desc, self.allocator.as_ref())?;
        self.add_to_font(SoundFontCommand::AddDrum { id, index, drum })
    }

    pub fn add_sound_effect(&mut self, id: u32, desc: &SoundEffectDesc) -> RegistryResult<u32> {
        self.lifecycle.check_mutable()?;
        let index = self.next_font_index(id, |meta| meta.num_sfx, "sound effect", MAX_SOUND_EFFECTS)?;
        let sfx = copy_sound_effect(&mut self.payloads, desc, self.allocator.as_ref())?;
        self.add_to_font(SoundFontCommand::AddSoundEffect { id, index, sfx })
    }

    pub fn replace_instrument(&mut self, id: u32, index: u32, desc: &InstrumentDesc) -> RegistryResult<Applied> {
        self.lifecycle.check_mutable()?;
        let instrument = copy_instrument(&mut self.payloads, desc, self.allocator.as_ref())?;
        self.route_font_command(SoundFontCommand::ReplaceInstrument { id, index, instrument })
    }

    pub fn replace_drum(&mut self, id: u32, index: u32, desc: &DrumDesc) -> RegistryResult<Applied> {
        self.lifecycle.check_mutable()?;
        let drum = copy_drum(&mut self.payloads, desc, self.allocator.as_ref())?;
        self.route_font_command(SoundFontCommand::ReplaceDrum { id, index, drum })
    }

    pub fn replace_sound_effect(&mut self, id: u32, index: u32, desc: &SoundEffectDesc) -> RegistryResult<Applied> {
        self.lifecycle.check_mutable()?;
        let sfx = copy_sound_effect(&mut self.payloads, desc, self.allocator.as_ref())?;
        self.route_font_command(SoundFontCommand::ReplaceSoundEffect { id, index, sfx })
    }

    fn next_font_index(
        &self,
        id: u32,
        count: impl Fn(&SoundFontMeta) -> u16,
        what: &'static str,
        limit: usize,
    ) -> RegistryResult<u32> {
        let index = count(self.fonts.table.aux(id)?) as usize;
        if index >= limit {
            return Err(RegistryError::LimitReached { what, limit });
        }
        Ok(index as u32)
    }

    /// Add 不经过 init queue：驻留时直接追加，否则进入 load queue
    fn add_to_font(&mut self, command: SoundFontCommand) -> RegistryResult<u32> {
        let id = command.arg_a();
        let index = command.arg_b();
        match self.resident_font(id) {
            Ok(Some(handle)) => self.apply_to_resident_font(id, handle, command)?,
            Ok(None) => {
                let mut meta = *self.fonts.table.aux(id)?;
                count_pending_add(&mut meta, &command);
                if let Err(err) = self.fonts.load_queue.push(command, self.allocator.as_ref()) {
                    release_font_command(&mut self.payloads, err.command);
                    return Err(err.source);
                }
                *self.fonts.table.aux_mut(id)? = meta;
                log::debug!("sound font {} not resident, add queued at index {}", id, index);
            }
            Err(err) => {
                release_font_command(&mut self.payloads, command);
                return Err(err);
            }
        }
        Ok(index)
    }

    fn route_font_command(&mut self, command: SoundFontCommand) -> RegistryResult<Applied> {
        match self.lifecycle.route() {
            MutationRoute::Reject => {
                release_font_command(&mut self.payloads, command);
                Err(RegistryError::NotReady)
            }
            MutationRoute::Defer => self.defer_font(command),
            MutationRoute::Apply => self.apply_or_park_font_command(command),
        }
    }

    /// 驻留时立即应用，否则进入 load queue
    ///
    /// Replace 在 load queue 中同一目标先到先得；SetSampleBank 每次都追加，按顺序应用，最后一次生效。
    fn apply_or_park_font_command(&mut self, command: SoundFontCommand) -> RegistryResult<Applied> {
        let id = command.arg_a();
        match self.resident_font(id) {
            Ok(Some(handle)) => {
                self.apply_to_resident_font(id, handle, command)?;
                Ok(Applied::Immediate)
            }
            Ok(None) => {
                let outcome = match command {
                    SoundFontCommand::SetSampleBank { .. } => self
                        .fonts
                        .load_queue
                        .push(command, self.allocator.as_ref())
                        .map(|()| PushOutcome::Queued),
                    _ => self.fonts.load_queue.push_if_absent(command, self.allocator.as_ref()),
                };
                self.settle_font_push(outcome)
            }
            Err(err) => {
                release_font_command(&mut self.payloads, command);
                Err(err)
            }
        }
    }

    fn apply_to_resident_font(&mut self, id: u32, handle: FontHandle, command: SoundFontCommand) -> RegistryResult<()> {
        let Some(body) = self.font_bodies.get_mut(handle) else {
            release_font_command(&mut self.payloads, command);
            return Err(RegistryError::InvalidHandle);
        };
        let result = apply_font_command(body, &mut self.payloads, command);
        let meta = SoundFontMeta::from_font(body);

        let entry = self.fonts.table.get_mut(id)?;
        entry.short_data = meta.to_short_data();
        *self.fonts.table.aux_mut(id)? = meta;
        result
    }

    fn defer_font(&mut self, command: SoundFontCommand) -> RegistryResult<Applied> {
        log::debug!("deferring sound font command {:?}", command.key());
        let outcome = push_init(self.fonts.init_queue.as_mut(), command, self.allocator.as_ref());
        self.settle_font_push(outcome)
    }

    /// 重复或入队失败的命令在这里释放它携带的采样
    fn settle_font_push(
        &mut self,
        outcome: Result<PushOutcome<SoundFontCommand>, PushError<SoundFontCommand>>,
    ) -> RegistryResult<Applied> {
        match outcome {
            Ok(PushOutcome::Queued) => Ok(Applied::Deferred),
            Ok(PushOutcome::Duplicate(command)) => {
                release_font_command(&mut self.payloads, command);
                Ok(Applied::Discarded)
            }
            Err(err) => {
                release_font_command(&mut self.payloads, err.command);
                Err(err.source)
            }
        }
    }

    /// init queue drain：替换记录重新走公开入口，其余命令驻留时立即应用，否则转入 load queue
    pub(crate) fn apply_sound_font_init_command(&mut self, command: SoundFontCommand) {
        let id = command.arg_a();
        let result = match command {
            SoundFontCommand::ReplaceSoundFont { id, entry } => self.replace_sound_font(id, *entry),
            SoundFontCommand::SetSampleBank { id, bank_num, bank } => {
                self.set_sound_font_sample_bank(id, bank_num, bank)
            }
            other => self.apply_or_park_font_command(other),
        };
        if let Err(err) = result {
            log::warn!("queued command for sound font {} failed: {}", id, err);
        }
    }
}
