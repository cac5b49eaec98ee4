//! 注册表上下文
//!
//! [`AudioRegistry`] 持有全部共享状态：三种资源的表与命令队列、分级缓存、采样去重存储，
//! 以及驻留内存的字节块与音色库结构。所有操作都通过 `&mut AudioRegistry` 进行，单线程使用。
//!
//! 两类延迟队列：
//! - init queue：Queueing 阶段捕获的变更，在 [`AudioRegistry::ready`] 时 drain 一次后销毁
//! - load queue：目标尚未驻留内存的变更，在该资源 [`AudioRegistry::on_materialized`] 时按 id 取出并应用

use crate::alloc::{AllocationPolicy, SystemAllocator};
use crate::cache::{CacheSearch, PersistentPush, TieredCache};
use crate::command_queue::{CommandQueue, PushError, PushOutcome, QueuedCommand};
use crate::config::RegistryConfig;
use crate::error::{RegistryError, RegistryResult};
use crate::font::{SoundFontCommand, apply_font_command};
use crate::handles::{
    BlobHandle, CacheKey, CachePolicy, DataLocation, FontHandle, LoadStatus, ResourceEntry, ResourceKind,
    is_reserved_id,
};
use crate::hooks::{EngineHooks, NullHooks};
use crate::lifecycle::{InitPhase, Lifecycle};
use crate::payload::PayloadStore;
use crate::sample_bank::SampleBankCommand;
use crate::sequence::{SequenceAux, SequenceCommand};
use crate::sound_font::{SoundFont, SoundFontImage, SoundFontMeta, copy_sound_font};
use crate::table::ResourceTable;
use slotmap::SlotMap;
use std::collections::HashSet;

/// 来源介质中的原始记录，Restore 操作据此还原
#[derive(Debug, Clone, Default)]
pub struct RegistryBaseline {
    pub sequences: Vec<(ResourceEntry, SequenceAux)>,
    pub sound_fonts: Vec<ResourceEntry>,
    pub sample_banks: Vec<ResourceEntry>,
}

/// 加载器交付的数据
#[derive(Debug, Clone)]
pub enum MaterializedData {
    /// sequence / sample bank 的字节
    Bytes(Vec<u8>),
    /// 完整的音色库
    Font(SoundFontImage),
    /// 记录已经指向内存，没有新数据
    Resident,
}

/// [`AudioRegistry::ready`] drain 的命令数量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub sequences: usize,
    pub sound_fonts: usize,
    pub sample_banks: usize,
}

/// 一种资源的表、原始记录与两个队列
///
/// `I` 是 init queue 的命令类型，`L` 是 load queue 的命令类型。
pub(crate) struct KindState<A, I, L = I> {
    pub(crate) table: ResourceTable<A>,
    pub(crate) baseline: Vec<(ResourceEntry, A)>,
    /// 只在 Queueing 到 Ready 之间存在
    pub(crate) init_queue: Option<CommandQueue<I>>,
    pub(crate) load_queue: CommandQueue<L>,
}
impl<A: Clone + Default, I: QueuedCommand, L: QueuedCommand> KindState<A, I, L> {
    fn new(kind: ResourceKind, capacity: usize, baseline: Vec<(ResourceEntry, A)>, queue_capacity: usize) -> Self {
        Self {
            table: ResourceTable::with_baseline(kind, capacity, baseline.iter().cloned()),
            baseline,
            init_queue: None,
            load_queue: CommandQueue::new(queue_capacity),
        }
    }

    /// 原始记录；只有来源介质中存在的 id 才能还原
    pub(crate) fn baseline(&self, id: u32) -> RegistryResult<&(ResourceEntry, A)> {
        let kind = self.table.kind();
        if is_reserved_id(id) {
            return Err(RegistryError::ReservedId { kind, id });
        }
        self.baseline.get(id as usize).ok_or(RegistryError::OutOfRange {
            kind,
            id,
            count: self.baseline.len(),
        })
    }
}

/// 把命令放进 init queue；`queue` 为空说明当前不在 Queueing 阶段
pub(crate) fn push_init<C: QueuedCommand>(
    queue: Option<&mut CommandQueue<C>>,
    command: C,
    policy: &dyn AllocationPolicy,
) -> Result<PushOutcome<C>, PushError<C>> {
    match queue {
        Some(queue) => queue.push_if_absent(command, policy),
        None => Err(PushError {
            command,
            source: RegistryError::NotReady,
        }),
    }
}

/// sequence / sample bank 尚未驻留时等待写入的一段字节，加载完成时按顺序应用
#[derive(Debug, Clone, PartialEq)]
pub struct BlobPatch {
    pub id: u32,
    pub offset: u32,
    pub bytes: Vec<u8>,
}
impl QueuedCommand for BlobPatch {
    fn op(&self) -> u32 {
        0
    }

    fn arg_a(&self) -> u32 {
        self.id
    }

    fn arg_b(&self) -> u32 {
        self.offset
    }
}

/// 覆盖字节块中的一段
pub(crate) fn apply_patch(blob: &mut [u8], offset: usize, bytes: &[u8]) -> RegistryResult<()> {
    let end = offset.checked_add(bytes.len()).filter(|&end| end <= blob.len()).ok_or(
        RegistryError::PatchOutOfBounds {
            offset,
            len: bytes.len(),
            size: blob.len(),
        },
    )?;
    blob[offset..end].copy_from_slice(bytes);
    Ok(())
}

/// 表项的 size 字段是 32 位
pub(crate) fn blob_size(len: usize) -> RegistryResult<u32> {
    u32::try_from(len).map_err(|_| RegistryError::InvalidArgument("blob larger than 4 GiB"))
}

pub struct AudioRegistry {
    pub(crate) config: RegistryConfig,
    pub(crate) lifecycle: Lifecycle,

    pub(crate) sequences: KindState<SequenceAux, SequenceCommand, BlobPatch>,
    pub(crate) fonts: KindState<SoundFontMeta, SoundFontCommand>,
    pub(crate) sample_banks: KindState<(), SampleBankCommand, BlobPatch>,

    pub(crate) cache: TieredCache,
    pub(crate) payloads: PayloadStore,

    /// 驻留内存的 sequence / sample bank 字节
    pub(crate) blobs: SlotMap<BlobHandle, Vec<u8>>,
    /// 驻留内存的音色库
    pub(crate) font_bodies: SlotMap<FontHandle, SoundFont>,

    /// 已经记录过 "忽略替换" 的锁定 id
    pub(crate) locked_logged: HashSet<CacheKey>,

    pub(crate) allocator: Box<dyn AllocationPolicy>,
    pub(crate) hooks: Box<dyn EngineHooks>,
}
// new & init
impl AudioRegistry {
    pub fn new(config: RegistryConfig, baseline: RegistryBaseline) -> Self {
        let queue_capacity = config.queue_initial_capacity;

        let font_baseline = baseline
            .sound_fonts
            .into_iter()
            .map(|entry| {
                let meta = SoundFontMeta::from_short_data(entry.short_data);
                (entry, meta)
            })
            .collect();
        let bank_baseline = baseline.sample_banks.into_iter().map(|entry| (entry, ())).collect();

        Self {
            lifecycle: Lifecycle::new(),
            sequences: KindState::new(
                ResourceKind::Sequence,
                config.initial_capacity(ResourceKind::Sequence),
                baseline.sequences,
                queue_capacity,
            ),
            fonts: KindState::new(
                ResourceKind::SoundFont,
                config.initial_capacity(ResourceKind::SoundFont),
                font_baseline,
                queue_capacity,
            ),
            sample_banks: KindState::new(
                ResourceKind::SampleBank,
                config.initial_capacity(ResourceKind::SampleBank),
                bank_baseline,
                queue_capacity,
            ),
            cache: TieredCache::new(config.persistent_cache_depth),
            payloads: PayloadStore::new(config.verify_payload_bytes),
            blobs: SlotMap::with_key(),
            font_bodies: SlotMap::with_key(),
            locked_logged: HashSet::new(),
            allocator: Box::new(SystemAllocator),
            hooks: Box::new(NullHooks),
            config,
        }
    }

    pub fn with_allocator(mut self, allocator: Box<dyn AllocationPolicy>) -> Self {
        self.allocator = allocator;
        self
    }

    pub fn with_hooks(mut self, hooks: Box<dyn EngineHooks>) -> Self {
        self.hooks = hooks;
        self
    }
}
// getters
impl AudioRegistry {
    #[inline]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    #[inline]
    pub fn phase(&self) -> InitPhase {
        self.lifecycle.phase()
    }

    #[inline]
    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    #[inline]
    pub fn payloads(&self) -> &PayloadStore {
        &self.payloads
    }

    pub fn count(&self, kind: ResourceKind) -> usize {
        match kind {
            ResourceKind::Sequence => self.sequences.table.count(),
            ResourceKind::SoundFont => self.fonts.table.count(),
            ResourceKind::SampleBank => self.sample_banks.table.count(),
        }
    }

    pub fn capacity(&self, kind: ResourceKind) -> usize {
        match kind {
            ResourceKind::Sequence => self.sequences.table.capacity(),
            ResourceKind::SoundFont => self.fonts.table.capacity(),
            ResourceKind::SampleBank => self.sample_banks.table.capacity(),
        }
    }

    pub fn entry(&self, kind: ResourceKind, id: u32) -> RegistryResult<&ResourceEntry> {
        match kind {
            ResourceKind::Sequence => self.sequences.table.get(id),
            ResourceKind::SoundFont => self.fonts.table.get(id),
            ResourceKind::SampleBank => self.sample_banks.table.get(id),
        }
    }

    pub(crate) fn entry_mut(&mut self, kind: ResourceKind, id: u32) -> RegistryResult<&mut ResourceEntry> {
        match kind {
            ResourceKind::Sequence => self.sequences.table.get_mut(id),
            ResourceKind::SoundFont => self.fonts.table.get_mut(id),
            ResourceKind::SampleBank => self.sample_banks.table.get_mut(id),
        }
    }

    pub fn cache_policy(&self, kind: ResourceKind, id: u32) -> RegistryResult<CachePolicy> {
        Ok(self.entry(kind, id)?.cache_policy)
    }

    /// 待应用的 load queue 命令数量
    pub fn pending_load_commands(&self, kind: ResourceKind) -> usize {
        match kind {
            ResourceKind::Sequence => self.sequences.load_queue.len(),
            ResourceKind::SoundFont => self.fonts.load_queue.len(),
            ResourceKind::SampleBank => self.sample_banks.load_queue.len(),
        }
    }

    /// 驻留内存的字节块
    pub fn blob(&self, handle: BlobHandle) -> Option<&[u8]> {
        self.blobs.get(handle).map(Vec::as_slice)
    }

    pub fn font_body(&self, handle: FontHandle) -> Option<&SoundFont> {
        self.font_bodies.get(handle)
    }

    /// 某个 id 当前驻留内存的字节，尚未驻留时为 None
    pub fn resident_bytes(&self, kind: ResourceKind, id: u32) -> Option<&[u8]> {
        match self.entry(kind, id).ok()?.location {
            DataLocation::Blob(handle) => self.blob(handle),
            _ => None,
        }
    }

    /// 被配置锁定的 id 上的替换调用被忽略，每个 id 只记录一次日志
    pub(crate) fn is_locked(&mut self, kind: ResourceKind, id: u32) -> bool {
        if !self.config.kind(kind).locked_ids.contains(&id) {
            return false;
        }
        if self.locked_logged.insert(CacheKey::new(kind, id)) {
            log::warn!("ignoring replacement of locked {} {}", kind, id);
        }
        true
    }
}
// lifecycle
impl AudioRegistry {
    /// 打开注册窗口，创建 init queue
    pub fn begin_queueing(&mut self) -> RegistryResult<()> {
        self.lifecycle.advance_to(InitPhase::Queueing)?;
        let capacity = self.config.queue_initial_capacity;
        self.sequences.init_queue = Some(CommandQueue::new(capacity));
        self.fonts.init_queue = Some(CommandQueue::new(capacity));
        self.sample_banks.init_queue = Some(CommandQueue::new(capacity));
        Ok(())
    }

    /// 关闭注册窗口；此后到 [`AudioRegistry::ready`] 之前，Replace 类调用返回 NotReady
    pub fn close_queueing(&mut self) -> RegistryResult<()> {
        self.lifecycle.advance_to(InitPhase::Queued)
    }

    /// drain 全部 init queue 并进入 Ready
    ///
    /// 顺序为 sample bank、sound font、sequence。每条命令重新调用对应的公开变更入口，
    /// drain 期间阶段为 Queued，变更直接生效。drain 完成后 init queue 被销毁。
    pub fn ready(&mut self) -> RegistryResult<DrainReport> {
        match self.lifecycle.phase() {
            InitPhase::Queueing => self.lifecycle.advance_to(InitPhase::Queued)?,
            InitPhase::Queued => {}
            from => {
                return Err(RegistryError::InvalidTransition {
                    from,
                    to: InitPhase::Ready,
                });
            }
        }

        self.lifecycle.begin_drain()?;

        let mut report = DrainReport::default();

        if let Some(mut queue) = self.sample_banks.init_queue.take() {
            report.sample_banks = queue.drain(|cmd| self.apply_sample_bank_init_command(cmd));
        }
        if let Some(mut queue) = self.fonts.init_queue.take() {
            report.sound_fonts = queue.drain(|cmd| self.apply_sound_font_init_command(cmd));
        }
        if let Some(mut queue) = self.sequences.init_queue.take() {
            report.sequences = queue.drain(|cmd| self.apply_sequence_init_command(cmd));
        }

        log::info!(
            "drained {} sample bank, {} sound font, {} sequence commands",
            report.sample_banks,
            report.sound_fonts,
            report.sequences
        );
        self.lifecycle.advance_to(InitPhase::Ready)?;
        Ok(report)
    }
}
// materialization
impl AudioRegistry {
    /// 加载器通知某个资源的数据已经驻留内存
    ///
    /// 首次加载时保存数据、按队列顺序应用该 id 的 load queue 命令、把记录指向内存；
    /// 之后按缓存策略登记缓存层级并设置加载状态，最后通知引擎。
    /// 已经加载过且仍然驻留的资源跳过一次性初始化。
    pub fn on_materialized(&mut self, kind: ResourceKind, id: u32, data: MaterializedData) -> RegistryResult<()> {
        self.lifecycle.check_mutable()?;
        let entry = self.entry(kind, id)?.clone();
        let key = CacheKey::new(kind, id);

        if self.cache.is_loaded(key) && entry.location.is_resident() {
            log::debug!("{} {} already materialized, skipping setup", kind, id);
        } else {
            match (kind, data) {
                (ResourceKind::SoundFont, MaterializedData::Font(image)) => self.materialize_font(id, &image)?,
                (ResourceKind::Sequence | ResourceKind::SampleBank, MaterializedData::Bytes(bytes)) => {
                    self.materialize_blob(kind, id, bytes)?
                }
                (_, MaterializedData::Resident) => self.materialize_resident(kind, id, &entry)?,
                _ => return Err(RegistryError::InvalidArgument("materialized data does not match resource kind")),
            }
        }

        let policy = self.entry(kind, id)?.cache_policy;
        if self.cache.register(key, policy) == PersistentPush::Full {
            log::debug!("{} {} loaded without persistent tracking", kind, id);
        }
        let status = match policy {
            CachePolicy::LoadPermanent => LoadStatus::Permanent,
            _ => LoadStatus::Complete,
        };
        self.set_load_status(kind, id, status)?;

        log::info!("{} {} materialized", kind, id);
        self.hooks.resource_loaded(kind, id);
        Ok(())
    }

    fn materialize_font(&mut self, id: u32, image: &SoundFontImage) -> RegistryResult<()> {
        let mut body = copy_sound_font(&mut self.payloads, image, self.allocator.as_ref())?;
        for command in self.fonts.load_queue.take_matching(id) {
            if let Err(err) = apply_font_command(&mut body, &mut self.payloads, command) {
                log::warn!("dropping queued command for sound font {}: {}", id, err);
            }
        }

        let meta = SoundFontMeta::from_font(&body);
        let handle = self.font_bodies.insert(body);
        let entry = self.fonts.table.get_mut(id)?;
        entry.location = DataLocation::Font(handle);
        entry.short_data = meta.to_short_data();
        *self.fonts.table.aux_mut(id)? = meta;
        Ok(())
    }

    fn materialize_blob(&mut self, kind: ResourceKind, id: u32, mut bytes: Vec<u8>) -> RegistryResult<()> {
        for patch in self.take_patches(kind, id) {
            if let Err(err) = apply_patch(&mut bytes, patch.offset as usize, &patch.bytes) {
                log::warn!("dropping queued patch for {} {}: {}", kind, id, err);
            }
        }
        let handle = self.blobs.insert(bytes);
        self.entry_mut(kind, id)?.location = DataLocation::Blob(handle);
        Ok(())
    }

    /// 取出某个 blob 资源在 load queue 中等待的全部 patch
    fn take_patches(&mut self, kind: ResourceKind, id: u32) -> Vec<BlobPatch> {
        match kind {
            ResourceKind::Sequence => self.sequences.load_queue.take_matching(id),
            ResourceKind::SampleBank => self.sample_banks.load_queue.take_matching(id),
            ResourceKind::SoundFont => Vec::new(),
        }
    }

    /// 记录本来就指向内存，只需要补上还在 load queue 里的命令
    fn materialize_resident(&mut self, kind: ResourceKind, id: u32, entry: &ResourceEntry) -> RegistryResult<()> {
        match (kind, entry.location) {
            (ResourceKind::SoundFont, DataLocation::Font(handle)) => {
                let commands = self.fonts.load_queue.take_matching(id);
                let body = self.font_bodies.get_mut(handle).ok_or(RegistryError::InvalidHandle)?;
                for command in commands {
                    if let Err(err) = apply_font_command(body, &mut self.payloads, command) {
                        log::warn!("dropping queued command for sound font {}: {}", id, err);
                    }
                }
                let meta = SoundFontMeta::from_font(body);
                self.fonts.table.get_mut(id)?.short_data = meta.to_short_data();
                *self.fonts.table.aux_mut(id)? = meta;
                Ok(())
            }
            (ResourceKind::Sequence | ResourceKind::SampleBank, DataLocation::Blob(handle)) => {
                let patches = self.take_patches(kind, id);
                let blob = self.blobs.get_mut(handle).ok_or(RegistryError::InvalidHandle)?;
                for patch in patches {
                    if let Err(err) = apply_patch(blob, patch.offset as usize, &patch.bytes) {
                        log::warn!("dropping queued patch for {} {}: {}", kind, id, err);
                    }
                }
                Ok(())
            }
            _ => Err(RegistryError::NotResident { kind, id }),
        }
    }
}
// load status & cache
impl AudioRegistry {
    /// 保留 id 总是视为 Permanent
    pub fn load_status(&self, kind: ResourceKind, id: u32) -> RegistryResult<LoadStatus> {
        if is_reserved_id(id) {
            return Ok(LoadStatus::Permanent);
        }
        match kind {
            ResourceKind::Sequence => self.sequences.table.status(id),
            ResourceKind::SoundFont => self.fonts.table.status(id),
            ResourceKind::SampleBank => self.sample_banks.table.status(id),
        }
    }

    /// 保留 id 上的写入被忽略
    pub fn set_load_status(&mut self, kind: ResourceKind, id: u32, status: LoadStatus) -> RegistryResult<()> {
        if is_reserved_id(id) {
            return Ok(());
        }
        match kind {
            ResourceKind::Sequence => self.sequences.table.set_status(id, status),
            ResourceKind::SoundFont => self.fonts.table.set_status(id, status),
            ResourceKind::SampleBank => self.sample_banks.table.set_status(id, status),
        }
    }

    pub fn is_load_complete(&self, kind: ResourceKind, id: u32) -> bool {
        self.load_status(kind, id).is_ok_and(|status| status >= LoadStatus::Complete)
    }

    /// 资源加载过、满足所要求的层级、且记录指向内存时返回其位置
    pub fn search_cache(&self, kind: ResourceKind, search: CacheSearch, id: u32) -> Option<DataLocation> {
        let entry = self.entry(kind, id).ok()?;
        if !self.cache.admits(CacheKey::new(kind, id), search) {
            return None;
        }
        if !entry.location.is_resident() {
            return None;
        }
        Some(entry.location)
    }

    /// 弹出最近压入的 `kind` 条目：音色库通知引擎丢弃工作内存，状态回到 NotLoaded
    pub fn pop_persistent_cache(&mut self, kind: ResourceKind) -> Option<u32> {
        let key = self.cache.pop_persistent(kind)?;
        if kind == ResourceKind::SoundFont {
            self.hooks.discard_font(key.index);
        }
        if let Err(err) = self.set_load_status(kind, key.index, LoadStatus::NotLoaded) {
            log::warn!("failed to reset load status of {} {}: {}", kind, key.index, err);
        }
        Some(key.index)
    }

    /// 引擎的整体重置：清空 persistent 栈，除 Permanent 之外的状态都回到 NotLoaded
    pub fn reset_load_status(&mut self) {
        self.cache.reset();

        fn reset(statuses: &mut [LoadStatus]) {
            for status in statuses.iter_mut().filter(|s| **s != LoadStatus::Permanent) {
                *status = LoadStatus::NotLoaded;
            }
        }
        reset(self.sequences.table.statuses_mut());
        reset(self.fonts.table.statuses_mut());
        reset(self.sample_banks.table.statuses_mut());
        log::info!("load status reset");
    }
}
