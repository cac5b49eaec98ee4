//! sample bank 的注册接口

use crate::command_queue::{PushOutcome, QueuedCommand};
use crate::error::{Applied, RegistryError, RegistryResult};
use crate::handles::{DataLocation, ResourceEntry, ResourceKind};
use crate::lifecycle::MutationRoute;
use crate::registry::{AudioRegistry, BlobPatch, apply_patch, push_init};

#[derive(Debug, Clone, PartialEq)]
pub enum SampleBankCommand {
    ReplaceSampleBank { id: u32, entry: Box<ResourceEntry> },
}
impl QueuedCommand for SampleBankCommand {
    fn op(&self) -> u32 {
        match self {
            SampleBankCommand::ReplaceSampleBank { .. } => 0,
        }
    }

    fn arg_a(&self) -> u32 {
        match self {
            SampleBankCommand::ReplaceSampleBank { id, .. } => *id,
        }
    }

    fn arg_b(&self) -> u32 {
        0
    }
}

impl AudioRegistry {
    pub fn add_sample_bank(&mut self, entry: ResourceEntry) -> RegistryResult<u32> {
        self.lifecycle.check_mutable()?;
        self.sample_banks.table.append(entry, (), self.allocator.as_ref())
    }

    pub fn sample_bank(&self, id: u32) -> RegistryResult<&ResourceEntry> {
        self.sample_banks.table.get(id)
    }

    pub fn replace_sample_bank(&mut self, id: u32, entry: ResourceEntry) -> RegistryResult<Applied> {
        self.lifecycle.check_mutable()?;
        if self.is_locked(ResourceKind::SampleBank, id) {
            return Ok(Applied::Ignored);
        }
        match self.lifecycle.route() {
            MutationRoute::Reject => Err(RegistryError::NotReady),
            MutationRoute::Defer => {
                let command = SampleBankCommand::ReplaceSampleBank {
                    id,
                    entry: Box::new(entry),
                };
                log::debug!("deferring sample bank command {:?}", command.key());
                match push_init(self.sample_banks.init_queue.as_mut(), command, self.allocator.as_ref()) {
                    Ok(PushOutcome::Queued) => Ok(Applied::Deferred),
                    Ok(PushOutcome::Duplicate(_)) => Ok(Applied::Discarded),
                    Err(err) => Err(err.source),
                }
            }
            MutationRoute::Apply => {
                self.sample_banks.table.replace(id, entry)?;
                Ok(Applied::Immediate)
            }
        }
    }

    pub fn restore_sample_bank(&mut self, id: u32) -> RegistryResult<()> {
        self.lifecycle.check_ready()?;
        let (entry, _) = self.sample_banks.baseline(id)?.clone();
        self.sample_banks.table.replace(id, entry)
    }

    /// 修改 sample bank 字节：已驻留时立即写入，否则等加载完成时应用
    pub fn patch_sample_bank_data(&mut self, id: u32, offset: u32, bytes: &[u8]) -> RegistryResult<Applied> {
        self.lifecycle.check_mutable()?;
        match self.sample_banks.table.get(id)?.location {
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
                self.sample_banks
                    .load_queue
                    .push(patch, self.allocator.as_ref())
                    .map_err(|err| err.source)?;
                Ok(Applied::Deferred)
            }
        }
    }

    pub(crate) fn apply_sample_bank_init_command(&mut self, command: SampleBankCommand) {
        let id = command.arg_a();
        let result = match command {
            SampleBankCommand::ReplaceSampleBank { id, entry } => self.replace_sample_bank(id, *entry),
        };
        if let Err(err) = result {
            log::warn!("queued command for sample bank {} failed: {}", id, err);
        }
    }
}
