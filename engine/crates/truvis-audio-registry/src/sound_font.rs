//! 音色库结构
//!
//! 驻留内存的音色库由乐器（最多 126 个）、鼓（最多 256 个）、音效（最多 2048 个）组成，
//! 它们通过 [`PayloadHandle`] 引用采样。调用者传入的 `*Desc` 拥有自己的 [`Sample`]，
//! 进入注册表时被深拷贝：采样进入去重存储，包络截取到第一个终止点（含）。

use crate::alloc::AllocationPolicy;
use crate::error::{RegistryError, RegistryResult};
use crate::handles::PayloadHandle;
use crate::payload::{PayloadStore, Sample};
use serde::{Deserialize, Serialize};

pub const MAX_INSTRUMENTS: usize = 126;
pub const MAX_DRUMS: usize = 256;
pub const MAX_SOUND_EFFECTS: usize = 2048;

pub const DEFAULT_SAMPLE_BANK_1: u8 = 1;
/// 0xFF 表示没有第二个 sample bank
pub const DEFAULT_SAMPLE_BANK_2: u8 = 255;

pub const ADSR_DISABLE: i16 = 0;
pub const ADSR_HANG: i16 = -1;
pub const ADSR_GOTO: i16 = -2;
pub const ADSR_RESTART: i16 = -3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopePoint {
    pub delay: i16,
    pub arg: i16,
}
impl EnvelopePoint {
    #[inline]
    pub fn is_terminator(&self) -> bool {
        self.delay == ADSR_DISABLE || self.delay == ADSR_HANG
    }
}

/// 拷贝到第一个 DISABLE / HANG 为止（包含它）；空包络表示没有包络
pub fn copy_envelope(points: &[EnvelopePoint]) -> RegistryResult<Vec<EnvelopePoint>> {
    if points.is_empty() {
        return Ok(Vec::new());
    }
    let end = points
        .iter()
        .position(EnvelopePoint::is_terminator)
        .ok_or(RegistryError::MalformedPayload("envelope has no terminator"))?;
    Ok(points[..=end].to_vec())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TunedSample {
    pub sample: PayloadHandle,
    pub tuning: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instrument {
    pub normal_range_lo: u8,
    pub normal_range_hi: u8,
    pub release_index: u8,
    pub envelope: Vec<EnvelopePoint>,
    pub low_pitch: Option<TunedSample>,
    pub normal_pitch: Option<TunedSample>,
    pub high_pitch: Option<TunedSample>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Drum {
    pub release_index: u8,
    pub pan: u8,
    pub envelope: Vec<EnvelopePoint>,
    pub tuned_sample: Option<TunedSample>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SoundEffect {
    pub tuned_sample: Option<TunedSample>,
}

// 调用者侧的描述，拥有采样本身

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunedSampleDesc {
    pub sample: Sample,
    pub tuning: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentDesc {
    #[serde(default)]
    pub normal_range_lo: u8,
    #[serde(default = "default_range_hi")]
    pub normal_range_hi: u8,
    #[serde(default)]
    pub release_index: u8,
    #[serde(default)]
    pub envelope: Vec<EnvelopePoint>,
    #[serde(default)]
    pub low_pitch: Option<TunedSampleDesc>,
    #[serde(default)]
    pub normal_pitch: Option<TunedSampleDesc>,
    #[serde(default)]
    pub high_pitch: Option<TunedSampleDesc>,
}

fn default_range_hi() -> u8 {
    0x7F
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrumDesc {
    #[serde(default)]
    pub release_index: u8,
    #[serde(default)]
    pub pan: u8,
    #[serde(default)]
    pub envelope: Vec<EnvelopePoint>,
    #[serde(default)]
    pub tuned_sample: Option<TunedSampleDesc>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SoundEffectDesc {
    #[serde(default)]
    pub tuned_sample: Option<TunedSampleDesc>,
}

/// 加载器交付的完整音色库，空位用 `None` 表示
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoundFontImage {
    pub sample_bank_1: u8,
    pub sample_bank_2: u8,
    #[serde(default)]
    pub instruments: Vec<Option<InstrumentDesc>>,
    #[serde(default)]
    pub drums: Vec<Option<DrumDesc>>,
    #[serde(default)]
    pub sound_effects: Vec<SoundEffectDesc>,
}

/// 驻留内存的音色库
#[derive(Debug, Clone, PartialEq)]
pub struct SoundFont {
    pub sample_bank_1: u8,
    pub sample_bank_2: u8,
    pub instruments: Vec<Option<Instrument>>,
    pub drums: Vec<Option<Drum>>,
    pub sound_effects: Vec<SoundEffect>,
}
impl Default for SoundFont {
    fn default() -> Self {
        Self {
            sample_bank_1: DEFAULT_SAMPLE_BANK_1,
            sample_bank_2: DEFAULT_SAMPLE_BANK_2,
            instruments: Vec::new(),
            drums: Vec::new(),
            sound_effects: Vec::new(),
        }
    }
}
// add
impl SoundFont {
    pub fn add_instrument(&mut self, instrument: Instrument) -> Result<u32, (Instrument, RegistryError)> {
        if self.instruments.len() >= MAX_INSTRUMENTS {
            let err = RegistryError::LimitReached {
                what: "instrument",
                limit: MAX_INSTRUMENTS,
            };
            return Err((instrument, err));
        }
        self.instruments.push(Some(instrument));
        Ok(self.instruments.len() as u32 - 1)
    }

    pub fn add_drum(&mut self, drum: Drum) -> Result<u32, (Drum, RegistryError)> {
        if self.drums.len() >= MAX_DRUMS {
            let err = RegistryError::LimitReached {
                what: "drum",
                limit: MAX_DRUMS,
            };
            return Err((drum, err));
        }
        self.drums.push(Some(drum));
        Ok(self.drums.len() as u32 - 1)
    }

    pub fn add_sound_effect(&mut self, sfx: SoundEffect) -> Result<u32, (SoundEffect, RegistryError)> {
        if self.sound_effects.len() >= MAX_SOUND_EFFECTS {
            let err = RegistryError::LimitReached {
                what: "sound effect",
                limit: MAX_SOUND_EFFECTS,
            };
            return Err((sfx, err));
        }
        self.sound_effects.push(sfx);
        Ok(self.sound_effects.len() as u32 - 1)
    }
}
// replace
//
// 返回值里的旧项（或越界时被拒绝的新项）由调用者释放
impl SoundFont {
    pub fn replace_instrument(&mut self, index: u32, instrument: Instrument) -> Result<Option<Instrument>, Instrument> {
        match self.instruments.get_mut(index as usize) {
            Some(slot) => Ok(slot.replace(instrument)),
            None => Err(instrument),
        }
    }

    pub fn replace_drum(&mut self, index: u32, drum: Drum) -> Result<Option<Drum>, Drum> {
        match self.drums.get_mut(index as usize) {
            Some(slot) => Ok(slot.replace(drum)),
            None => Err(drum),
        }
    }

    pub fn replace_sound_effect(&mut self, index: u32, sfx: SoundEffect) -> Result<SoundEffect, SoundEffect> {
        match self.sound_effects.get_mut(index as usize) {
            Some(slot) => Ok(std::mem::replace(slot, sfx)),
            None => Err(sfx),
        }
    }

    pub fn set_sample_bank(&mut self, bank_num: u32, bank: u8) -> bool {
        match bank_num {
            1 => self.sample_bank_1 = bank,
            2 => self.sample_bank_2 = bank,
            _ => return false,
        }
        true
    }
}

/// 音色库表的附加列，镜像驻留结构里的计数；音色库还在来源介质中时来自记录的 short data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SoundFontMeta {
    pub sample_bank_1: u8,
    pub sample_bank_2: u8,
    pub num_instruments: u16,
    pub num_drums: u16,
    pub num_sfx: u16,
}
impl SoundFontMeta {
    pub fn from_short_data(short_data: [u16; 3]) -> Self {
        Self {
            sample_bank_1: (short_data[0] >> 8) as u8,
            sample_bank_2: (short_data[0] & 0xFF) as u8,
            num_instruments: short_data[1] >> 8,
            num_drums: short_data[1] & 0xFF,
            num_sfx: short_data[2],
        }
    }

    pub fn from_font(font: &SoundFont) -> Self {
        Self {
            sample_bank_1: font.sample_bank_1,
            sample_bank_2: font.sample_bank_2,
            num_instruments: font.instruments.len() as u16,
            num_drums: font.drums.len() as u16,
            num_sfx: font.sound_effects.len() as u16,
        }
    }

    /// 乐器和鼓各占 8 位，超过 255 时饱和为 255；准确数量以 meta 为准
    pub fn to_short_data(&self) -> [u16; 3] {
        [
            ((self.sample_bank_1 as u16) << 8) | self.sample_bank_2 as u16,
            (self.num_instruments.min(0xFF) << 8) | self.num_drums.min(0xFF),
            self.num_sfx,
        ]
    }
}

// ======== 深拷贝与释放 ========

/// 已经拷贝成功的采样，出错时全部释放
struct CopyGuard<'a> {
    payloads: &'a mut PayloadStore,
    acquired: Vec<PayloadHandle>,
}
impl<'a> CopyGuard<'a> {
    fn new(payloads: &'a mut PayloadStore) -> Self {
        Self {
            payloads,
            acquired: Vec::new(),
        }
    }

    fn tuned(&mut self, desc: &Option<TunedSampleDesc>, policy: &dyn AllocationPolicy) -> RegistryResult<Option<TunedSample>> {
        let Some(desc) = desc else {
            return Ok(None);
        };
        let sample = self.payloads.insert_copy(&desc.sample, policy)?;
        self.acquired.push(sample);
        Ok(Some(TunedSample {
            sample,
            tuning: desc.tuning,
        }))
    }

    fn commit(mut self) {
        self.acquired.clear();
    }
}
impl Drop for CopyGuard<'_> {
    fn drop(&mut self) {
        for handle in self.acquired.drain(..) {
            let _ = self.payloads.release(handle);
        }
    }
}

pub fn copy_instrument(
    payloads: &mut PayloadStore,
    desc: &InstrumentDesc,
    policy: &dyn AllocationPolicy,
) -> RegistryResult<Instrument> {
    let envelope = copy_envelope(&desc.envelope)?;
    let mut guard = CopyGuard::new(payloads);
    let instrument = Instrument {
        normal_range_lo: desc.normal_range_lo,
        normal_range_hi: desc.normal_range_hi,
        release_index: desc.release_index,
        envelope,
        low_pitch: guard.tuned(&desc.low_pitch, policy)?,
        normal_pitch: guard.tuned(&desc.normal_pitch, policy)?,
        high_pitch: guard.tuned(&desc.high_pitch, policy)?,
    };
    guard.commit();
    Ok(instrument)
}

pub fn copy_drum(payloads: &mut PayloadStore, desc: &DrumDesc, policy: &dyn AllocationPolicy) -> RegistryResult<Drum> {
    let envelope = copy_envelope(&desc.envelope)?;
    let mut guard = CopyGuard::new(payloads);
    let drum = Drum {
        release_index: desc.release_index,
        pan: desc.pan,
        envelope,
        tuned_sample: guard.tuned(&desc.tuned_sample, policy)?,
    };
    guard.commit();
    Ok(drum)
}

pub fn copy_sound_effect(
    payloads: &mut PayloadStore,
    desc: &SoundEffectDesc,
    policy: &dyn AllocationPolicy,
) -> RegistryResult<SoundEffect> {
    let mut guard = CopyGuard::new(payloads);
    let sfx = SoundEffect {
        tuned_sample: guard.tuned(&desc.tuned_sample, policy)?,
    };
    guard.commit();
    Ok(sfx)
}

/// 把加载器交付的整个音色库拷贝进来；任何一项失败都会释放已经拷贝的部分
pub fn copy_sound_font(
    payloads: &mut PayloadStore,
    image: &SoundFontImage,
    policy: &dyn AllocationPolicy,
) -> RegistryResult<SoundFont> {
    if image.instruments.len() > MAX_INSTRUMENTS {
        return Err(RegistryError::LimitReached {
            what: "instrument",
            limit: MAX_INSTRUMENTS,
        });
    }
    if image.drums.len() > MAX_DRUMS {
        return Err(RegistryError::LimitReached {
            what: "drum",
            limit: MAX_DRUMS,
        });
    }
    if image.sound_effects.len() > MAX_SOUND_EFFECTS {
        return Err(RegistryError::LimitReached {
            what: "sound effect",
            limit: MAX_SOUND_EFFECTS,
        });
    }

    let mut font = SoundFont {
        sample_bank_1: image.sample_bank_1,
        sample_bank_2: image.sample_bank_2,
        ..Default::default()
    };
    let result = fill_sound_font(&mut font, payloads, image, policy);
    if let Err(err) = result {
        release_sound_font(payloads, font);
        return Err(err);
    }
    Ok(font)
}

fn fill_sound_font(
    font: &mut SoundFont,
    payloads: &mut PayloadStore,
    image: &SoundFontImage,
    policy: &dyn AllocationPolicy,
) -> RegistryResult<()> {
    for desc in &image.instruments {
        let instrument = desc.as_ref().map(|d| copy_instrument(payloads, d, policy)).transpose()?;
        font.instruments.push(instrument);
    }
    for desc in &image.drums {
        let drum = desc.as_ref().map(|d| copy_drum(payloads, d, policy)).transpose()?;
        font.drums.push(drum);
    }
    for desc in &image.sound_effects {
        font.sound_effects.push(copy_sound_effect(payloads, desc, policy)?);
    }
    Ok(())
}

fn release_tuned(payloads: &mut PayloadStore, tuned: Option<TunedSample>) {
    if let Some(tuned) = tuned {
        if payloads.release(tuned.sample).is_err() {
            log::warn!("released a sample that was already gone");
        }
    }
}

pub fn release_instrument(payloads: &mut PayloadStore, instrument: Instrument) {
    release_tuned(payloads, instrument.low_pitch);
    release_tuned(payloads, instrument.normal_pitch);
    release_tuned(payloads, instrument.high_pitch);
}

pub fn release_drum(payloads: &mut PayloadStore, drum: Drum) {
    release_tuned(payloads, drum.tuned_sample);
}

pub fn release_sound_effect(payloads: &mut PayloadStore, sfx: SoundEffect) {
    release_tuned(payloads, sfx.tuned_sample);
}

pub fn release_sound_font(payloads: &mut PayloadStore, font: SoundFont) {
    for instrument in font.instruments.into_iter().flatten() {
        release_instrument(payloads, instrument);
    }
    for drum in font.drums.into_iter().flatten() {
        release_drum(payloads, drum);
    }
    for sfx in font.sound_effects {
        release_sound_effect(payloads, sfx);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::alloc::{CountdownAllocator, SystemAllocator};
    use crate::payload::tests::adpcm_sample;
    use pretty_assertions::assert_eq;

    fn point(delay: i16, arg: i16) -> EnvelopePoint {
        EnvelopePoint { delay, arg }
    }

    fn tuned(seed: i16) -> Option<TunedSampleDesc> {
        Some(TunedSampleDesc {
            sample: adpcm_sample(seed),
            tuning: 1.0,
        })
    }

    pub(crate) fn instrument_desc(seed: i16) -> InstrumentDesc {
        InstrumentDesc {
            normal_range_lo: 0,
            normal_range_hi: 0x7F,
            release_index: 10,
            envelope: vec![point(4, 32000), point(ADSR_HANG, 0)],
            low_pitch: None,
            normal_pitch: tuned(seed),
            high_pitch: None,
        }
    }

    #[test]
    fn test_envelope_copied_through_terminator() {
        let points = [point(2, 100), point(ADSR_DISABLE, 0), point(9, 9)];
        assert_eq!(copy_envelope(&points).unwrap(), vec![point(2, 100), point(ADSR_DISABLE, 0)]);

        assert!(copy_envelope(&[]).unwrap().is_empty());
        assert!(matches!(
            copy_envelope(&[point(2, 100), point(ADSR_GOTO, 0)]),
            Err(RegistryError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_shared_sample_released_with_instruments() {
        let mut payloads = PayloadStore::new(true);
        let a = copy_instrument(&mut payloads, &instrument_desc(7), &SystemAllocator).unwrap();
        let b = copy_instrument(&mut payloads, &instrument_desc(7), &SystemAllocator).unwrap();

        let handle = a.normal_pitch.unwrap().sample;
        assert_eq!(b.normal_pitch.unwrap().sample, handle);
        assert_eq!(payloads.ref_count(handle), 2);

        release_instrument(&mut payloads, a);
        assert_eq!(payloads.ref_count(handle), 1);
        release_instrument(&mut payloads, b);
        assert!(payloads.is_empty());
    }

    #[test]
    fn test_failed_instrument_copy_releases_partial_samples() {
        let mut payloads = PayloadStore::new(true);
        let mut desc = instrument_desc(1);
        desc.low_pitch = tuned(2);
        desc.high_pitch = tuned(3);

        // low 和 normal 成功，high 失败
        let result = copy_instrument(&mut payloads, &desc, &CountdownAllocator::new(2));
        assert_eq!(result, Err(RegistryError::PayloadAllocationFailed));
        assert!(payloads.is_empty());
    }

    #[test]
    fn test_copy_sound_font_all_or_nothing() {
        let mut payloads = PayloadStore::new(true);
        let image = SoundFontImage {
            sample_bank_1: 1,
            sample_bank_2: 255,
            instruments: vec![Some(instrument_desc(1)), None, Some(instrument_desc(2))],
            drums: vec![],
            sound_effects: vec![SoundEffectDesc { tuned_sample: tuned(3) }],
        };

        let font = copy_sound_font(&mut payloads, &image, &SystemAllocator).unwrap();
        assert_eq!(font.instruments.len(), 3);
        assert!(font.instruments[1].is_none());
        assert_eq!(payloads.len(), 3);
        release_sound_font(&mut payloads, font);
        assert!(payloads.is_empty());

        let result = copy_sound_font(&mut payloads, &image, &CountdownAllocator::new(2));
        assert!(result.is_err());
        assert!(payloads.is_empty());
    }

    #[test]
    fn test_replace_out_of_range_returns_item() {
        let mut payloads = PayloadStore::new(true);
        let mut font = SoundFont::default();
        let inst = copy_instrument(&mut payloads, &instrument_desc(1), &SystemAllocator).unwrap();

        let rejected = font.replace_instrument(0, inst).unwrap_err();
        release_instrument(&mut payloads, rejected);
        assert!(payloads.is_empty());
    }

    #[test]
    fn test_limits() {
        let mut font = SoundFont::default();
        for _ in 0..MAX_SOUND_EFFECTS {
            font.add_sound_effect(SoundEffect::default()).unwrap();
        }
        let (_, err) = font.add_sound_effect(SoundEffect::default()).unwrap_err();
        assert_eq!(
            err,
            RegistryError::LimitReached {
                what: "sound effect",
                limit: MAX_SOUND_EFFECTS
            }
        );
    }

    #[test]
    fn test_meta_short_data() {
        let meta = SoundFontMeta {
            sample_bank_1: 1,
            sample_bank_2: 255,
            num_instruments: 16,
            num_drums: 64,
            num_sfx: 300,
        };
        let packed = meta.to_short_data();
        assert_eq!(packed, [0x01FF, 0x1040, 300]);
        assert_eq!(SoundFontMeta::from_short_data(packed), meta);
    }

    #[test]
    fn test_meta_short_data_saturates() {
        let meta = SoundFontMeta {
            num_instruments: 300,
            num_drums: 256,
            ..Default::default()
        };
        assert_eq!(meta.to_short_data()[1], 0xFFFF);
    }
}
