use pretty_assertions::assert_eq;
use std::cell::RefCell;
use std::rc::Rc;
use truvis_audio_registry::alloc::CountdownAllocator;
use truvis_audio_registry::{
    Applied, AudioRegistry, CachePolicy, InitPhase, MaterializedData, Medium, RecordingHooks, RegistryBaseline,
    RegistryConfig, RegistryError, ResourceEntry, ResourceKind, SequenceAux,
};

fn seq(addr: u32) -> ResourceEntry {
    ResourceEntry::from_origin(addr, 0x80, Medium::Cart, CachePolicy::LoadPersistent)
}

fn baseline(sequences: u32) -> RegistryBaseline {
    RegistryBaseline {
        sequences: (0..sequences).map(|i| (seq(i * 0x100), SequenceAux::default())).collect(),
        sound_fonts: vec![],
        sample_banks: vec![ResourceEntry::from_origin(0, 0x1000, Medium::Cart, CachePolicy::None)],
    }
}

#[test]
fn test_replace_follows_phase() {
    truvis_crate_tools::init_log::try_init_log_for_test();
    let mut registry = AudioRegistry::new(RegistryConfig::default(), baseline(8));
    let prior = registry.sequence(5).unwrap().clone();

    // NotReady：拒绝，不修改
    assert_eq!(registry.replace_sequence(5, seq(0x1111)), Err(RegistryError::NotReady));
    assert_eq!(registry.sequence(5).unwrap(), &prior);

    // Queueing：延迟，读取仍然是旧值
    registry.begin_queueing().unwrap();
    assert_eq!(registry.replace_sequence(5, seq(0x2222)), Ok(Applied::Deferred));
    assert_eq!(registry.sequence(5).unwrap(), &prior);

    registry.close_queueing().unwrap();
    assert_eq!(registry.phase(), InitPhase::Queued);

    let report = registry.ready().unwrap();
    assert_eq!(report.sequences, 1);
    assert_eq!(registry.phase(), InitPhase::Ready);
    assert_eq!(registry.sequence(5).unwrap(), &seq(0x2222));

    // Ready：直接生效
    assert_eq!(registry.replace_sequence(5, seq(0x3333)), Ok(Applied::Immediate));
    assert_eq!(registry.sequence(5).unwrap(), &seq(0x3333));
}

#[test]
fn test_queued_phase_cannot_be_overwritten_by_drain() {
    let mut registry = AudioRegistry::new(RegistryConfig::default(), baseline(4));
    registry.begin_queueing().unwrap();
    assert_eq!(registry.replace_sequence(1, seq(0xAAAA)), Ok(Applied::Deferred));
    registry.close_queueing().unwrap();

    // Queued：init queue 尚未 drain，外部调用被拒绝
    assert_eq!(registry.replace_sequence(1, seq(0xBBBB)), Err(RegistryError::NotReady));
    assert_eq!(registry.sequence(1).unwrap(), &seq(0x100));

    registry.ready().unwrap();
    assert_eq!(registry.sequence(1).unwrap(), &seq(0xAAAA));

    assert_eq!(registry.replace_sequence(1, seq(0xBBBB)), Ok(Applied::Immediate));
    assert_eq!(registry.sequence(1).unwrap(), &seq(0xBBBB));
}

#[test]
fn test_drain_order_and_first_write_wins() {
    let mut registry = AudioRegistry::new(RegistryConfig::default(), baseline(4));
    registry.begin_queueing().unwrap();

    assert_eq!(registry.replace_sequence(1, seq(0xA)), Ok(Applied::Deferred));
    assert_eq!(registry.replace_sequence(2, seq(0xB)), Ok(Applied::Deferred));
    assert_eq!(registry.replace_sequence(1, seq(0xC)), Ok(Applied::Discarded));
    assert_eq!(
        registry.replace_sample_bank(0, ResourceEntry::from_origin(0x7000, 1, Medium::Cart, CachePolicy::None)),
        Ok(Applied::Deferred)
    );

    let report = registry.ready().unwrap();
    assert_eq!((report.sample_banks, report.sound_fonts, report.sequences), (1, 0, 2));
    assert_eq!(registry.sequence(1).unwrap(), &seq(0xA));
    assert_eq!(registry.sequence(2).unwrap(), &seq(0xB));
}

#[test]
fn test_ids_survive_growth() {
    let mut config = RegistryConfig::default();
    config.sequence.initial_capacity = Some(4);
    let mut registry = AudioRegistry::new(config, baseline(4));
    registry.begin_queueing().unwrap();

    let ids: Vec<u32> = (0..20).map(|i| registry.add_sequence(seq(0x10_0000 + i)).unwrap()).collect();
    assert_eq!(ids, (4..24).collect::<Vec<_>>());
    assert_eq!(registry.capacity(ResourceKind::Sequence), 32);
    for (i, id) in ids.iter().enumerate() {
        assert_eq!(registry.sequence(*id).unwrap(), &seq(0x10_0000 + i as u32));
    }
}

#[test]
fn test_growth_failure_keeps_table() {
    let alloc = Rc::new(CountdownAllocator::new(0));
    let mut config = RegistryConfig::default();
    config.sequence.initial_capacity = Some(2);
    let mut registry = AudioRegistry::new(config, baseline(2)).with_allocator(Box::new(alloc.clone()));
    registry.begin_queueing().unwrap();

    assert!(matches!(
        registry.add_sequence(seq(0xDEAD)),
        Err(RegistryError::CapacityExhausted { capacity: 2, .. })
    ));
    assert_eq!(registry.count(ResourceKind::Sequence), 2);
    assert_eq!(registry.capacity(ResourceKind::Sequence), 2);
    assert_eq!(registry.sequence(1).unwrap(), &seq(0x100));

    // 允许分配后同一次调用成功
    alloc.reset(usize::MAX);
    assert_eq!(registry.add_sequence(seq(0xBEEF)), Ok(2));
}

#[test]
fn test_load_queue_applied_on_materialize() {
    let hooks = Rc::new(RefCell::new(RecordingHooks::default()));
    let mut registry =
        AudioRegistry::new(RegistryConfig::default(), baseline(4)).with_hooks(Box::new(hooks.clone()));
    registry.begin_queueing().unwrap();
    registry.ready().unwrap();

    assert_eq!(registry.patch_sequence_data(3, 0, &[0xFF]), Ok(Applied::Deferred));
    assert_eq!(registry.patch_sequence_data(3, 2, &[0xEE]), Ok(Applied::Deferred));
    assert_eq!(registry.pending_load_commands(ResourceKind::Sequence), 2);

    registry.on_materialized(ResourceKind::Sequence, 3, MaterializedData::Bytes(vec![0; 3])).unwrap();

    assert_eq!(registry.pending_load_commands(ResourceKind::Sequence), 0);
    assert_eq!(registry.resident_bytes(ResourceKind::Sequence, 3), Some(&[0xFF, 0, 0xEE][..]));
    assert_eq!(hooks.borrow().loaded, vec![(ResourceKind::Sequence, 3)]);
}

#[test]
fn test_restore_before_ready_is_rejected() {
    let mut registry = AudioRegistry::new(RegistryConfig::default(), baseline(2));
    assert_eq!(registry.restore_sequence(0), Err(RegistryError::NotReady));
    registry.begin_queueing().unwrap();
    assert_eq!(registry.restore_sequence(0), Err(RegistryError::NotReady));
    registry.ready().unwrap();
    assert_eq!(registry.restore_sequence(0), Ok(()));
}
