//! 回放一段 TOML 描述的注册表调用序列，打印每一步的结果与最终的表状态
//!
//! 用法：`registry-replay [SCENARIO] [--config PATH]`
//!
//! 省略参数时使用 `config/scenarios/boot.toml` 与 `config/registry.toml`。

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use truvis_audio_registry::sound_font::SoundFontImage;
use truvis_audio_registry::{
    AudioRegistry, CachePolicy, CacheSearch, MaterializedData, Medium, RecordingHooks, RegistryBaseline,
    RegistryConfig, ResourceEntry, ResourceKind, SequenceAux, SequenceFlags,
};
use truvis_crate_tools::init_log::{init_log_with_level, parse_level};
use truvis_crate_tools::resource::TruvisPath;

/// 一条记录的描述
#[derive(Debug, Clone, Deserialize)]
struct EntryDesc {
    addr: u32,
    #[serde(default)]
    size: u32,
    #[serde(default)]
    medium: Medium,
    #[serde(default)]
    cache: CachePolicy,
    #[serde(default)]
    short_data: [u16; 3],

    /// 仅 sequence：音色库列表
    #[serde(default)]
    fonts: Vec<u8>,
    /// 仅 sequence：标志位
    #[serde(default)]
    flags: u8,
}
impl EntryDesc {
    fn entry(&self) -> ResourceEntry {
        ResourceEntry {
            short_data: self.short_data,
            ..ResourceEntry::from_origin(self.addr, self.size, self.medium, self.cache)
        }
    }

    fn sequence_aux(&self) -> SequenceAux {
        SequenceAux::new(self.fonts.iter().copied(), SequenceFlags::from_bits_truncate(self.flags))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BaselineDesc {
    sequences: Vec<EntryDesc>,
    sound_fonts: Vec<EntryDesc>,
    sample_banks: Vec<EntryDesc>,
}
impl BaselineDesc {
    fn build(&self) -> RegistryBaseline {
        RegistryBaseline {
            sequences: self.sequences.iter().map(|s| (s.entry(), s.sequence_aux())).collect(),
            sound_fonts: self.sound_fonts.iter().map(EntryDesc::entry).collect(),
            sample_banks: self.sample_banks.iter().map(EntryDesc::entry).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Step {
    BeginQueueing,
    CloseQueueing,
    Ready,
    Add {
        kind: ResourceKind,
        entry: EntryDesc,
    },
    Replace {
        kind: ResourceKind,
        id: u32,
        entry: EntryDesc,
    },
    Restore {
        kind: ResourceKind,
        id: u32,
    },
    Materialize {
        kind: ResourceKind,
        id: u32,
        #[serde(default)]
        bytes: Vec<u8>,
        #[serde(default)]
        font: Option<SoundFontImage>,
        /// 记录已经指向内存，只应用等待中的命令
        #[serde(default)]
        resident: bool,
    },
    PopPersistent {
        kind: ResourceKind,
    },
    Reset,
    Status {
        kind: ResourceKind,
        id: u32,
    },
}

#[derive(Debug, Deserialize)]
struct Scenario {
    #[serde(default)]
    baseline: BaselineDesc,
    #[serde(default, rename = "step")]
    steps: Vec<Step>,
}

/// 回放命令行参数
#[derive(Parser, Debug)]
#[command(name = "registry-replay")]
#[command(about = "回放 TOML 描述的音频注册表调用序列")]
struct Args {
    /// 回放脚本，默认 config/scenarios/boot.toml
    #[arg(value_name = "SCENARIO")]
    scenario: Option<PathBuf>,

    /// 注册表配置，默认 config/registry.toml；文件不存在时使用默认配置
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,
}

fn load_config(path: &Path) -> anyhow::Result<RegistryConfig> {
    if path.exists() {
        RegistryConfig::from_file(path)
    } else {
        Ok(RegistryConfig::default())
    }
}

fn run_step(registry: &mut AudioRegistry, step: Step) -> anyhow::Result<String> {
    let outcome = match step {
        Step::BeginQueueing => {
            registry.begin_queueing()?;
            "queueing".to_string()
        }
        Step::CloseQueueing => {
            registry.close_queueing()?;
            "queued".to_string()
        }
        Step::Ready => format!("{:?}", registry.ready()?),
        Step::Add { kind, entry } => {
            let id = match kind {
                ResourceKind::Sequence => registry.add_sequence(entry.entry())?,
                ResourceKind::SoundFont => registry.add_sound_font(entry.entry())?,
                ResourceKind::SampleBank => registry.add_sample_bank(entry.entry())?,
            };
            format!("{} {} added", kind, id)
        }
        Step::Replace { kind, id, entry } => {
            let applied = match kind {
                ResourceKind::Sequence => registry.replace_sequence(id, entry.entry())?,
                ResourceKind::SoundFont => registry.replace_sound_font(id, entry.entry())?,
                ResourceKind::SampleBank => registry.replace_sample_bank(id, entry.entry())?,
            };
            format!("{:?}", applied)
        }
        Step::Restore { kind, id } => {
            match kind {
                ResourceKind::Sequence => registry.restore_sequence(id)?,
                ResourceKind::SoundFont => registry.restore_sound_font(id)?,
                ResourceKind::SampleBank => registry.restore_sample_bank(id)?,
            }
            "restored".to_string()
        }
        Step::Materialize {
            kind,
            id,
            bytes,
            font,
            resident,
        } => {
            let data = match (font, resident) {
                (_, true) => MaterializedData::Resident,
                (Some(image), false) => MaterializedData::Font(image),
                (None, false) => MaterializedData::Bytes(bytes),
            };
            registry.on_materialized(kind, id, data)?;
            format!("{:?}", registry.load_status(kind, id)?)
        }
        Step::PopPersistent { kind } => match registry.pop_persistent_cache(kind) {
            Some(id) => format!("popped {} {}", kind, id),
            None => "nothing to pop".to_string(),
        },
        Step::Reset => {
            registry.reset_load_status();
            "reset".to_string()
        }
        Step::Status { kind, id } => format!(
            "{:?}, cached: {}",
            registry.load_status(kind, id)?,
            registry.search_cache(kind, CacheSearch::Either, id).is_some()
        ),
    };
    Ok(outcome)
}

fn print_summary(registry: &AudioRegistry, hooks: &RecordingHooks) {
    println!("phase: {:?}", registry.phase());
    for kind in ResourceKind::ALL {
        println!(
            "{:<12} count {:>5}  capacity {:>5}  pending loads {}",
            kind.name(),
            registry.count(kind),
            registry.capacity(kind),
            registry.pending_load_commands(kind)
        );
    }
    println!(
        "persistent stack {}/{}, payloads {} ({} shared)",
        registry.cache().persistent_len(),
        registry.cache().persistent_depth(),
        registry.payloads().len(),
        registry.payloads().shared_len()
    );
    println!("loaded events: {:?}", hooks.loaded);
    println!("discarded fonts: {:?}", hooks.discarded_fonts);
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let scenario_path = args.scenario.unwrap_or_else(|| TruvisPath::scenario_path("boot.toml"));
    let config_path = args.config.unwrap_or_else(|| TruvisPath::config_path("registry.toml"));
    let config = load_config(&config_path)?;
    init_log_with_level(parse_level(&config.log_level).unwrap_or(log::LevelFilter::Info));

    let content = std::fs::read_to_string(&scenario_path)
        .with_context(|| format!("读取回放脚本失败: {:?}", scenario_path))?;
    let scenario: Scenario =
        toml::from_str(&content).with_context(|| format!("解析回放脚本失败: {:?}", scenario_path))?;
    log::info!("replaying {} steps from {:?}", scenario.steps.len(), scenario_path);

    let hooks = std::rc::Rc::new(std::cell::RefCell::new(RecordingHooks::default()));
    let mut registry = AudioRegistry::new(config, scenario.baseline.build()).with_hooks(Box::new(hooks.clone()));

    for (index, step) in scenario.steps.into_iter().enumerate() {
        let description = format!("{:?}", step);
        match run_step(&mut registry, step) {
            Ok(outcome) => log::info!("#{} {} -> {}", index, description, outcome),
            Err(err) => log::warn!("#{} {} failed: {:#}", index, description, err),
        }
    }

    print_summary(&registry, &hooks.borrow());
    Ok(())
}
