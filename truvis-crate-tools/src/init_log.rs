use std::io::Write;

/// 以默认的 Info 级别初始化日志
pub fn init_log() {
    init_log_with_level(log::LevelFilter::Info);
}

/// 以指定级别初始化日志
///
/// 重复初始化会被忽略，不会 panic。
pub fn init_log_with_level(level: log::LevelFilter) {
    if builder(level).try_init().is_err() {
        log::debug!("logger already initialized, keep the existing one");
    }
}

/// 测试用：多个测试共享同一个进程，只有第一次会生效
pub fn try_init_log_for_test() {
    let _ = builder(log::LevelFilter::Debug).is_test(true).try_init();
}

/// 将配置文件里的字符串转换为日志级别，无法识别时返回 None
pub fn parse_level(level: &str) -> Option<log::LevelFilter> {
    level.trim().parse::<log::LevelFilter>().ok()
}

fn builder(level: log::LevelFilter) -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder
        .format(|buf, record| {
            let info_style = buf
                .default_level_style(log::Level::Info)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green)));
            let warn_style = buf
                .default_level_style(log::Level::Warn)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow)));
            let error_style = buf
                .default_level_style(log::Level::Error)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red)));

            let level_style = match record.level() {
                log::Level::Info => info_style,
                log::Level::Warn => warn_style,
                log::Level::Error => error_style,
                _ => buf.default_level_style(record.level()),
            };
            let grey_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(110, 110, 110))));
            let target_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(75, 75, 75))));

            let line = record.line().unwrap_or(!0);
            let file = record.file().unwrap_or("").rsplit(['\\', '/']).next().unwrap_or("");
            let time = chrono::Local::now().format("%H:%M:%S%.3f");
            let level = record.level();

            writeln!(
                buf,
                "{level_style}[{time}] {level}{level_style:#} {grey_style}[{file}:{line}]{grey_style:#} \
                 {target_style}{}{target_style:#}",
                record.args()
            )
        })
        .filter(None, level);
    builder
}
