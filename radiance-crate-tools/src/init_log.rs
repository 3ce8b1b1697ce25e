use std::io::Write;

/// 日志默认等级，可以被环境变量 `RADIANCE_LOG` 覆盖（语法和 `RUST_LOG` 一致）
const DEFAULT_LEVEL: log::LevelFilter = log::LevelFilter::Info;
const LOG_ENV: &str = "RADIANCE_LOG";

pub fn init_log() {
    init_log_with_level(DEFAULT_LEVEL);
}

/// 初始化 env_logger
///
/// 输出格式：`[时间] 等级 [文件:行号] 消息`，等级按颜色区分。
/// 重复调用只有第一次生效。
pub fn init_log_with_level(level: log::LevelFilter) {
    let mut builder = env_logger::Builder::new();
    builder
        .format(|buf, record| {
            let level_style = match record.level() {
                log::Level::Error => {
                    buf.default_level_style(log::Level::Error).fg_color(Some(anstyle::AnsiColor::Red.into()))
                }
                log::Level::Warn => {
                    buf.default_level_style(log::Level::Warn).fg_color(Some(anstyle::AnsiColor::Yellow.into()))
                }
                log::Level::Info => {
                    buf.default_level_style(log::Level::Info).fg_color(Some(anstyle::AnsiColor::Green.into()))
                }
                level => buf.default_level_style(level),
            };
            let location_style = anstyle::Style::new().fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(110, 110, 110))));

            // windows 下的路径分隔符也需要处理
            let file = record.file().unwrap_or("").rsplit(['/', '\\']).next().unwrap_or("");
            let line = record.line().unwrap_or(0);
            let time = chrono::Local::now().format("%H:%M:%S%.3f");

            writeln!(
                buf,
                "{level_style}[{time}] {:<5}{level_style:#} {location_style}[{file}:{line}]{location_style:#} {}",
                record.level(),
                record.args()
            )
        })
        .filter(None, level);

    if let Ok(filters) = std::env::var(LOG_ENV) {
        builder.parse_filters(&filters);
    }

    // 测试或多次初始化时忽略错误
    let _ = builder.try_init();
}
