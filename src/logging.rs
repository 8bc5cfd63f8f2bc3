//! Process logging bootstrap
//!
//! The level comes from `$HOME/.logging.json` (`{"level": "debug"}` etc.),
//! overridden by the `DEBUG` environment variable: `1` maps to debug, `2`
//! to info, `3` to warning, anything else numeric to error.

use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

pub fn init() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(resolve_level())
        .with_target(false)
        .finish();
    // A second init (tests) keeps the first subscriber.
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn resolve_level() -> Level {
    let from_env = std::env::var("DEBUG").ok().and_then(|v| map_env_value(&v));
    let from_file = level_file_content().and_then(|text| map_file_level(&text));
    from_env.or(from_file).unwrap_or(Level::INFO)
}

fn level_file_content() -> Option<String> {
    let home = std::env::var_os("HOME")?;
    let path = PathBuf::from(home).join(".logging.json");
    std::fs::read_to_string(path).ok()
}

fn map_file_level(json: &str) -> Option<Level> {
    let value: serde_json::Value = serde_json::from_str(json).ok()?;
    match value.get("level")?.as_str()? {
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

fn map_env_value(value: &str) -> Option<Level> {
    match value.trim().parse::<u32>().ok()? {
        1 => Some(Level::DEBUG),
        2 => Some(Level::INFO),
        3 => Some(Level::WARN),
        _ => Some(Level::ERROR),
    }
}
