use env_logger::Env;
use log::{Level, LevelFilter, Record};
use std::io::Write;

fn log_level_str(record: &Record) -> String {
  let mut level_str = record.level().to_string();
  level_str.truncate(1);
  level_str
}

fn format_log_level(record: &Record) -> String {
  let level_str = match record.level() {
    Level::Error | Level::Warn => log_level_str(record),
    Level::Info | Level::Debug | Level::Trace => log_level_str(record).to_lowercase(),
  };
  format!("[{level_str}]")
}

pub fn setup_logger(filter_level: LevelFilter) {
  env_logger::Builder::from_env(Env::default().default_filter_or("warn"))
    .filter_level(filter_level)
    .format(|buf, record| {
      let file_line = match (record.file(), record.line()) {
        (Some(file), Some(line)) => format!("{file}:{line}:"),
        (Some(file), None) => format!("{file}:"),
        _ => String::new(),
      };
      let level = format_log_level(record);
      let args = record.args();
      writeln!(buf, "{level} {file_line} {args}")?;
      Ok(())
    })
    .init();
}

pub fn global_init() {
  color_eyre::config::HookBuilder::default()
    .install()
    .expect("color_eyre initialization failed");
}
