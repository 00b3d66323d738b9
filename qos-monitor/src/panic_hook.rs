use chrono::Local;
use std::{
    backtrace::Backtrace,
    fs::OpenOptions,
    io::Write,
    panic::{PanicHookInfo, take_hook},
    path::Path,
    thread,
};

use crate::logging::LOG_FILE_PREFIX;

/// Route panics through `tracing` before the previous hook runs.
///
/// Probe and job panics are contained by the engine, so this mostly catches
/// panics on the main task and in background loops. In `panic = "abort"`
/// builds the record is also appended to today's log file directly, since the
/// non-blocking writer may never flush.
pub fn install(log_dir: impl AsRef<Path>) {
    let log_dir = log_dir.as_ref().to_path_buf();
    let previous_hook = take_hook();

    std::panic::set_hook(Box::new(move |info: &PanicHookInfo<'_>| {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let record = panic_record(info);
            tracing::error!(target: "qos_monitor::panic", "{record}");

            if cfg!(panic = "abort") {
                let _ = append_record(&log_dir, &record);
            }
        }));

        previous_hook(info);
    }));
}

fn append_record(log_dir: &Path, record: &str) -> std::io::Result<()> {
    let path = log_dir.join(format!(
        "{LOG_FILE_PREFIX}.{}",
        Local::now().format("%Y-%m-%d")
    ));
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{record}")?;
    file.flush()
}

fn panic_record(info: &PanicHookInfo<'_>) -> String {
    let location = info
        .location()
        .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
        .unwrap_or_else(|| "<unknown>".to_string());
    let thread_name = thread::current()
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| "<unnamed>".to_string());
    let ts = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z");

    format!(
        "{ts} PANIC thread={thread_name} location={location} payload={}\nBacktrace:\n{}",
        payload_message(info),
        Backtrace::force_capture()
    )
}

fn payload_message(info: &PanicHookInfo<'_>) -> String {
    if let Some(s) = info.payload().downcast_ref::<&'static str>() {
        return (*s).to_string();
    }
    if let Some(s) = info.payload().downcast_ref::<String>() {
        return s.clone();
    }
    info.to_string()
}
