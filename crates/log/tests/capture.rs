use hodld_log::{
    capture_snapshot, clear_captured_logs, enable_capture, init, log_debug, log_info, log_warn,
    set_stderr_enabled, Format, Level, LogConfig,
};

#[test]
fn capture_respects_level_and_capacity() {
    set_stderr_enabled(false);
    init(LogConfig {
        level: Level::Info,
        format: Format::Text,
        timestamps: false,
    });
    enable_capture(2);
    clear_captured_logs();

    log_info!("first {}", 1);
    log_debug!("filtered");
    log_warn!("second");
    log_info!("third");

    let lines = capture_snapshot(10);
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].msg, "second");
    assert_eq!(lines[0].level, Level::Warn);
    assert_eq!(lines[1].msg, "third");
    assert!(lines[1].target.starts_with("capture"));

    assert_eq!(capture_snapshot(1).len(), 1);
}
