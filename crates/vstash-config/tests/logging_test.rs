//! File logging
//!
//! Kept in its own test binary: `init_logging` installs the global
//! subscriber, which can only happen once per process.

use vstash_config::log_daemon_error;
use vstash_config::logging::init_logging;
use vstash_config::testing::TestEnvironment;

#[test]
fn test_init_logging_writes_daily_file() {
    let env = TestEnvironment::new().unwrap();
    let config = env.config();
    assert!(!env.log_dir.exists());

    let guard = init_logging(&config.logging).unwrap();
    assert!(guard.is_some());
    log_daemon_error!("file sink check", test_id = env.test_id);
    // Dropping the guard flushes the non-blocking writer
    drop(guard);

    let mut logs = Vec::new();
    for entry in std::fs::read_dir(&env.log_dir).unwrap() {
        let entry = entry.unwrap();
        if entry.file_name().to_string_lossy().starts_with("vstash.log") {
            logs.push(std::fs::read_to_string(entry.path()).unwrap());
        }
    }
    assert_eq!(logs.len(), 1);
    assert!(logs[0].contains("file sink check"));
    assert!(logs[0].contains("DAEMON"));
}
