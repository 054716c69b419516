use helios::config::LoggingConfig;
use helios::logging::{LogContext, get_logger, get_logger_with_context, init_logging, parse_log_level};
use tracing::Level;

#[test]
fn init_console_only_is_idempotent() {
    let cfg = LoggingConfig {
        file: String::new(),
        level: "debug".to_string(),
        ..Default::default()
    };
    assert!(init_logging(&cfg).is_ok());
    assert!(init_logging(&cfg).is_ok());

    let logger = get_logger_with_context(LogContext::new("test").with_device("boiler"));
    logger.info("after init");
    assert_eq!(get_logger("control").component(), "control");
}

#[test]
fn parse_levels() {
    assert_eq!(parse_log_level(" trace ").unwrap(), Level::TRACE);
    assert_eq!(parse_log_level("Warning").unwrap(), Level::WARN);
    assert_eq!(parse_log_level("ERROR").unwrap(), Level::ERROR);
    assert!(parse_log_level("verbose").is_err());
}
