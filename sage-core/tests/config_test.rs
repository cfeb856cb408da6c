use sage_core::config::{ConfigBuilder, Environment, LogFormat, SageConfig};
use sage_core::handler::HandlerConfig;
use sage_core::SageError;
use serial_test::serial;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

const SAGE_VARS: &[&str] = &[
    "SAGE_ENV",
    "NODE_ENV",
    "SAGE_INCLUDE_STACK",
    "SAGE_MAX_SIMILAR_ERRORS",
    "SAGE_IGNORE_ERRORS",
    "SAGE_LOG_LEVEL",
];

fn clear_env() {
    for var in SAGE_VARS {
        std::env::remove_var(var);
    }
}

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_load_from_file() {
    clear_env();
    let file = write_config(
        r#"
environment = "production"

[handler]
include_stack = true

[filter]
max_similar_errors = 10
deny_urls = ["^chrome-extension://"]

[retry]
max_attempts = 5
base_delay = "250ms"
max_delay = "4s"

[monitor.thresholds]
api_response = 400.0

[observability]
log_level = "debug"
log_format = "json"
"#,
    );

    let config = SageConfig::from_file(file.path()).unwrap();
    assert_eq!(config.environment, Environment::Production);
    assert_eq!(config.filter.max_similar_errors, 10);
    assert_eq!(config.filter.max_errors_per_minute, 50);
    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.retry.base_delay, Duration::from_millis(250));
    assert_eq!(config.monitor.thresholds.api_response, 400.0);
    assert_eq!(config.monitor.thresholds.lcp, 2500.0);
    assert_eq!(config.observability.log_format, LogFormat::Json);

    let handler = config.handler_config();
    assert!(handler.include_stack);
    assert!(!handler.include_sensitive_info);
    assert!(handler.sanitize_error_messages);
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    clear_env();
    let file = write_config("[filter]\nmax_similar_errors = 10\n");
    std::env::set_var("SAGE_ENV", "production");
    std::env::set_var("SAGE_INCLUDE_STACK", "yes");
    std::env::set_var("SAGE_MAX_SIMILAR_ERRORS", "3");
    std::env::set_var("SAGE_IGNORE_ERRORS", "ChunkLoadError, AbortError");

    let config = SageConfig::from_file(file.path());
    clear_env();
    let config = config.unwrap();

    assert_eq!(config.environment, Environment::Production);
    assert!(config.handler_config().include_stack);
    assert_eq!(config.filter.max_similar_errors, 3);
    assert_eq!(config.filter.ignore_errors.len(), 2);
}

#[test]
#[serial]
fn test_invalid_values_are_rejected() {
    clear_env();
    let file = write_config("[retry]\nbackoff_multiplier = 0.5\n");
    assert!(matches!(
        SageConfig::from_file(file.path()),
        Err(SageError::ConfigurationError { .. })
    ));

    let file = write_config("[filter]\nignore_errors = [{ regex = \"(unclosed\" }]\n");
    assert!(SageConfig::from_file(file.path()).is_err());

    std::env::set_var("SAGE_LOG_LEVEL", "verbose");
    let result = SageConfig::load(None);
    clear_env();
    assert!(result.is_err());
}

#[test]
#[serial]
fn test_missing_file_is_a_configuration_error() {
    clear_env();
    let err = SageConfig::from_file("/definitely/not/here.toml").unwrap_err();
    assert!(err.to_string().contains("not/here.toml"));
}

#[test]
fn test_builder_and_round_trip() {
    let config = ConfigBuilder::new()
        .environment(Environment::Development)
        .log_level("warn")
        .service_name("sage-tutor")
        .build()
        .unwrap();
    assert_eq!(config.handler_config(), HandlerConfig::development());

    let text = config.to_toml().unwrap();
    let parsed = SageConfig::from_toml_str(&text).unwrap();
    assert_eq!(parsed.observability.service_name, "sage-tutor");
    assert_eq!(parsed.retry.max_delay, config.retry.max_delay);
}

#[test]
fn test_empty_builder_name_fails() {
    assert!(ConfigBuilder::new().service_name("  ").build().is_err());
}
