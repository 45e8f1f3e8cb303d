//! Configuration tests for defaults, file layering and environment overrides

#[cfg(test)]
mod tests {
    use super::super::config::Config;
    use crate::{StartupPolicy, TransportMode};
    use serial_test::serial;
    use std::env;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.transport.mode, TransportMode::Stdio);
        assert_eq!(config.orchestrator.startup_policy, StartupPolicy::FailFast);
        assert_eq!(
            config.orchestrator.call_timeout(),
            Duration::from_secs(30)
        );
        assert_eq!(
            config.orchestrator.manifest_path,
            std::path::PathBuf::from("manifest.json")
        );
    }

    #[test]
    #[serial]
    fn test_loaded_config_uses_defaults() {
        let config = Config::load().expect("Should load config successfully");
        assert_eq!(config.orchestrator.handshake_timeout_ms, 10_000);
        assert_eq!(config.orchestrator.shutdown_grace_ms, 2_000);
        assert_eq!(config.transport.port, 8000);
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    #[serial]
    fn test_environment_variable_override() {
        env::set_var("REPPO_ORCHESTRATOR__CALL_TIMEOUT_MS", "1234");
        env::set_var("REPPO_ORCHESTRATOR__STARTUP_POLICY", "skip_failed");
        let result = Config::load();
        env::remove_var("REPPO_ORCHESTRATOR__CALL_TIMEOUT_MS");
        env::remove_var("REPPO_ORCHESTRATOR__STARTUP_POLICY");

        let config = result.expect("Should load config with overrides");
        assert_eq!(config.orchestrator.call_timeout_ms, 1234);
        assert_eq!(config.orchestrator.startup_policy, StartupPolicy::SkipFailed);
    }

    #[test]
    #[serial]
    fn test_file_layer() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[orchestrator]
manifest_path = "/etc/reppo/workers.json"
handshake_timeout_ms = 500

[transport]
mode = "http"
port = 9100
"#
        )
        .unwrap();

        let config = Config::load_from_file(file.path()).unwrap();
        assert_eq!(
            config.orchestrator.manifest_path,
            std::path::PathBuf::from("/etc/reppo/workers.json")
        );
        assert_eq!(config.orchestrator.handshake_timeout_ms, 500);
        assert_eq!(config.orchestrator.call_timeout_ms, 30_000);
        assert_eq!(config.transport.mode, TransportMode::Http);
        assert_eq!(config.http_addr().unwrap().port(), 9100);
    }

    #[test]
    #[serial]
    fn test_missing_explicit_file_is_error() {
        assert!(Config::load_from_file("/nonexistent/reppo.toml").is_err());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.orchestrator.call_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.transport.mode = TransportMode::Http;
        config.transport.host = "not a host".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.transport.mode = TransportMode::Http;
        config.transport.port = 0;
        assert!(config.validate().is_err());
    }
}
