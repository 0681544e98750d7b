//! Table-driven tests for configuration loading and validation.

mod common;

use postman::config::{load_config, load_config_from_str, ConfigFormat, LayoutVariant, Sender, SmtpTls};
use postman::web_version::WebVersionSigner;
use serial_test::serial;
use tempfile::TempDir;

struct ConfigTestCase {
    name: &'static str,
    config_json: &'static str,
    should_succeed: bool,
    expected_error: Option<&'static str>,
}

const JSON_CONFIG_TESTS: &[ConfigTestCase] = &[
    ConfigTestCase {
        name: "empty_object_uses_defaults",
        config_json: "{}",
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "valid_full",
        config_json: r#"{
            "subjectPrefix": "[Shop]",
            "subjectSuffix": "(test)",
            "from": {"email": "shop@example.com", "name": "Shop"},
            "smtpUser": "robot@example.com",
            "host": "https://shop.example.com",
            "appName": "Shop",
            "defaultLayout": "main",
            "layoutVariants": {
                "main": {"text": "{content}", "html": "<body>{content}</body>", "css": "p{}"},
                "files": {"files": {"html": "/views/layout.html"}}
            },
            "useInliner": true,
            "webVersion": {"baseUrl": "https://view.example.com", "secret": "k"},
            "retry": {"maxTries": 5, "baseDelaySecs": 60, "maxDelaySecs": 3600},
            "workers": 4,
            "database": "/tmp/postman.db",
            "smtp": {"host": "smtp.example.com", "port": 465, "tls": "wrapper"}
        }"#,
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "zero_workers",
        config_json: r#"{"workers": 0}"#,
        should_succeed: false,
        expected_error: Some("workers must be greater than 0"),
    },
    ConfigTestCase {
        name: "zero_max_tries",
        config_json: r#"{"retry": {"maxTries": 0}}"#,
        should_succeed: false,
        expected_error: Some("maxTries"),
    },
    ConfigTestCase {
        name: "invalid_host",
        config_json: r#"{"host": "not a url"}"#,
        should_succeed: false,
        expected_error: Some("Invalid host URL"),
    },
    ConfigTestCase {
        name: "empty_files_layout",
        config_json: r#"{"layoutVariants": {"broken": {"files": {}}}}"#,
        should_succeed: false,
        expected_error: Some("broken"),
    },
    ConfigTestCase {
        name: "unknown_layout_shape",
        config_json: r#"{"layoutVariants": {"odd": {"view": "x"}}}"#,
        should_succeed: false,
        expected_error: None,
    },
    ConfigTestCase {
        name: "malformed_json",
        config_json: r#"{"workers": "#,
        should_succeed: false,
        expected_error: None,
    },
];

#[test]
fn test_json_config_cases() {
    for case in JSON_CONFIG_TESTS {
        let result = load_config_from_str(case.config_json, ConfigFormat::Json);
        assert_eq!(
            result.is_ok(),
            case.should_succeed,
            "case '{}' returned {:?}",
            case.name,
            result.as_ref().err()
        );

        if let (Err(e), Some(expected)) = (&result, case.expected_error) {
            assert!(
                e.to_string().contains(expected),
                "case '{}': error '{}' does not mention '{}'",
                case.name,
                e,
                expected
            );
        }
    }
}

#[test]
fn test_full_config_values() {
    let config = load_config_from_str(JSON_CONFIG_TESTS[1].config_json, ConfigFormat::Json).unwrap();
    assert_eq!(
        config.from,
        Some(Sender::Mailbox {
            email: "shop@example.com".to_string(),
            name: Some("Shop".to_string())
        })
    );
    assert_eq!(config.retry.max_tries, 5);
    assert!(matches!(
        config.layout_variants.get("files"),
        Some(LayoutVariant::Files { .. })
    ));
    assert!(matches!(
        config.layout_variants.get("main"),
        Some(LayoutVariant::Inline(_))
    ));
    let smtp = config.smtp.unwrap();
    assert_eq!(smtp.port, 465);
    assert_eq!(smtp.tls, SmtpTls::Wrapper);
}

#[test]
fn test_load_yaml_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("postman.yaml");
    std::fs::write(
        &path,
        "from: noreply@example.com\nappName: Shop\nretry:\n  maxTries: 2\nsmtp:\n  host: localhost\n  tls: none\n",
    )
    .unwrap();

    let config = load_config(&path).unwrap();
    assert_eq!(config.from, Some(Sender::Email("noreply@example.com".to_string())));
    assert_eq!(config.app_name, "Shop");
    assert_eq!(config.retry.max_tries, 2);
    assert_eq!(config.retry.base_delay_secs, 300);
    assert_eq!(config.smtp.unwrap().tls, SmtpTls::None);
}

#[test]
fn test_load_missing_and_unsupported_files() {
    let dir = TempDir::new().unwrap();
    assert!(load_config(dir.path().join("missing.json")).is_err());

    let path = dir.path().join("postman.toml");
    std::fs::write(&path, "workers = 1").unwrap();
    let err = load_config(&path).unwrap_err();
    assert!(err.to_string().contains("toml"));
}

#[test]
#[serial]
fn test_web_version_secret_from_env() {
    std::env::set_var("POSTMAN_TEST_WEB_SECRET", "from-env");
    let config = load_config_from_str(
        r#"{"webVersion": {"baseUrl": "https://example.com", "secretEnvVar": "POSTMAN_TEST_WEB_SECRET"}}"#,
        ConfigFormat::Json,
    )
    .unwrap();

    let signer = WebVersionSigner::from_config(&config).unwrap();
    let url = signer.url_for("abc").unwrap();
    assert!(url.starts_with("https://example.com/letter/show?token=abc&hash="));
    std::env::remove_var("POSTMAN_TEST_WEB_SECRET");
}

#[test]
#[serial]
fn test_web_version_secret_env_missing() {
    std::env::remove_var("POSTMAN_TEST_MISSING_SECRET");
    let config = load_config_from_str(
        r#"{"webVersion": {"secretEnvVar": "POSTMAN_TEST_MISSING_SECRET"}}"#,
        ConfigFormat::Json,
    )
    .unwrap();
    assert!(WebVersionSigner::from_config(&config).is_err());
}
