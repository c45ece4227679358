use std::env;
use std::fs;
use std::time::Duration;

use serial_test::serial;
use tempfile::TempDir;

use super::settings::{PartialRabbitMqSettings, PartialSettings};
use super::{Settings, load_config, merge};

const VARS: [&str; 15] = [
    "RABBITMQ_HOST",
    "RABBITMQ_PORT",
    "RABBITMQ_USER",
    "RABBITMQ_PASS",
    "RABBITMQ_VHOST",
    "RABBITMQ_HEARTBEAT",
    "INPUT_QUEUE",
    "OUTPUT_QUEUE",
    "PROCESSOR_ID",
    "LOG_LEVEL",
    "RECONNECT_BASE",
    "RECONNECT_CAP",
    "SHUTDOWN_TIMEOUT",
    "POLL_SLICE",
    "POLL_PAUSE",
];

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.rabbitmq.host, "localhost");
    assert_eq!(settings.rabbitmq.port, 5672);
    assert_eq!(settings.rabbitmq.user, "guest");
    assert_eq!(settings.rabbitmq.vhost, "/");
    assert_eq!(settings.rabbitmq.heartbeat, 60);
    assert_eq!(settings.input.queue, "nx_01_ai_queue");
    assert_eq!(settings.output.queue, "nx_02_queue");
    assert_eq!(settings.processor.id, "X");
    assert_eq!(settings.log.level, "info");
}

#[test]
fn test_processor_options_from_defaults() {
    let options = Settings::default().processor_options();
    assert_eq!(options.processor_id, "X");
    assert_eq!(options.reconnect_base, Duration::from_secs(5));
    assert_eq!(options.reconnect_cap, Duration::from_secs(300));
    assert_eq!(options.shutdown_timeout, Duration::from_secs(5));
    assert_eq!(options.poll_slice, Duration::from_millis(200));
    assert_eq!(options.idle_pause, Duration::from_millis(50));
}

#[test]
fn test_merge_keeps_defaults_for_missing_fields() {
    let partial = PartialSettings {
        rabbitmq: Some(PartialRabbitMqSettings {
            host: Some("rabbit".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    };
    let merged = merge(partial, Settings::default());
    assert_eq!(merged.rabbitmq.host, "rabbit");
    assert_eq!(merged.rabbitmq.port, 5672);
    assert_eq!(merged.input.queue, "nx_01_ai_queue");
}

#[test]
fn test_password_is_masked_in_debug() {
    let mut settings = Settings::default();
    settings.rabbitmq.pass = "hunter2".to_string();

    let printed = format!("{settings:?}");
    assert!(!printed.contains("hunter2"));
    assert!(printed.contains("***"));

    let params = settings.amqp_params();
    assert_eq!(params.password, "hunter2");
}

#[test]
#[serial]
fn test_load_config_without_overrides() {
    temp_env::with_vars_unset(VARS, || {
        let settings = load_config().expect("load_config failed");
        assert_eq!(settings, Settings::default());
    });
}

#[test]
#[serial]
fn test_environment_overrides_defaults() {
    temp_env::with_vars(
        [
            ("RABBITMQ_HOST", Some("rabbit.internal")),
            ("RABBITMQ_PORT", Some("5673")),
            ("RABBITMQ_PASS", Some("s3cret")),
            ("INPUT_QUEUE", Some("articles_in")),
            ("OUTPUT_QUEUE", Some("scripts_out")),
            ("PROCESSOR_ID", Some("worker-7")),
            ("LOG_LEVEL", Some("DEBUG")),
            ("RECONNECT_BASE", Some("2")),
            ("POLL_SLICE", Some("100")),
        ],
        || {
            let settings = load_config().expect("load_config failed");
            assert_eq!(settings.rabbitmq.host, "rabbit.internal");
            assert_eq!(settings.rabbitmq.port, 5673);
            assert_eq!(settings.rabbitmq.pass, "s3cret");
            assert_eq!(settings.rabbitmq.user, "guest");
            assert_eq!(settings.input.queue, "articles_in");
            assert_eq!(settings.output.queue, "scripts_out");
            assert_eq!(settings.processor.id, "worker-7");
            assert_eq!(settings.log.level, "DEBUG");
            assert_eq!(settings.reconnect.base, 2);
            assert_eq!(settings.reconnect.cap, 300);
            assert_eq!(settings.poll.slice, 100);
        },
    );
}

#[test]
#[serial]
fn test_load_config_from_file_overrides_defaults() {
    let tmp = TempDir::new().expect("create tempdir");
    let orig = env::current_dir().expect("current_dir");
    env::set_current_dir(tmp.path()).expect("set current dir");

    fs::create_dir_all("config").expect("create config dir");
    let toml = r#"
        [rabbitmq]
        host = "file-host"
        heartbeat = 30

        [output]
        queue = "from_file"

        [shutdown]
        timeout = 9
    "#;
    fs::write("config/default.toml", toml).expect("write config file");

    let result = temp_env::with_vars_unset(VARS, load_config);

    env::set_current_dir(orig).expect("restore cwd");

    let settings = result.expect("load_config failed");
    assert_eq!(settings.rabbitmq.host, "file-host");
    assert_eq!(settings.rabbitmq.heartbeat, 30);
    assert_eq!(settings.output.queue, "from_file");
    assert_eq!(settings.shutdown.timeout, 9);
    assert_eq!(settings.input.queue, "nx_01_ai_queue");
}

#[test]
#[serial]
fn test_environment_wins_over_file() {
    let tmp = TempDir::new().expect("create tempdir");
    let orig = env::current_dir().expect("current_dir");
    env::set_current_dir(tmp.path()).expect("set current dir");

    fs::create_dir_all("config").expect("create config dir");
    fs::write("config/default.toml", "[input]\nqueue = \"file_queue\"\n").expect("write config");

    let result = temp_env::with_vars([("INPUT_QUEUE", Some("env_queue"))], load_config);

    env::set_current_dir(orig).expect("restore cwd");

    assert_eq!(result.expect("load_config failed").input.queue, "env_queue");
}
