use std::io::Write;

use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.cache.max_entries = Some(500);
    raw.logging.level = Some("info".to_string());

    let overrides = Overrides {
        cache_max_entries: Some(42),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.cache.max_entries, 42);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn cache_settings_use_correct_defaults() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert!(settings.cache.enabled);
    assert!(settings.cache.dedupe_in_flight);
    assert_eq!(settings.cache.max_entries, 10_000);
    assert_eq!(settings.cache.default_ttl_secs, 3600);
    assert_eq!(settings.cache.sweep_interval_ms, 30_000);
    assert_eq!(settings.cache.auto_consume_interval_ms, 5000);
    assert_eq!(settings.cache.consume_batch_limit, 100);
    assert_eq!(settings.cache.event_queue_limit, 10_000);
    assert_eq!(settings.cache.key_prefix, "gql_resolver");
    assert!(matches!(settings.logging.format, LogFormat::Compact));
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    raw.apply_overrides(&Overrides {
        log_json: Some(true),
        ..Default::default()
    });

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn invalid_log_level_is_rejected() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("loud".to_string());

    let err = Settings::from_raw(raw).expect_err("invalid level");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "logging.level",
            ..
        }
    ));
}

fn assert_rejected(key: &str, mutate: impl FnOnce(&mut RawSettings)) {
    let mut raw = RawSettings::default();
    mutate(&mut raw);
    match Settings::from_raw(raw) {
        Err(LoadError::Invalid { key: actual, .. }) => assert_eq!(actual, key),
        other => panic!("expected invalid {key}, got {other:?}"),
    }
}

#[test]
fn zero_limits_are_rejected() {
    assert_rejected("cache.max_entries", |raw| raw.cache.max_entries = Some(0));
    assert_rejected("cache.consume_batch_limit", |raw| {
        raw.cache.consume_batch_limit = Some(0)
    });
    assert_rejected("cache.event_queue_limit", |raw| {
        raw.cache.event_queue_limit = Some(0)
    });
    assert_rejected("cache.sweep_interval_ms", |raw| {
        raw.cache.sweep_interval_ms = Some(0)
    });
    assert_rejected("cache.auto_consume_interval_ms", |raw| {
        raw.cache.auto_consume_interval_ms = Some(0)
    });
}

#[test]
fn zero_ttl_is_accepted() {
    let mut raw = RawSettings::default();
    raw.cache.default_ttl_secs = Some(0);

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.cache.default_ttl(), None);
}

#[test]
fn blank_key_prefix_is_rejected() {
    let mut raw = RawSettings::default();
    raw.apply_overrides(&Overrides {
        cache_key_prefix: Some("   ".to_string()),
        ..Default::default()
    });

    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "cache.key_prefix",
            ..
        })
    ));
}

#[test]
fn config_file_layer_is_read() {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config file");
    writeln!(
        file,
        "[logging]\nlevel = \"warn\"\n\n[cache]\nmax_entries = 64\ndedupe_in_flight = false\n"
    )
    .expect("write config");

    let args = CliArgs::parse_from([
        "gql-result-cache",
        "--config-file",
        file.path().to_str().expect("utf-8 temp path"),
        "--cache-default-ttl-secs",
        "10",
        "check",
    ]);
    let settings = load(&args).expect("settings load");

    assert_eq!(settings.logging.level, LevelFilter::WARN);
    assert_eq!(settings.cache.max_entries, 64);
    assert!(!settings.cache.dedupe_in_flight);
    assert_eq!(settings.cache.default_ttl_secs, 10);
}

#[test]
fn missing_explicit_config_file_fails() {
    let args = CliArgs::parse_from([
        "gql-result-cache",
        "--config-file",
        "/nonexistent/gql-result-cache.toml",
    ]);

    assert!(matches!(load(&args), Err(LoadError::Build(_))));
}

#[test]
fn parse_check_command() {
    let args = CliArgs::parse_from(["gql-result-cache", "check"]);
    assert!(matches!(args.command, Some(Command::Check)));
}

#[test]
fn parse_simulate_arguments() {
    let args = CliArgs::parse_from([
        "gql-result-cache",
        "simulate",
        "--concurrency",
        "16",
        "--keys",
        "4",
        "--rounds",
        "2",
        "--cache-dedupe-in-flight",
        "false",
    ]);

    match args.command.expect("simulate command") {
        Command::Simulate(simulate) => {
            assert_eq!(simulate.concurrency, 16);
            assert_eq!(simulate.keys, 4);
            assert_eq!(simulate.rounds, 2);
            assert_eq!(simulate.resolve_latency_ms, 20);
        }
        other => panic!("wrong command parsed: {other:?}"),
    }
    assert_eq!(args.overrides.cache_dedupe_in_flight, Some(false));
}

#[test]
fn no_command_parses() {
    let args = CliArgs::parse_from(["gql-result-cache"]);
    assert!(args.command.is_none());
}
