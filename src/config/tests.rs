use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.public_port = Some(4000);
    raw.logging.level = Some("info".to_string());
    raw.rollout.percentage = Some(10);

    let overrides = ServeOverrides {
        public_port: Some(4321),
        log_level: Some("debug".to_string()),
        rollout_percentage: Some(25),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.public_addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.rollout.percentage, 25);
}

#[test]
fn defaults_are_safe_for_a_first_deploy() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert!(settings.cache.enabled);
    assert_eq!(settings.rollout.percentage, 0);
    assert_eq!(settings.cache.default_max_age_days, DEFAULT_MAX_AGE_DAYS);
    assert_eq!(settings.cache.min_coverage.get(), 1);
    assert_eq!(settings.cache.coalesce_precision, 4);
    assert!(settings.database.url.is_none());
    assert!(settings.refresh.interval.is_none());
    assert_eq!(settings.refresh.max_age_days, 7);
    assert_eq!(settings.refresh.pacing, Duration::from_millis(100));
    assert!((settings.provider.unit_cost - DEFAULT_PROVIDER_UNIT_COST).abs() < f64::EPSILON);
    assert_eq!(settings.provider.base_url, DEFAULT_PROVIDER_BASE_URL);
}

#[test]
fn rollout_percentage_above_one_hundred_is_rejected() {
    let mut raw = RawSettings::default();
    raw.rollout.percentage = Some(101);

    let err = Settings::from_raw(raw).expect_err("invalid percentage");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "rollout.percentage",
            ..
        }
    ));
}

#[test]
fn zero_min_coverage_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.min_coverage = Some(0);

    let err = Settings::from_raw(raw).expect_err("invalid coverage");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.min_coverage",
            ..
        }
    ));
}

#[test]
fn provider_base_url_must_be_http() {
    let mut raw = RawSettings::default();
    raw.provider.base_url = Some("ftp://places.example".to_string());
    assert!(Settings::from_raw(raw).is_err());

    let mut raw = RawSettings::default();
    raw.provider.base_url = Some("http://127.0.0.1:9000/v1/".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.provider.base_url, "http://127.0.0.1:9000/v1");
}

#[test]
fn negative_unit_cost_is_rejected() {
    let mut raw = RawSettings::default();
    raw.provider.unit_cost = Some(-0.5);
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn provider_debug_output_redacts_the_api_key() {
    let mut raw = RawSettings::default();
    raw.provider.api_key = Some("secret-key".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");

    let rendered = format!("{:?}", settings.provider);
    assert!(!rendered.contains("secret-key"));
    assert!(rendered.contains("<redacted>"));
}

#[test]
fn blank_database_url_means_in_memory() {
    let mut raw = RawSettings::default();
    raw.database.url = Some("   ".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.database.url.is_none());
}

#[test]
fn refresh_interval_enables_the_background_task() {
    let mut raw = RawSettings::default();
    raw.apply_serve_overrides(&ServeOverrides {
        refresh_interval_seconds: Some(3_600),
        ..Default::default()
    });
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.refresh.interval, Some(Duration::from_secs(3_600)));
}

#[test]
fn refresh_age_beyond_ten_years_is_rejected() {
    let mut raw = RawSettings::default();
    raw.refresh.max_age_days = Some(u32::MAX);
    let err = Settings::from_raw(raw).expect_err("age out of range");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "refresh.max_age_days",
            ..
        }
    ));

    let mut raw = RawSettings::default();
    raw.cache.default_max_age_days = Some(3_651);
    assert!(Settings::from_raw(raw).is_err());

    let mut raw = RawSettings::default();
    raw.refresh.max_age_days = Some(3_650);
    let settings = Settings::from_raw(raw).expect("upper bound is accepted");
    assert_eq!(settings.refresh.max_age_days, 3_650);
}

#[test]
fn kill_switch_can_be_flipped_from_the_cli() {
    let args = CliArgs::parse_from(["placecache", "serve", "--cache-enabled", "off"]);
    let Some(Command::Serve(serve)) = args.command else {
        panic!("wrong command parsed");
    };

    let mut raw = RawSettings::default();
    raw.apply_serve_overrides(&serve.overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(!settings.cache.enabled);
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn shared_listener_addresses_are_rejected() {
    let mut raw = RawSettings::default();
    raw.server.public_port = Some(3000);
    raw.server.admin_port = Some(3000);
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["placecache"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_refresh_arguments() {
    let args = CliArgs::parse_from([
        "placecache",
        "refresh",
        "--database-url",
        "postgres://example",
        "--batch-limit",
        "25",
    ]);

    let Some(Command::Refresh(refresh)) = args.command else {
        panic!("wrong command parsed");
    };
    assert_eq!(
        refresh.database.database_url.as_deref(),
        Some("postgres://example")
    );

    let mut raw = RawSettings::default();
    raw.apply_refresh_overrides(&refresh);
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.refresh.batch_limit.get(), 25);
    assert_eq!(
        settings.database.url.as_deref(),
        Some("postgres://example")
    );
}

#[test]
fn parse_ledger_report_arguments() {
    let args = CliArgs::parse_from(["placecache", "ledger-report", "--days", "30", "--json"]);

    match args.command.expect("ledger-report command") {
        Command::LedgerReport(report) => {
            assert_eq!(report.days, 30);
            assert!(report.json);
            assert!(report.database.database_url.is_none());
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn ledger_report_days_are_bounded() {
    assert!(CliArgs::try_parse_from(["placecache", "ledger-report", "--days", "0"]).is_err());
    let args = CliArgs::parse_from(["placecache", "ledger-report"]);
    let Some(Command::LedgerReport(report)) = args.command else {
        panic!("wrong command parsed");
    };
    assert_eq!(report.days, 7);
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "placecache",
        "serve",
        "--server-host",
        "0.0.0.0",
        "--database-url",
        "postgres://override",
        "--provider-timeout-ms",
        "1500",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
            assert_eq!(
                serve.overrides.database_url.as_deref(),
                Some("postgres://override")
            );
            assert_eq!(serve.overrides.provider.timeout_ms, Some(1500));
        }
        _ => panic!("wrong command parsed"),
    }
}
