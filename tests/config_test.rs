use rescue::config::{BalancerKind, Config, MAX_TTL};

#[test]
fn config_defaults_are_valid() {
    let config = Config::default();
    assert_eq!(config.worker.len(), 8);
    assert_eq!(config.ttl, 30);
    assert_eq!(config.queue, "rescue");
    assert_eq!(config.database, None);
    assert_eq!(config.balancer, BalancerKind::Fairness);
    assert_eq!(config.ttl().num_seconds(), 30);
    assert_eq!(config.retention().num_seconds(), 3600);
}

#[test]
fn config_from_toml_overrides_defaults() {
    let config = Config::from_toml(
        r#"
        worker = "w1"
        ttl = 5
        queue = "jobs"
        database = "/tmp/rescue.db"
        balancer = "fairness"
        "#,
    )
    .unwrap();

    assert_eq!(config.worker, "w1");
    assert_eq!(config.ttl, 5);
    assert_eq!(config.queue, "jobs");
    assert_eq!(
        config.database.as_deref(),
        Some(std::path::Path::new("/tmp/rescue.db"))
    );
    assert_eq!(config.log_level, "info");
}

#[test]
fn config_from_toml_rejects_bad_values() {
    assert!(Config::from_toml("ttl = 0").is_err());
    assert!(Config::from_toml(r#"queue = """#).is_err());
    assert!(Config::from_toml(r#"balancer = "roundrobin""#).is_err());
    assert!(Config::from_toml("ttl = \"soon\"").is_err());
    assert!(Config::from_toml("ttl = 9223372036854775807").is_err());
    assert!(Config::from_toml(&format!("ttl = {}", MAX_TTL + 1)).is_err());
    assert!(Config::from_toml("ttl = 60\nretention = 30").is_err());
    assert_eq!(
        Config::from_toml(&format!("ttl = {MAX_TTL}\nretention = {MAX_TTL}"))
            .unwrap()
            .ttl()
            .num_seconds(),
        MAX_TTL as i64
    );
}

#[test]
fn oversized_ttl_built_by_hand_is_clamped() {
    let config = Config {
        ttl: u64::MAX,
        ..Config::default()
    };
    assert_eq!(config.ttl().num_seconds(), MAX_TTL as i64);
}

#[test]
fn config_from_env_reads_rescue_vars() {
    // Env is process-global, so every env case lives in this one test.
    unsafe {
        std::env::set_var("RESCUE_WORKER", "env-worker");
        std::env::set_var("RESCUE_TTL", "12");
        std::env::set_var("RESCUE_QUEUE", "env-queue");
        std::env::remove_var("RESCUE_DATABASE");
    }

    let config = Config::from_env().unwrap();
    assert_eq!(config.worker, "env-worker");
    assert_eq!(config.ttl, 12);
    assert_eq!(config.queue, "env-queue");
    assert_eq!(config.database, None);

    unsafe {
        std::env::set_var("RESCUE_TTL", "twelve");
    }
    assert!(Config::from_env().is_err());

    unsafe {
        std::env::set_var("RESCUE_TTL", "18446744073709551615");
    }
    assert!(Config::from_env().is_err());

    unsafe {
        std::env::remove_var("RESCUE_WORKER");
        std::env::remove_var("RESCUE_TTL");
        std::env::remove_var("RESCUE_QUEUE");
    }
}

#[test]
fn config_from_missing_file_is_io_error() {
    let err = Config::from_file("/nonexistent/rescue.toml").unwrap_err();
    assert!(matches!(err, rescue::Error::Io(_)));
}
