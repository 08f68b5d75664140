use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use mediadupe::config::ScanConfig;
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

#[test]
fn test_config_load_defaults() {
    // Use figment directly without Env to avoid interference from other tests
    let figment = Figment::from(Serialized::defaults(ScanConfig::default()));
    let config: ScanConfig = figment.extract().unwrap();
    assert_eq!(config, ScanConfig::default());
}

#[test]
fn test_config_load_from_toml() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(
        &config_path,
        r#"
similarity_threshold = 9
io_threads = 2
histogram_min_similarity = 0.75
cache_path = "/tmp/mediadupe-test/cache.db"
"#,
    )
    .unwrap();

    let figment =
        Figment::from(Serialized::defaults(ScanConfig::default())).merge(Toml::file(&config_path));
    let config: ScanConfig = figment.extract().unwrap();

    assert_eq!(config.similarity_threshold, 9);
    assert_eq!(config.io_threads, 2);
    assert_eq!(config.histogram_min_similarity, Some(0.75));
    assert_eq!(
        config.cache_path,
        Some(PathBuf::from("/tmp/mediadupe-test/cache.db"))
    );
    // Untouched keys keep their defaults.
    assert_eq!(config.chunk_size, 32);
}

#[test]
fn test_config_env_overrides_file() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(&config_path, "chunk_size = 8\n").unwrap();

    std::env::set_var("MDTEST_CHUNK_SIZE", "64");
    let figment = Figment::from(Serialized::defaults(ScanConfig::default()))
        .merge(Toml::file(&config_path))
        .merge(Env::prefixed("MDTEST_"));
    let config: ScanConfig = figment.extract().unwrap();
    std::env::remove_var("MDTEST_CHUNK_SIZE");

    assert_eq!(config.chunk_size, 64);
}

#[test]
fn test_config_load_explicit_file_is_sanitized() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("custom.toml");
    fs::write(&config_path, "io_threads = 0\nsimilarity_threshold = 99\n").unwrap();

    let config = ScanConfig::load(Some(&config_path)).unwrap();

    assert_eq!(config.io_threads, 1);
    assert_eq!(config.similarity_threshold, 64);
}

#[test]
fn test_config_invalid_type_is_error() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("bad.toml");
    fs::write(&config_path, "chunk_size = \"lots\"\n").unwrap();

    let err = ScanConfig::load(Some(&config_path)).unwrap_err();
    assert!(format!("{:#}", err).contains("chunk_size"));
}

#[test]
fn test_config_toml_round_trip() {
    let config = ScanConfig {
        similarity_threshold: 7,
        cache_path: Some(PathBuf::from("/var/cache/md.db")),
        ..ScanConfig::default()
    };
    let rendered = config.to_toml().unwrap();

    let parsed: ScanConfig = Figment::from(Toml::string(&rendered)).extract().unwrap();
    assert_eq!(parsed, config);
}
