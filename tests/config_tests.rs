use std::env;
use std::io::Write;
use std::time::Duration;

use agentroom::config::{ConfigError, OrchestrationConfig};
use agentroom::relationship::AnalyzerKind;
use agentroom::strategy::CharacterSelection;
use tempfile::NamedTempFile;

#[test]
fn test_defaults() {
    let config = OrchestrationConfig::default();
    assert_eq!(config.tick_interval(), Duration::from_secs(1));
    assert_eq!(config.max_ticks, None);
    assert_eq!(config.circular_max_rounds, 5);
    assert_eq!(config.max_discuss_rounds, 50);
    assert_eq!(config.discuss_tick_delay(), Duration::from_millis(300));
    assert_eq!(config.relationship_analyzer, AnalyzerKind::Heuristic);
    assert_eq!(config.character_selection, CharacterSelection::RoundRobin);
    assert!(config.llm_fact_extraction);
}

#[test]
fn test_partial_json_file_keeps_defaults() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "tick_interval_ms": 250,
            "max_ticks": 40,
            "relationship_analyzer": "llm",
            "character_selection": "least_recently_used",
            "some_future_field": true
        }}"#
    )
    .unwrap();

    let config = OrchestrationConfig::from_json_file(file.path()).unwrap();
    assert_eq!(config.tick_interval(), Duration::from_millis(250));
    assert_eq!(config.max_ticks, Some(40));
    assert_eq!(config.relationship_analyzer, AnalyzerKind::Llm);
    assert_eq!(config.character_selection, CharacterSelection::LeastRecentlyUsed);
    assert_eq!(config.circular_max_rounds, 5);
}

#[test]
fn test_invalid_json_is_a_parse_error() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{{ not json").unwrap();
    assert!(matches!(
        OrchestrationConfig::from_json_file(file.path()),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn test_zero_tick_interval_is_rejected() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, r#"{{ "tick_interval_ms": 0 }}"#).unwrap();
    match OrchestrationConfig::from_json_file(file.path()) {
        Err(ConfigError::InvalidValue { key, value }) => {
            assert_eq!(key, "tick_interval_ms");
            assert_eq!(value, "0");
        }
        other => panic!("expected invalid value, got {:?}", other),
    }
    assert!(OrchestrationConfig::default().validate().is_ok());
}

#[test]
fn test_missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.json");
    assert!(matches!(
        OrchestrationConfig::from_json_file(&missing),
        Err(ConfigError::Io(_))
    ));
}

// Environment variables are process-wide, so every env case lives in this one test.
#[test]
fn test_environment_overrides() {
    env::set_var("AGENTROOM_MAX_DISCUSS_ROUNDS", "7");
    env::set_var("AGENTROOM_RELATIONSHIP_ANALYZER", "llm");
    env::set_var("AGENTROOM_CHARACTER_SELECTION", "lru");
    env::set_var("AGENTROOM_SUMMARY_MAX_ROUNDS", "3");

    let config = OrchestrationConfig::from_env().unwrap();
    assert_eq!(config.max_discuss_rounds, 7);
    assert_eq!(config.relationship_analyzer, AnalyzerKind::Llm);
    assert_eq!(config.character_selection, CharacterSelection::LeastRecentlyUsed);
    assert_eq!(config.summary_max_rounds, Some(3));
    assert_eq!(config.tick_interval_ms, 1_000);

    env::set_var("AGENTROOM_TICK_INTERVAL_MS", "soon");
    match OrchestrationConfig::from_env() {
        Err(ConfigError::InvalidValue { key, value }) => {
            assert_eq!(key, "AGENTROOM_TICK_INTERVAL_MS");
            assert_eq!(value, "soon");
        }
        other => panic!("expected invalid value, got {:?}", other),
    }

    env::set_var("AGENTROOM_TICK_INTERVAL_MS", "0");
    assert!(matches!(
        OrchestrationConfig::from_env(),
        Err(ConfigError::InvalidValue { .. })
    ));

    for key in [
        "AGENTROOM_MAX_DISCUSS_ROUNDS",
        "AGENTROOM_RELATIONSHIP_ANALYZER",
        "AGENTROOM_CHARACTER_SELECTION",
        "AGENTROOM_SUMMARY_MAX_ROUNDS",
        "AGENTROOM_TICK_INTERVAL_MS",
    ] {
        env::remove_var(key);
    }
}
