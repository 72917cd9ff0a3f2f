use std::path::PathBuf;

use bugs_core::EnvironmentConfig;

#[test]
fn test_deserialize_full_config() {
    let yaml_str = r#"
        file_name: builds/WorldOfBugs.x86_64
        worker_id: 1
        base_port: 6005
        seed: 1234
        no_graphics: true
        timeout_wait: 120
        additional_args: ["-screen-fullscreen", "0"]
        log_folder: results/logs
        display_width: 256
        display_height: 128
        quality_level: 0
        time_scale: 20.0
        debug: false
        num_areas: 4
    "#;
    let config = EnvironmentConfig::from_yaml_str(yaml_str).unwrap();
    assert_eq!(config.file_name, Some(PathBuf::from("builds/WorldOfBugs.x86_64")));
    assert_eq!(config.worker_id, 1);
    assert_eq!(config.base_port, Some(6005));
    assert_eq!(config.seed, Some(1234));
    assert!(config.no_graphics);
    assert_eq!(config.timeout_wait().as_secs(), 120);
    assert_eq!(config.log_folder, Some(PathBuf::from("results/logs")));
    assert_eq!((config.display_width, config.display_height), (256, 128));
    assert_eq!(config.quality_level, 0);
    assert_eq!(config.time_scale, 20.0);
    assert!(!config.debug);
    assert_eq!(config.num_areas, 4);
    assert!(config.side_channels.is_empty());
}

#[test]
fn test_serialize_round_trips_through_yaml() {
    let config = EnvironmentConfig {
        seed: Some(9),
        quality_level: 2,
        ..Default::default()
    };
    let yaml = serde_yaml::to_string(&config).unwrap();
    assert!(!yaml.contains("side_channels"));
    let back = EnvironmentConfig::from_yaml_str(&yaml).unwrap();
    assert_eq!(back.seed, Some(9));
    assert_eq!(back.quality_level, 2);
}
