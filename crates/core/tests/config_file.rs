//! Integration tests for loading `viewer.toml` from disk.

use std::path::PathBuf;

use viewer_core::{Error, PresentMode, ViewerConfig};

/// Unique per-test path in the system temp directory.
fn temp_config(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("viewer-{}-{}.toml", name, std::process::id()))
}

#[test]
fn test_missing_file_yields_defaults() {
    let path = temp_config("missing");
    let _ = std::fs::remove_file(&path);

    let config = ViewerConfig::load(&path).unwrap();
    assert_eq!(config, ViewerConfig::default());
}

#[test]
fn test_load_file_from_disk() {
    let path = temp_config("valid");
    std::fs::write(
        &path,
        r#"
        [window]
        title = "Triangle"
        width = 1024
        height = 768

        [surface]
        present_mode = "immediate"

        [render]
        clear_color = [0.1, 0.2, 0.3, 1.0]
        shader_dir = "/tmp/shaders"
        "#,
    )
    .unwrap();

    let config = ViewerConfig::load(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(config.window.title, "Triangle");
    assert_eq!(config.window.width, 1024);
    assert_eq!(config.window.height, 768);
    assert_eq!(config.surface.present_mode, PresentMode::Immediate);
    assert_eq!(config.render.clear_color, [0.1, 0.2, 0.3, 1.0]);
    assert_eq!(config.render.shader_dir, Some(PathBuf::from("/tmp/shaders")));
}

#[test]
fn test_malformed_file_reports_its_path() {
    let path = temp_config("malformed");
    std::fs::write(&path, "[window\nwidth = ").unwrap();

    let result = ViewerConfig::load(&path);
    std::fs::remove_file(&path).unwrap();

    match result {
        Err(Error::ConfigParse { path: reported, .. }) => assert_eq!(reported, path),
        other => panic!("expected a parse error, got {:?}", other),
    }
}

#[test]
fn test_invalid_values_are_rejected() {
    let path = temp_config("invalid");
    std::fs::write(&path, "[window]\nheight = 0\n").unwrap();

    let result = ViewerConfig::load(&path);
    std::fs::remove_file(&path).unwrap();

    assert!(matches!(result, Err(Error::Config(_))));
}
