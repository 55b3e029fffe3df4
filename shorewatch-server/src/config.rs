//! Configuration and boundary file loading.
//!
//! Configuration is read from `--config`, or from `config.json` in the user
//! configuration directory (`~/.config/shorewatch/` on Linux). Command line
//! flags override individual values afterwards.

use directories::ProjectDirs;
use log::{debug, info};
use shorewatch_core::geodata::{load_boundary_set, LoadOptions};
use shorewatch_core::{BoundarySet, ContainmentRule, MonitorConfig};
use std::fs;
use std::path::{Path, PathBuf};

use crate::{Cli, ServerError};

const CONFIG_FILE_NAME: &str = "config.json";

pub fn get_project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "shorewatch", "shorewatch")
}

/// Path of the configuration file to use, if any
pub fn config_path(args: &Cli) -> Option<PathBuf> {
    if let Some(path) = &args.config {
        return Some(path.clone());
    }
    let path = get_project_dirs()?.config_dir().join(CONFIG_FILE_NAME);
    if path.exists() {
        Some(path)
    } else {
        debug!("No configuration file at {}", path.display());
        None
    }
}

fn read_file(path: &Path) -> Result<String, ServerError> {
    fs::read_to_string(path).map_err(|source| ServerError::ReadFile {
        path: path.to_owned(),
        source,
    })
}

/// Load the monitor configuration and apply command line overrides
pub fn load_config(args: &Cli) -> Result<MonitorConfig, ServerError> {
    let mut config = match config_path(args) {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            MonitorConfig::from_json(&read_file(&path)?)?
        }
        None => MonitorConfig::default(),
    };
    apply_overrides(&mut config, args);
    config.validate()?;
    Ok(config)
}

pub fn apply_overrides(config: &mut MonitorConfig, args: &Cli) {
    let detector = &mut config.detector;
    if let Some(v) = args.exit_cooldown_ms {
        detector.exit_cooldown_ms = v;
    }
    if let Some(v) = args.enter_cooldown_ms {
        detector.enter_cooldown_ms = v;
    }
    if let Some(v) = args.proximity_cooldown_ms {
        detector.proximity_cooldown_ms = v;
    }
    if let Some(v) = args.proximity_inner_m {
        detector.proximity_inner_radius_m = v;
    }
    if let Some(v) = args.proximity_outer_m {
        detector.proximity_outer_radius_m = v;
    }
    if let Some(v) = args.backup_poll_ms {
        config.backup_poll_ms = v;
    }
    if args.any_boundary {
        config.containment_rule = ContainmentRule::AnyBoundary;
    }
}

/// Read and parse the boundary (and optional land) GeoJSON files
pub fn load_boundaries(boundaries: &Path, land: Option<&Path>) -> Result<BoundarySet, ServerError> {
    let boundary_json = read_file(boundaries)?;
    let land_json = match land {
        Some(path) => Some(read_file(path)?),
        None => None,
    };

    let set = load_boundary_set(&boundary_json, land_json.as_deref(), &LoadOptions::default())?;
    info!(
        "Loaded {} boundaries and {} land polygons",
        set.len(),
        set.land().len()
    );
    Ok(set)
}

/// Load the boundary files named on the command line
pub fn load_boundaries_for(args: &Cli) -> Result<BoundarySet, ServerError> {
    load_boundaries(&args.boundaries, args.land.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use shorewatch_core::ConfigError;
    use std::io::Write;

    const SQUARE: &str = r#"{
        "type": "FeatureCollection",
        "features": [{
            "type": "Feature",
            "properties": { "geoname": "Home EEZ" },
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]]
            }
        }]
    }"#;

    #[test]
    fn test_load_config_file_with_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "exitCooldownMs": 5000, "enterCooldownMs": 7000 }}"#).unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let args = Cli::parse_from([
            "shorewatch-server",
            "-b",
            "eez.geojson",
            "--config",
            &path,
            "--exit-cooldown-ms",
            "2000",
            "--any-boundary",
        ]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.detector.exit_cooldown_ms, 2000);
        assert_eq!(config.detector.enter_cooldown_ms, 7000);
        assert_eq!(config.containment_rule, ContainmentRule::AnyBoundary);
    }

    #[test]
    fn test_load_config_rejects_oversized_flash() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "flashDurationMs": 18446744073709551615, "flashIntervalMs": 1 }}"#).unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let args = Cli::parse_from(["shorewatch-server", "-b", "eez.geojson", "--config", &path]);
        assert!(matches!(
            load_config(&args),
            Err(ServerError::Config(ConfigError::FlashTooLong { .. }))
        ));
    }

    #[test]
    fn test_load_config_rejects_bad_band() {
        let args = Cli::parse_from([
            "shorewatch-server",
            "-b",
            "eez.geojson",
            "--config",
            "/nonexistent/shorewatch.json",
        ]);
        assert!(matches!(load_config(&args), Err(ServerError::ReadFile { .. })));

        let mut config = MonitorConfig::default();
        let args = Cli::parse_from([
            "shorewatch-server",
            "-b",
            "eez.geojson",
            "--proximity-outer-m",
            "10",
        ]);
        apply_overrides(&mut config, &args);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_boundaries() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SQUARE.as_bytes()).unwrap();

        let set = load_boundaries(file.path(), None).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.boundaries()[0].name, "Home EEZ");
        assert!(set.land().is_empty());
    }

    #[test]
    fn test_load_boundaries_missing_file() {
        let result = load_boundaries(Path::new("/nonexistent/eez.geojson"), None);
        assert!(matches!(result, Err(ServerError::ReadFile { .. })));
    }
}
