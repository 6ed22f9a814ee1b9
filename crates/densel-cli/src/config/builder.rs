use super::file::FileConfig;
use super::models::AppConfig;
use crate::cli::{EngineArgs, StyleArg};
use crate::error::{CliError, Result};
use clap::ValueEnum;
use densel::core::colour::Rgb;
use densel::engine::config::EngineConfigBuilder;
use densel::maps::settings::MapStyle;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Command-line values that take precedence over the `[maps]` section.
#[derive(Debug, Default, Clone, Copy)]
pub struct MapOverrides {
    pub radius: Option<f64>,
    pub style: Option<MapStyle>,
}

pub fn build_config(
    config_path: Option<&Path>,
    set_values: &[String],
    engine: &EngineArgs,
    overrides: MapOverrides,
) -> Result<AppConfig> {
    let file_config = match config_path {
        Some(path) => FileConfig::from_file(path)?,
        None => FileConfig::default(),
    };
    let mut file_config = apply_set_values(file_config, set_values)?;

    let engine_file = file_config.engine.take().unwrap_or_default();
    let engine_program = engine
        .engine
        .clone()
        .or(engine_file.program)
        .ok_or_else(|| {
            CliError::Config(
                "No compute engine given. Pass --engine or set `engine.program`.".to_string(),
            )
        })?;
    let engine_args = if engine.engine_args.is_empty() {
        engine_file.args.unwrap_or_default()
    } else {
        engine.engine_args.clone()
    };

    let channel_file = file_config.channel.take().unwrap_or_default();
    let maps_file = file_config.maps.take().unwrap_or_default();

    let mut builder = EngineConfigBuilder::new()
        .request_timeout(channel_file.request_timeout_ms.map(Duration::from_millis));
    if let Some(len) = channel_file.max_console_message_len {
        builder = builder.max_console_message_len(len);
    }
    if let Some(radius) = overrides.radius.or(maps_file.radius) {
        builder = builder.map_radius(radius);
    }
    if let Some(alpha) = maps_file.alpha {
        builder = builder.map_alpha(alpha);
    }
    if let Some(style) = overrides.style.or(maps_file.style) {
        builder = builder.map_style(style);
    }
    if let Some([r, g, b]) = maps_file.colour {
        builder = builder.map_colour(Rgb::new(r, g, b));
    }
    if let Some([r, g, b]) = maps_file.positive_colour {
        builder = builder.positive_colour(Rgb::new(r, g, b));
    }
    if let Some([r, g, b]) = maps_file.negative_colour {
        builder = builder.negative_colour(Rgb::new(r, g, b));
    }
    if let Some(multiplier) = maps_file.em_rmsd_multiplier {
        builder = builder.em_rmsd_multiplier(multiplier);
    }

    Ok(AppConfig {
        engine_program,
        engine_args,
        engine: builder.build()?,
    })
}

fn parse_value<T: FromStr>(key: &str, value: &str, kind: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| CliError::Config(format!("Invalid {} value for {}: {}", kind, key, value)))
}

fn parse_colour(key: &str, value: &str) -> Result<[f32; 3]> {
    let channels: Vec<f32> = value
        .split(',')
        .map(|c| parse_value(key, c.trim(), "colour channel"))
        .collect::<Result<_>>()?;
    <[f32; 3]>::try_from(channels).map_err(|_| {
        CliError::Config(format!(
            "Invalid colour for {}: '{}'. Expected R,G,B.",
            key, value
        ))
    })
}

fn parse_style(key: &str, value: &str) -> Result<MapStyle> {
    <StyleArg as ValueEnum>::from_str(value, true)
        .map(MapStyle::from)
        .map_err(|_| CliError::Config(format!("Invalid style for {}: {}", key, value)))
}

fn apply_set_values(mut config: FileConfig, set_values: &[String]) -> Result<FileConfig> {
    for kv_pair in set_values {
        let Some((key, value_str)) = kv_pair.split_once('=') else {
            return Err(CliError::Config(format!(
                "Invalid --set format: '{}'. Expected KEY=VALUE.",
                kv_pair
            )));
        };

        match key {
            "engine.program" => {
                config.engine.get_or_insert_with(Default::default).program =
                    Some(value_str.to_string());
            }
            "channel.max-console-message-len" => {
                config
                    .channel
                    .get_or_insert_with(Default::default)
                    .max_console_message_len = Some(parse_value(key, value_str, "integer")?);
            }
            "channel.request-timeout-ms" => {
                config
                    .channel
                    .get_or_insert_with(Default::default)
                    .request_timeout_ms = Some(parse_value(key, value_str, "integer")?);
            }
            "maps.radius" => {
                config.maps.get_or_insert_with(Default::default).radius =
                    Some(parse_value(key, value_str, "float")?);
            }
            "maps.alpha" => {
                config.maps.get_or_insert_with(Default::default).alpha =
                    Some(parse_value(key, value_str, "float")?);
            }
            "maps.style" => {
                config.maps.get_or_insert_with(Default::default).style =
                    Some(parse_style(key, value_str)?);
            }
            "maps.colour" => {
                config.maps.get_or_insert_with(Default::default).colour =
                    Some(parse_colour(key, value_str)?);
            }
            "maps.positive-colour" => {
                config.maps.get_or_insert_with(Default::default).positive_colour =
                    Some(parse_colour(key, value_str)?);
            }
            "maps.negative-colour" => {
                config.maps.get_or_insert_with(Default::default).negative_colour =
                    Some(parse_colour(key, value_str)?);
            }
            "maps.em-rmsd-multiplier" => {
                config
                    .maps
                    .get_or_insert_with(Default::default)
                    .em_rmsd_multiplier = Some(parse_value(key, value_str, "float")?);
            }
            _ => {
                return Err(CliError::Config(format!(
                    "Unsupported key for --set: '{}'",
                    key
                )));
            }
        }
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use densel::engine::config::{ConfigError, EngineConfig};
    use std::fs;
    use tempfile::tempdir;

    fn engine_args(program: Option<&str>) -> EngineArgs {
        EngineArgs {
            engine: program.map(str::to_string),
            engine_args: vec![],
        }
    }

    #[test]
    fn defaults_apply_when_nothing_is_configured() {
        let app = build_config(
            None,
            &[],
            &engine_args(Some("engine-worker")),
            MapOverrides::default(),
        )
        .unwrap();

        assert_eq!(app.engine_program, "engine-worker");
        assert!(app.engine_args.is_empty());
        assert_eq!(app.engine, EngineConfig::default());
    }

    #[test]
    fn missing_engine_is_a_config_error() {
        let result = build_config(None, &[], &engine_args(None), MapOverrides::default());
        assert!(matches!(result, Err(CliError::Config(_))));
    }

    #[test]
    fn file_values_are_overridden_by_set_and_cli() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("densel.toml");
        fs::write(
            &path,
            r#"
            [engine]
            program = "from-file"
            args = ["--stdio"]

            [channel]
            request-timeout-ms = 5000

            [maps]
            radius = 10.0
            alpha = 0.5
            style = "solid"
            "#,
        )
        .unwrap();

        let app = build_config(
            Some(&path),
            &["maps.alpha=0.75".to_string(), "maps.colour=1,0,0".to_string()],
            &engine_args(None),
            MapOverrides {
                radius: Some(22.0),
                style: None,
            },
        )
        .unwrap();

        assert_eq!(app.engine_program, "from-file");
        assert_eq!(app.engine_args, vec!["--stdio"]);
        assert_eq!(
            app.engine.channel.request_timeout,
            Some(Duration::from_millis(5000))
        );
        assert_eq!(app.engine.maps.radius, 22.0);
        assert_eq!(app.engine.maps.alpha, 0.75);
        assert_eq!(app.engine.maps.style, MapStyle::Solid);
        assert_eq!(app.engine.maps.colour, Rgb::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn cli_engine_args_replace_file_args() {
        let args = EngineArgs {
            engine: None,
            engine_args: vec!["--from-cli".to_string()],
        };
        let dir = tempdir().unwrap();
        let path = dir.path().join("densel.toml");
        fs::write(&path, "[engine]\nprogram = \"worker\"\nargs = [\"--from-file\"]\n").unwrap();

        let app = build_config(Some(&path), &[], &args, MapOverrides::default()).unwrap();
        assert_eq!(app.engine_args, vec!["--from-cli"]);
    }

    #[test]
    fn set_values_parse_styles_and_colours() {
        let config = apply_set_values(
            FileConfig::default(),
            &[
                "maps.style=lit-lines".to_string(),
                "maps.negative-colour=0.9, 0.1, 0.1".to_string(),
                "engine.program=worker".to_string(),
            ],
        )
        .unwrap();

        let maps = config.maps.unwrap();
        assert_eq!(maps.style, Some(MapStyle::LitLines));
        assert_eq!(maps.negative_colour, Some([0.9, 0.1, 0.1]));
        assert_eq!(config.engine.unwrap().program.as_deref(), Some("worker"));
    }

    #[test]
    fn malformed_set_values_are_rejected() {
        for bad in [
            "maps.radius",
            "maps.radius=wide",
            "maps.colour=1,0",
            "maps.style=dotted",
            "maps.unknown=1",
        ] {
            let result = apply_set_values(FileConfig::default(), &[bad.to_string()]);
            assert!(matches!(result, Err(CliError::Config(_))), "{}", bad);
        }
    }

    #[test]
    fn out_of_range_values_fail_validation() {
        let result = build_config(
            None,
            &["maps.alpha=1.5".to_string()],
            &engine_args(Some("worker")),
            MapOverrides::default(),
        );
        assert!(matches!(
            result,
            Err(CliError::InvalidConfig(ConfigError::InvalidParameter { name: "map_alpha", .. }))
        ));
    }
}
