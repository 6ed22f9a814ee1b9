use clap::{Args, Parser, Subcommand, ValueEnum};
use densel::maps::settings::MapStyle;
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    version,
    about = "densel - drive an external crystallographic compute engine to load and contour density maps.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Path to a configuration file in TOML format.
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Set a specific configuration value, overriding the config file.
    /// Can be used multiple times. Example: -S maps.radius=20
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", global = true)]
    pub set_values: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load one map, contour it and report the resulting display buffers.
    Contour(ContourArgs),
    /// Send a list of command descriptors to the engine and print the replies.
    Exec(ExecArgs),
}

/// How to launch the compute engine.
#[derive(Args, Debug, Clone, Default)]
pub struct EngineArgs {
    /// Compute engine executable. Overrides `engine.program` from the config file.
    #[arg(short, long, value_name = "PROGRAM")]
    pub engine: Option<String>,

    /// Extra argument passed to the engine. Can be used multiple times.
    #[arg(long = "engine-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub engine_args: Vec<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleArg {
    Lines,
    Solid,
    LitLines,
}

impl From<StyleArg> for MapStyle {
    fn from(style: StyleArg) -> Self {
        match style {
            StyleArg::Lines => MapStyle::Lines,
            StyleArg::Solid => MapStyle::Solid,
            StyleArg::LitLines => MapStyle::LitLines,
        }
    }
}

/// Arguments for the `contour` subcommand.
#[derive(Args, Debug)]
pub struct ContourArgs {
    #[command(flatten)]
    pub engine: EngineArgs,

    /// Map to load: a local path or an http(s) URL.
    #[arg(short, long, required = true, value_name = "PATH_OR_URL")]
    pub map: String,

    /// Treat the map as a difference map instead of asking the engine.
    #[arg(short, long)]
    pub difference: bool,

    /// Amplitude column; together with --phi-column reads the map from MTZ reflections.
    #[arg(long, value_name = "LABEL", requires = "phi_column")]
    pub f_column: Option<String>,

    /// Phase column for MTZ input.
    #[arg(long, value_name = "LABEL", requires = "f_column")]
    pub phi_column: Option<String>,

    /// Contour level. Defaults to the level the engine suggests.
    #[arg(short, long, value_name = "FLOAT")]
    pub level: Option<f64>,

    /// Override `maps.radius` from the config file.
    #[arg(short, long, value_name = "ANGSTROM")]
    pub radius: Option<f64>,

    /// Override `maps.style` from the config file.
    #[arg(short, long, value_enum)]
    pub style: Option<StyleArg>,

    /// Also print a value histogram with this many bins.
    #[arg(long, value_name = "BINS")]
    pub histogram: Option<u32>,

    /// Write the engine's copy of the map to this path.
    #[arg(long, value_name = "PATH")]
    pub export: Option<PathBuf>,
}

/// Arguments for the `exec` subcommand.
#[derive(Args, Debug)]
pub struct ExecArgs {
    #[command(flatten)]
    pub engine: EngineArgs,

    /// JSON file holding an array of command descriptors.
    #[arg(long, required = true, value_name = "PATH")]
    pub commands: PathBuf,

    /// Send all commands as a single list request.
    #[arg(short, long)]
    pub batch: bool,

    /// Record mutating commands in the history.
    #[arg(short, long)]
    pub journal: bool,

    /// Export the recorded history as CSV to this path.
    #[arg(long, value_name = "PATH", requires = "journal")]
    pub history_csv: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn contour_parses_engine_and_map_options() {
        let cli = Cli::try_parse_from([
            "densel",
            "-vv",
            "contour",
            "--engine",
            "engine-worker",
            "--engine-arg",
            "--threads=2",
            "--map",
            "https://example.org/1abc.map",
            "--style",
            "lit-lines",
            "-S",
            "maps.radius=20",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.set_values, vec!["maps.radius=20"]);
        let Commands::Contour(args) = cli.command else {
            panic!("expected contour");
        };
        assert_eq!(args.engine.engine.as_deref(), Some("engine-worker"));
        assert_eq!(args.engine.engine_args, vec!["--threads=2"]);
        assert_eq!(args.style, Some(StyleArg::LitLines));
        assert!(!args.difference);
    }

    #[test]
    fn mtz_columns_must_be_given_together() {
        let result = Cli::try_parse_from([
            "densel", "contour", "--map", "a.mtz", "--f-column", "FWT",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn history_export_requires_journal() {
        let result = Cli::try_parse_from([
            "densel",
            "exec",
            "--commands",
            "cmds.json",
            "--history-csv",
            "h.csv",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn style_arg_maps_onto_map_style() {
        assert_eq!(MapStyle::from(StyleArg::Solid), MapStyle::Solid);
        assert_eq!(MapStyle::from(StyleArg::LitLines), MapStyle::LitLines);
    }
}
