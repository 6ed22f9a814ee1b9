use super::EngineSession;
use crate::cli::ExecArgs;
use crate::config::{self, MapOverrides};
use crate::error::{CliError, Result};
use crate::ui::UiEvent;
use densel::engine::centre::CommandCentre;
use densel::engine::command::CommandDescriptor;
use densel::engine::protocol::Reply;
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{error, info};

pub async fn run(
    args: ExecArgs,
    config_path: Option<&Path>,
    set_values: &[String],
    ui_sender: mpsc::Sender<UiEvent>,
) -> Result<()> {
    let app = config::build_config(
        config_path,
        set_values,
        &args.engine,
        MapOverrides::default(),
    )?;
    let descriptors = read_descriptors(&args.commands)?;
    info!(
        "Read {} command(s) from {:?}",
        descriptors.len(),
        &args.commands
    );

    let session = EngineSession::connect(&app, ui_sender).await?;
    let failures = if args.batch {
        run_batch(&session.centre, descriptors, args.journal).await
    } else {
        run_each(&session.centre, descriptors, args.journal).await
    };

    let console = session.centre.console_log();
    if !console.is_empty() {
        println!("Engine console:\n{}", console.trim_end());
    }

    let exported = match &args.history_csv {
        Some(path) => export_history(&session.centre, path),
        None => Ok(()),
    };
    session.close().await;
    exported?;

    if failures > 0 {
        return Err(CliError::Other(anyhow::anyhow!(
            "{} command(s) failed",
            failures
        )));
    }
    Ok(())
}

fn read_descriptors(path: &Path) -> Result<Vec<CommandDescriptor>> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| CliError::FileParsing {
        path: path.to_path_buf(),
        source: e.into(),
    })
}

fn print_reply(command: &str, reply: &Reply) {
    println!("✓ {} -> {}", command, reply.result);
}

async fn run_each(
    centre: &CommandCentre,
    descriptors: Vec<CommandDescriptor>,
    journal: bool,
) -> usize {
    let mut failures = 0;
    for descriptor in descriptors {
        let command = descriptor.command.clone();
        match centre.command(descriptor, journal).await {
            Ok(reply) => print_reply(&command, &reply),
            Err(e) => {
                error!("'{}' failed: {}", command, e);
                eprintln!("✗ {}: {}", command, e);
                failures += 1;
            }
        }
    }
    failures
}

async fn run_batch(
    centre: &CommandCentre,
    descriptors: Vec<CommandDescriptor>,
    journal: bool,
) -> usize {
    let label = format!("command list ({})", descriptors.len());
    match centre.command_list(descriptors, journal).await {
        Ok(reply) => {
            print_reply(&label, &reply);
            0
        }
        Err(e) => {
            error!("{} failed: {}", label, e);
            eprintln!("✗ {}: {}", label, e);
            1
        }
    }
}

fn export_history(centre: &CommandCentre, path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)?;
    let history = centre.history();
    history
        .export_csv(file)
        .map_err(|e| CliError::Other(e.into()))?;
    println!(
        "✓ Wrote {} history entr{} to {}",
        history.len(),
        if history.len() == 1 { "y" } else { "ies" },
        path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use densel::engine::protocol::{CommandArg, ReturnShape};
    use serde_json::json;

    #[test]
    fn descriptors_are_read_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commands.json");
        std::fs::write(
            &path,
            json!([
                {
                    "command": "sharpen_blur_map",
                    "return_shape": "status",
                    "args": [
                        {"kind": "value", "value": 0},
                        {"kind": "value", "value": -20.0}
                    ],
                    "changes_molecules": true
                },
                {"command": "get_map_rmsd_approx", "return_shape": "float"}
            ])
            .to_string(),
        )
        .unwrap();

        let descriptors = read_descriptors(&path).unwrap();
        assert_eq!(descriptors.len(), 2);
        assert!(descriptors[0].changes_molecules);
        assert_eq!(descriptors[0].args[1], CommandArg::Value(json!(-20.0)));
        assert_eq!(descriptors[1].return_shape, ReturnShape::Float);
        assert!(descriptors[1].args.is_empty());
    }

    #[test]
    fn malformed_command_file_reports_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commands.json");
        std::fs::write(&path, "[{\"command\": 1}]").unwrap();

        assert!(matches!(
            read_descriptors(&path),
            Err(CliError::FileParsing { .. })
        ));
    }
}
