use super::EngineSession;
use crate::cli::ContourArgs;
use crate::config::{self, MapOverrides};
use crate::error::{CliError, Result};
use crate::ui::UiEvent;
use densel::core::buffer::InMemoryRenderer;
use densel::maps::controller::{MapController, MapHistogram, MapState};
use densel::maps::settings::{MapStyle, MtzColumns};
use densel::maps::source::ByteSource;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{info, warn};

pub async fn run(
    args: ContourArgs,
    config_path: Option<&Path>,
    set_values: &[String],
    ui_sender: mpsc::Sender<UiEvent>,
) -> Result<()> {
    let overrides = MapOverrides {
        radius: args.radius,
        style: args.style.map(MapStyle::from),
    };
    let app = config::build_config(config_path, set_values, &args.engine, overrides)?;

    let session = EngineSession::connect(&app, ui_sender).await?;
    let renderer = Arc::new(Mutex::new(InMemoryRenderer::new()));
    let map = MapController::new(session.centre.clone(), renderer.clone());

    let result = contour(&map, &renderer, &args).await;

    if let Err(e) = map.dispose().await {
        warn!("Failed to release the map: {}", e);
    }
    session.close().await;
    result
}

fn parse_source(map: &str) -> ByteSource {
    if map.starts_with("http://") || map.starts_with("https://") {
        ByteSource::Url(map.to_string())
    } else {
        ByteSource::File(PathBuf::from(map))
    }
}

async fn contour(
    map: &MapController<InMemoryRenderer>,
    renderer: &Mutex<InMemoryRenderer>,
    args: &ContourArgs,
) -> Result<()> {
    let source = parse_source(&args.map);
    let is_difference = args.difference.then_some(true);
    println!("Loading {}...", source.name());

    match (&args.f_column, &args.phi_column) {
        (Some(f), Some(phi)) => {
            let mut columns = MtzColumns::new(f, phi);
            columns.is_difference = is_difference;
            map.load_mtz(source, columns).await?;
        }
        _ => map.load_map(source, is_difference).await?,
    }
    if map.state() != MapState::Loaded {
        return Err(CliError::Other(anyhow::anyhow!(
            "Map did not load (state {:?})",
            map.state()
        )));
    }

    if let Some(suggested) = map.suggested() {
        println!(
            "✓ Loaded '{}' as molecule {}: {} map, rmsd {:.4}, suggested level {:.4}",
            map.name(),
            map.molecule().unwrap_or(-1),
            if map.is_difference() { "difference" } else { "standard" },
            suggested.rmsd,
            suggested.contour_level,
        );
    }

    match args.level {
        Some(level) => map.set_contour_level(level).await?,
        None => map.draw_map_contour().await?,
    }
    info!("Contoured map at level {:.4}.", map.display().contour_level);
    print_buffers(&renderer.lock().unwrap_or_else(PoisonError::into_inner));

    if let Some(bins) = args.histogram {
        match map.histogram(bins).await? {
            Some(histogram) => print_histogram(&histogram),
            None => warn!("No histogram available for this map."),
        }
    }

    if let Some(path) = &args.export {
        let bytes = map
            .export_map()
            .await?
            .ok_or_else(|| CliError::Other(anyhow::anyhow!("Map export returned no data")))?;
        tokio::fs::write(path, &bytes).await?;
        println!("✓ Wrote {} bytes to {}", bytes.len(), path.display());
    }
    Ok(())
}

fn print_buffers(renderer: &InMemoryRenderer) {
    println!(
        "{} display buffer(s), {} build(s), {} draw(s)",
        renderer.buffer_count(),
        renderer.build_count(),
        renderer.draw_count()
    );
    for (id, buffer) in renderer.buffers_iter() {
        println!(
            "  {:?}: {:?}, {} vertices, {} indices{}",
            id,
            buffer.primitive,
            buffer.vertices.len() / 3,
            buffer.indices.len(),
            if buffer.transparent { ", transparent" } else { "" },
        );
    }
}

fn print_histogram(histogram: &MapHistogram) {
    let peak = histogram.counts.iter().copied().max().unwrap_or(0).max(1);
    for (i, count) in histogram.counts.iter().enumerate() {
        let lower = histogram.base + histogram.bin_width * i as f64;
        let width = (count * 40 / peak) as usize;
        println!("  {:>10.4} | {:<40} {}", lower, "#".repeat(width), count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_and_paths_become_matching_sources() {
        assert_eq!(
            parse_source("https://example.org/emd_1234.map"),
            ByteSource::Url("https://example.org/emd_1234.map".to_string())
        );
        assert_eq!(
            parse_source("maps/2fofc.map"),
            ByteSource::File(PathBuf::from("maps/2fofc.map"))
        );
    }
}
