//! tile_plan - print the tiling plan for a configuration
//!
//! Shows the computed tile size and each zone's crop rectangle, so a grid can be
//! checked before deploying it.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use tilewatch::{TilewatchConfig, TilingGeometry};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Configuration file; its camera and grid sections are used by default.
    #[arg(long, env = "TILEWATCH_CONFIG")]
    config: Option<PathBuf>,
    /// Frame width override.
    #[arg(long)]
    width: Option<u32>,
    /// Frame height override.
    #[arg(long)]
    height: Option<u32>,
    #[arg(long)]
    cols: Option<u32>,
    #[arg(long)]
    rows: Option<u32>,
    /// Overlap factor (>= 1.0).
    #[arg(long)]
    overlap: Option<f64>,
    /// Emit JSON instead of a table.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let cfg = TilewatchConfig::load_from(args.config.as_deref())?;
    let mut geometry = TilingGeometry::new(
        args.width.unwrap_or(cfg.camera.width),
        args.height.unwrap_or(cfg.camera.height),
        args.cols.unwrap_or(cfg.grid.cols),
        args.rows.unwrap_or(cfg.grid.rows),
        args.overlap.unwrap_or(cfg.grid.overlap),
    )?;
    if let Some(size) = cfg.grid.tile_size {
        geometry = geometry.with_tile_size(size)?;
    }

    if args.json {
        let zones: Vec<serde_json::Value> = (0..geometry.zone_count())
            .map(|id| {
                let crop = geometry.crop_rect(id)?;
                let (row, col) = geometry.cell_of(id)?;
                Ok(serde_json::json!({
                    "zone": id,
                    "row": row,
                    "col": col,
                    "left": crop.left,
                    "top": crop.top,
                    "right": crop.right(),
                    "bottom": crop.bottom(),
                }))
            })
            .collect::<Result<_>>()?;
        let plan = serde_json::json!({
            "frame_width": geometry.frame_width(),
            "frame_height": geometry.frame_height(),
            "cols": geometry.cols(),
            "rows": geometry.rows(),
            "overlap": geometry.overlap(),
            "tile_size": geometry.tile_size(),
            "zones": zones,
        });
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!(
        "{}x{} frame, {}x{} grid, overlap {:.2}: tile size {}px",
        geometry.frame_width(),
        geometry.frame_height(),
        geometry.cols(),
        geometry.rows(),
        geometry.overlap(),
        geometry.tile_size()
    );
    println!("zone  row  col   left    top  right bottom");
    for id in 0..geometry.zone_count() {
        let crop = geometry.crop_rect(id)?;
        let (row, col) = geometry.cell_of(id)?;
        let inactive = if cfg.grid.inactive_zones.contains(&id) {
            "  (inactive)"
        } else {
            ""
        };
        println!(
            "{:>4} {:>4} {:>4} {:>6} {:>6} {:>6} {:>6}{}",
            id,
            row,
            col,
            crop.left,
            crop.top,
            crop.right(),
            crop.bottom(),
            inactive
        );
    }
    Ok(())
}
