use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use clap::{Parser, Subcommand};
use formats::kml::{RenderableShape, ShapeGeometry};
use formats::{GeoJsonCollector, Session, SessionConfig, Wkt};
use runtime::clock::FrameClock;
use runtime::diagnostics::Diagnostic;
use streaming::fetch::FsFetcher;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Inspect KML, KMZ and WKT sources")]
struct Args {
    /// Session configuration as JSON (missing fields use defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Also write the rendered shapes as a GeoJSON FeatureCollection
    #[arg(long)]
    geojson: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load a KML or KMZ document, resolve its styles and list its shapes
    Kml {
        /// Path of the document; relative hrefs resolve against it
        path: String,

        /// Frames to run so remote styles and network links can settle
        #[arg(long, default_value_t = 8)]
        ticks: u32,

        /// Simulated seconds per frame
        #[arg(long, default_value_t = 0.25)]
        frame_s: f64,
    },

    /// Parse a WKT geometry from a file or from --text
    Wkt {
        path: Option<PathBuf>,

        #[arg(long)]
        text: Option<String>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
        None => SessionConfig::default(),
    };

    match args.command {
        Command::Kml {
            path,
            ticks,
            frame_s,
        } => inspect_kml(&path, config, ticks, frame_s, args.geojson.as_deref()),
        Command::Wkt { path, text } => {
            let text = match (text, path) {
                (Some(text), _) => text,
                (None, Some(path)) => fs::read_to_string(path)?,
                (None, None) => return Err("wkt needs a path or --text".into()),
            };
            inspect_wkt(&text, args.geojson.as_deref())
        }
    }
}

fn inspect_kml(
    location: &str,
    config: SessionConfig,
    ticks: u32,
    frame_s: f64,
    geojson: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let clock = FrameClock::new(frame_s);
    let mut session = Session::with_clock(Rc::new(FsFetcher::new()), config, Rc::new(clock.clone()));

    let pending = session.load(location);
    let document = session.run_until(pending)?;
    info!(location, hash = %document.content_hash(), "document loaded");

    // Rendering requests styles and linked documents; ticking lets them land.
    for _ in 0..ticks {
        let mut frame: Vec<RenderableShape> = Vec::new();
        session.render(&document, &mut frame);
        clock.next_frame();
        let summary = session.tick();
        if !summary.refreshed.is_empty() {
            info!(frame = clock.frame_index(), refreshed = ?summary.refreshed, "refreshed links");
        }
    }

    let mut shapes: Vec<RenderableShape> = Vec::new();
    session.render(&document, &mut shapes);

    println!("{location}");
    println!("  content hash: {}", document.content_hash());
    if let Some(archive) = document.archive() {
        println!("  archive entries: {}", archive.entry_names().join(", "));
    }
    println!("  schemas: {}", document.schemas().len());
    println!("  shapes: {}", shapes.len());
    for shape in &shapes {
        print_shape(shape);
    }

    let mut diagnostics = document.diagnostics();
    diagnostics.extend(session.diagnostics());
    print_diagnostics(&diagnostics);

    println!("  cache:");
    for (event, value) in session.cache_metrics().iter() {
        println!("    {event}: {value}");
    }

    if let Some(out) = geojson {
        let mut collector = GeoJsonCollector::new();
        session.render(&document, &mut collector);
        write_geojson(out, &collector)?;
    }
    Ok(())
}

fn inspect_wkt(text: &str, geojson: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let wkt = Wkt::parse(text)?;
    println!("{}", wkt.geometry.type_name());
    if let Some(srid) = wkt.srid {
        println!("  srid: {srid}");
    }
    println!("  dimension: {:?}", wkt.dimension);

    let mut shapes: Vec<RenderableShape> = Vec::new();
    wkt.render(&mut shapes);
    println!("  shapes: {}", shapes.len());
    for shape in &shapes {
        print_shape(shape);
    }

    if let Some(out) = geojson {
        let mut collector = GeoJsonCollector::new();
        wkt.render(&mut collector);
        write_geojson(out, &collector)?;
    }
    Ok(())
}

fn print_shape(shape: &RenderableShape) {
    let name = shape.name.as_deref().unwrap_or("(unnamed)");
    let kind = match &shape.geometry {
        ShapeGeometry::Geometry(geometry) => geometry.type_name(),
        ShapeGeometry::Overlay { .. } => "Overlay",
    };
    let normal = &shape.attributes.normal;
    let highlighted = &shape.attributes.highlighted;
    println!(
        "    {kind:<14} {name}  line {} x{}  fill {}  highlight line {}",
        normal.shape.outline_color,
        normal.shape.outline_width,
        normal.shape.interior_color,
        highlighted.shape.outline_color,
    );
    for (key, value) in &shape.properties {
        println!("      {key} = {value}");
    }
}

fn print_diagnostics(diagnostics: &[Diagnostic]) {
    if diagnostics.is_empty() {
        return;
    }
    println!("  diagnostics:");
    for d in diagnostics {
        println!("    [{:?}] {}: {}", d.severity, d.kind, d.message);
    }
}

fn write_geojson(out: &Path, collector: &GeoJsonCollector) -> Result<(), Box<dyn std::error::Error>> {
    fs::write(out, collector.to_string_pretty()?)?;
    info!(path = %out.display(), features = collector.len(), "wrote GeoJSON");
    Ok(())
}
