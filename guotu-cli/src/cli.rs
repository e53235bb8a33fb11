//! CLI command definitions and implementations.
//!
//! Three commands:
//! - `convert`: read a layer from any source, write it to any target
//! - `inspect`: read a source and print a layer summary or JSON dump
//! - `engines`: show backend availability and supported formats

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use tracing::{info, warn};

use guotu::backend::postgis::{self, PgConnInfo};
use guotu::{
    read_layer, write_layer, BackendStatus, EnginePreference, EngineRegistry, Format,
    LayerMetadata, ReadRequest, WriteRequest,
};

use crate::config;

#[derive(Subcommand)]
pub enum Commands {
    /// Convert a layer between formats
    Convert(ConvertArgs),

    /// Read a source and print a layer summary
    Inspect(InspectArgs),

    /// Show backend availability and supported formats
    Engines,
}

#[derive(Args)]
pub struct ConvertArgs {
    /// Source: file path, FileGDB directory or PG: connection string
    pub input: String,

    /// Target: file path, FileGDB directory or PG: connection string
    pub output: String,

    /// Source format (inferred from the source when omitted)
    #[arg(long)]
    pub from: Option<Format>,

    /// Target format (inferred from the target when omitted)
    #[arg(long)]
    pub to: Option<Format>,

    /// Source layer or table name (required for PostGIS sources)
    #[arg(short, long)]
    pub layer: Option<String>,

    /// Target layer or table name (default: the source layer name)
    #[arg(long)]
    pub out_layer: Option<String>,

    /// SQL attribute filter on the source
    #[arg(long = "where", value_name = "CLAUSE")]
    pub where_clause: Option<String>,

    /// Spatial filter: min-x,min-y,max-x,max-y in source coordinates
    #[arg(long, value_name = "EXTENT")]
    pub bbox: Option<String>,

    /// Backend preference: auto, library or native
    #[arg(long, default_value = "auto")]
    pub engine: EnginePreference,

    /// Reproject into this CRS before writing
    #[arg(long)]
    pub wkid: Option<u32>,

    /// Gauss-Kruger zone number for TXT output
    #[arg(long)]
    pub zone: Option<i32>,

    /// JSON file with the TXT header metadata
    #[arg(long, value_name = "FILE")]
    pub metadata: Option<PathBuf>,

    /// Comma-separated attribute order for TXT output
    #[arg(long, value_name = "NAMES")]
    pub fields: Option<String>,

    /// FileGDB feature dataset to place the layer in
    #[arg(long)]
    pub feature_dataset: Option<String>,

    /// Delete existing rows in the target PostGIS table first
    #[arg(long)]
    pub replace: bool,

    /// Connection profile name for a bare PG: source or target
    #[arg(long)]
    pub profile: Option<String>,

    /// Profiles file
    #[arg(long, default_value = config::DEFAULT_PROFILES_FILE, value_name = "FILE")]
    pub profiles_file: PathBuf,
}

#[derive(Args)]
pub struct InspectArgs {
    /// Source: file path, FileGDB directory or PG: connection string
    pub input: String,

    /// Source format (inferred from the source when omitted)
    #[arg(long)]
    pub format: Option<Format>,

    /// Layer or table name (required for PostGIS sources)
    #[arg(short, long)]
    pub layer: Option<String>,

    /// Backend preference: auto, library or native
    #[arg(long, default_value = "auto")]
    pub engine: EnginePreference,

    /// Print the full layer model as JSON
    #[arg(long)]
    pub json: bool,

    /// Connection profile name for a bare PG: source
    #[arg(long)]
    pub profile: Option<String>,

    /// Profiles file
    #[arg(long, default_value = config::DEFAULT_PROFILES_FILE, value_name = "FILE")]
    pub profiles_file: PathBuf,
}

/// Runs the convert command
pub async fn cmd_convert(args: ConvertArgs) -> Result<()> {
    let started_at = std::time::Instant::now();

    let from = match args.from {
        Some(format) => format,
        None => infer_format(&args.input)?,
    };
    let to = match args.to {
        Some(format) => format,
        None => infer_format(&args.output)?,
    };
    let bbox = args.bbox.as_deref().map(parse_bbox).transpose()?;
    let field_names = args.fields.as_deref().map(parse_field_list);
    let metadata = args.metadata.as_deref().map(load_metadata).transpose()?;

    let source = resolve_side(&args.input, from, args.profile.as_deref(), &args.profiles_file)?;
    let target = resolve_side(&args.output, to, args.profile.as_deref(), &args.profiles_file)?;

    let registry = EngineRegistry::probe();

    println!("=== Convert ===");
    println!("Source: {} ({})", redact(&source), from);
    println!("Target: {} ({})", redact(&target), to);
    if let Some(layer) = &args.layer {
        println!("Layer: {}", layer);
    }
    if let Some(clause) = &args.where_clause {
        println!("Filter: {}", clause);
    }
    if let Some([min_x, min_y, max_x, max_y]) = bbox {
        println!("Extent: {} {} {} {}", min_x, min_y, max_x, max_y);
    }

    let mut request = ReadRequest::new(from, source);
    request.layer_name = args.layer.clone();
    request.where_clause = args.where_clause.clone();
    request.bbox = bbox;
    request.engine = args.engine;

    let layer = read_layer(&registry, &request)
        .await
        .with_context(|| format!("cannot read {}", redact(&args.input)))?;
    println!("Features read: {}", layer.features.len());

    if args.replace {
        if to == Format::PostGis {
            replace_target(&target, args.out_layer.as_deref(), &layer).await?;
        } else {
            warn!("--replace only applies to PostGIS targets, ignored");
        }
    }

    let mut write_request = WriteRequest::new(to, target);
    write_request.layer_name = args.out_layer.clone();
    write_request.engine = args.engine;
    write_request.target_wkid = args.wkid;
    write_request.zone = args.zone;
    write_request.metadata = metadata;
    write_request.field_names = field_names;
    write_request.feature_dataset = args.feature_dataset.clone();

    let written = write_layer(&registry, &layer, &write_request)
        .await
        .with_context(|| format!("cannot write {}", redact(&args.output)))?;

    println!("\n=== Summary ===");
    println!("Features read: {}", layer.features.len());
    println!("Features written: {}", written);
    if let Some(wkid) = args.wkid {
        println!("Target CRS: {}", wkid);
    }
    println!("Duration: {:.2?}", started_at.elapsed());

    info!(written, "Convert complete");
    Ok(())
}

/// Clears the target table before a convert, when it already exists
async fn replace_target(
    target: &str,
    out_layer: Option<&str>,
    layer: &guotu::Layer,
) -> Result<()> {
    let info: PgConnInfo = target.parse()?;
    let table = out_layer
        .or(layer.name.as_deref())
        .context("--replace needs a target table name")?;
    let pool = postgis::create_pool(&info).await?;
    if postgis::table_exists(&pool, &info.schema, table).await? {
        let removed = postgis::delete_features(&pool, &info.schema, table, None).await?;
        println!("Rows replaced: {}", removed);
    }
    Ok(())
}

/// Runs the inspect command
pub async fn cmd_inspect(args: InspectArgs) -> Result<()> {
    let format = match args.format {
        Some(format) => format,
        None => infer_format(&args.input)?,
    };
    let source = resolve_side(&args.input, format, args.profile.as_deref(), &args.profiles_file)?;

    let registry = EngineRegistry::probe();
    let mut request = ReadRequest::new(format, source);
    request.layer_name = args.layer.clone();
    request.engine = args.engine;

    let layer = read_layer(&registry, &request)
        .await
        .with_context(|| format!("cannot read {}", redact(&args.input)))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&layer)?);
        return Ok(());
    }

    println!("=== Layer {} ===", layer.name.as_deref().unwrap_or("(unnamed)"));
    if let Some(alias) = &layer.alias {
        println!("Alias: {}", alias);
    }
    println!("Format: {}", format);
    match layer.wkid {
        Some(wkid) => println!("CRS: {}", wkid),
        None => println!("CRS: (none)"),
    }
    if let Some(tolerance) = layer.tolerance {
        println!("Tolerance: {}", tolerance);
    }
    match layer.geometry_kind {
        Some(kind) => println!("Geometry: {}", kind.name()),
        None => println!("Geometry: (none)"),
    }
    println!("Features: {}", layer.features.len());

    println!("\nFields: {}", layer.fields.len());
    for field in &layer.fields {
        let mut line = format!("- {} ({:?}", field.name, field.kind);
        if let Some(length) = field.length {
            line.push_str(&format!(", {}", length));
        }
        line.push(')');
        if let Some(alias) = field.alias.as_deref().filter(|a| !a.is_empty()) {
            line.push_str(&format!(" {}", alias));
        }
        println!("{}", line);
    }

    if let Some(metadata) = &layer.metadata {
        println!("\nHeader:");
        let entries = [
            ("格式版本号", &metadata.format_version),
            ("数据产生单位", &metadata.producer),
            ("数据产生日期", &metadata.produced_date),
            ("坐标系", &metadata.crs_name),
            ("带号", &metadata.zone_number),
        ];
        for (label, value) in entries {
            if let Some(value) = value {
                println!("- {}: {}", label, value);
            }
        }
    }
    Ok(())
}

/// Runs the engines command
pub fn cmd_engines() {
    let registry = EngineRegistry::probe();
    println!("=== Backends ===");
    print_backend(&registry.library);
    print_backend(&registry.native);
}

fn print_backend(status: &BackendStatus) {
    let state = if status.available { "available" } else { "unavailable" };
    match &status.detail {
        Some(detail) => println!("{}: {} ({})", status.kind, state, detail),
        None => println!("{}: {}", status.kind, state),
    }
    let read: Vec<&str> = status.read.iter().map(|f| f.label()).collect();
    let write: Vec<&str> = status.write.iter().map(|f| f.label()).collect();
    println!("  read:  {}", read.join(", "));
    println!("  write: {}", write.join(", "));
}

/// Infers the format of a source or target specifier
fn infer_format(spec: &str) -> Result<Format> {
    if is_pg(spec) {
        return Ok(Format::PostGis);
    }
    let trimmed = spec.trim().trim_end_matches(&['/', '\\'][..]);
    let ext = Path::new(trimmed)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("shp") => Ok(Format::Shp),
        Some("json") | Some("geojson") => Ok(Format::GeoJson),
        Some("txt") => Ok(Format::Txt),
        Some("gdb") => Ok(Format::FileGdb),
        _ => bail!("cannot infer a format for '{}', pass --from/--to", spec.trim()),
    }
}

fn is_pg(spec: &str) -> bool {
    spec.trim_start()
        .get(..3)
        .map_or(false, |prefix| prefix.eq_ignore_ascii_case("pg:"))
}

/// Final connection or path string for one side of a convert.
///
/// PostGIS sides given as a bare `PG:` are filled from the named profile,
/// or from the `PG*` environment when no profile is given. An explicit
/// connection string always wins.
fn resolve_side(
    spec: &str,
    format: Format,
    profile: Option<&str>,
    profiles_file: &Path,
) -> Result<String> {
    if format != Format::PostGis {
        return Ok(spec.to_string());
    }
    let trimmed = spec.trim();
    let body = trimmed
        .get(3..)
        .filter(|_| is_pg(trimmed))
        .unwrap_or(trimmed);
    if !body.trim().is_empty() {
        if profile.is_some() {
            warn!("connection string given, --profile ignored");
        }
        return Ok(trimmed.to_string());
    }
    let info = match profile {
        Some(name) => config::resolve_profile(profiles_file, name)?,
        None => PgConnInfo::from_env(),
    };
    Ok(info.to_string())
}

/// Connection string safe for display: the password never appears
fn redact(spec: &str) -> String {
    if !is_pg(spec) {
        return spec.to_string();
    }
    match spec.parse::<PgConnInfo>() {
        Ok(info) => format!(
            "PG:host={} port={} dbname={} user={} active_schema={}",
            info.host, info.port, info.dbname, info.user, info.schema
        ),
        Err(_) => "PG:".to_string(),
    }
}

/// Parses `min-x,min-y,max-x,max-y`
fn parse_bbox(text: &str) -> Result<[f64; 4]> {
    let parts: Vec<f64> = text
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .with_context(|| format!("invalid bbox '{text}'"))?;
    if parts.len() != 4 {
        bail!("bbox needs four values: min-x,min-y,max-x,max-y");
    }
    if parts[0] > parts[2] || parts[1] > parts[3] {
        bail!("bbox minimum exceeds maximum");
    }
    Ok([parts[0], parts[1], parts[2], parts[3]])
}

fn parse_field_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

fn load_metadata(path: &Path) -> Result<LayerMetadata> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read metadata file {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("invalid metadata file {}", path.display()))
}
