use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use image::{DynamicImage, GenericImageView};
use photo_zukan::crop::{build_cards_from, decode_image, ObjectCard, Thumbnail};
use photo_zukan::error::AnalysisError;
use photo_zukan::gemini::{GeminiClient, DEFAULT_ENDPOINT};
use photo_zukan::geometry::DisplaySize;
use photo_zukan::model::{AnalysisResult, DetectedObject, ModelKind};
use photo_zukan::session::{AnalyzeOutcome, Session, MSG_NO_OBJECTS};
use photo_zukan::{files, overlay, request};
use serde_json::{json, Value};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const RESULT_META_VERSION: u32 = 1;

#[derive(Parser, Debug)]
#[command(
    name = "photo-zukan",
    version,
    about = "Detect objects in a photo with a vision model and build an illustrated card for each"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    log_json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send an image to the vision model and write overlay, cards and result JSON
    Analyze(AnalyzeArgs),
    /// Re-render the box overlay from a saved result for another display size
    Overlay(OverlayArgs),
    /// Regenerate object crops from a saved result
    Crop(CropArgs),
    /// Print the prompt and structured-output schema sent to the model
    Schema(SchemaArgs),
}

#[derive(Args, Debug, Clone, Copy, Default)]
struct DisplayArgs {
    /// Displayed image width in logical pixels (height follows the aspect ratio when omitted)
    #[arg(long, value_parser = parse_dimension)]
    display_width: Option<f64>,
    /// Displayed image height in logical pixels
    #[arg(long, value_parser = parse_dimension)]
    display_height: Option<f64>,
}

fn parse_dimension(raw: &str) -> Result<f64, String> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("not a number: {raw}"))?;
    if !value.is_finite() || value <= 0.0 {
        return Err(format!("must be a positive finite number: {raw}"));
    }
    Ok(value)
}

impl DisplayArgs {
    fn resolve(&self, natural_w: u32, natural_h: u32) -> DisplaySize {
        match (self.display_width, self.display_height) {
            (Some(w), Some(h)) => DisplaySize::new(w, h),
            (Some(w), None) => DisplaySize::fit_width(natural_w, natural_h, w),
            (None, Some(h)) => {
                let fitted = DisplaySize::fit_width(natural_h, natural_w, h);
                DisplaySize::new(fitted.height, h)
            }
            (None, None) => DisplaySize::natural(natural_w, natural_h),
        }
    }

    fn is_set(&self) -> bool {
        self.display_width.is_some() || self.display_height.is_some()
    }
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    /// Input image (JPEG, PNG, GIF or WebP)
    image: PathBuf,
    /// Gemini API key (- to read it from stdin)
    #[arg(long)]
    api_key: String,
    /// Model variant
    #[arg(long, value_enum, default_value_t = ModelKind::Flash)]
    model: ModelKind,
    /// What to look for in the image
    #[arg(long, default_value = request::DEFAULT_TARGET)]
    target: String,
    /// API base URL
    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    endpoint: String,
    /// Output directory (default: .photo-zukan/<timestamp>)
    #[arg(long)]
    out_dir: Option<PathBuf>,
    #[command(flatten)]
    display: DisplayArgs,
    /// Inline the source image as the SVG background
    #[arg(long, action = ArgAction::SetTrue)]
    embed_image: bool,
    /// Print the result JSON to stdout instead of its path
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Args, Debug)]
struct OverlayArgs {
    /// Image the result was produced from
    image: PathBuf,
    /// result.json written by `analyze`
    #[arg(long)]
    result: PathBuf,
    /// Output SVG path (default: overlay.svg next to the result)
    #[arg(long)]
    out: Option<PathBuf>,
    #[command(flatten)]
    display: DisplayArgs,
    /// Inline the source image as the SVG background
    #[arg(long, action = ArgAction::SetTrue)]
    embed_image: bool,
    /// Also burn the boxes into a PNG at natural resolution
    #[arg(long)]
    png: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct CropArgs {
    /// Image the result was produced from
    image: PathBuf,
    /// result.json written by `analyze`
    #[arg(long)]
    result: PathBuf,
    /// Directory for card PNGs (default: cards/ next to the result)
    #[arg(long)]
    out_dir: Option<PathBuf>,
    /// Include each crop as a PNG data URI in the printed JSON
    #[arg(long, action = ArgAction::SetTrue)]
    inline: bool,
}

#[derive(Args, Debug)]
struct SchemaArgs {
    /// Target interpolated into the prompt
    #[arg(long, default_value = request::DEFAULT_TARGET)]
    target: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json);

    if let Err(err) = run(cli.command).await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Analyze(args) => command_analyze(args).await,
        Commands::Overlay(args) => command_overlay(args),
        Commands::Crop(args) => command_crop(args),
        Commands::Schema(args) => command_schema(args),
    }
}

async fn command_analyze(args: AnalyzeArgs) -> Result<()> {
    if !args.image.exists() {
        bail!("input not found: {}", args.image.display());
    }
    let image_uri = files::load_image_data_uri(&args.image)?;
    let api_key = files::read_api_key(&args.api_key)?;

    let mut session = Session::new(api_key, args.model, args.target.clone());
    session.select_image(image_uri);

    let client = GeminiClient::new(args.endpoint.as_str());
    match session.analyze(&client).await {
        AnalyzeOutcome::Detected(count) => info!(count, "objects detected"),
        AnalyzeOutcome::NoObjects => eprintln!("{MSG_NO_OBJECTS}"),
        AnalyzeOutcome::Failed(message) => bail!("{message}"),
        AnalyzeOutcome::NoImage | AnalyzeOutcome::Busy => bail!("analysis did not run"),
    }

    let result = session.result.clone().unwrap_or_default();
    let image_uri = session.selected_image.as_deref().unwrap_or_default();
    let out_dir = args.out_dir.clone().unwrap_or_else(files::default_out_dir);

    let report = write_outputs(
        &out_dir,
        &OutputContext {
            input_path: &args.image,
            image_uri,
            model: args.model,
            target: &args.target,
            display: args.display,
            embed_image: args.embed_image,
        },
        &result,
    )?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", files::abs_path(&out_dir.join("result.json")).display());
    }
    Ok(())
}

struct OutputContext<'a> {
    input_path: &'a Path,
    image_uri: &'a str,
    model: ModelKind,
    target: &'a str,
    display: DisplayArgs,
    embed_image: bool,
}

/// Writes overlay.svg, annotated.png, cards/ and result.json into `out_dir`.
///
/// An undecodable source is not fatal: cards stay placeholders and the
/// raster overlay is skipped.
fn write_outputs(out_dir: &Path, ctx: &OutputContext<'_>, result: &AnalysisResult) -> Result<Value> {
    let decoded = decode_image(ctx.image_uri);
    let natural = decoded.as_ref().ok().map(|img| img.dimensions());

    let cards = build_cards_from(&decoded, &result.objects);
    let cards_dir = out_dir.join("cards");
    let card_items = write_cards(&cards, &cards_dir, false)?;

    let svg_path = out_dir.join("overlay.svg");
    let display = match natural {
        Some((w, h)) => Some(ctx.display.resolve(w, h)),
        None if ctx.display.is_set() => Some(ctx.display.resolve(0, 0)),
        None => None,
    };
    let svg_written = match display.and_then(|d| {
        overlay::render_svg(&result.objects, d, ctx.embed_image.then_some(ctx.image_uri))
    }) {
        Some(svg) => {
            files::write_text_file(&svg_path, &svg)?;
            true
        }
        None => {
            warn!("display size unknown, overlay.svg skipped");
            false
        }
    };

    let png_path = out_dir.join("annotated.png");
    let png_written = match &decoded {
        Ok(img) => {
            save_raster(img, &result.objects, &png_path)?;
            true
        }
        Err(_) => false,
    };

    let report = json!({
        "result_meta_version": RESULT_META_VERSION,
        "generated_at": files::timestamp_iso(),
        "input_path": files::abs_path(ctx.input_path).display().to_string(),
        "model": ctx.model.model_id(),
        "target": ctx.target,
        "size": natural.map(|(w, h)| json!({"width": w, "height": h, "units": "px"})),
        "status": if result.is_empty() { "no_objects" } else { "detected" },
        "message": if result.is_empty() { json!(MSG_NO_OBJECTS) } else { Value::Null },
        "objects": card_items,
        "outputs": {
            "overlay_svg": svg_written.then(|| files::abs_path(&svg_path).display().to_string()),
            "annotated_png": png_written.then(|| files::abs_path(&png_path).display().to_string()),
            "cards_dir": files::abs_path(&cards_dir).display().to_string(),
        },
    });
    files::write_json_pretty(&out_dir.join("result.json"), &report)?;
    Ok(report)
}

fn save_raster(img: &DynamicImage, objects: &[DetectedObject], path: &Path) -> Result<()> {
    let rendered = overlay::render_raster(&img.to_rgba8(), objects);
    files::ensure_parent_dir(path)?;
    DynamicImage::ImageRgba8(rendered)
        .save(path)
        .with_context(|| format!("failed to save overlay image: {}", path.display()))
}

fn write_cards(cards: &[ObjectCard], dir: &Path, inline: bool) -> Result<Vec<Value>> {
    let mut items = Vec::with_capacity(cards.len());
    for card in cards {
        let path = dir.join(format!("card-{:02}.png", card.index + 1));
        if let Thumbnail::Ready(crop) = &card.thumbnail {
            files::write_bytes(&path, &crop.png)?;
        }
        let mut item = card_meta_item(card, &path);
        if let (true, Thumbnail::Ready(crop)) = (inline, &card.thumbnail) {
            item["thumbnail"]["data_uri"] = json!(crop.to_data_uri());
        }
        items.push(item);
    }
    Ok(items)
}

fn card_meta_item(card: &ObjectCard, path: &Path) -> Value {
    let thumbnail = match &card.thumbnail {
        Thumbnail::Ready(crop) => json!({
            "status": "ready",
            "path": files::abs_path(path).display().to_string(),
            "crop": crop.rect,
        }),
        Thumbnail::Placeholder { reason } => json!({
            "status": "placeholder",
            "reason": reason,
        }),
    };
    json!({
        "index": card.index,
        "name": card.object.name,
        "description": card.object.description,
        "box_2d": card.object.box_2d,
        "thumbnail": thumbnail,
    })
}

fn load_result(path: &Path) -> Result<AnalysisResult> {
    let value = files::load_json(path)?;
    serde_json::from_value(value)
        .with_context(|| format!("not an analysis result: {}", path.display()))
}

fn sibling_of(result_path: &Path, name: &str) -> PathBuf {
    result_path
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join(name)
}

fn command_overlay(args: OverlayArgs) -> Result<()> {
    let result = load_result(&args.result)?;
    let img = image::open(&args.image)
        .with_context(|| format!("failed to open input image: {}", args.image.display()))?;
    let (w, h) = img.dimensions();
    let display = args.display.resolve(w, h);

    let href = if args.embed_image {
        Some(files::load_image_data_uri(&args.image)?)
    } else {
        None
    };
    let Some(svg) = overlay::render_svg(&result.objects, display, href.as_deref()) else {
        bail!("display size is empty: {}x{}", display.width, display.height);
    };

    let out = args
        .out
        .clone()
        .unwrap_or_else(|| sibling_of(&args.result, "overlay.svg"));
    files::write_text_file(&out, &svg)?;
    if let Some(png) = &args.png {
        save_raster(&img, &result.objects, png)?;
    }

    println!("{}", files::abs_path(&out).display());
    Ok(())
}

fn command_crop(args: CropArgs) -> Result<()> {
    let result = load_result(&args.result)?;
    let decoded = match files::load_image_data_uri(&args.image) {
        Ok(uri) => decode_image(&uri),
        Err(err) => Err(AnalysisError::Resource(format!("{err:#}"))),
    };
    if let Err(err) = &decoded {
        eprintln!("{}", err.user_message());
    }

    let cards = build_cards_from(&decoded, &result.objects);
    let ready = cards.iter().filter(|c| c.thumbnail.is_ready()).count();
    info!(ready, total = cards.len(), "cards built");
    let dir = args
        .out_dir
        .clone()
        .unwrap_or_else(|| sibling_of(&args.result, "cards"));
    let items = write_cards(&cards, &dir, args.inline)?;

    println!("{}", serde_json::to_string_pretty(&json!({ "cards": items }))?);
    Ok(())
}

fn command_schema(args: SchemaArgs) -> Result<()> {
    let models: Vec<&str> = [ModelKind::Flash, ModelKind::Pro]
        .into_iter()
        .map(ModelKind::model_id)
        .collect();
    let payload = json!({
        "prompt": request::build_prompt(&args.target),
        "response_schema": request::response_schema(),
        "models": models,
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}
