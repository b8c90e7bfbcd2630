//! VisionML CLI
//!
//! Runs the selection, background removal and inpainting tools on image
//! files. Each image becomes a one-layer document; the tools run on the work
//! queue exactly as they would inside an editor.

use super::backend_factory::CliBackendFactory;
use super::config::CliConfigBuilder;
use crate::config::{BackendKind, VisionConfig};
use crate::document::{CanvasId, ColorModel, Document, Layer, PaintDevice};
use crate::manager::BackendManager;
use crate::models::VisionTask;
use crate::queue::WorkQueue;
use crate::reporter::{error_channel, ErrorReceiver};
use crate::selection::{SelectionAction, SelectionOptions};
use crate::services::{ImageIOService, ProgressTracker};
use crate::session::{ImageInput, SampleLayersMode, SegmentationMode, SegmentationSession};
use crate::tools::{
    BackgroundRemovalConfig, BackgroundRemovalFilter, BackgroundRemovalTask, InpaintTask,
    SegmentationTool,
};
use crate::tracing_config::init_cli_tracing;
use crate::types::{Extent, Point, Rect};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use image::DynamicImage;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use walkdir::WalkDir;

/// AI-assisted selection, background removal and inpainting
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "visionml")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Application data directory holding `models/`
    #[arg(long, value_name = "PATH", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Directory holding `settings.json`
    #[arg(long, value_name = "PATH", global = true)]
    pub config_dir: Option<PathBuf>,

    /// Context pixels added around an inpainting mask
    #[arg(long, default_value_t = 64, global = true)]
    pub inpaint_padding: u32,

    /// Minimum inpainting region size per axis
    #[arg(long, default_value_t = 512, global = true)]
    pub inpaint_min_size: u32,

    /// Images smaller than this are skipped by background removal
    #[arg(long, default_value_t = 64, global = true)]
    pub min_size: u32,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Select the object under a point and write the selection mask
    SegmentPoint {
        #[command(flatten)]
        target: SegmentTarget,
        /// Point in image coordinates
        #[arg(long, allow_hyphen_values = true)]
        x: i32,
        #[arg(long, allow_hyphen_values = true)]
        y: i32,
    },
    /// Select the object inside a box and write the selection mask
    SegmentBox {
        #[command(flatten)]
        target: SegmentTarget,
        /// Box as `x,y,width,height`
        #[arg(long, value_parser = parse_rect)]
        rect: Rect,
    },
    /// Make the background of images transparent
    RemoveBackground {
        /// Input files or directories
        #[arg(value_name = "INPUT", required = true)]
        input: Vec<PathBuf>,
        /// Output file (single input) or directory
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Process directories recursively
        #[arg(short, long)]
        recursive: bool,
        /// Only set alpha, keep the original edge colors
        #[arg(long)]
        no_foreground_estimation: bool,
        /// Background removal model file
        #[arg(short, long)]
        model: Option<String>,
    },
    /// Fill the masked area of an image
    Inpaint {
        input: PathBuf,
        /// Mask image; bright pixels are filled
        #[arg(long)]
        mask: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Inpainting model file
        #[arg(short, long)]
        model: Option<String>,
    },
    /// List installed models or choose the model for a task
    Models {
        /// Task to configure
        #[arg(long, requires = "set")]
        task: Option<CliTask>,
        /// Model file name to use for `--task`
        #[arg(long, requires = "task")]
        set: Option<String>,
    },
    /// Show execution providers or switch the compute backend
    Backend {
        #[arg(long, value_enum)]
        set: Option<CliBackend>,
    },
}

#[derive(Args, Debug)]
pub struct SegmentTarget {
    input: PathBuf,
    /// Output mask file
    #[arg(short, long)]
    output: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = CliMode::Fast)]
    mode: CliMode,
    /// How the mask combines with `--selection`
    #[arg(long, value_enum, default_value_t = CliAction::Replace)]
    action: CliAction,
    /// Existing selection mask to combine with
    #[arg(long)]
    selection: Option<PathBuf>,
    /// Grow (positive) or shrink (negative) the mask, in pixels
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    grow: i32,
    #[arg(long, default_value_t = 0)]
    feather: u32,
    #[arg(long)]
    anti_alias: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliMode {
    Fast,
    Precise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliAction {
    Replace,
    Add,
    Subtract,
    Intersect,
    SymmetricDifference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliTask {
    Segmentation,
    Inpainting,
    BackgroundRemoval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliBackend {
    Cpu,
    Gpu,
}

impl From<CliMode> for SegmentationMode {
    fn from(mode: CliMode) -> Self {
        match mode {
            CliMode::Fast => Self::Fast,
            CliMode::Precise => Self::Precise,
        }
    }
}

impl From<CliAction> for SelectionAction {
    fn from(action: CliAction) -> Self {
        match action {
            CliAction::Replace => Self::Replace,
            CliAction::Add => Self::Add,
            CliAction::Subtract => Self::Subtract,
            CliAction::Intersect => Self::Intersect,
            CliAction::SymmetricDifference => Self::SymmetricDifference,
        }
    }
}

impl From<CliTask> for VisionTask {
    fn from(task: CliTask) -> Self {
        match task {
            CliTask::Segmentation => Self::Segmentation,
            CliTask::Inpainting => Self::Inpainting,
            CliTask::BackgroundRemoval => Self::BackgroundRemoval,
        }
    }
}

impl From<CliBackend> for BackendKind {
    fn from(backend: CliBackend) -> Self {
        match backend {
            CliBackend::Cpu => Self::Cpu,
            CliBackend::Gpu => Self::Gpu,
        }
    }
}

fn parse_rect(value: &str) -> std::result::Result<Rect, String> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    let [x, y, w, h] = parts.as_slice() else {
        return Err(format!("expected x,y,width,height, got '{value}'"));
    };
    let int = |s: &str| s.parse::<i32>().map_err(|e| format!("invalid number '{s}': {e}"));
    let size = |s: &str| s.parse::<u32>().map_err(|e| format!("invalid size '{s}': {e}"));
    Ok(Rect::new(int(x)?, int(y)?, size(w)?, size(h)?))
}

/// Manager, queue and error channel shared by one CLI run
struct Runtime {
    config: VisionConfig,
    manager: Arc<BackendManager>,
    queue: WorkQueue,
    errors: ErrorReceiver,
}

impl Runtime {
    fn new(cli: &Cli) -> Result<Self> {
        let config = CliConfigBuilder::from_cli(cli)?;
        let paths = config.model_paths().context("Failed to locate the model directory")?;
        let store = CliConfigBuilder::settings_store(cli)?;
        let manager = BackendManager::new(CliBackendFactory::create(), store, paths)
            .context("Failed to initialize the inference backend")?;
        let (reporter, errors) = error_channel(config.error_channel_capacity);
        let queue = WorkQueue::spawn(reporter).context("Failed to start the work queue")?;
        Ok(Self {
            config,
            manager: Arc::new(manager),
            queue,
            errors,
        })
    }

    /// Wait for all queued work and turn reported failures into an error
    fn finish(&mut self) -> Result<()> {
        self.queue.wait_for_done().context("Work queue stopped unexpectedly")?;
        let failures = self.errors.drain();
        if failures.is_empty() {
            return Ok(());
        }
        for failure in &failures {
            log::error!("❌ {failure}");
        }
        anyhow::bail!(
            "{} operation(s) failed: {}",
            failures.len(),
            failures
                .iter()
                .map(|f| f.message.as_str())
                .collect::<Vec<_>>()
                .join("; ")
        )
    }
}

pub fn main() -> Result<()> {
    let cli = Cli::parse();
    let session_id = uuid::Uuid::new_v4().to_string();
    init_cli_tracing(cli.verbose, Some(session_id)).context("Failed to initialize tracing")?;
    CliConfigBuilder::validate_cli(&cli).context("Invalid CLI arguments")?;

    let start = Instant::now();
    match &cli.command {
        Command::SegmentPoint { target, x, y } => {
            segment(&cli, target, Shape::Point(Point::new(*x, *y)))?;
        },
        Command::SegmentBox { target, rect } => segment(&cli, target, Shape::Rect(*rect))?,
        Command::RemoveBackground {
            input,
            output,
            recursive,
            no_foreground_estimation,
            model,
        } => remove_background(
            &cli,
            input,
            output.as_deref(),
            *recursive,
            !*no_foreground_estimation,
            model.as_deref(),
        )?,
        Command::Inpaint {
            input,
            mask,
            output,
            model,
        } => inpaint(&cli, input, mask, output.as_deref(), model.as_deref())?,
        Command::Models { task, set } => models(&cli, *task, set.as_deref())?,
        Command::Backend { set } => backend(&cli, *set)?,
    }
    info!("Done in {:.2}s", start.elapsed().as_secs_f64());
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum Shape {
    Point(Point),
    Rect(Rect),
}

/// Load `path` into a one-layer document
fn load_document(path: &Path) -> Result<(Arc<Document>, Layer)> {
    let image = ImageIOService::load_image(path)
        .with_context(|| format!("Failed to load image: {}", path.display()))?
        .to_rgba8();
    let document = Arc::new(Document::new(Extent::new(image.width(), image.height())));
    let device = PaintDevice::from_rgba_image(ColorModel::Bgra8, &image, Point::new(0, 0));
    let name = path
        .file_stem()
        .map_or_else(|| "Background".to_string(), |s| s.to_string_lossy().into_owned());
    let layer = Layer::paint(name, device);
    document.add_layer(layer.clone());
    Ok((document, layer))
}

fn segment(cli: &Cli, target: &SegmentTarget, shape: Shape) -> Result<()> {
    let mut runtime = Runtime::new(cli)?;
    let (document, layer) = load_document(&target.input)?;

    if let Some(path) = &target.selection {
        let mask = ImageIOService::load_mask(path)
            .with_context(|| format!("Failed to load selection: {}", path.display()))?;
        let mut selection = crate::selection::PixelSelection::new(document.bounds());
        for (x, y, px) in mask.enumerate_pixels() {
            selection.set_value(Point::new(x as i32, y as i32), px.0[0]);
        }
        document.set_selection(Some(selection));
    }

    let session = Arc::new(SegmentationSession::new(Arc::clone(&runtime.manager)));
    let tool = SegmentationTool::new(
        match shape {
            Shape::Point(_) => crate::tools::SegmentationShape::Point,
            Shape::Rect(_) => crate::tools::SegmentationShape::Box,
        },
        session,
        runtime.queue.handle(),
    );
    tool.set_mode(target.mode.into());

    let input = ImageInput::new(CanvasId::new(), layer.id(), Arc::clone(&document))
        .with_sample_layers(SampleLayersMode::CurrentLayer);
    let options = SelectionOptions::default()
        .with_action(target.action.into())
        .with_grow(target.grow)
        .with_feather(target.feather)
        .with_anti_alias(target.anti_alias);

    match shape {
        Shape::Point(point) => {
            tool.process_image(&input)?;
            tool.click(&input, point, options)?;
        },
        Shape::Rect(rect) => {
            tool.begin_shape(&input)?;
            tool.finish_rect(&input, rect, options)?;
        },
    }
    runtime.finish()?;

    let mask = document
        .selection()
        .map_or_else(|| image::GrayImage::new(document.size().width, document.size().height), |s| {
            s.mask().clone()
        });
    if mask.pixels().all(|p| p.0[0] == 0) {
        warn!("⚠️ Nothing was selected");
    }

    let output = target
        .output
        .clone()
        .unwrap_or_else(|| generate_output_path(&target.input, "mask"));
    ImageIOService::save_image(&DynamicImage::ImageLuma8(mask), &output)
        .with_context(|| format!("Failed to save mask: {}", output.display()))?;
    println!("✅ Selection mask written to {}", output.display());
    Ok(())
}

fn remove_background(
    cli: &Cli,
    inputs: &[PathBuf],
    output: Option<&Path>,
    recursive: bool,
    foreground_estimation: bool,
    model: Option<&str>,
) -> Result<()> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            files.extend(find_image_files(input, recursive));
        } else {
            files.push(input.clone());
        }
    }
    if files.is_empty() {
        warn!("No supported image files found in the provided inputs");
        return Ok(());
    }
    files.sort();

    let output_dir = match output {
        Some(path) if files.len() > 1 => {
            if path.is_file() {
                anyhow::bail!(
                    "Output path exists and is a file, not a directory: {}",
                    path.display()
                );
            }
            std::fs::create_dir_all(path)
                .with_context(|| format!("Failed to create output directory: {}", path.display()))?;
            Some(path.to_path_buf())
        },
        _ => None,
    };

    let mut runtime = Runtime::new(cli)?;
    let filter = Arc::new(BackgroundRemovalFilter::new(
        Arc::clone(&runtime.manager),
        runtime.config.min_background_removal_size,
    ));
    let mut config = BackgroundRemovalConfig {
        foreground_estimation,
        ..filter.default_configuration()
    };
    if let Some(model) = model {
        config.model = model.to_string();
    }
    filter
        .apply_configuration(&config)
        .context("Failed to apply background removal configuration")?;

    let progress_bar = (files.len() > 1).then(|| {
        let pb = ProgressBar::new(files.len() as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    });

    let mut failed = 0usize;
    for file in &files {
        if let Some(pb) = &progress_bar {
            pb.set_message(format!("Processing {}", file.display()));
        }
        let (_, layer) = load_document(file)?;
        let progress = if cli.verbose > 0 {
            ProgressTracker::console("Background removal", true)
        } else {
            ProgressTracker::no_op()
        };
        runtime.queue.submit(Box::new(BackgroundRemovalTask::new(
            Arc::clone(&filter),
            layer.device(),
            config.clone(),
            progress,
        )))?;

        match runtime.finish() {
            Ok(()) => {
                let target = match (&output_dir, output) {
                    (Some(dir), _) => dir.join(output_file_name(file, "nobg")),
                    (None, Some(path)) => path.to_path_buf(),
                    (None, None) => generate_output_path(file, "nobg"),
                };
                save_layer(&layer, &target)?;
                info!("✅ {} -> {}", file.display(), target.display());
            },
            Err(e) => {
                failed += 1;
                warn!("❌ {}: {e:#}", file.display());
            },
        }
        if let Some(pb) = &progress_bar {
            pb.inc(1);
        }
    }
    if let Some(pb) = progress_bar {
        pb.finish_with_message("Done");
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} image(s) failed", files.len());
    }
    println!("✅ Processed {} image(s)", files.len());
    Ok(())
}

fn inpaint(cli: &Cli, input: &Path, mask: &Path, output: Option<&Path>, model: Option<&str>) -> Result<()> {
    let mut runtime = Runtime::new(cli)?;
    if let Some(model) = model {
        runtime
            .manager
            .set_model_name(VisionTask::Inpainting, model)
            .context("Invalid inpainting model name")?;
    }

    let (document, layer) = load_document(input)?;
    let mask = ImageIOService::load_mask(mask)
        .with_context(|| format!("Failed to load mask: {}", mask.display()))?;
    let size = document.size();
    if mask.width() != size.width || mask.height() != size.height {
        anyhow::bail!(
            "Mask is {}x{} but the image is {}x{}",
            mask.width(),
            mask.height(),
            size.width,
            size.height
        );
    }

    let task = InpaintTask::new(
        Arc::clone(&runtime.manager),
        runtime.config.inpaint,
        mask,
        layer.clone(),
        document.selection(),
    )?;
    runtime.queue.submit(Box::new(task))?;
    runtime.finish()?;

    let target = output.map_or_else(|| generate_output_path(input, "inpainted"), Path::to_path_buf);
    save_layer(&layer, &target)?;
    println!("✅ Inpainted image written to {}", target.display());
    Ok(())
}

fn models(cli: &Cli, task: Option<CliTask>, set: Option<&str>) -> Result<()> {
    let runtime = Runtime::new(cli)?;
    if let (Some(task), Some(name)) = (task, set) {
        runtime
            .manager
            .set_model_name(task.into(), name)
            .context("Failed to change model")?;
    }

    println!("📦 Models in {}", runtime.manager.paths().root().display());
    for task in VisionTask::ALL {
        let current = runtime.manager.model_name(task);
        println!("\n{task}:");
        let available = runtime.manager.available_models(task);
        if available.is_empty() {
            println!("  (none installed, expected {current})");
        }
        for name in available {
            let marker = if name == current { "*" } else { " " };
            println!("  {marker} {name}");
        }
    }
    Ok(())
}

fn backend(cli: &Cli, set: Option<CliBackend>) -> Result<()> {
    let runtime = Runtime::new(cli)?;
    if let Some(kind) = set {
        runtime
            .manager
            .set_backend(kind.into())
            .context("Failed to switch backend")?;
    }

    println!("🔍 Execution Providers");
    for (name, available, description) in CliBackendFactory::providers() {
        let status = if available { "✅ Available" } else { "❌ Not Available" };
        println!("  • {name}: {status} - {description}");
    }
    println!(
        "\n🚀 Current backend: {} ({})",
        runtime.manager.backend(),
        runtime.manager.device_description()
    );
    Ok(())
}

fn save_layer(layer: &Layer, path: &Path) -> Result<()> {
    let device = layer.read_device()?;
    let image = device.to_rgba8(device.bounds());
    ImageIOService::save_image(&DynamicImage::ImageRgba8(image), path)
        .with_context(|| format!("Failed to save result: {}", path.display()))
}

fn find_image_files(dir: &Path, recursive: bool) -> Vec<PathBuf> {
    let walker = WalkDir::new(dir).max_depth(if recursive { usize::MAX } else { 1 });
    walker
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|path| ImageIOService::is_supported_format(path))
        .collect()
}

fn output_file_name(input: &Path, suffix: &str) -> String {
    let stem = input.file_stem().map_or_else(|| "output".into(), |s| s.to_string_lossy());
    format!("{stem}_{suffix}.png")
}

fn generate_output_path(input: &Path, suffix: &str) -> PathBuf {
    input.with_file_name(output_file_name(input, suffix))
}
