use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;
use serde::Serialize;

use glyphcam::capture::{AnyCapture, CaptureProvider, CaptureSpec, FrameSource, ImageCapture};
use glyphcam::color::Rgb;
use glyphcam::config::{
    load_settings, ConfigProvider, FileConfig, FontStyle, Settings, SettingsOverrides,
    StaticConfig,
};
use glyphcam::error::find_pipeline_error;
use glyphcam::filter::FilterKind;
use glyphcam::palette::{
    emoji_set_names, palette_names, GlyphPalette, GlyphTableCache, GlyphTables,
};
use glyphcam::render_loop::{DisplayRefresh, RenderLoop, RunLimits, DEFAULT_REFRESH_HZ};
use glyphcam::sampler::process_frame;
use glyphcam::sink::{
    write_colored_lines, CanvasSink, FfplayWindow, RenderSink, SinkKind, TerminalSink, TextSink,
};

#[derive(Debug, Parser)]
#[command(name = "glyphcam")]
#[command(about = "Render a live camera as a character grid")]
#[command(version = env!("GLYPHCAM_VERSION"))]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Capture continuously and draw every frame.
    Run {
        /// camera | device:<name> | video:<path> | image:<path> | synthetic
        #[arg(long, default_value = "camera")]
        source: String,
        /// terminal | text | window
        #[arg(long, default_value = "terminal")]
        sink: String,
        /// Settings file, re-read whenever it changes.
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        max_frames: Option<u64>,
        /// Stop after this many seconds.
        #[arg(long)]
        duration: Option<f64>,
        #[command(flatten)]
        render: RenderArgs,
    },
    /// Convert a single image and print the grid.
    Frame {
        image: PathBuf,
        /// Emit ANSI truecolor escapes using the color mode.
        #[arg(long)]
        color: bool,
        #[arg(long)]
        config: Option<PathBuf>,
        #[command(flatten)]
        render: RenderArgs,
    },
    /// List built-in palettes and emoji sets.
    Palettes {
        #[arg(long)]
        json: bool,
    },
    /// Validate a settings file.
    Check { config: PathBuf },
}

#[derive(Debug, Clone, Args)]
struct RenderArgs {
    #[arg(long)]
    palette: Option<String>,
    #[arg(long)]
    custom_chars: Option<String>,
    #[arg(long)]
    emoji_set: Option<String>,
    /// monochrome | true_color | grayscale
    #[arg(long)]
    color_mode: Option<String>,
    #[arg(long)]
    filter: Option<FilterKind>,
    #[arg(long)]
    density: Option<u32>,
    #[arg(long)]
    cell_size: Option<u32>,
    #[arg(long)]
    glyph_size: Option<f32>,
    #[arg(long)]
    bold: bool,
    #[arg(long)]
    font: Option<PathBuf>,
    #[arg(long, value_parser = Rgb::from_hex)]
    foreground: Option<Rgb>,
    #[arg(long, value_parser = Rgb::from_hex)]
    background: Option<Rgb>,
    #[arg(long)]
    emoji_alpha: Option<f32>,
    #[arg(long)]
    fps: Option<f64>,
}

impl RenderArgs {
    fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            palette: self.palette.clone(),
            custom_chars: self.custom_chars.clone(),
            emoji_set: self.emoji_set.clone(),
            color_mode: self.color_mode.clone(),
            filter: self.filter,
            density: self.density,
            cell_size: self.cell_size,
            glyph_size: self.glyph_size,
            font_style: self.bold.then_some(FontStyle::Bold),
            font_path: self.font.clone(),
            foreground: self.foreground,
            background: self.background,
            emoji_alpha: self.emoji_alpha,
            fps: self.fps,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match dispatch(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            match find_pipeline_error(&error) {
                Some(pipeline) => eprintln!("error[{}]: {error:#}", pipeline.code()),
                None => eprintln!("error: {error:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .target(env_logger::Target::Stderr)
        .init();
}

fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Run {
            source,
            sink,
            config,
            max_frames,
            duration,
            render,
        } => {
            let limits = RunLimits {
                max_frames,
                max_duration: duration
                    .map(Duration::try_from_secs_f64)
                    .transpose()
                    .context("--duration must be a non-negative number of seconds")?,
            };
            run_live(&source, &sink, config.as_deref(), limits, &render)
        }
        Commands::Frame {
            image,
            color,
            config,
            render,
        } => run_frame(&image, color, config.as_deref(), &render),
        Commands::Palettes { json } => run_palettes(json),
        Commands::Check { config } => run_check(&config),
    }
}

fn resolve_settings(config: Option<&Path>, render: &RenderArgs) -> Result<Settings> {
    let mut settings = match config {
        Some(path) => load_settings(path)?,
        None => Settings::default(),
    };
    render.overrides().apply(&mut settings);
    Ok(settings)
}

fn run_live(
    source: &str,
    sink: &str,
    config: Option<&Path>,
    limits: RunLimits,
    render: &RenderArgs,
) -> Result<()> {
    let source_spec = CaptureSpec::parse(source)?;
    let sink_kind: SinkKind = sink.parse()?;

    let mut provider: Box<dyn ConfigProvider> = match config {
        Some(path) => Box::new(
            FileConfig::open(path, render.overrides())
                .with_context(|| format!("failed to load settings {}", path.display()))?,
        ),
        None => Box::new(StaticConfig(resolve_settings(None, render)?.resolve()?)),
    };
    let fps = provider.snapshot().fps();

    let sink: Box<dyn RenderSink> = match sink_kind {
        SinkKind::Terminal => Box::new(TerminalSink::new(io::stdout())),
        SinkKind::Text => Box::new(TextSink::new(io::stdout())),
        SinkKind::Window => Box::new(
            CanvasSink::new().with_presenter(FfplayWindow::new("glyphcam", fps.round() as u32)),
        ),
    };

    let mut render_loop =
        RenderLoop::new(AnyCapture::from_spec(&source_spec), provider, sink).with_limits(limits);
    render_loop
        .stop_handle()
        .register_signals()
        .context("failed to install signal handlers")?;

    let summary = render_loop
        .run(&mut DisplayRefresh::new(fps.max(DEFAULT_REFRESH_HZ)))
        .with_context(|| format!("capture from {} failed", source_spec.display_label()))?;
    drop(render_loop);

    info!(
        "rendered {} frame(s), skipped {} tick(s){}",
        summary.frames_rendered,
        summary.frames_skipped,
        if summary.stream_ended {
            ", stream ended"
        } else {
            ""
        }
    );
    Ok(())
}

fn run_frame(image: &Path, color: bool, config: Option<&Path>, render: &RenderArgs) -> Result<()> {
    let config = resolve_settings(config, render)?.resolve()?;
    let mut cache = GlyphTableCache::new();
    let tables = cache.refresh(&config.palette);

    let mut capture = ImageCapture::new(image);
    let mut source = capture
        .acquire()
        .with_context(|| format!("failed to open image {}", image.display()))?;
    let frame = source.current_frame(config.dims);
    capture.release(source);

    let grid = process_frame(frame?, config.filter, config.dims, tables)?;
    let mut stdout = io::stdout().lock();
    if color {
        write_colored_lines(&mut stdout, &grid, &config)?;
    } else {
        let mut sink = TextSink::new(&mut stdout);
        sink.draw(&grid, &config)?;
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct PaletteListing {
    name: &'static str,
    kind: &'static str,
    glyphs: Vec<String>,
}

fn run_palettes(json: bool) -> Result<()> {
    let mut listings = Vec::new();
    for name in palette_names() {
        listings.push(PaletteListing {
            name,
            kind: "palette",
            glyphs: GlyphPalette::named(name)?.glyphs().to_vec(),
        });
    }
    for name in emoji_set_names() {
        listings.push(PaletteListing {
            name,
            kind: "emoji_set",
            glyphs: GlyphPalette::emoji_set(name)?.glyphs().to_vec(),
        });
    }

    let mut stdout = io::stdout().lock();
    if json {
        serde_json::to_writer_pretty(&mut stdout, &listings)
            .context("failed to serialize palette listing")?;
        writeln!(stdout)?;
        return Ok(());
    }
    for listing in &listings {
        writeln!(
            stdout,
            "{:<10} {:<9} {}",
            listing.name,
            listing.kind,
            listing.glyphs.concat()
        )?;
    }
    Ok(())
}

fn run_check(path: &Path) -> Result<()> {
    let settings = load_settings(path)?;
    let config = settings
        .resolve()
        .with_context(|| format!("invalid settings in {}", path.display()))?;
    GlyphTables::build(&config.palette)
        .with_context(|| format!("invalid palette in {}", path.display()))?;

    println!(
        "OK: {} ({}x{} cells, {} mode, {} filter, {:.1} fps)",
        path.display(),
        config.dims.width,
        config.dims.height,
        config.color_mode.as_str(),
        config.filter,
        1.0 / config.frame_interval.as_secs_f64()
    );
    Ok(())
}
