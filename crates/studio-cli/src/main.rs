mod commands;
mod config;
mod server;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use config::{CommonArgs, StudioConfig, DEFAULT_HOST, DEFAULT_PORT};

#[derive(Debug, Parser)]
#[command(name = "studio-rs", version, about = "Banana Studio image generation server and tools")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP API (and optional static UI).
    Serve(ServeArgs),
    /// Generate an image from a text prompt.
    Generate(GenerateArgs),
    /// Edit an image, optionally restricted by brush strokes.
    Edit(EditArgs),
    /// Rasterize brush strokes into a black/white mask.
    Mask(MaskArgs),
    /// Manage the stored API key.
    Key(KeyArgs),
}

#[derive(Debug, Args)]
struct ServeArgs {
    #[arg(long, env = "STUDIO_HOST", default_value = DEFAULT_HOST)]
    host: String,
    #[arg(long, env = "STUDIO_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,
    #[arg(long, env = "STUDIO_STATIC_DIR")]
    static_dir: Option<PathBuf>,
    /// Send text prompts as written.
    #[arg(long)]
    no_improve: bool,
}

#[derive(Debug, Args)]
struct GenerateArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    out: PathBuf,
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    #[arg(long)]
    no_improve: bool,
}

#[derive(Debug, Args)]
struct EditArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    image: PathBuf,
    /// Stroke document (JSON) drawn over the image.
    #[arg(long)]
    strokes: Option<PathBuf>,
    #[arg(long)]
    out: PathBuf,
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

#[derive(Debug, Args)]
struct MaskArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    strokes: PathBuf,
    #[arg(long)]
    out: PathBuf,
    /// Also write the strokes composited over the image.
    #[arg(long)]
    preview: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct KeyArgs {
    #[command(subcommand)]
    action: KeyAction,
}

#[derive(Debug, Subcommand)]
enum KeyAction {
    Save { key: String },
    Show,
    Clear,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("studio-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing();
    let config = StudioConfig::from_args(&cli.common);
    match cli.command {
        Command::Serve(args) => commands::serve(&config, args),
        Command::Generate(args) => commands::generate(&config, args),
        Command::Edit(args) => commands::edit(&config, args),
        Command::Mask(args) => commands::mask(args),
        Command::Key(args) => commands::key(&config, args.action),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
