use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use pagestamp::{AnnotationObject, Composer, FileDownload, FsLoader};

#[derive(Parser, Debug)]
#[command(name = "pagestamp", version)]
struct Cli {
    /// Source PDF.
    #[arg(long)]
    pdf: PathBuf,

    /// JSON array of annotation objects.
    #[arg(long)]
    objects: PathBuf,

    /// Directory the composed PDF is written into.
    #[arg(long)]
    out_dir: PathBuf,

    /// Output file name (defaults to the source file name).
    #[arg(long)]
    name: Option<String>,

    /// Register a font family, as FAMILY=path/to/font.ttf. Repeatable.
    #[arg(long = "font", value_parser = parse_font)]
    fonts: Vec<(String, PathBuf)>,

    /// Worker threads (defaults to the global rayon pool).
    #[arg(long)]
    threads: Option<usize>,

    /// Also write the data URI preview to this file.
    #[arg(long)]
    preview: Option<PathBuf>,
}

fn parse_font(value: &str) -> Result<(String, PathBuf), String> {
    match value.split_once('=') {
        Some((family, path)) if !family.trim().is_empty() && !path.is_empty() => {
            Ok((family.trim().to_string(), PathBuf::from(path)))
        }
        _ => Err(format!("expected FAMILY=PATH, got '{value}'")),
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    let source = std::fs::read(&cli.pdf)
        .with_context(|| format!("read pdf '{}'", cli.pdf.display()))?;
    let raw = std::fs::read_to_string(&cli.objects)
        .with_context(|| format!("read objects '{}'", cli.objects.display()))?;
    let objects: Vec<AnnotationObject> = serde_json::from_str(&raw)
        .with_context(|| format!("parse objects '{}'", cli.objects.display()))?;

    // Relative image paths in the objects file are resolved next to it.
    let assets_root = cli
        .objects
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let mut builder = Composer::builder()
        .loader(FsLoader::with_root(assets_root))
        .download(Arc::new(FileDownload::new(&cli.out_dir)));
    for (family, path) in cli.fonts {
        builder = builder.register_font_file(family, path);
    }
    if let Some(threads) = cli.threads {
        builder = builder.threads(threads);
    }
    let composer = builder.build()?;

    let name = match cli.name {
        Some(name) => name,
        None => cli
            .pdf
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string()),
    };
    let output = composer.save(&source, &objects, &name)?;

    if let Some(path) = &cli.preview {
        std::fs::write(path, &output.preview)
            .with_context(|| format!("write preview '{}'", path.display()))?;
    }

    eprintln!(
        "wrote {} ({} pages, {} drawn, {} failed, {} bytes)",
        cli.out_dir.join(&name).display(),
        output.report.pages.len(),
        output.report.drawn(),
        output.report.failed(),
        output.report.output_bytes
    );
    Ok(())
}
