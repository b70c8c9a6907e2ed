//! # Tarjeta CLI
//!
//! Command-line interface for template rendering and the job server.
//!
//! ## Usage
//!
//! ```bash
//! # Validate a template definition
//! tarjeta validate --template card.json
//!
//! # Render one record to a file
//! tarjeta render --template card.json --record ada.json --out ada.png
//!
//! # Run the job server
//! tarjeta serve --listen 0.0.0.0:8080 --templates ./templates \
//!     --assets ./assets --output ./out --concurrency 4
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tarjeta::error::TarjetaError;
use tarjeta::job::{CancelFlag, ControllerConfig, InMemoryQueue, JobController};
use tarjeta::pipeline::{RenderOptions, RenderPipeline};
use tarjeta::render::FontCatalog;
use tarjeta::resolve::Record;
use tarjeta::server::{AppState, ServerConfig, serve};
use tarjeta::store::{AssetFetcher, FsObjectStore, MemoryMetadataStore, MetadataStore, ObjectStore};
use tarjeta::template::{ExportFormat, Template};

/// Tarjeta - template-driven card rendering
#[derive(Parser, Debug)]
#[command(name = "tarjeta")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate a template definition
    Validate {
        /// Template JSON file
        #[arg(long)]
        template: PathBuf,
    },

    /// Render one record against a template
    Render {
        /// Template JSON file
        #[arg(long)]
        template: PathBuf,

        /// Record JSON file (an object of field values)
        #[arg(long)]
        record: PathBuf,

        /// Output image path
        #[arg(long)]
        out: PathBuf,

        /// Output format override: png or jpg
        #[arg(long)]
        format: Option<String>,

        /// Directory of TTF/OTF fonts
        #[arg(long)]
        fonts: Option<PathBuf>,

        /// Directory assets are resolved against
        #[arg(long, default_value = ".")]
        assets: PathBuf,
    },

    /// Run the render job server
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "0.0.0.0:8080")]
        listen: String,

        /// Directory of template JSON files (loaded at startup)
        #[arg(long)]
        templates: Option<PathBuf>,

        /// Directory of TTF/OTF fonts
        #[arg(long)]
        fonts: Option<PathBuf>,

        /// Directory assets are resolved against
        #[arg(long, default_value = "assets")]
        assets: PathBuf,

        /// Directory rendered outputs are written to
        #[arg(long, default_value = "out")]
        output: PathBuf,

        /// Worker pool size
        #[arg(long, default_value = "4")]
        concurrency: usize,

        /// Attempt ceiling for transient failures
        #[arg(long, default_value = "3")]
        max_attempts: u32,

        /// Per-job wall-clock timeout in seconds
        #[arg(long, default_value = "30")]
        timeout: u64,

        /// Job admissions per second
        #[arg(long, default_value = "8.0")]
        rate_limit: f64,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tarjeta=info,tower_http=info".into()),
        )
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), TarjetaError> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { template } => {
            let json = std::fs::read_to_string(&template)?;
            let template = Template::from_json(&json)?;
            println!(
                "OK: '{}' v{} ({} elements, {}x{})",
                template.id,
                template.version,
                template.elements.len(),
                template.width,
                template.height
            );
            Ok(())
        }

        Commands::Render {
            template,
            record,
            out,
            format,
            fonts,
            assets,
        } => {
            let template = Template::from_json(&std::fs::read_to_string(&template)?)?;
            let record: Record = serde_json::from_str(&std::fs::read_to_string(&record)?)
                .map_err(|e| TarjetaError::Render(format!("record parse: {e}")))?;

            let output_format = match format.as_deref() {
                Some("png") => Some(ExportFormat::Png),
                Some("jpg") | Some("jpeg") => Some(ExportFormat::Jpg),
                Some(other) => {
                    return Err(TarjetaError::Render(format!("unknown format '{other}'")));
                }
                None => None,
            };

            let pipeline = build_pipeline(fonts.as_deref(), &assets)?;
            let options = RenderOptions {
                output_format,
                fail_when_empty: false,
            };
            let rendered = pipeline
                .render(&template, &record, &options, &CancelFlag::new())
                .await?;

            for warning in &rendered.warnings {
                eprintln!(
                    "warning: element '{}': {} ({})",
                    warning.element, warning.message, warning.field
                );
            }
            std::fs::write(&out, &rendered.bytes)?;
            println!(
                "Wrote {} ({} bytes, {}x{})",
                out.display(),
                rendered.bytes.len(),
                rendered.width,
                rendered.height
            );
            Ok(())
        }

        Commands::Serve {
            listen,
            templates,
            fonts,
            assets,
            output,
            concurrency,
            max_attempts,
            timeout,
            rate_limit,
        } => {
            let pipeline = build_pipeline(fonts.as_deref(), &assets)?;

            let meta = Arc::new(MemoryMetadataStore::new());
            if let Some(dir) = templates {
                load_templates(&meta, &dir).await?;
            }

            let job_timeout = Duration::from_secs(timeout);
            let config = ControllerConfig {
                concurrency,
                max_attempts,
                job_timeout,
                rate_limit,
                ..Default::default()
            };
            // Leases outlive the job budget so redelivery only covers crashes.
            let queue = Arc::new(InMemoryQueue::new(job_timeout * 2));
            let output_store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(output));

            let controller = Arc::new(JobController::new(
                config,
                queue,
                meta.clone() as Arc<dyn MetadataStore>,
                output_store,
                pipeline.clone(),
            ));
            controller.start().await;

            let state = Arc::new(AppState::new(controller.clone(), Arc::new(pipeline)));
            let result = serve(ServerConfig {
                listen_addr: listen,
            }, state)
            .await;

            // Drain active jobs before exiting, whatever the serve outcome.
            controller.shutdown().await;
            result
        }
    }
}

fn build_pipeline(
    fonts: Option<&std::path::Path>,
    assets: &std::path::Path,
) -> Result<RenderPipeline, TarjetaError> {
    let catalog = match fonts {
        Some(dir) => FontCatalog::load_dir(dir)?,
        None => FontCatalog::empty(),
    };
    let asset_store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(assets));
    Ok(RenderPipeline::new(
        Arc::new(catalog),
        Arc::new(AssetFetcher::new(asset_store)),
    ))
}

async fn load_templates(meta: &MemoryMetadataStore, dir: &std::path::Path) -> Result<(), TarjetaError> {
    let mut count = 0usize;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match Template::from_json(&std::fs::read_to_string(&path)?) {
            Ok(template) => {
                tracing::info!(
                    id = %template.id, version = template.version,
                    path = %path.display(), "template loaded"
                );
                meta.insert_template(template).await;
                count += 1;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping invalid template");
            }
        }
    }
    tracing::info!(count, "templates loaded");
    Ok(())
}
