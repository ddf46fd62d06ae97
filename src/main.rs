//! CLI entry point for the embedding explorer.
//!
//! Offline jobs (`ingest`, `build-index`, `project`) write the snapshot;
//! query commands (`search`, `points`, `details`) read it through a single
//! `ExplorerContext`.

use std::path::{Path, PathBuf};

use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use embedscope::ann::{IndexMetadata, read_index_metadata};
use embedscope::config::ClusteringConfig;
use embedscope::display::{
    THEME, TableBuilder, create_alignment_table, create_build_table, create_ingest_table,
    create_projection_table, create_records_table, create_spinner,
};
use embedscope::io::{ExitCode, OutputFormat, OutputManager};
use embedscope::storage::verify_alignment;
use embedscope::vector::{EncoderFactory, EncoderSpec, FastEmbedFactory};
use embedscope::{
    EmbedJob, ExplorerContext, ExplorerResult, IndexBuilder, MediaType, Ordinal,
    ProjectionEngine, SearchRequest, Settings,
};

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Embedding retrieval and projection for multimodal datasets
#[derive(Parser)]
#[command(
    name = "embedscope",
    version = env!("CARGO_PKG_VERSION"),
    about = "Embedding retrieval and projection for multimodal datasets",
    long_about = "Embed a dataset into shards, build an IVF-PQ index for similarity search, and project it to 2D with cluster labels.",
    next_line_help = true,
    styles = clap_cargo_style()
)]
struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    /// Show debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
enum Commands {
    #[command(about = "Set up .embedscope directory with default configuration")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    #[command(about = "Display active settings and the built index")]
    Config,

    #[command(about = "Embed items (one per line) into shards and the record table")]
    Ingest {
        /// File with one item per line: text, or an image path
        input: PathBuf,

        /// Media type of every item in the file
        #[arg(short, long, default_value = "text")]
        media_type: MediaType,

        /// Rows per shard
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Inputs per encoder call
        #[arg(long)]
        batch_size: Option<usize>,

        /// Source language passed to the encoder
        #[arg(long)]
        lang: Option<String>,

        /// Hide the progress bar
        #[arg(long)]
        no_progress: bool,
    },

    #[command(name = "build-index", about = "Train and persist the IVF-PQ index")]
    BuildIndex {
        /// Number of coarse cells
        #[arg(long)]
        nlist: Option<usize>,

        /// PQ sub-quantizers, must divide the dimension
        #[arg(long)]
        subquantizers: Option<usize>,

        /// Rows sampled for training
        #[arg(long)]
        training_size: Option<usize>,

        /// Never use an accelerator
        #[arg(long)]
        no_accelerator: bool,
    },

    #[command(about = "Compute and persist the 2D projection with cluster labels")]
    Project {
        /// Neighborhood size
        #[arg(long)]
        n_neighbors: Option<usize>,

        /// Optimization epochs
        #[arg(long)]
        epochs: Option<usize>,

        /// Use k-means with this many clusters
        #[arg(long, conflicts_with_all = ["eps", "min_samples", "no_clustering"])]
        clusters: Option<usize>,

        /// Density clustering radius
        #[arg(long)]
        eps: Option<f32>,

        /// Density clustering core size
        #[arg(long)]
        min_samples: Option<usize>,

        /// Put every point in cluster 0
        #[arg(long)]
        no_clustering: bool,
    },

    #[command(about = "Find the records most similar to a query")]
    Search {
        /// Query text, or an image path for image queries
        query: String,

        /// Query modality
        #[arg(short, long, default_value = "text")]
        modality: MediaType,

        /// Number of results
        #[arg(short, long)]
        k: Option<usize>,

        /// Source language of the query
        #[arg(long)]
        lang: Option<String>,
    },

    #[command(about = "Print the projection points as [x, y, cluster] rows")]
    Points {
        /// Rows shown in text mode
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    #[command(about = "Look up records by ordinal")]
    Details {
        /// Ordinals to resolve
        #[arg(required = true, num_args = 1..)]
        ordinals: Vec<u32>,
    },

    #[command(about = "Check that every artifact has one row per ordinal")]
    Verify,
}

#[derive(Serialize)]
struct ConfigView<'a> {
    settings: &'a Settings,
    #[serde(skip_serializing_if = "Option::is_none")]
    index: Option<IndexMetadata>,
}

fn main() {
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", THEME.error_with_icon(&format!("{e:#}")));
            ExitCode::GeneralError
        }
    };
    std::process::exit(code.into());
}

fn init_tracing(debug: bool) {
    let default = if debug { "embedscope=debug" } else { "embedscope=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    match path {
        Some(path) => Settings::load_from(path)
            .map_err(|e| anyhow::anyhow!("Configuration error loading from {}: {e}", path.display())),
        None => Settings::load().or_else(|e| {
            eprintln!("{}", THEME.warning_with_icon(&format!("Configuration error: {e}")));
            eprintln!("{}", THEME.muted("Using default configuration."));
            Ok(Settings::default())
        }),
    }
}

/// Writes `result` through the output manager and maps it to an exit code.
fn emit<T: Serialize>(
    output: &mut OutputManager,
    result: ExplorerResult<T>,
    text: impl FnOnce(&T) -> String,
) -> anyhow::Result<ExitCode> {
    match result {
        Ok(data) => Ok(output.success(&data, || text(&data))?),
        Err(e) => Ok(output.error(&e)?),
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    if let Commands::Init { force } = cli.command {
        Settings::init_config_file(force).map_err(|e| anyhow::anyhow!("{e}"))?;
        println!("Edit this file to customize your settings.");
        return Ok(ExitCode::Success);
    }

    let mut settings = load_settings(cli.config.as_deref())?;
    init_tracing(cli.verbose || settings.debug);

    let format = OutputFormat::from_json_flag(cli.json);
    let mut output = OutputManager::new(format);
    let paths = settings.resolved_paths();

    match cli.command {
        Commands::Init { .. } => Ok(ExitCode::Success),

        Commands::Config => {
            let view = ConfigView {
                settings: &settings,
                index: read_index_metadata(&paths.index_file).ok(),
            };
            let code = output.success(&view, || {
                let mut text = toml::to_string_pretty(&settings)
                    .unwrap_or_else(|e| format!("# settings cannot be rendered: {e}"));
                if let Some(meta) = &view.index {
                    text.push_str(
                        &TableBuilder::new()
                            .set_headers(vec!["Index", "Value"])
                            .add_row(vec!["Vectors".to_string(), meta.ntotal.to_string()])
                            .add_row(vec!["Dimension".to_string(), meta.dimension.to_string()])
                            .add_row(vec!["Coarse cells".to_string(), meta.nlist.to_string()])
                            .add_row(vec![
                                "PQ".to_string(),
                                format!("{} x {} bits", meta.subquantizers, meta.bits),
                            ])
                            .add_row(vec!["OPQ".to_string(), meta.opq.to_string()])
                            .add_row(vec!["Built".to_string(), meta.built_at.clone()])
                            .build(),
                    );
                }
                text
            })?;
            Ok(code)
        }

        Commands::Ingest {
            input,
            media_type,
            chunk_size,
            batch_size,
            lang,
            no_progress,
        } => {
            let result = EncoderSpec::for_modality(media_type, &settings.encoders)
                .and_then(|spec| FastEmbedFactory.create(&spec))
                .and_then(|encoder| {
                    EmbedJob::new(encoder, &paths.embeddings_dir, &paths.records_file)
                        .with_chunk_size(chunk_size.unwrap_or(settings.ingest.chunk_size))
                        .with_batch_size(batch_size.unwrap_or(settings.ingest.batch_size))
                        .with_source_lang(lang.unwrap_or_else(|| settings.encoders.source_lang.clone()))
                        .with_progress(!no_progress && !format.is_json())
                        .run_file(&input)
                });
            emit(&mut output, result, |report| {
                format!(
                    "{}\n{}",
                    THEME.success_with_icon("Ingest complete"),
                    create_ingest_table(report)
                )
            })
        }

        Commands::BuildIndex {
            nlist,
            subquantizers,
            training_size,
            no_accelerator,
        } => {
            let config = &mut settings.index;
            if let Some(nlist) = nlist {
                config.nlist = nlist;
            }
            if let Some(m) = subquantizers {
                config.subquantizers = m;
            }
            if let Some(size) = training_size {
                config.training_size = size;
            }
            if no_accelerator {
                config.use_accelerator = false;
            }

            let spinner = (!format.is_json()).then(|| create_spinner("Training IVF-PQ index"));
            let result = IndexBuilder::new(settings.index.clone()).build_from_store(&paths);
            if let Some(spinner) = spinner {
                spinner.finish_and_clear();
            }
            emit(&mut output, result, |report| {
                format!(
                    "{}\n{}",
                    THEME.success_with_icon("Index built"),
                    create_build_table(report)
                )
            })
        }

        Commands::Project {
            n_neighbors,
            epochs,
            clusters,
            eps,
            min_samples,
            no_clustering,
        } => {
            let config = &mut settings.projection;
            if let Some(n) = n_neighbors {
                config.n_neighbors = n;
            }
            if epochs.is_some() {
                config.n_epochs = epochs;
            }
            if no_clustering {
                config.clustering = ClusteringConfig::None;
            } else if let Some(clusters) = clusters {
                config.clustering = ClusteringConfig::Centroid { clusters };
            } else if eps.is_some() || min_samples.is_some() {
                let (base_eps, base_min) = match config.clustering {
                    ClusteringConfig::Density {
                        eps: current_eps,
                        min_samples: current_min,
                    } => (current_eps, current_min),
                    _ => (0.05, 10),
                };
                config.clustering = ClusteringConfig::Density {
                    eps: eps.unwrap_or(base_eps),
                    min_samples: min_samples.unwrap_or(base_min),
                };
            }

            let spinner = (!format.is_json()).then(|| create_spinner("Optimizing layout"));
            let result = ProjectionEngine::new(settings.projection.clone()).project_from_store(&paths);
            if let Some(spinner) = spinner {
                spinner.finish_and_clear();
            }
            emit(&mut output, result, |report| {
                format!(
                    "{}\n{}",
                    THEME.success_with_icon("Projection written"),
                    create_projection_table(report)
                )
            })
        }

        Commands::Search {
            query,
            modality,
            k,
            lang,
        } => {
            let context = ExplorerContext::from_settings(&settings);
            let mut request = SearchRequest::new(query, modality);
            if let Some(lang) = lang {
                request = request.with_source_lang(lang);
            }
            let k = k.unwrap_or(settings.search.default_k);
            let result = context.search(&request, k);
            emit(&mut output, result, |records| {
                if records.is_empty() {
                    THEME.warning_with_icon("No results")
                } else {
                    create_records_table(records)
                }
            })
        }

        Commands::Points { limit } => {
            let context = ExplorerContext::from_settings(&settings);
            emit(&mut output, context.get_embeddings(), |points| {
                let mut table = TableBuilder::new().set_headers(vec!["Index", "x", "y", "Cluster"]);
                for (i, [x, y, cluster]) in points.iter().take(limit).enumerate() {
                    table = table.add_row(vec![
                        i.to_string(),
                        format!("{x:.4}"),
                        format!("{y:.4}"),
                        format!("{cluster:.0}"),
                    ]);
                }
                format!("{}\n{} points", table.build(), points.len())
            })
        }

        Commands::Details { ordinals } => {
            let context = ExplorerContext::from_settings(&settings);
            let ordinals: Vec<Ordinal> = ordinals.into_iter().map(Ordinal::new).collect();
            emit(
                &mut output,
                context.get_embeddings_details(&ordinals),
                |records| create_records_table(records),
            )
        }

        Commands::Verify => {
            let report = verify_alignment(&paths);
            let aligned = report.is_aligned();
            output.success(&report, || create_alignment_table(&report))?;
            if aligned {
                output.info(&THEME.success_with_icon("All artifacts are aligned"))?;
                Ok(ExitCode::Success)
            } else {
                for violation in report.violations() {
                    output.info(&THEME.error_with_icon(&violation.to_string()))?;
                }
                Ok(ExitCode::BlockingError)
            }
        }
    }
}
