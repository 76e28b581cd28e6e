use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;
use veloxann_core::{config, io, EngineConfig, EngineError, VectorEngine};
use veloxann_server::api::create_router;
use veloxann_server::api::handlers::AppState;

#[derive(Parser)]
#[command(name = "veloxann-server", about = "In-memory vector search engine")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = config::DEFAULT_PORT)]
    port: u16,

    /// Vector dimension
    #[arg(long, default_value_t = 128)]
    dim: usize,

    /// Maximum number of vectors the engine can hold
    #[arg(long, default_value_t = 1_000_000)]
    max_elements: usize,

    /// HNSW M parameter (links per node per layer, 2M on layer 0)
    #[arg(long, default_value_t = config::HNSW_DEFAULT_M)]
    m: usize,

    /// HNSW construction breadth
    #[arg(long, default_value_t = config::HNSW_DEFAULT_EF_CONSTRUCTION)]
    ef_construction: usize,

    /// Capacity of one write buffer, in vectors
    #[arg(long, default_value_t = config::DEFAULT_BUFFER_CAPACITY)]
    buffer_capacity: usize,

    /// Number of background compaction threads
    #[arg(long, default_value_t = config::DEFAULT_BG_THREADS)]
    bg_threads: usize,

    /// Optional .fvecs base file to bulk-load before serving
    #[arg(long)]
    base: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(
                    "veloxann_server=info"
                        .parse()
                        .expect("valid directive literal"),
                )
                .add_directive(
                    "veloxann_core=info"
                        .parse()
                        .expect("valid directive literal"),
                ),
        )
        .init();

    let args = Args::parse();
    if args.port == 0 {
        eprintln!("Error: port must be > 0");
        std::process::exit(1);
    }

    let mut engine_config = EngineConfig::new(args.dim, args.max_elements);
    engine_config.m = args.m;
    engine_config.ef_construction = args.ef_construction;
    engine_config.buffer_capacity = args.buffer_capacity;
    engine_config.bg_threads = args.bg_threads;
    let engine = Arc::new(VectorEngine::new(engine_config)?);

    if let Some(ref base) = args.base {
        bulk_load(&engine, base)?;
    }

    let state = AppState {
        engine: Arc::clone(&engine),
    };
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", args.port)).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutting down engine");
    engine.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install ctrl-c handler");
}

/// Stripe the base file across all cores, writing straight into the graph.
/// Runs before the listener starts, so bulk-mode exclusivity holds.
fn bulk_load(engine: &Arc<VectorEngine>, path: &PathBuf) -> Result<(), EngineError> {
    tracing::info!("bulk loading {}", path.display());
    let (dim, data) = io::load_fvecs(path)?;
    if dim != engine.dim() {
        return Err(EngineError::DimensionMismatch {
            expected: engine.dim(),
            got: dim,
        });
    }
    let count = (data.len() / dim).min(engine.max_elements());
    let threads = std::thread::available_parallelism().map_or(4, |n| n.get());
    let loaded = AtomicUsize::new(0);
    let start = Instant::now();

    std::thread::scope(|scope| {
        for t in 0..threads {
            let engine = &engine;
            let data = &data;
            let loaded = &loaded;
            scope.spawn(move || {
                let mut i = t;
                while i < count {
                    engine
                        .bulk_insert(&data[i * dim..(i + 1) * dim], i as u32)
                        .expect("bulk insert of validated base data");
                    let done = loaded.fetch_add(1, Ordering::Relaxed) + 1;
                    if done % 100_000 == 0 {
                        tracing::info!("bulk loaded {done} / {count}");
                    }
                    i += threads;
                }
            });
        }
    });

    tracing::info!(
        "bulk load complete: {count} vectors in {:.1}s",
        start.elapsed().as_secs_f64()
    );
    Ok(())
}
