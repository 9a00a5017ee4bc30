//! Haagenti PQ layer converter
//!
//! Compresses one layer's weights (raw little-endian f32) into a `.pqw` file.
//!
//! ## Usage
//!
//! ```bash
//! # Fully-connected layer, 4096 x 9216, K=32, M=4
//! haagenti-pq fc6.f32 --kind fc --rows 4096 --cols 9216 -K 32 -M 4 -o fc6.pqw
//!
//! # Convolution layer stored as (O, I, KH, KW)
//! haagenti-pq conv2.f32 --kind conv --shape 256,96,5,5 -K 64 -M 8
//!
//! # Reuse an existing result instead of re-clustering
//! haagenti-pq fc6.f32 --kind fc --rows 4096 --cols 9216 -o fc6.pqw --resume
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use haagenti_pq::{
    LayerCompressor, LayerDescriptor, LayerKind, PqwFile, PqwMetadata, QuantizerConfig,
    SliceSpec, WeightMatrix, PQW_EXTENSION,
};

#[derive(Parser, Debug)]
#[command(name = "haagenti-pq")]
#[command(author = "Daemoniorum LLC")]
#[command(version)]
#[command(about = "Product-quantize conv and fc layer weights", long_about = None)]
struct Args {
    /// Raw little-endian f32 weights
    input: PathBuf,

    /// Layer category (conv or fc)
    #[arg(long)]
    kind: LayerKind,

    /// Matrix rows (fc layers)
    #[arg(long)]
    rows: Option<usize>,

    /// Matrix columns (fc layers)
    #[arg(long)]
    cols: Option<usize>,

    /// Kernel shape O,I,KH,KW (conv layers)
    #[arg(long, value_delimiter = ',')]
    shape: Option<Vec<usize>>,

    /// Quantity of clusters
    #[arg(short = 'K', long)]
    clusters: Option<usize>,

    /// Size of subvector
    #[arg(short = 'M', long)]
    slice_width: Option<usize>,

    /// Seed for reproducible clustering
    #[arg(long)]
    seed: Option<u64>,

    /// JSON quantizer configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Layer name stored in the output
    #[arg(long, default_value = "layer")]
    name: String,

    /// Output file (defaults to the input with a .pqw extension)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Load an existing output instead of re-clustering
    #[arg(long)]
    resume: bool,

    /// Also write the packed indices as f32 bit patterns (<output>.blob)
    #[arg(long)]
    float_blob: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| args.input.with_extension(PQW_EXTENSION));

    let file = if args.resume && output.exists() {
        info!("Loading existing result from {}", output.display());
        PqwFile::load(&output)?
    } else {
        let file = compress(&args)?;
        file.save(&output)?;
        info!("Saved {}", output.display());
        file
    };

    if args.float_blob {
        let blob_path = output.with_extension("blob");
        write_float_blob(&blob_path, &file.layer.packed.to_f32_bits())?;
        info!("Wrote packed indices as float blob to {}", blob_path.display());
    }

    let layer = &file.layer;
    info!(
        "{}: K={}, M={}, codebook {:?}, {} packed words",
        layer.name,
        layer.clusters,
        layer.slice_width,
        layer.codebook.shape(),
        layer.packed.len()
    );
    info!(
        "  {} -> {} bytes ({:.1}x), MSE {:.6e}, PSNR {:.1} dB",
        layer.stats.original_bytes,
        layer.stats.compressed_bytes,
        layer.stats.compression_ratio,
        layer.stats.mse,
        layer.stats.psnr
    );

    Ok(())
}

fn compress(args: &Args) -> Result<PqwFile, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => QuantizerConfig::from_json_file(path)?,
        None => QuantizerConfig::default(),
    };
    config.spec = SliceSpec::new(
        args.clusters.unwrap_or(config.spec.clusters),
        args.slice_width.unwrap_or(config.spec.slice_width),
    );
    if args.seed.is_some() {
        config.seed = args.seed;
    }

    let data = read_f32_le(&args.input)?;
    let matrix = match args.kind {
        LayerKind::Convolution => {
            let shape = args
                .shape
                .as_deref()
                .filter(|s| s.len() == 4)
                .ok_or("conv layers need --shape O,I,KH,KW")?;
            WeightMatrix::from_conv_weights(&data, shape[0], shape[1], shape[2], shape[3])?
        }
        LayerKind::FullyConnected => {
            let rows = args.rows.ok_or("fc layers need --rows")?;
            let cols = args.cols.ok_or("fc layers need --cols")?;
            WeightMatrix::new(rows, cols, data)?
        }
    };

    info!(
        "Converting {} ({:?}, {}x{}) with K={}, M={}",
        args.name,
        args.kind,
        matrix.rows(),
        matrix.cols(),
        config.spec.clusters,
        config.spec.slice_width
    );

    let descriptor = LayerDescriptor::new(&args.name, args.kind, matrix.rows(), matrix.cols());
    let mut metadata = PqwMetadata::new(args.input.display().to_string());
    metadata.seed = config.seed;

    let layer = LayerCompressor::new(config).compress(&descriptor, &matrix)?;
    Ok(PqwFile::new(layer, metadata))
}

fn read_f32_le(path: &Path) -> Result<Vec<f32>, Box<dyn std::error::Error>> {
    let bytes = fs::read(path)?;
    if bytes.len() % 4 != 0 {
        return Err(format!(
            "{}: length {} is not a multiple of 4",
            path.display(),
            bytes.len()
        )
        .into());
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

fn write_float_blob(path: &Path, floats: &[f32]) -> std::io::Result<()> {
    let bytes: Vec<u8> = floats.iter().flat_map(|f| f.to_le_bytes()).collect();
    fs::write(path, bytes)
}
