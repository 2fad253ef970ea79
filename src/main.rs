use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::Parser;
use noodles::core::Region;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use varcell::{
    CellFields, PartitionBatch, VcfConverter, VcfSource, VidMapper, DEFAULT_SIZE_PER_CALLSET,
};

/// Length assumed for contigs whose header line omits one.
const FALLBACK_CONTIG_LENGTH: i64 = 1 << 31;

#[derive(Parser)]
#[command(name = "vcf2cell", version, about = "Convert a variant call-set file into partitioned binary cells")]
struct Args {
    /// Input VCF file (plain or bgzip-compressed)
    input: PathBuf,

    /// Directory receiving one cells-<partition>.bin file per partition
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Restrict conversion to one region, e.g. chr1:1000-2000
    #[arg(long)]
    region: Option<String>,

    /// INFO fields to carry into each cell
    #[arg(long = "info", value_delimiter = ',')]
    info_fields: Vec<String>,

    /// FORMAT fields to carry into each cell
    #[arg(long = "format", value_delimiter = ',', default_value = "GT")]
    format_fields: Vec<String>,

    /// Per-callset byte budget for one batch
    #[arg(long, default_value_t = DEFAULT_SIZE_PER_CALLSET)]
    size_per_callset: usize,

    /// Global columns at which to split the coordinate space into partitions
    #[arg(long, value_delimiter = ',')]
    splits: Vec<i64>,

    /// Drive partitions on worker threads, one reader per partition
    #[arg(long)]
    parallel: bool,

    /// Close and reopen the input between batches to bound open descriptors
    #[arg(long)]
    close_after_batch: bool,

    /// Ignore any tabix index and seek by sequential scan only
    #[arg(long)]
    discard_index: bool,

    /// Emit spanning deletions with an explicit END column
    #[arg(long)]
    deletions_as_intervals: bool,

    /// Profile encoded cell sizes into this many histogram bins
    #[arg(long)]
    histogram_bins: Option<usize>,

    /// Log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let region = args
        .region
        .as_deref()
        .map(str::parse::<Region>)
        .transpose()
        .map_err(|err| anyhow!("invalid region: {err}"))?;

    let fields = CellFields::new(args.info_fields.clone(), args.format_fields.clone());

    // one header pass to learn the coordinate space and the callsets
    let probe = VcfSource::new(&args.input, None, &CellFields::default(), true)?;
    let header = probe
        .header()
        .ok_or_else(|| anyhow!("no header in {}", args.input.display()))?;

    let mut builder = VidMapper::builder();
    let mut total_columns = 0i64;
    for (name, contig) in header.contigs() {
        let length = contig
            .length()
            .map_or(FALLBACK_CONTIG_LENGTH, |length| length as i64);
        builder = builder.contig(name, length);
        total_columns += length;
    }
    for name in args.info_fields.iter().chain(&args.format_fields) {
        builder = builder.field(name);
    }
    for name in header.sample_names() {
        builder = builder.callset(name, true);
    }
    let vid_mapper = Arc::new(builder.build());
    drop(probe);

    let bounds = partition_bounds(&args.splits, total_columns)?;
    info!(
        input = %args.input.display(),
        partitions = bounds.len(),
        callsets = vid_mapper.num_callsets(),
        "starting conversion"
    );

    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating {}", args.output_dir.display()))?;
    let mut outputs = Vec::with_capacity(bounds.len());
    for idx in 0..bounds.len() {
        let path = args.output_dir.join(format!("cells-{idx}.bin"));
        outputs.push(File::create(&path).with_context(|| format!("creating {}", path.display()))?);
    }

    let make_converter = |bounds: &[(i64, i64)], parallel: bool| -> anyhow::Result<VcfConverter> {
        let mut builder = VcfConverter::builder()
            .fields(fields.clone())
            .max_size_per_callset(args.size_per_callset)
            .treat_deletions_as_intervals(args.deletions_as_intervals)
            .parallel_partitions(parallel)
            .close_file(args.close_after_batch)
            .discard_index(args.discard_index);
        if let Some(region) = region.clone() {
            builder = builder.region(region);
        }
        let mut converter = builder.build(&args.input, Arc::clone(&vid_mapper), bounds)?;
        if let Some(bins) = args.histogram_bins {
            converter.create_histogram(args.size_per_callset as u64, bins);
        }
        Ok(converter)
    };

    if args.parallel {
        // one single-partition converter per worker, each with its own reader
        let mut jobs = Vec::with_capacity(bounds.len());
        for (idx, &range) in bounds.iter().enumerate() {
            jobs.push((idx, make_converter(&[range], true)?));
        }
        let workers = num_cpus::get().max(1);
        for (chunk, files) in jobs
            .chunks_mut(workers)
            .zip(outputs.chunks_mut(workers))
        {
            std::thread::scope(|scope| -> anyhow::Result<()> {
                let mut handles = Vec::with_capacity(chunk.len());
                for ((idx, converter), file) in chunk.iter_mut().zip(files.iter_mut()) {
                    let idx = *idx;
                    let size = args.size_per_callset;
                    let close = args.close_after_batch;
                    handles.push(scope.spawn(move || {
                        drive(converter, std::slice::from_mut(file), size, close)
                            .with_context(|| format!("partition {idx}"))
                    }));
                }
                for handle in handles {
                    handle
                        .join()
                        .map_err(|_| anyhow!("conversion worker panicked"))??;
                }
                Ok(())
            })?;
        }
        for (idx, converter) in &jobs {
            report_histogram(*idx, converter);
        }
    } else {
        let mut converter = make_converter(&bounds, false)?;
        drive(
            &mut converter,
            &mut outputs,
            args.size_per_callset,
            args.close_after_batch,
        )?;
        report_histogram(0, &converter);
    }

    info!("conversion complete");
    Ok(())
}

/// Split `[0, total_columns)` at the given columns, ascending.
fn partition_bounds(splits: &[i64], total_columns: i64) -> anyhow::Result<Vec<(i64, i64)>> {
    let mut cuts: Vec<i64> = splits.to_vec();
    cuts.sort_unstable();
    cuts.dedup();
    if cuts.iter().any(|&c| c <= 0 || c >= total_columns) {
        return Err(anyhow!(
            "split columns must lie strictly inside (0, {total_columns})"
        ));
    }
    let mut bounds = Vec::with_capacity(cuts.len() + 1);
    let mut begin = 0i64;
    for cut in cuts {
        bounds.push((begin, cut));
        begin = cut;
    }
    bounds.push((begin, total_columns));
    Ok(bounds)
}

/// Run batches until every partition is exhausted, appending each batch's
/// committed bytes per callset window to the partition's output file. A batch
/// that commits nothing and is not complete means one record exceeds the
/// per-callset budget; the buffer doubles and the batch retries.
fn drive(
    converter: &mut VcfConverter,
    outputs: &mut [File],
    size_per_callset: usize,
    close_after: bool,
) -> anyhow::Result<()> {
    let num_partitions = converter.partitions().len();
    let num_callsets = converter.num_enabled_callsets();
    let mut buffers: Vec<Vec<u8>> = (0..num_partitions)
        .map(|_| vec![0u8; num_callsets * size_per_callset])
        .collect();
    let mut batches = vec![PartitionBatch::new(); num_partitions];
    let mut done = vec![false; num_partitions];

    while done.iter().any(|finished| !finished) {
        for (batch, finished) in batches.iter_mut().zip(&done) {
            if !finished {
                batch.request_fetch();
            }
        }
        converter.read_next_batch(&mut buffers, &mut batches, close_after)?;

        for idx in 0..num_partitions {
            if done[idx] {
                continue;
            }
            let windows: Vec<(i64, i64)> = converter.partitions()[idx]
                .offsets()
                .iter()
                .map(|offsets| (offsets.begin(), offsets.last_full_line_end()))
                .collect();
            let mut written = 0usize;
            for (begin, end) in windows {
                let bytes = &buffers[idx][begin as usize..end as usize];
                outputs[idx].write_all(bytes)?;
                written += bytes.len();
            }
            if batches[idx].is_completed() {
                done[idx] = true;
                info!(partition = idx, "partition complete");
            } else if written == 0 {
                let enlarged = buffers[idx].len().max(1) * 2;
                warn!(
                    partition = idx,
                    bytes = enlarged,
                    "record exceeds batch budget; enlarging buffer"
                );
                buffers[idx].resize(enlarged, 0);
            }
        }
    }
    for output in outputs {
        output.flush()?;
    }
    Ok(())
}

fn report_histogram(partition: usize, converter: &VcfConverter) {
    let Some(hist) = converter.histogram() else {
        return;
    };
    info!(
        partition,
        cells = hist.total(),
        bin_width = hist.bin_width(),
        "cell size distribution"
    );
    for bin in 0..hist.num_bins() {
        let count = hist.bin_count(bin);
        if count > 0 {
            info!(
                partition,
                bin,
                upper = (bin as u64 + 1) * hist.bin_width(),
                count,
                "histogram bin"
            );
        }
    }
}
