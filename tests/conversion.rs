//! End-to-end conversion tests over the public API.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use varcell::{
    read_string, read_value, CellFields, CellValue, PartitionBatch, VcfConverter, VidMapper,
};

const FIXTURE: &str = "\
##fileformat=VCFv4.3
##contig=<ID=chr1,length=10000>
##contig=<ID=chr2,length=10000>
##INFO=<ID=END,Number=1,Type=Integer,Description=\"End position\">
##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">
##FORMAT=<ID=AD,Number=R,Type=Integer,Description=\"Allelic depths\">
##FORMAT=<ID=PL,Number=G,Type=Integer,Description=\"Phred likelihoods\">
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\ts0
chr1\t101\t.\tA\tT\t60\tPASS\t.\tGT:AD\t0/1:10,5
chr1\t1000\t.\tC\tG\t30\tPASS\t.\tGT:AD:PL\t1/1:0,8:90,9,0
chr1\t1001\t.\tT\tA\t30\tPASS\t.\tGT\t0/0
chr2\t5\t.\tG\tC\t30\tPASS\t.\tGT\t0/1
";

fn fixture_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".vcf").tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

fn mapper() -> Arc<VidMapper> {
    Arc::new(
        VidMapper::builder()
            .contig("chr1", 10_000)
            .contig("chr2", 10_000)
            .field("GT")
            .field("AD")
            .field("PL")
            .callset("s0", true)
            .build(),
    )
}

fn converter(path: &Path, bounds: &[(i64, i64)]) -> VcfConverter {
    VcfConverter::builder()
        .fields(CellFields::new(
            Vec::new(),
            vec!["GT".to_string(), "AD".to_string(), "PL".to_string()],
        ))
        .build(path, mapper(), bounds)
        .unwrap()
}

/// Run batches until exhaustion, concatenating committed bytes per partition.
/// Doubles a partition's buffer whenever a batch commits nothing, mirroring the
/// grow-and-retry loop a loader runs on backpressure.
fn convert_all(conv: &mut VcfConverter, initial_buffer: usize) -> Vec<Vec<u8>> {
    let num_partitions = conv.partitions().len();
    let mut buffers = vec![vec![0u8; initial_buffer]; num_partitions];
    let mut batches = vec![PartitionBatch::new(); num_partitions];
    let mut out = vec![Vec::new(); num_partitions];
    let mut done = vec![false; num_partitions];

    while done.iter().any(|finished| !finished) {
        for (batch, finished) in batches.iter_mut().zip(&done) {
            if !finished {
                batch.request_fetch();
            }
        }
        conv.read_next_batch(&mut buffers, &mut batches, false)
            .unwrap();

        for idx in 0..num_partitions {
            if done[idx] {
                continue;
            }
            let partition = &conv.partitions()[idx];
            assert!(partition.offsets().iter().all(|o| o.is_ordered()));

            let windows: Vec<(i64, i64)> = partition
                .offsets()
                .iter()
                .map(|o| (o.begin(), o.last_full_line_end()))
                .collect();
            let mut written = 0usize;
            for (begin, end) in windows {
                out[idx].extend_from_slice(&buffers[idx][begin as usize..end as usize]);
                written += (end - begin) as usize;
            }
            if batches[idx].is_completed() {
                done[idx] = true;
            } else if written == 0 {
                let enlarged = buffers[idx].len() * 2;
                buffers[idx].resize(enlarged, 0);
            }
        }
    }
    out
}

#[test]
fn queried_fields_round_trip() {
    let file = fixture_file(FIXTURE);
    let mut conv = converter(file.path(), &[(0, 20_000)]);
    let cells = convert_all(&mut conv, 1 << 16);

    let buffer = &cells[0];
    let mut at = 0i64;

    assert_eq!(read_value::<i64>(buffer, &mut at), 0); // row
    assert_eq!(read_value::<i64>(buffer, &mut at), 100); // column
    assert_eq!(read_value::<i64>(buffer, &mut at), 100); // end
    assert_eq!(read_string(buffer, &mut at), b"A");
    assert_eq!(read_string(buffer, &mut at), b"T");
    assert!((read_value::<f32>(buffer, &mut at) - 60.0).abs() < f32::EPSILON);

    // GT 0/1
    assert_eq!(read_value::<i32>(buffer, &mut at), 2);
    assert_eq!(read_value::<i32>(buffer, &mut at), 0);
    assert_eq!(read_value::<i32>(buffer, &mut at), 1);
    // AD 10,5
    assert_eq!(read_value::<i32>(buffer, &mut at), 2);
    assert_eq!(read_value::<i32>(buffer, &mut at), 10);
    assert_eq!(read_value::<i32>(buffer, &mut at), 5);
    // PL absent from this record's FORMAT column
    assert_eq!(read_value::<i32>(buffer, &mut at), 1);
    assert!(read_value::<i32>(buffer, &mut at).is_missing());
}

#[test]
fn cells_arrive_in_column_order() {
    let file = fixture_file(FIXTURE);
    let mut conv = converter(file.path(), &[(0, 20_000)]);
    let cells = convert_all(&mut conv, 1 << 16);

    let buffer = &cells[0];
    let mut at = 0i64;
    let mut columns = Vec::new();
    while at < buffer.len() as i64 {
        let _row = read_value::<i64>(buffer, &mut at);
        columns.push(read_value::<i64>(buffer, &mut at));
        let _end = read_value::<i64>(buffer, &mut at);
        let _ref = read_string(buffer, &mut at);
        let _alt = read_string(buffer, &mut at);
        let _qual = read_value::<f32>(buffer, &mut at);
        for _ in 0..3 {
            let count = read_value::<i32>(buffer, &mut at);
            for _ in 0..count {
                let _value = read_value::<i32>(buffer, &mut at);
            }
        }
    }
    assert_eq!(at, buffer.len() as i64);
    assert_eq!(columns, vec![100, 999, 1000, 10_004]);
}

#[test]
fn partition_split_routes_each_record_once() {
    let file = fixture_file(FIXTURE);

    // column 999 lands in the first partition, 1000 in the second
    let mut split = converter(file.path(), &[(0, 1000), (1000, 20_000)]);
    let split_cells = convert_all(&mut split, 1 << 16);

    let mut whole = converter(file.path(), &[(0, 20_000)]);
    let whole_cells = convert_all(&mut whole, 1 << 16);

    let mut at = 0i64;
    let _row = read_value::<i64>(&split_cells[1], &mut at);
    assert_eq!(read_value::<i64>(&split_cells[1], &mut at), 1000);

    // no duplication, no loss
    let rejoined: Vec<u8> = split_cells.concat();
    assert_eq!(rejoined, whole_cells[0]);
}

#[test]
fn undersized_buffer_output_is_identical() {
    let file = fixture_file(FIXTURE);

    let mut cramped = converter(file.path(), &[(0, 20_000)]);
    // too small for any record; the driver grows it until one fits
    let cramped_cells = convert_all(&mut cramped, 8);

    let mut roomy = converter(file.path(), &[(0, 20_000)]);
    let roomy_cells = convert_all(&mut roomy, 1 << 16);

    assert_eq!(cramped_cells, roomy_cells);
}

#[test]
fn conversion_is_deterministic() {
    let file = fixture_file(FIXTURE);
    let bounds = [(0, 1000), (1000, 20_000)];

    let mut first = converter(file.path(), &bounds);
    let mut second = converter(file.path(), &bounds);
    assert_eq!(
        convert_all(&mut first, 1 << 16),
        convert_all(&mut second, 256)
    );
}

#[test]
fn parallel_partitions_match_shared_reader() {
    let file = fixture_file(FIXTURE);
    let bounds = [(0, 1000), (1000, 20_000)];

    let mut shared = converter(file.path(), &bounds);
    let shared_cells = convert_all(&mut shared, 1 << 16);

    let fields = CellFields::new(
        Vec::new(),
        vec!["GT".to_string(), "AD".to_string(), "PL".to_string()],
    );
    let mut owned = VcfConverter::builder()
        .fields(fields)
        .parallel_partitions(true)
        .build(file.path(), mapper(), &bounds)
        .unwrap();
    let owned_cells = convert_all(&mut owned, 1 << 16);

    assert_eq!(shared_cells, owned_cells);
}

#[test]
fn end_info_field_overrides_end_column() {
    let fixture = "\
##fileformat=VCFv4.3
##contig=<ID=chr1,length=10000>
##INFO=<ID=END,Number=1,Type=Integer,Description=\"End position\">
##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\ts0
chr1\t101\t.\tA\t<NON_REF>\t.\tPASS\tEND=200\tGT\t0/0
";
    let file = fixture_file(fixture);
    let vid = Arc::new(
        VidMapper::builder()
            .contig("chr1", 10_000)
            .field("GT")
            .callset("s0", true)
            .build(),
    );
    let mut conv = VcfConverter::builder()
        .fields(CellFields::new(Vec::new(), vec!["GT".to_string()]))
        .build(file.path(), vid, &[(0, 10_000)])
        .unwrap();
    let cells = convert_all(&mut conv, 1 << 16);

    let mut at = 0i64;
    let _row = read_value::<i64>(&cells[0], &mut at);
    assert_eq!(read_value::<i64>(&cells[0], &mut at), 100);
    assert_eq!(read_value::<i64>(&cells[0], &mut at), 199);
}

#[test]
fn deletions_span_their_reference_length() {
    let fixture = "\
##fileformat=VCFv4.3
##contig=<ID=chr1,length=10000>
##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\ts0
chr1\t301\t.\tACGT\tA\t40\tPASS\t.\tGT\t0/1
";
    let file = fixture_file(fixture);
    let vid = Arc::new(
        VidMapper::builder()
            .contig("chr1", 10_000)
            .field("GT")
            .callset("s0", true)
            .build(),
    );
    let mut conv = VcfConverter::builder()
        .fields(CellFields::new(Vec::new(), vec!["GT".to_string()]))
        .treat_deletions_as_intervals(true)
        .build(file.path(), vid, &[(0, 10_000)])
        .unwrap();
    let cells = convert_all(&mut conv, 1 << 16);

    let mut at = 0i64;
    let _row = read_value::<i64>(&cells[0], &mut at);
    assert_eq!(read_value::<i64>(&cells[0], &mut at), 300);
    assert_eq!(read_value::<i64>(&cells[0], &mut at), 303);
}

#[test]
fn disabled_callsets_are_skipped() {
    let fixture = "\
##fileformat=VCFv4.3
##contig=<ID=chr1,length=10000>
##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\ts0\ts1
chr1\t101\t.\tA\tT\t50\tPASS\t.\tGT\t0/1\t1/1
";
    let file = fixture_file(fixture);
    let vid = Arc::new(
        VidMapper::builder()
            .contig("chr1", 10_000)
            .field("GT")
            .callset("s0", false)
            .callset("s1", true)
            .build(),
    );
    let mut conv = VcfConverter::builder()
        .fields(CellFields::new(Vec::new(), vec!["GT".to_string()]))
        .build(file.path(), vid, &[(0, 10_000)])
        .unwrap();
    assert_eq!(conv.num_enabled_callsets(), 1);
    let cells = convert_all(&mut conv, 1 << 16);

    let mut at = 0i64;
    // only s1's cell, under its global row index
    assert_eq!(read_value::<i64>(&cells[0], &mut at), 1);
    assert_eq!(read_value::<i64>(&cells[0], &mut at), 100);
    at += 8; // end
    let _ref = read_string(&cells[0], &mut at);
    let _alt = read_string(&cells[0], &mut at);
    at += 4; // qual
    assert_eq!(read_value::<i32>(&cells[0], &mut at), 2);
    assert_eq!(read_value::<i32>(&cells[0], &mut at), 1);
    assert_eq!(read_value::<i32>(&cells[0], &mut at), 1);
    assert_eq!(at, cells[0].len() as i64);
}
