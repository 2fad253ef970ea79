//! Conversion orchestrator.
//!
//! [`VcfConverter`] owns the partition states for one call-set file and drives the
//! whole callset-to-binary pipeline: per batch it aligns each partition's position
//! (seeking when stale), pulls records, and encodes every queried field per enabled
//! callset into the caller's buffer at the partition's current offset. A partition
//! stops for the batch when its per-callset byte budget is exhausted; the pending
//! record is rolled back and re-encoded on the next call.
//!
//! One assumption is load-bearing: the file's header contig order must agree with
//! the id mapper's global column order. A record whose column falls before its
//! partition's interval after a seek violates that assumption and fails fast.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use noodles::core::Region;
use noodles::vcf::{
    header::record::value::map::{format, info},
    variant::{
        record::samples::{keys::key, series::value::genotype::Phasing},
        record_buf::{
            info::field::{value::Array as InfoArray, Value as InfoValue},
            samples::sample::{
                value::genotype::{Allele, Genotype},
                value::Array as SampleArray,
                Value as SampleValue,
            },
        },
        RecordBuf,
    },
};
use tracing::debug;

use crate::cell::{write_null, write_string, write_value, CellValue};
use crate::error::{Error, InvariantError, Result, SchemaError, SourceError};
use crate::histogram::UniformHistogram;
use crate::partition::{ColumnPartition, PartitionBatch, PartitionStatus};
use crate::source::VcfSource;
use crate::vid::VidMapper;
use crate::{DEFAULT_SIZE_PER_CALLSET, STRING_SEPARATOR};

/// Whether a field is record-level (INFO) or per-callset (FORMAT).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldClass {
    Info,
    Format,
}

/// The queried field-name table, split into record-level and per-callset groups.
#[derive(Debug, Clone, Default)]
pub struct CellFields {
    info: Vec<String>,
    format: Vec<String>,
}

impl CellFields {
    #[must_use]
    pub fn new(info: Vec<String>, format: Vec<String>) -> Self {
        Self { info, format }
    }

    #[must_use]
    pub fn info_fields(&self) -> &[String] {
        &self.info
    }

    #[must_use]
    pub fn format_fields(&self) -> &[String] {
        &self.format
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldType {
    Integer,
    Float,
    Flag,
    Text,
}

/// A queried field resolved against the source header and the id mapper.
#[derive(Debug, Clone)]
struct ResolvedField {
    name: String,
    class: FieldClass,
    ty: FieldType,
    /// Store-global field index from the id mapper.
    global_idx: usize,
    /// Declared cardinality when fixed; variable-arity fields carry `None`.
    fixed_arity: Option<usize>,
}

/// Builder for [`VcfConverter`].
#[derive(Debug, Clone)]
pub struct VcfConverterBuilder {
    fields: CellFields,
    file_idx: usize,
    region: Option<Region>,
    max_size_per_callset: usize,
    treat_deletions_as_intervals: bool,
    parallel_partitions: bool,
    read_only: bool,
    close_file: bool,
    discard_index: bool,
}

impl Default for VcfConverterBuilder {
    fn default() -> Self {
        Self {
            fields: CellFields::default(),
            file_idx: 0,
            region: None,
            max_size_per_callset: DEFAULT_SIZE_PER_CALLSET,
            treat_deletions_as_intervals: false,
            parallel_partitions: false,
            read_only: true,
            close_file: false,
            discard_index: false,
        }
    }
}

impl VcfConverterBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the queried INFO/FORMAT field-name table.
    #[must_use]
    pub fn fields(mut self, fields: CellFields) -> Self {
        self.fields = fields;
        self
    }

    /// Index of this file within the loader's file list.
    #[must_use]
    pub fn file_idx(mut self, file_idx: usize) -> Self {
        self.file_idx = file_idx;
        self
    }

    /// Restrict conversion to one coordinate region.
    #[must_use]
    pub fn region(mut self, region: Region) -> Self {
        self.region = Some(region);
        self
    }

    /// Default per-callset byte budget used to size batch buffers.
    #[must_use]
    pub fn max_size_per_callset(mut self, size: usize) -> Self {
        self.max_size_per_callset = size;
        self
    }

    /// Emit multi-column deletions with an explicit END column.
    #[must_use]
    pub fn treat_deletions_as_intervals(mut self, enabled: bool) -> Self {
        self.treat_deletions_as_intervals = enabled;
        self
    }

    /// Give every partition its own reader so disjoint workers can drive them.
    #[must_use]
    pub fn parallel_partitions(mut self, enabled: bool) -> Self {
        self.parallel_partitions = enabled;
        self
    }

    /// Treat the source as strictly read-only.
    #[must_use]
    pub fn read_only(mut self, enabled: bool) -> Self {
        self.read_only = enabled;
        self
    }

    /// Close readers after every batch, trading reopen latency for descriptors.
    #[must_use]
    pub fn close_file(mut self, enabled: bool) -> Self {
        self.close_file = enabled;
        self
    }

    /// Never use an index for seeks, even when one is present.
    #[must_use]
    pub fn discard_index(mut self, enabled: bool) -> Self {
        self.discard_index = enabled;
        self
    }

    /// Build the converter, resolving the file's local tables against the id
    /// mapper and creating one partition state per supplied column interval.
    pub fn build(
        self,
        path: impl AsRef<Path>,
        vid_mapper: Arc<VidMapper>,
        partition_bounds: &[(i64, i64)],
    ) -> Result<VcfConverter> {
        let mut converter = VcfConverter {
            path: path.as_ref().to_path_buf(),
            fields: self.fields,
            file_idx: self.file_idx,
            region: self.region,
            vid_mapper,
            max_size_per_callset: self.max_size_per_callset,
            treat_deletions_as_intervals: self.treat_deletions_as_intervals,
            parallel_partitions: self.parallel_partitions,
            read_only: self.read_only,
            close_file: self.close_file,
            discard_index: self.discard_index,
            shared_source: None,
            partitions: Vec::new(),
            local_contig_to_global: Vec::new(),
            local_callset_to_row: Vec::new(),
            enabled_callsets: Vec::new(),
            info_fields: Vec::new(),
            format_fields: Vec::new(),
            histogram: None,
        };
        converter.initialize_partitions(partition_bounds)?;
        Ok(converter)
    }
}

/// Converts one call-set file into partition-ordered binary cells.
#[derive(Debug)]
pub struct VcfConverter {
    path: PathBuf,
    fields: CellFields,
    file_idx: usize,
    region: Option<Region>,
    vid_mapper: Arc<VidMapper>,
    max_size_per_callset: usize,
    treat_deletions_as_intervals: bool,
    parallel_partitions: bool,
    read_only: bool,
    close_file: bool,
    discard_index: bool,
    /// Common reader when `parallel_partitions` is off.
    shared_source: Option<VcfSource>,
    partitions: Vec<ColumnPartition>,
    /// Header-order contig index to store-global contig index.
    local_contig_to_global: Vec<Option<usize>>,
    /// Local callset index to store-global row index.
    local_callset_to_row: Vec<i64>,
    /// Local indices of enabled callsets, ascending.
    enabled_callsets: Vec<usize>,
    info_fields: Vec<ResolvedField>,
    format_fields: Vec<ResolvedField>,
    histogram: Option<UniformHistogram>,
}

impl VcfConverter {
    #[must_use]
    pub fn builder() -> VcfConverterBuilder {
        VcfConverterBuilder::new()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn file_idx(&self) -> usize {
        self.file_idx
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    #[must_use]
    pub fn max_size_per_callset(&self) -> usize {
        self.max_size_per_callset
    }

    #[must_use]
    pub fn partitions(&self) -> &[ColumnPartition] {
        &self.partitions
    }

    #[must_use]
    pub fn num_enabled_callsets(&self) -> usize {
        self.enabled_callsets.len()
    }

    /// Store-global indices of the queried fields, INFO then FORMAT, in
    /// declaration order.
    #[must_use]
    pub fn global_field_idxs(&self) -> Vec<usize> {
        self.info_fields
            .iter()
            .chain(&self.format_fields)
            .map(|field| field.global_idx)
            .collect()
    }

    /// Build one partition state per range and resolve the file's local
    /// contig/field/callset tables against the id mapper. Without parallel
    /// partitions all states share one reader; otherwise each owns its own.
    fn initialize_partitions(&mut self, partition_bounds: &[(i64, i64)]) -> Result<()> {
        let primary = VcfSource::new(&self.path, self.region.clone(), &self.fields, true)?;
        self.resolve_local_tables(&primary)?;

        let num_enabled = self.enabled_callsets.len();
        let mut primary = Some(primary);
        for &(begin, end) in partition_bounds {
            let reader = if self.parallel_partitions {
                Some(match primary.take() {
                    Some(source) => source,
                    None => VcfSource::new(&self.path, self.region.clone(), &self.fields, false)?,
                })
            } else {
                None
            };
            self.partitions
                .push(ColumnPartition::new(begin, end, num_enabled, reader));
        }
        if !self.parallel_partitions {
            // every partition counts as one user of the shared handle
            let mut shared = primary.take().ok_or(InvariantError::MissingReader(0))?;
            for _ in 0..self.partitions.len() {
                shared.add_user()?;
            }
            self.shared_source = Some(shared);
        }
        if self.close_file {
            self.close_readers();
        }
        debug!(
            path = %self.path.display(),
            partitions = self.partitions.len(),
            callsets = num_enabled,
            parallel = self.parallel_partitions,
            "initialized partitions"
        );
        Ok(())
    }

    fn resolve_local_tables(&mut self, source: &VcfSource) -> Result<()> {
        let header = Arc::clone(
            source
                .header()
                .ok_or_else(|| SourceError::HandleClosed(self.path.display().to_string()))?,
        );

        self.local_contig_to_global = header
            .contigs()
            .keys()
            .map(|name| {
                self.vid_mapper
                    .contig_by_name(name)
                    .map(crate::vid::ContigInfo::global_idx)
            })
            .collect();

        for (local_idx, name) in header.sample_names().iter().enumerate() {
            let callset = self
                .vid_mapper
                .callset(name)
                .ok_or_else(|| SchemaError::UnknownCallset(name.clone()))?;
            self.local_callset_to_row.push(callset.row_idx());
            if callset.is_enabled() {
                self.enabled_callsets.push(local_idx);
            }
        }

        for name in self.fields.info_fields() {
            let map = header
                .infos()
                .get(name.as_str())
                .ok_or_else(|| SchemaError::UnknownField(name.clone()))?;
            let global_idx = self
                .vid_mapper
                .global_field_idx(name)
                .ok_or_else(|| SchemaError::UnknownField(name.clone()))?;
            let ty = match map.ty() {
                info::Type::Integer => FieldType::Integer,
                info::Type::Float => FieldType::Float,
                info::Type::Flag => FieldType::Flag,
                info::Type::Character | info::Type::String => FieldType::Text,
            };
            let declared = match map.number() {
                info::Number::Count(n) => Some(n),
                _ => None,
            };
            self.info_fields.push(ResolvedField {
                name: name.clone(),
                class: FieldClass::Info,
                ty,
                global_idx,
                fixed_arity: fixed_arity_of(ty, declared),
            });
        }
        for name in self.fields.format_fields() {
            let map = header
                .formats()
                .get(name.as_str())
                .ok_or_else(|| SchemaError::UnknownField(name.clone()))?;
            let global_idx = self
                .vid_mapper
                .global_field_idx(name)
                .ok_or_else(|| SchemaError::UnknownField(name.clone()))?;
            let ty = match map.ty() {
                format::Type::Integer => FieldType::Integer,
                format::Type::Float => FieldType::Float,
                format::Type::Character | format::Type::String => FieldType::Text,
            };
            let declared = match map.number() {
                format::Number::Count(n) => Some(n),
                _ => None,
            };
            self.format_fields.push(ResolvedField {
                name: name.clone(),
                class: FieldClass::Format,
                ty,
                global_idx,
                fixed_arity: fixed_arity_of(ty, declared),
            });
        }
        Ok(())
    }

    fn close_readers(&mut self) {
        if let Some(source) = self.shared_source.as_mut() {
            source.close();
        }
        for partition in &mut self.partitions {
            if let Some(reader) = partition.reader_mut() {
                reader.close();
            }
        }
    }

    /// Deterministically assign each enabled callset a slot in a global row
    /// ordering, advancing the caller-owned counter so multiple files compose
    /// one stable order.
    pub fn assign_callset_order(&self, order_value: &mut i64, row_idx_to_order: &mut [i64]) {
        for &local_idx in &self.enabled_callsets {
            let row = self.local_callset_to_row[local_idx] as usize;
            row_idx_to_order[row] = *order_value;
            *order_value += 1;
        }
    }

    /// Append global row indices of enabled callsets for a requested partition
    /// batch, honoring the external offset so multiple files compose one row space.
    pub fn list_active_row_idxs(
        &self,
        batch: &PartitionBatch,
        row_idx_offset: &mut i64,
        out: &mut Vec<i64>,
    ) {
        if !batch.is_fetch_requested() {
            return;
        }
        for &local_idx in &self.enabled_callsets {
            out.push(self.local_callset_to_row[local_idx]);
        }
        *row_idx_offset += self.enabled_callsets.len() as i64;
    }

    /// Start profiling per-callset encoded cell sizes.
    pub fn create_histogram(&mut self, max_range: u64, num_bins: usize) {
        self.histogram = Some(UniformHistogram::new(max_range, num_bins));
    }

    #[must_use]
    pub fn histogram(&self) -> Option<&UniformHistogram> {
        self.histogram.as_ref()
    }

    /// Service one batch: for every partition with a requested fetch and data
    /// remaining, align its position, then pull and encode records until its
    /// per-callset budget (derived from the buffer length) is exhausted or the
    /// interval ends.
    ///
    /// On return, each partition's [`crate::CallsetOffsets`] tell the caller how
    /// many bytes per callset window are safe to persist. `close_after` closes
    /// readers afterwards to bound descriptor usage.
    pub fn read_next_batch(
        &mut self,
        buffers: &mut [Vec<u8>],
        batches: &mut [PartitionBatch],
        close_after: bool,
    ) -> Result<()> {
        if buffers.len() != self.partitions.len() {
            return Err(InvariantError::PartitionCountMismatch {
                expected: self.partitions.len(),
                got: buffers.len(),
            }
            .into());
        }
        if batches.len() != self.partitions.len() {
            return Err(InvariantError::PartitionCountMismatch {
                expected: self.partitions.len(),
                got: batches.len(),
            }
            .into());
        }

        for idx in 0..self.partitions.len() {
            if !batches[idx].is_fetch_requested() {
                continue;
            }
            batches[idx].clear_fetch();
            if self.partitions[idx].status() == PartitionStatus::Exhausted {
                batches[idx].set_completed();
                continue;
            }

            let mut reader = if self.parallel_partitions {
                self.partitions[idx]
                    .take_reader()
                    .ok_or(InvariantError::MissingReader(idx))?
            } else {
                self.shared_source
                    .take()
                    .ok_or(InvariantError::MissingReader(idx))?
            };
            reader.open()?;

            let outcome = self.process_partition(idx, &mut reader, &mut buffers[idx]);

            if close_after || self.close_file {
                reader.close();
                self.partitions[idx].set_status(PartitionStatus::Unpositioned);
            }
            if self.parallel_partitions {
                self.partitions[idx].put_reader(reader);
            } else {
                self.shared_source = Some(reader);
            }
            outcome?;

            if self.partitions[idx].status() == PartitionStatus::Exhausted {
                batches[idx].set_completed();
            }
        }
        Ok(())
    }

    fn process_partition(
        &mut self,
        idx: usize,
        reader: &mut VcfSource,
        buffer: &mut [u8],
    ) -> Result<()> {
        let num_enabled = self.enabled_callsets.len();
        if num_enabled == 0 {
            self.partitions[idx].set_status(PartitionStatus::Exhausted);
            return Ok(());
        }
        let size_per_callset = (buffer.len() / num_enabled) as i64;

        // fresh write windows; the caller consumed the previous batch
        {
            let partition = &mut self.partitions[idx];
            for (slot, offsets) in partition.offsets_mut().iter_mut().enumerate() {
                offsets.reset_to(slot as i64 * size_per_callset);
            }
        }

        // the reader still holds this partition's pending record only when its
        // position token survived; any other state (reopen, repositioning by a
        // sibling partition sharing the handle) forces a seek
        let pending = self.partitions[idx].pending_token();
        let on_pending = pending.is_some() && reader.position_token() == pending;
        if on_pending {
            self.refresh_cursor(idx, reader)?;
        } else {
            match self.seek_target(idx, reader)? {
                Some((contig, position)) => {
                    // a re-seek revisits committed records when several share
                    // the cursor coordinate; step over the consumed ones
                    let skip = self.partitions[idx].consumed_at_cursor();
                    reader.seek_advance(&contig, position, skip, self.discard_index)?;
                    self.refresh_cursor(idx, reader)?;
                }
                None => self.partitions[idx].set_status(PartitionStatus::Exhausted),
            }
        }

        while self.partitions[idx].status() == PartitionStatus::AtRecord {
            if !self.convert_record(idx, reader, buffer, size_per_callset)? {
                // budget exhausted; the pending record is re-attempted next call
                break;
            }
            reader.read_advance()?;
            self.refresh_cursor(idx, reader)?;
        }

        for (slot, offsets) in self.partitions[idx].offsets().iter().enumerate() {
            if !offsets.is_ordered() {
                return Err(InvariantError::OffsetOrder {
                    callset_idx: slot,
                    begin: offsets.begin(),
                    last_full_line_end: offsets.last_full_line_end(),
                    current: offsets.current(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Coordinate the partition should seek to: the pending cursor once
    /// positioned, else the first file contig overlapping the interval.
    fn seek_target(&self, idx: usize, reader: &VcfSource) -> Result<Option<(String, i64)>> {
        let partition = &self.partitions[idx];
        let header = reader
            .header()
            .ok_or_else(|| SourceError::HandleClosed(self.path.display().to_string()))?;

        if let Some(local_idx) = partition.local_contig_idx() {
            let (name, _) = header
                .contigs()
                .get_index(local_idx)
                .ok_or_else(|| SourceError::CorruptRecord {
                    path: self.path.display().to_string(),
                    message: format!("contig index {local_idx} out of header range"),
                })?;
            return Ok(Some((name.clone(), partition.contig_position())));
        }

        let mut best: Option<(String, i64, i64)> = None;
        for name in header.contigs().keys() {
            let Some(contig) = self.vid_mapper.contig_by_name(name) else {
                continue;
            };
            let span_begin = contig.column_offset();
            let span_end = span_begin + contig.length();
            let lo = span_begin.max(partition.column_begin());
            let hi = span_end.min(partition.column_end());
            if lo < hi && best.as_ref().is_none_or(|(_, _, column)| lo < *column) {
                best = Some((name.clone(), lo - span_begin, lo));
            }
        }
        Ok(best.map(|(name, position, _)| (name, position)))
    }

    /// Re-validate the reader's current record against the partition interval,
    /// re-resolving the contig mapping when the cached local contig went stale.
    fn refresh_cursor(&mut self, idx: usize, reader: &VcfSource) -> Result<()> {
        let Some(record) = reader.current_record() else {
            self.partitions[idx].set_status(PartitionStatus::Exhausted);
            debug!(partition = idx, "partition exhausted");
            return Ok(());
        };
        let name = record.reference_sequence_name().to_string();
        let (local_rank, position) = reader.record_coordinate()?;

        let moved = self.partitions[idx].local_contig_idx() != Some(local_rank)
            || self.partitions[idx].contig_position() != position;

        if self.partitions[idx].local_contig_idx() != Some(local_rank) {
            self.update_local_contig_idx(idx, local_rank, &name)?;
        }

        let partition = &mut self.partitions[idx];
        let column = partition.contig_column_offset() + position;
        if column >= partition.column_end() {
            partition.set_status(PartitionStatus::Exhausted);
            return Ok(());
        }
        if column < partition.column_begin() {
            return Err(InvariantError::RecordOutsidePartition {
                column,
                begin: partition.column_begin(),
                end: partition.column_end(),
            }
            .into());
        }
        partition.set_cursor(local_rank, position, partition.contig_column_offset());
        if moved {
            partition.reset_consumed_at_cursor();
        }
        partition.set_pending_token(reader.position_token());
        partition.set_status(PartitionStatus::AtRecord);
        Ok(())
    }

    /// Re-resolve the local-to-global contig mapping and column offset when a
    /// record's contig differs from the cached one.
    fn update_local_contig_idx(&mut self, idx: usize, local_rank: usize, name: &str) -> Result<()> {
        let global_idx = self
            .local_contig_to_global
            .get(local_rank)
            .copied()
            .flatten()
            .ok_or_else(|| SchemaError::UnknownContig(name.to_string()))?;
        let offset = self
            .vid_mapper
            .contig(global_idx)
            .ok_or_else(|| SchemaError::UnknownContig(name.to_string()))?
            .column_offset();
        let partition = &mut self.partitions[idx];
        partition.set_cursor(local_rank, partition.contig_position(), offset);
        Ok(())
    }

    /// Encode the pending record for every enabled callset.
    ///
    /// Returns `Ok(false)` when any callset window cannot hold the record; all
    /// cursors roll back to their last committed offset and nothing is visible
    /// to the caller. On success every callset's record is committed atomically.
    fn convert_record(
        &mut self,
        idx: usize,
        reader: &VcfSource,
        buffer: &mut [u8],
        size_per_callset: i64,
    ) -> Result<bool> {
        let record = reader
            .current_record()
            .ok_or(InvariantError::PendingRecordLost(idx))?;

        let (contig_offset, column, windows) = {
            let partition = &self.partitions[idx];
            let contig_offset = partition.contig_column_offset();
            let column = contig_offset + partition.contig_position();
            let windows: Vec<(i64, i64)> = partition
                .offsets()
                .iter()
                .map(|o| (o.current(), o.begin() + size_per_callset))
                .collect();
            (contig_offset, column, windows)
        };
        let end_column = self.record_end_column(record, contig_offset, column);

        let mut new_currents = Vec::with_capacity(windows.len());
        for (slot, &local_callset_idx) in self.enabled_callsets.iter().enumerate() {
            let (mut offset, limit) = windows[slot];
            if !self.encode_cell(
                buffer,
                &mut offset,
                limit,
                record,
                local_callset_idx,
                column,
                end_column,
            )? {
                debug!(
                    partition = idx,
                    callset = local_callset_idx,
                    column,
                    "buffer full, record deferred"
                );
                for offsets in self.partitions[idx].offsets_mut() {
                    offsets.rollback();
                }
                return Ok(false);
            }
            new_currents.push(offset);
        }

        let partition = &mut self.partitions[idx];
        let mut histogram = self.histogram.as_mut();
        for (offsets, current) in partition.offsets_mut().iter_mut().zip(new_currents) {
            offsets.set_current(current);
            if let Some(hist) = histogram.as_deref_mut() {
                hist.add((offsets.current() - offsets.last_full_line_end()) as u64);
            }
            offsets.commit();
        }
        // one more record at the cursor coordinate is now committed; a later
        // re-seek to this coordinate must step over it
        partition.note_record_consumed();
        Ok(true)
    }

    /// END column of a record: an explicit END INFO value wins; otherwise a
    /// deletion spans its reference length when interval mode is on.
    fn record_end_column(&self, record: &RecordBuf, contig_offset: i64, column: i64) -> i64 {
        if let Some(Some(InfoValue::Integer(end))) = record.info().get("END") {
            return contig_offset + i64::from(*end) - 1;
        }
        if self.treat_deletions_as_intervals {
            let ref_len = record.reference_bases().len() as i64;
            let alts: &[String] = record.alternate_bases().as_ref();
            if ref_len > 1 && alts.iter().any(|alt| (alt.len() as i64) < ref_len) {
                return column + ref_len - 1;
            }
        }
        column
    }

    /// Encode one full cell: row, column, END, REF, ALT, QUAL, then the queried
    /// INFO and FORMAT fields in declaration order.
    fn encode_cell(
        &self,
        buffer: &mut [u8],
        offset: &mut i64,
        offset_limit: i64,
        record: &RecordBuf,
        local_callset_idx: usize,
        column: i64,
        end_column: i64,
    ) -> Result<bool> {
        let mut cursor = *offset;
        let row = self.local_callset_to_row[local_callset_idx];
        if !write_value(buffer, &mut cursor, offset_limit, row)
            || !write_value(buffer, &mut cursor, offset_limit, column)
            || !write_value(buffer, &mut cursor, offset_limit, end_column)
        {
            return Ok(false);
        }

        if !write_string(
            buffer,
            &mut cursor,
            offset_limit,
            record.reference_bases().as_bytes(),
        ) {
            return Ok(false);
        }
        let alts: &[String] = record.alternate_bases().as_ref();
        let mut alt_run = Vec::new();
        for (i, alt) in alts.iter().enumerate() {
            if i > 0 {
                alt_run.push(STRING_SEPARATOR);
            }
            alt_run.extend_from_slice(alt.as_bytes());
        }
        if !write_string(buffer, &mut cursor, offset_limit, &alt_run) {
            return Ok(false);
        }

        let wrote_qual = match record.quality_score() {
            Some(quality) => write_value(buffer, &mut cursor, offset_limit, quality),
            None => write_null::<f32>(buffer, &mut cursor, offset_limit),
        };
        if !wrote_qual {
            return Ok(false);
        }

        for field in &self.info_fields {
            if !self.encode_resolved_field(
                buffer,
                &mut cursor,
                offset_limit,
                record,
                local_callset_idx,
                field,
            )? {
                return Ok(false);
            }
        }
        for field in &self.format_fields {
            if !self.encode_resolved_field(
                buffer,
                &mut cursor,
                offset_limit,
                record,
                local_callset_idx,
                field,
            )? {
                return Ok(false);
            }
        }
        *offset = cursor;
        Ok(true)
    }

    /// Encode one queried field by name.
    ///
    /// Returns `Ok(false)` without advancing `offset` when the encoding would
    /// exceed `offset_limit`; that is backpressure, not an error.
    pub fn encode_field(
        &self,
        buffer: &mut [u8],
        offset: &mut i64,
        offset_limit: i64,
        record: &RecordBuf,
        local_callset_idx: usize,
        field_name: &str,
        class: FieldClass,
    ) -> Result<bool> {
        let table = match class {
            FieldClass::Info => &self.info_fields,
            FieldClass::Format => &self.format_fields,
        };
        let field = table
            .iter()
            .find(|f| f.name == field_name)
            .ok_or_else(|| SchemaError::UnknownField(field_name.to_string()))?;
        self.encode_resolved_field(buffer, offset, offset_limit, record, local_callset_idx, field)
    }

    fn encode_resolved_field(
        &self,
        buffer: &mut [u8],
        offset: &mut i64,
        offset_limit: i64,
        record: &RecordBuf,
        local_callset_idx: usize,
        field: &ResolvedField,
    ) -> Result<bool> {
        if field.class == FieldClass::Format && field.name == key::GENOTYPE {
            return encode_genotype(buffer, offset, offset_limit, record, local_callset_idx, field);
        }
        match field.ty {
            FieldType::Integer => {
                let values = extract_ints(record, local_callset_idx, field)?;
                encode_counted::<i32>(buffer, offset, offset_limit, field, values)
            }
            FieldType::Float => {
                let values = extract_floats(record, local_callset_idx, field)?;
                encode_counted::<f32>(buffer, offset, offset_limit, field, values)
            }
            FieldType::Flag => {
                let present = matches!(
                    record.info().get(field.name.as_str()),
                    Some(Some(InfoValue::Flag))
                );
                let values = present.then(|| vec![Some(1i32)]);
                encode_counted::<i32>(buffer, offset, offset_limit, field, values)
            }
            FieldType::Text => {
                let run = extract_text(record, local_callset_idx, field)?;
                Ok(write_string(
                    buffer,
                    offset,
                    offset_limit,
                    run.as_deref().unwrap_or_default(),
                ))
            }
        }
    }
}

/// Fixed declared cardinality, when the header states one. `Flag` fields declare
/// zero values yet encode one presence marker, so they stay variable here.
fn fixed_arity_of(ty: FieldType, declared: Option<usize>) -> Option<usize> {
    match (ty, declared) {
        (FieldType::Flag | FieldType::Text, _) | (_, Some(0)) => None,
        (_, declared) => declared,
    }
}

/// Write an element count, the elements (missing sentinel per absent element),
/// and vector-end padding up to a fixed declared arity.
fn encode_counted<T: CellValue>(
    buffer: &mut [u8],
    offset: &mut i64,
    offset_limit: i64,
    field: &ResolvedField,
    values: Option<Vec<Option<T>>>,
) -> Result<bool> {
    let mut cursor = *offset;
    match values {
        None => {
            // a missing fixed-arity field still occupies its declared width
            let count = field.fixed_arity.unwrap_or(1).max(1);
            if !write_value(buffer, &mut cursor, offset_limit, count as i32)
                || !write_null::<T>(buffer, &mut cursor, offset_limit)
            {
                return Ok(false);
            }
            for _ in 1..count {
                if !write_value(buffer, &mut cursor, offset_limit, T::vector_end()) {
                    return Ok(false);
                }
            }
        }
        Some(values) => {
            let count = match field.fixed_arity {
                Some(declared) => {
                    if values.len() > declared {
                        return Err(SchemaError::ArityViolation {
                            field: field.name.clone(),
                            expected: declared,
                            got: values.len(),
                        }
                        .into());
                    }
                    declared
                }
                None => values.len(),
            };
            if !write_value(buffer, &mut cursor, offset_limit, count as i32) {
                return Ok(false);
            }
            for value in &values {
                let wrote = match value {
                    Some(value) => write_value(buffer, &mut cursor, offset_limit, *value),
                    None => write_null::<T>(buffer, &mut cursor, offset_limit),
                };
                if !wrote {
                    return Ok(false);
                }
            }
            for _ in values.len()..count {
                if !write_value(buffer, &mut cursor, offset_limit, T::vector_end()) {
                    return Ok(false);
                }
            }
        }
    }
    *offset = cursor;
    Ok(true)
}

/// Encode a genotype as an allele-index vector; `.` alleles become the missing
/// sentinel.
fn encode_genotype(
    buffer: &mut [u8],
    offset: &mut i64,
    offset_limit: i64,
    record: &RecordBuf,
    local_callset_idx: usize,
    field: &ResolvedField,
) -> Result<bool> {
    let series = record.samples().select(key::GENOTYPE);
    let value = match series.as_ref() {
        Some(series) => series.get(local_callset_idx).flatten(),
        None => None,
    };

    let alleles: Option<Vec<Option<i32>>> = match value {
        Some(SampleValue::Genotype(genotype)) => Some(allele_positions(genotype.as_ref())),
        Some(SampleValue::String(text)) => {
            let genotype = Genotype::from_str(text).map_err(|err| {
                Error::SchemaError(SchemaError::UnsupportedFieldType {
                    field: key::GENOTYPE.to_string(),
                    ty: format!("unparseable genotype '{text}': {err}"),
                })
            })?;
            Some(allele_positions(genotype.as_ref()))
        }
        Some(other) => {
            return Err(SchemaError::UnsupportedFieldType {
                field: key::GENOTYPE.to_string(),
                ty: format!("{other:?}"),
            }
            .into());
        }
        None => None,
    };

    encode_counted::<i32>(buffer, offset, offset_limit, field, alleles)
}

fn allele_positions(alleles: &[Allele]) -> Vec<Option<i32>> {
    alleles
        .iter()
        .map(|allele| allele.position().map(|p| p as i32))
        .collect()
}

/// Render a genotype back to its `0/1` style text form.
fn genotype_text(alleles: &[Allele]) -> Vec<u8> {
    let mut run = Vec::new();
    for (i, allele) in alleles.iter().enumerate() {
        if i > 0 {
            run.push(match allele.phasing() {
                Phasing::Phased => b'|',
                Phasing::Unphased => b'/',
            });
        }
        match allele.position() {
            Some(position) => run.extend_from_slice(position.to_string().as_bytes()),
            None => run.push(b'.'),
        }
    }
    run
}

fn extract_ints(
    record: &RecordBuf,
    local_callset_idx: usize,
    field: &ResolvedField,
) -> Result<Option<Vec<Option<i32>>>> {
    match field.class {
        FieldClass::Info => match record.info().get(field.name.as_str()) {
            None | Some(None) => Ok(None),
            Some(Some(InfoValue::Integer(n))) => Ok(Some(vec![Some(*n)])),
            Some(Some(InfoValue::Array(InfoArray::Integer(values)))) => Ok(Some(values.clone())),
            Some(Some(other)) => Err(type_mismatch(field, &format!("{other:?}"))),
        },
        FieldClass::Format => {
            let Some(series) = record.samples().select(field.name.as_str()) else {
                return Ok(None);
            };
            match series.get(local_callset_idx) {
                None | Some(None) => Ok(None),
                Some(Some(SampleValue::Integer(n))) => Ok(Some(vec![Some(*n)])),
                Some(Some(SampleValue::Array(SampleArray::Integer(values)))) => {
                    Ok(Some(values.clone()))
                }
                Some(Some(other)) => Err(type_mismatch(field, &format!("{other:?}"))),
            }
        }
    }
}

fn extract_floats(
    record: &RecordBuf,
    local_callset_idx: usize,
    field: &ResolvedField,
) -> Result<Option<Vec<Option<f32>>>> {
    match field.class {
        FieldClass::Info => match record.info().get(field.name.as_str()) {
            None | Some(None) => Ok(None),
            Some(Some(InfoValue::Float(f))) => Ok(Some(vec![Some(*f)])),
            Some(Some(InfoValue::Integer(n))) => Ok(Some(vec![Some(*n as f32)])),
            Some(Some(InfoValue::Array(InfoArray::Float(values)))) => Ok(Some(values.clone())),
            Some(Some(InfoValue::Array(InfoArray::Integer(values)))) => Ok(Some(
                values.iter().map(|v| v.map(|n| n as f32)).collect(),
            )),
            Some(Some(other)) => Err(type_mismatch(field, &format!("{other:?}"))),
        },
        FieldClass::Format => {
            let Some(series) = record.samples().select(field.name.as_str()) else {
                return Ok(None);
            };
            match series.get(local_callset_idx) {
                None | Some(None) => Ok(None),
                Some(Some(SampleValue::Float(f))) => Ok(Some(vec![Some(*f)])),
                Some(Some(SampleValue::Integer(n))) => Ok(Some(vec![Some(*n as f32)])),
                Some(Some(SampleValue::Array(SampleArray::Float(values)))) => {
                    Ok(Some(values.clone()))
                }
                Some(Some(SampleValue::Array(SampleArray::Integer(values)))) => Ok(Some(
                    values.iter().map(|v| v.map(|n| n as f32)).collect(),
                )),
                Some(Some(other)) => Err(type_mismatch(field, &format!("{other:?}"))),
            }
        }
    }
}

/// String/character fields pack into one byte run; multiple sub-values join on
/// the separator, missing sub-values read as `.`, a fully missing field as an
/// empty run.
fn extract_text(
    record: &RecordBuf,
    local_callset_idx: usize,
    field: &ResolvedField,
) -> Result<Option<Vec<u8>>> {
    fn join<T: ToString>(values: &[Option<T>]) -> Vec<u8> {
        let mut run = Vec::new();
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                run.push(STRING_SEPARATOR);
            }
            match value {
                Some(value) => run.extend_from_slice(value.to_string().as_bytes()),
                None => run.push(b'.'),
            }
        }
        run
    }

    match field.class {
        FieldClass::Info => match record.info().get(field.name.as_str()) {
            None | Some(None) => Ok(None),
            Some(Some(InfoValue::String(s))) => Ok(Some(s.as_bytes().to_vec())),
            Some(Some(InfoValue::Character(c))) => Ok(Some(c.to_string().into_bytes())),
            Some(Some(InfoValue::Array(InfoArray::String(values)))) => Ok(Some(join(values))),
            Some(Some(InfoValue::Array(InfoArray::Character(values)))) => Ok(Some(join(values))),
            Some(Some(other)) => Err(type_mismatch(field, &format!("{other:?}"))),
        },
        FieldClass::Format => {
            let Some(series) = record.samples().select(field.name.as_str()) else {
                return Ok(None);
            };
            match series.get(local_callset_idx) {
                None | Some(None) => Ok(None),
                Some(Some(SampleValue::String(s))) => Ok(Some(s.as_bytes().to_vec())),
                Some(Some(SampleValue::Character(c))) => Ok(Some(c.to_string().into_bytes())),
                Some(Some(SampleValue::Genotype(genotype))) => {
                    Ok(Some(genotype_text(genotype.as_ref())))
                }
                Some(Some(SampleValue::Array(SampleArray::String(values)))) => {
                    Ok(Some(join(values)))
                }
                Some(Some(SampleValue::Array(SampleArray::Character(values)))) => {
                    Ok(Some(join(values)))
                }
                Some(Some(other)) => Err(type_mismatch(field, &format!("{other:?}"))),
            }
        }
    }
}

fn type_mismatch(field: &ResolvedField, actual: &str) -> Error {
    SchemaError::UnsupportedFieldType {
        field: field.name.clone(),
        ty: actual.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{read_string, read_value};
    use std::io::Write;

    const FIXTURE: &str = "\
##fileformat=VCFv4.3
##contig=<ID=chr1,length=10000>
##INFO=<ID=DP,Number=1,Type=Integer,Description=\"Depth\">
##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">
##FORMAT=<ID=AD,Number=R,Type=Integer,Description=\"Allelic depths\">
##FORMAT=<ID=XAD,Number=2,Type=Integer,Description=\"Fixed-width depths\">
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\ts0
chr1\t101\t.\tA\tT\t50\tPASS\tDP=30\tGT:XAD\t0/1:10,5
chr1\t501\t.\tG\tC,GA\t.\tPASS\t.\tGT:XAD\t1/1:.
";

    fn fixture_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".vcf").tempfile().unwrap();
        file.write_all(FIXTURE.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn mapper() -> Arc<VidMapper> {
        Arc::new(
            VidMapper::builder()
                .contig("chr1", 10_000)
                .field("DP")
                .field("GT")
                .field("XAD")
                .callset("s0", true)
                .build(),
        )
    }

    fn converter(path: &Path, bounds: &[(i64, i64)]) -> VcfConverter {
        VcfConverter::builder()
            .fields(CellFields::new(
                vec!["DP".to_string()],
                vec!["GT".to_string(), "XAD".to_string()],
            ))
            .build(path, mapper(), bounds)
            .unwrap()
    }

    #[test]
    fn test_single_batch_encodes_both_records() {
        let file = fixture_file();
        let mut conv = converter(file.path(), &[(0, 10_000)]);

        let mut buffers = vec![vec![0u8; 4096]];
        let mut batches = vec![PartitionBatch::new()];
        batches[0].request_fetch();
        conv.read_next_batch(&mut buffers, &mut batches, false).unwrap();
        assert!(batches[0].is_completed());

        let offsets = conv.partitions()[0].offsets()[0];
        assert!(offsets.is_ordered());
        assert!(offsets.last_full_line_end() > 0);
        assert_eq!(offsets.last_full_line_end(), offsets.current());

        let buffer = &buffers[0];
        let mut at = 0i64;

        // first cell
        assert_eq!(read_value::<i64>(buffer, &mut at), 0);
        assert_eq!(read_value::<i64>(buffer, &mut at), 100);
        assert_eq!(read_value::<i64>(buffer, &mut at), 100);
        assert_eq!(read_string(buffer, &mut at), b"A");
        assert_eq!(read_string(buffer, &mut at), b"T");
        assert!((read_value::<f32>(buffer, &mut at) - 50.0).abs() < f32::EPSILON);
        assert_eq!(read_value::<i32>(buffer, &mut at), 1); // DP count
        assert_eq!(read_value::<i32>(buffer, &mut at), 30);
        assert_eq!(read_value::<i32>(buffer, &mut at), 2); // GT count
        assert_eq!(read_value::<i32>(buffer, &mut at), 0);
        assert_eq!(read_value::<i32>(buffer, &mut at), 1);
        assert_eq!(read_value::<i32>(buffer, &mut at), 2); // XAD count
        assert_eq!(read_value::<i32>(buffer, &mut at), 10);
        assert_eq!(read_value::<i32>(buffer, &mut at), 5);

        // second cell: multi-allelic, missing QUAL, missing DP and XAD
        assert_eq!(read_value::<i64>(buffer, &mut at), 0);
        assert_eq!(read_value::<i64>(buffer, &mut at), 500);
        assert_eq!(read_value::<i64>(buffer, &mut at), 500);
        assert_eq!(read_string(buffer, &mut at), b"G");
        assert_eq!(read_string(buffer, &mut at), b"C|GA");
        assert!(read_value::<f32>(buffer, &mut at).is_missing());
        assert_eq!(read_value::<i32>(buffer, &mut at), 1); // DP count
        assert!(read_value::<i32>(buffer, &mut at).is_missing());
        assert_eq!(read_value::<i32>(buffer, &mut at), 2); // GT count
        assert_eq!(read_value::<i32>(buffer, &mut at), 1);
        assert_eq!(read_value::<i32>(buffer, &mut at), 1);
        assert_eq!(read_value::<i32>(buffer, &mut at), 2); // XAD count
        assert!(read_value::<i32>(buffer, &mut at).is_missing());
        assert!(read_value::<i32>(buffer, &mut at).is_vector_end());

        assert_eq!(at, offsets.last_full_line_end());
    }

    #[test]
    fn test_undersized_buffer_defers_then_completes() {
        let file = fixture_file();
        let mut conv = converter(file.path(), &[(0, 10_000)]);

        let mut buffers = vec![vec![0u8; 16]];
        let mut batches = vec![PartitionBatch::new()];
        batches[0].request_fetch();
        conv.read_next_batch(&mut buffers, &mut batches, false).unwrap();

        // nothing committed, nothing lost
        assert!(!batches[0].is_completed());
        let offsets = conv.partitions()[0].offsets()[0];
        assert_eq!(offsets.last_full_line_end(), offsets.begin());

        buffers[0].resize(4096, 0);
        batches[0].request_fetch();
        conv.read_next_batch(&mut buffers, &mut batches, false).unwrap();
        assert!(batches[0].is_completed());

        let mut at = 0i64;
        assert_eq!(read_value::<i64>(&buffers[0], &mut at), 0);
        assert_eq!(read_value::<i64>(&buffers[0], &mut at), 100);
    }

    #[test]
    fn test_partition_split_routes_records() {
        let file = fixture_file();
        // records at columns 100 and 500; split at 300
        let mut conv = converter(file.path(), &[(0, 300), (300, 10_000)]);

        let mut buffers = vec![vec![0u8; 4096], vec![0u8; 4096]];
        let mut batches = vec![PartitionBatch::new(); 2];
        batches[0].request_fetch();
        batches[1].request_fetch();
        conv.read_next_batch(&mut buffers, &mut batches, false).unwrap();
        assert!(batches[0].is_completed());
        assert!(batches[1].is_completed());

        let mut at = 0i64;
        let _row = read_value::<i64>(&buffers[0], &mut at);
        assert_eq!(read_value::<i64>(&buffers[0], &mut at), 100);

        let mut at = 0i64;
        let _row = read_value::<i64>(&buffers[1], &mut at);
        assert_eq!(read_value::<i64>(&buffers[1], &mut at), 500);
    }

    #[test]
    fn test_close_after_batch_reopens_transparently() {
        let file = fixture_file();
        let mut conv = converter(file.path(), &[(0, 10_000)]);

        let mut buffers = vec![vec![0u8; 16]];
        let mut batches = vec![PartitionBatch::new()];
        batches[0].request_fetch();
        conv.read_next_batch(&mut buffers, &mut batches, true).unwrap();

        buffers[0].resize(4096, 0);
        batches[0].request_fetch();
        conv.read_next_batch(&mut buffers, &mut batches, true).unwrap();
        assert!(batches[0].is_completed());

        let mut at = 0i64;
        let _row = read_value::<i64>(&buffers[0], &mut at);
        assert_eq!(read_value::<i64>(&buffers[0], &mut at), 100);
    }

    #[test]
    fn test_duplicate_position_records_each_convert_once() {
        // two records share POS 101; a buffer holding one cell forces a
        // deferred record, and close_after makes every batch reopen and re-seek
        const DUP_FIXTURE: &str = "\
##fileformat=VCFv4.3
##contig=<ID=chr1,length=10000>
##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\ts0
chr1\t101\t.\tA\tT\t50\tPASS\t.\tGT\t0/1
chr1\t101\t.\tA\tG\t50\tPASS\t.\tGT\t0/1
";
        let mut file = tempfile::Builder::new().suffix(".vcf").tempfile().unwrap();
        file.write_all(DUP_FIXTURE.as_bytes()).unwrap();
        file.flush().unwrap();

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

        let mut buffers = vec![vec![0u8; 64]];
        let mut batches = vec![PartitionBatch::new()];
        let mut alts = Vec::new();
        for _ in 0..6 {
            if batches[0].is_completed() {
                break;
            }
            batches[0].request_fetch();
            conv.read_next_batch(&mut buffers, &mut batches, true).unwrap();

            let offsets = conv.partitions()[0].offsets()[0];
            let mut at = offsets.begin();
            while at < offsets.last_full_line_end() {
                let _row = read_value::<i64>(&buffers[0], &mut at);
                assert_eq!(read_value::<i64>(&buffers[0], &mut at), 100);
                let _end = read_value::<i64>(&buffers[0], &mut at);
                let _reference = read_string(&buffers[0], &mut at);
                let alt = read_string(&buffers[0], &mut at).to_vec();
                alts.push(String::from_utf8(alt).unwrap());
                let _qual = read_value::<f32>(&buffers[0], &mut at);
                let count = read_value::<i32>(&buffers[0], &mut at);
                for _ in 0..count {
                    let _allele = read_value::<i32>(&buffers[0], &mut at);
                }
            }
        }

        assert!(batches[0].is_completed());
        assert_eq!(alts, ["T", "G"]);
    }

    #[test]
    fn test_fields_resolve_against_mapper() {
        let file = fixture_file();
        let conv = converter(file.path(), &[(0, 10_000)]);
        // DP, GT, XAD in mapper registration order
        assert_eq!(conv.global_field_idxs(), [0, 1, 2]);
    }

    #[test]
    fn test_field_unknown_to_mapper_fails_fast() {
        let file = fixture_file();
        // AD is in the header but not registered with the mapper
        let vid = Arc::new(
            VidMapper::builder()
                .contig("chr1", 10_000)
                .field("DP")
                .field("GT")
                .callset("s0", true)
                .build(),
        );
        let err = VcfConverter::builder()
            .fields(CellFields::new(
                vec!["DP".to_string()],
                vec!["GT".to_string(), "AD".to_string()],
            ))
            .build(file.path(), vid, &[(0, 10_000)])
            .unwrap_err();
        assert!(matches!(
            err,
            Error::SchemaError(SchemaError::UnknownField(name)) if name == "AD"
        ));
    }

    #[test]
    fn test_genotype_text_round_trips() {
        let genotype = Genotype::from_str("0|1").unwrap();
        assert_eq!(genotype_text(genotype.as_ref()), b"0|1");
        let genotype = Genotype::from_str("./1").unwrap();
        assert_eq!(genotype_text(genotype.as_ref()), b"./1");
    }

    #[test]
    fn test_unknown_sample_fails_fast() {
        let file = fixture_file();
        let vid = Arc::new(VidMapper::builder().contig("chr1", 10_000).build());
        let err = VcfConverter::builder()
            .build(file.path(), vid, &[(0, 10_000)])
            .unwrap_err();
        assert!(matches!(
            err,
            Error::SchemaError(SchemaError::UnknownCallset(_))
        ));
    }

    #[test]
    fn test_assign_callset_order_is_dense() {
        let file = fixture_file();
        let conv = converter(file.path(), &[(0, 10_000)]);
        let mut order = 5i64;
        let mut row_to_order = vec![-1i64; 1];
        conv.assign_callset_order(&mut order, &mut row_to_order);
        assert_eq!(row_to_order[0], 5);
        assert_eq!(order, 6);
    }

    #[test]
    fn test_histogram_tracks_cell_sizes() {
        let file = fixture_file();
        let mut conv = converter(file.path(), &[(0, 10_000)]);
        conv.create_histogram(4096, 16);

        let mut buffers = vec![vec![0u8; 4096]];
        let mut batches = vec![PartitionBatch::new()];
        batches[0].request_fetch();
        conv.read_next_batch(&mut buffers, &mut batches, false).unwrap();

        let hist = conv.histogram().unwrap();
        assert_eq!(hist.total(), 2);
    }
}
