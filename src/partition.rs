//! Per-partition cursor state.
//!
//! A [`ColumnPartition`] tracks everything one column interval of one file needs
//! to resume scanning: the assigned bounds, the current contig cursor, and one
//! offset triple per enabled callset. It exposes accessors only; all mutation is
//! the converter's responsibility.
//!
//! The type is move-only. When a partition owns its reader (parallel-partition
//! mode) the open handle and its internal buffers cannot be shared by copy, so
//! ownership transfers exactly once on relocation.

use crate::source::VcfSource;

/// Byte offsets for one enabled callset within a partition's cell buffer.
///
/// Invariant: `begin <= last_full_line_end <= current`. A record is committed
/// only when `last_full_line_end` advances past it; bytes between
/// `last_full_line_end` and `current` belong to an uncommitted encode and are
/// rolled back on backpressure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallsetOffsets {
    begin: i64,
    last_full_line_end: i64,
    current: i64,
}

impl CallsetOffsets {
    /// Start of the callset's write window for the current batch.
    #[must_use]
    pub fn begin(&self) -> i64 {
        self.begin
    }

    /// End of the last fully committed record; bytes up to here are safe to persist.
    #[must_use]
    pub fn last_full_line_end(&self) -> i64 {
        self.last_full_line_end
    }

    /// Write cursor.
    #[must_use]
    pub fn current(&self) -> i64 {
        self.current
    }

    pub(crate) fn reset_to(&mut self, begin: i64) {
        self.begin = begin;
        self.last_full_line_end = begin;
        self.current = begin;
    }

    pub(crate) fn set_current(&mut self, current: i64) {
        debug_assert!(current >= self.last_full_line_end);
        self.current = current;
    }

    pub(crate) fn commit(&mut self) {
        self.last_full_line_end = self.current;
    }

    pub(crate) fn rollback(&mut self) {
        self.current = self.last_full_line_end;
    }

    /// Whether the ordering invariant holds.
    #[must_use]
    pub fn is_ordered(&self) -> bool {
        self.begin <= self.last_full_line_end && self.last_full_line_end <= self.current
    }
}

/// Scan status of a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionStatus {
    /// No record fetched yet, or the reader was closed; the next batch seeks first.
    Unpositioned,
    /// A record within the interval is pending encode or fetch.
    AtRecord,
    /// The source reports no further records within the interval; terminal.
    Exhausted,
}

/// Cursor for one `[begin, end)` column interval of one file.
#[derive(Debug)]
pub struct ColumnPartition {
    column_begin: i64,
    column_end: i64,
    /// Header-order contig index the cursor currently sits on.
    local_contig_idx: Option<usize>,
    /// 0-based position within that contig of the next record to fetch.
    contig_position: i64,
    /// Global column of the contig's first base.
    contig_column_offset: i64,
    /// Records at the cursor coordinate already committed; a re-seek to the
    /// cursor steps over exactly this many records.
    consumed_at_cursor: usize,
    /// Stream identity of the pending record, when the reader still holds it.
    pending_token: Option<(u64, u64)>,
    offsets: Vec<CallsetOffsets>,
    status: PartitionStatus,
    /// Owned reader in parallel-partition mode; `None` when a shared reader is used.
    reader: Option<VcfSource>,
}

impl ColumnPartition {
    pub(crate) fn new(
        column_begin: i64,
        column_end: i64,
        num_enabled_callsets: usize,
        reader: Option<VcfSource>,
    ) -> Self {
        Self {
            column_begin,
            column_end,
            local_contig_idx: None,
            contig_position: 0,
            contig_column_offset: 0,
            consumed_at_cursor: 0,
            pending_token: None,
            offsets: vec![CallsetOffsets::default(); num_enabled_callsets],
            status: PartitionStatus::Unpositioned,
            reader,
        }
    }

    /// Inclusive lower bound of the assigned column interval.
    #[must_use]
    pub fn column_begin(&self) -> i64 {
        self.column_begin
    }

    /// Exclusive upper bound of the assigned column interval.
    #[must_use]
    pub fn column_end(&self) -> i64 {
        self.column_end
    }

    #[must_use]
    pub fn status(&self) -> PartitionStatus {
        self.status
    }

    /// Header-order contig index of the cursor, once positioned.
    #[must_use]
    pub fn local_contig_idx(&self) -> Option<usize> {
        self.local_contig_idx
    }

    /// 0-based contig position of the next record to fetch.
    #[must_use]
    pub fn contig_position(&self) -> i64 {
        self.contig_position
    }

    /// Global column offset of the cursor's contig.
    #[must_use]
    pub fn contig_column_offset(&self) -> i64 {
        self.contig_column_offset
    }

    /// Offset triples, one per enabled callset in ascending local order.
    #[must_use]
    pub fn offsets(&self) -> &[CallsetOffsets] {
        &self.offsets
    }

    pub(crate) fn offsets_mut(&mut self) -> &mut [CallsetOffsets] {
        &mut self.offsets
    }

    pub(crate) fn set_status(&mut self, status: PartitionStatus) {
        // Exhausted is terminal
        if self.status != PartitionStatus::Exhausted {
            self.status = status;
        }
    }

    pub(crate) fn set_cursor(
        &mut self,
        local_contig_idx: usize,
        contig_position: i64,
        contig_column_offset: i64,
    ) {
        self.local_contig_idx = Some(local_contig_idx);
        self.contig_position = contig_position;
        self.contig_column_offset = contig_column_offset;
    }

    /// Committed records sitting exactly on the cursor coordinate.
    #[must_use]
    pub fn consumed_at_cursor(&self) -> usize {
        self.consumed_at_cursor
    }

    pub(crate) fn note_record_consumed(&mut self) {
        self.consumed_at_cursor += 1;
    }

    pub(crate) fn reset_consumed_at_cursor(&mut self) {
        self.consumed_at_cursor = 0;
    }

    pub(crate) fn pending_token(&self) -> Option<(u64, u64)> {
        self.pending_token
    }

    pub(crate) fn set_pending_token(&mut self, token: Option<(u64, u64)>) {
        self.pending_token = token;
    }

    pub(crate) fn reader_mut(&mut self) -> Option<&mut VcfSource> {
        self.reader.as_mut()
    }

    /// Transfer the owned reader out, exactly once per batch step.
    pub(crate) fn take_reader(&mut self) -> Option<VcfSource> {
        self.reader.take()
    }

    pub(crate) fn put_reader(&mut self, reader: VcfSource) {
        debug_assert!(self.reader.is_none());
        self.reader = Some(reader);
    }
}

/// Exchange state for one partition across a batch call.
///
/// The caller requests a fetch before the batch; the converter marks the batch
/// completed once the partition is exhausted.
#[derive(Debug, Clone, Copy, Default)]
pub struct PartitionBatch {
    fetch_requested: bool,
    completed: bool,
}

impl PartitionBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the next batch call to service this partition.
    pub fn request_fetch(&mut self) {
        self.fetch_requested = true;
    }

    #[must_use]
    pub fn is_fetch_requested(&self) -> bool {
        self.fetch_requested
    }

    pub(crate) fn clear_fetch(&mut self) {
        self.fetch_requested = false;
    }

    pub(crate) fn set_completed(&mut self) {
        self.completed = true;
    }

    /// Whether the partition has produced all data within its interval.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed
    }
}
