//! Store-global id resolution.
//!
//! The [`VidMapper`] resolves per-file local indices (contigs by header order,
//! fields and callsets by name) to store-global indices. It is read-only after
//! construction and is shared across converters via `Arc` without synchronization.

use std::collections::HashMap;

/// A reference sequence known to the store.
#[derive(Debug, Clone)]
pub struct ContigInfo {
    name: String,
    global_idx: usize,
    /// Offset of this contig's first base in the global column space.
    column_offset: i64,
    length: i64,
}

impl ContigInfo {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn global_idx(&self) -> usize {
        self.global_idx
    }

    #[must_use]
    pub fn column_offset(&self) -> i64 {
        self.column_offset
    }

    #[must_use]
    pub fn length(&self) -> i64 {
        self.length
    }

    /// Global column for a 0-based position within this contig.
    #[must_use]
    pub fn column_for_position(&self, position: i64) -> i64 {
        self.column_offset + position
    }
}

/// One sample's stream as known to the store.
#[derive(Debug, Clone)]
pub struct CallsetInfo {
    name: String,
    /// Global row index in the store's row space.
    row_idx: i64,
    enabled: bool,
}

impl CallsetInfo {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn row_idx(&self) -> i64 {
        self.row_idx
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Maps per-file local contig/field/callset indices to store-global indices.
#[derive(Debug, Default)]
pub struct VidMapper {
    contigs: Vec<ContigInfo>,
    contig_by_name: HashMap<String, usize>,
    fields: HashMap<String, usize>,
    callsets: HashMap<String, CallsetInfo>,
}

impl VidMapper {
    /// Start building a mapper; contigs gain column offsets in insertion order.
    #[must_use]
    pub fn builder() -> VidMapperBuilder {
        VidMapperBuilder::default()
    }

    /// Resolve a contig name to its global description.
    #[must_use]
    pub fn contig_by_name(&self, name: &str) -> Option<&ContigInfo> {
        self.contig_by_name.get(name).map(|&idx| &self.contigs[idx])
    }

    /// Contig description by global index.
    #[must_use]
    pub fn contig(&self, global_idx: usize) -> Option<&ContigInfo> {
        self.contigs.get(global_idx)
    }

    /// Find the contig whose column span contains `column`.
    #[must_use]
    pub fn contig_for_column(&self, column: i64) -> Option<&ContigInfo> {
        // contigs are sorted by column_offset by construction
        let idx = match self
            .contigs
            .binary_search_by(|c| c.column_offset.cmp(&column))
        {
            Ok(idx) => idx,
            Err(0) => return None,
            Err(idx) => idx - 1,
        };
        let contig = &self.contigs[idx];
        (column < contig.column_offset + contig.length).then_some(contig)
    }

    /// Resolve a field name to its global field index.
    #[must_use]
    pub fn global_field_idx(&self, name: &str) -> Option<usize> {
        self.fields.get(name).copied()
    }

    /// Resolve a callset name.
    #[must_use]
    pub fn callset(&self, name: &str) -> Option<&CallsetInfo> {
        self.callsets.get(name)
    }

    /// Total number of contigs known to the store.
    #[must_use]
    pub fn num_contigs(&self) -> usize {
        self.contigs.len()
    }

    /// Total number of callsets known to the store.
    #[must_use]
    pub fn num_callsets(&self) -> usize {
        self.callsets.len()
    }
}

/// Builder for [`VidMapper`].
#[derive(Debug, Default)]
pub struct VidMapperBuilder {
    contigs: Vec<ContigInfo>,
    contig_by_name: HashMap<String, usize>,
    fields: HashMap<String, usize>,
    callsets: HashMap<String, CallsetInfo>,
    next_column_offset: i64,
    next_row_idx: i64,
}

impl VidMapperBuilder {
    /// Register a contig; its column offset follows the previously added contigs.
    #[must_use]
    pub fn contig(mut self, name: &str, length: i64) -> Self {
        let global_idx = self.contigs.len();
        self.contig_by_name.insert(name.to_string(), global_idx);
        self.contigs.push(ContigInfo {
            name: name.to_string(),
            global_idx,
            column_offset: self.next_column_offset,
            length,
        });
        self.next_column_offset += length;
        self
    }

    /// Register a field name, assigning the next global field index.
    #[must_use]
    pub fn field(mut self, name: &str) -> Self {
        let idx = self.fields.len();
        self.fields.entry(name.to_string()).or_insert(idx);
        self
    }

    /// Register a callset, assigning the next global row index.
    #[must_use]
    pub fn callset(mut self, name: &str, enabled: bool) -> Self {
        let row_idx = self.next_row_idx;
        self.next_row_idx += 1;
        self.callsets.insert(
            name.to_string(),
            CallsetInfo {
                name: name.to_string(),
                row_idx,
                enabled,
            },
        );
        self
    }

    /// Register a callset with an explicit global row index.
    #[must_use]
    pub fn callset_with_row(mut self, name: &str, row_idx: i64, enabled: bool) -> Self {
        self.next_row_idx = self.next_row_idx.max(row_idx + 1);
        self.callsets.insert(
            name.to_string(),
            CallsetInfo {
                name: name.to_string(),
                row_idx,
                enabled,
            },
        );
        self
    }

    #[must_use]
    pub fn build(self) -> VidMapper {
        VidMapper {
            contigs: self.contigs,
            contig_by_name: self.contig_by_name,
            fields: self.fields,
            callsets: self.callsets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper() -> VidMapper {
        VidMapper::builder()
            .contig("chr1", 1000)
            .contig("chr2", 500)
            .field("AD")
            .field("PL")
            .callset("s0", true)
            .callset("s1", false)
            .build()
    }

    #[test]
    fn test_contig_offsets_accumulate() {
        let m = mapper();
        assert_eq!(m.contig_by_name("chr1").unwrap().column_offset(), 0);
        assert_eq!(m.contig_by_name("chr2").unwrap().column_offset(), 1000);
        assert_eq!(m.contig_by_name("chr2").unwrap().global_idx(), 1);
    }

    #[test]
    fn test_contig_for_column() {
        let m = mapper();
        assert_eq!(m.contig_for_column(0).unwrap().name(), "chr1");
        assert_eq!(m.contig_for_column(999).unwrap().name(), "chr1");
        assert_eq!(m.contig_for_column(1000).unwrap().name(), "chr2");
        assert!(m.contig_for_column(1500).is_none());
    }

    #[test]
    fn test_field_and_callset_resolution() {
        let m = mapper();
        assert_eq!(m.global_field_idx("AD"), Some(0));
        assert_eq!(m.global_field_idx("PL"), Some(1));
        assert_eq!(m.global_field_idx("GQ"), None);
        assert!(m.callset("s0").unwrap().is_enabled());
        assert!(!m.callset("s1").unwrap().is_enabled());
        assert_eq!(m.callset("s1").unwrap().row_idx(), 1);
    }

    #[test]
    fn test_explicit_row_indices() {
        let m = VidMapper::builder()
            .callset_with_row("a", 7, true)
            .callset("b", true)
            .build();
        assert_eq!(m.callset("a").unwrap().row_idx(), 7);
        assert_eq!(m.callset("b").unwrap().row_idx(), 8);
    }
}
