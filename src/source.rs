//! Per-callset record source.
//!
//! [`VcfSource`] wraps one VCF file (plain text or bgzip-compressed, optionally
//! tabix-indexed) and exposes the narrow contract the converter needs: ordered
//! iteration, coordinate seek, header introspection, and a reference-counted
//! handle so several partitions can multiplex one physical file when parallel
//! partitioning is off.
//!
//! Seeks prefer the index; without one (or when index use is disabled) the source
//! falls back to a sequential scan, reopening the file when the target lies behind
//! the current stream position.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use noodles::bgzf;
use noodles::core::region::Interval;
use noodles::core::{Position, Region};
use noodles::csi::BinningIndex;
use noodles::tabix;
use noodles::vcf::{self, variant::RecordBuf};
use tracing::{debug, warn};

use crate::convert::CellFields;
use crate::error::{Error, Result, SchemaError, SourceError};

enum Stream {
    Plain(vcf::io::Reader<BufReader<File>>),
    Bgzf(vcf::io::Reader<bgzf::Reader<File>>),
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain(_) => f.write_str("Plain(..)"),
            Self::Bgzf(_) => f.write_str("Bgzf(..)"),
        }
    }
}

/// A single call-set file, yielding records in coordinate order.
#[derive(Debug)]
pub struct VcfSource {
    path: PathBuf,
    region: Option<Region>,
    fields: CellFields,
    header: Option<Arc<vcf::Header>>,
    /// Header-order rank per contig name; defines the file-local coordinate order.
    contig_rank: HashMap<String, usize>,
    index: Option<tabix::Index>,
    index_probed: bool,
    stream: Option<Stream>,
    record: RecordBuf,
    have_record: bool,
    at_eof: bool,
    /// Bumped on every (re)open; ordinals from different generations never compare.
    generation: u64,
    /// Count of records yielded since the current open.
    record_ordinal: u64,
    users: usize,
}

impl VcfSource {
    /// Bind to one call-set source, optionally opening it immediately.
    ///
    /// `region` restricts iteration to a coordinate window; records beyond it read
    /// as exhaustion. The queried `fields` are validated against the header on
    /// first open and an unknown field fails fast.
    pub fn new(
        path: impl AsRef<Path>,
        region: Option<Region>,
        fields: &CellFields,
        open_now: bool,
    ) -> Result<Self> {
        let mut source = Self {
            path: path.as_ref().to_path_buf(),
            region,
            fields: fields.clone(),
            header: None,
            contig_rank: HashMap::new(),
            index: None,
            index_probed: false,
            stream: None,
            record: RecordBuf::default(),
            have_record: false,
            at_eof: false,
            generation: 0,
            record_ordinal: 0,
            users: 0,
        };
        if open_now {
            source.open()?;
        }
        Ok(source)
    }

    /// Path this source is bound to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Header of the source; `None` until the first open.
    #[must_use]
    pub fn header(&self) -> Option<&Arc<vcf::Header>> {
        self.header.as_ref()
    }

    /// Header-order rank of a contig, or `None` when the header does not list it.
    #[must_use]
    pub fn contig_rank(&self, name: &str) -> Option<usize> {
        self.contig_rank.get(name).copied()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Register one more user of this handle, opening it if necessary.
    pub fn add_user(&mut self) -> Result<()> {
        self.users += 1;
        self.open()
    }

    /// Drop one user; the physical handle closes when the last user leaves.
    pub fn remove_user(&mut self) {
        self.users = self.users.saturating_sub(1);
        if self.users == 0 {
            self.close();
        }
    }

    /// Close the physical handle, keeping header and index state for reopening.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!(path = %self.path.display(), "closed call-set source");
        }
        self.have_record = false;
        self.at_eof = false;
    }

    /// Open (or reopen) the physical handle at the start of the data section.
    pub fn open(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let file = File::open(&self.path).map_err(|source| SourceError::CannotOpen {
            path: self.path.display().to_string(),
            source,
        })?;

        let is_bgzf = matches!(
            self.path.extension().and_then(|ext| ext.to_str()),
            Some("gz" | "bgz")
        );

        let (stream, header) = if is_bgzf {
            let mut reader = vcf::io::Reader::new(bgzf::Reader::new(file));
            let header = reader.read_header()?;
            (Stream::Bgzf(reader), header)
        } else {
            let mut reader = vcf::io::Reader::new(BufReader::new(file));
            let header = reader.read_header()?;
            (Stream::Plain(reader), header)
        };

        if is_bgzf && !self.index_probed {
            self.index_probed = true;
            let mut index_path = self.path.clone().into_os_string();
            index_path.push(".tbi");
            match tabix::read(&index_path) {
                Ok(index) => self.index = Some(index),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    warn!(
                        path = %self.path.display(),
                        "no tabix index found; seeks fall back to sequential scan"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }

        if self.header.is_none() {
            self.validate_fields(&header)?;
            self.contig_rank = header
                .contigs()
                .keys()
                .enumerate()
                .map(|(rank, name)| (name.to_string(), rank))
                .collect();
            self.header = Some(Arc::new(header));
        }

        self.have_record = false;
        self.at_eof = false;
        self.generation += 1;
        self.record_ordinal = 0;
        self.stream = Some(stream);
        debug!(path = %self.path.display(), indexed = self.index.is_some(), "opened call-set source");
        Ok(())
    }

    /// The active record, or `None` when unpositioned or exhausted.
    #[must_use]
    pub fn current_record(&self) -> Option<&RecordBuf> {
        self.have_record.then_some(&self.record)
    }

    /// Identity of the active record within this handle's stream. Two equal
    /// tokens name the same physical record; a reopen invalidates old tokens.
    #[must_use]
    pub(crate) fn position_token(&self) -> Option<(u64, u64)> {
        self.have_record
            .then_some((self.generation, self.record_ordinal))
    }

    /// Advance to the next record. Exhaustion clears the current record.
    pub fn read_advance(&mut self) -> Result<()> {
        let header = Arc::clone(
            self.header
                .as_ref()
                .ok_or_else(|| SourceError::HandleClosed(self.path.display().to_string()))?,
        );
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| SourceError::HandleClosed(self.path.display().to_string()))?;

        let read = match stream {
            Stream::Plain(reader) => reader.read_record_buf(&header, &mut self.record),
            Stream::Bgzf(reader) => reader.read_record_buf(&header, &mut self.record),
        };

        match read {
            Ok(0) => {
                self.have_record = false;
                self.at_eof = true;
            }
            Ok(_) => {
                self.have_record = true;
                self.record_ordinal += 1;
                if self.beyond_region()? {
                    self.have_record = false;
                    self.at_eof = true;
                }
            }
            Err(err) if err.kind() == io::ErrorKind::InvalidData => {
                return Err(SourceError::CorruptRecord {
                    path: self.path.display().to_string(),
                    message: err.to_string(),
                }
                .into());
            }
            Err(err) => return Err(Error::IoError(err)),
        }
        Ok(())
    }

    /// Reposition to the first record at or after `(contig, position)` (0-based),
    /// then skip `skip_at_target` records sitting exactly on the target
    /// coordinate.
    ///
    /// Uses the tabix index when present unless `discard_index` is set; otherwise
    /// scans sequentially, reopening the file when the target lies behind the
    /// stream. Seeks may revisit records the caller already consumed; the skip
    /// count lets the caller step over its committed records when several share
    /// one coordinate. The active record after the call is the sought record, or
    /// `None` when the source holds nothing at or after the target.
    pub fn seek_advance(
        &mut self,
        contig: &str,
        position: i64,
        skip_at_target: usize,
        discard_index: bool,
    ) -> Result<()> {
        self.open()?;
        let target_rank = self
            .contig_rank(contig)
            .ok_or_else(|| SchemaError::UnknownContig(contig.to_string()))?;
        let target = (target_rank, position);

        let use_index =
            !discard_index && self.index.is_some() && matches!(self.stream, Some(Stream::Bgzf(_)));

        let mut indexed = false;
        if use_index {
            if let Some(virtual_position) = self.chunk_start(contig, position)? {
                if let Some(Stream::Bgzf(reader)) = self.stream.as_mut() {
                    reader.get_mut().seek(virtual_position)?;
                }
                self.have_record = false;
                self.at_eof = false;
                indexed = true;
                debug!(contig, position, "indexed seek");
            }
        }
        // an absent index chunk falls through to the scan paths
        if !indexed && self.stream_is_past(target)? {
            // sequential streams cannot rewind; restart from the header
            debug!(contig, position, "reopening for backwards seek");
            self.close();
            self.open()?;
        }

        loop {
            if !self.have_record {
                if self.at_eof {
                    return Ok(());
                }
                self.read_advance()?;
                if !self.have_record {
                    return Ok(());
                }
            }
            if self.record_coordinate()? >= target {
                break;
            }
            self.read_advance()?;
            if !self.have_record {
                return Ok(());
            }
        }

        let mut remaining = skip_at_target;
        while remaining > 0 && self.have_record && self.record_coordinate()? == target {
            self.read_advance()?;
            remaining -= 1;
        }
        Ok(())
    }

    /// File-local `(contig rank, 0-based position)` of the active record.
    pub(crate) fn record_coordinate(&self) -> Result<(usize, i64)> {
        let name = self.record.reference_sequence_name();
        let rank = self
            .contig_rank(name)
            .ok_or_else(|| SourceError::CorruptRecord {
                path: self.path.display().to_string(),
                message: format!("record contig '{name}' absent from header"),
            })?;
        let position = self
            .record
            .variant_start()
            .ok_or_else(|| SourceError::CorruptRecord {
                path: self.path.display().to_string(),
                message: "record has no position".to_string(),
            })?;
        Ok((rank, usize::from(position) as i64 - 1))
    }

    fn validate_fields(&self, header: &vcf::Header) -> Result<()> {
        for name in self.fields.info_fields() {
            if header.infos().get(name.as_str()).is_none() {
                return Err(SchemaError::UnknownField(name.clone()).into());
            }
        }
        for name in self.fields.format_fields() {
            if header.formats().get(name.as_str()).is_none() {
                return Err(SchemaError::UnknownField(name.clone()).into());
            }
        }
        Ok(())
    }

    fn beyond_region(&self) -> Result<bool> {
        let Some(region) = &self.region else {
            return Ok(false);
        };
        let (rank, position) = self.record_coordinate()?;
        let Some(region_rank) = self.contig_rank(std::str::from_utf8(region.name())?) else {
            return Ok(false);
        };
        if rank != region_rank {
            return Ok(rank > region_rank);
        }
        match region.interval().end() {
            Some(end) => Ok(position > usize::from(end) as i64 - 1),
            None => Ok(false),
        }
    }

    /// Whether the stream position already lies past the target coordinate.
    fn stream_is_past(&mut self, target: (usize, i64)) -> Result<bool> {
        if self.at_eof {
            return Ok(true);
        }
        if self.have_record {
            return Ok(self.record_coordinate()? > target);
        }
        Ok(false)
    }

    fn chunk_start(&self, contig: &str, position: i64) -> Result<Option<bgzf::VirtualPosition>> {
        let Some(index) = self.index.as_ref() else {
            return Ok(None);
        };
        let Some(index_header) = index.header() else {
            return Ok(None);
        };
        let Some(reference_sequence_id) = index_header
            .reference_sequence_names()
            .get_index_of(contig)
        else {
            return Ok(None);
        };
        let start = Position::try_from(position.max(0) as usize + 1)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let interval = Interval::from(start..);
        let chunks = index.query(reference_sequence_id, interval)?;
        Ok(chunks.first().map(|chunk| chunk.start()))
    }
}
