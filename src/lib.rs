//! Partition-aware conversion of variant call sets into columnar binary cells.
//!
//! `varcell` reads per-sample variant-call streams (VCF, plain or bgzip-compressed,
//! optionally tabix-indexed) and converts them into compact, position-ordered binary
//! cells suitable for loading into a coordinate-partitioned columnar store.
//!
//! The central type is [`VcfConverter`]: it owns one [`ColumnPartition`] per assigned
//! column interval of a file, drives batch reads against caller-owned buffers, and
//! encodes every queried field per enabled callset with byte-exact offset bookkeeping.
//! A full buffer is not an error; it is the backpressure signal. The caller enlarges
//! the buffer and re-invokes the batch read, and the pending record is re-encoded
//! from its rolled-back offset.

mod cell;
mod convert;
mod error;
mod histogram;
mod partition;
mod source;
mod vid;

pub use cell::{CellValue, read_string, read_value, write_null, write_string, write_value};
pub use convert::{CellFields, FieldClass, VcfConverter, VcfConverterBuilder};
pub use error::{Error, InvariantError, Result, SchemaError, SourceError};
pub use histogram::UniformHistogram;
pub use partition::{CallsetOffsets, ColumnPartition, PartitionBatch, PartitionStatus};
pub use source::VcfSource;
pub use vid::{CallsetInfo, ContigInfo, VidMapper, VidMapperBuilder};

/// Sentinel for a missing integer value (htslib-compatible).
pub const MISSING_I32: i32 = i32::MIN;
/// Sentinel terminating an integer vector shorter than its declared arity.
pub const VECTOR_END_I32: i32 = i32::MIN + 1;
/// Bit pattern of the missing-float sentinel (a reserved NaN payload).
pub const MISSING_F32_BITS: u32 = 0x7F80_0001;
/// Bit pattern of the float vector-end sentinel.
pub const VECTOR_END_F32_BITS: u32 = 0x7F80_0002;
/// Separator between sub-values when multiple strings pack into one byte run.
pub const STRING_SEPARATOR: u8 = b'|';

/// Default per-callset byte budget for a partition batch.
pub const DEFAULT_SIZE_PER_CALLSET: usize = 16 * 1024;
