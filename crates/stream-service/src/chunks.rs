//! Chunk arithmetic for the storage engine.
//!
//! Pure functions: planning the chunk writes for one ingestion, bounding a
//! sectioned download, resolving a playback byte window. None of them touch
//! the store, so every boundary case is tested here directly.

use crate::config::StorageLimits;
use crate::errors::StreamError;
use crate::models::ChunkWrite;
use bytes::{Bytes, BytesMut};

/// Plan the chunk writes that append `data` to a recording.
///
/// `pre_size` is the recording size before this call and `tail` the
/// current bytes of chunk `pre_size / chunk_size` (empty when that chunk
/// does not exist yet). When `has_chunks` is false the data is laid out
/// from index 0.
///
/// Every planned chunk except possibly the last is exactly `chunk_size`
/// long, and no zero-length chunk is ever planned.
#[must_use]
pub fn plan_chunk_writes(
    pre_size: u64,
    has_chunks: bool,
    tail: &Bytes,
    data: &Bytes,
    chunk_size: u64,
) -> Vec<ChunkWrite> {
    if data.is_empty() || chunk_size == 0 {
        return Vec::new();
    }
    let chunk_len = usize::try_from(chunk_size).unwrap_or(usize::MAX);

    if !has_chunks {
        return split_from(0, data.clone(), chunk_len);
    }

    let start_index = pre_size / chunk_size;
    let room = chunk_len.saturating_sub(tail.len());

    if data.len() <= room {
        return vec![ChunkWrite {
            index: start_index,
            bytes: concat(tail, data),
        }];
    }

    let mut remainder = data.clone();
    let head = remainder.split_to(room);
    let mut writes = Vec::new();
    if !head.is_empty() {
        writes.push(ChunkWrite {
            index: start_index,
            bytes: concat(tail, &head),
        });
    }
    writes.extend(split_from(start_index + 1, remainder, chunk_len));
    writes
}

fn split_from(first_index: u64, mut data: Bytes, chunk_len: usize) -> Vec<ChunkWrite> {
    let mut writes = Vec::with_capacity(data.len().div_ceil(chunk_len));
    let mut index = first_index;
    while !data.is_empty() {
        let piece = data.split_to(chunk_len.min(data.len()));
        writes.push(ChunkWrite { index, bytes: piece });
        index += 1;
    }
    writes
}

fn concat(a: &Bytes, b: &Bytes) -> Bytes {
    if a.is_empty() {
        return b.clone();
    }
    let mut buf = BytesMut::with_capacity(a.len() + b.len());
    buf.extend_from_slice(a);
    buf.extend_from_slice(b);
    buf.freeze()
}

/// Chunks and byte budget of one download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionWindow {
    /// First chunk to stream.
    pub start_index: u64,
    /// Bytes to emit before the download ends.
    pub budget: u64,
}

/// Resolve the window served by `Download(name, section)` for a recording
/// of `size` bytes.
///
/// Recordings no larger than one section are served whole regardless of
/// the requested section.
///
/// # Errors
///
/// `BadRequest` when the section starts at or beyond the end of a
/// recording larger than one section.
pub fn section_window(
    size: u64,
    section: u64,
    limits: StorageLimits,
) -> Result<SectionWindow, StreamError> {
    if size <= limits.section_size {
        return Ok(SectionWindow {
            start_index: 0,
            budget: size,
        });
    }

    let offset = section
        .checked_mul(limits.section_size)
        .filter(|offset| *offset < size)
        .ok_or_else(|| {
            StreamError::BadRequest(format!("Section {section} is beyond the end of the recording"))
        })?;

    Ok(SectionWindow {
        start_index: offset / limits.chunk_size,
        budget: limits.section_size.min(size - offset),
    })
}

/// A parsed `Range` request header (single range only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=start-` or `bytes=start-last` (`end` is exclusive).
    From { start: u64, end: Option<u64> },
    /// `bytes=-n`: the final `n` bytes.
    Suffix(u64),
}

impl ByteRange {
    /// Parse a `Range` header value.
    ///
    /// # Errors
    ///
    /// Returns a client-facing message for anything other than one
    /// well-formed byte range.
    pub fn parse(header: &str) -> Result<Self, String> {
        let spec = header
            .trim()
            .strip_prefix("bytes=")
            .ok_or_else(|| "Range must use the bytes unit".to_string())?;
        if spec.contains(',') {
            return Err("Multiple ranges are not supported".to_string());
        }
        let (first, last) = spec
            .split_once('-')
            .ok_or_else(|| "Malformed range".to_string())?;
        let number = |s: &str| {
            s.trim()
                .parse::<u64>()
                .map_err(|_| format!("Malformed range bound '{s}'"))
        };

        match (first.trim().is_empty(), last.trim().is_empty()) {
            (true, true) => Err("Malformed range".to_string()),
            (true, false) => Ok(ByteRange::Suffix(number(last)?)),
            (false, true) => Ok(ByteRange::From {
                start: number(first)?,
                end: None,
            }),
            (false, false) => {
                let start = number(first)?;
                let last = number(last)?;
                if last < start {
                    return Err("Range end precedes start".to_string());
                }
                Ok(ByteRange::From {
                    start,
                    end: Some(last.saturating_add(1)),
                })
            }
        }
    }
}

/// Byte span served by one playback request, plus the chunks covering it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackWindow {
    /// First byte (inclusive).
    pub start: u64,
    /// Last byte (exclusive).
    pub end: u64,
    /// First covering chunk (inclusive).
    pub first_chunk: u64,
    /// Last covering chunk (exclusive).
    pub end_chunk: u64,
}

impl PlaybackWindow {
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Offset of `start` within the concatenation of the covering chunks.
    #[must_use]
    pub fn offset_in_chunks(&self, chunk_size: u64) -> u64 {
        self.start - self.first_chunk * chunk_size
    }
}

/// Resolve the bytes served by `Playback` for a recording of `size` bytes.
///
/// Without a range the final `chunk_size` bytes (the live edge) are
/// served. An open-ended range is capped at `start + chunk_size`. Every
/// end is clamped to `size`.
///
/// # Errors
///
/// `RangeNotSatisfiable` when a requested range starts at or past `size`.
pub fn playback_window(
    size: u64,
    range: Option<ByteRange>,
    chunk_size: u64,
) -> Result<PlaybackWindow, StreamError> {
    let (start, end) = match range {
        None => (size.saturating_sub(chunk_size), size),
        Some(ByteRange::Suffix(n)) => {
            if n == 0 || size == 0 {
                return Err(StreamError::RangeNotSatisfiable { size });
            }
            (size.saturating_sub(n), size)
        }
        Some(ByteRange::From { start, end }) => {
            if start >= size {
                return Err(StreamError::RangeNotSatisfiable { size });
            }
            let end = end
                .unwrap_or_else(|| start.saturating_add(chunk_size))
                .min(size);
            (start, end)
        }
    };

    Ok(PlaybackWindow {
        start,
        end,
        first_chunk: start / chunk_size,
        end_chunk: end.div_ceil(chunk_size),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn pattern(len: usize, seed: u8) -> Bytes {
        (0..len)
            .map(|i| seed.wrapping_add((i % 251) as u8))
            .collect::<Vec<u8>>()
            .into()
    }

    /// Apply a plan to an in-memory chunk list, as the store would.
    fn apply(chunks: &mut Vec<Bytes>, writes: Vec<ChunkWrite>) {
        for write in writes {
            let index = write.index as usize;
            if index == chunks.len() {
                chunks.push(write.bytes);
            } else {
                chunks[index] = write.bytes;
            }
        }
    }

    fn ingest(chunks: &mut Vec<Bytes>, size: &mut u64, data: &Bytes, chunk_size: u64) {
        let tail = chunks
            .get((*size / chunk_size) as usize)
            .cloned()
            .unwrap_or_default();
        let plan = plan_chunk_writes(*size, !chunks.is_empty(), &tail, data, chunk_size);
        apply(chunks, plan);
        *size += data.len() as u64;
    }

    #[test]
    fn test_first_ingest_splits_from_zero() {
        let data = pattern(40, 0);
        let writes = plan_chunk_writes(0, false, &Bytes::new(), &data, 16);

        let lens: Vec<(u64, usize)> = writes.iter().map(|w| (w.index, w.bytes.len())).collect();
        assert_eq!(lens, vec![(0, 16), (1, 16), (2, 8)]);
    }

    #[test]
    fn test_fits_in_current_chunk() {
        let tail = pattern(10, 0);
        let data = pattern(4, 50);
        let writes = plan_chunk_writes(10, true, &tail, &data, 16);

        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].index, 0);
        assert_eq!(writes[0].bytes.len(), 14);
        assert_eq!(&writes[0].bytes[10..], &data[..]);
    }

    #[test]
    fn test_exactly_fills_current_chunk() {
        let tail = pattern(10, 0);
        let writes = plan_chunk_writes(10, true, &tail, &pattern(6, 9), 16);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].bytes.len(), 16);
    }

    #[test]
    fn test_partial_fill_then_overflow() {
        let mut chunks = Vec::new();
        let mut size = 0;
        let first = pattern(10, 0);
        let second = pattern(20, 100);

        ingest(&mut chunks, &mut size, &first, 16);
        ingest(&mut chunks, &mut size, &second, 16);

        assert_eq!(size, 30);
        assert_eq!(chunks.len(), 2);
        assert_eq!(&chunks[0][..10], &first[..]);
        assert_eq!(&chunks[0][10..], &second[..6]);
        assert_eq!(&chunks[1][..], &second[6..]);
        assert_eq!(chunks[1].len(), 14);
    }

    #[test]
    fn test_boundary_aligned_append_starts_new_chunk() {
        // pre_size is a multiple of the chunk size: the chunk at
        // pre_size / chunk_size does not exist yet.
        let writes = plan_chunk_writes(32, true, &Bytes::new(), &pattern(20, 0), 16);
        let lens: Vec<(u64, usize)> = writes.iter().map(|w| (w.index, w.bytes.len())).collect();
        assert_eq!(lens, vec![(2, 16), (3, 4)]);
    }

    #[test]
    fn test_full_tail_skips_empty_overwrite() {
        let tail = pattern(16, 0);
        let writes = plan_chunk_writes(16, true, &tail, &pattern(3, 0), 16);
        let indices: Vec<u64> = writes.iter().map(|w| w.index).collect();
        assert_eq!(indices, vec![2]);
    }

    #[test]
    fn test_empty_data_plans_nothing() {
        assert!(plan_chunk_writes(5, true, &pattern(5, 0), &Bytes::new(), 16).is_empty());
    }

    #[test]
    fn test_split_independence() {
        let whole = pattern(1000, 7);
        let chunk_size = 64;

        let mut single = Vec::new();
        let mut single_size = 0;
        ingest(&mut single, &mut single_size, &whole, chunk_size);

        for cuts in [vec![1, 63, 64, 500], vec![999], vec![128, 129, 130], vec![10; 99]] {
            let mut split = Vec::new();
            let mut split_size = 0;
            let mut offset = 0;
            for len in cuts {
                let piece = whole.slice(offset..offset + len);
                ingest(&mut split, &mut split_size, &piece, chunk_size);
                offset += len;
            }
            ingest(&mut split, &mut split_size, &whole.slice(offset..), chunk_size);

            assert_eq!(split_size, single_size);
            assert_eq!(split, single);
        }
    }

    #[test]
    fn test_chunk_size_invariant_after_many_appends() {
        let mut chunks = Vec::new();
        let mut size = 0;
        for len in [3usize, 17, 1, 40, 16, 15, 2] {
            ingest(&mut chunks, &mut size, &pattern(len, 1), 16);
        }

        let (last, full) = chunks.split_last().unwrap();
        assert!(full.iter().all(|c| c.len() == 16));
        assert!(!last.is_empty() && last.len() <= 16);
        assert_eq!(chunks.iter().map(|c| c.len() as u64).sum::<u64>(), size);
    }

    #[test]
    fn test_section_window_small_recording_served_whole() {
        let limits = StorageLimits::new(MIB, 256 * MIB).unwrap();
        assert_eq!(
            section_window(100 * MIB, 3, limits).unwrap(),
            SectionWindow {
                start_index: 0,
                budget: 100 * MIB
            }
        );
    }

    #[test]
    fn test_section_window_second_section() {
        let limits = StorageLimits::new(MIB, 256 * MIB).unwrap();
        assert_eq!(
            section_window(300 * MIB, 1, limits).unwrap(),
            SectionWindow {
                start_index: 256,
                budget: 44 * MIB
            }
        );
        assert_eq!(section_window(300 * MIB, 0, limits).unwrap().budget, 256 * MIB);
    }

    #[test]
    fn test_section_window_past_end_rejected() {
        let limits = StorageLimits::new(MIB, 256 * MIB).unwrap();
        assert!(section_window(300 * MIB, 2, limits).is_err());
        assert!(section_window(300 * MIB, u64::MAX, limits).is_err());
    }

    #[test]
    fn test_parse_ranges() {
        assert_eq!(
            ByteRange::parse("bytes=0-99").unwrap(),
            ByteRange::From {
                start: 0,
                end: Some(100)
            }
        );
        assert_eq!(
            ByteRange::parse("bytes=500-").unwrap(),
            ByteRange::From {
                start: 500,
                end: None
            }
        );
        assert_eq!(ByteRange::parse("bytes=-20").unwrap(), ByteRange::Suffix(20));
    }

    #[test]
    fn test_parse_rejects_malformed_ranges() {
        for header in ["items=0-1", "bytes=", "bytes=-", "bytes=5-1", "bytes=a-b", "bytes=0-1,4-5"] {
            assert!(ByteRange::parse(header).is_err(), "{header} should be rejected");
        }
    }

    #[test]
    fn test_playback_default_window_is_live_edge() {
        let chunk = 16;
        let size = chunk * 5 / 2;
        let window = playback_window(size, None, chunk).unwrap();

        assert_eq!((window.start, window.end), (24, 40));
        assert_eq!((window.first_chunk, window.end_chunk), (1, 3));
        assert_eq!(window.offset_in_chunks(chunk), 8);
        assert_eq!(window.len(), chunk);
    }

    #[test]
    fn test_playback_short_recording_serves_everything() {
        let window = playback_window(5, None, 16).unwrap();
        assert_eq!((window.start, window.end), (0, 5));
        assert_eq!((window.first_chunk, window.end_chunk), (0, 1));
    }

    #[test]
    fn test_playback_empty_recording() {
        let window = playback_window(0, None, 16).unwrap();
        assert!(window.is_empty());
        assert_eq!(window.end_chunk, 0);
    }

    #[test]
    fn test_playback_open_range_capped_at_chunk() {
        let range = ByteRange::From {
            start: 20,
            end: None,
        };
        let window = playback_window(100, Some(range), 16).unwrap();
        assert_eq!((window.start, window.end), (20, 36));
        assert_eq!((window.first_chunk, window.end_chunk), (1, 3));
    }

    #[test]
    fn test_playback_range_clamped_to_size() {
        let range = ByteRange::From {
            start: 90,
            end: Some(200),
        };
        let window = playback_window(100, Some(range), 16).unwrap();
        assert_eq!((window.start, window.end), (90, 100));
    }

    #[test]
    fn test_playback_range_past_end() {
        let range = ByteRange::From {
            start: 100,
            end: None,
        };
        assert!(matches!(
            playback_window(100, Some(range), 16),
            Err(StreamError::RangeNotSatisfiable { size: 100 })
        ));
    }

    #[test]
    fn test_playback_suffix_range() {
        let window = playback_window(100, Some(ByteRange::Suffix(30)), 16).unwrap();
        assert_eq!((window.start, window.end), (70, 100));
        let window = playback_window(10, Some(ByteRange::Suffix(30)), 16).unwrap();
        assert_eq!((window.start, window.end), (0, 10));
    }
}
