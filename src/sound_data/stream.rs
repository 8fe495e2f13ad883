//! Interval cache for streamed assets.
//!
//! Decoded sample ranges are kept as a sorted vector of non-overlapping,
//! non-contiguous [`ContiguousBuffers`] segments. Each segment is a run of
//! sub-buffers; the start of each sub-buffer is the end of its predecessor,
//! or the segment's `start` for the first one. A newly loaded window that
//! touches a neighboring segment is merged with it, so adjacent ranges are
//! never represented twice.

use super::load_native_buffer;
use crate::MIN_STREAM_BUFFER_LENGTH;
use crate::decode::{DecodeInfo, SoundDecoder};
use crate::native::{AudioBackend, BufferId, NativeBuffer};
use std::sync::Arc;

/// A native buffer covering frames up to `end` (exclusive).
struct BufferUntil {
    end: u32,
    buffer: NativeBuffer,
}

/// A sorted, non-empty run of contiguous buffers starting at `start`.
struct ContiguousBuffers {
    start: u32,
    buffers: Vec<BufferUntil>,
}

impl ContiguousBuffers {
    fn end(&self) -> u32 {
        self.buffers.last().expect("segment is never empty").end
    }
}

/// Streamed asset state: the decoder plus the cache of loaded ranges.
pub struct SoundStream {
    decoder: Box<dyn SoundDecoder>,
    segments: Vec<ContiguousBuffers>,
}

impl SoundStream {
    pub fn new(decoder: Box<dyn SoundDecoder>) -> Self {
        // buffers are loaded on demand, nothing to do yet
        Self {
            decoder,
            segments: Vec::new(),
        }
    }

    /// See [`super::OpenSound::get_or_load_buffer_at`]. `offset` must be
    /// within the asset.
    pub fn get_or_load(
        &mut self,
        backend: &Arc<dyn AudioBackend>,
        info: &DecodeInfo,
        offset: u32,
    ) -> (BufferId, u32, u32) {
        debug_assert!(offset < info.length_samples);

        // right-most segment with `start <= offset`; everything from
        // `insert_at` on starts after `offset`
        let insert_at = self.segments.partition_point(|seg| seg.start <= offset);

        if let Some(seg) = insert_at.checked_sub(1).map(|i| &self.segments[i]) {
            // left-most sub-buffer with `end > offset`
            let i = seg.buffers.partition_point(|b| b.end <= offset);
            if let Some(buf) = seg.buffers.get(i) {
                let buf_start = if i == 0 { seg.start } else { seg.buffers[i - 1].end };
                return (buf.buffer.id(), buf.end, offset - buf_start);
            }
        }

        // no loaded buffer contains `offset`
        self.load_buffer_at(backend, info, offset, insert_at)
    }

    /// Decodes a new window containing `offset` and inserts it before
    /// `insert_at`, merging with neighbors it ends up touching.
    fn load_buffer_at(
        &mut self,
        backend: &Arc<dyn AudioBackend>,
        info: &DecodeInfo,
        offset: u32,
        insert_at: usize,
    ) -> (BufferId, u32, u32) {
        let has_before = insert_at > 0;
        let has_after = insert_at < self.segments.len();

        // bounds the new window may not cross
        let end_before = if has_before {
            self.segments[insert_at - 1].end()
        } else {
            0
        };
        let start_after = if has_after {
            self.segments[insert_at].start
        } else {
            info.length_samples
        };

        let min_buf_len_samples =
            (info.sample_rate as f32 * MIN_STREAM_BUFFER_LENGTH) as u32;

        //
        // 1) Find the actual start and end of the new window
        //

        let mut new_buf_start = offset;
        let mut new_buf_end = offset.saturating_add(min_buf_len_samples);

        // don't load into the next segment, or past the end
        if new_buf_end > start_after {
            new_buf_end = start_after;
            // also move the start back for the minimum window size (but not
            // into the previous segment)
            if new_buf_end - new_buf_start < min_buf_len_samples {
                new_buf_start = end_before.max(new_buf_end.saturating_sub(min_buf_len_samples));
            }
        }

        // widen if the gap to either neighbor would be below the minimum
        if new_buf_start - end_before < min_buf_len_samples {
            new_buf_start = end_before;
        }
        if start_after - new_buf_end < min_buf_len_samples {
            new_buf_end = start_after;
        }

        //
        // 2) Load [new_buf_start, new_buf_end)
        //

        // on failure this is the null buffer; it is stored anyway so the
        // range is never retried
        let new_buf = load_native_buffer(
            &mut *self.decoder,
            backend,
            info,
            new_buf_start,
            new_buf_end,
        );

        //
        // 3) Insert before `insert_at`
        //

        // append to the previous segment if the new window touches it,
        // otherwise start a new segment
        let seg_i = if has_before && new_buf_start == end_before {
            insert_at - 1
        } else {
            self.segments.insert(
                insert_at,
                ContiguousBuffers {
                    start: new_buf_start,
                    buffers: Vec::new(),
                },
            );
            insert_at
        };

        let new_buf_i = self.segments[seg_i].buffers.len();
        self.segments[seg_i].buffers.push(BufferUntil {
            end: new_buf_end,
            buffer: new_buf,
        });

        if has_after && new_buf_end == start_after {
            // absorb the following segment
            let mut after = self.segments.remove(seg_i + 1);
            self.segments[seg_i].buffers.append(&mut after.buffers);
        }

        let buf = &self.segments[seg_i].buffers[new_buf_i];
        (buf.buffer.id(), new_buf_end, offset - new_buf_start)
    }

    #[cfg(test)]
    fn segment_ranges(&self) -> Vec<(u32, u32)> {
        self.segments.iter().map(|s| (s.start, s.end())).collect()
    }
}
