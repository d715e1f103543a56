use tracing::{debug, warn};

use crate::dpb::PictureId;

/// Pictures that can be between decode and display at the same time.
const MAX_DISPLAY_DELAY: usize = 32;
const MAX_QUEUED_TIMESTAMPS: usize = 16;
/// Number of displayed pictures during which out of order timestamps are looked for.
const TIMESTAMP_CHECK_PICTURES: u32 = 16;
/// A queued timestamp belongs to a picture if it was passed with a packet that started at most
/// this many bytes before the picture's first slice.
const TIMESTAMP_POSITION_TOLERANCE: i64 = 3;

#[derive(Debug, Default, Clone, Copy)]
struct DisplayInfo {
    picture: Option<PictureId>,
    poc: i32,
    num_fields: i64,
    pts: i64,
    pts_valid: bool,
    skipped: bool,
    discontinuity: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct QueuedTimestamp {
    pts: i64,
    position: u64,
    valid: bool,
    discontinuity: bool,
}

/// Assigns presentation timestamps to decoded pictures and smooths them out on display.
#[derive(Debug)]
pub(crate) struct DisplayQueue {
    entries: [DisplayInfo; MAX_DISPLAY_DELAY],
    timestamps: [QueuedTimestamp; MAX_QUEUED_TIMESTAMPS],
    next_timestamp: usize,
    clock_rate: i64,
    frame_duration: i64,
    expected_pts: i64,
    first_pts: bool,
    filter_timestamps: bool,
    pictures_to_check: u32,
    discontinuity_pending: bool,
}

impl DisplayQueue {
    pub(crate) fn new(clock_rate: i64, filter_timestamps: bool) -> Self {
        Self {
            entries: [DisplayInfo::default(); MAX_DISPLAY_DELAY],
            timestamps: [QueuedTimestamp::default(); MAX_QUEUED_TIMESTAMPS],
            next_timestamp: 0,
            clock_rate,
            frame_duration: clock_rate / 30,
            expected_pts: 0,
            first_pts: true,
            filter_timestamps,
            pictures_to_check: TIMESTAMP_CHECK_PICTURES,
            discontinuity_pending: false,
        }
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::new(self.clock_rate, self.filter_timestamps);
    }

    /// Sets the frame duration from a `time_scale / num_units_in_tick` frame rate.
    pub(crate) fn set_frame_rate(&mut self, frame_rate: Option<(u32, u32)>) {
        self.frame_duration = match frame_rate {
            Some((numerator, denominator)) if numerator > 0 && denominator > 0 => {
                denominator as i64 * self.clock_rate / numerator as i64
            }
            _ => {
                warn!("Unknown frame rate, assuming 30 frames per second");
                self.clock_rate / 30
            }
        };
    }

    /// Remembers the timestamp of a packet starting at byte `position` of the stream.
    pub(crate) fn queue_timestamp(&mut self, pts: i64, position: u64, discontinuity: bool) {
        let discontinuity = discontinuity || std::mem::take(&mut self.discontinuity_pending);
        self.timestamps[self.next_timestamp] = QueuedTimestamp {
            pts,
            position,
            valid: true,
            discontinuity,
        };
        self.next_timestamp = (self.next_timestamp + 1) % MAX_QUEUED_TIMESTAMPS;
    }

    /// Drops queued timestamps. The next queued one is marked as a discontinuity.
    pub(crate) fn clear_timestamps(&mut self) {
        self.timestamps = [QueuedTimestamp::default(); MAX_QUEUED_TIMESTAMPS];
        self.discontinuity_pending = true;
    }

    /// Registers a decoded picture whose first slice starts at byte `frame_start` and takes the
    /// timestamp queued for it, if any.
    pub(crate) fn picture_decoded(&mut self, picture: PictureId, poc: i32, frame_start: u64) {
        let idx = self
            .entries
            .iter()
            .position(|entry| entry.picture == Some(picture))
            .or_else(|| self.entries.iter().position(|entry| entry.picture.is_none()))
            .unwrap_or_else(|| {
                // The table is full of pictures that were never displayed; reuse the oldest.
                let (idx, _) = self
                    .entries
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, entry)| entry.pts)
                    .unwrap_or((0, &self.entries[0]));
                warn!(idx, "Display queue full, dropping the oldest picture");
                idx
            });

        let mut info = DisplayInfo {
            picture: Some(picture),
            poc,
            num_fields: 2,
            ..Default::default()
        };

        for offset in 0..MAX_QUEUED_TIMESTAMPS {
            let slot = (self.next_timestamp + offset) % MAX_QUEUED_TIMESTAMPS;
            let queued = &mut self.timestamps[slot];
            if queued.valid && queued.position as i64 - frame_start as i64 <= TIMESTAMP_POSITION_TOLERANCE {
                info.pts_valid = true;
                info.pts = queued.pts;
                info.discontinuity = queued.discontinuity;
                queued.valid = false;
            }
        }

        self.entries[idx] = info;
    }

    /// Marks a picture that the client refused to decode. It will not be displayed.
    pub(crate) fn skip(&mut self, picture: PictureId) {
        if let Some(entry) = self.entries.iter_mut().find(|entry| entry.picture == Some(picture)) {
            entry.skipped = true;
        }
    }

    /// Releases the display entry of a picture leaving the DPB and returns its timestamp, or
    /// `None` when the picture must not be shown.
    pub(crate) fn display(&mut self, picture: PictureId) -> Option<i64> {
        let Some(idx) = self.entries.iter().position(|entry| entry.picture == Some(picture)) else {
            debug!(?picture, "Picture was never registered for display");
            return None;
        };

        if self.entries[idx].pts_valid
            && (self.filter_timestamps || (self.pictures_to_check > 0 && !self.entries[idx].discontinuity))
        {
            self.reorder_timestamps(idx);
        }
        if self.pictures_to_check > 0 {
            self.pictures_to_check -= 1;
        }

        let mut info = self.entries[idx];
        if !info.pts_valid {
            info.pts = if self.first_pts {
                self.extrapolate_first_timestamp(&info)
            } else {
                self.expected_pts
            };
            info.pts_valid = true;
        }

        self.entries[idx] = DisplayInfo::default();
        self.expected_pts = info.pts + self.frame_duration * info.num_fields / 2;
        self.first_pts = false;

        if info.skipped {
            debug!(poc = info.poc, "Not displaying a picture that was not decoded");
            return None;
        }
        Some(info.pts)
    }

    /// Swaps the timestamp of a picture with the earliest one still waiting, so timestamps
    /// that came in decode order come out in display order.
    fn reorder_timestamps(&mut self, idx: usize) {
        let earliest = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.picture.is_some() && entry.pts_valid)
            .min_by_key(|(_, entry)| entry.pts)
            .map(|(earliest, _)| earliest);

        if let Some(earliest) = earliest
            && earliest != idx
        {
            warn!(
                pts = self.entries[idx].pts,
                earliest = self.entries[earliest].pts,
                "Timestamps are out of order, reordering"
            );
            let pts = self.entries[idx].pts;
            self.entries[idx].pts = self.entries[earliest].pts;
            self.entries[earliest].pts = pts;
            if self.pictures_to_check > 0 {
                self.filter_timestamps = true;
            }
        }
    }

    /// Guesses the timestamp of the first displayed picture from a pending picture that has one.
    fn extrapolate_first_timestamp(&self, info: &DisplayInfo) -> i64 {
        let reference = self
            .entries
            .iter()
            .find(|entry| entry.picture.is_some() && entry.pts_valid && entry.picture != info.picture);

        match reference {
            Some(reference) => {
                let fields = ((reference.poc - info.poc) as i64).max(2);
                reference.pts - fields * self.frame_duration / 2
            }
            None => self.expected_pts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> DisplayQueue {
        let mut queue = DisplayQueue::new(90_000, false);
        queue.set_frame_rate(Some((30, 1)));
        queue
    }

    #[test]
    fn frame_duration_from_frame_rate() {
        let mut queue = DisplayQueue::new(90_000, false);
        queue.set_frame_rate(Some((60_000, 1001)));
        assert_eq!(queue.frame_duration, 1501);

        queue.set_frame_rate(None);
        assert_eq!(queue.frame_duration, 3000);
    }

    #[test]
    fn picks_up_timestamp_queued_near_picture_start() {
        let mut queue = queue();
        queue.queue_timestamp(1000, 0, false);
        queue.queue_timestamp(2000, 500, false);

        queue.picture_decoded(PictureId(0), 0, 2);
        queue.picture_decoded(PictureId(1), 1, 500);

        assert_eq!(queue.display(PictureId(0)), Some(1000));
        assert_eq!(queue.display(PictureId(1)), Some(2000));
    }

    #[test]
    fn interpolates_missing_timestamps() {
        let mut queue = queue();
        queue.queue_timestamp(9000, 0, false);
        queue.picture_decoded(PictureId(0), 0, 0);
        queue.picture_decoded(PictureId(1), 1, 100);
        queue.picture_decoded(PictureId(2), 2, 200);

        assert_eq!(queue.display(PictureId(0)), Some(9000));
        assert_eq!(queue.display(PictureId(1)), Some(12000));
        assert_eq!(queue.display(PictureId(2)), Some(15000));
    }

    #[test]
    fn extrapolates_first_timestamp_from_later_picture() {
        let mut queue = queue();
        queue.picture_decoded(PictureId(0), 0, 0);
        queue.queue_timestamp(30000, 100, false);
        queue.picture_decoded(PictureId(1), 4, 100);

        // four POC steps of one field each
        assert_eq!(queue.display(PictureId(0)), Some(30000 - 4 * 3000 / 2));
    }

    #[test]
    fn reorders_timestamps_given_in_decode_order() {
        let mut queue = queue();
        // decode order POC 0, 2, 1 with timestamps in decode order
        for (id, (poc, pts)) in [(0, 0), (2, 3000), (1, 6000)].into_iter().enumerate() {
            let position = id as u64 * 100;
            queue.queue_timestamp(pts, position, false);
            queue.picture_decoded(PictureId(id as u64), poc, position);
        }

        assert_eq!(queue.display(PictureId(0)), Some(0));
        assert_eq!(queue.display(PictureId(2)), Some(3000));
        assert_eq!(queue.display(PictureId(1)), Some(6000));
    }

    #[test]
    fn skipped_pictures_are_not_displayed() {
        let mut queue = queue();
        queue.queue_timestamp(0, 0, false);
        queue.picture_decoded(PictureId(7), 0, 0);
        queue.skip(PictureId(7));

        assert_eq!(queue.display(PictureId(7)), None);
        assert_eq!(queue.display(PictureId(7)), None);
    }

    #[test]
    fn cleared_queue_tags_next_timestamp_as_discontinuity() {
        let mut queue = queue();
        queue.queue_timestamp(0, 0, false);
        queue.clear_timestamps();
        queue.queue_timestamp(50_000, 10, false);

        queue.picture_decoded(PictureId(0), 0, 10);
        assert!(queue.entries[0].discontinuity);
        assert_eq!(queue.display(PictureId(0)), Some(50_000));
    }
}
