//! 세그먼트 커버리지 추적
//!
//! - ByteRange: 파일 오프셋 위의 반개구간 [start, end)
//! - SegmentCoverageTracker: 수신된 구간을 병합하여 보관하고 누락 구간(gap)을 계산
//!
//! 저장된 구간은 항상 서로소이고 start 기준 정렬되어 있으며 [0, length) 안에 있다.
//! 인접한 구간도 삽입 시 즉시 병합된다.

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// 반개구간 [start, end)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// 메타데이터 재전송 요청 센티널 [0, 0)
    pub const METADATA_REQUEST: ByteRange = ByteRange { start: 0, end: 0 };

    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end, "invalid range [{start}, {end})");
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// NAK의 메타데이터 재전송 센티널 여부
    pub fn is_metadata_request(&self) -> bool {
        self.start == 0 && self.end == 0
    }

    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.start && offset < self.end
    }

    /// `max_chunk` 이하 크기의 조각으로 분할
    pub fn split(&self, max_chunk: u64) -> impl Iterator<Item = ByteRange> + '_ {
        let step = max_chunk.max(1);
        let end = self.end;
        (self.start..end)
            .step_by(step as usize)
            .map(move |start| ByteRange::new(start, (start + step).min(end)))
    }
}

impl std::fmt::Display for ByteRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// 파일 수신 커버리지 추적기 (수신측)
#[derive(Debug)]
pub struct SegmentCoverageTracker {
    /// 선언된 파일 길이
    length: u64,

    /// 수신된 구간 (정렬, 서로소, 병합됨)
    ranges: Vec<ByteRange>,

    /// 수신 데이터 버퍼
    data: BytesMut,

    /// 수신된 고유 바이트 수
    received: u64,
}

impl SegmentCoverageTracker {
    /// 새 추적기 생성
    pub fn new(length: u64) -> Self {
        let mut data = BytesMut::with_capacity(length as usize);
        data.resize(length as usize, 0);

        Self {
            length,
            ranges: Vec::new(),
            data,
            received: 0,
        }
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    /// 수신된 고유 바이트 수
    pub fn received_bytes(&self) -> u64 {
        self.received
    }

    /// 현재 보관 중인 구간
    pub fn ranges(&self) -> &[ByteRange] {
        &self.ranges
    }

    /// 세그먼트 삽입
    ///
    /// 새로 덮인 바이트가 있으면 `true`. 이미 받은 구간을 다시 넣으면 아무것도 바뀌지 않는다.
    pub fn add_segment(&mut self, offset: u64, bytes: &[u8]) -> Result<bool> {
        let end = offset
            .checked_add(bytes.len() as u64)
            .filter(|&end| end <= self.length)
            .ok_or(Error::SegmentOutOfBounds {
                offset,
                len: bytes.len(),
                file_length: self.length,
            })?;

        if bytes.is_empty() {
            return Ok(false);
        }

        self.data[offset as usize..end as usize].copy_from_slice(bytes);
        Ok(self.insert_range(ByteRange::new(offset, end)))
    }

    fn insert_range(&mut self, range: ByteRange) -> bool {
        // 겹치거나 맞닿은 구간: [lo, hi)
        let lo = self.ranges.partition_point(|r| r.end < range.start);
        let hi = self.ranges.partition_point(|r| r.start <= range.end);

        if lo == hi {
            self.ranges.insert(lo, range);
            self.received += range.len();
            return true;
        }

        let merged = ByteRange::new(
            range.start.min(self.ranges[lo].start),
            range.end.max(self.ranges[hi - 1].end),
        );
        let covered: u64 = self.ranges[lo..hi].iter().map(ByteRange::len).sum();
        let added = merged.len() - covered;

        self.ranges.splice(lo..hi, std::iter::once(merged));
        self.received += added;
        added > 0
    }

    /// 누락 구간 목록 (정렬됨). 비어 있으면 수신 완료
    pub fn missing_chunks(&self) -> Vec<ByteRange> {
        let mut missing = Vec::new();
        let mut cursor = 0;

        for range in &self.ranges {
            if range.start > cursor {
                missing.push(ByteRange::new(cursor, range.start));
            }
            cursor = range.end;
        }

        if cursor < self.length {
            missing.push(ByteRange::new(cursor, self.length));
        }

        missing
    }

    /// 완료 여부 확인
    pub fn is_complete(&self) -> bool {
        self.received == self.length
    }

    /// 조립된 파일 데이터. 누락 구간이 남아 있으면 에러
    pub fn data(&self) -> Result<Bytes> {
        if !self.is_complete() {
            return Err(Error::IncompleteFile {
                missing: self.missing_chunks().len(),
            });
        }
        Ok(Bytes::copy_from_slice(&self.data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_merge_overlapping_and_adjacent() {
        let data = payload(100);
        let mut tracker = SegmentCoverageTracker::new(100);

        assert!(tracker.add_segment(10, &data[10..20]).unwrap());
        assert!(tracker.add_segment(30, &data[30..40]).unwrap());
        assert_eq!(tracker.ranges().len(), 2);

        // 맞닿은 구간
        assert!(tracker.add_segment(20, &data[20..25]).unwrap());
        assert_eq!(tracker.ranges(), &[ByteRange::new(10, 25), ByteRange::new(30, 40)]);

        // 두 구간을 모두 덮는 구간
        assert!(tracker.add_segment(5, &data[5..45]).unwrap());
        assert_eq!(tracker.ranges(), &[ByteRange::new(5, 45)]);
        assert_eq!(tracker.received_bytes(), 40);
    }

    #[test]
    fn test_add_segment_idempotent() {
        let data = payload(50);
        let mut tracker = SegmentCoverageTracker::new(50);

        assert!(tracker.add_segment(0, &data[0..20]).unwrap());
        assert!(!tracker.add_segment(0, &data[0..20]).unwrap());
        assert!(!tracker.add_segment(5, &data[5..10]).unwrap());

        assert_eq!(tracker.ranges(), &[ByteRange::new(0, 20)]);
        assert_eq!(tracker.received_bytes(), 20);
        assert_eq!(tracker.missing_chunks(), vec![ByteRange::new(20, 50)]);
    }

    #[test]
    fn test_missing_chunks() {
        let data = payload(10_000);
        let mut tracker = SegmentCoverageTracker::new(10_000);

        for offset in (0..10_000).step_by(1000) {
            if offset == 2000 || offset == 7000 {
                continue;
            }
            tracker.add_segment(offset, &data[offset as usize..offset as usize + 1000]).unwrap();
        }

        assert_eq!(
            tracker.missing_chunks(),
            vec![ByteRange::new(2000, 3000), ByteRange::new(7000, 8000)]
        );
        assert!(!tracker.is_complete());
        assert!(matches!(tracker.data(), Err(Error::IncompleteFile { missing: 2 })));
    }

    #[test]
    fn test_order_independence() {
        let data = payload(5000);
        let segments: Vec<(u64, u64)> = vec![
            (0, 700),
            (500, 1500),
            (1500, 1600),
            (2000, 3500),
            (3400, 3600),
            (4000, 4001),
            (4999, 5000),
            (100, 200),
        ];

        let mut reference = SegmentCoverageTracker::new(5000);
        for &(start, end) in &segments {
            reference.add_segment(start, &data[start as usize..end as usize]).unwrap();
        }
        let expected = reference.missing_chunks();

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let mut shuffled = segments.clone();
            shuffled.shuffle(&mut rng);

            let mut tracker = SegmentCoverageTracker::new(5000);
            for (start, end) in shuffled {
                tracker.add_segment(start, &data[start as usize..end as usize]).unwrap();
            }
            assert_eq!(tracker.missing_chunks(), expected);
            assert_eq!(tracker.received_bytes(), reference.received_bytes());
        }
    }

    #[test]
    fn test_complete_iff_fully_covered() {
        let data = payload(3000);
        let mut tracker = SegmentCoverageTracker::new(3000);

        tracker.add_segment(1000, &data[1000..3000]).unwrap();
        assert!(!tracker.is_complete());
        assert_eq!(tracker.missing_chunks(), vec![ByteRange::new(0, 1000)]);

        tracker.add_segment(0, &data[0..999]).unwrap();
        assert_eq!(tracker.missing_chunks(), vec![ByteRange::new(999, 1000)]);

        tracker.add_segment(999, &data[999..1000]).unwrap();
        assert!(tracker.missing_chunks().is_empty());
        assert!(tracker.is_complete());
        assert_eq!(tracker.data().unwrap().as_ref(), &data[..]);
    }

    #[test]
    fn test_out_of_bounds_rejected() {
        let mut tracker = SegmentCoverageTracker::new(100);

        let err = tracker.add_segment(90, &[0u8; 20]).unwrap_err();
        assert!(matches!(err, Error::SegmentOutOfBounds { offset: 90, len: 20, file_length: 100 }));
        assert!(tracker.ranges().is_empty());
    }

    #[test]
    fn test_zero_length_file() {
        let tracker = SegmentCoverageTracker::new(0);

        assert!(tracker.missing_chunks().is_empty());
        assert!(tracker.is_complete());
        assert!(tracker.data().unwrap().is_empty());
    }

    #[test]
    fn test_range_split() {
        let chunks: Vec<_> = ByteRange::new(100, 2600).split(1000).collect();

        assert_eq!(
            chunks,
            vec![
                ByteRange::new(100, 1100),
                ByteRange::new(1100, 2100),
                ByteRange::new(2100, 2600),
            ]
        );
        assert!(ByteRange::METADATA_REQUEST.is_metadata_request());
        assert_eq!(ByteRange::new(5, 5).split(10).count(), 0);
    }
}
