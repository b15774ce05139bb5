//! 재전송 큐 (송신측)
//!
//! NAK 수신 시 큐 전체를 새 NAK 내용으로 교체한다. 가장 최근 NAK가 기준이다.

use std::collections::VecDeque;

use crate::coverage::ByteRange;

/// 재전송 대기 구간 FIFO
#[derive(Debug, Default)]
pub struct RetransmissionQueue {
    chunks: VecDeque<ByteRange>,
}

impl RetransmissionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 기존 내용을 버리고 `max_chunk` 이하 조각으로 다시 채움
    pub fn replace_from<I>(&mut self, ranges: I, max_chunk: u64)
    where
        I: IntoIterator<Item = ByteRange>,
    {
        self.chunks.clear();
        for range in ranges {
            self.chunks.extend(range.split(max_chunk));
        }
    }

    /// 다음 재전송 구간
    pub fn pop(&mut self) -> Option<ByteRange> {
        self.chunks.pop_front()
    }

    pub fn peek(&self) -> Option<&ByteRange> {
        self.chunks.front()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_splits_ranges() {
        let mut queue = RetransmissionQueue::new();
        queue.replace_from(vec![ByteRange::new(0, 2500), ByteRange::new(4000, 4200)], 1000);

        assert_eq!(queue.len(), 4);
        assert_eq!(queue.pop(), Some(ByteRange::new(0, 1000)));
        assert_eq!(queue.pop(), Some(ByteRange::new(1000, 2000)));
        assert_eq!(queue.pop(), Some(ByteRange::new(2000, 2500)));
        assert_eq!(queue.pop(), Some(ByteRange::new(4000, 4200)));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_latest_nak_is_authoritative() {
        let mut queue = RetransmissionQueue::new();
        queue.replace_from(vec![ByteRange::new(0, 3000)], 1000);
        queue.pop();

        queue.replace_from(vec![ByteRange::new(7000, 7500)], 1000);

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.peek(), Some(&ByteRange::new(7000, 7500)));
    }

    #[test]
    fn test_empty_ranges_ignored() {
        let mut queue = RetransmissionQueue::new();
        queue.replace_from(vec![ByteRange::new(100, 100)], 1000);

        assert!(queue.is_empty());
    }
}
