//! 트랜잭션 식별자와 엔티티별 시퀀스 카운터

use serde::{Deserialize, Serialize};

/// 엔티티 ID
pub type EntityId = u64;

/// 트랜잭션 시퀀스 번호
pub type SequenceNumber = u64;

/// 트랜잭션 ID (시작 엔티티, 시퀀스 번호)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId {
    pub source_entity: EntityId,
    pub sequence: SequenceNumber,
}

impl TransactionId {
    pub fn new(source_entity: EntityId, sequence: SequenceNumber) -> Self {
        Self {
            source_entity,
            sequence,
        }
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.source_entity, self.sequence)
    }
}

/// 단조 증가 시퀀스 카운터 (엔티티 소유)
#[derive(Debug)]
pub struct SequenceCounter {
    next: SequenceNumber,
}

impl SequenceCounter {
    pub fn new(start: SequenceNumber) -> Self {
        Self { next: start }
    }

    pub fn next(&mut self) -> SequenceNumber {
        let current = self.next;
        self.next = self.next.wrapping_add(1);
        current
    }

    pub fn peek(&self) -> SequenceNumber {
        self.next
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new(1)
    }
}

/// 로컬 엔티티 (송신측 트랜잭션 발급자)
#[derive(Debug)]
pub struct LocalEntity {
    id: EntityId,
    sequence: SequenceCounter,
}

impl LocalEntity {
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            sequence: SequenceCounter::default(),
        }
    }

    pub fn with_sequence(id: EntityId, start: SequenceNumber) -> Self {
        Self {
            id,
            sequence: SequenceCounter::new(start),
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    /// 새 트랜잭션 ID 발급
    pub fn next_transaction(&mut self) -> TransactionId {
        TransactionId::new(self.id, self.sequence.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entities_have_independent_counters() {
        let mut a = LocalEntity::new(10);
        let mut b = LocalEntity::with_sequence(20, 100);

        assert_eq!(a.next_transaction(), TransactionId::new(10, 1));
        assert_eq!(a.next_transaction(), TransactionId::new(10, 2));
        assert_eq!(b.next_transaction(), TransactionId::new(20, 100));
        assert_eq!(a.next_transaction(), TransactionId::new(10, 3));
        assert_eq!(TransactionId::new(10, 3).to_string(), "10-3");
    }
}
