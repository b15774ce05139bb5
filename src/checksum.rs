//! 파일 체크섬
//!
//! - Modular: CCSDS 모듈러 체크섬. 파일 오프셋 기준 4바이트 정렬 워드의 합 (mod 2^32).
//!   각 바이트의 기여도가 오프셋으로만 결정되므로 갱신 순서와 무관하다.
//! - Crc32: 순서에 의존한다. 오프셋 0부터 연속으로만 갱신해야 한다.
//! - Null: 항상 0

use serde::{Deserialize, Serialize};

/// 체크섬 종류 (메타데이터로 수신측에 전달)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChecksumType {
    #[default]
    Modular,
    Crc32,
    Null,
}

/// 누적 체크섬 계산기
#[derive(Clone)]
pub enum Checksum {
    Modular(u32),
    Crc32 {
        hasher: crc32fast::Hasher,
        next_offset: u64,
    },
    Null,
}

impl Checksum {
    pub fn new(kind: ChecksumType) -> Self {
        match kind {
            ChecksumType::Modular => Checksum::Modular(0),
            ChecksumType::Crc32 => Checksum::Crc32 {
                hasher: crc32fast::Hasher::new(),
                next_offset: 0,
            },
            ChecksumType::Null => Checksum::Null,
        }
    }

    /// 전체 데이터의 체크섬
    pub fn compute(kind: ChecksumType, data: &[u8]) -> u32 {
        let mut checksum = Self::new(kind);
        checksum.update(0, data);
        checksum.value()
    }

    pub fn kind(&self) -> ChecksumType {
        match self {
            Checksum::Modular(_) => ChecksumType::Modular,
            Checksum::Crc32 { .. } => ChecksumType::Crc32,
            Checksum::Null => ChecksumType::Null,
        }
    }

    /// `offset` 위치의 데이터 반영
    pub fn update(&mut self, offset: u64, data: &[u8]) {
        match self {
            Checksum::Modular(sum) => {
                for (i, &byte) in data.iter().enumerate() {
                    let shift = 24 - 8 * ((offset + i as u64) % 4) as u32;
                    *sum = sum.wrapping_add((byte as u32) << shift);
                }
            }
            Checksum::Crc32 {
                hasher,
                next_offset,
            } => {
                debug_assert_eq!(*next_offset, offset, "crc32 must be fed sequentially");
                hasher.update(data);
                *next_offset = offset + data.len() as u64;
            }
            Checksum::Null => {}
        }
    }

    pub fn value(&self) -> u32 {
        match self {
            Checksum::Modular(sum) => *sum,
            Checksum::Crc32 { hasher, .. } => hasher.clone().finalize(),
            Checksum::Null => 0,
        }
    }
}

impl std::fmt::Debug for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Checksum({:?}, {:08X})", self.kind(), self.value())
    }
}
