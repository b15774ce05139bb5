//! 에러 타입 정의

use thiserror::Error;

/// 파일 전송 엔진 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("직렬화 에러: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("유효하지 않은 매직 넘버: expected {expected:08X}, got {got:08X}")]
    InvalidMagicNumber { expected: u32, got: u32 },

    #[error("유효하지 않은 프로토콜 버전: expected {expected}, got {got}")]
    InvalidVersion { expected: u8, got: u8 },

    #[error("유효하지 않은 설정: {0}")]
    InvalidConfig(String),

    #[error("빈 파일은 전송할 수 없음 (파일 길이 0은 unbounded를 의미)")]
    EmptyFile,

    #[error("세그먼트 범위 초과: offset={offset}, len={len}, file_length={file_length}")]
    SegmentOutOfBounds {
        offset: u64,
        len: usize,
        file_length: u64,
    },

    #[error("파일 미완성: missing_ranges={missing}")]
    IncompleteFile { missing: usize },

    #[error("잘못된 상태: expected {expected}, got {got}")]
    InvalidState { expected: String, got: String },

    #[error("EOF 재전송 한도 도달: attempts={attempts}")]
    EofLimitReached { attempts: u32 },

    #[error("NAK 재전송 한도 도달: attempts={attempts}")]
    NakLimitReached { attempts: u32 },

    #[error("채널 에러")]
    ChannelError,
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
