//! 엔진 설정

use std::time::Duration;

use crate::checksum::ChecksumType;
use crate::pdu::{self, NakPdu};
use crate::{
    Error, Result, DEFAULT_CHUNK_SIZE, DEFAULT_ENTITY_ID_LEN, DEFAULT_MAX_PDU_SIZE,
    DEFAULT_SEQ_NUM_LEN,
};

/// 파일 전송 엔진 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 파일 데이터 청크 크기 (바이트)
    pub chunk_size: usize,

    /// 최대 PDU 크기 (헤더 포함, 바이트)
    pub max_pdu_size: usize,

    /// 엔티티 ID 길이 (바이트)
    pub entity_id_len: u8,

    /// 시퀀스 번호 길이 (바이트)
    pub seq_num_len: u8,

    /// 스케줄러 tick 간격 (밀리초)
    pub tick_interval_ms: u64,

    /// EOF 재전송 주기 (밀리초)
    pub eof_ack_timeout_ms: u64,

    /// 최대 EOF 전송 횟수
    pub max_eof_attempts: u32,

    /// EOF 수신 후 완료 검사까지 유예 (밀리초)
    pub completion_check_delay_ms: u64,

    /// 복구 중 진전이 없을 때 NAK 재전송 주기 (밀리초)
    pub nak_timeout_ms: u64,

    /// 최대 NAK 재전송 횟수
    pub max_nak_attempts: u32,

    /// 수신측 FileData 손실 확률 (복구 모드에서는 비활성)
    pub file_data_loss: f64,

    /// 수신측 EOF 손실 확률 (복구 모드에서는 비활성)
    pub eof_loss: f64,

    /// 파일 체크섬 종류
    pub checksum_type: ChecksumType,

    /// 수신 허용 최대 파일 크기
    pub max_file_size: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_pdu_size: DEFAULT_MAX_PDU_SIZE,
            entity_id_len: DEFAULT_ENTITY_ID_LEN,
            seq_num_len: DEFAULT_SEQ_NUM_LEN,
            tick_interval_ms: 100,             // 100ms
            eof_ack_timeout_ms: 3000,          // 3초
            max_eof_attempts: 5,
            completion_check_delay_ms: 2000,   // 2초
            nak_timeout_ms: 5000,              // 5초
            max_nak_attempts: 5,
            file_data_loss: 0.0,               // 손실 없음
            eof_loss: 0.0,
            checksum_type: ChecksumType::Modular,
            max_file_size: 64 * 1024 * 1024,   // 64MB
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 시뮬레이터 손실 모델 (FileData 20%, EOF 50%)
    pub fn simulator() -> Self {
        Self {
            file_data_loss: 0.2,
            eof_loss: 0.5,
            ..Self::default()
        }
    }

    /// 짧은 타이머 (로컬 루프백 / 테스트)
    pub fn fast_link() -> Self {
        Self {
            tick_interval_ms: 1,
            eof_ack_timeout_ms: 20,
            completion_check_delay_ms: 5,
            nak_timeout_ms: 50,
            ..Self::default()
        }
    }

    /// 헤더 길이 (바이트)
    pub fn header_len(&self) -> usize {
        4 + 2 * self.entity_id_len as usize + self.seq_num_len as usize
    }

    /// FileData PDU 하나에 실을 수 있는 최대 데이터
    pub fn max_file_data_len(&self, large_file: bool) -> usize {
        self.max_pdu_size
            .saturating_sub(self.header_len())
            .saturating_sub(pdu::offset_size(large_file))
    }

    /// NAK 데이터 필드 예산
    pub fn nak_budget(&self) -> usize {
        self.max_pdu_size.saturating_sub(self.header_len())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn eof_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.eof_ack_timeout_ms)
    }

    pub fn completion_check_delay(&self) -> Duration {
        Duration::from_millis(self.completion_check_delay_ms)
    }

    pub fn nak_timeout(&self) -> Duration {
        Duration::from_millis(self.nak_timeout_ms)
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be > 0".into()));
        }
        if self.chunk_size > self.max_file_data_len(true) {
            return Err(Error::InvalidConfig(format!(
                "chunk_size {} exceeds file data budget {} of max_pdu_size {}",
                self.chunk_size,
                self.max_file_data_len(true),
                self.max_pdu_size
            )));
        }
        if NakPdu::max_ranges(self.nak_budget(), true) == 0 {
            return Err(Error::InvalidConfig(format!(
                "max_pdu_size {} cannot hold a single NAK range",
                self.max_pdu_size
            )));
        }
        if self.max_eof_attempts == 0 || self.max_nak_attempts == 0 {
            return Err(Error::InvalidConfig("retry limits must be >= 1".into()));
        }
        for (name, p) in [("file_data_loss", self.file_data_loss), ("eof_loss", self.eof_loss)] {
            if !(0.0..=1.0).contains(&p) {
                return Err(Error::InvalidConfig(format!("{name} must be within [0, 1]")));
            }
        }
        Ok(())
    }
}
