//! 전송 통계

use std::time::{Duration, Instant};

/// 트랜잭션 전송 통계 (송신/수신 공용)
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 송신 PDU 수 (드롭 포함)
    pub pdus_sent: u64,

    /// 손실 시뮬레이션으로 드롭된 PDU 수
    pub pdus_dropped: u64,

    /// 수신 PDU 수
    pub pdus_received: u64,

    /// 파일 데이터 바이트 (송신 또는 신규 수신)
    pub file_bytes: u64,

    /// 1차 전송 청크 수
    pub file_data_chunks: u64,

    /// 재전송 청크 수
    pub retransmitted_chunks: u64,

    /// 중복 수신 청크 수
    pub duplicate_chunks: u64,

    /// Metadata 전송 횟수
    pub metadata_sent: u64,

    /// EOF 전송 횟수
    pub eof_sent: u64,

    /// 총 NAK 수 (송신측: 수신, 수신측: 송신)
    pub total_nacks: u64,

    /// 마지막 NAK 시간
    pub last_nack_time: Option<Instant>,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            pdus_sent: 0,
            pdus_dropped: 0,
            pdus_received: 0,
            file_bytes: 0,
            file_data_chunks: 0,
            retransmitted_chunks: 0,
            duplicate_chunks: 0,
            metadata_sent: 0,
            eof_sent: 0,
            total_nacks: 0,
            last_nack_time: None,
        }
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 처리율 (bytes/sec)
    pub fn throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.file_bytes as f64 / elapsed
    }

    /// 재전송 비율
    pub fn retransmit_ratio(&self) -> f64 {
        if self.file_data_chunks == 0 {
            return 0.0;
        }
        self.retransmitted_chunks as f64 / self.file_data_chunks as f64
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Bytes: {} | Throughput: {:.2} KB/s | PDUs: {} sent, {} dropped, {} received | Retransmit: {} ({:.1}%) | EOF: {} | NAKs: {}",
            self.elapsed().as_secs_f64(),
            self.file_bytes,
            self.throughput() / 1000.0,
            self.pdus_sent,
            self.pdus_dropped,
            self.pdus_received,
            self.retransmitted_chunks,
            self.retransmit_ratio() * 100.0,
            self.eof_sent,
            self.total_nacks,
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retransmit_ratio() {
        let mut stats = TransferStats::new();
        assert_eq!(stats.retransmit_ratio(), 0.0);

        stats.file_data_chunks = 10;
        stats.retransmitted_chunks = 2;
        assert!((stats.retransmit_ratio() - 0.2).abs() < f64::EPSILON);
        assert!(stats.summary().contains("Retransmit: 2"));
    }
}
