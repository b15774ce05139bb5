//! 전송 종료 알림
//!
//! 트랜잭션당 최대 1회 통지된다. 엔진 액터 위에서 동기적으로 호출된다.

use std::sync::Arc;

use dashmap::DashMap;

use crate::pdu::ConditionCode;
use crate::transaction::TransactionId;

/// 엔티티 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityRole {
    Source,
    Destination,
}

/// 트랜잭션 종료 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// 핸드쉐이크 정상 종료
    Completed,

    /// 상대가 오류 상태 코드로 종료 (Finished 또는 수신측 판정)
    Rejected(ConditionCode),

    /// EOF 오류 코드 수신으로 정체됨
    Incomplete(ConditionCode),

    /// 재시도 한도 초과로 포기
    Abandoned(ConditionCode),

    /// 로컬 I/O 실패
    Aborted(String),

    /// 사용자 취소
    Cancelled,
}

impl TransferOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TransferOutcome::Completed)
    }
}

/// 종료 보고
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub transaction: TransactionId,
    pub role: EntityRole,
    pub outcome: TransferOutcome,

    /// 처리된 파일 바이트 (송신: 1차 전송분, 수신: 수신된 고유 바이트)
    pub bytes: u64,
}

/// 종료 관찰자
pub trait TransferObserver: Send {
    fn on_transfer_end(&mut self, report: &TransferReport);
}

impl<F> TransferObserver for F
where
    F: FnMut(&TransferReport) + Send,
{
    fn on_transfer_end(&mut self, report: &TransferReport) {
        self(report)
    }
}

/// 최대 1회 통지기
#[derive(Default)]
pub struct Notifier {
    observers: Vec<Box<dyn TransferObserver>>,
    fired: bool,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, observer: Box<dyn TransferObserver>) {
        self.observers.push(observer);
    }

    /// 처음 호출될 때만 관찰자에게 전달. 전달했으면 `true`
    pub fn notify(&mut self, report: TransferReport) -> bool {
        if self.fired {
            return false;
        }
        self.fired = true;

        for observer in self.observers.iter_mut() {
            observer.on_transfer_end(&report);
        }
        true
    }

    /// 새 트랜잭션 시작 시 재무장
    pub fn rearm(&mut self) {
        self.fired = false;
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("observers", &self.observers.len())
            .field("fired", &self.fired)
            .finish()
    }
}

/// 트랜잭션 상태판 (오케스트레이션용 공유 조회)
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    entries: Arc<DashMap<(TransactionId, EntityRole), TransferReport>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, transaction: TransactionId, role: EntityRole) -> Option<TransferReport> {
        self.entries.get(&(transaction, role)).map(|e| e.value().clone())
    }

    /// 실패로 끝난 트랜잭션
    pub fn failures(&self) -> Vec<TransferReport> {
        self.entries
            .iter()
            .filter(|e| !e.value().outcome.is_success())
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl TransferObserver for StatusBoard {
    fn on_transfer_end(&mut self, report: &TransferReport) {
        self.entries
            .insert((report.transaction, report.role), report.clone());
    }
}
