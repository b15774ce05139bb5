//! 수신자 (destination entity)
//!
//! - Metadata로 트랜잭션 시작, FileData를 커버리지 추적기에 병합
//! - EOF 수신 후 유예 시간이 지나면 완료 검사: 누락 구간이 있으면 NAK, 없으면 Finished
//! - 복구 중에는 손실 시뮬레이션을 끄고, 요청한 마지막 구간에 도달하면 다음 NAK 전송
//!
//! 한 번에 하나의 트랜잭션만 다룬다. 다른 트랜잭션의 Metadata/EOF가 오면 새로 시작한다.

use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::checksum::Checksum;
use crate::coverage::{ByteRange, SegmentCoverageTracker};
use crate::fault::{self, LossModel};
use crate::filestore::{sanitize, FileActionProvider, Filestore, LoggingFileActions};
use crate::observer::{EntityRole, Notifier, TransferObserver, TransferOutcome, TransferReport};
use crate::pdu::{
    AckPdu, AckSubtype, ConditionCode, DirectiveCode, Direction, EofPdu, FileDataPdu,
    FileStatus, FinishedPdu, MetadataOption, MetadataPdu, NakPdu, Pdu, PduBody, PduHeader,
    TransactionStatus,
};
use crate::scheduler::ProtocolEngine;
use crate::sink::PduSink;
use crate::stats::TransferStats;
use crate::transaction::{EntityId, TransactionId};
use crate::{Config, Error, Result};

/// 수신자 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    AwaitingMetadata,
    Receiving,
    /// EOF 수신, 유예 시간 대기
    AwaitingCompletionCheck,
    /// NAK 전송 후 누락 구간 수신 중
    Recovering,
    Finished,
    /// 오류 조건 EOF 수신
    Stalled,
    /// NAK 한도 초과, 체크섬 불일치, 저장 실패 등
    Failed,
}

impl ReceiverState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReceiverState::Finished | ReceiverState::Stalled | ReceiverState::Failed
        )
    }
}

/// 복구(갭 채우기) 상태
#[derive(Debug, Clone)]
struct Recovery {
    /// 마지막으로 보낸 NAK
    nak: NakPdu,

    /// 마지막 요청 구간의 시작 오프셋
    cursor: u64,

    /// 진전이 없으면 NAK 재전송
    deadline: Instant,
    attempts: u32,
}

/// 수신 엔진
pub struct ReceiverEngine<S: PduSink> {
    config: Config,
    local_entity: EntityId,

    sink: S,
    filestore: Box<dyn Filestore>,
    actions: Box<dyn FileActionProvider>,
    file_data_loss: Box<dyn LossModel>,
    eof_loss: Box<dyn LossModel>,
    notifier: Notifier,

    state: ReceiverState,
    transaction: Option<TransactionId>,

    /// 응답 PDU 헤더 (수신측 → 송신측)
    reply_header: Option<PduHeader>,
    metadata: Option<MetadataPdu>,
    tracker: Option<SegmentCoverageTracker>,
    eof: Option<EofPdu>,

    completion_deadline: Option<Instant>,
    recovery: Option<Recovery>,

    /// 종류별 수신 인덱스 (손실 모델 입력)
    file_data_index: u64,
    eof_index: u64,

    stats: TransferStats,
}

impl<S: PduSink> ReceiverEngine<S> {
    /// 새 수신 엔진 생성. 손실 모델은 설정의 확률로 초기화된다.
    pub fn new(
        config: Config,
        local_entity: EntityId,
        sink: S,
        filestore: impl Filestore + 'static,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            file_data_loss: fault::from_probability(config.file_data_loss),
            eof_loss: fault::from_probability(config.eof_loss),
            config,
            local_entity,
            sink,
            filestore: Box::new(filestore),
            actions: Box::new(LoggingFileActions),
            notifier: Notifier::new(),
            state: ReceiverState::AwaitingMetadata,
            transaction: None,
            reply_header: None,
            metadata: None,
            tracker: None,
            eof: None,
            completion_deadline: None,
            recovery: None,
            file_data_index: 0,
            eof_index: 0,
            stats: TransferStats::new(),
        })
    }

    pub fn with_file_data_loss(mut self, loss: impl LossModel + 'static) -> Self {
        self.file_data_loss = Box::new(loss);
        self
    }

    pub fn with_eof_loss(mut self, loss: impl LossModel + 'static) -> Self {
        self.eof_loss = Box::new(loss);
        self
    }

    pub fn with_file_actions(mut self, actions: impl FileActionProvider + 'static) -> Self {
        self.actions = Box::new(actions);
        self
    }

    pub fn with_observer(mut self, observer: impl TransferObserver + 'static) -> Self {
        self.notifier.add(Box::new(observer));
        self
    }

    /// 수신 PDU 처리
    pub fn on_receive(&mut self, pdu: Pdu, now: Instant) -> Result<()> {
        if pdu.header.direction != Direction::TowardReceiver {
            warn!("수신측으로 향하지 않는 PDU 무시: {}", pdu);
            return Ok(());
        }
        if pdu.header.dest_entity != self.local_entity {
            warn!(
                "PDU for entity {} ignored (local entity {}): {}",
                pdu.header.dest_entity, self.local_entity, pdu
            );
            return Ok(());
        }

        self.stats.pdus_received += 1;

        let Pdu { header, body } = pdu;
        match body {
            PduBody::Metadata(metadata) => self.handle_metadata(header, metadata, now),
            PduBody::FileData(file_data) => self.handle_file_data(header, file_data, now),
            PduBody::Eof(eof) => self.handle_eof(header, eof, now),
            PduBody::Ack(ack) => {
                info!(
                    "ACK for {:?} received: {:?} {:?}",
                    ack.directive, ack.condition, ack.status
                );
                Ok(())
            }
            PduBody::Prompt(prompt) => {
                info!("Prompt PDU received (nak_response={})", prompt.nak_response);
                Ok(())
            }
            PduBody::KeepAlive(keep_alive) => {
                info!("KeepAlive PDU received: progress={}", keep_alive.progress);
                Ok(())
            }
            other => {
                warn!("수신측에서 처리할 수 없는 디렉티브: {:?}", other);
                Ok(())
            }
        }
    }

    /// 주기 작업: 완료 검사와 NAK 타이머
    pub fn tick(&mut self, now: Instant) -> Result<()> {
        if self.state.is_terminal() || self.transaction.is_none() {
            return Ok(());
        }

        if let Some(deadline) = self.completion_deadline {
            if now >= deadline {
                self.completion_deadline = None;
                return self.run_completion_check(now);
            }
        }

        self.service_nak_timer(now)
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    pub fn transaction(&self) -> Option<TransactionId> {
        self.transaction
    }

    pub fn metadata(&self) -> Option<&MetadataPdu> {
        self.metadata.as_ref()
    }

    pub fn tracker(&self) -> Option<&SegmentCoverageTracker> {
        self.tracker.as_ref()
    }

    /// 현재 누락 구간
    pub fn missing_chunks(&self) -> Vec<ByteRange> {
        self.tracker
            .as_ref()
            .map(SegmentCoverageTracker::missing_chunks)
            .unwrap_or_default()
    }

    pub fn received_bytes(&self) -> u64 {
        self.tracker
            .as_ref()
            .map(SegmentCoverageTracker::received_bytes)
            .unwrap_or(0)
    }

    pub fn is_recovering(&self) -> bool {
        self.recovery.is_some()
    }

    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }

    // ─────────────────────────────────────────────────────────────────
    // PDU 처리
    // ─────────────────────────────────────────────────────────────────

    fn handle_metadata(
        &mut self,
        header: PduHeader,
        metadata: MetadataPdu,
        now: Instant,
    ) -> Result<()> {
        let txn = header.transaction();

        if self.transaction == Some(txn) {
            if self.state.is_terminal() {
                debug!("Metadata for closed transaction {} ignored", txn);
                return Ok(());
            }
            if self.metadata.is_some() {
                info!("Metadata resent for {}", txn);
            } else {
                info!("Metadata recovered for {}", txn);
            }
        } else {
            self.begin(&header);
        }

        if metadata.file_length > self.config.max_file_size {
            warn!(
                "File length {} exceeds limit {}, rejecting {}",
                metadata.file_length, self.config.max_file_size, txn
            );
            return self.reject(ConditionCode::FileSizeError, false, FileStatus::DiscardedDeliberately);
        }

        let keep_coverage = self
            .tracker
            .as_ref()
            .is_some_and(|t| t.length() == metadata.file_length);
        if !keep_coverage {
            if self.tracker.is_some() {
                warn!(
                    "Metadata length {} differs from known length, coverage reset",
                    metadata.file_length
                );
            }
            self.tracker = Some(SegmentCoverageTracker::new(metadata.file_length));
        }

        if self.metadata.is_none() {
            self.route_options(txn, &metadata.options);
        }

        info!(
            "Transaction {}: {} -> {} ({} bytes, {:?})",
            txn, metadata.source_name, metadata.dest_name, metadata.file_length, metadata.checksum_type
        );

        self.metadata = Some(metadata);
        self.recovery = None;

        if self.eof.is_some() {
            // EOF를 이미 받았으면 바로 완료 검사
            self.completion_deadline = Some(now);
            self.state = ReceiverState::AwaitingCompletionCheck;
        } else {
            self.state = ReceiverState::Receiving;
        }
        Ok(())
    }

    fn handle_file_data(
        &mut self,
        header: PduHeader,
        file_data: FileDataPdu,
        now: Instant,
    ) -> Result<()> {
        let txn = header.transaction();
        if self.transaction != Some(txn) {
            warn!("FileData {} before Metadata for {}, dropped", file_data.range(), txn);
            return Ok(());
        }
        if self.state.is_terminal() {
            debug!("FileData for closed transaction {} ignored", txn);
            return Ok(());
        }

        let index = self.file_data_index;
        self.file_data_index += 1;
        if self.recovery.is_none() && self.file_data_loss.should_drop(index) {
            self.stats.pdus_dropped += 1;
            warn!("FileData {} dropped (data loss simulation)", file_data.range());
            return Ok(());
        }

        let Some(tracker) = self.tracker.as_mut() else {
            warn!("FileData {} without file length, dropped", file_data.range());
            return Ok(());
        };

        match tracker.add_segment(file_data.offset, &file_data.data) {
            Ok(true) => {
                self.stats.file_data_chunks += 1;
                self.stats.file_bytes += file_data.data.len() as u64;
            }
            Ok(false) => {
                self.stats.duplicate_chunks += 1;
                debug!("Duplicate FileData {}", file_data.range());
            }
            Err(e) => {
                warn!("FileData ignored: {}", e);
                return Ok(());
            }
        }

        let Some(recovery) = self.recovery.as_mut() else {
            return Ok(());
        };
        recovery.deadline = now + self.config.nak_timeout();
        recovery.attempts = 0;
        let cursor = recovery.cursor;

        let Some((nak, _)) = self.build_nak() else {
            info!("All missing data recovered for {}", txn);
            return self.complete_transfer();
        };
        if file_data.offset < cursor {
            return Ok(());
        }
        // 요청 구간이 그대로면 재요청하지 않음
        if self.recovery.as_ref().is_some_and(|r| r.nak == nak) {
            debug!("Outstanding NAK unchanged for {}", txn);
            return Ok(());
        }
        self.send_nak(now)
    }

    fn handle_eof(&mut self, header: PduHeader, eof: EofPdu, now: Instant) -> Result<()> {
        let txn = header.transaction();
        let current = self.transaction == Some(txn);

        if current && self.state.is_terminal() {
            debug!("EOF after {:?} for {}, acknowledging only", self.state, txn);
            return self.send_eof_ack(&eof);
        }

        let recovering = current && self.recovery.is_some();
        let index = self.eof_index;
        self.eof_index += 1;
        if !recovering && self.eof_loss.should_drop(index) {
            self.stats.pdus_dropped += 1;
            warn!("EOF dropped (data loss simulation) for {}", txn);
            return Ok(());
        }

        if !current {
            // Metadata 유실: EOF의 길이로 시작
            info!("EOF without Metadata for {}, length {}", txn, eof.file_length);
            self.begin(&header);
            self.state = ReceiverState::Receiving;
            if eof.file_length > self.config.max_file_size {
                self.send_eof_ack(&eof)?;
                return self.reject(ConditionCode::FileSizeError, false, FileStatus::DiscardedDeliberately);
            }
            self.tracker = Some(SegmentCoverageTracker::new(eof.file_length));
        }

        self.send_eof_ack(&eof)?;

        if eof.condition != ConditionCode::NoError {
            warn!("EOF with {:?} for {}, transfer stalled", eof.condition, txn);
            self.completion_deadline = None;
            self.recovery = None;
            self.state = ReceiverState::Stalled;
            self.finish(TransferOutcome::Incomplete(eof.condition));
            return Ok(());
        }

        if self.eof.is_some() {
            debug!("Duplicate EOF for {}", txn);
            return Ok(());
        }

        if let Some(tracker) = &self.tracker {
            if tracker.length() != eof.file_length {
                warn!(
                    "EOF length {} differs from Metadata length {}",
                    eof.file_length,
                    tracker.length()
                );
                return self.reject(ConditionCode::FileSizeError, false, FileStatus::DiscardedDeliberately);
            }
        }

        info!(
            "EOF received for {}: checksum={:08X}, {}/{} bytes",
            txn,
            eof.checksum,
            self.received_bytes(),
            eof.file_length
        );

        self.eof = Some(eof);
        self.completion_deadline = Some(now + self.config.completion_check_delay());
        self.state = ReceiverState::AwaitingCompletionCheck;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────
    // 완료 / 복구
    // ─────────────────────────────────────────────────────────────────

    fn run_completion_check(&mut self, now: Instant) -> Result<()> {
        let Some(tracker) = &self.tracker else {
            return Ok(());
        };
        let length = tracker.length();
        let complete = self.metadata.is_some() && tracker.missing_chunks().is_empty();

        if !complete {
            info!(
                "Completion check: {}/{} bytes, requesting missing data",
                self.received_bytes(),
                length
            );
            return self.send_nak(now);
        }

        self.complete_transfer()
    }

    fn service_nak_timer(&mut self, now: Instant) -> Result<()> {
        let Some(recovery) = self.recovery.as_mut() else {
            return Ok(());
        };
        if now < recovery.deadline {
            return Ok(());
        }

        if recovery.attempts >= self.config.max_nak_attempts {
            let attempts = recovery.attempts;
            error!("NAK limit ({}) reached without progress", attempts);
            self.recovery = None;
            self.state = ReceiverState::Failed;
            self.finish(TransferOutcome::Abandoned(ConditionCode::NakLimitReached));
            return Err(Error::NakLimitReached { attempts });
        }

        let attempts = recovery.attempts + 1;

        // 그 사이 도착한 구간은 빼고 다시 구성
        let Some((nak, cursor)) = self.build_nak() else {
            return self.complete_transfer();
        };
        info!(
            "No recovery progress, resending NAK ({} ranges), attempt {}",
            nak.ranges.len(),
            attempts
        );

        self.recovery = Some(Recovery {
            nak: nak.clone(),
            cursor,
            deadline: now + self.config.nak_timeout(),
            attempts,
        });
        self.stats.total_nacks += 1;
        self.stats.last_nack_time = Some(now);
        self.send_directive(PduBody::Nak(nak))
    }

    /// 현재 누락 구간으로 NAK 구성. 요청할 것이 없으면 None
    ///
    /// 커서는 마지막 요청 구간의 시작 오프셋
    fn build_nak(&self) -> Option<(NakPdu, u64)> {
        let mut ranges = Vec::new();
        if self.metadata.is_none() {
            ranges.push(ByteRange::METADATA_REQUEST);
        }
        ranges.extend(self.missing_chunks());

        let max_ranges = NakPdu::max_ranges(self.config.nak_budget(), self.large_file());
        ranges.truncate(max_ranges);

        let cursor = ranges.last()?.start;
        Some((NakPdu::new(ranges), cursor))
    }

    /// 누락 구간으로 NAK 구성 후 복구 모드 진입
    fn send_nak(&mut self, now: Instant) -> Result<()> {
        let Some((nak, cursor)) = self.build_nak() else {
            return Ok(());
        };

        info!(
            "Sending NAK: scope=[{}, {}) {} range(s)",
            nak.scope_start,
            nak.scope_end,
            nak.ranges.len()
        );

        self.recovery = Some(Recovery {
            nak: nak.clone(),
            cursor,
            deadline: now + self.config.nak_timeout(),
            attempts: 0,
        });
        self.state = ReceiverState::Recovering;
        self.stats.total_nacks += 1;
        self.stats.last_nack_time = Some(now);

        self.send_directive(PduBody::Nak(nak))
    }

    /// 체크섬 검증 후 저장, Finished 전송
    fn complete_transfer(&mut self) -> Result<()> {
        self.recovery = None;
        self.completion_deadline = None;

        let (Some(tracker), Some(metadata)) = (&self.tracker, &self.metadata) else {
            return Ok(());
        };
        let data = tracker.data()?;

        if let Some(eof) = &self.eof {
            let computed = Checksum::compute(metadata.checksum_type, &data);
            if computed != eof.checksum {
                error!(
                    "Checksum mismatch: expected {:08X}, computed {:08X}",
                    eof.checksum, computed
                );
                return self.reject(
                    ConditionCode::FileChecksumFailure,
                    true,
                    FileStatus::DiscardedDeliberately,
                );
            }
        }

        let name = sanitize(&metadata.dest_name);
        if data.is_empty() && !self.large_file() {
            info!("Zero-length file {} not stored", name);
        } else if let Err(e) = self.filestore.store(&name, &data) {
            error!("Filestore rejected {}: {}", name, e);
            return self.reject(
                ConditionCode::FilestoreRejection,
                true,
                FileStatus::DiscardedFilestoreRejection,
            );
        }

        self.send_finished(ConditionCode::NoError, true, FileStatus::SuccessfulRetention)?;
        self.state = ReceiverState::Finished;
        self.finish(TransferOutcome::Completed);
        Ok(())
    }

    /// 오류 Finished 전송 후 실패 처리
    fn reject(
        &mut self,
        condition: ConditionCode,
        data_complete: bool,
        file_status: FileStatus,
    ) -> Result<()> {
        self.recovery = None;
        self.completion_deadline = None;
        self.state = ReceiverState::Failed;

        self.send_finished(condition, data_complete, file_status)?;
        self.finish(TransferOutcome::Rejected(condition));
        Ok(())
    }

    fn route_options(&mut self, origin: TransactionId, options: &[MetadataOption]) {
        let mut proxy_put = None;
        let mut mode = None;
        let mut closure = None;

        for option in options {
            match option {
                MetadataOption::ProxyPutRequest(request) => {
                    if proxy_put.is_none() {
                        proxy_put = Some(request);
                    } else {
                        debug!("Additional ProxyPutRequest ignored");
                    }
                }
                MetadataOption::ProxyTransmissionMode(m) => {
                    mode.get_or_insert(*m);
                }
                MetadataOption::ProxyClosureRequest(c) => {
                    closure.get_or_insert(*c);
                }
                MetadataOption::DirectoryListingRequest(request) => {
                    self.actions.directory_listing(origin, request);
                }
                MetadataOption::DirectoryListingResponse(response) => {
                    info!(
                        "DirectoryListingResponse: {} -> {} (successful={})",
                        response.directory, response.listing_file, response.successful
                    );
                }
                MetadataOption::OriginatingTransactionId(id) => {
                    info!("Originating transaction {}", id);
                }
                MetadataOption::ReservedMessageToUser { msg_type, .. } => {
                    info!("Reserved message to user (type {:#04x}) ignored", msg_type);
                }
                MetadataOption::Unknown { tlv_type, value } => {
                    warn!("Unknown TLV {:#04x} ({} bytes) ignored", tlv_type, value.len());
                }
            }
        }

        match proxy_put {
            Some(request) => self.actions.proxy_put(origin, request, mode, closure),
            None if mode.is_some() || closure.is_some() => {
                warn!("Proxy mode/closure option without ProxyPutRequest ignored");
            }
            None => {}
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // 내부 처리
    // ─────────────────────────────────────────────────────────────────

    /// 새 트랜잭션 상태 초기화
    fn begin(&mut self, header: &PduHeader) {
        let txn = header.transaction();
        if let Some(previous) = self.transaction {
            if !self.state.is_terminal() {
                warn!("Transaction {} superseded by {}", previous, txn);
            }
        }

        self.transaction = Some(txn);
        self.reply_header = Some(header.reply());
        self.metadata = None;
        self.tracker = None;
        self.eof = None;
        self.completion_deadline = None;
        self.recovery = None;
        self.stats = TransferStats::new();
        self.notifier.rearm();
    }

    fn large_file(&self) -> bool {
        self.reply_header.as_ref().is_some_and(|h| h.large_file)
    }

    fn send_eof_ack(&mut self, eof: &EofPdu) -> Result<()> {
        let ack = AckPdu {
            directive: DirectiveCode::Eof,
            subtype: AckSubtype::FinishedByWaypointOrOther,
            condition: eof.condition,
            status: TransactionStatus::Active,
        };
        self.send_directive(PduBody::Ack(ack))
    }

    fn send_finished(
        &mut self,
        condition: ConditionCode,
        data_complete: bool,
        file_status: FileStatus,
    ) -> Result<()> {
        info!(
            "Sending Finished: {:?} complete={} {:?}",
            condition, data_complete, file_status
        );
        self.send_directive(PduBody::Finished(FinishedPdu {
            condition,
            data_complete,
            file_status,
        }))
    }

    fn send_directive(&mut self, body: PduBody) -> Result<()> {
        let Some(header) = self.reply_header.clone() else {
            return Err(Error::InvalidState {
                expected: "active transaction".into(),
                got: format!("{:?}", self.state),
            });
        };

        let pdu = Pdu::new(header, body);
        debug!("PDU sent: {}", pdu);
        self.stats.pdus_sent += 1;
        self.sink.send_pdu(pdu)
    }

    fn finish(&mut self, outcome: TransferOutcome) {
        let Some(transaction) = self.transaction else {
            return;
        };

        let delivered = self.notifier.notify(TransferReport {
            transaction,
            role: EntityRole::Destination,
            outcome,
            bytes: self.received_bytes(),
        });
        if delivered {
            info!("Transaction {} closed: {}", transaction, self.stats.summary());
        }
    }
}

impl<S: PduSink> ProtocolEngine for ReceiverEngine<S> {
    fn tick(&mut self, now: Instant) -> Result<()> {
        ReceiverEngine::tick(self, now)
    }

    fn on_receive(&mut self, pdu: Pdu, now: Instant) -> Result<()> {
        ReceiverEngine::on_receive(self, pdu, now)
    }

    fn is_finished(&self) -> bool {
        ReceiverEngine::is_finished(self)
    }
}

impl<S: PduSink> std::fmt::Debug for ReceiverEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiverEngine")
            .field("local_entity", &self.local_entity)
            .field("state", &self.state)
            .field("transaction", &self.transaction)
            .field("received", &self.received_bytes())
            .field("recovering", &self.recovery.is_some())
            .finish()
    }
}
