//! 송신자 (source entity)
//!
//! - Metadata → FileData(순차) → EOF(ACK까지 주기 재전송)
//! - NAK 기반 선택 재전송
//! - Finished 수신 시 ACK 응답 후 종료
//!
//! 모든 진행은 스케줄러가 호출하는 `tick()`과 `on_receive()`로만 일어난다. 두 호출은
//! 같은 액터 위에서 직렬화되어야 한다.

use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, error, info, warn};

use crate::checksum::Checksum;
use crate::coverage::ByteRange;
use crate::fault::{LossModel, NoLoss};
use crate::observer::{EntityRole, Notifier, TransferObserver, TransferOutcome, TransferReport};
use crate::pdu::{
    AckPdu, AckSubtype, ConditionCode, DirectiveCode, Direction, EofPdu, FileDataPdu,
    FinishedPdu, MetadataOption, MetadataPdu, NakPdu, Pdu, PduBody, PduHeader, TransactionStatus,
};
use crate::retransmit::RetransmissionQueue;
use crate::scheduler::ProtocolEngine;
use crate::sink::{FileSource, PduSink};
use crate::stats::TransferStats;
use crate::transaction::{EntityId, TransactionId};
use crate::{Config, Error, Result};

/// 송신자 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Idle,
    SendingMetadata,
    SendingData,
    AwaitingEofAck,
    AwaitingFinished,
    /// 모든 데이터 1차 전송 후 재전송 큐가 비어 있지 않음
    Resending,
    Terminated,
    /// EOF 재전송 한도 초과
    Abandoned,
    /// 로컬 I/O 실패
    Aborted,
    Cancelled,
}

impl SenderState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SenderState::Terminated
                | SenderState::Abandoned
                | SenderState::Aborted
                | SenderState::Cancelled
        )
    }
}

/// 송신 엔진 (트랜잭션 1개)
pub struct SenderEngine<S: PduSink> {
    config: Config,
    transaction: TransactionId,
    header: PduHeader,

    /// 원본 파일
    source: Box<dyn FileSource>,
    file_length: u64,
    source_name: String,
    dest_name: String,
    options: Vec<MetadataOption>,

    sink: S,
    loss: Box<dyn LossModel>,
    notifier: Notifier,

    /// 내부 단계 (Resending은 파생 상태)
    phase: SenderState,
    suspended: bool,

    /// Metadata (재)전송 필요
    metadata_pending: bool,

    /// 다음 1차 전송 오프셋
    next_offset: u64,

    /// 1차 전송분에 대해서만 누적
    checksum: Checksum,

    retransmit: RetransmissionQueue,

    /// EOF 재전송 타이머
    eof_deadline: Option<Instant>,
    eof_attempts: u32,

    /// 송신 PDU 인덱스 (Metadata = 0)
    outbound_index: u64,

    stats: TransferStats,
}

impl<S: PduSink> SenderEngine<S> {
    /// 새 송신 엔진 생성
    pub fn new(
        config: Config,
        transaction: TransactionId,
        destination: EntityId,
        source: Box<dyn FileSource>,
        dest_name: impl Into<String>,
        sink: S,
    ) -> Result<Self> {
        config.validate()?;

        let file_length = source.len();
        if file_length == 0 {
            return Err(Error::EmptyFile);
        }

        let large_file = file_length > u32::MAX as u64;
        let header = PduHeader::new(transaction, destination, large_file)
            .with_lengths(config.entity_id_len, config.seq_num_len);
        let dest_name = dest_name.into();

        Ok(Self {
            checksum: Checksum::new(config.checksum_type),
            config,
            transaction,
            header,
            source,
            file_length,
            source_name: dest_name.clone(),
            dest_name,
            options: Vec::new(),
            sink,
            loss: Box::new(NoLoss),
            notifier: Notifier::new(),
            phase: SenderState::Idle,
            suspended: false,
            metadata_pending: false,
            next_offset: 0,
            retransmit: RetransmissionQueue::new(),
            eof_deadline: None,
            eof_attempts: 0,
            outbound_index: 0,
            stats: TransferStats::new(),
        })
    }

    /// 송신 PDU 드롭 전략 (테스트용 결정적 손실)
    pub fn with_loss_model(mut self, loss: impl LossModel + 'static) -> Self {
        self.loss = Box::new(loss);
        self
    }

    pub fn with_observer(mut self, observer: impl TransferObserver + 'static) -> Self {
        self.notifier.add(Box::new(observer));
        self
    }

    /// Metadata에 실을 옵션
    pub fn with_options(mut self, options: Vec<MetadataOption>) -> Self {
        self.options = options;
        self
    }

    pub fn with_source_name(mut self, name: impl Into<String>) -> Self {
        self.source_name = name.into();
        self
    }

    /// 전송 시작
    pub fn start(&mut self, _now: Instant) -> Result<()> {
        if self.phase != SenderState::Idle {
            return Err(Error::InvalidState {
                expected: format!("{:?}", SenderState::Idle),
                got: format!("{:?}", self.phase),
            });
        }

        info!(
            "Transaction {} started: {} -> entity {}:{} ({} bytes)",
            self.transaction, self.source_name, self.header.dest_entity, self.dest_name, self.file_length
        );

        self.phase = SenderState::SendingMetadata;
        self.metadata_pending = true;
        self.stats = TransferStats::new();
        Ok(())
    }

    /// 주기 작업: 만료된 타이머 처리 후 작업 1단위 수행
    pub fn tick(&mut self, now: Instant) -> Result<()> {
        if self.phase == SenderState::Idle || self.phase.is_terminal() || self.suspended {
            return Ok(());
        }

        self.service_eof_timer(now)?;
        if self.phase.is_terminal() {
            return Ok(());
        }

        if self.metadata_pending {
            self.metadata_pending = false;
            self.send_metadata()?;
            if self.phase == SenderState::SendingMetadata {
                self.phase = SenderState::SendingData;
            }
        } else if self.next_offset < self.file_length {
            self.send_next_chunk(now)?;
        } else if let Some(range) = self.retransmit.pop() {
            self.resend_chunk(range)?;
        }

        Ok(())
    }

    /// 수신 PDU 처리
    pub fn on_receive(&mut self, pdu: Pdu, now: Instant) -> Result<()> {
        if pdu.header.direction != Direction::TowardSender {
            warn!("송신측으로 향하지 않는 PDU 무시: {}", pdu);
            return Ok(());
        }
        if pdu.transaction() != self.transaction {
            warn!("다른 트랜잭션의 PDU 무시: {}", pdu);
            return Ok(());
        }

        self.stats.pdus_received += 1;

        match pdu.body {
            PduBody::Nak(nak) => self.handle_nak(nak, now),
            PduBody::Ack(ack) => {
                self.handle_ack(ack);
                Ok(())
            }
            PduBody::Finished(finished) => self.handle_finished(finished),
            PduBody::Prompt(_) => {
                info!("Prompt PDU received for {}", self.transaction);
                Ok(())
            }
            PduBody::KeepAlive(keep_alive) => {
                info!(
                    "KeepAlive PDU received for {}: progress={}",
                    self.transaction, keep_alive.progress
                );
                Ok(())
            }
            other => {
                warn!("송신측에서 처리할 수 없는 디렉티브: {:?}", other);
                Ok(())
            }
        }
    }

    /// 로컬 I/O 실패 등으로 즉시 중단. 이후 PDU를 보내지 않는다.
    pub fn abort(&mut self, reason: impl Into<String>) {
        if self.phase.is_terminal() {
            return;
        }

        let reason = reason.into();
        error!("Transaction {} aborted: {}", self.transaction, reason);

        self.cancel_timers();
        self.phase = SenderState::Aborted;
        self.finish(TransferOutcome::Aborted(reason));
    }

    /// 일시 정지 (타이머 동결)
    pub fn suspend(&mut self) {
        if self.phase.is_terminal() || self.suspended {
            return;
        }
        info!("Transaction {} suspended", self.transaction);
        self.suspended = true;
    }

    /// 재개. EOF 타이머는 한 주기 뒤로 다시 무장
    pub fn resume(&mut self, now: Instant) {
        if !self.suspended {
            return;
        }
        info!("Transaction {} resumed", self.transaction);
        self.suspended = false;
        if self.eof_deadline.is_some() {
            self.eof_deadline = Some(now + self.config.eof_ack_timeout());
        }
    }

    /// 취소: EOF(CancelRequestReceived) 1회 전송 후 종료
    pub fn cancel(&mut self, _now: Instant) -> Result<()> {
        if self.phase.is_terminal() || self.phase == SenderState::Idle {
            return Err(Error::InvalidState {
                expected: "active transaction".into(),
                got: format!("{:?}", self.phase),
            });
        }

        info!("Transaction {} canceled", self.transaction);
        self.cancel_timers();
        self.phase = SenderState::Cancelled;
        self.send_eof(ConditionCode::CancelRequestReceived)?;
        self.finish(TransferOutcome::Cancelled);
        Ok(())
    }

    /// 현재 상태
    pub fn state(&self) -> SenderState {
        match self.phase {
            SenderState::AwaitingEofAck | SenderState::AwaitingFinished
                if !self.retransmit.is_empty() =>
            {
                SenderState::Resending
            }
            phase => phase,
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn transaction(&self) -> TransactionId {
        self.transaction
    }

    pub fn file_length(&self) -> u64 {
        self.file_length
    }

    /// 1차 전송 완료 바이트
    pub fn progress(&self) -> u64 {
        self.next_offset
    }

    /// 1차 전송분 누적 체크섬
    pub fn checksum(&self) -> u32 {
        self.checksum.value()
    }

    pub fn eof_attempts(&self) -> u32 {
        self.eof_attempts
    }

    pub fn pending_retransmits(&self) -> usize {
        self.retransmit.len()
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
        self.phase.is_terminal()
    }

    // ─────────────────────────────────────────────────────────────────
    // 내부 처리
    // ─────────────────────────────────────────────────────────────────

    fn service_eof_timer(&mut self, now: Instant) -> Result<()> {
        let Some(deadline) = self.eof_deadline else {
            return Ok(());
        };
        if now < deadline {
            return Ok(());
        }

        if self.eof_attempts >= self.config.max_eof_attempts {
            let attempts = self.eof_attempts;
            warn!(
                "Transaction {}: EOF resend attempts ({}) reached, giving up",
                self.transaction, attempts
            );
            self.cancel_timers();
            self.phase = SenderState::Abandoned;
            self.finish(TransferOutcome::Abandoned(ConditionCode::PositiveAckLimitReached));
            return Err(Error::EofLimitReached { attempts });
        }

        self.eof_attempts += 1;
        if self.eof_attempts > 1 {
            info!(
                "Resending EOF {} of max {}",
                self.eof_attempts, self.config.max_eof_attempts
            );
        }
        self.eof_deadline = Some(now + self.config.eof_ack_timeout());
        self.send_eof(ConditionCode::NoError)
    }

    fn send_metadata(&mut self) -> Result<()> {
        let metadata = MetadataPdu {
            file_length: self.file_length,
            source_name: self.source_name.clone(),
            dest_name: self.dest_name.clone(),
            checksum_type: self.checksum.kind(),
            options: self.options.clone(),
        };

        self.stats.metadata_sent += 1;
        self.transmit(Pdu::new(self.header.clone(), PduBody::Metadata(metadata)))
    }

    fn send_next_chunk(&mut self, now: Instant) -> Result<()> {
        let offset = self.next_offset;
        let len = (self.file_length - offset).min(self.config.chunk_size as u64) as usize;
        let data = self.read_chunk(offset, len)?;

        self.checksum.update(offset, &data);
        self.next_offset = offset + len as u64;
        self.stats.file_data_chunks += 1;
        self.stats.file_bytes += len as u64;

        self.send_file_data(offset, data)?;

        if self.next_offset >= self.file_length {
            debug!(
                "Transaction {}: all {} bytes sent, checksum={:08X}",
                self.transaction,
                self.file_length,
                self.checksum.value()
            );
            self.phase = SenderState::AwaitingEofAck;
            // 첫 EOF는 다음 tick
            self.eof_deadline = Some(now);
            self.eof_attempts = 0;
        }

        Ok(())
    }

    fn resend_chunk(&mut self, range: ByteRange) -> Result<()> {
        let data = self.read_chunk(range.start, range.len() as usize)?;
        debug!("Resending {} for {}", range, self.transaction);

        self.stats.retransmitted_chunks += 1;
        self.send_file_data(range.start, data)
    }

    fn read_chunk(&mut self, offset: u64, len: usize) -> Result<Bytes> {
        match self.source.read_chunk(offset, len) {
            Ok(data) => Ok(data),
            Err(e) => {
                self.abort(format!("source read failed at offset {offset}: {e}"));
                Err(e)
            }
        }
    }

    fn send_file_data(&mut self, offset: u64, data: Bytes) -> Result<()> {
        let pdu = Pdu::new(
            self.header.as_file_data(),
            PduBody::FileData(FileDataPdu { offset, data }),
        );
        self.transmit(pdu)
    }

    fn send_eof(&mut self, condition: ConditionCode) -> Result<()> {
        let eof = EofPdu {
            condition,
            checksum: self.checksum.value(),
            file_length: self.file_length,
        };

        self.stats.eof_sent += 1;
        self.transmit(Pdu::new(self.header.clone(), PduBody::Eof(eof)))
    }

    fn send_finished_ack(&mut self, condition: ConditionCode) -> Result<()> {
        let ack = AckPdu {
            directive: DirectiveCode::Finished,
            subtype: AckSubtype::FinishedByEndSystem,
            condition,
            status: TransactionStatus::Terminated,
        };
        self.transmit(Pdu::new(self.header.clone(), PduBody::Ack(ack)))
    }

    /// 송신 훅: 인덱스 부여 후 손실 모델 적용
    fn transmit(&mut self, pdu: Pdu) -> Result<()> {
        let index = self.outbound_index;
        self.outbound_index += 1;
        self.stats.pdus_sent += 1;

        if self.loss.should_drop(index) {
            self.stats.pdus_dropped += 1;
            warn!("PDU #{} dropped (data loss simulation): {}", index, pdu);
            return Ok(());
        }

        debug!("PDU #{} sent: {}", index, pdu);
        self.sink.send_pdu(pdu)
    }

    fn handle_nak(&mut self, nak: NakPdu, now: Instant) -> Result<()> {
        if self.phase.is_terminal() {
            debug!("NAK ignored, transaction {} already closed", self.transaction);
            return Ok(());
        }

        self.stats.total_nacks += 1;
        self.stats.last_nack_time = Some(now);

        let metadata_requested = nak.ranges.iter().any(ByteRange::is_metadata_request);
        let file_length = self.file_length;
        let data_ranges: Vec<ByteRange> = nak
            .ranges
            .iter()
            .filter(|r| !r.is_metadata_request() && !r.is_empty())
            .map(|r| ByteRange::new(r.start.min(file_length), r.end.min(file_length)))
            .filter(|r| !r.is_empty())
            .collect();

        self.retransmit
            .replace_from(data_ranges.iter().copied(), self.config.chunk_size as u64);
        if metadata_requested {
            self.metadata_pending = true;
        }

        info!(
            "NAK received for {}: scope=[{}, {}) ranges={} metadata={} -> {} chunks queued",
            self.transaction,
            nak.scope_start,
            nak.scope_end,
            data_ranges.len(),
            metadata_requested,
            self.retransmit.len()
        );
        Ok(())
    }

    fn handle_ack(&mut self, ack: AckPdu) {
        if ack.directive != DirectiveCode::Eof {
            debug!("ACK for {:?} ignored", ack.directive);
            return;
        }

        if self.phase == SenderState::AwaitingEofAck {
            info!(
                "EOF ACK received for {} after {} attempt(s)",
                self.transaction, self.eof_attempts
            );
            self.eof_deadline = None;
            self.phase = SenderState::AwaitingFinished;
        } else {
            debug!("Duplicate EOF ACK for {} in {:?}", self.transaction, self.phase);
        }
    }

    fn handle_finished(&mut self, finished: FinishedPdu) -> Result<()> {
        match self.phase {
            SenderState::Terminated => {
                // 이전 ACK 유실 가능성: 다시 응답만
                debug!("Duplicate Finished for {}, re-acknowledging", self.transaction);
                return self.send_finished_ack(finished.condition);
            }
            SenderState::Idle
            | SenderState::Abandoned
            | SenderState::Aborted
            | SenderState::Cancelled => {
                debug!("Finished ignored in {:?}", self.phase);
                return Ok(());
            }
            _ => {}
        }

        info!(
            "Finished received for {}: {:?} complete={} {:?}",
            self.transaction, finished.condition, finished.data_complete, finished.file_status
        );

        self.cancel_timers();
        self.phase = SenderState::Terminated;
        self.send_finished_ack(finished.condition)?;

        let outcome = if finished.condition.is_error() {
            TransferOutcome::Rejected(finished.condition)
        } else {
            TransferOutcome::Completed
        };
        self.finish(outcome);
        Ok(())
    }

    fn cancel_timers(&mut self) {
        self.eof_deadline = None;
        self.metadata_pending = false;
        self.retransmit.clear();
    }

    fn finish(&mut self, outcome: TransferOutcome) {
        let delivered = self.notifier.notify(TransferReport {
            transaction: self.transaction,
            role: EntityRole::Source,
            outcome,
            bytes: self.next_offset,
        });
        if delivered {
            info!("Transaction {} closed: {}", self.transaction, self.stats.summary());
        }
    }
}

impl<S: PduSink> ProtocolEngine for SenderEngine<S> {
    fn tick(&mut self, now: Instant) -> Result<()> {
        SenderEngine::tick(self, now)
    }

    fn on_receive(&mut self, pdu: Pdu, now: Instant) -> Result<()> {
        SenderEngine::on_receive(self, pdu, now)
    }

    fn is_finished(&self) -> bool {
        SenderEngine::is_finished(self)
    }
}

impl<S: PduSink> std::fmt::Debug for SenderEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SenderEngine")
            .field("transaction", &self.transaction)
            .field("state", &self.state())
            .field("progress", &self.next_offset)
            .field("file_length", &self.file_length)
            .field("eof_attempts", &self.eof_attempts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::DropSet;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const SRC: u64 = 1;
    const DST: u64 = 2;

    fn file(len: usize) -> Bytes {
        Bytes::from((0..len).map(|i| (i * 31 % 256) as u8).collect::<Vec<u8>>())
    }

    fn engine(len: usize) -> SenderEngine<Vec<Pdu>> {
        SenderEngine::new(
            Config::default(),
            TransactionId::new(SRC, 7),
            DST,
            Box::new(file(len)),
            "dest.bin",
            Vec::new(),
        )
        .unwrap()
    }

    fn reply(body: PduBody) -> Pdu {
        let header = PduHeader::new(TransactionId::new(SRC, 7), DST, false).reply();
        Pdu::new(header, body)
    }

    fn nak(ranges: Vec<ByteRange>) -> Pdu {
        reply(PduBody::Nak(NakPdu::new(ranges)))
    }

    fn eof_ack() -> Pdu {
        reply(PduBody::Ack(AckPdu {
            directive: DirectiveCode::Eof,
            subtype: AckSubtype::FinishedByWaypointOrOther,
            condition: ConditionCode::NoError,
            status: TransactionStatus::Active,
        }))
    }

    fn finished(condition: ConditionCode) -> Pdu {
        reply(PduBody::Finished(FinishedPdu {
            condition,
            data_complete: true,
            file_status: crate::pdu::FileStatus::SuccessfulRetention,
        }))
    }

    fn recorder() -> (Arc<Mutex<Vec<TransferReport>>>, impl TransferObserver) {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = reports.clone();
        (reports, move |r: &TransferReport| sink.lock().unwrap().push(r.clone()))
    }

    fn file_ranges(pdus: &[Pdu]) -> Vec<ByteRange> {
        pdus.iter()
            .filter_map(|p| match &p.body {
                PduBody::FileData(d) => Some(d.range()),
                _ => None,
            })
            .collect()
    }

    fn eof_count(pdus: &[Pdu]) -> usize {
        pdus.iter()
            .filter(|p| matches!(p.body, PduBody::Eof(_)))
            .count()
    }

    #[test]
    fn test_streams_metadata_data_then_eof() {
        let t0 = Instant::now();
        let mut sender = engine(2500);
        sender.start(t0).unwrap();

        for _ in 0..5 {
            sender.tick(t0).unwrap();
        }

        let pdus = sender.sink();
        assert!(matches!(&pdus[0].body, PduBody::Metadata(m) if m.file_length == 2500 && m.dest_name == "dest.bin"));
        assert_eq!(
            file_ranges(pdus),
            vec![
                ByteRange::new(0, 1000),
                ByteRange::new(1000, 2000),
                ByteRange::new(2000, 2500)
            ]
        );
        match &pdus[4].body {
            PduBody::Eof(eof) => {
                assert_eq!(eof.condition, ConditionCode::NoError);
                assert_eq!(eof.file_length, 2500);
                assert_eq!(eof.checksum, Checksum::compute(Default::default(), &file(2500)));
            }
            other => panic!("expected EOF, got {:?}", other),
        }
        assert!(!pdus[1].header.file_directive);
        assert_eq!(sender.state(), SenderState::AwaitingEofAck);
    }

    #[test]
    fn test_one_unit_of_work_per_tick() {
        let t0 = Instant::now();
        let mut sender = engine(10_000);
        sender.start(t0).unwrap();

        for expected in 1..=11 {
            sender.tick(t0).unwrap();
            assert_eq!(sender.sink().len(), expected);
        }
        assert_eq!(sender.progress(), 10_000);
    }

    #[test]
    fn test_tick_before_start_does_nothing() {
        let mut sender = engine(100);
        sender.tick(Instant::now()).unwrap();

        assert!(sender.sink().is_empty());
        assert_eq!(sender.state(), SenderState::Idle);
        sender.start(Instant::now()).unwrap();
        assert!(sender.start(Instant::now()).is_err());
    }

    #[test]
    fn test_nak_resends_without_touching_checksum() {
        let t0 = Instant::now();
        let mut sender = engine(2500);
        sender.start(t0).unwrap();
        for _ in 0..5 {
            sender.tick(t0).unwrap();
        }
        let checksum = sender.checksum();
        sender.on_receive(eof_ack(), t0).unwrap();
        sender.sink_mut().clear();

        sender.on_receive(nak(vec![ByteRange::new(1000, 2500)]), t0).unwrap();
        assert_eq!(sender.state(), SenderState::Resending);

        sender.tick(t0).unwrap();
        sender.tick(t0).unwrap();
        sender.tick(t0).unwrap();

        assert_eq!(
            file_ranges(sender.sink()),
            vec![ByteRange::new(1000, 2000), ByteRange::new(2000, 2500)]
        );
        assert_eq!(sender.checksum(), checksum);
        assert_eq!(sender.stats().retransmitted_chunks, 2);
        assert_eq!(sender.state(), SenderState::AwaitingFinished);
    }

    #[test]
    fn test_latest_nak_replaces_queue() {
        let t0 = Instant::now();
        let mut sender = engine(5000);
        sender.start(t0).unwrap();
        for _ in 0..7 {
            sender.tick(t0).unwrap();
        }
        sender.sink_mut().clear();

        sender.on_receive(nak(vec![ByteRange::new(0, 3000)]), t0).unwrap();
        sender.tick(t0).unwrap();
        sender.on_receive(nak(vec![ByteRange::new(4000, 4500)]), t0).unwrap();
        sender.tick(t0).unwrap();
        sender.tick(t0).unwrap();

        assert_eq!(
            file_ranges(sender.sink()),
            vec![ByteRange::new(0, 1000), ByteRange::new(4000, 4500)]
        );
    }

    #[test]
    fn test_nak_ranges_clamped_to_file() {
        let t0 = Instant::now();
        let mut sender = engine(1500);
        sender.start(t0).unwrap();
        for _ in 0..4 {
            sender.tick(t0).unwrap();
        }

        sender
            .on_receive(nak(vec![ByteRange::new(1200, 9000), ByteRange::new(5000, 6000)]), t0)
            .unwrap();
        assert_eq!(sender.pending_retransmits(), 1);
    }

    #[test]
    fn test_metadata_sentinel_resends_metadata_first() {
        let t0 = Instant::now();
        let mut sender = engine(3000);
        sender.start(t0).unwrap();
        for _ in 0..5 {
            sender.tick(t0).unwrap();
        }
        sender.sink_mut().clear();

        sender
            .on_receive(
                nak(vec![ByteRange::METADATA_REQUEST, ByteRange::new(0, 1000)]),
                t0,
            )
            .unwrap();
        sender.tick(t0).unwrap();
        sender.tick(t0).unwrap();

        let pdus = sender.sink();
        assert!(matches!(pdus[0].body, PduBody::Metadata(_)));
        assert_eq!(file_ranges(pdus), vec![ByteRange::new(0, 1000)]);
        assert_eq!(sender.stats().metadata_sent, 2);
    }

    #[test]
    fn test_eof_retry_limit() {
        let t0 = Instant::now();
        let (reports, observer) = recorder();
        let mut sender = engine(1000).with_observer(observer);
        let period = Config::default().eof_ack_timeout();
        sender.start(t0).unwrap();
        sender.tick(t0).unwrap(); // Metadata
        sender.tick(t0).unwrap(); // FileData

        let mut errors = 0;
        for i in 0..20u32 {
            if sender.tick(t0 + period * i).is_err() {
                errors += 1;
            }
        }

        assert_eq!(eof_count(sender.sink()), 5);
        assert_eq!(errors, 1);
        assert_eq!(sender.state(), SenderState::Abandoned);

        let sent = sender.sink().len();
        sender.tick(t0 + period * 100).unwrap();
        sender.on_receive(finished(ConditionCode::NoError), t0).unwrap();
        assert_eq!(sender.sink().len(), sent);

        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(
            reports[0].outcome,
            TransferOutcome::Abandoned(ConditionCode::PositiveAckLimitReached)
        );
    }

    #[test]
    fn test_eof_ack_stops_retransmission() {
        let t0 = Instant::now();
        let mut sender = engine(1000);
        let period = Config::default().eof_ack_timeout();
        sender.start(t0).unwrap();
        sender.tick(t0).unwrap();
        sender.tick(t0).unwrap();
        sender.tick(t0).unwrap(); // EOF #1

        sender.on_receive(eof_ack(), t0).unwrap();
        for i in 1..10u32 {
            sender.tick(t0 + period * i).unwrap();
        }

        assert_eq!(eof_count(sender.sink()), 1);
        assert_eq!(sender.state(), SenderState::AwaitingFinished);
    }

    #[test]
    fn test_finished_acked_and_notified_once() {
        let t0 = Instant::now();
        let (reports, observer) = recorder();
        let mut sender = engine(1000).with_observer(observer);
        sender.start(t0).unwrap();
        for _ in 0..3 {
            sender.tick(t0).unwrap();
        }
        sender.on_receive(eof_ack(), t0).unwrap();

        sender.on_receive(finished(ConditionCode::NoError), t0).unwrap();
        sender.on_receive(finished(ConditionCode::NoError), t0).unwrap();

        let acks: Vec<&AckPdu> = sender
            .sink()
            .iter()
            .filter_map(|p| match &p.body {
                PduBody::Ack(a) => Some(a),
                _ => None,
            })
            .collect();
        assert_eq!(acks.len(), 2);
        assert!(acks.iter().all(|a| a.directive == DirectiveCode::Finished
            && a.subtype == AckSubtype::FinishedByEndSystem));

        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].outcome, TransferOutcome::Completed);
        assert_eq!(reports[0].bytes, 1000);
        assert_eq!(sender.state(), SenderState::Terminated);
    }

    #[test]
    fn test_finished_with_error_is_rejected() {
        let t0 = Instant::now();
        let (reports, observer) = recorder();
        let mut sender = engine(1000).with_observer(observer);
        sender.start(t0).unwrap();
        for _ in 0..3 {
            sender.tick(t0).unwrap();
        }

        sender
            .on_receive(finished(ConditionCode::FileChecksumFailure), t0)
            .unwrap();

        assert_eq!(
            reports.lock().unwrap()[0].outcome,
            TransferOutcome::Rejected(ConditionCode::FileChecksumFailure)
        );
        assert!(sender.is_finished());
    }

    struct FailingSource {
        len: u64,
        fail_from: u64,
    }

    impl FileSource for FailingSource {
        fn len(&self) -> u64 {
            self.len
        }

        fn read_chunk(&mut self, offset: u64, len: usize) -> Result<Bytes> {
            if offset >= self.fail_from {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk gone",
                )));
            }
            Ok(Bytes::from(vec![0u8; len]))
        }
    }

    #[test]
    fn test_io_failure_aborts() {
        let t0 = Instant::now();
        let (reports, observer) = recorder();
        let mut sender = SenderEngine::new(
            Config::default(),
            TransactionId::new(SRC, 1),
            DST,
            Box::new(FailingSource {
                len: 3000,
                fail_from: 1000,
            }),
            "x",
            Vec::new(),
        )
        .unwrap()
        .with_observer(observer);
        sender.start(t0).unwrap();

        sender.tick(t0).unwrap();
        sender.tick(t0).unwrap();
        assert!(matches!(sender.tick(t0), Err(Error::Io(_))));
        sender.tick(t0 + Duration::from_secs(60)).unwrap();

        assert_eq!(file_ranges(sender.sink()), vec![ByteRange::new(0, 1000)]);
        assert_eq!(sender.sink().len(), 2);
        assert_eq!(sender.state(), SenderState::Aborted);
        assert!(matches!(reports.lock().unwrap()[0].outcome, TransferOutcome::Aborted(_)));
    }

    #[test]
    fn test_outbound_drop_hook() {
        let t0 = Instant::now();
        let mut sender = engine(5000).with_loss_model(DropSet::new([3]));
        sender.start(t0).unwrap();
        for _ in 0..6 {
            sender.tick(t0).unwrap();
        }

        assert_eq!(
            file_ranges(sender.sink()),
            vec![
                ByteRange::new(0, 1000),
                ByteRange::new(1000, 2000),
                ByteRange::new(3000, 4000),
                ByteRange::new(4000, 5000)
            ]
        );
        assert_eq!(sender.stats().pdus_dropped, 1);
        assert_eq!(sender.stats().pdus_sent, 6);
        // 드롭된 청크도 체크섬에는 반영
        assert_eq!(sender.checksum(), Checksum::compute(Default::default(), &file(5000)));
    }

    #[test]
    fn test_empty_file_rejected() {
        let result = SenderEngine::new(
            Config::default(),
            TransactionId::new(SRC, 1),
            DST,
            Box::new(Bytes::new()),
            "empty",
            Vec::<Pdu>::new(),
        );
        assert!(matches!(result, Err(Error::EmptyFile)));
    }

    #[test]
    fn test_cancel_sends_cancel_eof() {
        let t0 = Instant::now();
        let (reports, observer) = recorder();
        let mut sender = engine(5000).with_observer(observer);
        sender.start(t0).unwrap();
        sender.tick(t0).unwrap();
        sender.tick(t0).unwrap();

        sender.cancel(t0).unwrap();
        sender.tick(t0).unwrap();

        let last = sender.sink().last().unwrap();
        assert!(matches!(&last.body, PduBody::Eof(e) if e.condition == ConditionCode::CancelRequestReceived));
        assert_eq!(sender.sink().len(), 3);
        assert_eq!(sender.state(), SenderState::Cancelled);
        assert_eq!(reports.lock().unwrap()[0].outcome, TransferOutcome::Cancelled);
        assert!(sender.cancel(t0).is_err());
    }

    #[test]
    fn test_suspend_freezes_progress() {
        let t0 = Instant::now();
        let period = Config::default().eof_ack_timeout();
        let mut sender = engine(1000);
        sender.start(t0).unwrap();
        sender.tick(t0).unwrap();
        sender.tick(t0).unwrap();
        sender.tick(t0).unwrap(); // EOF #1

        sender.suspend();
        for i in 1..20u32 {
            sender.tick(t0 + period * i).unwrap();
        }
        assert_eq!(eof_count(sender.sink()), 1);

        let resumed_at = t0 + period * 20;
        sender.resume(resumed_at);
        sender.tick(resumed_at).unwrap();
        assert_eq!(eof_count(sender.sink()), 1);
        sender.tick(resumed_at + period).unwrap();
        assert_eq!(eof_count(sender.sink()), 2);
    }

    #[test]
    fn test_foreign_transaction_ignored() {
        let t0 = Instant::now();
        let mut sender = engine(1000);
        sender.start(t0).unwrap();

        let other = PduHeader::new(TransactionId::new(SRC, 99), DST, false).reply();
        sender
            .on_receive(Pdu::new(other, PduBody::Nak(NakPdu::new(vec![ByteRange::new(0, 10)]))), t0)
            .unwrap();
        assert_eq!(sender.pending_retransmits(), 0);
        assert_eq!(sender.stats().pdus_received, 0);
    }
}
