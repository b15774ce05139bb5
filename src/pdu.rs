//! PDU(Protocol Data Unit) 정의
//!
//! 엔진은 PDU를 이름 있는 필드를 가진 구조체로만 다룬다. 바이트 배치는 코덱 담당이며,
//! 여기서는 bincode 기반 코덱(매직 넘버 + 버전 프리픽스)을 제공한다.
//! 프레임 크기 계산(헤더 길이, NAK 용량)은 CCSDS 필드 크기를 기준으로 한다.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::checksum::ChecksumType;
use crate::coverage::ByteRange;
use crate::transaction::{EntityId, SequenceNumber, TransactionId};
use crate::{Error, Result, MAGIC_NUMBER, PROTOCOL_VERSION};

/// 전송 방향
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// 송신측 → 수신측
    TowardReceiver,
    /// 수신측 → 송신측
    TowardSender,
}

/// 전송 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransmissionMode {
    Acknowledged,
    Unacknowledged,
}

/// 파일 디렉티브 코드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum DirectiveCode {
    Eof = 0x04,
    Finished = 0x05,
    Ack = 0x06,
    Metadata = 0x07,
    Nak = 0x08,
    Prompt = 0x09,
    KeepAlive = 0x0C,
}

/// 상태 코드 (EOF / ACK / Finished 공용)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ConditionCode {
    NoError = 0b0000,
    PositiveAckLimitReached = 0b0001,
    KeepAliveLimitReached = 0b0010,
    InvalidTransmissionMode = 0b0011,
    FilestoreRejection = 0b0100,
    FileChecksumFailure = 0b0101,
    FileSizeError = 0b0110,
    NakLimitReached = 0b0111,
    InactivityDetected = 0b1000,
    CheckLimitReached = 0b1010,
    UnsupportedChecksumType = 0b1011,
    SuspendRequestReceived = 0b1110,
    CancelRequestReceived = 0b1111,
}

impl ConditionCode {
    pub fn is_error(&self) -> bool {
        *self != ConditionCode::NoError
    }
}

/// ACK 서브타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckSubtype {
    /// EOF에 대한 ACK
    FinishedByWaypointOrOther = 0,
    /// Finished에 대한 ACK
    FinishedByEndSystem = 1,
}

/// ACK에 실리는 트랜잭션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Undefined,
    Active,
    Terminated,
    Unrecognized,
}

/// Finished의 파일 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileStatus {
    DiscardedDeliberately,
    DiscardedFilestoreRejection,
    SuccessfulRetention,
    Unreported,
}

/// PDU 헤더
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PduHeader {
    /// 파일 디렉티브 여부 (false면 파일 데이터)
    pub file_directive: bool,

    /// 전송 방향
    pub direction: Direction,

    /// 확인 모드 여부
    pub acknowledged: bool,

    /// PDU CRC 포함 여부
    pub crc: bool,

    /// 대용량 파일 플래그 (64비트 오프셋)
    pub large_file: bool,

    /// 엔티티 ID 길이 (바이트)
    pub entity_id_len: u8,

    /// 시퀀스 번호 길이 (바이트)
    pub seq_num_len: u8,

    pub source_entity: EntityId,
    pub dest_entity: EntityId,
    pub sequence: SequenceNumber,
}

impl PduHeader {
    /// 송신측 → 수신측 방향 디렉티브 헤더
    pub fn new(transaction: TransactionId, dest_entity: EntityId, large_file: bool) -> Self {
        Self {
            file_directive: true,
            direction: Direction::TowardReceiver,
            acknowledged: true,
            crc: false,
            large_file,
            entity_id_len: crate::DEFAULT_ENTITY_ID_LEN,
            seq_num_len: crate::DEFAULT_SEQ_NUM_LEN,
            source_entity: transaction.source_entity,
            dest_entity,
            sequence: transaction.sequence,
        }
    }

    pub fn with_lengths(mut self, entity_id_len: u8, seq_num_len: u8) -> Self {
        self.entity_id_len = entity_id_len;
        self.seq_num_len = seq_num_len;
        self
    }

    /// 파일 데이터 PDU용 헤더
    pub fn as_file_data(&self) -> Self {
        Self {
            file_directive: false,
            ..self.clone()
        }
    }

    /// 같은 트랜잭션의 응답(수신측 → 송신측) 디렉티브 헤더
    pub fn reply(&self) -> Self {
        Self {
            file_directive: true,
            direction: Direction::TowardSender,
            ..self.clone()
        }
    }

    pub fn transaction(&self) -> TransactionId {
        TransactionId::new(self.source_entity, self.sequence)
    }

    /// 인코딩된 헤더 길이 (바이트)
    pub fn len(&self) -> usize {
        4 + 2 * self.entity_id_len as usize + self.seq_num_len as usize
    }
}

/// 파일 오프셋 필드 크기 (large file이면 8바이트)
pub fn offset_size(large_file: bool) -> usize {
    if large_file {
        8
    } else {
        4
    }
}

/// 메타데이터 옵션 (TLV)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetadataOption {
    ProxyPutRequest(ProxyPutRequest),
    ProxyTransmissionMode(TransmissionMode),
    ProxyClosureRequest(bool),
    DirectoryListingRequest(DirectoryListingRequest),
    DirectoryListingResponse(DirectoryListingResponse),
    OriginatingTransactionId(TransactionId),
    ReservedMessageToUser { msg_type: u8, content: Vec<u8> },
    Unknown { tlv_type: u8, value: Vec<u8> },
}

/// 프록시 put 요청
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyPutRequest {
    pub dest_entity: EntityId,
    pub source_file: String,
    pub dest_file: String,
}

/// 디렉토리 목록 요청
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryListingRequest {
    pub directory: String,
    pub listing_file: String,
}

/// 디렉토리 목록 응답
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryListingResponse {
    pub successful: bool,
    pub directory: String,
    pub listing_file: String,
}

/// Metadata PDU
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataPdu {
    pub file_length: u64,
    pub source_name: String,
    pub dest_name: String,
    pub checksum_type: ChecksumType,
    pub options: Vec<MetadataOption>,
}

/// FileData PDU
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDataPdu {
    pub offset: u64,
    pub data: Bytes,
}

impl FileDataPdu {
    pub fn range(&self) -> ByteRange {
        ByteRange::new(self.offset, self.offset.saturating_add(self.data.len() as u64))
    }
}

/// EOF PDU
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EofPdu {
    pub condition: ConditionCode,
    pub checksum: u32,
    pub file_length: u64,
}

/// ACK PDU
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckPdu {
    /// 확인 대상 디렉티브
    pub directive: DirectiveCode,
    pub subtype: AckSubtype,
    pub condition: ConditionCode,
    pub status: TransactionStatus,
}

/// NAK PDU (누락 구간 요청)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NakPdu {
    pub scope_start: u64,
    pub scope_end: u64,
    pub ranges: Vec<ByteRange>,
}

impl NakPdu {
    /// scope는 첫 구간의 start ~ 마지막 구간의 end
    pub fn new(ranges: Vec<ByteRange>) -> Self {
        let scope_start = ranges.first().map(|r| r.start).unwrap_or(0);
        let scope_end = ranges.last().map(|r| r.end).unwrap_or(0);
        Self {
            scope_start,
            scope_end,
            ranges,
        }
    }

    /// 데이터 필드 예산 안에 들어가는 최대 구간 수
    ///
    /// 디렉티브 코드(1) + scope start/end + 구간당 start/end
    pub fn max_ranges(data_field_budget: usize, large_file: bool) -> usize {
        let size = offset_size(large_file);
        data_field_budget.saturating_sub(1 + 2 * size) / (2 * size)
    }
}

/// Finished PDU
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishedPdu {
    pub condition: ConditionCode,
    pub data_complete: bool,
    pub file_status: FileStatus,
}

/// Prompt PDU
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptPdu {
    pub nak_response: bool,
}

/// KeepAlive PDU
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepAlivePdu {
    pub progress: u64,
}

/// PDU 본문
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PduBody {
    Metadata(MetadataPdu),
    FileData(FileDataPdu),
    Eof(EofPdu),
    Ack(AckPdu),
    Nak(NakPdu),
    Finished(FinishedPdu),
    Prompt(PromptPdu),
    KeepAlive(KeepAlivePdu),
}

/// PDU
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pdu {
    pub header: PduHeader,
    pub body: PduBody,
}

/// 코덱 프레임 헤더
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FrameHeader {
    magic: u32,
    version: u8,
    payload_len: u32,
}

impl Pdu {
    pub fn new(header: PduHeader, body: PduBody) -> Self {
        Self { header, body }
    }

    pub fn transaction(&self) -> TransactionId {
        self.header.transaction()
    }

    /// 디렉티브 코드 (파일 데이터면 None)
    pub fn directive_code(&self) -> Option<DirectiveCode> {
        match &self.body {
            PduBody::Metadata(_) => Some(DirectiveCode::Metadata),
            PduBody::FileData(_) => None,
            PduBody::Eof(_) => Some(DirectiveCode::Eof),
            PduBody::Ack(_) => Some(DirectiveCode::Ack),
            PduBody::Nak(_) => Some(DirectiveCode::Nak),
            PduBody::Finished(_) => Some(DirectiveCode::Finished),
            PduBody::Prompt(_) => Some(DirectiveCode::Prompt),
            PduBody::KeepAlive(_) => Some(DirectiveCode::KeepAlive),
        }
    }

    /// 바이트로 직렬화
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(self)?;
        let header = FrameHeader {
            magic: MAGIC_NUMBER,
            version: PROTOCOL_VERSION,
            payload_len: payload.len() as u32,
        };
        let header_bytes = bincode::serialize(&header)?;

        let mut buf = Vec::with_capacity(header_bytes.len() + payload.len());
        buf.extend_from_slice(&header_bytes);
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// 바이트에서 역직렬화
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header: FrameHeader = bincode::deserialize(bytes)?;

        if header.magic != MAGIC_NUMBER {
            return Err(Error::InvalidMagicNumber {
                expected: MAGIC_NUMBER,
                got: header.magic,
            });
        }
        if header.version != PROTOCOL_VERSION {
            return Err(Error::InvalidVersion {
                expected: PROTOCOL_VERSION,
                got: header.version,
            });
        }

        let header_size = bincode::serialized_size(&header)? as usize;
        let payload = bytes
            .get(header_size..header_size + header.payload_len as usize)
            .ok_or_else(|| {
                Error::Serialization(Box::new(bincode::ErrorKind::Custom(format!(
                    "truncated frame: expected {} payload bytes, got {}",
                    header.payload_len,
                    bytes.len().saturating_sub(header_size)
                ))))
            })?;

        Ok(bincode::deserialize(payload)?)
    }
}

impl std::fmt::Display for Pdu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let txn = self.transaction();
        match &self.body {
            PduBody::Metadata(m) => write!(
                f,
                "Metadata[{}] {} -> {} ({} bytes)",
                txn, m.source_name, m.dest_name, m.file_length
            ),
            PduBody::FileData(d) => write!(f, "FileData[{}] {}", txn, d.range()),
            PduBody::Eof(e) => write!(
                f,
                "EOF[{}] {:?} checksum={:08X} length={}",
                txn, e.condition, e.checksum, e.file_length
            ),
            PduBody::Ack(a) => write!(f, "ACK[{}] {:?} {:?}", txn, a.directive, a.condition),
            PduBody::Nak(n) => write!(
                f,
                "NAK[{}] scope=[{}, {}) ranges={}",
                txn,
                n.scope_start,
                n.scope_end,
                n.ranges.len()
            ),
            PduBody::Finished(fin) => write!(
                f,
                "Finished[{}] {:?} complete={} {:?}",
                txn, fin.condition, fin.data_complete, fin.file_status
            ),
            PduBody::Prompt(_) => write!(f, "Prompt[{}]", txn),
            PduBody::KeepAlive(k) => write!(f, "KeepAlive[{}] progress={}", txn, k.progress),
        }
    }
}
