//! # CFDP Class-2 파일 전송 엔진
//!
//! 지상국/위성 링크 시뮬레이션용 확인 모드(acknowledged) 파일 전송 프로토콜
//!
//! ## 핵심 특징
//! - **세그먼트 전송**: Metadata → FileData → EOF 순서의 고정 크기 PDU 스트림
//! - **선택 재전송**: 수신측 커버리지 추적기가 누락 구간을 NAK로 요청
//! - **종료 핸드쉐이크**: EOF/ACK, Finished/ACK, 재시도 한도 초과 시 포기
//! - **tick 구동**: 블로킹 없이 주기 스케줄러와 수신 콜백으로만 진행
//! - **장애 주입**: 교체 가능한 손실 모델로 결정적 테스트

pub mod checksum;
pub mod config;
pub mod coverage;
pub mod error;
pub mod fault;
pub mod filestore;
pub mod loopback;
pub mod observer;
pub mod pdu;
pub mod receiver;
pub mod retransmit;
pub mod scheduler;
pub mod sender;
pub mod sink;
pub mod stats;
pub mod transaction;

pub use checksum::{Checksum, ChecksumType};
pub use config::Config;
pub use coverage::{ByteRange, SegmentCoverageTracker};
pub use error::{Error, Result};
pub use fault::{DropSet, LossModel, NoLoss, RandomLoss};
pub use filestore::{DirectoryStore, FileActionProvider, Filestore, MemoryStore};
pub use loopback::Loopback;
pub use observer::{StatusBoard, TransferObserver, TransferOutcome, TransferReport};
pub use pdu::{ConditionCode, Pdu, PduBody, PduHeader};
pub use receiver::{ReceiverEngine, ReceiverState};
pub use retransmit::RetransmissionQueue;
pub use scheduler::{ProtocolEngine, SchedulerHandle, TransmissionScheduler};
pub use sender::{SenderEngine, SenderState};
pub use sink::{ChannelSink, FileSource, LocalFile, PduSink};
pub use stats::TransferStats;
pub use transaction::{EntityId, LocalEntity, TransactionId};

/// 프로토콜 버전
pub const PROTOCOL_VERSION: u8 = 1;

/// 기본 청크 크기 (바이트)
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// 기본 최대 PDU 크기 (링크 MTU 1500 - 20)
pub const DEFAULT_MAX_PDU_SIZE: usize = 1480;

/// 기본 엔티티 ID 길이 (바이트)
pub const DEFAULT_ENTITY_ID_LEN: u8 = 2;

/// 기본 시퀀스 번호 길이 (바이트)
pub const DEFAULT_SEQ_NUM_LEN: u8 = 2;

/// 매직 넘버 (프레임 식별용)
pub const MAGIC_NUMBER: u32 = 0x43464450; // "CFDP"
