//! 엔진 외부 협력자: PDU 출력(sink)과 원본 파일 읽기(source)

use std::collections::VecDeque;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::pdu::Pdu;
use crate::{Error, Result};

/// 송신 PDU 출력
pub trait PduSink: Send {
    fn send_pdu(&mut self, pdu: Pdu) -> Result<()>;
}

impl PduSink for Vec<Pdu> {
    fn send_pdu(&mut self, pdu: Pdu) -> Result<()> {
        self.push(pdu);
        Ok(())
    }
}

impl PduSink for VecDeque<Pdu> {
    fn send_pdu(&mut self, pdu: Pdu) -> Result<()> {
        self.push_back(pdu);
        Ok(())
    }
}

/// 채널 기반 출력 (스케줄러 / 소켓 송신 태스크로 전달)
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Pdu>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<Pdu>) -> Self {
        Self { tx }
    }

    /// 출력 채널 쌍 생성
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Pdu>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl PduSink for ChannelSink {
    fn send_pdu(&mut self, pdu: Pdu) -> Result<()> {
        self.tx.send(pdu).map_err(|_| Error::ChannelError)
    }
}

/// 원본 파일 임의 접근 읽기
pub trait FileSource: Send {
    /// 파일 길이
    fn len(&self) -> u64;

    /// `offset`부터 `len` 바이트
    fn read_chunk(&mut self, offset: u64, len: usize) -> Result<Bytes>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 로컬 파일
#[derive(Debug)]
pub struct LocalFile {
    file: File,
    length: u64,
}

impl LocalFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let length = file.metadata()?.len();
        Ok(Self { file, length })
    }
}

impl FileSource for LocalFile {
    fn len(&self) -> u64 {
        self.length
    }

    fn read_chunk(&mut self, offset: u64, len: usize) -> Result<Bytes> {
        let mut buf = vec![0u8; len];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;
        Ok(Bytes::from(buf))
    }
}

/// 메모리 상의 파일
impl FileSource for Bytes {
    fn len(&self) -> u64 {
        Bytes::len(self) as u64
    }

    fn read_chunk(&mut self, offset: u64, len: usize) -> Result<Bytes> {
        let start = offset as usize;
        let end = start
            .checked_add(len)
            .filter(|&end| end <= Bytes::len(self))
            .ok_or_else(|| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("read past end: offset={offset}, len={len}"),
                ))
            })?;
        Ok(self.slice(start..end))
    }
}
