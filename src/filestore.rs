//! 수신 파일 저장소와 파일 액션(프록시 put / 디렉토리 목록) 협력자

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::pdu::{DirectoryListingRequest, ProxyPutRequest, TransmissionMode};
use crate::transaction::TransactionId;
use crate::Result;

/// 경로 구분자를 치환한 저장용 파일 이름
pub fn sanitize(file_name: &str) -> String {
    file_name.replace(['/', '\\'], "_")
}

/// 완성된 파일 저장소
pub trait Filestore: Send {
    /// `name`은 이미 sanitize된 이름
    fn store(&mut self, name: &str, data: &[u8]) -> Result<()>;
}

/// 디렉토리 저장소
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Filestore for DirectoryStore {
    fn store(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let path = self.root.join(name);
        std::fs::write(&path, data)?;
        info!("File saved in {}", path.display());
        Ok(())
    }
}

/// 메모리 저장소 (복제 핸들 공유)
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    files: Arc<Mutex<HashMap<String, Bytes>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Bytes> {
        self.files.lock().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.files.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.lock().is_empty()
    }
}

impl Filestore for MemoryStore {
    fn store(&mut self, name: &str, data: &[u8]) -> Result<()> {
        self.files
            .lock()
            .insert(name.to_string(), Bytes::copy_from_slice(data));
        Ok(())
    }
}

/// 메타데이터 옵션으로 요청된 파일 액션 처리자
///
/// 엔진은 옵션을 인식하고 넘겨줄 뿐, 의미는 구현체가 정한다.
pub trait FileActionProvider: Send {
    fn directory_listing(&mut self, origin: TransactionId, request: &DirectoryListingRequest);

    fn proxy_put(
        &mut self,
        origin: TransactionId,
        request: &ProxyPutRequest,
        mode: Option<TransmissionMode>,
        closure_requested: Option<bool>,
    );
}

/// 로그만 남기는 기본 처리자
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingFileActions;

impl FileActionProvider for LoggingFileActions {
    fn directory_listing(&mut self, origin: TransactionId, request: &DirectoryListingRequest) {
        info!(
            "DirectoryListingRequest from {}: {} -> {} (not served)",
            origin, request.directory, request.listing_file
        );
    }

    fn proxy_put(
        &mut self,
        origin: TransactionId,
        request: &ProxyPutRequest,
        mode: Option<TransmissionMode>,
        closure_requested: Option<bool>,
    ) {
        if mode == Some(TransmissionMode::Unacknowledged) {
            warn!("Unacknowledged proxy transmission requested, only acknowledged mode is supported");
        }
        info!(
            "ProxyPutRequest from {}: {} -> entity {}:{} closure={:?} (not served)",
            origin, request.source_file, request.dest_entity, request.dest_file, closure_requested
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("a/b\\c.bin"), "a_b_c.bin");
        assert_eq!(sanitize("plain.txt"), "plain.txt");
    }

    #[test]
    fn test_directory_store_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DirectoryStore::new(dir.path().join("out")).unwrap();

        store.store("x.bin", b"payload").unwrap();

        let written = std::fs::read(store.root().join("x.bin")).unwrap();
        assert_eq!(written, b"payload");
    }

    #[test]
    fn test_memory_store_shared_handle() {
        let store = MemoryStore::new();
        let mut writer = store.clone();

        writer.store("f", b"abc").unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("f").unwrap().as_ref(), b"abc");
    }
}
