//! CFDP 송신자 (source entity)
//!
//! 파일 하나를 UDP로 수신 엔티티에 전송하고 Finished 핸드쉐이크까지 기다린다.
//!
//! 사용법:
//!   cargo run --release --bin cfdp-sender -- [OPTIONS]
//!
//! 예시:
//!   # 기본 전송
//!   cargo run --release --bin cfdp-sender -- --peer 127.0.0.1:9000 --file image.bin
//!
//!   # 송신 PDU #3, #7을 강제로 드롭
//!   cargo run --release --bin cfdp-sender -- -f image.bin --drop 3,7

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use cfdp_sim::observer::EntityRole;
use cfdp_sim::{
    ChannelSink, Config, DropSet, FileSource, LocalEntity, LocalFile, Pdu, SenderEngine,
    StatusBoard, TransmissionScheduler,
};

/// 송신자 설정
struct SenderArgs {
    bind_addr: SocketAddr,
    peer_addr: SocketAddr,
    file_path: Option<PathBuf>,
    dest_name: Option<String>,
    entity: u64,
    dest_entity: u64,
    drop: Vec<u64>,
    config: Config,
}

impl Default for SenderArgs {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            peer_addr: SocketAddr::from(([127, 0, 0, 1], 9000)),
            file_path: None,
            dest_name: None,
            entity: 1,
            dest_entity: 2,
            drop: Vec::new(),
            config: Config::default(),
        }
    }
}

fn parse_args() -> Result<SenderArgs, Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let mut config = SenderArgs::default();

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--bind" | "-b", Some(v)) => {
                config.bind_addr = v.parse()?;
                i += 1;
            }
            ("--peer" | "-p", Some(v)) => {
                config.peer_addr = v.parse()?;
                i += 1;
            }
            ("--file" | "-f", Some(v)) => {
                config.file_path = Some(PathBuf::from(v));
                i += 1;
            }
            ("--dest-name" | "-d", Some(v)) => {
                config.dest_name = Some(v.clone());
                i += 1;
            }
            ("--entity", Some(v)) => {
                config.entity = v.parse()?;
                i += 1;
            }
            ("--dest-entity", Some(v)) => {
                config.dest_entity = v.parse()?;
                i += 1;
            }
            ("--chunk-size", Some(v)) => {
                config.config.chunk_size = v.parse()?;
                i += 1;
            }
            ("--eof-timeout", Some(v)) => {
                config.config.eof_ack_timeout_ms = v.parse()?;
                i += 1;
            }
            ("--drop", Some(v)) => {
                config.drop = v
                    .split(',')
                    .map(|s| s.trim().parse())
                    .collect::<Result<Vec<u64>, _>>()?;
                i += 1;
            }
            ("--fast", _) => {
                config.config = Config {
                    chunk_size: config.config.chunk_size,
                    ..Config::fast_link()
                };
            }
            ("--help" | "-h", _) => {
                println!(
                    r#"CFDP Sender - 확인 모드 파일 전송 송신자

사용법:
  cargo run --release --bin cfdp-sender -- [OPTIONS]

옵션:
  -b, --bind <ADDR>        바인드 주소 (기본: 0.0.0.0:0)
  -p, --peer <ADDR>        수신 엔티티 주소 (기본: 127.0.0.1:9000)
  -f, --file <PATH>        전송할 파일 경로 (없으면 64KB 테스트 데이터)
  -d, --dest-name <NAME>   수신측 파일 이름 (기본: 원본 파일 이름)
  --entity <ID>            로컬 엔티티 ID (기본: 1)
  --dest-entity <ID>       수신 엔티티 ID (기본: 2)
  --chunk-size <SIZE>      FileData 청크 크기 (기본: 1000)
  --eof-timeout <MS>       EOF 재전송 주기 (기본: 3000)
  --drop <N,N,...>         드롭할 송신 PDU 인덱스 (Metadata = 0)
  --fast                   짧은 타이머 사용
  -h, --help               이 도움말 출력
"#
                );
                std::process::exit(0);
            }
            (other, _) => warn!("알 수 없는 인자 무시: {}", other),
        }
        i += 1;
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = parse_args()?;
    args.config.validate()?;

    // 원본 파일 준비
    let (source, source_name): (Box<dyn FileSource>, String) = match &args.file_path {
        Some(path) => {
            info!("Loading file: {:?}", path);
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "file.bin".into());
            (Box::new(LocalFile::open(path)?), name)
        }
        None => {
            info!("Using test data (64KB)");
            (Box::new(Bytes::from(vec![0xA5u8; 64 * 1024])), "test.bin".into())
        }
    };
    let dest_name = args.dest_name.clone().unwrap_or_else(|| source_name.clone());
    info!("Data size: {} bytes", source.len());

    // 소켓
    let socket = Arc::new(UdpSocket::bind(args.bind_addr).await?);
    socket.connect(args.peer_addr).await?;
    info!("Sending to {} from {}", args.peer_addr, socket.local_addr()?);

    // 엔진
    let mut entity = LocalEntity::new(args.entity);
    let transaction = entity.next_transaction();
    let board = StatusBoard::new();
    let (sink, mut outbound) = ChannelSink::channel();

    let mut engine = SenderEngine::new(
        args.config.clone(),
        transaction,
        args.dest_entity,
        source,
        dest_name,
        sink,
    )?
    .with_source_name(source_name)
    .with_observer(board.clone());
    if !args.drop.is_empty() {
        info!("Dropping outbound PDUs {:?}", args.drop);
        engine = engine.with_loss_model(DropSet::new(args.drop.iter().copied()));
    }
    engine.start(Instant::now())?;

    let (handle, task) = TransmissionScheduler::spawn(engine, args.config.tick_interval());

    // ─────────────────────────────────────────────────────────────────
    // 송신 태스크
    // ─────────────────────────────────────────────────────────────────
    let send_socket = socket.clone();
    tokio::spawn(async move {
        while let Some(pdu) = outbound.recv().await {
            match pdu.to_bytes() {
                Ok(bytes) => {
                    if let Err(e) = send_socket.send(&bytes).await {
                        warn!("송신 에러: {}", e);
                    }
                }
                Err(e) => warn!("PDU 인코딩 실패: {}", e),
            }
        }
    });

    // ─────────────────────────────────────────────────────────────────
    // 수신 태스크
    // ─────────────────────────────────────────────────────────────────
    let recv_handle = handle.clone();
    tokio::spawn(async move {
        let mut buf = vec![0u8; 65535];
        loop {
            match socket.recv(&mut buf).await {
                Ok(len) => match Pdu::from_bytes(&buf[..len]) {
                    Ok(pdu) => {
                        if recv_handle.deliver(pdu).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("잘못된 PDU 무시: {}", e),
                },
                Err(e) => warn!("수신 에러: {}", e),
            }
        }
    });

    let engine = tokio::select! {
        engine = task => engine?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping");
            handle.stop();
            return Ok(());
        }
    };

    info!("Transfer state: {:?}", engine.state());
    info!("{}", engine.stats().summary());

    match board.get(transaction, EntityRole::Source) {
        Some(report) if report.outcome.is_success() => {
            info!("Transaction {} completed ({} bytes)", transaction, report.bytes);
            Ok(())
        }
        Some(report) => {
            error!("Transaction {} failed: {:?}", transaction, report.outcome);
            std::process::exit(1);
        }
        None => {
            error!("Transaction {} ended without a report", transaction);
            std::process::exit(1);
        }
    }
}
