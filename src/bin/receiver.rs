//! CFDP 수신자 (destination entity)
//!
//! UDP로 PDU를 받아 파일을 조립하고 출력 디렉토리에 저장한다. 트랜잭션이 끝나도
//! 계속 대기한다 (Ctrl-C로 종료).
//!
//! 사용법:
//!   cargo run --release --bin cfdp-receiver -- [OPTIONS]
//!
//! 예시:
//!   # 기본 수신
//!   cargo run --release --bin cfdp-receiver -- --bind 0.0.0.0:9000 --output received
//!
//!   # 시뮬레이터 손실 모델 (FileData 20%, EOF 50%)
//!   cargo run --release --bin cfdp-receiver -- --simulator

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use cfdp_sim::{
    ChannelSink, Config, DirectoryStore, Pdu, ReceiverEngine, StatusBoard, TransferReport,
    TransmissionScheduler,
};

/// 수신자 설정
struct ReceiverArgs {
    bind_addr: SocketAddr,
    output_dir: PathBuf,
    entity: u64,
    config: Config,
}

impl Default for ReceiverArgs {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9000)),
            output_dir: PathBuf::from("received"),
            entity: 2,
            config: Config::default(),
        }
    }
}

fn parse_args() -> Result<ReceiverArgs, Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ReceiverArgs::default();

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--bind" | "-b", Some(v)) => {
                config.bind_addr = v.parse()?;
                i += 1;
            }
            ("--output" | "-o", Some(v)) => {
                config.output_dir = PathBuf::from(v);
                i += 1;
            }
            ("--entity", Some(v)) => {
                config.entity = v.parse()?;
                i += 1;
            }
            ("--file-data-loss", Some(v)) => {
                config.config.file_data_loss = v.parse()?;
                i += 1;
            }
            ("--eof-loss", Some(v)) => {
                config.config.eof_loss = v.parse()?;
                i += 1;
            }
            ("--grace", Some(v)) => {
                config.config.completion_check_delay_ms = v.parse()?;
                i += 1;
            }
            ("--max-file-size", Some(v)) => {
                config.config.max_file_size = v.parse()?;
                i += 1;
            }
            ("--simulator", _) => {
                config.config.file_data_loss = Config::simulator().file_data_loss;
                config.config.eof_loss = Config::simulator().eof_loss;
            }
            ("--fast", _) => {
                config.config = Config {
                    file_data_loss: config.config.file_data_loss,
                    eof_loss: config.config.eof_loss,
                    ..Config::fast_link()
                };
            }
            ("--help" | "-h", _) => {
                println!(
                    r#"CFDP Receiver - 확인 모드 파일 전송 수신자

사용법:
  cargo run --release --bin cfdp-receiver -- [OPTIONS]

옵션:
  -b, --bind <ADDR>          바인드 주소 (기본: 0.0.0.0:9000)
  -o, --output <DIR>         저장 디렉토리 (기본: received)
  --entity <ID>              로컬 엔티티 ID (기본: 2)
  --file-data-loss <P>       FileData 손실 확률 0.0~1.0 (기본: 0)
  --eof-loss <P>             EOF 손실 확률 0.0~1.0 (기본: 0)
  --simulator                FileData 20%, EOF 50% 손실
  --grace <MS>               EOF 후 완료 검사 유예 (기본: 2000)
  --max-file-size <BYTES>    최대 파일 크기 (기본: 64MB)
  --fast                     짧은 타이머 사용
  -h, --help                 이 도움말 출력
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

    info!("CFDP Receiver starting...");
    info!("Bind address: {}", args.bind_addr);
    info!("Output directory: {:?}", args.output_dir);
    info!(
        "Loss model: FileData {:.0}%, EOF {:.0}%",
        args.config.file_data_loss * 100.0,
        args.config.eof_loss * 100.0
    );

    let store = DirectoryStore::new(&args.output_dir)?;
    let socket = Arc::new(UdpSocket::bind(args.bind_addr).await?);
    let board = StatusBoard::new();

    let (sink, mut outbound) = ChannelSink::channel();
    let engine = ReceiverEngine::new(args.config.clone(), args.entity, sink, store)?
        .with_observer(board.clone())
        .with_observer(|report: &TransferReport| {
            info!(
                "Transaction {} ended: {:?} ({} bytes)",
                report.transaction, report.outcome, report.bytes
            );
        });

    let (handle, task) = TransmissionScheduler::spawn_service(engine, args.config.tick_interval());

    // 마지막으로 PDU를 보낸 송신측 주소
    let peer: Arc<Mutex<Option<SocketAddr>>> = Arc::new(Mutex::new(None));

    // ─────────────────────────────────────────────────────────────────
    // 송신 태스크
    // ─────────────────────────────────────────────────────────────────
    let send_socket = socket.clone();
    let send_peer = peer.clone();
    tokio::spawn(async move {
        while let Some(pdu) = outbound.recv().await {
            let current = *send_peer.lock();
            let Some(addr) = current else {
                warn!("송신측 주소 없음, PDU 폐기: {}", pdu);
                continue;
            };
            match pdu.to_bytes() {
                Ok(bytes) => {
                    if let Err(e) = send_socket.send_to(&bytes, addr).await {
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
            match socket.recv_from(&mut buf).await {
                Ok((len, addr)) => match Pdu::from_bytes(&buf[..len]) {
                    Ok(pdu) => {
                        *peer.lock() = Some(addr);
                        if recv_handle.deliver(pdu).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("잘못된 PDU 무시 ({}): {}", addr, e),
                },
                Err(e) => warn!("수신 에러: {}", e),
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    handle.stop();

    let engine = task.await?;
    info!("Final state: {:?}", engine.state());
    for report in board.failures() {
        warn!(
            "Transaction {} did not complete: {:?}",
            report.transaction, report.outcome
        );
    }

    Ok(())
}
