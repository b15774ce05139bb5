//! 전송 스케줄러
//!
//! 엔진 하나를 단일 tokio 태스크에서 구동한다. 주기 tick과 PDU 전달은 같은 `select!`
//! 루프에서 처리되므로 서로 배타적이다.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::pdu::Pdu;
use crate::{Error, Result};

/// 스케줄러가 구동하는 프로토콜 엔진
pub trait ProtocolEngine {
    /// 주기 작업
    fn tick(&mut self, now: Instant) -> Result<()>;

    /// 상대 엔티티에서 온 PDU 처리
    fn on_receive(&mut self, pdu: Pdu, now: Instant) -> Result<()>;

    /// 트랜잭션 종료 여부
    fn is_finished(&self) -> bool;
}

/// 내부 명령
enum SchedulerCmd {
    Deliver(Pdu),
    Stop,
}

/// 스케줄러 제어 핸들 (복제 가능)
#[derive(Clone)]
pub struct SchedulerHandle {
    cmd_tx: mpsc::UnboundedSender<SchedulerCmd>,
    running: Arc<AtomicBool>,
}

impl SchedulerHandle {
    /// 수신 PDU를 엔진에 전달
    pub fn deliver(&self, pdu: Pdu) -> Result<()> {
        self.cmd_tx
            .send(SchedulerCmd::Deliver(pdu))
            .map_err(|_| Error::ChannelError)
    }

    /// 정지
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.cmd_tx.send(SchedulerCmd::Stop);
    }

    /// 실행 중 여부
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("running", &self.is_running())
            .finish()
    }
}

/// 전송 스케줄러
pub struct TransmissionScheduler;

impl TransmissionScheduler {
    /// 엔진을 구동하고 트랜잭션이 끝나면 정지. 태스크는 엔진을 돌려준다.
    pub fn spawn<E>(engine: E, tick_interval: Duration) -> (SchedulerHandle, JoinHandle<E>)
    where
        E: ProtocolEngine + Send + 'static,
    {
        Self::start(engine, tick_interval, true)
    }

    /// 트랜잭션 종료와 무관하게 `stop()`까지 계속 구동 (여러 트랜잭션을 받는 수신측)
    pub fn spawn_service<E>(engine: E, tick_interval: Duration) -> (SchedulerHandle, JoinHandle<E>)
    where
        E: ProtocolEngine + Send + 'static,
    {
        Self::start(engine, tick_interval, false)
    }

    fn start<E>(
        mut engine: E,
        tick_interval: Duration,
        stop_when_finished: bool,
    ) -> (SchedulerHandle, JoinHandle<E>)
    where
        E: ProtocolEngine + Send + 'static,
    {
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<SchedulerCmd>();
        let running = Arc::new(AtomicBool::new(true));
        let running_main = running.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = engine.tick(Instant::now()) {
                            warn!("tick 에러: {}", e);
                        }
                    }
                    cmd = cmd_rx.recv() => match cmd {
                        Some(SchedulerCmd::Deliver(pdu)) => {
                            if let Err(e) = engine.on_receive(pdu, Instant::now()) {
                                warn!("PDU 처리 에러: {}", e);
                            }
                        }
                        Some(SchedulerCmd::Stop) | None => {
                            debug!("Scheduler stop requested");
                            break;
                        }
                    },
                }

                if stop_when_finished && engine.is_finished() {
                    info!("Transaction finished, scheduler stopping");
                    break;
                }
            }

            running_main.store(false, Ordering::SeqCst);
            engine
        });

        (SchedulerHandle { cmd_tx, running }, task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filestore::MemoryStore;
    use crate::observer::{EntityRole, StatusBoard, TransferOutcome};
    use crate::receiver::{ReceiverEngine, ReceiverState};
    use crate::sender::{SenderEngine, SenderState};
    use crate::sink::ChannelSink;
    use crate::transaction::LocalEntity;
    use crate::Config;
    use bytes::Bytes;

    /// 채널 출력을 상대 스케줄러로 전달
    fn forward(mut rx: mpsc::UnboundedReceiver<Pdu>, to: SchedulerHandle) {
        tokio::spawn(async move {
            while let Some(pdu) = rx.recv().await {
                if to.deliver(pdu).is_err() {
                    break;
                }
            }
        });
    }

    #[tokio::test]
    async fn test_end_to_end_over_channels() {
        let config = Config::fast_link();
        let data = Bytes::from((0..7_500).map(|i| (i % 97) as u8).collect::<Vec<u8>>());
        let store = MemoryStore::new();
        let board = StatusBoard::new();

        let mut local = LocalEntity::new(10);
        let txn = local.next_transaction();

        let (sender_sink, sender_out) = ChannelSink::channel();
        let (receiver_sink, receiver_out) = ChannelSink::channel();

        let mut sender = SenderEngine::new(
            config.clone(),
            txn,
            20,
            Box::new(data.clone()),
            "telemetry.bin",
            sender_sink,
        )
        .unwrap()
        .with_observer(board.clone());
        sender.start(Instant::now()).unwrap();

        let receiver = ReceiverEngine::new(config.clone(), 20, receiver_sink, store.clone())
            .unwrap()
            .with_observer(board.clone());

        let (sender_handle, sender_task) =
            TransmissionScheduler::spawn(sender, config.tick_interval());
        let (receiver_handle, receiver_task) =
            TransmissionScheduler::spawn_service(receiver, config.tick_interval());

        forward(sender_out, receiver_handle.clone());
        forward(receiver_out, sender_handle.clone());

        let sender = tokio::time::timeout(Duration::from_secs(10), sender_task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sender.state(), SenderState::Terminated);
        assert!(!sender_handle.is_running());

        receiver_handle.stop();
        let receiver = receiver_task.await.unwrap();
        assert_eq!(receiver.state(), ReceiverState::Finished);

        assert_eq!(store.get("telemetry.bin").unwrap(), data);
        assert_eq!(
            board.get(txn, EntityRole::Source).unwrap().outcome,
            TransferOutcome::Completed
        );
        assert_eq!(
            board.get(txn, EntityRole::Destination).unwrap().outcome,
            TransferOutcome::Completed
        );
    }

    #[tokio::test]
    async fn test_stop_returns_engine() {
        let config = Config::fast_link();
        let (sink, _out) = ChannelSink::channel();
        let receiver = ReceiverEngine::new(config.clone(), 1, sink, MemoryStore::new()).unwrap();

        let (handle, task) = TransmissionScheduler::spawn(receiver, config.tick_interval());
        assert!(handle.is_running());

        handle.stop();
        let receiver = task.await.unwrap();

        assert_eq!(receiver.state(), ReceiverState::AwaitingMetadata);
        assert!(!handle.is_running());
        assert!(handle.deliver(Pdu::new(
            crate::pdu::PduHeader::new(crate::TransactionId::new(1, 1), 1, false),
            crate::pdu::PduBody::Prompt(crate::pdu::PromptPdu { nak_response: true }),
        ))
        .is_err());
    }
}
