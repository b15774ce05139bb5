//! 결정적 루프백 링크
//!
//! 송신/수신 엔진을 가상 시계 위에서 한 스레드로 연결한다. 한 step은
//! 대기 중인 PDU 전달 → 시계 전진 → 양쪽 tick → 전달 순서로 진행된다.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::pdu::Pdu;
use crate::receiver::ReceiverEngine;
use crate::sender::SenderEngine;
use crate::Result;

/// 가상 시계 기반 송수신 쌍
pub struct Loopback {
    sender: SenderEngine<VecDeque<Pdu>>,
    receiver: ReceiverEngine<VecDeque<Pdu>>,
    now: Instant,
    tick_interval: Duration,
    steps: u64,

    /// 전달된 모든 PDU (양방향, 전달 순)
    transcript: Vec<Pdu>,
}

impl Loopback {
    pub fn new(
        sender: SenderEngine<VecDeque<Pdu>>,
        receiver: ReceiverEngine<VecDeque<Pdu>>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            sender,
            receiver,
            now: Instant::now(),
            tick_interval,
            steps: 0,
            transcript: Vec::new(),
        }
    }

    /// 송신 시작
    pub fn start(&mut self) -> Result<()> {
        self.sender.start(self.now)
    }

    /// 한 tick 진행
    pub fn step(&mut self) -> Result<()> {
        self.deliver()?;

        self.now += self.tick_interval;
        self.steps += 1;
        let sender_result = self.sender.tick(self.now);
        let receiver_result = self.receiver.tick(self.now);

        self.deliver()?;
        sender_result.and(receiver_result)
    }

    /// 송신 트랜잭션이 끝나고 대기 PDU가 없을 때까지 진행. 진행한 step 수 반환
    pub fn run_until_idle(&mut self, max_steps: u64) -> Result<u64> {
        let start = self.steps;
        while self.steps - start < max_steps {
            if self.is_idle() {
                break;
            }
            self.step()?;
        }
        debug!("Loopback idle after {} steps", self.steps - start);
        Ok(self.steps - start)
    }

    pub fn is_idle(&self) -> bool {
        self.sender.is_finished() && self.sender.sink().is_empty() && self.receiver.sink().is_empty()
    }

    pub fn sender(&self) -> &SenderEngine<VecDeque<Pdu>> {
        &self.sender
    }

    pub fn receiver(&self) -> &ReceiverEngine<VecDeque<Pdu>> {
        &self.receiver
    }

    pub fn transcript(&self) -> &[Pdu] {
        &self.transcript
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    fn deliver(&mut self) -> Result<()> {
        loop {
            let mut moved = false;

            while let Some(pdu) = self.sender.sink_mut().pop_front() {
                self.transcript.push(pdu.clone());
                self.receiver.on_receive(pdu, self.now)?;
                moved = true;
            }
            while let Some(pdu) = self.receiver.sink_mut().pop_front() {
                self.transcript.push(pdu.clone());
                self.sender.on_receive(pdu, self.now)?;
                moved = true;
            }

            if !moved {
                return Ok(());
            }
        }
    }
}

impl std::fmt::Debug for Loopback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loopback")
            .field("sender", &self.sender)
            .field("receiver", &self.receiver)
            .field("steps", &self.steps)
            .finish()
    }
}
