//! 손실 시뮬레이션 (장애 주입)
//!
//! PDU 인덱스 → 드롭 여부를 결정하는 순수 전략. 송신측은 송신 PDU 인덱스(Metadata = 0)를,
//! 수신측은 종류별 수신 인덱스를 넘긴다. 테스트는 결정적인 전략을 주입한다.

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// PDU 드롭 전략
pub trait LossModel: Send {
    /// `index`번째 PDU를 버릴지 여부
    fn should_drop(&mut self, index: u64) -> bool;
}

/// 손실 없음
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLoss;

impl LossModel for NoLoss {
    fn should_drop(&mut self, _index: u64) -> bool {
        false
    }
}

/// 지정한 인덱스만 드롭
#[derive(Debug, Default, Clone)]
pub struct DropSet {
    indices: BTreeSet<u64>,
}

impl DropSet {
    pub fn new<I: IntoIterator<Item = u64>>(indices: I) -> Self {
        Self {
            indices: indices.into_iter().collect(),
        }
    }
}

impl LossModel for DropSet {
    fn should_drop(&mut self, index: u64) -> bool {
        self.indices.contains(&index)
    }
}

/// 독립 확률 드롭
#[derive(Debug)]
pub struct RandomLoss {
    probability: f64,
    rng: StdRng,
}

impl RandomLoss {
    pub fn new(probability: f64) -> Self {
        Self {
            probability: probability.clamp(0.0, 1.0),
            rng: StdRng::from_entropy(),
        }
    }

    /// 재현 가능한 시드 고정 버전
    pub fn seeded(probability: f64, seed: u64) -> Self {
        Self {
            probability: probability.clamp(0.0, 1.0),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }
}

impl LossModel for RandomLoss {
    fn should_drop(&mut self, _index: u64) -> bool {
        self.probability > 0.0 && self.rng.gen_bool(self.probability)
    }
}

impl<F> LossModel for F
where
    F: FnMut(u64) -> bool + Send,
{
    fn should_drop(&mut self, index: u64) -> bool {
        self(index)
    }
}

/// 확률 설정으로부터 기본 전략 생성
pub fn from_probability(probability: f64) -> Box<dyn LossModel> {
    if probability <= 0.0 {
        Box::new(NoLoss)
    } else {
        Box::new(RandomLoss::new(probability))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_set() {
        let mut model = DropSet::new([3, 7]);
        let dropped: Vec<u64> = (0..10).filter(|&i| model.should_drop(i)).collect();
        assert_eq!(dropped, vec![3, 7]);
    }

    #[test]
    fn test_random_loss_seeded_is_reproducible() {
        let mut a = RandomLoss::seeded(0.3, 99);
        let mut b = RandomLoss::seeded(0.3, 99);

        let first: Vec<bool> = (0..200).map(|i| a.should_drop(i)).collect();
        let second: Vec<bool> = (0..200).map(|i| b.should_drop(i)).collect();

        assert_eq!(first, second);
        let drops = first.iter().filter(|&&d| d).count();
        assert!(drops > 20 && drops < 120, "drops={drops}");
    }

    #[test]
    fn test_closure_and_extremes() {
        let mut even = |i: u64| i % 2 == 0;
        assert!(even.should_drop(4));
        assert!(!even.should_drop(5));

        let mut never = RandomLoss::seeded(0.0, 1);
        let mut always = RandomLoss::seeded(1.0, 1);
        assert!((0..50).all(|i| !never.should_drop(i)));
        assert!((0..50).all(|i| always.should_drop(i)));
        assert!(!from_probability(0.0).should_drop(0));
    }
}
