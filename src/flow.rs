//! Flow control driven by the round trip time.
//!
//! Two modes: good conditions send at 30 packets per second, bad conditions
//! drop to 10. Upgrading back to good requires the RTT to stay under the
//! threshold for a penalty period; flapping doubles the penalty, sustained
//! good conditions slowly shrink it again.

use std::time::Duration;

const RTT_THRESHOLD: Duration = Duration::from_millis(250);
const INITIAL_PENALTY: Duration = Duration::from_secs(4);
const MIN_PENALTY: Duration = Duration::from_secs(1);
const MAX_PENALTY: Duration = Duration::from_secs(60);
const PENALTY_ADJUST_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowMode {
  Good,
  Bad,
}

pub struct FlowControl {
  mode: FlowMode,
  penalty: Duration,
  good_conditions: Duration,
  penalty_reduction_acc: Duration,
}

impl FlowControl {
  pub fn new() -> Self {
    Self {
      mode: FlowMode::Bad,
      penalty: INITIAL_PENALTY,
      good_conditions: Duration::ZERO,
      penalty_reduction_acc: Duration::ZERO,
    }
  }

  pub fn reset(&mut self) {
    self.mode = FlowMode::Bad;
    self.penalty = INITIAL_PENALTY;
    self.good_conditions = Duration::ZERO;
    self.penalty_reduction_acc = Duration::ZERO;
  }

  pub fn update(&mut self, dt: Duration, rtt: Duration) {
    match self.mode {
      FlowMode::Good => {
        if rtt >= RTT_THRESHOLD {
          log::debug!("flow control dropping to bad mode");
          self.mode = FlowMode::Bad;
          // flapping: not enough good time before the drop
          if self.good_conditions < PENALTY_ADJUST_DELAY && self.penalty < MAX_PENALTY {
            self.penalty = (self.penalty * 2).min(MAX_PENALTY);
            log::debug!("penalty time increased to {:?}", self.penalty);
          }
          self.good_conditions = Duration::ZERO;
          self.penalty_reduction_acc = Duration::ZERO;
          return;
        }

        self.good_conditions += dt;
        self.penalty_reduction_acc += dt;

        if self.penalty_reduction_acc > PENALTY_ADJUST_DELAY && self.penalty > MIN_PENALTY {
          self.penalty = (self.penalty / 2).max(MIN_PENALTY);
          log::debug!("penalty time reduced to {:?}", self.penalty);
          self.penalty_reduction_acc = Duration::ZERO;
        }
      }
      FlowMode::Bad => {
        if rtt <= RTT_THRESHOLD {
          self.good_conditions += dt;
        } else {
          self.good_conditions = Duration::ZERO;
        }

        if self.good_conditions > self.penalty {
          log::debug!("flow control upgrading to good mode");
          self.good_conditions = Duration::ZERO;
          self.penalty_reduction_acc = Duration::ZERO;
          self.mode = FlowMode::Good;
        }
      }
    }
  }

  pub fn mode(&self) -> FlowMode {
    self.mode
  }

  /// Recommended number of packets to send per second.
  pub fn send_rate(&self) -> u32 {
    match self.mode {
      FlowMode::Good => 30,
      FlowMode::Bad => 10,
    }
  }
}

impl Default for FlowControl {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use {super::*, pretty_assertions::assert_eq};

  macro_rules! ms {
    ($v:literal) => {
      Duration::from_millis($v)
    };
  }

  /// Feed `total` time of a fixed rtt sample in 100ms steps.
  fn run(fc: &mut FlowControl, total: Duration, rtt: Duration) {
    let step = ms!(100);
    let mut elapsed = Duration::ZERO;
    while elapsed < total {
      fc.update(step, rtt);
      elapsed += step;
    }
  }

  #[test]
  fn starts_bad() {
    let fc = FlowControl::new();
    assert_eq!(fc.mode(), FlowMode::Bad);
    assert_eq!(fc.send_rate(), 10);
    assert_eq!(fc.penalty, Duration::from_secs(4));
  }

  #[test]
  fn upgrades_after_penalty_of_good_conditions() {
    let mut fc = FlowControl::new();

    run(&mut fc, ms!(3900), ms!(50));
    assert_eq!(fc.mode(), FlowMode::Bad);

    run(&mut fc, ms!(300), ms!(50));
    assert_eq!(fc.mode(), FlowMode::Good);
    assert_eq!(fc.send_rate(), 30);
  }

  #[test]
  fn bad_sample_resets_good_conditions() {
    let mut fc = FlowControl::new();

    run(&mut fc, ms!(3900), ms!(50));
    // one spike throws away the accumulated good time
    fc.update(ms!(100), ms!(400));
    run(&mut fc, ms!(3900), ms!(50));
    assert_eq!(fc.mode(), FlowMode::Bad);

    run(&mut fc, ms!(300), ms!(50));
    assert_eq!(fc.mode(), FlowMode::Good);
  }

  #[test]
  fn quick_drop_doubles_penalty() {
    let mut fc = FlowControl::new();

    run(&mut fc, ms!(4200), ms!(50));
    assert_eq!(fc.mode(), FlowMode::Good);

    // drop right away: less than 10s of good time, penalty doubles
    fc.update(ms!(100), ms!(300));
    assert_eq!(fc.mode(), FlowMode::Bad);
    assert_eq!(fc.penalty, Duration::from_secs(8));

    // now it takes more than 8s of good conditions to come back
    run(&mut fc, ms!(7900), ms!(50));
    assert_eq!(fc.mode(), FlowMode::Bad);
    run(&mut fc, ms!(300), ms!(50));
    assert_eq!(fc.mode(), FlowMode::Good);
  }

  #[test]
  fn penalty_caps_at_sixty_seconds() {
    let mut fc = FlowControl::new();

    for _ in 0..8 {
      // upgrade, then immediately drop again
      let penalty = fc.penalty;
      run(&mut fc, penalty + ms!(200), ms!(50));
      assert_eq!(fc.mode(), FlowMode::Good);
      fc.update(ms!(100), ms!(300));
      assert_eq!(fc.mode(), FlowMode::Bad);
    }
    assert_eq!(fc.penalty, Duration::from_secs(60));
  }

  #[test]
  fn sustained_good_conditions_halve_penalty() {
    let mut fc = FlowControl::new();

    // build an 8s penalty, then come back up
    run(&mut fc, ms!(4200), ms!(50));
    fc.update(ms!(100), ms!(300));
    assert_eq!(fc.penalty, Duration::from_secs(8));
    run(&mut fc, ms!(8200), ms!(50));
    assert_eq!(fc.mode(), FlowMode::Good);

    run(&mut fc, ms!(10200), ms!(50));
    assert_eq!(fc.penalty, Duration::from_secs(4));
    run(&mut fc, ms!(10200), ms!(50));
    assert_eq!(fc.penalty, Duration::from_secs(2));

    // floor is one second
    run(&mut fc, ms!(10200), ms!(50));
    assert_eq!(fc.penalty, Duration::from_secs(1));
    run(&mut fc, ms!(10200), ms!(50));
    assert_eq!(fc.penalty, Duration::from_secs(1));
  }

  #[test]
  fn reset_restores_initial_state() {
    let mut fc = FlowControl::new();
    run(&mut fc, ms!(4200), ms!(50));
    fc.update(ms!(100), ms!(300));
    assert_eq!(fc.penalty, Duration::from_secs(8));

    fc.reset();
    assert_eq!(fc.mode(), FlowMode::Bad);
    assert_eq!(fc.penalty, Duration::from_secs(4));
    assert_eq!(fc.send_rate(), 10);
  }
}
