//! Sequence numbers, cumulative acks and the bookkeeping around them.
//!
//! Separated from the connection so the queue and ack logic can be tested
//! without any networking.

use {
  crate::{
    queue::{PacketData, PacketQueue},
    seq,
  },
  std::time::Duration,
};

/// How long packet records are retained for accounting. Also the horizon
/// past which an unacked packet counts as lost.
pub const RTT_MAX: Duration = Duration::from_secs(1);

const EPSILON: Duration = Duration::from_millis(1);

/// Tracks everything needed to turn one-way datagrams into ack feedback:
/// which packets we sent, which we received, which of ours the peer has
/// confirmed, and a smoothed round trip time derived from the confirmations.
pub struct ReliabilitySystem {
  max_sequence: u32,
  local_sequence: u32,
  remote_sequence: u32,

  sent_packets: u32,
  recv_packets: u32,
  lost_packets: u32,
  acked_packets: u32,

  sent_bandwidth: f64,
  acked_bandwidth: f64,
  rtt: Duration,

  /// Sequences newly confirmed by the peer since the last update.
  acks: Vec<u32>,

  /// All sent packets inside the accounting window, for sent bandwidth.
  sent_queue: PacketQueue,
  /// Sent packets the peer has not confirmed yet.
  pending_ack_queue: PacketQueue,
  /// Recently received sequences, the source of outgoing ack bits.
  received_queue: PacketQueue,
  /// Confirmed packets inside the accounting window, for acked bandwidth.
  acked_queue: PacketQueue,
}

impl ReliabilitySystem {
  pub fn new(max_sequence: u32) -> Self {
    Self {
      max_sequence,
      local_sequence: 0,
      remote_sequence: 0,
      sent_packets: 0,
      recv_packets: 0,
      lost_packets: 0,
      acked_packets: 0,
      sent_bandwidth: 0.0,
      acked_bandwidth: 0.0,
      rtt: Duration::ZERO,
      acks: Vec::new(),
      sent_queue: PacketQueue::new(),
      pending_ack_queue: PacketQueue::new(),
      received_queue: PacketQueue::new(),
      acked_queue: PacketQueue::new(),
    }
  }

  /// Back to a freshly constructed state. Called when the connection the
  /// system belongs to disconnects, so a rejoin starts clean.
  pub fn reset(&mut self) {
    self.local_sequence = 0;
    self.remote_sequence = 0;
    self.sent_packets = 0;
    self.recv_packets = 0;
    self.lost_packets = 0;
    self.acked_packets = 0;
    self.sent_bandwidth = 0.0;
    self.acked_bandwidth = 0.0;
    self.rtt = Duration::ZERO;
    self.acks.clear();
    self.sent_queue.clear();
    self.pending_ack_queue.clear();
    self.received_queue.clear();
    self.acked_queue.clear();
  }

  /// Registers an outgoing packet of `size` bytes under the current local
  /// sequence, then advances the sequence.
  ///
  /// A local sequence already present in the sent or pending queues means
  /// the sequence space wrapped inside the accounting window; that is
  /// internal corruption and aborts.
  pub fn packet_sent(&mut self, size: usize) {
    assert!(
      !self.sent_queue.exists(self.local_sequence),
      "local sequence {} already in sent queue",
      self.local_sequence
    );
    assert!(
      !self.pending_ack_queue.exists(self.local_sequence),
      "local sequence {} already in pending ack queue",
      self.local_sequence
    );

    let data = PacketData::new(self.local_sequence, size);
    self.sent_queue.push_back(data);
    self.pending_ack_queue.push_back(data);
    self.sent_packets += 1;
    self.local_sequence = seq::next(self.local_sequence, self.max_sequence);
  }

  /// Registers an incoming packet. Duplicates count towards the receive
  /// total but change nothing else, so a replayed datagram cannot inflate
  /// ack state.
  pub fn packet_received(&mut self, sequence: u32, size: usize) {
    self.recv_packets += 1;
    if self.received_queue.exists(sequence) {
      return;
    }
    self
      .received_queue
      .insert_sorted(PacketData::new(sequence, size), self.max_sequence);
    if seq::more_recent(sequence, self.remote_sequence, self.max_sequence) {
      self.remote_sequence = sequence;
    }
  }

  /// Ack bitfield for the outgoing header: bit `k` is set when the packet
  /// `remote_sequence - 1 - k` has been received.
  pub fn generate_ack_bits(&self) -> u32 {
    generate_ack_bits(self.remote_sequence, &self.received_queue, self.max_sequence)
  }

  /// Applies the `(ack, ack_bits)` fields of an incoming header: every
  /// pending packet they cover moves to the acked queue, lands in
  /// [`acks`](Self::acks) and feeds the RTT estimate.
  pub fn process_ack(&mut self, ack: u32, ack_bits: u32) {
    let mut i = 0;
    while i < self.pending_ack_queue.len() {
      let packet = *self.pending_ack_queue.get(i).unwrap();

      let acked = if packet.sequence == ack {
        true
      } else if !seq::more_recent(packet.sequence, ack, self.max_sequence) {
        let bit = seq::bit_index(packet.sequence, ack, self.max_sequence);
        bit <= 31 && (ack_bits >> bit) & 1 != 0
      } else {
        false
      };

      if acked {
        self.pending_ack_queue.remove(i);
        self.rtt = smooth(self.rtt, packet.age);
        self.acked_queue.insert_sorted(packet, self.max_sequence);
        self.acks.push(packet.sequence);
        self.acked_packets += 1;
      } else {
        i += 1;
      }
    }
  }

  /// Advances time: clears the per-tick ack list, ages every queued record
  /// by `dt`, expires stale records and refreshes the bandwidth figures.
  pub fn update(&mut self, dt: Duration) {
    self.acks.clear();
    self.advance_queue_age(dt);
    self.update_queues();
    self.update_stats();
  }

  fn advance_queue_age(&mut self, dt: Duration) {
    let queues = [
      &mut self.sent_queue,
      &mut self.received_queue,
      &mut self.pending_ack_queue,
      &mut self.acked_queue,
    ];
    for queue in queues {
      for packet in queue.iter_mut() {
        packet.age += dt;
      }
    }
  }

  fn update_queues(&mut self) {
    while self
      .sent_queue
      .front()
      .is_some_and(|p| p.age > RTT_MAX + EPSILON)
    {
      self.sent_queue.pop_front();
    }

    if let Some(latest) = self.received_queue.back().map(|p| p.sequence) {
      // keep the last 34 sequence positions, enough for a 32-bit ack mask
      // no matter the receive order; latest - 34 modulo the sequence space,
      // computed wide so tiny spaces and u32::MAX both work
      let span = u64::from(self.max_sequence) + 1;
      let minimum = ((u64::from(latest) + span - 34 % span) % span) as u32;
      while self
        .received_queue
        .front()
        .is_some_and(|p| !seq::more_recent(p.sequence, minimum, self.max_sequence))
      {
        self.received_queue.pop_front();
      }
    }

    while self
      .acked_queue
      .front()
      .is_some_and(|p| p.age > RTT_MAX * 2 - EPSILON)
    {
      self.acked_queue.pop_front();
    }

    // anything unconfirmed for a full rtt window is gone
    while self
      .pending_ack_queue
      .front()
      .is_some_and(|p| p.age > RTT_MAX + EPSILON)
    {
      let packet = self.pending_ack_queue.pop_front().unwrap();
      self.lost_packets += 1;
      log::trace!("packet {} lost", packet.sequence);
    }
  }

  fn update_stats(&mut self) {
    let sent_bytes: usize = self.sent_queue.iter().map(|p| p.size).sum();
    let acked_bytes: usize = self
      .acked_queue
      .iter()
      .filter(|p| p.age >= RTT_MAX)
      .map(|p| p.size)
      .sum();
    let window = RTT_MAX.as_secs_f64();
    self.sent_bandwidth = sent_bytes as f64 / window * (8.0 / 1000.0);
    self.acked_bandwidth = acked_bytes as f64 / window * (8.0 / 1000.0);
  }

  // accessors; all return snapshot values

  pub fn local_sequence(&self) -> u32 {
    self.local_sequence
  }

  pub fn remote_sequence(&self) -> u32 {
    self.remote_sequence
  }

  pub fn max_sequence(&self) -> u32 {
    self.max_sequence
  }

  /// Sequences the peer confirmed since the last [`update`](Self::update).
  pub fn acks(&self) -> &[u32] {
    &self.acks
  }

  pub fn sent_packets(&self) -> u32 {
    self.sent_packets
  }

  pub fn received_packets(&self) -> u32 {
    self.recv_packets
  }

  pub fn lost_packets(&self) -> u32 {
    self.lost_packets
  }

  pub fn acked_packets(&self) -> u32 {
    self.acked_packets
  }

  /// Approximate sent bandwidth over the last second, in kbit/s.
  pub fn sent_bandwidth(&self) -> f64 {
    self.sent_bandwidth
  }

  /// Approximate confirmed bandwidth over the last second, in kbit/s.
  pub fn acked_bandwidth(&self) -> f64 {
    self.acked_bandwidth
  }

  pub fn round_trip_time(&self) -> Duration {
    self.rtt
  }

  pub fn pending_packets(&self) -> usize {
    self.pending_ack_queue.len()
  }
}

/// Exponentially smoothed RTT with a 1/10 coefficient, in plain `Duration`
/// arithmetic since the sample can sit on either side of the estimate.
fn smooth(rtt: Duration, sample: Duration) -> Duration {
  if sample >= rtt {
    rtt + (sample - rtt) / 10
  } else {
    rtt - (rtt - sample) / 10
  }
}

fn generate_ack_bits(ack: u32, received_queue: &PacketQueue, max_sequence: u32) -> u32 {
  let mut ack_bits = 0u32;
  for packet in received_queue.iter() {
    if packet.sequence == ack || seq::more_recent(packet.sequence, ack, max_sequence) {
      break;
    }
    let bit = seq::bit_index(packet.sequence, ack, max_sequence);
    if bit <= 31 {
      ack_bits |= 1 << bit;
    }
  }
  ack_bits
}
