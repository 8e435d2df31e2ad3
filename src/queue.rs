use crate::seq;
use std::{collections::VecDeque, time::Duration};

/// Bookkeeping for one sent or received packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketData {
  pub sequence: u32,
  /// Time since the packet was sent or received, depending on context.
  pub age: Duration,
  /// Packet size in bytes.
  pub size: usize,
}

impl PacketData {
  pub fn new(sequence: u32, size: usize) -> Self {
    Self {
      sequence,
      age: Duration::ZERO,
      size,
    }
  }
}

/// Packet records sorted by sequence under the wrap-safe ordering.
#[derive(Debug, Clone, Default)]
pub struct PacketQueue {
  inner: VecDeque<PacketData>,
}

impl PacketQueue {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.inner.len()
  }

  pub fn is_empty(&self) -> bool {
    self.inner.is_empty()
  }

  pub fn clear(&mut self) {
    self.inner.clear();
  }

  pub fn front(&self) -> Option<&PacketData> {
    self.inner.front()
  }

  pub fn back(&self) -> Option<&PacketData> {
    self.inner.back()
  }

  pub fn pop_front(&mut self) -> Option<PacketData> {
    self.inner.pop_front()
  }

  /// Appends a record. The caller guarantees it is more recent than the
  /// current tail; sent packets arrive in sequence order, so this holds.
  pub fn push_back(&mut self, data: PacketData) {
    self.inner.push_back(data);
  }

  pub fn get(&self, index: usize) -> Option<&PacketData> {
    self.inner.get(index)
  }

  /// Removes the record at `index`, preserving the order of the rest.
  pub fn remove(&mut self, index: usize) -> Option<PacketData> {
    self.inner.remove(index)
  }

  pub fn iter(&self) -> impl Iterator<Item = &PacketData> {
    self.inner.iter()
  }

  pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PacketData> {
    self.inner.iter_mut()
  }

  pub fn exists(&self, sequence: u32) -> bool {
    self.inner.iter().any(|p| p.sequence == sequence)
  }

  /// Places `data` so that the queue stays ordered by `more_recent`.
  ///
  /// Callers guard fresh inserts with [`exists`](Self::exists) where
  /// duplicates can occur. A record that fits nowhere duplicates a sequence
  /// already present (a tiny space can re-ack a sequence inside the
  /// retention window); it carries no new information and is dropped.
  pub fn insert_sorted(&mut self, data: PacketData, max_sequence: u32) {
    if self.inner.is_empty() {
      self.inner.push_back(data);
    } else if !seq::more_recent(data.sequence, self.inner[0].sequence, max_sequence) {
      self.inner.push_front(data);
    } else if seq::more_recent(
      data.sequence,
      self.inner[self.inner.len() - 1].sequence,
      max_sequence,
    ) {
      self.inner.push_back(data);
    } else if let Some(index) = self
      .inner
      .iter()
      .position(|p| seq::more_recent(p.sequence, data.sequence, max_sequence))
    {
      self.inner.insert(index, data);
    }
  }

  /// True when every adjacent pair is ordered by `more_recent`.
  pub fn is_sorted(&self, max_sequence: u32) -> bool {
    self
      .inner
      .iter()
      .zip(self.inner.iter().skip(1))
      .all(|(a, b)| seq::more_recent(b.sequence, a.sequence, max_sequence))
  }
}

#[cfg(test)]
mod tests {
  use {super::*, pretty_assertions::assert_eq};

  fn sequences(queue: &PacketQueue) -> Vec<u32> {
    queue.iter().map(|p| p.sequence).collect()
  }

  #[test]
  fn insert_sorted_in_order() {
    let mut queue = PacketQueue::new();
    for i in 0..8 {
      queue.insert_sorted(PacketData::new(i, 0), 255);
      assert!(queue.is_sorted(255));
    }
    assert_eq!(sequences(&queue), (0..8).collect::<Vec<_>>());
  }

  #[test]
  fn insert_sorted_reversed_and_shuffled() {
    let mut queue = PacketQueue::new();
    for i in (0..8).rev() {
      queue.insert_sorted(PacketData::new(i, 0), 255);
      assert!(queue.is_sorted(255));
    }
    assert_eq!(sequences(&queue), (0..8).collect::<Vec<_>>());

    let mut queue = PacketQueue::new();
    for i in [5u32, 1, 7, 0, 3, 6, 2, 4] {
      queue.insert_sorted(PacketData::new(i, 0), 255);
      assert!(queue.is_sorted(255));
    }
    assert_eq!(sequences(&queue), (0..8).collect::<Vec<_>>());
  }

  #[test]
  fn insert_sorted_across_wrap() {
    let mut queue = PacketQueue::new();
    for i in [255u32, 1, 254, 0] {
      queue.insert_sorted(PacketData::new(i, 0), 255);
      assert!(queue.is_sorted(255));
    }
    // the small sequences sit after the wrap, not at the front
    assert_eq!(sequences(&queue), vec![254, 255, 0, 1]);
  }

  #[test]
  fn exists_and_remove() {
    let mut queue = PacketQueue::new();
    for i in 0..4 {
      queue.push_back(PacketData::new(i, 0));
    }
    assert!(queue.exists(2));
    assert!(!queue.exists(9));

    let removed = queue.remove(1).unwrap();
    assert_eq!(removed.sequence, 1);
    assert_eq!(sequences(&queue), vec![0, 2, 3]);
    assert!(queue.is_sorted(255));
  }

  #[test]
  fn front_back_pop() {
    let mut queue = PacketQueue::new();
    assert!(queue.pop_front().is_none());
    for i in 0..3 {
      queue.push_back(PacketData::new(i, 0));
    }
    assert_eq!(queue.front().unwrap().sequence, 0);
    assert_eq!(queue.back().unwrap().sequence, 2);
    assert_eq!(queue.pop_front().unwrap().sequence, 0);
    assert_eq!(queue.len(), 2);
  }
}
