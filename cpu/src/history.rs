//! Execution history.
//!
//! The execution engine records every decoded instruction here
//! before dispatching it, so that after a stop (a halt, an
//! unimplemented opcode, an instruction limit) the trail leading up
//! to it can be dumped.  The ring holds a fixed number of entries
//! and overwrites the oldest once full.

use std::fmt::{self, Display, Formatter};

use crate::decode::DecodedInstruction;

const DEFAULT_CAPACITY: usize = 100;

/// Fixed-capacity ring of decoded instructions, oldest first.
#[derive(Debug, Clone)]
pub struct History {
    entries: Box<[DecodedInstruction]>,
    head: usize,
    tail: usize,
}

impl History {
    /// Creates a history retaining up to `capacity` entries.  A
    /// capacity of zero is treated as one.
    #[must_use]
    pub fn new(capacity: usize) -> History {
        let slots = capacity.max(1) + 1;
        History {
            entries: vec![DecodedInstruction::empty(0, 0); slots].into_boxed_slice(),
            head: 0,
            tail: 0,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.len() - 1
    }

    #[must_use]
    pub fn len(&self) -> usize {
        (self.head + self.entries.len() - self.tail) % self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Appends an entry, evicting the oldest if the ring is full.
    pub fn record(&mut self, instruction: DecodedInstruction) {
        let slots = self.entries.len();
        self.entries[self.head] = instruction;
        self.head = (self.head + 1) % slots;
        if self.head == self.tail {
            self.tail = (self.tail + 1) % slots;
        }
    }

    /// Discards all retained entries.
    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
    }

    /// The most recently recorded entry.
    #[must_use]
    pub fn latest(&self) -> Option<&DecodedInstruction> {
        if self.is_empty() {
            None
        } else {
            let slots = self.entries.len();
            Some(&self.entries[(self.head + slots - 1) % slots])
        }
    }

    /// Iterates from the oldest retained entry to the newest.
    pub fn iter(&self) -> impl Iterator<Item = &DecodedInstruction> + '_ {
        let slots = self.entries.len();
        (0..self.len()).map(move |index| &self.entries[(self.tail + index) % slots])
    }
}

impl Default for History {
    fn default() -> History {
        History::new(DEFAULT_CAPACITY)
    }
}

impl Display for History {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        for entry in self.iter() {
            writeln!(f, "{entry}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
fn entry(pc: u32) -> DecodedInstruction {
    DecodedInstruction::empty(pc, 0)
}

#[cfg(test)]
fn recorded_pcs(history: &History) -> Vec<u32> {
    history.iter().map(|instruction| instruction.pc).collect()
}

#[test]
fn test_new_history_is_empty() {
    let history = History::new(4);
    assert!(history.is_empty());
    assert_eq!(history.len(), 0);
    assert_eq!(history.capacity(), 4);
    assert_eq!(history.latest(), None);
    assert_eq!(history.to_string(), "");
}

#[test]
fn test_records_in_order() {
    let mut history = History::new(4);
    for pc in 1..=3 {
        history.record(entry(pc));
    }
    assert_eq!(history.len(), 3);
    assert_eq!(recorded_pcs(&history), vec![1, 2, 3]);
    assert_eq!(history.latest().map(|i| i.pc), Some(3));
}

#[test]
fn test_full_ring_evicts_oldest() {
    let mut history = History::new(3);
    for pc in 1..=5 {
        history.record(entry(pc));
    }
    assert_eq!(history.len(), 3);
    assert_eq!(recorded_pcs(&history), vec![3, 4, 5]);
}

#[test]
fn test_zero_capacity_still_retains_one() {
    let mut history = History::new(0);
    history.record(entry(1));
    history.record(entry(2));
    assert_eq!(history.capacity(), 1);
    assert_eq!(recorded_pcs(&history), vec![2]);
}

#[test]
fn test_default_capacity() {
    assert_eq!(History::default().capacity(), 100);
}

#[test]
fn test_clear_discards_entries() {
    let mut history = History::new(4);
    history.record(entry(1));
    history.record(entry(2));
    history.clear();
    assert!(history.is_empty());
    assert_eq!(history.latest(), None);
}

#[test]
fn test_display_lists_oldest_first() {
    let mut history = History::new(8);
    history.record(crate::decode::decode(0x2000, 0x0001_0000, |_| 0x70));
    history.record(crate::decode::decode(0x2001, 0x0001_0000, |_| 0x70));
    assert_eq!(
        history.to_string(),
        "00010000 00002000| NOP\n00010000 00002001| NOP\n"
    );
}
