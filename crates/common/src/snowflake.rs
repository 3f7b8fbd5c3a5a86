use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

const EPOCH_MS: i64 = 1_672_531_200_000; // 2023-01-01T00:00:00Z
const MACHINE_BITS: u8 = 10;
const SEQUENCE_BITS: u8 = 12;
const MAX_SEQUENCE: i64 = (1 << SEQUENCE_BITS) - 1;

/// Snowflake ID source: 41 bits of milliseconds since a fixed epoch, 10 bits
/// of machine id, 12 bits of per-millisecond sequence. IDs are unique per
/// process and monotonically increasing.
#[derive(Debug)]
pub struct IdGenerator {
    machine_id: i64,
    state: Mutex<(i64, i64)>, // (last_ms, sequence)
}

impl IdGenerator {
    pub fn new(machine_id: i64) -> Self {
        IdGenerator {
            machine_id: machine_id & ((1 << MACHINE_BITS) - 1),
            state: Mutex::new((0, 0)),
        }
    }

    pub fn next(&self) -> i64 {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut now = now_ms();
        if now < state.0 {
            now = state.0; // clock went backwards, reuse the last timestamp
        }
        if now == state.0 {
            state.1 = (state.1 + 1) & MAX_SEQUENCE;
            if state.1 == 0 {
                now += 1; // sequence exhausted within this millisecond
            }
        } else {
            state.1 = 0;
        }
        state.0 = now;
        ((now - EPOCH_MS) << (MACHINE_BITS + SEQUENCE_BITS))
            | (self.machine_id << SEQUENCE_BITS)
            | state.1
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_increasing() {
        let gen = IdGenerator::new(1);
        let mut prev = 0;
        for _ in 0..10_000 {
            let id = gen.next();
            assert!(id > prev);
            prev = id;
        }
    }

    #[test]
    fn machine_id_is_masked_into_the_id() {
        let gen = IdGenerator::new(5);
        let id = gen.next();
        assert_eq!((id >> SEQUENCE_BITS) & ((1 << MACHINE_BITS) - 1), 5);
    }
}
