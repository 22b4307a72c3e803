//! # clock
//!
//! Clock synchronisation with the microcontroller. The host sends `ck <t0>`
//! stamped with its local monotonic milliseconds; the robot answers
//! `ck <t0> <t_recv> <t_send>` in its own clock domain. The round trip gives
//! the NTP-style offset estimate used to map every later remote timestamp
//! onto the local simulation clock.

use crate::wire::ClockReply;

/// The four timestamps of one completed sync exchange. `originate` and
/// `destination` are local; `receive` and `transmit` remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSyncEvent {
    pub originate: u64,
    pub receive: u64,
    pub transmit: u64,
    pub destination: u64,
}

impl ClockSyncEvent {
    pub fn from_reply(reply: &ClockReply, destination: u64) -> Self {
        Self {
            originate: reply.originate,
            receive: reply.receive,
            transmit: reply.transmit,
            destination,
        }
    }

    /// Estimated `remote − local` offset.
    pub fn offset(&self) -> i64 {
        let up = self.receive as i64 - self.originate as i64;
        let down = self.transmit as i64 - self.destination as i64;
        (up + down) / 2
    }

    pub fn round_trip(&self) -> i64 {
        (self.destination as i64 - self.originate as i64)
            - (self.transmit as i64 - self.receive as i64)
    }
}

/// Bijection between the remote microcontroller clock and the local
/// simulation clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClockConverter {
    /// `remote − local`, milliseconds.
    offset: i64,
}

impl ClockConverter {
    pub fn identity() -> Self {
        Self { offset: 0 }
    }

    pub fn from_event(event: &ClockSyncEvent) -> Self {
        Self {
            offset: event.offset(),
        }
    }

    pub fn from_remote(&self, remote: u64) -> u64 {
        (remote as i64 - self.offset).max(0) as u64
    }

    pub fn to_remote(&self, local: u64) -> u64 {
        (local as i64 + self.offset).max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_reply_maps_remote_onto_local() {
        // ck 1000 → ck 1000 1500 1510, answered promptly.
        let event = ClockSyncEvent::from_reply(
            &ClockReply {
                originate: 1000,
                receive: 1500,
                transmit: 1510,
            },
            1010,
        );
        let converter = ClockConverter::from_event(&event);
        let local = converter.from_remote(1500);
        assert!(
            (local as i64 - 1000).abs() <= 10,
            "from_remote(1500) = {local}"
        );
    }

    #[test]
    fn round_trip_is_identity_within_tolerance() {
        for offset in [-40_000i64, -7, 0, 3, 12_345, 9_999_999] {
            let event = ClockSyncEvent {
                originate: 100_000,
                receive: (100_000 + offset) as u64,
                transmit: (100_001 + offset) as u64,
                destination: 100_001,
            };
            let converter = ClockConverter::from_event(&event);
            for t in [100_000u64, 250_000, 1_000_000] {
                let there = converter.to_remote(t);
                let back = converter.from_remote(there);
                assert!(
                    (back as i64 - t as i64).abs() <= 1,
                    "offset {offset}: {t} → {there} → {back}"
                );
            }
        }
    }

    #[test]
    fn round_trip_measures_network_delay() {
        let event = ClockSyncEvent {
            originate: 1000,
            receive: 51_500,
            transmit: 51_505,
            destination: 1020,
        };
        assert_eq!(event.round_trip(), 15);
    }
}
