use std::time::Instant;

/// Network time: whole seconds since the UNIX epoch plus a sub-second
/// `parts` counter at 256 parts per second (not decimal milliseconds).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Time {
    pub seconds: u32,
    pub parts: u8,
}

impl Time {
    pub const ZERO: Time = Time {
        seconds: 0,
        parts: 0,
    };

    pub fn to_millis(self) -> u64 {
        self.seconds as u64 * 256 + self.parts as u64
    }

    pub fn from_millis(millis: u64) -> Time {
        Time {
            seconds: (millis / 256) as u32,
            parts: (millis % 256) as u8,
        }
    }

    /// Saturating difference `self - earlier`, never underflowing.
    pub fn diff(self, earlier: Time) -> Time {
        let a = self.to_millis();
        let b = earlier.to_millis();
        Time::from_millis(a.saturating_sub(b))
    }

    /// Real wall-clock milliseconds, used only to combine with
    /// [`std::time::Instant`] elapsed time in [`TimeSync`].
    fn to_wall_millis(self) -> u64 {
        self.seconds as u64 * 1000 + (self.parts as u64 * 1000) / 256
    }

    fn from_wall_millis(millis: u64) -> Time {
        Time {
            seconds: (millis / 1000) as u32,
            parts: (((millis % 1000) * 256) / 1000) as u8,
        }
    }

    /// Formats as `"{seconds}.{thousandths}s"`, matching the original
    /// firmware's `parts * 1000 / 256` conversion (e.g. parts=128 -> "0.500s").
    pub fn format_rtt(self) -> String {
        let thousandths = (self.parts as u32 * 1000) / 256;
        format!("{}.{}s", self.seconds, thousandths)
    }

    /// The 5-byte wire layout: seconds (little-endian u32) then parts.
    pub fn to_bytes(self) -> [u8; 5] {
        let mut out = [0u8; 5];
        out[0..4].copy_from_slice(&self.seconds.to_le_bytes());
        out[4] = self.parts;
        out
    }

    pub fn from_bytes(bytes: [u8; 5]) -> Time {
        Time {
            seconds: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            parts: bytes[4],
        }
    }
}

/// Tracks the last time-sync point and derives the current network time
/// from elapsed monotonic time since that sync, mirroring `lownet_get_time`.
pub struct TimeSync {
    sync_time: Time,
    sync_stamp: Instant,
}

impl TimeSync {
    pub fn new() -> Self {
        TimeSync {
            sync_time: Time::ZERO,
            sync_stamp: Instant::now(),
        }
    }

    pub fn set(&mut self, time: Time) {
        self.sync_time = time;
        self.sync_stamp = Instant::now();
    }

    pub fn get(&self) -> Time {
        if self.sync_time.seconds == 0 {
            return Time::ZERO;
        }
        let elapsed_ms = self.sync_stamp.elapsed().as_millis() as u64;
        let base_ms = self.sync_time.to_wall_millis();
        Time::from_wall_millis(base_ms + elapsed_ms)
    }
}

impl Default for TimeSync {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtt_formatting_matches_firmware_example() {
        let t = Time {
            seconds: 0,
            parts: 128,
        };
        assert_eq!(t.format_rtt(), "0.500s");
    }

    #[test]
    fn millis_roundtrip_is_exact() {
        let t = Time {
            seconds: 12,
            parts: 64,
        };
        assert_eq!(Time::from_millis(t.to_millis()), t);
    }

    #[test]
    fn time_sync_reflects_elapsed_monotonic_time() {
        let mut sync = TimeSync::new();
        sync.set(Time {
            seconds: 1000,
            parts: 0,
        });
        let now = sync.get();
        assert_eq!(now.seconds, 1000);
    }

    #[test]
    fn unsynced_time_is_zero() {
        let sync = TimeSync::new();
        assert_eq!(sync.get(), Time::ZERO);
    }

    #[test]
    fn wire_bytes_roundtrip() {
        let t = Time {
            seconds: 0x01020304,
            parts: 0xAB,
        };
        assert_eq!(Time::from_bytes(t.to_bytes()), t);
    }

    #[test]
    fn ordering_is_lexicographic() {
        let a = Time {
            seconds: 5,
            parts: 255,
        };
        let b = Time {
            seconds: 6,
            parts: 0,
        };
        assert!(a < b);
    }
}
