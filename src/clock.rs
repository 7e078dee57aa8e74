// uscript: featherweight scripting language.
//
// Copyright (C) 2026  Brandon Lewis
//
// This program is free software: you can redistribute it and/or
// modify it under the terms of the GNU Lesser General Public License
// as published by the Free Software Foundation, either version 3 of
// the License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public
// License along with this program.  If not, see
// <https://www.gnu.org/licenses/>.

use std::time::Instant;

// Wrapper around somewhat obnoxious system time api.
pub struct Clock {
    instant: Instant,
}

lazy_static! {
    // Epoch for the `clock` native: every reading is relative to the
    // moment the process first touched the clock.
    pub static ref PROCESS_CLOCK: Clock = Clock::new();
}

impl Clock {
    pub fn new() -> Clock {
        Clock {
            instant: Instant::now(),
        }
    }

    // Return elapsed time as a floating point value in seconds.
    pub fn seconds(&self) -> f64 {
        let e = self.instant.elapsed();
        (e.as_secs() as f64) + (1e-9 * e.subsec_nanos() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_monotonic() {
        let a = PROCESS_CLOCK.seconds();
        let b = PROCESS_CLOCK.seconds();
        assert!(b >= a);
        assert!(a >= 0.0);
    }
}
