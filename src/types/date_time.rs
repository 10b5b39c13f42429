// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the implementation of `DateTime`.

use std::{
    fmt,
    io::{Read, Write},
    ops::{Add, Sub},
};

use chrono::{Duration, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::types::encoding::*;

const NANOS_PER_TICK: i64 = 100;
const TICKS_PER_SECOND: i64 = 10_000_000;

pub type DateTimeUtc = chrono::DateTime<Utc>;

/// A date/time value. On the wire this is the number of 100 nanosecond ticks since
/// 1601-01-01 UTC. A value of 0 is the null date, `i64::MAX` is "end of time".
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy)]
pub struct DateTime {
    date_time: DateTimeUtc,
}

impl Serialize for DateTime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.checked_ticks().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DateTime {
    fn deserialize<D>(deserializer: D) -> Result<DateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(DateTime::from(i64::deserialize(deserializer)?))
    }
}

impl BinaryEncoder<DateTime> for DateTime {
    fn byte_len(&self) -> usize {
        8
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        self.checked_ticks().encode(stream)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        Ok(DateTime::from(i64::decode(stream, decoding_options)?))
    }
}

impl Default for DateTime {
    fn default() -> Self {
        DateTime::null()
    }
}

impl Add<Duration> for DateTime {
    type Output = Self;

    fn add(self, duration: Duration) -> Self {
        DateTime::from(self.date_time + duration)
    }
}

impl Sub<DateTime> for DateTime {
    type Output = Duration;

    fn sub(self, other: Self) -> Duration {
        self.date_time - other.date_time
    }
}

impl Sub<Duration> for DateTime {
    type Output = Self;

    fn sub(self, duration: Duration) -> Self {
        DateTime::from(self.date_time - duration)
    }
}

impl From<DateTimeUtc> for DateTime {
    fn from(date_time: DateTimeUtc) -> Self {
        // Truncate to tick granularity so a value survives a round trip through the wire
        DateTime::from(DateTime { date_time }.checked_ticks())
    }
}

impl From<i64> for DateTime {
    fn from(ticks: i64) -> Self {
        if ticks == i64::MAX {
            return Self::endtimes();
        }
        let ticks = ticks.max(0);
        let secs = ticks / TICKS_PER_SECOND;
        let nanos = (ticks % TICKS_PER_SECOND) * NANOS_PER_TICK;
        DateTime {
            date_time: Self::epoch_chrono() + Duration::seconds(secs) + Duration::nanoseconds(nanos),
        }
    }
}

impl From<DateTime> for DateTimeUtc {
    fn from(value: DateTime) -> Self {
        value.date_time
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.date_time.to_rfc3339())
    }
}

impl DateTime {
    /// Constructs from the current time
    pub fn now() -> DateTime {
        DateTime::from(Utc::now())
    }

    /// The null date, i.e. 1601-01-01
    pub fn null() -> DateTime {
        DateTime {
            date_time: Self::epoch_chrono(),
        }
    }

    /// Tests if the date is the null date
    pub fn is_null(&self) -> bool {
        self.checked_ticks() == 0
    }

    /// The latest representable time, 9999-12-31
    pub fn endtimes() -> DateTime {
        DateTime {
            date_time: Utc
                .with_ymd_and_hms(9999, 12, 31, 23, 59, 59)
                .single()
                .unwrap_or_else(Utc::now),
        }
    }

    /// Returns the number of ticks since the epoch, clamped to the range the wire allows.
    pub fn checked_ticks(&self) -> i64 {
        if self.date_time >= Self::endtimes().date_time {
            return i64::MAX;
        }
        let duration = self.date_time - Self::epoch_chrono();
        let secs = duration.num_seconds();
        if secs < 0 {
            return 0;
        }
        let nanos = (duration - Duration::seconds(secs))
            .num_nanoseconds()
            .unwrap_or(0);
        secs.saturating_mul(TICKS_PER_SECOND)
            .saturating_add(nanos / NANOS_PER_TICK)
    }

    pub fn as_chrono(&self) -> DateTimeUtc {
        self.date_time
    }

    fn epoch_chrono() -> DateTimeUtc {
        Utc.with_ymd_and_hms(1601, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_default()
    }
}
