//! Pre-built Test Fixtures
//!
//! Fixed identifiers, dates and amounts so tests read the same way
//! everywhere and failures are reproducible.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use once_cell::sync::Lazy;
use rust_decimal_macros::dec;
use uuid::Uuid;

use core_kernel::{GroupId, Money, UserId};
use domain_billing::Participant;
use domain_loans::GroupMembership;

/// A small household used across the integration suites
#[derive(Debug, Clone)]
pub struct Household {
    pub alice: UserId,
    pub bob: UserId,
    pub carol: UserId,
    /// Bob and Carol share a room and are billed together
    pub room: GroupId,
}

impl Household {
    /// Alice on her own plus Bob and Carol's room, all weight 1
    pub fn participants(&self) -> Vec<Participant> {
        vec![
            Participant::user(self.alice),
            Participant::group(self.room, [self.bob, self.carol]),
        ]
    }

    /// Bob and Carol in the room, Alice outside any group
    pub fn membership(&self) -> GroupMembership {
        GroupMembership::new().with_group(self.room, [self.bob, self.carol])
    }

    /// Everyone as an individual participant
    pub fn individuals(&self) -> Vec<Participant> {
        vec![
            Participant::user(self.alice),
            Participant::user(self.bob),
            Participant::user(self.carol),
        ]
    }
}

pub static HOUSEHOLD: Lazy<Household> = Lazy::new(|| Household {
    alice: UserId::from_uuid(Uuid::from_u128(0xA11CE)),
    bob: UserId::from_uuid(Uuid::from_u128(0xB0B)),
    carol: UserId::from_uuid(Uuid::from_u128(0xCA201)),
    room: GroupId::from_uuid(Uuid::from_u128(0x600D)),
});

/// Fixture for Money test data
pub struct MoneyFixtures;

impl MoneyFixtures {
    pub fn ten() -> Money {
        Money::new(dec!(10.00))
    }

    pub fn hundred() -> Money {
        Money::new(dec!(100.00))
    }

    /// A typical monthly electricity bill
    pub fn electricity() -> Money {
        Money::new(dec!(84.37))
    }

    pub fn rent() -> Money {
        Money::new(dec!(1200.00))
    }
}

/// Fixture for billing periods and timestamps
pub struct DateFixtures;

impl DateFixtures {
    pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    pub fn january_start() -> NaiveDate {
        Self::date(2026, 1, 1)
    }

    pub fn january_end() -> NaiveDate {
        Self::date(2026, 1, 31)
    }

    pub fn february_start() -> NaiveDate {
        Self::date(2026, 2, 1)
    }

    pub fn february_end() -> NaiveDate {
        Self::date(2026, 2, 28)
    }

    /// Midday on the given day, for recorded_at and paid_at values
    pub fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).unwrap()
    }
}
