//! Allocation subjects and the participant roster

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use core_kernel::{GroupId, UserId};

use crate::error::BillingError;

/// Decimal places a participant weight may carry (`NUMERIC(10, 4)`)
pub const WEIGHT_SCALE: u32 = 4;

/// Largest storable participant weight
pub const MAX_WEIGHT: Decimal = Decimal::from_parts(1_410_065_407, 2, 0, false, 4);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    User,
    Group,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::User => "user",
            SubjectKind::Group => "group",
        }
    }
}

impl FromStr for SubjectKind {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(SubjectKind::User),
            "group" => Ok(SubjectKind::Group),
            other => Err(BillingError::validation(format!("unknown subject type '{}'", other))),
        }
    }
}

/// The entity that owes a share of a bill
///
/// Subjects order by UUID first and kind second. This is the tie-break
/// order the allocation engine uses when two subjects have equal rounding
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "subject_type", content = "subject_id", rename_all = "snake_case")]
pub enum Subject {
    User(UserId),
    Group(GroupId),
}

impl Subject {
    pub fn kind(&self) -> SubjectKind {
        match self {
            Subject::User(_) => SubjectKind::User,
            Subject::Group(_) => SubjectKind::Group,
        }
    }

    pub fn uuid(&self) -> Uuid {
        match self {
            Subject::User(id) => *id.as_uuid(),
            Subject::Group(id) => *id.as_uuid(),
        }
    }

    /// Rebuilds a subject from its stored `(subject_type, subject_id)` pair
    pub fn from_parts(kind: SubjectKind, id: Uuid) -> Self {
        match kind {
            SubjectKind::User => Subject::User(UserId::from_uuid(id)),
            SubjectKind::Group => Subject::Group(GroupId::from_uuid(id)),
        }
    }
}

impl Ord for Subject {
    fn cmp(&self, other: &Self) -> Ordering {
        self.uuid()
            .cmp(&other.uuid())
            .then_with(|| self.kind().cmp(&other.kind()))
    }
}

impl PartialOrd for Subject {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::User(id) => write!(f, "{}", id),
            Subject::Group(id) => write!(f, "{}", id),
        }
    }
}

impl From<UserId> for Subject {
    fn from(id: UserId) -> Self {
        Subject::User(id)
    }
}

impl From<GroupId> for Subject {
    fn from(id: GroupId) -> Self {
        Subject::Group(id)
    }
}

/// A configured bill participant
///
/// Participants receive shares when a bill has no usable consumption
/// readings. A weight of 1 for everyone is a plain equal split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub subject: Subject,
    pub weight: Decimal,
    /// Users whose payments count toward a group subject
    pub members: Vec<UserId>,
    pub active: bool,
}

impl Participant {
    pub fn user(id: UserId) -> Self {
        Self {
            subject: Subject::User(id),
            weight: Decimal::ONE,
            members: Vec::new(),
            active: true,
        }
    }

    pub fn group(id: GroupId, members: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            subject: Subject::Group(id),
            weight: Decimal::ONE,
            members: members.into_iter().collect(),
            active: true,
        }
    }

    pub fn with_weight(mut self, weight: Decimal) -> Self {
        self.weight = weight;
        self
    }

    pub fn deactivated(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn validate(&self) -> Result<(), BillingError> {
        if self.weight <= Decimal::ZERO {
            return Err(BillingError::validation(format!(
                "participant {} must have a positive weight, got {}",
                self.subject, self.weight
            )));
        }
        if self.weight.normalize().scale() > WEIGHT_SCALE {
            return Err(BillingError::validation(format!(
                "participant {} weight {} has more than {} decimal places",
                self.subject, self.weight, WEIGHT_SCALE
            )));
        }
        if self.weight > MAX_WEIGHT {
            return Err(BillingError::validation(format!(
                "participant {} weight {} exceeds {}",
                self.subject, self.weight, MAX_WEIGHT
            )));
        }
        if matches!(self.subject, Subject::User(_)) && !self.members.is_empty() {
            return Err(BillingError::validation("only group participants can list members"));
        }
        Ok(())
    }

    /// Returns true if a payment by `payer` counts toward this participant
    pub fn covers(&self, payer: UserId) -> bool {
        match self.subject {
            Subject::User(id) => id == payer,
            Subject::Group(_) => self.members.contains(&payer),
        }
    }
}

/// Resolves which subject a payer's payments are credited to
///
/// Members of a group participant pay on behalf of the group; anyone else
/// pays as themselves.
pub fn subject_for_payer(participants: &[Participant], payer: UserId) -> Subject {
    participants
        .iter()
        .find(|p| matches!(p.subject, Subject::Group(_)) && p.covers(payer))
        .map(|p| p.subject)
        .unwrap_or(Subject::User(payer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_subject_orders_by_uuid_then_kind() {
        let low = Uuid::from_u128(1);
        let high = Uuid::from_u128(2);
        let user_low = Subject::from_parts(SubjectKind::User, low);
        let group_low = Subject::from_parts(SubjectKind::Group, low);
        let user_high = Subject::from_parts(SubjectKind::User, high);

        assert!(user_low < group_low);
        assert!(group_low < user_high);
    }

    #[test]
    fn test_participant_weight_must_be_positive() {
        let p = Participant::user(UserId::new()).with_weight(dec!(0));
        assert!(p.validate().is_err());
        assert!(Participant::user(UserId::new()).validate().is_ok());
    }

    #[test]
    fn test_participant_weight_fits_storage_precision() {
        let user = UserId::new();
        assert!(Participant::user(user).with_weight(dec!(1.23456)).validate().is_err());
        assert!(Participant::user(user).with_weight(dec!(0.00001)).validate().is_err());
        assert!(Participant::user(user).with_weight(dec!(1000000)).validate().is_err());

        assert!(Participant::user(user).with_weight(dec!(1.2345)).validate().is_ok());
        assert!(Participant::user(user).with_weight(dec!(2.50000)).validate().is_ok());
        assert!(Participant::user(user).with_weight(MAX_WEIGHT).validate().is_ok());
    }

    #[test]
    fn test_payer_resolves_to_group() {
        let member = UserId::new();
        let group = GroupId::new();
        let participants = vec![Participant::group(group, [member])];

        assert_eq!(subject_for_payer(&participants, member), Subject::Group(group));
        let outsider = UserId::new();
        assert_eq!(subject_for_payer(&participants, outsider), Subject::User(outsider));
    }

    #[test]
    fn test_subject_serde_shape() {
        let id = UserId::new();
        let json = serde_json::to_value(Subject::User(id)).unwrap();
        assert_eq!(json["subject_type"], "user");
    }
}
