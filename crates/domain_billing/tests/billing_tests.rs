//! Integration tests for domain_billing's pure domain logic

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use core_kernel::{round_half_even, BillId, GroupId, Money, Quantity, UserId};

use domain_billing::{
    plan_allocation, split_exact, subject_statuses, Allocation, AllocationBasis, Bill,
    BillFilter, BillStatus, BillType, BillUpdate, BillingError, Consumption, DeleteMode,
    Frequency, NewBill, NewConsumption, NewPayment, NewTemplate, Participant, Payment,
    PaymentState, PaymentStatus, RecurringTemplate, Subject, WeightedSubject,
};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn user(n: u128) -> UserId {
    UserId::from_uuid(Uuid::from_u128(n))
}

fn draft(total: Decimal) -> Bill {
    Bill::create(NewBill::new(
        BillType::Electricity,
        date(2026, 1, 1),
        date(2026, 1, 31),
        Money::new(total),
    ))
    .unwrap()
}

fn usage(bill: &Bill, who: UserId, quantity: Decimal) -> Consumption {
    Consumption::record(
        NewConsumption::quantity(bill.id, who, Quantity::new(quantity)),
        None,
    )
    .unwrap()
}

fn amounts(allocations: &[Allocation]) -> Vec<Decimal> {
    allocations.iter().map(|a| a.allocated_amount.amount()).collect()
}

// ============================================================================
// Rounding Tests
// ============================================================================

mod rounding_tests {
    use super::*;

    #[test]
    fn test_half_even_boundaries() {
        assert_eq!(round_half_even(dec!(2.345), 2), dec!(2.34));
        assert_eq!(round_half_even(dec!(2.355), 2), dec!(2.36));
        assert_eq!(round_half_even(dec!(2.365), 2), dec!(2.36));
        assert_eq!(round_half_even(dec!(-2.345), 2), dec!(-2.34));
    }

    #[test]
    fn test_money_canonicalized_on_construction() {
        assert_eq!(Money::new(dec!(0.125)).amount(), dec!(0.12));
        assert_eq!(Money::new(dec!(0.135)).amount(), dec!(0.14));
        assert_eq!(Quantity::new(dec!(1.0005)).value(), dec!(1.000));
    }
}

// ============================================================================
// Bill Lifecycle Tests
// ============================================================================

mod lifecycle_tests {
    use super::*;

    #[test]
    fn test_full_lifecycle() {
        let mut bill = draft(dec!(90.00));
        assert_eq!(bill.status, BillStatus::Draft);

        bill.post().unwrap();
        assert_eq!(bill.status, BillStatus::Posted);

        bill.close().unwrap();
        assert_eq!(bill.status, BillStatus::Closed);

        bill.reopen(Some("meter misread".to_string())).unwrap();
        assert_eq!(bill.status, BillStatus::Posted);
        assert!(bill.reopened_at.is_some());
        assert_eq!(bill.reopen_reason.as_deref(), Some("meter misread"));
    }

    #[test]
    fn test_transitions_from_wrong_state_fail() {
        let mut bill = draft(dec!(10.00));
        assert!(bill.close().unwrap_err().is_invalid_transition());
        assert!(bill.reopen(None).unwrap_err().is_invalid_transition());

        bill.post().unwrap();
        assert!(bill.post().unwrap_err().is_invalid_transition());
        assert_eq!(bill.status, BillStatus::Posted);
    }

    #[test]
    fn test_negative_total_rejected() {
        let result = Bill::create(NewBill::new(
            BillType::Water,
            date(2026, 1, 1),
            date(2026, 1, 31),
            Money::new(dec!(-1.00)),
        ));
        assert!(matches!(result, Err(BillingError::Validation(_))));
    }

    #[test]
    fn test_inverted_period_rejected() {
        let result = Bill::create(NewBill::new(
            BillType::Water,
            date(2026, 2, 1),
            date(2026, 1, 31),
            Money::new(dec!(10.00)),
        ));
        assert!(matches!(result, Err(BillingError::Validation(_))));
    }

    #[test]
    fn test_update_only_while_draft() {
        let mut bill = draft(dec!(10.00));
        let update = BillUpdate {
            total_amount: Some(Money::new(dec!(12.50))),
            notes: Some("corrected".to_string()),
            ..BillUpdate::default()
        };
        bill.apply_update(update.clone()).unwrap();
        assert_eq!(bill.total_amount, Money::new(dec!(12.50)));
        assert_eq!(bill.notes.as_deref(), Some("corrected"));

        bill.post().unwrap();
        assert!(bill.apply_update(update).unwrap_err().is_invalid_transition());
    }

    #[test]
    fn test_delete_requires_override_after_posting() {
        let mut bill = draft(dec!(10.00));
        assert!(bill.ensure_deletable(DeleteMode::Standard).is_ok());

        bill.post().unwrap();
        assert!(bill.ensure_deletable(DeleteMode::Standard).is_err());
        assert!(bill.ensure_deletable(DeleteMode::AdministrativeOverride).is_ok());
    }

    #[test]
    fn test_payments_only_after_posting() {
        let mut bill = draft(dec!(10.00));
        assert!(!bill.accepts_payments());
        bill.post().unwrap();
        assert!(bill.accepts_payments());
        bill.close().unwrap();
        assert!(bill.accepts_payments());
    }
}

// ============================================================================
// Allocation Tests
// ============================================================================

mod allocation_tests {
    use super::*;

    #[test]
    fn test_ten_split_three_ways() {
        let bill = draft(dec!(10.00));
        let participants: Vec<_> = (1..=3).map(|n| Participant::user(user(n))).collect();

        let plan = plan_allocation(&bill, &[], &participants).unwrap();
        assert_eq!(plan.basis, AllocationBasis::Participants);
        assert_eq!(plan.total(), bill.total_amount);

        let allocations = plan.into_allocations(bill.updated_at);
        assert_eq!(amounts(&allocations), vec![dec!(3.34), dec!(3.33), dec!(3.33)]);
    }

    #[test]
    fn test_consumption_weighted_split() {
        let bill = draft(dec!(100.00));
        let consumptions = vec![
            usage(&bill, user(1), dec!(1)),
            usage(&bill, user(2), dec!(2)),
            usage(&bill, user(3), dec!(3)),
        ];
        let participants: Vec<_> = (1..=4).map(|n| Participant::user(user(n))).collect();

        let plan = plan_allocation(&bill, &consumptions, &participants).unwrap();
        assert_eq!(plan.basis, AllocationBasis::Consumption);

        let allocations = plan.into_allocations(bill.updated_at);
        assert_eq!(amounts(&allocations), vec![dec!(16.67), dec!(33.33), dec!(50.00)]);
    }

    #[test]
    fn test_invalid_consumption_excluded() {
        let bill = draft(dec!(60.00));
        let mut misread = usage(&bill, user(1), dec!(1000));
        misread.invalidate().unwrap();
        let consumptions = vec![misread, usage(&bill, user(1), dec!(10)), usage(&bill, user(2), dec!(20))];

        let plan = plan_allocation(&bill, &consumptions, &[]).unwrap();
        let allocations = plan.into_allocations(bill.updated_at);
        assert_eq!(amounts(&allocations), vec![dec!(20.00), dec!(40.00)]);
    }

    #[test]
    fn test_all_consumption_invalid_falls_back_to_participants() {
        let bill = draft(dec!(20.00));
        let mut only = usage(&bill, user(1), dec!(5));
        only.invalidate().unwrap();
        let participants = vec![Participant::user(user(1)), Participant::user(user(2))];

        let plan = plan_allocation(&bill, &[only], &participants).unwrap();
        assert_eq!(plan.basis, AllocationBasis::Participants);
        assert_eq!(plan.lines.len(), 2);
    }

    #[test]
    fn test_weighted_participants() {
        let bill = draft(dec!(90.00));
        let participants = vec![
            Participant::user(user(1)).with_weight(dec!(2)),
            Participant::group(GroupId::from_uuid(Uuid::from_u128(2)), [user(3), user(4)]),
            Participant::user(user(5)).deactivated(),
        ];

        let plan = plan_allocation(&bill, &[], &participants).unwrap();
        let allocations = plan.into_allocations(bill.updated_at);
        assert_eq!(allocations.len(), 2);
        assert_eq!(amounts(&allocations), vec![dec!(60.00), dec!(30.00)]);
    }

    #[test]
    fn test_no_subjects() {
        let bill = draft(dec!(10.00));
        let inactive = vec![Participant::user(user(1)).deactivated()];
        let result = plan_allocation(&bill, &[], &inactive);
        assert!(matches!(result, Err(BillingError::NoAllocationSubjects(id)) if id == bill.id));
    }

    #[test]
    fn test_zero_total_gives_zero_shares() {
        let bill = draft(dec!(0.00));
        let participants: Vec<_> = (1..=3).map(|n| Participant::user(user(n))).collect();
        let plan = plan_allocation(&bill, &[], &participants).unwrap();
        assert!(plan.lines.iter().all(|line| line.amount.is_zero()));
    }

    #[test]
    fn test_single_subject_takes_everything() {
        let bill = draft(dec!(33.33));
        let plan = plan_allocation(&bill, &[usage(&bill, user(9), dec!(0.001))], &[]).unwrap();
        assert_eq!(plan.lines.len(), 1);
        assert_eq!(plan.lines[0].amount, bill.total_amount);
    }

    #[test]
    fn test_recomputation_is_deterministic() {
        let bill = draft(dec!(100.00));
        let participants: Vec<_> = (1..=7).map(|n| Participant::user(user(n))).collect();

        let first = plan_allocation(&bill, &[], &participants).unwrap();
        let mut reversed = participants.clone();
        reversed.reverse();
        let second = plan_allocation(&bill, &[], &reversed).unwrap();
        assert_eq!(first.lines, second.lines);
    }

    #[test]
    fn test_split_exact_negative_remainder_taken_in_subject_order() {
        let subjects: Vec<_> = (1..=3)
            .map(|n| WeightedSubject {
                subject: Subject::User(user(n)),
                weight: Decimal::ONE,
            })
            .collect();
        let lines = split_exact(Money::new(dec!(0.02)), &subjects).unwrap();
        let shares: Vec<_> = lines.iter().map(|l| l.amount.amount()).collect();
        assert_eq!(shares, vec![dec!(0.00), dec!(0.01), dec!(0.01)]);
    }
}

// ============================================================================
// Consumption Tests
// ============================================================================

mod consumption_tests {
    use super::*;

    #[test]
    fn test_meter_reading_uses_previous_value() {
        let bill = draft(dec!(10.00));
        let reading = Consumption::record(
            NewConsumption::meter_reading(bill.id, user(1), Quantity::new(dec!(1520.400))),
            Some(Quantity::new(dec!(1400.150))),
        )
        .unwrap();
        assert_eq!(reading.quantity.value(), dec!(120.250));
        assert_eq!(reading.meter_value, Some(Quantity::new(dec!(1520.400))));
    }

    #[test]
    fn test_invalidate_twice_fails() {
        let bill = draft(dec!(10.00));
        let mut consumption = usage(&bill, user(1), dec!(3));
        consumption.invalidate().unwrap();
        assert!(consumption.invalidate().unwrap_err().is_invalid_transition());
    }

    #[test]
    fn test_missing_quantity_and_meter_rejected() {
        let new = NewConsumption {
            bill_id: BillId::new(),
            subject: Subject::User(user(1)),
            quantity: None,
            meter_value: None,
            recorded_at: None,
        };
        assert!(matches!(Consumption::record(new, None), Err(BillingError::Validation(_))));
    }
}

// ============================================================================
// Payment Tests
// ============================================================================

mod payment_tests {
    use super::*;

    #[test]
    fn test_overpayment_is_surfaced() {
        let bill = draft(dec!(50.00));
        let payments = vec![
            Payment::record(NewPayment::new(bill.id, user(1), Money::new(dec!(30.00)))).unwrap(),
            Payment::record(NewPayment::new(bill.id, user(2), Money::new(dec!(25.00)))).unwrap(),
        ];
        let status = PaymentStatus::derive(&bill, &payments);
        assert_eq!(status.total_paid, Money::new(dec!(55.00)));
        assert_eq!(status.remaining, Money::new(dec!(-5.00)));
        assert_eq!(status.status, PaymentState::Overpaid);
    }

    #[test]
    fn test_no_payments_is_underpaid() {
        let bill = draft(dec!(50.00));
        let status = PaymentStatus::derive(&bill, &[]);
        assert_eq!(status.remaining, bill.total_amount);
        assert_eq!(status.status, PaymentState::Underpaid);
    }

    #[test]
    fn test_group_member_payments_count_for_group() {
        let mut bill = draft(dec!(90.00));
        let group = GroupId::from_uuid(Uuid::from_u128(10));
        let participants = vec![
            Participant::user(user(1)),
            Participant::group(group, [user(2), user(3)]).with_weight(dec!(2)),
        ];
        let allocations = plan_allocation(&bill, &[], &participants)
            .unwrap()
            .into_allocations(bill.updated_at);
        bill.post().unwrap();

        let payments = vec![
            Payment::record(NewPayment::new(bill.id, user(2), Money::new(dec!(40.00)))).unwrap(),
            Payment::record(NewPayment::new(bill.id, user(3), Money::new(dec!(20.00)))).unwrap(),
            Payment::record(NewPayment::new(bill.id, user(1), Money::new(dec!(10.00)))).unwrap(),
        ];

        let statuses = subject_statuses(&allocations, &payments, &participants);
        let group_status = statuses
            .iter()
            .find(|s| s.subject == Subject::Group(group))
            .unwrap();
        assert_eq!(group_status.allocated, Money::new(dec!(60.00)));
        assert_eq!(group_status.paid, Money::new(dec!(60.00)));
        assert_eq!(group_status.status, PaymentState::Paid);

        let user_status = statuses
            .iter()
            .find(|s| s.subject == Subject::User(user(1)))
            .unwrap();
        assert_eq!(user_status.remaining, Money::new(dec!(20.00)));
        assert_eq!(user_status.status, PaymentState::Underpaid);
    }

    #[test]
    fn test_payment_without_allocation_listed() {
        let bill = draft(dec!(10.00));
        let stranger = user(77);
        let payments =
            vec![Payment::record(NewPayment::new(bill.id, stranger, Money::new(dec!(5.00)))).unwrap()];
        let statuses = subject_statuses(&[], &payments, &[]);
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].subject, Subject::User(stranger));
        assert_eq!(statuses[0].status, PaymentState::Overpaid);
    }
}

// ============================================================================
// Recurring Template Tests
// ============================================================================

mod recurring_tests {
    use super::*;

    fn template(frequency: Frequency, day: u32, start: NaiveDate) -> RecurringTemplate {
        RecurringTemplate::create(NewTemplate {
            name: "Internet".to_string(),
            bill_type: BillType::Internet,
            custom_label: None,
            amount: Money::new(dec!(39.99)),
            frequency,
            day_of_month: day,
            start_date: start,
            notes: Some("fibre".to_string()),
        })
        .unwrap()
    }

    #[test]
    fn test_draft_bill_from_template() {
        let t = template(Frequency::Monthly, 15, date(2026, 3, 1));
        assert_eq!(t.next_due_date, date(2026, 3, 15));

        let bill = Bill::create(t.draft_bill().unwrap()).unwrap();
        assert_eq!(bill.status, BillStatus::Draft);
        assert_eq!(bill.period_start, date(2026, 2, 15));
        assert_eq!(bill.period_end, date(2026, 3, 15));
        assert_eq!(bill.payment_deadline, Some(date(2026, 3, 15)));
        assert_eq!(bill.recurring_template_id, Some(t.id));
        assert_eq!(bill.total_amount, t.amount);
    }

    #[test]
    fn test_advance_and_due() {
        let mut t = template(Frequency::Quarterly, 31, date(2026, 1, 1));
        assert_eq!(t.next_due_date, date(2026, 1, 31));
        assert!(t.is_due(date(2026, 1, 31)));
        assert!(!t.is_due(date(2026, 1, 30)));

        t.advance().unwrap();
        assert_eq!(t.next_due_date, date(2026, 4, 30));
        t.advance().unwrap();
        assert_eq!(t.next_due_date, date(2026, 7, 31));
    }

    #[test]
    fn test_invalid_day_rejected() {
        let result = RecurringTemplate::create(NewTemplate {
            name: "Rent".to_string(),
            bill_type: BillType::Rent,
            custom_label: None,
            amount: Money::new(dec!(800.00)),
            frequency: Frequency::Monthly,
            day_of_month: 32,
            start_date: date(2026, 1, 1),
            notes: None,
        });
        assert!(matches!(result, Err(BillingError::Validation(_))));
    }
}

// ============================================================================
// Filter Tests
// ============================================================================

mod filter_tests {
    use super::*;

    #[test]
    fn test_filter_by_status_and_period_overlap() {
        let mut posted = draft(dec!(10.00));
        posted.post().unwrap();
        let drafted = draft(dec!(10.00));

        let filter = BillFilter::new()
            .with_status(BillStatus::Posted)
            .overlapping(date(2026, 1, 15), date(2026, 2, 15));
        assert!(filter.matches(&posted));
        assert!(!filter.matches(&drafted));

        let later = BillFilter::new().overlapping(date(2026, 2, 1), date(2026, 2, 28));
        assert!(!later.matches(&posted));
    }

    #[test]
    fn test_filter_by_type() {
        let bill = draft(dec!(10.00));
        assert!(BillFilter::new().with_type(BillType::Electricity).matches(&bill));
        assert!(!BillFilter::new().with_type(BillType::Gas).matches(&bill));
    }
}

// ============================================================================
// Serialization Tests
// ============================================================================

mod serde_tests {
    use super::*;

    #[test]
    fn test_subject_wire_format() {
        let subject = Subject::User(user(1));
        let json = serde_json::to_value(subject).unwrap();
        assert_eq!(json["subject_type"], "user");
        assert_eq!(json["subject_id"], "00000000-0000-0000-0000-000000000001");
    }

    #[test]
    fn test_bill_status_wire_format() {
        assert_eq!(serde_json::to_string(&BillStatus::Posted).unwrap(), "\"posted\"");
        assert_eq!(serde_json::to_string(&BillType::Electricity).unwrap(), "\"electricity\"");
    }
}
