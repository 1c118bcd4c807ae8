//! Service-level tests over the in-memory store
//!
//! These exercise the billing and loan services end to end, including unit
//! of work rollback and concurrent writers, without needing PostgreSQL.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use core_kernel::{Capability, GroupId, Money, Quantity, RequestContext, RoleAuthorizer, UserId};
use domain_billing::{
    AllocationBasis, BillFilter, BillStatus, BillingError, BillingService, DeleteMode,
    NewConsumption, NewPayment, Participant, PaymentState, ReopenRequest, Subject,
};
use domain_loans::{GroupMembership, LoanError, LoanPaymentKind, LoanService, LoanStatus, NewLoanPayment};
use infra_db::MemoryStore;
use test_utils::{
    assert_allocated, assert_allocations_cover, assert_event_names, assert_payment_status,
    positive_money_strategy, weighted_subjects_strategy, DateFixtures, RecordingEventSink,
    TestBillBuilder, TestLoanBuilder, TestTemplateBuilder, HOUSEHOLD,
};

fn ctx() -> RequestContext {
    RequestContext::new(Duration::from_secs(5))
}

fn billing(store: &MemoryStore) -> (BillingService<MemoryStore>, RecordingEventSink) {
    let sink = RecordingEventSink::new();
    (BillingService::new(store.clone(), Arc::new(sink.clone())), sink)
}

fn loans(store: &MemoryStore) -> (LoanService<MemoryStore>, RecordingEventSink) {
    let sink = RecordingEventSink::new();
    (LoanService::new(store.clone(), Arc::new(sink.clone())), sink)
}

async fn seat_household(service: &BillingService<MemoryStore>) {
    for participant in HOUSEHOLD.participants() {
        service.set_participant(&ctx(), participant).await.unwrap();
    }
}

// ============================================================================
// Billing Flow Tests
// ============================================================================

mod billing_flow_tests {
    use super::*;

    #[tokio::test]
    async fn test_participant_split_covers_total() {
        let store = MemoryStore::new();
        let (service, events) = billing(&store);
        seat_household(&service).await;

        let bill = service
            .create_bill(&ctx(), TestBillBuilder::new().total(dec!(100.00)).build())
            .await
            .unwrap();
        let posted = service.post_bill(&ctx(), bill.id).await.unwrap();

        assert_eq!(posted.bill.status, BillStatus::Posted);
        assert_allocations_cover(&posted.bill, &posted.allocations);
        assert!(posted.allocations.iter().all(|a| a.basis == AllocationBasis::Participants));
        assert_allocated(&posted.allocations, HOUSEHOLD.alice, Money::new(dec!(50.00)));
        assert_allocated(&posted.allocations, HOUSEHOLD.room, Money::new(dec!(50.00)));
        assert_event_names(&events.events(), &["bill.created", "bill.posted"]);
    }

    #[tokio::test]
    async fn test_odd_cent_goes_to_one_subject() {
        let store = MemoryStore::new();
        let (service, _) = billing(&store);
        seat_household(&service).await;

        let bill = service
            .create_bill(&ctx(), TestBillBuilder::new().total(dec!(84.37)).build())
            .await
            .unwrap();
        let posted = service.post_bill(&ctx(), bill.id).await.unwrap();

        assert_allocations_cover(&posted.bill, &posted.allocations);
        let mut amounts: Vec<Money> = posted.allocations.iter().map(|a| a.allocated_amount).collect();
        amounts.sort();
        assert_eq!(amounts, vec![Money::new(dec!(42.18)), Money::new(dec!(42.19))]);
    }

    #[tokio::test]
    async fn test_consumption_split_and_group_payments() {
        let store = MemoryStore::new();
        let (service, _) = billing(&store);
        seat_household(&service).await;

        let bill = service
            .create_bill(&ctx(), TestBillBuilder::new().total(dec!(100.00)).build())
            .await
            .unwrap();
        service
            .record_consumption(&ctx(), NewConsumption::quantity(bill.id, HOUSEHOLD.alice, Quantity::new(dec!(100))))
            .await
            .unwrap();
        service
            .record_consumption(&ctx(), NewConsumption::quantity(bill.id, HOUSEHOLD.room, Quantity::new(dec!(300))))
            .await
            .unwrap();

        let preview = service.preview_allocation(&ctx(), bill.id).await.unwrap();
        assert_eq!(preview.basis, AllocationBasis::Consumption);

        let posted = service.post_bill(&ctx(), bill.id).await.unwrap();
        assert_allocated(&posted.allocations, HOUSEHOLD.alice, Money::new(dec!(25.00)));
        assert_allocated(&posted.allocations, HOUSEHOLD.room, Money::new(dec!(75.00)));

        for (payer, amount) in [
            (HOUSEHOLD.alice, dec!(25.00)),
            (HOUSEHOLD.bob, dec!(40.00)),
            (HOUSEHOLD.carol, dec!(35.00)),
        ] {
            service
                .record_payment(&ctx(), NewPayment::new(bill.id, payer, Money::new(amount)))
                .await
                .unwrap();
        }

        let status = service.payment_status(&ctx(), bill.id).await.unwrap();
        assert_payment_status(&status, Money::new(dec!(100.00)), Money::zero(), PaymentState::Paid);

        let by_subject = service.subject_payment_status(&ctx(), bill.id).await.unwrap();
        assert_eq!(by_subject.len(), 2);
        let room = by_subject
            .iter()
            .find(|s| s.subject == Subject::Group(HOUSEHOLD.room))
            .unwrap();
        assert_eq!(room.paid, Money::new(dec!(75.00)));
        assert_eq!(room.status, PaymentState::Paid);

        let bobs = service.payments_by_payer(&ctx(), HOUSEHOLD.bob).await.unwrap();
        assert_eq!(bobs.len(), 1);
    }

    #[tokio::test]
    async fn test_meter_readings_continue_across_bills() {
        let store = MemoryStore::new();
        let (service, _) = billing(&store);

        let january = service.create_bill(&ctx(), TestBillBuilder::new().build()).await.unwrap();
        let february = service
            .create_bill(
                &ctx(),
                TestBillBuilder::new()
                    .period(DateFixtures::february_start(), DateFixtures::february_end())
                    .build(),
            )
            .await
            .unwrap();

        let first = service
            .record_consumption(
                &ctx(),
                NewConsumption::meter_reading(january.id, HOUSEHOLD.alice, Quantity::new(dec!(1000)))
                    .at(DateFixtures::at(2026, 1, 31)),
            )
            .await
            .unwrap();
        assert_eq!(first.quantity, Quantity::new(dec!(1000)));

        let second = service
            .record_consumption(
                &ctx(),
                NewConsumption::meter_reading(february.id, HOUSEHOLD.alice, Quantity::new(dec!(1250)))
                    .at(DateFixtures::at(2026, 2, 28)),
            )
            .await
            .unwrap();
        assert_eq!(second.quantity, Quantity::new(dec!(250)));

        let backwards = service
            .record_consumption(
                &ctx(),
                NewConsumption::meter_reading(february.id, HOUSEHOLD.alice, Quantity::new(dec!(1200)))
                    .at(DateFixtures::at(2026, 3, 1)),
            )
            .await;
        assert!(matches!(backwards, Err(BillingError::Validation(_))));
    }

    #[tokio::test]
    async fn test_reopen_keeps_or_recomputes_allocations() {
        let store = MemoryStore::new();
        let (service, events) = billing(&store);
        seat_household(&service).await;

        let bill = service
            .create_bill(&ctx(), TestBillBuilder::new().total(dec!(100.00)).build())
            .await
            .unwrap();
        service
            .record_consumption(&ctx(), NewConsumption::quantity(bill.id, HOUSEHOLD.alice, Quantity::new(dec!(10))))
            .await
            .unwrap();
        let room_usage = service
            .record_consumption(&ctx(), NewConsumption::quantity(bill.id, HOUSEHOLD.room, Quantity::new(dec!(30))))
            .await
            .unwrap();
        service.post_bill(&ctx(), bill.id).await.unwrap();

        service.close_bill(&ctx(), bill.id).await.unwrap();
        let reopened = service
            .reopen_bill(&ctx(), bill.id, ReopenRequest::keep_allocations().with_reason("late reading"))
            .await
            .unwrap();
        assert_eq!(reopened.status, BillStatus::Posted);
        assert_eq!(reopened.reopen_reason.as_deref(), Some("late reading"));
        assert_eq!(service.allocations(&ctx(), bill.id).await.unwrap().len(), 2);

        service.invalidate_consumption(&ctx(), room_usage.id).await.unwrap();
        service.close_bill(&ctx(), bill.id).await.unwrap();
        service
            .reopen_bill(&ctx(), bill.id, ReopenRequest::recompute())
            .await
            .unwrap();

        let allocations = service.allocations(&ctx(), bill.id).await.unwrap();
        assert_eq!(allocations.len(), 1);
        assert_allocated(&allocations, HOUSEHOLD.alice, Money::new(dec!(100.00)));

        let consumptions = service.consumptions(&ctx(), bill.id).await.unwrap();
        assert_eq!(consumptions.iter().filter(|c| c.invalid).count(), 1);
        assert!(events.names().contains(&"consumption.invalidated"));
    }

    #[tokio::test]
    async fn test_lifecycle_guards() {
        let store = MemoryStore::new();
        let (service, _) = billing(&store);
        seat_household(&service).await;

        let bill = service.create_bill(&ctx(), TestBillBuilder::new().build()).await.unwrap();
        let early = service
            .record_payment(&ctx(), NewPayment::new(bill.id, HOUSEHOLD.alice, Money::new(dec!(1.00))))
            .await;
        assert!(matches!(early, Err(BillingError::InvalidStateTransition { .. })));

        service.post_bill(&ctx(), bill.id).await.unwrap();
        let again = service.post_bill(&ctx(), bill.id).await;
        assert!(matches!(again, Err(BillingError::InvalidStateTransition { .. })));

        let late = service
            .record_consumption(&ctx(), NewConsumption::quantity(bill.id, HOUSEHOLD.alice, Quantity::new(dec!(1))))
            .await;
        assert!(matches!(late, Err(BillingError::InvalidStateTransition { .. })));

        let standard = service.delete_bill(&ctx(), bill.id, DeleteMode::Standard).await;
        assert!(matches!(standard, Err(BillingError::InvalidStateTransition { .. })));

        service
            .delete_bill(&ctx(), bill.id, DeleteMode::AdministrativeOverride)
            .await
            .unwrap();
        let gone = service.get_bill(&ctx(), bill.id).await;
        assert!(matches!(gone, Err(BillingError::NotFound { .. })));
        assert!(service.allocations(&ctx(), bill.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_post_without_subjects_leaves_draft() {
        let store = MemoryStore::new();
        let (service, _) = billing(&store);

        let bill = service.create_bill(&ctx(), TestBillBuilder::new().build()).await.unwrap();
        let result = service.post_bill(&ctx(), bill.id).await;
        assert!(matches!(result, Err(BillingError::NoAllocationSubjects(id)) if id == bill.id));

        let reloaded = service.get_bill(&ctx(), bill.id).await.unwrap();
        assert_eq!(reloaded.status, BillStatus::Draft);
    }

    #[tokio::test]
    async fn test_deactivated_participant_not_allocated() {
        let store = MemoryStore::new();
        let (service, _) = billing(&store);
        for participant in HOUSEHOLD.individuals() {
            service.set_participant(&ctx(), participant).await.unwrap();
        }
        service
            .deactivate_participant(&ctx(), Subject::User(HOUSEHOLD.carol))
            .await
            .unwrap();

        let bill = service
            .create_bill(&ctx(), TestBillBuilder::new().total(dec!(10.00)).build())
            .await
            .unwrap();
        let posted = service.post_bill(&ctx(), bill.id).await.unwrap();
        assert_eq!(posted.allocations.len(), 2);
        assert!(posted.allocations.iter().all(|a| a.subject != Subject::User(HOUSEHOLD.carol)));

        let twice = service
            .deactivate_participant(&ctx(), Subject::User(HOUSEHOLD.carol))
            .await;
        assert!(matches!(twice, Err(BillingError::NotFound { .. })));
        assert_eq!(service.participants(&ctx()).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_participant_weight_beyond_storage_precision_rejected() {
        let store = MemoryStore::new();
        let (service, _) = billing(&store);

        let result = service
            .set_participant(&ctx(), Participant::user(HOUSEHOLD.alice).with_weight(dec!(1.23456)))
            .await;
        assert!(matches!(result, Err(BillingError::Validation(_))));
        assert!(service.participants(&ctx()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_user_sorts_before_group_with_same_id() {
        let store = MemoryStore::new();
        let (service, _) = billing(&store);
        let shared = Uuid::from_u128(0x5EED);
        let (user, group) = (UserId::from_uuid(shared), GroupId::from_uuid(shared));
        service
            .set_participant(&ctx(), Participant::group(group, [HOUSEHOLD.bob]))
            .await
            .unwrap();
        service.set_participant(&ctx(), Participant::user(user)).await.unwrap();

        let bill = service
            .create_bill(&ctx(), TestBillBuilder::new().total(dec!(10.00)).build())
            .await
            .unwrap();
        service.post_bill(&ctx(), bill.id).await.unwrap();

        let expected = vec![Subject::User(user), Subject::Group(group)];
        let allocated: Vec<Subject> = service
            .allocations(&ctx(), bill.id)
            .await
            .unwrap()
            .iter()
            .map(|a| a.subject)
            .collect();
        assert_eq!(allocated, expected);
        let seated: Vec<Subject> = service
            .participants(&ctx())
            .await
            .unwrap()
            .iter()
            .map(|p| p.subject)
            .collect();
        assert_eq!(seated, expected);
    }

    #[tokio::test]
    async fn test_list_bills_filters_and_orders() {
        let store = MemoryStore::new();
        let (service, _) = billing(&store);

        let january = service.create_bill(&ctx(), TestBillBuilder::new().build()).await.unwrap();
        let february = service
            .create_bill(
                &ctx(),
                TestBillBuilder::new()
                    .other("Cleaning")
                    .period(DateFixtures::february_start(), DateFixtures::february_end())
                    .build(),
            )
            .await
            .unwrap();

        let all = service.list_bills(&ctx(), &BillFilter::new()).await.unwrap();
        assert_eq!(all.iter().map(|b| b.id).collect::<Vec<_>>(), vec![february.id, january.id]);

        let in_january = service
            .list_bills(
                &ctx(),
                &BillFilter::new().overlapping(DateFixtures::january_start(), DateFixtures::january_end()),
            )
            .await
            .unwrap();
        assert_eq!(in_january.len(), 1);
        assert_eq!(in_january[0].id, january.id);
    }
}

// ============================================================================
// Recurring Tests
// ============================================================================

mod recurring_tests {
    use super::*;

    #[tokio::test]
    async fn test_generation_catches_up_once() {
        let store = MemoryStore::new();
        let (service, events) = billing(&store);

        let template = service
            .create_template(&ctx(), TestTemplateBuilder::new().build())
            .await
            .unwrap();

        let today = DateFixtures::date(2026, 3, 15);
        let generated = service.generate_due_bills(&ctx(), today).await.unwrap();
        assert_eq!(generated.len(), 3);
        assert!(generated.iter().all(|b| b.recurring_template_id == Some(template.id)));
        assert!(generated.iter().all(|b| b.status == BillStatus::Draft));

        let again = service.generate_due_bills(&ctx(), today).await.unwrap();
        assert!(again.is_empty());

        let templates = service.templates(&ctx()).await.unwrap();
        assert_eq!(templates[0].next_due_date, DateFixtures::date(2026, 4, 1));

        let from_template = service
            .list_bills(&ctx(), &BillFilter::new().from_template(template.id))
            .await
            .unwrap();
        assert_eq!(from_template.len(), 3);
        assert_eq!(events.names().iter().filter(|n| **n == "bill.created").count(), 3);
    }

    #[tokio::test]
    async fn test_inactive_template_generates_nothing() {
        let store = MemoryStore::new();
        let (service, _) = billing(&store);

        let template = service
            .create_template(&ctx(), TestTemplateBuilder::new().build())
            .await
            .unwrap();
        service.deactivate_template(&ctx(), template.id).await.unwrap();

        let generated = service
            .generate_due_bills(&ctx(), DateFixtures::date(2026, 6, 1))
            .await
            .unwrap();
        assert!(generated.is_empty());
    }
}

// ============================================================================
// Loan Flow Tests
// ============================================================================

mod loan_flow_tests {
    use super::*;

    #[tokio::test]
    async fn test_repay_until_settled() {
        let store = MemoryStore::new();
        let (service, events) = loans(&store);

        let created = service.create_loan(&ctx(), TestLoanBuilder::new().build()).await.unwrap();
        let loan_id = created.loan.loan.id;

        let first = service
            .record_loan_payment(&ctx(), NewLoanPayment::new(loan_id, Money::new(dec!(30.00))))
            .await
            .unwrap();
        assert_eq!(first.loan.outstanding, Money::new(dec!(70.00)));

        let over = service
            .record_loan_payment(&ctx(), NewLoanPayment::new(loan_id, Money::new(dec!(80.00))))
            .await;
        assert!(matches!(
            over,
            Err(LoanError::LoanOverpayment { outstanding, .. }) if outstanding == Money::new(dec!(70.00))
        ));

        let last = service
            .record_loan_payment(&ctx(), NewLoanPayment::new(loan_id, Money::new(dec!(70.00))))
            .await
            .unwrap();
        assert_eq!(last.loan.loan.status, LoanStatus::Settled);

        let stored = service.get_loan(&ctx(), loan_id).await.unwrap();
        assert!(stored.outstanding.is_zero());
        assert_eq!(service.loan_payments(&ctx(), loan_id).await.unwrap().len(), 2);
        assert_event_names(
            &events.events(),
            &["loan.created", "loan.payment_recorded", "loan.payment_recorded", "loan.settled"],
        );
    }

    #[tokio::test]
    async fn test_compensate_opposing_loans() {
        let store = MemoryStore::new();
        let (service, _) = loans(&store);

        let ab = service
            .create_loan(&ctx(), TestLoanBuilder::new().principal(dec!(50.00)).build())
            .await
            .unwrap();
        let ba = service
            .create_loan(&ctx(), TestLoanBuilder::new().principal(dec!(30.00)).reversed().build())
            .await
            .unwrap();

        let compensation = service
            .compensate(&ctx(), ab.loan.loan.id, ba.loan.loan.id)
            .await
            .unwrap();
        assert_eq!(compensation.offset, Money::new(dec!(30.00)));
        assert_eq!(compensation.loan_b.loan.status, LoanStatus::Settled);

        let owed = service.get_balance(&ctx(), HOUSEHOLD.bob, HOUSEHOLD.alice).await.unwrap();
        assert_eq!(owed, Money::new(dec!(20.00)));
    }

    #[tokio::test]
    async fn test_auto_offset_nets_new_loan() {
        let store = MemoryStore::new();
        let (service, _) = loans(&store);
        let service = service.with_auto_offset(true);

        let older = service
            .create_loan(&ctx(), TestLoanBuilder::new().principal(dec!(30.00)).reversed().build())
            .await
            .unwrap();
        assert!(older.offsets.is_empty());

        let newer = service
            .create_loan(&ctx(), TestLoanBuilder::new().principal(dec!(50.00)).build())
            .await
            .unwrap();
        assert_eq!(newer.offsets.len(), 1);
        assert_eq!(newer.loan.outstanding, Money::new(dec!(20.00)));

        let older = service.get_loan(&ctx(), older.loan.loan.id).await.unwrap();
        assert_eq!(older.loan.status, LoanStatus::Settled);
    }

    #[tokio::test]
    async fn test_settle_up_across_household() {
        let store = MemoryStore::new();
        let (service, _) = loans(&store);

        for loan in [
            TestLoanBuilder::new().principal(dec!(40.00)).build(),
            TestLoanBuilder::new()
                .lender(HOUSEHOLD.bob)
                .borrower(HOUSEHOLD.carol)
                .principal(dec!(15.00))
                .build(),
        ] {
            service.create_loan(&ctx(), loan).await.unwrap();
        }

        let summary = service.get_all_balances(&ctx()).await.unwrap();
        assert_eq!(summary.balances.len(), 2);
        let bob = summary.position(HOUSEHOLD.bob).unwrap();
        assert_eq!(bob.owes, Money::new(dec!(40.00)));
        assert_eq!(bob.owed, Money::new(dec!(15.00)));
        assert_eq!(bob.net, Money::new(dec!(-25.00)));
    }

    #[tokio::test]
    async fn test_delete_needs_override() {
        let store = MemoryStore::new();
        let (service, _) = loans(&store);
        let created = service.create_loan(&ctx(), TestLoanBuilder::new().build()).await.unwrap();

        let member_only = LoanService::new(store.clone(), Arc::new(RecordingEventSink::new())).with_authorizer(
            RoleAuthorizer::new().grant(HOUSEHOLD.alice, [Capability::ManageLoans]),
        );
        let denied = member_only
            .delete_loan(&ctx().with_actor(HOUSEHOLD.alice), created.loan.loan.id)
            .await;
        assert!(matches!(denied, Err(LoanError::Unauthorized(_))));

        service.delete_loan(&ctx(), created.loan.loan.id).await.unwrap();
        let gone = service.get_loan(&ctx(), created.loan.loan.id).await;
        assert!(matches!(gone, Err(LoanError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_group_compensation_nets_chain_through_outsider() {
        let store = MemoryStore::new();
        let (service, events) = loans(&store);

        // Bob owes Alice 50, Alice owes Carol 30; Bob and Carol share the room
        let inbound = service.create_loan(&ctx(), TestLoanBuilder::new().principal(dec!(50.00)).build()).await.unwrap();
        let outbound = service
            .create_loan(
                &ctx(),
                TestLoanBuilder::new()
                    .lender(HOUSEHOLD.carol)
                    .borrower(HOUSEHOLD.alice)
                    .principal(dec!(30.00))
                    .build(),
            )
            .await
            .unwrap();
        let unrelated = service
            .create_loan(&ctx(), TestLoanBuilder::new().lender(HOUSEHOLD.bob).borrower(HOUSEHOLD.carol).build())
            .await
            .unwrap();

        let result = service.compensate_groups(&ctx(), &HOUSEHOLD.membership()).await.unwrap();
        assert_eq!(result.compensations.len(), 1);
        assert_eq!(result.total, Money::new(dec!(30.00)));

        let inbound = service.get_loan(&ctx(), inbound.loan.loan.id).await.unwrap();
        assert_eq!(inbound.outstanding, Money::new(dec!(20.00)));
        assert_eq!(inbound.loan.status, LoanStatus::Open);
        let outbound = service.get_loan(&ctx(), outbound.loan.loan.id).await.unwrap();
        assert_eq!(outbound.loan.status, LoanStatus::Settled);
        let unrelated = service.get_loan(&ctx(), unrelated.loan.loan.id).await.unwrap();
        assert_eq!(unrelated.outstanding, Money::new(dec!(100.00)));

        let payments = service.loan_payments(&ctx(), outbound.loan.id).await.unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].kind, LoanPaymentKind::Compensation);

        assert!(events.names().contains(&"loans.compensated"));
        assert!(events.names().contains(&"loan.settled"));

        let again = service.compensate_groups(&ctx(), &HOUSEHOLD.membership()).await.unwrap();
        assert!(again.compensations.is_empty());
        assert!(again.total.is_zero());
    }

    #[tokio::test]
    async fn test_group_compensation_without_groups_is_a_no_op() {
        let store = MemoryStore::new();
        let (service, events) = loans(&store);
        service.create_loan(&ctx(), TestLoanBuilder::new().build()).await.unwrap();

        let result = service.compensate_groups(&ctx(), &GroupMembership::new()).await.unwrap();
        assert!(result.compensations.is_empty());
        assert_eq!(events.names(), vec!["loan.created"]);
    }
}

// ============================================================================
// Concurrency Tests
// ============================================================================

mod concurrency_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_posts_allocate_once() {
        let store = MemoryStore::new();
        let (service, _) = billing(&store);
        seat_household(&service).await;
        let bill_id = service.create_bill(&ctx(), TestBillBuilder::new().build()).await.unwrap().id;

        let service = Arc::new(service);
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let service = Arc::clone(&service);
                tokio::spawn(async move { service.post_bill(&ctx(), bill_id).await })
            })
            .collect();

        let mut posted = 0;
        let mut rejected = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => posted += 1,
                Err(BillingError::InvalidStateTransition { .. }) => rejected += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!((posted, rejected), (1, 1));

        let allocations = service.allocations(&ctx(), bill_id).await.unwrap();
        assert_eq!(allocations.len(), HOUSEHOLD.participants().len());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_repayments_cannot_overpay() {
        let store = MemoryStore::new();
        let (service, _) = loans(&store);
        let created = service.create_loan(&ctx(), TestLoanBuilder::new().build()).await.unwrap();
        let loan_id = created.loan.loan.id;

        let service = Arc::new(service);
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let service = Arc::clone(&service);
                tokio::spawn(async move {
                    service
                        .record_loan_payment(&ctx(), NewLoanPayment::new(loan_id, Money::new(dec!(60.00))))
                        .await
                })
            })
            .collect();

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }
        assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|o| matches!(o, Err(LoanError::LoanOverpayment { .. }))));

        let stored = service.get_loan(&ctx(), loan_id).await.unwrap();
        assert_eq!(stored.paid, Money::new(dec!(60.00)));
    }
}

// ============================================================================
// Rollback Tests
// ============================================================================

mod rollback_tests {
    use super::*;

    #[tokio::test]
    async fn test_timeout_persists_nothing() {
        let store = MemoryStore::new().with_commit_latency(Duration::from_millis(500));
        let (service, events) = billing(&store);

        let hurried = RequestContext::new(Duration::from_millis(20));
        let result = service.create_bill(&hurried, TestBillBuilder::new().build()).await;
        assert!(matches!(result, Err(BillingError::Timeout { .. })));

        let bills = service.list_bills(&ctx(), &BillFilter::new()).await.unwrap();
        assert!(bills.is_empty());
        assert!(events.events().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_persists_nothing() {
        let store = MemoryStore::new().with_commit_latency(Duration::from_millis(500));
        let (service, _) = loans(&store);

        let token = CancellationToken::new();
        let cancelled = ctx().with_cancellation(token.clone());
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let result = service.create_loan(&cancelled, TestLoanBuilder::new().build()).await;
        assert!(matches!(result, Err(LoanError::Cancelled(_))));

        let summary = service.get_all_balances(&ctx()).await.unwrap();
        assert!(summary.balances.is_empty());
    }

    #[tokio::test]
    async fn test_failed_unit_of_work_rolls_back() {
        let store = MemoryStore::new();
        let (service, _) = billing(&store);

        // no participants, so posting fails after the bill row is locked
        let bill = service.create_bill(&ctx(), TestBillBuilder::new().build()).await.unwrap();
        assert!(service.post_bill(&ctx(), bill.id).await.is_err());
        assert_eq!(service.get_bill(&ctx(), bill.id).await.unwrap().status, BillStatus::Draft);
    }
}

// ============================================================================
// Property Tests
// ============================================================================

fn participant_for(subject: Subject, weight: rust_decimal::Decimal) -> Participant {
    let participant = match subject {
        Subject::User(id) => Participant::user(id),
        Subject::Group(id) => Participant::group(id, [HOUSEHOLD.bob]),
    };
    participant.with_weight(weight)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_posted_allocations_cover_total(
        subjects in weighted_subjects_strategy(),
        total in positive_money_strategy(),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (posted, stored) = runtime.block_on(async {
            let store = MemoryStore::new();
            let (service, _) = billing(&store);
            for weighted in &subjects {
                service
                    .set_participant(&ctx(), participant_for(weighted.subject, weighted.weight))
                    .await
                    .unwrap();
            }
            let bill = service
                .create_bill(&ctx(), TestBillBuilder::new().total(total.amount()).build())
                .await
                .unwrap();
            let posted = service.post_bill(&ctx(), bill.id).await.unwrap();
            let stored = service.allocations(&ctx(), bill.id).await.unwrap();
            (posted, stored)
        });

        let sum: Money = stored.iter().map(|a| a.allocated_amount).sum();
        prop_assert_eq!(sum, posted.bill.total_amount);
        prop_assert_eq!(stored.len(), subjects.len());
        prop_assert!(stored.iter().all(|a| !a.allocated_amount.is_negative()));
    }
}
