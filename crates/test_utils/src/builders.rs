//! Test Data Builders
//!
//! Builders that fill in sensible defaults so a test only spells out the
//! fields it cares about.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use core_kernel::{Money, Quantity, UserId};
use domain_billing::{BillType, Frequency, NewBill, NewTemplate};
use domain_loans::NewLoan;

use crate::fixtures::{DateFixtures, MoneyFixtures, HOUSEHOLD};

/// Builder for [`NewBill`] values
#[derive(Debug, Clone)]
pub struct TestBillBuilder {
    bill_type: BillType,
    custom_label: Option<String>,
    period: (NaiveDate, NaiveDate),
    total: Money,
    units: Option<Quantity>,
    deadline: Option<NaiveDate>,
}

impl Default for TestBillBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestBillBuilder {
    /// An electricity bill for January 2026
    pub fn new() -> Self {
        Self {
            bill_type: BillType::Electricity,
            custom_label: None,
            period: (DateFixtures::january_start(), DateFixtures::january_end()),
            total: MoneyFixtures::electricity(),
            units: None,
            deadline: None,
        }
    }

    pub fn bill_type(mut self, bill_type: BillType) -> Self {
        self.bill_type = bill_type;
        self
    }

    /// An `other` bill with a custom label
    pub fn other(mut self, label: impl Into<String>) -> Self {
        self.bill_type = BillType::Other;
        self.custom_label = Some(label.into());
        self
    }

    pub fn period(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.period = (start, end);
        self
    }

    pub fn total(mut self, amount: Decimal) -> Self {
        self.total = Money::new(amount);
        self
    }

    pub fn units(mut self, units: Decimal) -> Self {
        self.units = Some(Quantity::new(units));
        self
    }

    pub fn deadline(mut self, deadline: NaiveDate) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn build(self) -> NewBill {
        let mut bill = NewBill::new(self.bill_type, self.period.0, self.period.1, self.total);
        bill.custom_label = self.custom_label;
        bill.total_units = self.units;
        bill.payment_deadline = self.deadline;
        bill
    }
}

/// Builder for [`NewLoan`] values
#[derive(Debug, Clone)]
pub struct TestLoanBuilder {
    lender: UserId,
    borrower: UserId,
    principal: Money,
    note: Option<String>,
}

impl Default for TestLoanBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestLoanBuilder {
    /// Alice lends Bob 100.00
    pub fn new() -> Self {
        Self {
            lender: HOUSEHOLD.alice,
            borrower: HOUSEHOLD.bob,
            principal: MoneyFixtures::hundred(),
            note: None,
        }
    }

    pub fn lender(mut self, lender: UserId) -> Self {
        self.lender = lender;
        self
    }

    pub fn borrower(mut self, borrower: UserId) -> Self {
        self.borrower = borrower;
        self
    }

    /// Swaps lender and borrower
    pub fn reversed(mut self) -> Self {
        std::mem::swap(&mut self.lender, &mut self.borrower);
        self
    }

    pub fn principal(mut self, amount: Decimal) -> Self {
        self.principal = Money::new(amount);
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn build(self) -> NewLoan {
        let loan = NewLoan::new(self.lender, self.borrower, self.principal);
        match self.note {
            Some(note) => loan.with_note(note),
            None => loan,
        }
    }
}

/// Builder for [`NewTemplate`] values
#[derive(Debug, Clone)]
pub struct TestTemplateBuilder {
    template: NewTemplate,
}

impl Default for TestTemplateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestTemplateBuilder {
    /// Monthly rent due on the 1st, starting January 2026
    pub fn new() -> Self {
        Self {
            template: NewTemplate {
                name: "Rent".to_string(),
                bill_type: BillType::Rent,
                custom_label: None,
                amount: MoneyFixtures::rent(),
                frequency: Frequency::Monthly,
                day_of_month: 1,
                start_date: DateFixtures::january_start(),
                notes: None,
            },
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.template.name = name.into();
        self
    }

    pub fn amount(mut self, amount: Decimal) -> Self {
        self.template.amount = Money::new(amount);
        self
    }

    pub fn frequency(mut self, frequency: Frequency) -> Self {
        self.template.frequency = frequency;
        self
    }

    pub fn day_of_month(mut self, day: u32) -> Self {
        self.template.day_of_month = day;
        self
    }

    pub fn starting(mut self, start: NaiveDate) -> Self {
        self.template.start_date = start;
        self
    }

    pub fn build(self) -> NewTemplate {
        self.template
    }
}
