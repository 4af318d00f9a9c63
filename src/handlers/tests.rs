//! Scenario tests for handlers
//!
//! Each test drives the handlers end to end against the in-memory store.

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    use crate::domain::{
        AcademicSession, DiscountKind, DiscountMode, DiscountPolicy, FeeRecord, FeeStatus, FeeType,
        LedgerError, Money, Period, Student, TenantContext,
    };
    use crate::handlers::{
        AddChargeCommand, ApplyDiscountCommand, BatchOptions, CollectPaymentsCommand,
        CollectionResult, CreateChargeCommand, FeeGenerationHandler, GenerateFeesCommand,
        LedgerQueryHandler, PaymentHandler, PaymentIntent, PromoteStudentsCommand, PromotionEntry,
        PromotionHandler, RecordAdjustmentHandler, SaveSessionCommand, SessionHandler,
        WaiveCommand,
    };
    use crate::store::{InMemoryLedgerStore, LedgerStore};

    // =========================================================================
    // Fixture
    // =========================================================================

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn money(v: i64) -> Money {
        Money::from_major(v)
    }

    fn period(label: &str) -> Period {
        label.parse().unwrap()
    }

    struct Fixture {
        memory: Arc<InMemoryLedgerStore>,
        store: Arc<dyn LedgerStore>,
        ctx: TenantContext,
        session: AcademicSession,
    }

    impl Fixture {
        async fn new() -> Self {
            let memory = Arc::new(InMemoryLedgerStore::new());
            let store: Arc<dyn LedgerStore> = memory.clone();
            let tenant_id = Uuid::new_v4();
            let session = AcademicSession::new(tenant_id, "2024-25", date(2024, 4, 1), date(2025, 3, 31)).current();
            store.save_session(&session).await.unwrap();

            Self {
                memory,
                store,
                ctx: TenantContext::new(tenant_id).with_actor(Uuid::new_v4()),
                session,
            }
        }

        async fn enroll(&self, name: &str, class_id: &str, section_id: &str, fee: i64) -> Student {
            self.enroll_with(name, class_id, section_id, fee, |_| {}).await
        }

        async fn enroll_with(
            &self,
            name: &str,
            class_id: &str,
            section_id: &str,
            fee: i64,
            customize: impl FnOnce(&mut Student),
        ) -> Student {
            let mut student = Student::new(
                self.ctx.tenant_id,
                name,
                self.session.id,
                class_id,
                Some(section_id.to_string()),
                money(fee),
            );
            customize(&mut student);
            self.store.save_student(&student).await.unwrap();
            self.store.get_student(student.id).await.unwrap().unwrap()
        }

        async fn set_fee(&self, student: &Student, fee: i64) {
            let mut updated = self.store.get_student(student.id).await.unwrap().unwrap();
            updated.monthly_fee = money(fee);
            self.store.save_student(&updated).await.unwrap();
        }

        async fn generate(&self, class_id: &str, label: &str) -> crate::handlers::GenerationResult {
            FeeGenerationHandler::new(self.store.clone())
                .execute(GenerateFeesCommand::new(class_id, label), &self.ctx, BatchOptions::new())
                .await
                .unwrap()
        }

        async fn pay(&self, student: &Student, label: &str, amount: &str) -> CollectionResult {
            PaymentHandler::new(self.store.clone())
                .execute(
                    CollectPaymentsCommand::new(vec![PaymentIntent::new(student.id, label, amount)]),
                    &self.ctx,
                    BatchOptions::new(),
                )
                .await
                .unwrap()
        }

        async fn record(&self, student: &Student, label: &str) -> FeeRecord {
            self.store
                .find_record(self.ctx.tenant_id, student.id, self.session.id, period(label))
                .await
                .unwrap()
                .unwrap()
        }

        async fn records(&self, student: &Student) -> Vec<FeeRecord> {
            self.store
                .list_student_records(self.ctx.tenant_id, student.id, None)
                .await
                .unwrap()
        }

        async fn outstanding(&self, student: &Student) -> Money {
            self.records(student).await.iter().map(|r| r.balance).sum()
        }
    }

    // =========================================================================
    // Generation
    // =========================================================================

    #[tokio::test]
    async fn test_generation_is_idempotent() {
        let fx = Fixture::new().await;
        fx.enroll("Asha", "Class-5", "A", 5000).await;
        fx.enroll("Bilal", "Class-5", "A", 5000).await;
        fx.enroll("Chen", "Class-5", "B", 4500).await;
        fx.enroll("Dev", "Class-6", "A", 6000).await;

        let first = fx.generate("Class-5", "Jan-2025").await;
        assert_eq!(first.created, 3);
        assert_eq!(first.skipped, 0);
        assert!(first.failed.is_empty());

        let second = fx.generate("Class-5", "Jan-2025").await;
        assert_eq!(second.created, 0);
        assert_eq!(second.skipped, 3);
        assert_eq!(fx.memory.record_count().await, 3);
    }

    #[tokio::test]
    async fn test_period_spellings_resolve_to_one_record() {
        let fx = Fixture::new().await;
        let student = fx.enroll("Asha", "Class-5", "A", 5000).await;

        assert_eq!(fx.generate("Class-5", "Jan-2025").await.created, 1);
        for label in ["January 2025", "2025-01", "jan-2025"] {
            let run = fx.generate("Class-5", label).await;
            assert_eq!(run.created, 0, "{label} created a duplicate");
            assert_eq!(run.skipped, 1);
        }
        assert_eq!(fx.records(&student).await.len(), 1);
    }

    #[tokio::test]
    async fn test_section_filter_and_enrolment() {
        let fx = Fixture::new().await;
        fx.enroll("Asha", "Class-5", "A", 5000).await;
        fx.enroll("Chen", "Class-5", "B", 4500).await;
        fx.enroll_with("Old", "Class-5", "A", 5000, |s| s.is_active = false).await;
        fx.enroll_with("Elsewhere", "Class-5", "A", 5000, |s| s.current_session_id = Uuid::new_v4())
            .await;

        let result = FeeGenerationHandler::new(fx.store.clone())
            .execute(
                GenerateFeesCommand::new("Class-5", "Feb-2025").with_section("A"),
                &fx.ctx,
                BatchOptions::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.created, 1);
        assert_eq!(result.record_ids.len(), 1);
    }

    #[tokio::test]
    async fn test_generation_snapshots_arrears() {
        let fx = Fixture::new().await;
        let student = fx.enroll("Asha", "Class-5", "A", 2000).await;

        fx.generate("Class-5", "Jan-2025").await;
        fx.set_fee(&student, 5000).await;
        fx.generate("Class-5", "Feb-2025").await;

        let feb = fx.record(&student, "Feb-2025").await;
        assert_eq!(feb.arrears, money(2000));
        assert_eq!(feb.final_amount, money(5000));
        assert_eq!(feb.status, FeeStatus::Pending);
    }

    #[tokio::test]
    async fn test_policy_discount_applied_at_generation() {
        let fx = Fixture::new().await;
        let policy = DiscountPolicy::new(
            fx.ctx.tenant_id,
            "Staff ward",
            DiscountKind::StaffChild,
            DiscountMode::Percentage,
            dec!(50),
        );
        fx.store.save_policy(&policy).await.unwrap();
        let ward = fx.enroll_with("Asha", "Class-5", "A", 5000, |s| s.is_staff_child = true).await;
        let other = fx.enroll("Bilal", "Class-5", "A", 5000).await;

        fx.generate("Class-5", "Jan-2025").await;

        let discounted = fx.record(&ward, "Jan-2025").await;
        assert_eq!(discounted.gross_amount, money(5000));
        assert_eq!(discounted.discount.policy_discount, money(2500));
        assert_eq!(discounted.final_amount, money(2500));
        assert_eq!(discounted.discount.applied.len(), 1);

        let full = fx.record(&other, "Jan-2025").await;
        assert_eq!(full.final_amount, money(5000));
        assert!(full.discount.applied.is_empty());
    }

    #[tokio::test]
    async fn test_generation_deadline() {
        let fx = Fixture::new().await;
        fx.enroll("Asha", "Class-5", "A", 5000).await;
        fx.enroll("Bilal", "Class-5", "A", 5000).await;

        let expired = BatchOptions::new().with_deadline(tokio::time::Instant::now() - Duration::from_millis(1));
        let result = FeeGenerationHandler::new(fx.store.clone())
            .execute(GenerateFeesCommand::new("Class-5", "Jan-2025"), &fx.ctx, expired)
            .await
            .unwrap();

        assert_eq!(result.created, 0);
        assert_eq!(result.failed.len(), 2);
        assert!(result.failed.iter().all(|f| f.error_code == "deadline_exceeded"));
        assert_eq!(fx.memory.record_count().await, 0);
    }

    // =========================================================================
    // Payments
    // =========================================================================

    #[tokio::test]
    async fn test_generation_bills_tuition_into_standalone_charge() {
        let fx = Fixture::new().await;
        let student = fx.enroll("Asha", "Class-5", "A", 2000).await;
        let fund = RecordAdjustmentHandler::new(fx.store.clone())
            .create_charge(
                CreateChargeCommand::new(student.id, "Mar-2025", FeeType::Fund, "200"),
                &fx.ctx,
            )
            .await
            .unwrap();

        let run = fx.generate("Class-5", "Mar-2025").await;
        assert_eq!(run.created, 1);
        assert_eq!(run.skipped, 0);

        let mar = fx.record(&student, "Mar-2025").await;
        assert_eq!(mar.id, fund.id);
        assert_eq!(mar.fee_type, FeeType::Tuition);
        assert_eq!(mar.tuition_fee, money(2000));
        assert_eq!(mar.other_charges, money(200));
        assert_eq!(mar.final_amount, money(2200));
        assert_eq!(fx.records(&student).await.len(), 1);

        let again = fx.generate("Class-5", "Mar-2025").await;
        assert_eq!(again.created, 0);
        assert_eq!(again.skipped, 1);
        assert_eq!(fx.record(&student, "Mar-2025").await.final_amount, money(2200));
    }

    #[tokio::test]
    async fn test_partial_then_full_payment() {
        let fx = Fixture::new().await;
        let student = fx.enroll("Asha", "Class-5", "A", 5000).await;
        fx.generate("Class-5", "Jan-2025").await;

        let first = fx.pay(&student, "Jan-2025", "2000").await;
        assert_eq!(first.succeeded.len(), 1);
        let jan = fx.record(&student, "Jan-2025").await;
        assert_eq!(jan.status, FeeStatus::Partial);
        assert_eq!(jan.balance, money(3000));

        fx.pay(&student, "Jan-2025", "3000").await;
        let jan = fx.record(&student, "Jan-2025").await;
        assert_eq!(jan.status, FeeStatus::Paid);
        assert_eq!(jan.balance, Money::ZERO);
        assert_eq!(jan.paid_amount, money(5000));
        assert!(jan.invariants_hold());
    }

    #[tokio::test]
    async fn test_payment_retires_oldest_debt_first() {
        let fx = Fixture::new().await;
        let student = fx.enroll("Asha", "Class-5", "A", 2000).await;
        fx.generate("Class-5", "Jan-2025").await;
        fx.set_fee(&student, 5000).await;
        fx.generate("Class-5", "Feb-2025").await;
        let before = fx.outstanding(&student).await;

        let result = fx.pay(&student, "Feb-2025", "3000").await;

        let receipt = &result.succeeded[0];
        assert_eq!(receipt.allocations.len(), 2);
        assert_eq!(receipt.allocated(), money(3000));

        let jan = fx.record(&student, "Jan-2025").await;
        let feb = fx.record(&student, "Feb-2025").await;
        assert_eq!(jan.balance, Money::ZERO);
        assert_eq!(jan.status, FeeStatus::Paid);
        assert_eq!(feb.balance, money(4000));
        assert_eq!(feb.status, FeeStatus::Partial);
        assert_eq!(fx.outstanding(&student).await, before - money(3000));
    }

    #[tokio::test]
    async fn test_overpayment_rejected_without_mutation() {
        let fx = Fixture::new().await;
        let student = fx.enroll("Asha", "Class-5", "A", 2000).await;
        fx.generate("Class-5", "Jan-2025").await;
        fx.set_fee(&student, 5000).await;
        fx.generate("Class-5", "Feb-2025").await;
        let before = fx.records(&student).await;

        let result = fx.pay(&student, "Feb-2025", "7001").await;
        assert!(result.succeeded.is_empty());
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].error_code, "overpayment");
        assert_eq!(fx.records(&student).await, before);

        let exact = fx.pay(&student, "Feb-2025", "7000").await;
        assert_eq!(exact.succeeded.len(), 1);
        assert_eq!(fx.outstanding(&student).await, Money::ZERO);
    }

    #[tokio::test]
    async fn test_payment_batch_collects_per_item_failures() {
        let fx = Fixture::new().await;
        let asha = fx.enroll("Asha", "Class-5", "A", 5000).await;
        let bilal = fx.enroll("Bilal", "Class-5", "A", 5000).await;
        fx.generate("Class-5", "Jan-2025").await;

        let result = PaymentHandler::new(fx.store.clone())
            .execute(
                CollectPaymentsCommand::new(vec![
                    PaymentIntent::new(asha.id, "Jan-2025", "5000"),
                    PaymentIntent::new(bilal.id, "Jan-2025", "-10"),
                    PaymentIntent::new(Uuid::new_v4(), "Jan-2025", "100"),
                ]),
                &fx.ctx,
                BatchOptions::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.succeeded.len(), 1);
        let codes: Vec<&str> = result.failed.iter().map(|f| f.error_code).collect();
        assert_eq!(codes, vec!["validation_error", "not_found"]);
        assert_eq!(fx.record(&bilal, "Jan-2025").await.paid_amount, Money::ZERO);
    }

    #[tokio::test]
    async fn test_payment_without_obligation_creates_placeholder() {
        let fx = Fixture::new().await;
        let student = fx.enroll("Asha", "Class-5", "A", 2000).await;
        fx.generate("Class-5", "Jan-2025").await;

        let result = fx.pay(&student, "Mar-2025", "1000").await;
        assert_eq!(result.succeeded.len(), 1);

        let placeholder = fx.record(&student, "Mar-2025").await;
        assert!(placeholder.is_placeholder);
        assert_eq!(placeholder.final_amount, Money::ZERO);
        assert_eq!(fx.record(&student, "Jan-2025").await.balance, money(1000));

        // A later generation run fills the placeholder in place
        let run = fx.generate("Class-5", "Mar-2025").await;
        assert_eq!(run.created, 1);
        let filled = fx.record(&student, "Mar-2025").await;
        assert_eq!(filled.id, placeholder.id);
        assert!(!filled.is_placeholder);
        assert_eq!(filled.final_amount, money(2000));
        assert_eq!(filled.arrears, money(1000));
        assert_eq!(fx.records(&student).await.len(), 2);
    }

    #[tokio::test]
    async fn test_receipts_are_listed() {
        let fx = Fixture::new().await;
        let student = fx.enroll("Asha", "Class-5", "A", 5000).await;
        fx.generate("Class-5", "Jan-2025").await;
        fx.pay(&student, "Jan-2025", "1000").await;
        fx.pay(&student, "Jan-2025", "1500").await;

        let receipts = LedgerQueryHandler::new(fx.store.clone())
            .get_payments(student.id, &fx.ctx)
            .await
            .unwrap();

        assert_eq!(receipts.len(), 2);
        let total: Money = receipts.iter().map(|r| r.amount).sum();
        assert_eq!(total, money(2500));
        assert!(receipts.iter().all(|r| r.allocated() == r.amount));
    }

    #[tokio::test]
    async fn test_stale_write_loses_to_payment() {
        let fx = Fixture::new().await;
        let student = fx.enroll("Asha", "Class-5", "A", 5000).await;
        fx.generate("Class-5", "Jan-2025").await;

        let mut stale = fx.record(&student, "Jan-2025").await;
        fx.pay(&student, "Jan-2025", "2000").await;

        stale.add_charge(money(100));
        let err = fx.store.update_record(&stale).await.unwrap_err();
        assert!(err.is_version_conflict());

        let jan = fx.record(&student, "Jan-2025").await;
        assert_eq!(jan.paid_amount, money(2000));
        assert_eq!(jan.balance, money(3000));
    }

    // =========================================================================
    // Scope and locks
    // =========================================================================

    #[tokio::test]
    async fn test_other_tenant_is_rejected() {
        let fx = Fixture::new().await;
        let student = fx.enroll("Asha", "Class-5", "A", 5000).await;
        fx.generate("Class-5", "Jan-2025").await;
        let record = fx.record(&student, "Jan-2025").await;

        let intruder = TenantContext::new(Uuid::new_v4());
        let foreign_session =
            AcademicSession::new(intruder.tenant_id, "2024-25", date(2024, 4, 1), date(2025, 3, 31)).current();
        fx.store.save_session(&foreign_session).await.unwrap();

        let result = PaymentHandler::new(fx.store.clone())
            .execute(
                CollectPaymentsCommand::new(vec![PaymentIntent::new(student.id, "Jan-2025", "100")]),
                &intruder,
                BatchOptions::new(),
            )
            .await
            .unwrap();
        assert_eq!(result.failed[0].error_code, "tenant_scope");

        let err = RecordAdjustmentHandler::new(fx.store.clone())
            .waive(WaiveCommand::new(record.id, "hardship"), &intruder)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::TenantScope { .. }));

        // Pinning another tenant's session is no better
        let pinned = intruder.clone().with_session(fx.session.id);
        let err = FeeGenerationHandler::new(fx.store.clone())
            .execute(GenerateFeesCommand::new("Class-5", "Feb-2025"), &pinned, BatchOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::TenantScope { .. }));

        assert_eq!(fx.record(&student, "Jan-2025").await, record);
    }

    #[tokio::test]
    async fn test_locked_session_rejects_writes() {
        let fx = Fixture::new().await;
        let student = fx.enroll("Asha", "Class-5", "A", 5000).await;
        fx.generate("Class-5", "Jan-2025").await;

        let sessions = SessionHandler::new(fx.store.clone());
        sessions
            .lock(fx.session.id, &["fees".to_string()], &fx.ctx)
            .await
            .unwrap();

        let err = FeeGenerationHandler::new(fx.store.clone())
            .execute(GenerateFeesCommand::new("Class-5", "Feb-2025"), &fx.ctx, BatchOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::LockedPeriod { .. }));

        let err = PaymentHandler::new(fx.store.clone())
            .execute(
                CollectPaymentsCommand::new(vec![PaymentIntent::new(student.id, "Jan-2025", "100")]),
                &fx.ctx,
                BatchOptions::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::LockedPeriod { .. }));

        // Reads still work
        let ledger = LedgerQueryHandler::new(fx.store.clone())
            .get_ledger(student.id, &fx.ctx)
            .await
            .unwrap();
        assert_eq!(ledger.len(), 1);

        sessions.unlock(fx.session.id, &[], &fx.ctx).await.unwrap();
        assert_eq!(fx.pay(&student, "Jan-2025", "100").await.succeeded.len(), 1);
    }

    #[tokio::test]
    async fn test_session_registry() {
        let fx = Fixture::new().await;
        let sessions = SessionHandler::new(fx.store.clone());

        let next = sessions
            .save(SaveSessionCommand::new("2025-26", date(2025, 4, 1), date(2026, 3, 31)), &fx.ctx)
            .await
            .unwrap();
        assert!(!next.is_current);

        sessions.set_current(next.id, &fx.ctx).await.unwrap();
        let current = fx.store.current_session(fx.ctx.tenant_id).await.unwrap().unwrap();
        assert_eq!(current.id, next.id);
        let all = sessions.list(&fx.ctx).await.unwrap();
        assert_eq!(all.iter().filter(|s| s.is_current).count(), 1);

        let err = sessions
            .save(SaveSessionCommand::new("Backwards", date(2025, 4, 1), date(2025, 1, 1)), &fx.ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        let err = sessions
            .lock(next.id, &["library".to_string()], &fx.ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        let locked = sessions.lock(next.id, &[], &fx.ctx).await.unwrap();
        assert!(locked.is_locked);
    }

    // =========================================================================
    // Adjustments
    // =========================================================================

    #[tokio::test]
    async fn test_manual_discount() {
        let fx = Fixture::new().await;
        let student = fx.enroll("Asha", "Class-5", "A", 5000).await;
        fx.generate("Class-5", "Jan-2025").await;
        let record = fx.record(&student, "Jan-2025").await;
        let adjustments = RecordAdjustmentHandler::new(fx.store.clone());

        let updated = adjustments
            .apply_discount(ApplyDiscountCommand::new(record.id, "500").with_reason("sports quota"), &fx.ctx)
            .await
            .unwrap();
        assert_eq!(updated.final_amount, money(4500));
        assert_eq!(updated.discount.manual_discount, money(500));
        assert!(updated.discount.applied_by.is_some());

        let err = adjustments
            .apply_discount(ApplyDiscountCommand::new(record.id, "5001"), &fx.ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        fx.pay(&student, "Jan-2025", "4000").await;
        let err = adjustments
            .apply_discount(ApplyDiscountCommand::new(record.id, "1500"), &fx.ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[tokio::test]
    async fn test_add_charge_reopens_paid_record() {
        let fx = Fixture::new().await;
        let student = fx.enroll("Asha", "Class-5", "A", 5000).await;
        fx.generate("Class-5", "Jan-2025").await;
        fx.pay(&student, "Jan-2025", "5000").await;
        let record = fx.record(&student, "Jan-2025").await;
        assert_eq!(record.status, FeeStatus::Paid);

        let updated = RecordAdjustmentHandler::new(fx.store.clone())
            .add_charge(AddChargeCommand::new(record.id, "300"), &fx.ctx)
            .await
            .unwrap();

        assert_eq!(updated.status, FeeStatus::Partial);
        assert_eq!(updated.balance, money(300));
        assert_eq!(updated.other_charges, money(300));
    }

    #[tokio::test]
    async fn test_waive_and_void() {
        let fx = Fixture::new().await;
        let student = fx.enroll("Asha", "Class-5", "A", 5000).await;
        fx.generate("Class-5", "Jan-2025").await;
        fx.generate("Class-5", "Feb-2025").await;
        let jan = fx.record(&student, "Jan-2025").await;
        let feb = fx.record(&student, "Feb-2025").await;
        let adjustments = RecordAdjustmentHandler::new(fx.store.clone());

        fx.pay(&student, "Jan-2025", "1000").await;
        let err = adjustments.void(jan.id, &fx.ctx).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        let waived = adjustments
            .waive(WaiveCommand::new(jan.id, "hardship"), &fx.ctx)
            .await
            .unwrap();
        assert!(waived.waived);
        assert_eq!(waived.status, FeeStatus::Paid);
        assert_eq!(waived.balance, Money::ZERO);
        assert_eq!(waived.concession, money(4000));

        let err = adjustments
            .waive(WaiveCommand::new(feb.id, "  "), &fx.ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        adjustments.void(feb.id, &fx.ctx).await.unwrap();
        assert!(fx.store.get_record(feb.id).await.unwrap().is_none());
        assert_eq!(fx.records(&student).await.len(), 1);
    }

    #[tokio::test]
    async fn test_voucher_reports_funds_separately() {
        let fx = Fixture::new().await;
        let student = fx.enroll("Asha", "Class-5", "A", 2000).await;
        let adjustments = RecordAdjustmentHandler::new(fx.store.clone());
        fx.generate("Class-5", "Jan-2025").await;

        adjustments
            .create_charge(
                CreateChargeCommand::new(student.id, "Feb-2025", FeeType::Fund, "300"),
                &fx.ctx,
            )
            .await
            .unwrap();
        let err = adjustments
            .create_charge(
                CreateChargeCommand::new(student.id, "Jan-2025", FeeType::Fund, "300"),
                &fx.ctx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateObligation(_)));

        fx.generate("Class-5", "Mar-2025").await;
        let mar = fx.record(&student, "Mar-2025").await;
        assert_eq!(mar.arrears, money(2000));

        let voucher = LedgerQueryHandler::new(fx.store.clone())
            .get_voucher(student.id, "Mar-2025", None, &fx.ctx)
            .await
            .unwrap();
        assert_eq!(voucher.record.id, mar.id);
        assert_eq!(voucher.arrears, money(2000));
        assert_eq!(voucher.outstanding_funds.len(), 1);
        assert_eq!(voucher.total_payable, money(4300));
    }

    // =========================================================================
    // Promotion
    // =========================================================================

    async fn next_session(fx: &Fixture) -> AcademicSession {
        let next = AcademicSession::new(fx.ctx.tenant_id, "2025-26", date(2025, 4, 1), date(2026, 3, 31));
        fx.store.save_session(&next).await.unwrap();
        next
    }

    #[tokio::test]
    async fn test_promotion_carries_closing_balance() {
        let fx = Fixture::new().await;
        let student = fx.enroll("Asha", "Class-5", "A", 2000).await;
        fx.generate("Class-5", "Jan-2025").await;
        fx.pay(&student, "Jan-2025", "500").await;
        let next = next_session(&fx).await;

        let result = PromotionHandler::new(fx.store.clone())
            .execute(
                PromoteStudentsCommand::new(
                    fx.session.id,
                    next.id,
                    "Class-6",
                    vec![PromotionEntry::new(student.id, "passed").with_roll_no("12")],
                )
                .with_section("B"),
                &fx.ctx,
                BatchOptions::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.succeeded.len(), 1);
        assert_eq!(result.succeeded[0].closing_balance, money(1500));

        let promoted = fx.store.get_student(student.id).await.unwrap().unwrap();
        assert_eq!(promoted.current_session_id, next.id);
        assert_eq!(promoted.class_id, "Class-6");
        assert_eq!(promoted.section_id.as_deref(), Some("B"));
        assert_eq!(promoted.roll_no.as_deref(), Some("12"));
        assert_eq!(promoted.session_history.len(), 1);
        let history = &promoted.session_history[0];
        assert_eq!(history.session_id, fx.session.id);
        assert_eq!(history.class_id, "Class-5");
        assert_eq!(history.closing_balance, money(1500));
        assert_eq!(history.final_result.as_deref(), Some("passed"));

        let carried = fx
            .store
            .list_student_records(fx.ctx.tenant_id, student.id, Some(next.id))
            .await
            .unwrap();
        assert_eq!(carried.len(), 1);
        let opening = &carried[0];
        assert!(opening.is_opening_entry);
        assert_eq!(opening.opening_balance, money(1500));
        assert_eq!(opening.balance, money(1500));
        assert_eq!(opening.period, period("Apr-2025"));
        assert_eq!(Some(opening.id), result.succeeded[0].opening_record_id);
    }

    #[tokio::test]
    async fn test_promotion_twice_is_rejected() {
        let fx = Fixture::new().await;
        let student = fx.enroll("Asha", "Class-5", "A", 2000).await;
        fx.generate("Class-5", "Jan-2025").await;
        let next = next_session(&fx).await;
        let handler = PromotionHandler::new(fx.store.clone());
        let command = PromoteStudentsCommand::new(
            fx.session.id,
            next.id,
            "Class-6",
            vec![PromotionEntry::new(student.id, "passed")],
        );

        handler.execute(command.clone(), &fx.ctx, BatchOptions::new()).await.unwrap();
        let again = handler.execute(command, &fx.ctx, BatchOptions::new()).await.unwrap();

        assert!(again.succeeded.is_empty());
        assert_eq!(again.failed[0].error_code, "already_promoted");
        let promoted = fx.store.get_student(student.id).await.unwrap().unwrap();
        assert_eq!(promoted.session_history.len(), 1);
        let carried = fx
            .store
            .list_student_records(fx.ctx.tenant_id, student.id, Some(next.id))
            .await
            .unwrap();
        assert_eq!(carried.len(), 1);
    }

    #[tokio::test]
    async fn test_settled_student_carries_nothing() {
        let fx = Fixture::new().await;
        let student = fx.enroll("Asha", "Class-5", "A", 2000).await;
        fx.generate("Class-5", "Jan-2025").await;
        fx.pay(&student, "Jan-2025", "2000").await;
        let next = next_session(&fx).await;

        let result = PromotionHandler::new(fx.store.clone())
            .execute(
                PromoteStudentsCommand::new(
                    fx.session.id,
                    next.id,
                    "Class-6",
                    vec![PromotionEntry::new(student.id, "passed")],
                ),
                &fx.ctx,
                BatchOptions::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.succeeded[0].closing_balance, Money::ZERO);
        assert!(result.succeeded[0].opening_record_id.is_none());
        let carried = fx
            .store
            .list_student_records(fx.ctx.tenant_id, student.id, Some(next.id))
            .await
            .unwrap();
        assert!(carried.is_empty());
    }

    #[tokio::test]
    async fn test_promotion_into_locked_session_fails() {
        let fx = Fixture::new().await;
        let student = fx.enroll("Asha", "Class-5", "A", 2000).await;
        let mut next = next_session(&fx).await;
        next.lock(&[]);
        fx.store.save_session(&next).await.unwrap();

        let err = PromotionHandler::new(fx.store.clone())
            .execute(
                PromoteStudentsCommand::new(
                    fx.session.id,
                    next.id,
                    "Class-6",
                    vec![PromotionEntry::new(student.id, "passed")],
                ),
                &fx.ctx,
                BatchOptions::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::LockedPeriod { .. }));
    }

    async fn promote(fx: &Fixture, student: &Student, next: &AcademicSession) {
        let result = PromotionHandler::new(fx.store.clone())
            .execute(
                PromoteStudentsCommand::new(
                    fx.session.id,
                    next.id,
                    "Class-6",
                    vec![PromotionEntry::new(student.id, "passed")],
                ),
                &fx.ctx,
                BatchOptions::new(),
            )
            .await
            .unwrap();
        assert_eq!(result.succeeded.len(), 1);
    }

    #[tokio::test]
    async fn test_promoted_session_rejects_fee_writes() {
        let fx = Fixture::new().await;
        let student = fx.enroll("Asha", "Class-5", "A", 1500).await;
        fx.generate("Class-5", "Jan-2025").await;
        let jan = fx.record(&student, "Jan-2025").await;
        let next = next_session(&fx).await;
        promote(&fx, &student, &next).await;

        // The debt now lives in the opening entry; paying the old
        // record as well would settle it twice
        let result = fx.pay(&student, "Jan-2025", "1500").await;
        assert!(result.succeeded.is_empty());
        assert_eq!(result.failed[0].error_code, "session_closed");

        let adjustments = RecordAdjustmentHandler::new(fx.store.clone());
        let err = adjustments
            .apply_discount(ApplyDiscountCommand::new(jan.id, "500"), &fx.ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::SessionClosed { .. }));
        let err = adjustments
            .add_charge(AddChargeCommand::new(jan.id, "100"), &fx.ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::SessionClosed { .. }));
        let err = adjustments
            .waive(WaiveCommand::new(jan.id, "scholarship"), &fx.ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::SessionClosed { .. }));
        let err = adjustments
            .create_charge(
                CreateChargeCommand::new(student.id, "Feb-2025", FeeType::Fund, "300"),
                &fx.ctx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::SessionClosed { .. }));

        assert_eq!(fx.record(&student, "Jan-2025").await, jan);
        let carried: Money = fx
            .store
            .list_student_records(fx.ctx.tenant_id, student.id, Some(next.id))
            .await
            .unwrap()
            .iter()
            .map(|r| r.balance)
            .sum();
        assert_eq!(carried, money(1500));
    }

    #[tokio::test]
    async fn test_promotion_rejects_balance_read_before_payment() {
        use crate::store::PromotionCommit;

        let fx = Fixture::new().await;
        let student = fx.enroll("Asha", "Class-5", "A", 1500).await;
        fx.generate("Class-5", "Jan-2025").await;
        let next = next_session(&fx).await;

        // Balance summed, then a payment lands before the commit
        let read = fx
            .store
            .list_student_records(fx.ctx.tenant_id, student.id, Some(fx.session.id))
            .await
            .unwrap();
        fx.pay(&student, "Jan-2025", "1500").await;

        let mut promoted = fx.store.get_student(student.id).await.unwrap().unwrap();
        promoted.current_session_id = next.id;
        let opening = FeeRecord::opening_entry(
            fx.ctx.tenant_id,
            student.id,
            next.id,
            period("Apr-2025"),
            money(1500),
            fx.session.id,
        );
        let err = fx
            .store
            .commit_promotion(PromotionCommit {
                student: promoted,
                from_session_id: fx.session.id,
                source_versions: read.iter().map(|r| (r.id, r.version)).collect(),
                opening_entry: Some(opening),
            })
            .await
            .unwrap_err();

        assert!(err.is_version_conflict());
        assert_eq!(fx.outstanding(&student).await, Money::ZERO);
    }

    #[tokio::test]
    async fn test_voucher_for_explicit_session() {
        let fx = Fixture::new().await;
        let student = fx.enroll("Asha", "Class-5", "A", 1500).await;
        fx.generate("Class-5", "Jan-2025").await;
        let next = next_session(&fx).await;
        promote(&fx, &student, &next).await;

        let mut command = CreateChargeCommand::new(student.id, "May-2025", FeeType::Other, "250");
        command.session_id = Some(next.id);
        let may = RecordAdjustmentHandler::new(fx.store.clone())
            .create_charge(command, &fx.ctx)
            .await
            .unwrap();

        let queries = LedgerQueryHandler::new(fx.store.clone());
        let voucher = queries
            .get_voucher(student.id, "May-2025", Some(next.id), &fx.ctx)
            .await
            .unwrap();
        assert_eq!(voucher.record.id, may.id);
        assert_eq!(voucher.arrears, money(1500));
        assert_eq!(voucher.total_payable, money(1750));

        // Without the session the tenant's current one is used
        let err = queries
            .get_voucher(student.id, "May-2025", None, &fx.ctx)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "not_found");
    }

    #[tokio::test]
    async fn test_ledger_invariants_after_mixed_activity() {
        let fx = Fixture::new().await;
        let student = fx.enroll("Asha", "Class-5", "A", 3000).await;
        for label in ["Jan-2025", "Feb-2025", "Mar-2025"] {
            fx.generate("Class-5", label).await;
        }
        fx.pay(&student, "Mar-2025", "4500").await;
        fx.pay(&student, "Apr-2025", "1000").await;

        for record in fx.records(&student).await {
            assert!(record.invariants_hold(), "record {} broke an invariant", record.period);
            assert!(record.balance == record.final_amount - record.paid_amount);
        }
        assert_eq!(fx.outstanding(&student).await, money(9000 - 5500));
    }
}
