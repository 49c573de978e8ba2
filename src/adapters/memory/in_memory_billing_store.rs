//! In-memory billing store.
//!
//! Implements every storage port against one mutex-guarded state, so each
//! port operation is atomic in the same way the PostgreSQL transactions are.
//! Used for development and tests; nothing survives a restart.
//!
//! Subscriptions are stored with a plan id only. Plan terms are attached on
//! read from the current catalog, and deleting a plan detaches it from the
//! remaining (inactive) subscriptions the way `ON DELETE SET NULL` does.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::domain::foundation::{DomainError, ErrorCode, PlanId, SubscriptionId, Timestamp, UserId};
use crate::domain::marketplace::{
    credit, Credit, NewPlan, Payment, Plan, PlanVisibility, Subscription,
};
use crate::ports::{
    CreditRepository, PaymentRepository, PlanDeletion, PlanRepository, SaveResult,
    SubscriptionRepository,
};

/// Store operations that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    InsertPlan,
    UpdatePlan,
    SupersedeActive,
    UpdateSubscription,
    RecordPayment,
}

#[derive(Default)]
struct StoreState {
    plans: BTreeMap<PlanId, Plan>,
    next_plan_id: i64,
    subscriptions: Vec<StoredSubscription>,
    payments: Vec<Payment>,
    credits: Vec<Credit>,
    failures: HashSet<FailurePoint>,
}

/// A subscription as persisted: terms are not stored, only the reference.
#[derive(Clone)]
struct StoredSubscription {
    plan_id: Option<PlanId>,
    record: Subscription,
}

impl StoredSubscription {
    fn from_domain(subscription: &Subscription) -> Self {
        let mut record = subscription.clone();
        let plan_id = record.plan.take().map(|terms| terms.plan_id);
        Self { plan_id, record }
    }
}

impl StoreState {
    fn check(&self, point: FailurePoint) -> Result<(), DomainError> {
        if self.failures.contains(&point) {
            return Err(DomainError::database(format!(
                "injected failure at {:?}",
                point
            )));
        }
        Ok(())
    }

    fn hydrate(&self, stored: &StoredSubscription) -> Subscription {
        let mut record = stored.record.clone();
        record.plan = stored
            .plan_id
            .and_then(|id| self.plans.get(&id))
            .map(Plan::terms);
        record
    }

    fn clear_other_recommendations(&mut self, keep: PlanId) {
        for plan in self.plans.values_mut() {
            if plan.id != keep {
                plan.is_recommended = false;
            }
        }
    }

    /// Mirrors the unique keys on the payments table: intent id, invoice id
    /// and period key each identify at most one payment.
    fn payment_exists(&self, payment: &Payment) -> bool {
        fn clash(ours: Option<&str>, theirs: Option<&str>) -> bool {
            ours.is_some() && ours == theirs
        }
        self.payments.iter().any(|p| {
            clash(
                payment.gateway_payment_intent_id.as_deref(),
                p.gateway_payment_intent_id.as_deref(),
            ) || clash(payment.invoice_id(), p.invoice_id())
                || clash(payment.period_key(), p.period_key())
        })
    }
}

/// Single-process implementation of the four storage ports.
#[derive(Default)]
pub struct InMemoryBillingStore {
    state: Mutex<StoreState>,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later call of `point` fail with a database error.
    pub fn fail_on(&self, point: FailurePoint) {
        if let Ok(mut state) = self.state.lock() {
            state.failures.insert(point);
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.failures.clear();
        }
    }

    /// Every payment, oldest first.
    pub fn all_payments(&self) -> Vec<Payment> {
        self.state
            .lock()
            .map(|s| s.payments.clone())
            .unwrap_or_default()
    }

    /// Every credit, oldest first.
    pub fn all_credits(&self) -> Vec<Credit> {
        self.state
            .lock()
            .map(|s| s.credits.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, DomainError> {
        self.state
            .lock()
            .map_err(|_| DomainError::new(ErrorCode::InternalError, "billing store lock poisoned"))
    }
}

#[async_trait]
impl PlanRepository for InMemoryBillingStore {
    async fn list(&self, visibility: PlanVisibility) -> Result<Vec<Plan>, DomainError> {
        let state = self.lock()?;
        let mut plans: Vec<Plan> = state
            .plans
            .values()
            .filter(|p| visibility.admits(p))
            .cloned()
            .collect();
        plans.sort_by_key(|p| (p.price, p.id));
        Ok(plans)
    }

    async fn find_by_id(&self, id: PlanId) -> Result<Option<Plan>, DomainError> {
        Ok(self.lock()?.plans.get(&id).cloned())
    }

    async fn insert(&self, plan: NewPlan) -> Result<Plan, DomainError> {
        let mut state = self.lock()?;
        state.check(FailurePoint::InsertPlan)?;
        if state.plans.values().any(|p| p.name == plan.spec.name) {
            return Err(DomainError::new(
                ErrorCode::Conflict,
                format!("A plan named '{}' already exists", plan.spec.name),
            ));
        }

        state.next_plan_id += 1;
        let id = PlanId::new(state.next_plan_id);
        let plan = Plan::from_new(id, plan, Timestamp::now());
        if plan.is_recommended {
            state.clear_other_recommendations(id);
        }
        state.plans.insert(id, plan.clone());
        Ok(plan)
    }

    async fn update(&self, plan: &Plan) -> Result<(), DomainError> {
        let mut state = self.lock()?;
        state.check(FailurePoint::UpdatePlan)?;
        if !state.plans.contains_key(&plan.id) {
            return Err(DomainError::new(
                ErrorCode::PlanNotFound,
                format!("Plan {} not found", plan.id),
            )
            .with_detail("id", plan.id.to_string()));
        }
        if state
            .plans
            .values()
            .any(|p| p.id != plan.id && p.name == plan.name)
        {
            return Err(DomainError::new(
                ErrorCode::Conflict,
                format!("A plan named '{}' already exists", plan.name),
            ));
        }
        if plan.is_recommended {
            state.clear_other_recommendations(plan.id);
        }
        state.plans.insert(plan.id, plan.clone());
        Ok(())
    }

    async fn delete_unreferenced(&self, id: PlanId) -> Result<PlanDeletion, DomainError> {
        let mut state = self.lock()?;
        if !state.plans.contains_key(&id) {
            return Ok(PlanDeletion::NotFound);
        }

        let active_subscriptions = state
            .subscriptions
            .iter()
            .filter(|s| s.plan_id == Some(id) && s.record.status.is_active())
            .count() as u64;
        if active_subscriptions > 0 {
            return Ok(PlanDeletion::Referenced {
                active_subscriptions,
            });
        }

        for stored in state.subscriptions.iter_mut() {
            if stored.plan_id == Some(id) {
                stored.plan_id = None;
            }
        }
        match state.plans.remove(&id) {
            Some(plan) => Ok(PlanDeletion::Deleted(plan)),
            None => Ok(PlanDeletion::NotFound),
        }
    }
}

#[async_trait]
impl SubscriptionRepository for InMemoryBillingStore {
    async fn history_for_user(&self, user_id: &UserId) -> Result<Vec<Subscription>, DomainError> {
        let state = self.lock()?;
        let mut history: Vec<Subscription> = state
            .subscriptions
            .iter()
            .filter(|s| &s.record.user_id == user_id)
            .map(|s| state.hydrate(s))
            .collect();
        history.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(history)
    }

    async fn find_by_id(&self, id: SubscriptionId) -> Result<Option<Subscription>, DomainError> {
        let state = self.lock()?;
        Ok(state
            .subscriptions
            .iter()
            .find(|s| s.record.id == id)
            .map(|s| state.hydrate(s)))
    }

    async fn find_by_gateway_subscription(
        &self,
        gateway_subscription_id: &str,
    ) -> Result<Option<Subscription>, DomainError> {
        let state = self.lock()?;
        Ok(state
            .subscriptions
            .iter()
            .filter(|s| s.record.gateway_subscription_id.as_deref() == Some(gateway_subscription_id))
            .max_by_key(|s| s.record.created_at)
            .map(|s| state.hydrate(s)))
    }

    async fn insert(&self, subscription: &Subscription) -> Result<(), DomainError> {
        let mut state = self.lock()?;
        if state.subscriptions.iter().any(|s| s.record.id == subscription.id) {
            return Err(DomainError::new(
                ErrorCode::Conflict,
                format!("Subscription {} already exists", subscription.id),
            ));
        }
        state
            .subscriptions
            .push(StoredSubscription::from_domain(subscription));
        Ok(())
    }

    async fn update(&self, subscription: &Subscription) -> Result<(), DomainError> {
        let mut state = self.lock()?;
        state.check(FailurePoint::UpdateSubscription)?;
        let slot = state
            .subscriptions
            .iter_mut()
            .find(|s| s.record.id == subscription.id)
            .ok_or_else(|| {
                DomainError::new(
                    ErrorCode::SubscriptionNotFound,
                    format!("Subscription {} not found", subscription.id),
                )
                .with_detail("id", subscription.id.to_string())
            })?;
        *slot = StoredSubscription::from_domain(subscription);
        Ok(())
    }

    async fn set_customer_id(
        &self,
        id: SubscriptionId,
        customer_id: &str,
        now: Timestamp,
    ) -> Result<(), DomainError> {
        let mut state = self.lock()?;
        let slot = state
            .subscriptions
            .iter_mut()
            .find(|s| s.record.id == id)
            .ok_or_else(|| {
                DomainError::new(
                    ErrorCode::SubscriptionNotFound,
                    format!("Subscription {} not found", id),
                )
                .with_detail("id", id.to_string())
            })?;
        slot.record.gateway_customer_id = Some(customer_id.to_string());
        slot.record.updated_at = now;
        Ok(())
    }

    async fn supersede_active(
        &self,
        subscription: &Subscription,
    ) -> Result<Vec<SubscriptionId>, DomainError> {
        let mut state = self.lock()?;
        state.check(FailurePoint::SupersedeActive)?;
        let now = Timestamp::now();

        // Stage the completions so a failed transition leaves nothing changed.
        let mut staged = Vec::new();
        for (index, stored) in state.subscriptions.iter().enumerate() {
            if stored.record.user_id == subscription.user_id && stored.record.status.is_active() {
                let mut record = stored.record.clone();
                record.complete(now)?;
                staged.push((index, record));
            }
        }

        let completed = staged.iter().map(|(_, r)| r.id).collect();
        for (index, record) in staged {
            state.subscriptions[index].record = record;
        }
        state
            .subscriptions
            .push(StoredSubscription::from_domain(subscription));
        Ok(completed)
    }
}

#[async_trait]
impl PaymentRepository for InMemoryBillingStore {
    async fn record(&self, payment: &Payment) -> Result<SaveResult, DomainError> {
        let mut state = self.lock()?;
        state.check(FailurePoint::RecordPayment)?;
        if state.payment_exists(payment) {
            return Ok(SaveResult::AlreadyExists);
        }
        state.payments.push(payment.clone());
        Ok(SaveResult::Inserted)
    }

    async fn record_with_credit(
        &self,
        payment: &Payment,
        credit: &Credit,
    ) -> Result<SaveResult, DomainError> {
        let mut state = self.lock()?;
        state.check(FailurePoint::RecordPayment)?;
        if state.payment_exists(payment) {
            return Ok(SaveResult::AlreadyExists);
        }
        state.payments.push(payment.clone());
        state.credits.push(credit.clone());
        Ok(SaveResult::Inserted)
    }

    async fn find_by_intent_id(&self, intent_id: &str) -> Result<Option<Payment>, DomainError> {
        Ok(self
            .lock()?
            .payments
            .iter()
            .find(|p| p.gateway_payment_intent_id.as_deref() == Some(intent_id))
            .cloned())
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Payment>, DomainError> {
        let state = self.lock()?;
        let mut payments: Vec<Payment> = state
            .payments
            .iter()
            .filter(|p| &p.user_id == user_id)
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(payments)
    }
}

#[async_trait]
impl CreditRepository for InMemoryBillingStore {
    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Credit>, DomainError> {
        let state = self.lock()?;
        let mut credits: Vec<Credit> = state
            .credits
            .iter()
            .filter(|c| &c.user_id == user_id)
            .cloned()
            .collect();
        credits.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(credits)
    }

    async fn consume_one(
        &self,
        user_id: &UserId,
        now: Timestamp,
    ) -> Result<Option<Credit>, DomainError> {
        let mut state = self.lock()?;
        let owned: Vec<Credit> = state
            .credits
            .iter()
            .filter(|c| &c.user_id == user_id)
            .cloned()
            .collect();
        let Some(target) = credit::next_to_consume(&owned, now).map(|c| c.id) else {
            return Ok(None);
        };

        match state.credits.iter_mut().find(|c| c.id == target) {
            Some(entry) => {
                entry.consume_one(now)?;
                Ok(Some(entry.clone()))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::{Money, PaymentId};
    use crate::domain::marketplace::test_support::spec;
    use crate::domain::marketplace::payment::{META_INVOICE_ID, META_PERIOD_KEY};
    use crate::domain::marketplace::{BillingPeriod, SubscriptionStatus};

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    fn new_plan(name: &str, price: i64, recommended: bool) -> NewPlan {
        let mut spec = spec(name, price, 5);
        spec.is_recommended = recommended;
        NewPlan {
            spec,
            gateway_product_id: Some(format!("prod_{}", name)),
            gateway_price_id: Some(format!("price_{}", name)),
        }
    }

    fn paid_sub(user_id: &UserId, plan: &Plan, gateway_id: &str, created: Timestamp) -> Subscription {
        Subscription::paid(
            user_id.clone(),
            plan.terms(),
            Some("cus_1".to_string()),
            gateway_id,
            BillingPeriod::default(),
            created,
        )
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Plans
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn plans_are_listed_by_price() {
        let store = InMemoryBillingStore::new();
        PlanRepository::insert(&store, new_plan("gold", 2000, false)).await.unwrap();
        PlanRepository::insert(&store, new_plan("basic", 500, false)).await.unwrap();
        let mut hidden = new_plan("legacy", 100, false);
        hidden.spec.is_active = false;
        PlanRepository::insert(&store, hidden).await.unwrap();

        let all = store.list(PlanVisibility::All).await.unwrap();
        assert_eq!(
            all.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            vec!["legacy", "basic", "gold"]
        );
        let active = store.list(PlanVisibility::ActiveOnly).await.unwrap();
        assert_eq!(active.len(), 2);
    }

    #[tokio::test]
    async fn recommending_a_plan_clears_the_others() {
        let store = InMemoryBillingStore::new();
        let first = PlanRepository::insert(&store, new_plan("basic", 500, true)).await.unwrap();
        let second = PlanRepository::insert(&store, new_plan("gold", 2000, true)).await.unwrap();

        let recommended: Vec<PlanId> = store
            .list(PlanVisibility::All)
            .await
            .unwrap()
            .into_iter()
            .filter(|p| p.is_recommended)
            .map(|p| p.id)
            .collect();
        assert_eq!(recommended, vec![second.id]);

        let mut first = PlanRepository::find_by_id(&store, first.id).await.unwrap().unwrap();
        first.is_recommended = true;
        PlanRepository::update(&store, &first).await.unwrap();
        let second = PlanRepository::find_by_id(&store, second.id).await.unwrap().unwrap();
        assert!(!second.is_recommended);
    }

    #[tokio::test]
    async fn duplicate_plan_names_conflict() {
        let store = InMemoryBillingStore::new();
        PlanRepository::insert(&store, new_plan("basic", 500, false)).await.unwrap();
        let err = PlanRepository::insert(&store, new_plan("basic", 700, false)).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Conflict);
    }

    #[tokio::test]
    async fn delete_refuses_plans_with_active_subscriptions() {
        let store = InMemoryBillingStore::new();
        let plan = PlanRepository::insert(&store, new_plan("basic", 500, false)).await.unwrap();
        let u = user("u1");
        SubscriptionRepository::insert(&store, &paid_sub(&u, &plan, "sub_1", Timestamp::now()))
            .await
            .unwrap();

        let outcome = store.delete_unreferenced(plan.id).await.unwrap();
        assert_eq!(
            outcome,
            PlanDeletion::Referenced {
                active_subscriptions: 1
            }
        );
        assert!(PlanRepository::find_by_id(&store, plan.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_detaches_inactive_subscriptions() {
        let store = InMemoryBillingStore::new();
        let plan = PlanRepository::insert(&store, new_plan("basic", 500, false)).await.unwrap();
        let u = user("u1");
        let mut sub = paid_sub(&u, &plan, "sub_1", Timestamp::now());
        sub.end(Timestamp::now()).unwrap();
        SubscriptionRepository::insert(&store, &sub).await.unwrap();

        let outcome = store.delete_unreferenced(plan.id).await.unwrap();
        assert!(matches!(outcome, PlanDeletion::Deleted(ref p) if p.id == plan.id));

        let reloaded = SubscriptionRepository::find_by_id(&store, sub.id)
            .await
            .unwrap()
            .unwrap();
        assert!(reloaded.plan.is_none());
        assert_eq!(reloaded.status, SubscriptionStatus::Canceled);
    }

    #[tokio::test]
    async fn delete_missing_plan_reports_not_found() {
        let store = InMemoryBillingStore::new();
        assert_eq!(
            store.delete_unreferenced(PlanId::new(42)).await.unwrap(),
            PlanDeletion::NotFound
        );
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Subscriptions
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn supersede_completes_every_active_record() {
        let store = InMemoryBillingStore::new();
        let plan = PlanRepository::insert(&store, new_plan("basic", 500, false)).await.unwrap();
        let u = user("u1");
        let old = Subscription::free_tier(u.clone(), Timestamp::now().minus_days(2));
        SubscriptionRepository::insert(&store, &old).await.unwrap();

        let new = paid_sub(&u, &plan, "sub_1", Timestamp::now());
        let completed = store.supersede_active(&new).await.unwrap();
        assert_eq!(completed, vec![old.id]);

        let history = store.history_for_user(&u).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, new.id);
        assert_eq!(history[0].plan.as_ref().map(|t| t.plan_id), Some(plan.id));
        assert_eq!(history[1].status, SubscriptionStatus::Completed);
        assert_eq!(
            history.iter().filter(|s| s.status.is_active()).count(),
            1
        );
    }

    #[tokio::test]
    async fn failed_supersede_changes_nothing() {
        let store = InMemoryBillingStore::new();
        let plan = PlanRepository::insert(&store, new_plan("basic", 500, false)).await.unwrap();
        let u = user("u1");
        let old = Subscription::free_tier(u.clone(), Timestamp::now());
        SubscriptionRepository::insert(&store, &old).await.unwrap();

        store.fail_on(FailurePoint::SupersedeActive);
        assert!(store
            .supersede_active(&paid_sub(&u, &plan, "sub_1", Timestamp::now()))
            .await
            .is_err());

        let history = store.history_for_user(&u).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].status.is_active());
    }

    #[tokio::test]
    async fn subscription_terms_follow_plan_edits() {
        let store = InMemoryBillingStore::new();
        let mut plan = PlanRepository::insert(&store, new_plan("basic", 500, false)).await.unwrap();
        let u = user("u1");
        let sub = paid_sub(&u, &plan, "sub_1", Timestamp::now());
        SubscriptionRepository::insert(&store, &sub).await.unwrap();

        plan.posts_per_month = 50;
        PlanRepository::update(&store, &plan).await.unwrap();

        let reloaded = store
            .find_by_gateway_subscription("sub_1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.plan.unwrap().posts_per_month, 50);
    }

    #[tokio::test]
    async fn updating_unknown_subscription_fails() {
        let store = InMemoryBillingStore::new();
        let sub = Subscription::free_tier(user("u1"), Timestamp::now());
        let err = SubscriptionRepository::update(&store, &sub).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::SubscriptionNotFound);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Payments and Credits
    // ════════════════════════════════════════════════════════════════════════════

    fn post_payment(u: &UserId, intent: &str) -> Payment {
        Payment::one_time_post(
            u.clone(),
            Money::from_cents(500).unwrap(),
            "usd",
            intent,
            Timestamp::now(),
        )
    }

    #[tokio::test]
    async fn payment_and_credit_are_written_once_per_intent() {
        let store = InMemoryBillingStore::new();
        let u = user("u1");

        for _ in 0..3 {
            let payment = post_payment(&u, "pi_1");
            let credit = Credit::issue(u.clone(), 1, Some(payment.id), Timestamp::now());
            store.record_with_credit(&payment, &credit).await.unwrap();
        }

        assert_eq!(store.all_payments().len(), 1);
        assert_eq!(store.all_credits().len(), 1);
        assert_eq!(
            store.all_credits()[0].payment_id,
            Some(store.all_payments()[0].id)
        );
    }

    #[tokio::test]
    async fn failed_payment_write_issues_no_credit() {
        let store = InMemoryBillingStore::new();
        let u = user("u1");
        store.fail_on(FailurePoint::RecordPayment);

        let payment = post_payment(&u, "pi_1");
        let credit = Credit::issue(u.clone(), 1, Some(payment.id), Timestamp::now());
        assert!(store.record_with_credit(&payment, &credit).await.is_err());
        assert!(store.all_credits().is_empty());
    }

    #[tokio::test]
    async fn consume_prefers_soonest_expiring_credit() {
        let store = InMemoryBillingStore::new();
        let u = user("u1");
        let now = Timestamp::now();

        let forever = Credit::issue(u.clone(), 1, Some(PaymentId::new()), now.minus_days(5));
        let mut expiring = Credit::issue(u.clone(), 1, Some(PaymentId::new()), now);
        expiring.expires_at = Some(now.add_days(3));
        for (i, c) in [&forever, &expiring].into_iter().enumerate() {
            let payment = post_payment(&u, &format!("pi_{}", i));
            store.record_with_credit(&payment, c).await.unwrap();
        }

        let first = store.consume_one(&u, now).await.unwrap().unwrap();
        assert_eq!(first.id, expiring.id);
        let second = store.consume_one(&u, now).await.unwrap().unwrap();
        assert_eq!(second.id, forever.id);
        assert!(store.consume_one(&u, now).await.unwrap().is_none());
    }

    fn list_price_charge(u: &UserId, period_key: &str) -> Payment {
        let mut metadata = BTreeMap::new();
        metadata.insert(
            META_PERIOD_KEY.to_string(),
            period_key.to_string(),
        );
        Payment::subscription_charge(
            u.clone(),
            SubscriptionId::new(),
            "Basic",
            Money::from_cents(500).unwrap(),
            "usd",
            None,
            metadata,
            Timestamp::now(),
        )
    }

    fn invoice_charge(u: &UserId, invoice_id: &str) -> Payment {
        let mut metadata = BTreeMap::new();
        metadata.insert(
            META_INVOICE_ID.to_string(),
            invoice_id.to_string(),
        );
        Payment::subscription_charge(
            u.clone(),
            SubscriptionId::new(),
            "Basic",
            Money::from_cents(500).unwrap(),
            "usd",
            None,
            metadata,
            Timestamp::now(),
        )
    }

    #[tokio::test]
    async fn invoice_id_identifies_one_payment() {
        let store = InMemoryBillingStore::new();
        let u = user("u1");

        assert_eq!(
            store.record(&invoice_charge(&u, "in_7")).await.unwrap(),
            SaveResult::Inserted
        );
        assert_eq!(
            store.record(&invoice_charge(&u, "in_7")).await.unwrap(),
            SaveResult::AlreadyExists
        );
        assert_eq!(
            store.record(&invoice_charge(&u, "in_8")).await.unwrap(),
            SaveResult::Inserted
        );
        assert_eq!(store.all_payments().len(), 2);
    }

    #[tokio::test]
    async fn period_key_identifies_one_payment() {
        let store = InMemoryBillingStore::new();
        let u = user("u1");

        store.record(&list_price_charge(&u, "sub_1:100")).await.unwrap();
        assert_eq!(
            store.record(&list_price_charge(&u, "sub_1:100")).await.unwrap(),
            SaveResult::AlreadyExists
        );
        store.record(&list_price_charge(&u, "sub_1:200")).await.unwrap();

        assert_eq!(store.all_payments().len(), 2);
    }

    #[tokio::test]
    async fn charges_without_keys_are_not_deduplicated() {
        let store = InMemoryBillingStore::new();
        let u = user("u1");
        let keyless = || {
            Payment::subscription_charge(
                u.clone(),
                SubscriptionId::new(),
                "Basic",
                Money::from_cents(500).unwrap(),
                "usd",
                None,
                BTreeMap::new(),
                Timestamp::now(),
            )
        };

        store.record(&keyless()).await.unwrap();
        store.record(&keyless()).await.unwrap();

        assert_eq!(store.all_payments().len(), 2);
    }
}
