use chrono::Utc;
use log::info;
use std::sync::Arc;
use thiserror::Error;

use crate::{
    Database, DatabaseError, NewPlan, NewSubscription, PlanData, PrimaryKey, SubscriptionData,
};

/// Plans and subscriptions, driven by the billing provider's webhook
pub struct Billing<Db> {
    db: Arc<Db>,
}

#[derive(Debug, Error)]
pub enum BillingError {
    /// The notification's email doesn't belong to any account
    #[error("No account matches the notification email")]
    UserNotFound,
    /// The notification's price reference doesn't match any plan
    #[error("No plan matches the notification price reference")]
    PlanNotFound,
    /// Something else went wrong with the database
    #[error(transparent)]
    Db(#[from] DatabaseError),
}

/// What the billing provider tells us when a checkout completes
#[derive(Debug)]
pub struct CheckoutNotification {
    /// Email of the paying customer, matched against accounts
    pub email: String,
    /// The provider's price id for the purchased plan
    pub price_ref: String,
    /// The provider's id for the created subscription
    pub external_ref: String,
}

impl<Db> Billing<Db>
where
    Db: Database,
{
    pub fn new(db: &Arc<Db>) -> Self {
        Self { db: db.clone() }
    }

    /// Applies a completed checkout: resolves the account by email and
    /// the plan by price reference, then activates the subscription.
    /// A repeated notification updates the existing row in place.
    pub async fn checkout_completed(
        &self,
        notification: CheckoutNotification,
    ) -> Result<SubscriptionData, BillingError> {
        let user = match self.db.user_by_email(&notification.email).await {
            Ok(user) => user,
            Err(DatabaseError::NotFound { .. }) => return Err(BillingError::UserNotFound),
            Err(e) => return Err(e.into()),
        };

        let plan = match self.db.plan_by_price_ref(&notification.price_ref).await {
            Ok(plan) => plan,
            Err(DatabaseError::NotFound { .. }) => return Err(BillingError::PlanNotFound),
            Err(e) => return Err(e.into()),
        };

        let subscription = self
            .db
            .upsert_subscription(NewSubscription {
                user_id: user.id,
                plan_id: plan.id,
                external_ref: notification.external_ref,
                status: "active".to_string(),
                started_at: Utc::now(),
                ends_at: None,
            })
            .await?;

        info!("{} subscribed to the {} plan", user.email, plan.name);

        Ok(subscription)
    }

    pub async fn subscription_for_user(
        &self,
        user_id: PrimaryKey,
    ) -> Result<Option<SubscriptionData>, DatabaseError> {
        match self.db.subscription_by_user(user_id).await {
            Ok(subscription) => Ok(Some(subscription)),
            Err(DatabaseError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn list_plans(&self) -> Result<Vec<PlanData>, DatabaseError> {
        self.db.list_plans().await
    }

    /// Seeds the built-in plans. Safe to run on every startup, existing
    /// plans are left untouched.
    pub async fn seed_default_plans(&self) -> Result<(), DatabaseError> {
        let defaults = [
            NewPlan {
                name: "free".to_string(),
                amount: 0,
                currency: "eur".to_string(),
                price_ref: "price_free".to_string(),
                is_custom: false,
            },
            NewPlan {
                name: "premium".to_string(),
                amount: 499,
                currency: "eur".to_string(),
                price_ref: "price_premium_monthly".to_string(),
                is_custom: false,
            },
            NewPlan {
                name: "custom".to_string(),
                amount: 0,
                currency: "eur".to_string(),
                price_ref: "price_custom".to_string(),
                is_custom: true,
            },
        ];

        for plan in defaults {
            self.db.seed_plan(plan).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn notification(email: &str, price_ref: &str) -> CheckoutNotification {
        CheckoutNotification {
            email: email.to_string(),
            price_ref: price_ref.to_string(),
            external_ref: "sub_001".to_string(),
        }
    }

    #[tokio::test]
    async fn checkout_activates_a_subscription() {
        let (encore, _) = testing::encore().await;
        encore.billing.seed_default_plans().await.unwrap();

        let user = testing::user(encore.database(), "Herbert").await;

        let subscription = encore
            .billing
            .checkout_completed(notification(&user.email, "price_premium_monthly"))
            .await
            .unwrap();

        assert_eq!(subscription.user_id, user.id);
        assert_eq!(subscription.status, "active");

        let found = encore
            .billing
            .subscription_for_user(user.id)
            .await
            .unwrap()
            .expect("subscription exists");
        assert_eq!(found.external_ref, "sub_001");
    }

    #[tokio::test]
    async fn unknown_email_is_rejected() {
        let (encore, _) = testing::encore().await;
        encore.billing.seed_default_plans().await.unwrap();

        let result = encore
            .billing
            .checkout_completed(notification("nobody@example.com", "price_premium_monthly"))
            .await;

        assert!(matches!(result, Err(BillingError::UserNotFound)));
    }

    #[tokio::test]
    async fn unknown_price_ref_is_rejected() {
        let (encore, _) = testing::encore().await;
        encore.billing.seed_default_plans().await.unwrap();

        let user = testing::user(encore.database(), "Herbert").await;

        let result = encore
            .billing
            .checkout_completed(notification(&user.email, "price_bogus"))
            .await;

        assert!(matches!(result, Err(BillingError::PlanNotFound)));
    }

    #[tokio::test]
    async fn repeated_checkouts_update_in_place() {
        let (encore, _) = testing::encore().await;
        encore.billing.seed_default_plans().await.unwrap();

        let user = testing::user(encore.database(), "Herbert").await;

        encore
            .billing
            .checkout_completed(notification(&user.email, "price_free"))
            .await
            .unwrap();

        let mut upgrade = notification(&user.email, "price_premium_monthly");
        upgrade.external_ref = "sub_002".to_string();

        let upgraded = encore.billing.checkout_completed(upgrade).await.unwrap();

        // Still a single subscription per user
        let found = encore
            .billing
            .subscription_for_user(user.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, upgraded.id);
        assert_eq!(found.external_ref, "sub_002");
    }

    #[tokio::test]
    async fn seeding_twice_is_idempotent() {
        let (encore, _) = testing::encore().await;

        encore.billing.seed_default_plans().await.unwrap();
        encore.billing.seed_default_plans().await.unwrap();

        let plans = encore.billing.list_plans().await.unwrap();
        assert_eq!(plans.len(), 3);
    }
}
