use axum::{
    http::StatusCode,
    routing::{get, post},
    Json,
};
use log::{error, warn};
use encore_collab::{BillingError, CheckoutNotification};

use crate::{
    auth::Session,
    context::ServerContext,
    errors::ServerResult,
    schemas::WebhookSchema,
    serialized::{Plan, Subscription, ToSerialized},
    Router,
};

#[utoipa::path(
    get,
    path = "/v1/billing/plans",
    tag = "billing",
    responses(
        (status = 200, body = Vec<Plan>)
    )
)]
pub(crate) async fn list_plans(context: ServerContext) -> ServerResult<Json<Vec<Plan>>> {
    let plans = context.encore.billing.list_plans().await?;

    Ok(Json(plans.to_serialized()))
}

#[utoipa::path(
    get,
    path = "/v1/billing/subscription",
    tag = "billing",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Subscription, description = "The subscription, or null when the user has none")
    )
)]
pub(crate) async fn subscription(
    session: Session,
    context: ServerContext,
) -> ServerResult<Json<Option<Subscription>>> {
    let subscription = context
        .encore
        .billing
        .subscription_for_user(session.user().id)
        .await?;

    Ok(Json(subscription.map(|s| s.to_serialized())))
}

#[utoipa::path(
    post,
    path = "/v1/billing/webhook",
    tag = "billing",
    request_body = WebhookSchema,
    responses(
        (status = 200, description = "Notification was processed or ignored"),
        (status = 400, description = "The notification is missing required fields"),
        (status = 404, description = "No account or plan matches the notification"),
        (status = 500, description = "The notification could not be processed")
    )
)]
pub(crate) async fn webhook(
    context: ServerContext,
    Json(body): Json<WebhookSchema>,
) -> StatusCode {
    // Only completed checkouts matter, everything else is acknowledged
    // so the provider stops retrying it.
    if body.event_type.as_deref() != Some("checkout.completed") {
        return StatusCode::OK;
    }

    let notification = match (body.email, body.price_ref, body.external_ref) {
        (Some(email), Some(price_ref), Some(external_ref)) => CheckoutNotification {
            email,
            price_ref,
            external_ref,
        },
        _ => {
            warn!("Discarding checkout notification with missing fields");
            return StatusCode::BAD_REQUEST;
        }
    };

    // Details stay in the logs; the provider only gets a status to act on
    match context.encore.billing.checkout_completed(notification).await {
        Ok(_) => StatusCode::OK,
        Err(e @ (BillingError::UserNotFound | BillingError::PlanNotFound)) => {
            warn!("Discarding checkout notification: {}", e);
            StatusCode::NOT_FOUND
        }
        Err(e) => {
            error!("Could not process checkout notification: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub fn router() -> Router {
    Router::new()
        .route("/plans", get(list_plans))
        .route("/subscription", get(subscription))
        .route("/webhook", post(webhook))
}
