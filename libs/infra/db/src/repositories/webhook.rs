//! Tenant webhooks and their delivery log.

use breeze_domain_models::job::RetryPolicy;
use breeze_domain_models::webhook::{DeliveryStatus, Webhook, WebhookDelivery, WebhookStatus};
use chrono::{DateTime, Utc};
use libsql::params;
use tracing::instrument;
use uuid::Uuid;

use crate::client::DbClient;
use crate::errors::DbError;
use crate::rowext::{get_datetime, get_i64, get_json, get_opt_datetime, get_opt_i64, get_opt_str, get_str, get_uuid, to_json};

#[derive(Clone)]
pub struct WebhookRepository {
    db: DbClient,
}

const WEBHOOK_COLUMNS: &str = "id, org_id, url, secret, events, headers, status, max_retries, backoff_multiplier, initial_delay_ms, max_delay_ms, success_count, failure_count, last_delivery_at, created_at";
const DELIVERY_COLUMNS: &str = "id, webhook_id, event_type, event_id, payload, status, attempts, next_retry_at, response_status, response_body, response_time_ms, error, created_at";

impl WebhookRepository {
    pub fn new(db: DbClient) -> Self {
        Self { db }
    }

    #[instrument(skip(self, webhook))]
    pub async fn create(&self, webhook: &Webhook) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO webhooks (id, org_id, url, secret, events, headers, status, max_retries, backoff_multiplier, initial_delay_ms, max_delay_ms, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                webhook.id.to_string(),
                webhook.org_id.to_string(),
                webhook.url.clone(),
                webhook.secret.clone(),
                to_json(&webhook.events),
                webhook.headers.to_string(),
                to_json(&webhook.status),
                webhook.retry_policy.max_retries,
                webhook.retry_policy.backoff_multiplier,
                webhook.retry_policy.initial_delay_ms,
                webhook.retry_policy.max_delay_ms,
                webhook.created_at.to_rfc3339(),
            ],
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: Uuid) -> Result<Webhook, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(&format!("SELECT {WEBHOOK_COLUMNS} FROM webhooks WHERE id = ?1 AND deleted_at IS NULL"), params![id.to_string()])
            .await?;
        let row = rows.next().await?.ok_or(DbError::NotFound)?;
        map_webhook(&row)
    }

    #[instrument(skip(self))]
    pub async fn list_for_org(&self, org_id: Uuid) -> Result<Vec<Webhook>, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(&format!("SELECT {WEBHOOK_COLUMNS} FROM webhooks WHERE org_id = ?1 AND deleted_at IS NULL"), params![org_id.to_string()])
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(map_webhook(&row)?);
        }
        Ok(out)
    }

    /// Subscribers for `event_type` across the org, used to fan out a
    /// domain event into one delivery job per webhook.
    #[instrument(skip(self))]
    pub async fn list_subscribed(&self, org_id: Uuid, event_type: &str) -> Result<Vec<Webhook>, DbError> {
        let all = self.list_for_org(org_id).await?;
        Ok(all
            .into_iter()
            .filter(|w| w.status == WebhookStatus::Active && w.events.iter().any(|e| e == event_type))
            .collect())
    }

    #[instrument(skip(self))]
    pub async fn set_status(&self, id: Uuid, status: WebhookStatus) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        let affected = conn
            .execute("UPDATE webhooks SET status = ?1 WHERE id = ?2 AND deleted_at IS NULL", params![to_json(&status), id.to_string()])
            .await?;
        if affected == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        let affected = conn
            .execute("UPDATE webhooks SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL", params![at.to_rfc3339(), id.to_string()])
            .await?;
        if affected == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn record_outcome(&self, id: Uuid, delivered: bool, at: DateTime<Utc>) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        let column = if delivered { "success_count" } else { "failure_count" };
        conn.execute(
            &format!("UPDATE webhooks SET {column} = {column} + 1, last_delivery_at = ?1 WHERE id = ?2"),
            params![at.to_rfc3339(), id.to_string()],
        )
        .await?;
        Ok(())
    }

    /// Insert-or-ignore on `(webhook_id, event_id)` so redelivering the same
    /// event twice never produces two rows.
    #[instrument(skip(self, delivery))]
    pub async fn record_delivery_attempt(&self, delivery: &WebhookDelivery) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO webhook_deliveries (id, webhook_id, event_type, event_id, payload, status, attempts, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(webhook_id, event_id) DO NOTHING",
            params![
                delivery.id.to_string(),
                delivery.webhook_id.to_string(),
                delivery.event_type.clone(),
                delivery.event_id.clone(),
                delivery.payload.to_string(),
                to_json(&delivery.status),
                delivery.attempts,
                delivery.created_at.to_rfc3339(),
            ],
        )
        .await?;
        Ok(())
    }

    /// The delivery row for this event, if one was already recorded by a
    /// prior attempt — lets the worker resume a retried job against the
    /// same row instead of racing `record_delivery_attempt`'s insert.
    #[instrument(skip(self))]
    pub async fn get_delivery_for_event(&self, webhook_id: Uuid, event_id: &str) -> Result<Option<WebhookDelivery>, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(
                &format!("SELECT {DELIVERY_COLUMNS} FROM webhook_deliveries WHERE webhook_id = ?1 AND event_id = ?2"),
                params![webhook_id.to_string(), event_id.to_string()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(map_delivery(&row)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    pub async fn already_delivered(&self, webhook_id: Uuid, event_id: &str) -> Result<bool, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(
                "SELECT 1 FROM webhook_deliveries WHERE webhook_id = ?1 AND event_id = ?2 AND status = 'delivered'",
                params![webhook_id.to_string(), event_id.to_string()],
            )
            .await?;
        Ok(rows.next().await?.is_some())
    }

    #[instrument(skip(self))]
    pub async fn update_delivery_result(
        &self,
        id: Uuid,
        status: DeliveryStatus,
        response_status: Option<u16>,
        response_time_ms: Option<u64>,
        error: Option<&str>,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        conn.execute(
            "UPDATE webhook_deliveries SET status = ?1, attempts = attempts + 1, response_status = ?2, response_time_ms = ?3, error = ?4, next_retry_at = ?5 WHERE id = ?6",
            params![
                to_json(&status),
                response_status.map(|v| v as i64),
                response_time_ms.map(|v| v as i64),
                error.map(str::to_string),
                next_retry_at.map(|d| d.to_rfc3339()),
                id.to_string(),
            ],
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn list_due_retries(&self, now: DateTime<Utc>) -> Result<Vec<WebhookDelivery>, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(
                &format!("SELECT {DELIVERY_COLUMNS} FROM webhook_deliveries WHERE status = 'failed' AND next_retry_at <= ?1"),
                params![now.to_rfc3339()],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(map_delivery(&row)?);
        }
        Ok(out)
    }
}

fn map_webhook(row: &libsql::Row) -> Result<Webhook, DbError> {
    Ok(Webhook {
        id: get_uuid(row, 0)?,
        org_id: get_uuid(row, 1)?,
        url: get_str(row, 2)?,
        secret: get_str(row, 3)?,
        events: get_json(row, 4)?,
        headers: get_json(row, 5)?,
        status: get_json::<WebhookStatus>(row, 6)?,
        retry_policy: RetryPolicy {
            max_retries: get_i64(row, 7)? as u32,
            backoff_multiplier: row.get::<f64>(8).map_err(|e| DbError::Mapping(e.to_string()))?,
            initial_delay_ms: get_i64(row, 9)?,
            max_delay_ms: get_i64(row, 10)?,
        },
        success_count: get_i64(row, 11)? as u64,
        failure_count: get_i64(row, 12)? as u64,
        last_delivery_at: get_opt_datetime(row, 13)?,
        created_at: get_datetime(row, 14)?,
        deleted_at: None,
    })
}

fn map_delivery(row: &libsql::Row) -> Result<WebhookDelivery, DbError> {
    Ok(WebhookDelivery {
        id: get_uuid(row, 0)?,
        webhook_id: get_uuid(row, 1)?,
        event_type: get_str(row, 2)?,
        event_id: get_str(row, 3)?,
        payload: get_json(row, 4)?,
        status: get_json::<DeliveryStatus>(row, 5)?,
        attempts: get_i64(row, 6)? as u32,
        next_retry_at: get_opt_datetime(row, 7)?,
        response_status: get_opt_i64(row, 8)?.map(|v| v as u16),
        response_body: get_opt_str(row, 9)?,
        response_time_ms: get_opt_i64(row, 10)?.map(|v| v as u64),
        error: get_opt_str(row, 11)?,
        created_at: get_datetime(row, 12)?,
    })
}
