//! Alert rules, fired alerts, notification channels, escalation policies.

use breeze_domain_models::alert::{
    Alert, AlertRule, AlertStatus, AlertTarget, EscalationPolicy, NotificationChannel,
    NotificationChannelType, Severity,
};
use chrono::{DateTime, Utc};
use libsql::params;
use tracing::instrument;
use uuid::Uuid;

use crate::client::DbClient;
use crate::errors::DbError;
use crate::rowext::{get_bool, get_datetime, get_json, get_opt_datetime, get_opt_uuid, get_str, get_uuid, to_json};

#[derive(Clone)]
pub struct AlertRepository {
    db: DbClient,
}

const RULE_COLUMNS: &str = "id, org_id, name, severity, enabled, targets, conditions, cooldown_minutes, escalation_policy_id, notification_channel_ids, auto_resolve";
const ALERT_COLUMNS: &str = "id, rule_id, org_id, device_id, severity, status, title, message, context, triggered_at, last_seen_at, acknowledged_at, acknowledged_by, resolved_at, resolved_by";

impl AlertRepository {
    pub fn new(db: DbClient) -> Self {
        Self { db }
    }

    #[instrument(skip(self, rule))]
    pub async fn create_rule(&self, rule: &AlertRule) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO alert_rules (id, org_id, name, severity, enabled, targets, conditions, cooldown_minutes, escalation_policy_id, notification_channel_ids, auto_resolve)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                rule.id.to_string(),
                rule.org_id.to_string(),
                rule.name.clone(),
                to_json(&rule.severity),
                rule.enabled as i64,
                to_json(&rule.targets),
                to_json(&rule.conditions),
                rule.cooldown_minutes,
                rule.escalation_policy_id.map(|v| v.to_string()),
                to_json(&rule.notification_channel_ids),
                rule.auto_resolve as i64,
            ],
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn list_enabled_rules_for_org(&self, org_id: Uuid) -> Result<Vec<AlertRule>, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(
                &format!("SELECT {RULE_COLUMNS} FROM alert_rules WHERE org_id = ?1 AND enabled = 1 AND deleted_at IS NULL"),
                params![org_id.to_string()],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(map_rule(&row)?);
        }
        Ok(out)
    }

    /// Every rule for an org regardless of `enabled`, for the CRUD listing
    /// endpoint; the evaluator uses `list_enabled_rules_for_org` instead.
    #[instrument(skip(self))]
    pub async fn list_rules_for_org(&self, org_id: Uuid) -> Result<Vec<AlertRule>, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(&format!("SELECT {RULE_COLUMNS} FROM alert_rules WHERE org_id = ?1 AND deleted_at IS NULL"), params![org_id.to_string()])
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(map_rule(&row)?);
        }
        Ok(out)
    }

    #[instrument(skip(self))]
    pub async fn get_rule(&self, id: Uuid) -> Result<AlertRule, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(&format!("SELECT {RULE_COLUMNS} FROM alert_rules WHERE id = ?1 AND deleted_at IS NULL"), params![id.to_string()])
            .await?;
        let row = rows.next().await?.ok_or(DbError::NotFound)?;
        map_rule(&row)
    }

    #[instrument(skip(self))]
    pub async fn set_rule_enabled(&self, id: Uuid, enabled: bool) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        let affected = conn
            .execute("UPDATE alert_rules SET enabled = ?1 WHERE id = ?2 AND deleted_at IS NULL", params![enabled as i64, id.to_string()])
            .await?;
        if affected == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete_rule(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        let affected = conn
            .execute("UPDATE alert_rules SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL", params![at.to_rfc3339(), id.to_string()])
            .await?;
        if affected == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn list_alerts_for_org(&self, org_id: Uuid) -> Result<Vec<Alert>, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(&format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE org_id = ?1 ORDER BY triggered_at DESC"), params![org_id.to_string()])
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(map_alert(&row)?);
        }
        Ok(out)
    }

    /// Every alert still open anywhere in the system, for the escalation
    /// sweep — unlike `list_alerts_for_org` this isn't scoped to a tenant,
    /// since the sweep itself runs with no request-bound `AuthContext`.
    #[instrument(skip(self))]
    pub async fn list_active(&self) -> Result<Vec<Alert>, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(&format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE status IN ('active', 'acknowledged')"), params![])
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(map_alert(&row)?);
        }
        Ok(out)
    }

    #[instrument(skip(self))]
    pub async fn get_alert(&self, id: Uuid) -> Result<Alert, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn.query(&format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = ?1"), params![id.to_string()]).await?;
        let row = rows.next().await?.ok_or(DbError::NotFound)?;
        map_alert(&row)
    }

    #[instrument(skip(self))]
    pub async fn list_channels_for_org(&self, org_id: Uuid) -> Result<Vec<NotificationChannel>, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(
                "SELECT id, org_id, type, config, enabled FROM notification_channels WHERE org_id = ?1 AND deleted_at IS NULL",
                params![org_id.to_string()],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(NotificationChannel {
                id: get_uuid(&row, 0)?,
                org_id: get_uuid(&row, 1)?,
                kind: get_json::<NotificationChannelType>(&row, 2)?,
                config: get_json(&row, 3)?,
                enabled: get_bool(&row, 4)?,
                deleted_at: None,
            });
        }
        Ok(out)
    }

    #[instrument(skip(self))]
    pub async fn list_policies_for_org(&self, org_id: Uuid) -> Result<Vec<EscalationPolicy>, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query("SELECT id, org_id, name, steps FROM escalation_policies WHERE org_id = ?1", params![org_id.to_string()])
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(EscalationPolicy {
                id: get_uuid(&row, 0)?,
                org_id: get_uuid(&row, 1)?,
                name: get_str(&row, 2)?,
                steps: get_json(&row, 3)?,
            });
        }
        Ok(out)
    }

    #[instrument(skip(self, alert))]
    pub async fn create_alert(&self, alert: &Alert) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO alerts (id, rule_id, org_id, device_id, severity, status, title, message, context, triggered_at, last_seen_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                alert.id.to_string(),
                alert.rule_id.to_string(),
                alert.org_id.to_string(),
                alert.device_id.to_string(),
                to_json(&alert.severity),
                to_json(&alert.status),
                alert.title.clone(),
                alert.message.clone(),
                alert.context.to_string(),
                alert.triggered_at.to_rfc3339(),
                alert.last_seen_at.to_rfc3339(),
            ],
        )
        .await?;
        Ok(())
    }

    /// The most recent active (or, for cooldown checks, most recently
    /// resolved) alert for `(rule_id, device_id)` — the unit the dedup
    /// decision in `breeze_domain_alerts::dedup` is keyed on.
    #[instrument(skip(self))]
    pub async fn find_active(&self, rule_id: Uuid, device_id: Uuid) -> Result<Option<Alert>, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(
                &format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE rule_id = ?1 AND device_id = ?2 AND status != 'resolved' ORDER BY triggered_at DESC LIMIT 1"),
                params![rule_id.to_string(), device_id.to_string()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(map_alert(&row)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    pub async fn find_last_resolved(&self, rule_id: Uuid, device_id: Uuid) -> Result<Option<Alert>, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query(
                &format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE rule_id = ?1 AND device_id = ?2 AND status = 'resolved' ORDER BY resolved_at DESC LIMIT 1"),
                params![rule_id.to_string(), device_id.to_string()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(map_alert(&row)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    pub async fn touch_last_seen(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        conn.execute("UPDATE alerts SET last_seen_at = ?1 WHERE id = ?2", params![at.to_rfc3339(), id.to_string()]).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn transition(&self, id: Uuid, status: AlertStatus, actor: Option<Uuid>, at: DateTime<Utc>) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        let affected = match status {
            AlertStatus::Acknowledged => {
                conn.execute(
                    "UPDATE alerts SET status = 'acknowledged', acknowledged_at = ?1, acknowledged_by = ?2 WHERE id = ?3",
                    params![at.to_rfc3339(), actor.map(|v| v.to_string()), id.to_string()],
                )
                .await?
            }
            AlertStatus::Resolved => {
                conn.execute(
                    "UPDATE alerts SET status = 'resolved', resolved_at = ?1, resolved_by = ?2 WHERE id = ?3",
                    params![at.to_rfc3339(), actor.map(|v| v.to_string()), id.to_string()],
                )
                .await?
            }
            other => {
                conn.execute("UPDATE alerts SET status = ?1 WHERE id = ?2", params![to_json(&other), id.to_string()])
                    .await?
            }
        };
        if affected == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    #[instrument(skip(self, channel))]
    pub async fn create_channel(&self, channel: &NotificationChannel) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO notification_channels (id, org_id, type, config, enabled) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                channel.id.to_string(),
                channel.org_id.to_string(),
                to_json(&channel.kind),
                channel.config.to_string(),
                channel.enabled as i64,
            ],
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_channels(&self, ids: &[Uuid]) -> Result<Vec<NotificationChannel>, DbError> {
        let mut out = Vec::with_capacity(ids.len());
        let conn = self.db.conn()?;
        for id in ids {
            let mut rows = conn
                .query(
                    "SELECT id, org_id, type, config, enabled FROM notification_channels WHERE id = ?1 AND enabled = 1 AND deleted_at IS NULL",
                    params![id.to_string()],
                )
                .await?;
            if let Some(row) = rows.next().await? {
                out.push(NotificationChannel {
                    id: get_uuid(&row, 0)?,
                    org_id: get_uuid(&row, 1)?,
                    kind: get_json::<NotificationChannelType>(&row, 2)?,
                    config: get_json(&row, 3)?,
                    enabled: get_bool(&row, 4)?,
                    deleted_at: None,
                });
            }
        }
        Ok(out)
    }

    #[instrument(skip(self, policy))]
    pub async fn create_escalation_policy(&self, policy: &EscalationPolicy) -> Result<(), DbError> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO escalation_policies (id, org_id, name, steps) VALUES (?1, ?2, ?3, ?4)",
            params![policy.id.to_string(), policy.org_id.to_string(), policy.name.clone(), to_json(&policy.steps)],
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_escalation_policy(&self, id: Uuid) -> Result<EscalationPolicy, DbError> {
        let conn = self.db.conn()?;
        let mut rows = conn
            .query("SELECT id, org_id, name, steps FROM escalation_policies WHERE id = ?1", params![id.to_string()])
            .await?;
        let row = rows.next().await?.ok_or(DbError::NotFound)?;
        Ok(EscalationPolicy {
            id: get_uuid(&row, 0)?,
            org_id: get_uuid(&row, 1)?,
            name: get_str(&row, 2)?,
            steps: get_json(&row, 3)?,
        })
    }
}

fn map_rule(row: &libsql::Row) -> Result<AlertRule, DbError> {
    Ok(AlertRule {
        id: get_uuid(row, 0)?,
        org_id: get_uuid(row, 1)?,
        name: get_str(row, 2)?,
        severity: get_json::<Severity>(row, 3)?,
        enabled: get_bool(row, 4)?,
        targets: get_json::<AlertTarget>(row, 5)?,
        conditions: get_json(row, 6)?,
        cooldown_minutes: row.get::<i64>(7).map_err(|e| DbError::Mapping(e.to_string()))? as u32,
        escalation_policy_id: get_opt_uuid(row, 8)?,
        notification_channel_ids: get_json(row, 9)?,
        auto_resolve: get_bool(row, 10)?,
        deleted_at: None,
    })
}

fn map_alert(row: &libsql::Row) -> Result<Alert, DbError> {
    Ok(Alert {
        id: get_uuid(row, 0)?,
        rule_id: get_uuid(row, 1)?,
        org_id: get_uuid(row, 2)?,
        device_id: get_uuid(row, 3)?,
        severity: get_json::<Severity>(row, 4)?,
        status: get_json::<AlertStatus>(row, 5)?,
        title: get_str(row, 6)?,
        message: get_str(row, 7)?,
        context: get_json(row, 8)?,
        triggered_at: get_datetime(row, 9)?,
        last_seen_at: get_datetime(row, 10)?,
        acknowledged_at: get_opt_datetime(row, 11)?,
        acknowledged_by: get_opt_uuid(row, 12)?,
        resolved_at: get_opt_datetime(row, 13)?,
        resolved_by: get_opt_uuid(row, 14)?,
    })
}
