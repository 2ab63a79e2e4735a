//! Schema bootstrap. Every `CREATE TABLE` is `IF NOT EXISTS` so this runs
//! safely on every process start; `ALTER TABLE` repairs run best-effort and
//! ignore "duplicate column" errors, which is libSQL's only signal that a
//! prior run already applied them.

use anyhow::{Context, Result};
use libsql::Connection;
use tracing::{debug, instrument, warn};

const TABLES: &[(&str, &str)] = &[
    ("partners", r#"
        CREATE TABLE IF NOT EXISTS partners (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            slug TEXT NOT NULL UNIQUE,
            type TEXT NOT NULL,
            plan TEXT NOT NULL,
            max_organizations INTEGER,
            max_devices INTEGER,
            settings TEXT NOT NULL DEFAULT '{}',
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
            deleted_at TEXT
        );
    "#),
    ("organizations", r#"
        CREATE TABLE IF NOT EXISTS organizations (
            id TEXT PRIMARY KEY,
            partner_id TEXT NOT NULL REFERENCES partners(id),
            name TEXT NOT NULL,
            slug TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'trial',
            max_devices INTEGER,
            contract_start TEXT,
            contract_end TEXT,
            expired_cert_policy TEXT NOT NULL DEFAULT 'reissue',
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
            deleted_at TEXT,
            UNIQUE(partner_id, slug)
        );
    "#),
    ("sites", r#"
        CREATE TABLE IF NOT EXISTS sites (
            id TEXT PRIMARY KEY,
            org_id TEXT NOT NULL REFERENCES organizations(id),
            name TEXT NOT NULL,
            timezone TEXT NOT NULL,
            address TEXT,
            contact TEXT,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
            deleted_at TEXT
        );
    "#),
    ("device_groups", r#"
        CREATE TABLE IF NOT EXISTS device_groups (
            id TEXT PRIMARY KEY,
            org_id TEXT NOT NULL REFERENCES organizations(id),
            site_id TEXT REFERENCES sites(id),
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            rule_expression TEXT,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
            deleted_at TEXT
        );
    "#),
    ("devices", r#"
        CREATE TABLE IF NOT EXISTS devices (
            id TEXT PRIMARY KEY,
            org_id TEXT NOT NULL REFERENCES organizations(id),
            site_id TEXT NOT NULL REFERENCES sites(id),
            agent_id TEXT NOT NULL UNIQUE,
            hostname TEXT NOT NULL,
            display_name TEXT NOT NULL,
            os_type TEXT NOT NULL,
            os_version TEXT NOT NULL,
            architecture TEXT NOT NULL,
            agent_version TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'offline',
            agent_token_hash TEXT NOT NULL,
            last_seen_at TEXT,
            enrolled_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
            tags TEXT NOT NULL DEFAULT '[]',
            cert_serial TEXT,
            cert_external_id TEXT,
            cert_issued_at TEXT,
            cert_expires_at TEXT,
            deleted_at TEXT
        );
    "#),
    ("device_hardware", r#"
        CREATE TABLE IF NOT EXISTS device_hardware (
            device_id TEXT PRIMARY KEY REFERENCES devices(id),
            cpu_model TEXT,
            cpu_cores INTEGER,
            memory_total_bytes INTEGER,
            disk_total_bytes INTEGER,
            collected_at TEXT NOT NULL
        );
    "#),
    ("device_network_interfaces", r#"
        CREATE TABLE IF NOT EXISTS device_network_interfaces (
            id TEXT PRIMARY KEY,
            device_id TEXT NOT NULL REFERENCES devices(id),
            name TEXT NOT NULL,
            mac_address TEXT,
            ip_addresses TEXT NOT NULL DEFAULT '[]'
        );
    "#),
    ("device_software", r#"
        CREATE TABLE IF NOT EXISTS device_software (
            id TEXT PRIMARY KEY,
            device_id TEXT NOT NULL REFERENCES devices(id),
            name TEXT NOT NULL,
            version TEXT NOT NULL,
            installed_at TEXT
        );
    "#),
    ("users", r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            password_hash TEXT,
            mfa_secret_encrypted TEXT,
            mfa_enabled INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'invited',
            last_login_at TEXT,
            password_changed_at TEXT,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
            deleted_at TEXT
        );
    "#),
    ("system_admins", r#"
        CREATE TABLE IF NOT EXISTS system_admins (
            user_id TEXT PRIMARY KEY REFERENCES users(id),
            role_id TEXT NOT NULL REFERENCES roles(id)
        );
    "#),
    ("roles", r#"
        CREATE TABLE IF NOT EXISTS roles (
            id TEXT PRIMARY KEY,
            partner_id TEXT REFERENCES partners(id),
            org_id TEXT REFERENCES organizations(id),
            scope TEXT NOT NULL,
            name TEXT NOT NULL,
            is_system INTEGER NOT NULL DEFAULT 0,
            permissions TEXT NOT NULL DEFAULT '[]'
        );
    "#),
    ("partner_users", r#"
        CREATE TABLE IF NOT EXISTS partner_users (
            partner_id TEXT NOT NULL REFERENCES partners(id),
            user_id TEXT NOT NULL REFERENCES users(id),
            role_id TEXT NOT NULL REFERENCES roles(id),
            org_access TEXT NOT NULL DEFAULT 'none',
            org_ids TEXT,
            PRIMARY KEY (partner_id, user_id)
        );
    "#),
    ("organization_users", r#"
        CREATE TABLE IF NOT EXISTS organization_users (
            org_id TEXT NOT NULL REFERENCES organizations(id),
            user_id TEXT NOT NULL REFERENCES users(id),
            role_id TEXT NOT NULL REFERENCES roles(id),
            site_ids TEXT,
            device_group_ids TEXT,
            PRIMARY KEY (org_id, user_id)
        );
    "#),
    ("sessions", r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id),
            token_hash TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            ip TEXT,
            user_agent TEXT,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
        );
    "#),
    ("api_keys", r#"
        CREATE TABLE IF NOT EXISTS api_keys (
            id TEXT PRIMARY KEY,
            org_id TEXT REFERENCES organizations(id),
            partner_id TEXT REFERENCES partners(id),
            user_id TEXT NOT NULL REFERENCES users(id),
            name TEXT NOT NULL,
            key_prefix TEXT NOT NULL,
            key_hash TEXT NOT NULL,
            scopes TEXT NOT NULL DEFAULT '[]',
            rate_limit INTEGER,
            expires_at TEXT,
            last_used_at TEXT,
            usage_count INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
        );
    "#),
    ("device_commands", r#"
        CREATE TABLE IF NOT EXISTS device_commands (
            id TEXT PRIMARY KEY,
            device_id TEXT NOT NULL REFERENCES devices(id),
            org_id TEXT NOT NULL REFERENCES organizations(id),
            type TEXT NOT NULL,
            payload TEXT NOT NULL DEFAULT '{}',
            status TEXT NOT NULL DEFAULT 'pending',
            exit_code INTEGER,
            stdout TEXT,
            stderr TEXT,
            issued_by TEXT NOT NULL,
            issued_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
            started_at TEXT,
            completed_at TEXT,
            expires_at TEXT NOT NULL,
            result_attempt INTEGER
        );
    "#),
    ("jobs", r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            event_id TEXT NOT NULL,
            payload TEXT NOT NULL DEFAULT '{}',
            status TEXT NOT NULL DEFAULT 'pending',
            attempts INTEGER NOT NULL DEFAULT 0,
            leased_until TEXT,
            next_retry_at TEXT,
            last_error TEXT,
            scheduled_for TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
            completed_at TEXT,
            UNIQUE(kind, event_id)
        );
    "#),
    ("job_results", r#"
        CREATE TABLE IF NOT EXISTS job_results (
            id TEXT PRIMARY KEY,
            job_id TEXT NOT NULL REFERENCES jobs(id),
            org_id TEXT NOT NULL REFERENCES organizations(id),
            device_id TEXT NOT NULL REFERENCES devices(id),
            command_id TEXT REFERENCES device_commands(id),
            status TEXT NOT NULL DEFAULT 'pending',
            error TEXT,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
            completed_at TEXT,
            UNIQUE(job_id, device_id)
        );
    "#),
    ("fanout_completions", r#"
        CREATE TABLE IF NOT EXISTS fanout_completions (
            job_id TEXT PRIMARY KEY REFERENCES jobs(id),
            reported_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
        );
    "#),
    ("webhooks", r#"
        CREATE TABLE IF NOT EXISTS webhooks (
            id TEXT PRIMARY KEY,
            org_id TEXT NOT NULL REFERENCES organizations(id),
            url TEXT NOT NULL,
            secret TEXT NOT NULL,
            events TEXT NOT NULL DEFAULT '[]',
            headers TEXT NOT NULL DEFAULT '{}',
            status TEXT NOT NULL DEFAULT 'active',
            max_retries INTEGER NOT NULL DEFAULT 5,
            backoff_multiplier REAL NOT NULL DEFAULT 2.0,
            initial_delay_ms INTEGER NOT NULL DEFAULT 1000,
            max_delay_ms INTEGER NOT NULL DEFAULT 900000,
            success_count INTEGER NOT NULL DEFAULT 0,
            failure_count INTEGER NOT NULL DEFAULT 0,
            last_delivery_at TEXT,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
            deleted_at TEXT
        );
    "#),
    ("webhook_deliveries", r#"
        CREATE TABLE IF NOT EXISTS webhook_deliveries (
            id TEXT PRIMARY KEY,
            webhook_id TEXT NOT NULL REFERENCES webhooks(id),
            event_type TEXT NOT NULL,
            event_id TEXT NOT NULL,
            payload TEXT NOT NULL DEFAULT '{}',
            status TEXT NOT NULL DEFAULT 'pending',
            attempts INTEGER NOT NULL DEFAULT 0,
            next_retry_at TEXT,
            response_status INTEGER,
            response_body TEXT,
            response_time_ms INTEGER,
            error TEXT,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
            UNIQUE(webhook_id, event_id)
        );
    "#),
    ("alert_rules", r#"
        CREATE TABLE IF NOT EXISTS alert_rules (
            id TEXT PRIMARY KEY,
            org_id TEXT NOT NULL REFERENCES organizations(id),
            name TEXT NOT NULL,
            severity TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            targets TEXT NOT NULL DEFAULT '{}',
            conditions TEXT NOT NULL DEFAULT '[]',
            cooldown_minutes INTEGER NOT NULL DEFAULT 15,
            escalation_policy_id TEXT,
            notification_channel_ids TEXT NOT NULL DEFAULT '[]',
            auto_resolve INTEGER NOT NULL DEFAULT 1,
            deleted_at TEXT
        );
    "#),
    ("alerts", r#"
        CREATE TABLE IF NOT EXISTS alerts (
            id TEXT PRIMARY KEY,
            rule_id TEXT NOT NULL REFERENCES alert_rules(id),
            org_id TEXT NOT NULL REFERENCES organizations(id),
            device_id TEXT NOT NULL REFERENCES devices(id),
            severity TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            title TEXT NOT NULL,
            message TEXT NOT NULL,
            context TEXT NOT NULL DEFAULT '{}',
            triggered_at TEXT NOT NULL,
            last_seen_at TEXT NOT NULL,
            acknowledged_at TEXT,
            acknowledged_by TEXT,
            resolved_at TEXT,
            resolved_by TEXT
        );
    "#),
    ("notification_channels", r#"
        CREATE TABLE IF NOT EXISTS notification_channels (
            id TEXT PRIMARY KEY,
            org_id TEXT NOT NULL REFERENCES organizations(id),
            type TEXT NOT NULL,
            config TEXT NOT NULL DEFAULT '{}',
            enabled INTEGER NOT NULL DEFAULT 1,
            deleted_at TEXT
        );
    "#),
    ("escalation_policies", r#"
        CREATE TABLE IF NOT EXISTS escalation_policies (
            id TEXT PRIMARY KEY,
            org_id TEXT NOT NULL REFERENCES organizations(id),
            name TEXT NOT NULL,
            steps TEXT NOT NULL DEFAULT '[]'
        );
    "#),
    ("remote_sessions", r#"
        CREATE TABLE IF NOT EXISTS remote_sessions (
            id TEXT PRIMARY KEY,
            device_id TEXT NOT NULL REFERENCES devices(id),
            user_id TEXT NOT NULL REFERENCES users(id),
            org_id TEXT NOT NULL REFERENCES organizations(id),
            type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            offer TEXT,
            answer TEXT,
            ice_candidates TEXT NOT NULL DEFAULT '[]',
            started_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
            ended_at TEXT,
            last_activity_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
            bytes_transferred INTEGER NOT NULL DEFAULT 0
        );
    "#),
    ("file_transfers", r#"
        CREATE TABLE IF NOT EXISTS file_transfers (
            id TEXT PRIMARY KEY,
            session_id TEXT REFERENCES remote_sessions(id),
            device_id TEXT NOT NULL REFERENCES devices(id),
            user_id TEXT NOT NULL REFERENCES users(id),
            direction TEXT NOT NULL,
            remote_path TEXT NOT NULL,
            size INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'pending',
            progress_percent INTEGER NOT NULL DEFAULT 0
        );
    "#),
    ("enrollment_keys", r#"
        CREATE TABLE IF NOT EXISTS enrollment_keys (
            id TEXT PRIMARY KEY,
            org_id TEXT NOT NULL REFERENCES organizations(id),
            site_id TEXT NOT NULL REFERENCES sites(id),
            key_hash TEXT NOT NULL UNIQUE,
            max_uses INTEGER,
            use_count INTEGER NOT NULL DEFAULT 0,
            expires_at TEXT,
            revoked_at TEXT,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
        );
    "#),
    ("audit_log", r#"
        CREATE TABLE IF NOT EXISTS audit_log (
            id TEXT PRIMARY KEY,
            org_id TEXT,
            timestamp TEXT NOT NULL,
            actor_type TEXT NOT NULL,
            actor_id TEXT NOT NULL,
            actor_email TEXT,
            action TEXT NOT NULL,
            resource_type TEXT NOT NULL,
            resource_id TEXT,
            resource_name TEXT,
            details TEXT NOT NULL DEFAULT '{}',
            ip TEXT,
            user_agent TEXT,
            result TEXT NOT NULL,
            checksum TEXT NOT NULL
        );
    "#),
];

const INDEXES: &[(&str, &str)] = &[
    ("idx_organizations_partner", "CREATE INDEX IF NOT EXISTS idx_organizations_partner ON organizations(partner_id);"),
    ("idx_sites_org", "CREATE INDEX IF NOT EXISTS idx_sites_org ON sites(org_id);"),
    ("idx_devices_org", "CREATE INDEX IF NOT EXISTS idx_devices_org ON devices(org_id);"),
    ("idx_devices_agent_id", "CREATE INDEX IF NOT EXISTS idx_devices_agent_id ON devices(agent_id);"),
    ("idx_device_commands_device", "CREATE INDEX IF NOT EXISTS idx_device_commands_device ON device_commands(device_id, status);"),
    ("idx_jobs_dequeue", "CREATE INDEX IF NOT EXISTS idx_jobs_dequeue ON jobs(kind, status, scheduled_for);"),
    ("idx_job_results_job", "CREATE INDEX IF NOT EXISTS idx_job_results_job ON job_results(job_id, status);"),
    ("idx_webhook_deliveries_webhook", "CREATE INDEX IF NOT EXISTS idx_webhook_deliveries_webhook ON webhook_deliveries(webhook_id);"),
    ("idx_alerts_rule_device", "CREATE INDEX IF NOT EXISTS idx_alerts_rule_device ON alerts(rule_id, device_id, status);"),
    ("idx_remote_sessions_device", "CREATE INDEX IF NOT EXISTS idx_remote_sessions_device ON remote_sessions(device_id);"),
    ("idx_audit_log_org", "CREATE INDEX IF NOT EXISTS idx_audit_log_org ON audit_log(org_id, timestamp);"),
    ("idx_api_keys_prefix", "CREATE INDEX IF NOT EXISTS idx_api_keys_prefix ON api_keys(key_prefix);"),
];

#[instrument(skip_all)]
pub async fn apply_schema(conn: &Connection) -> Result<()> {
    for (name, sql) in TABLES {
        conn.execute(sql, ())
            .await
            .with_context(|| format!("creating table {name}"))?;
    }
    for (name, sql) in INDEXES {
        conn.execute(sql, ())
            .await
            .with_context(|| format!("creating index {name}"))?;
    }
    debug!("schema bootstrap applied ({} tables, {} indexes)", TABLES.len(), INDEXES.len());
    Ok(())
}

/// Best-effort `ALTER TABLE` repairs for columns added after a table's
/// original creation. Each entry is idempotent: a "duplicate column name"
/// error means a prior run already applied it.
const EVOLUTIONS: &[(&str, &str)] = &[];

pub async fn apply_evolutions(conn: &Connection) -> Result<()> {
    for (name, sql) in EVOLUTIONS {
        match conn.execute(sql, ()).await {
            Ok(_) => debug!("applied evolution {name}"),
            Err(e) if e.to_string().contains("duplicate column name") => {
                debug!("evolution {name} already applied");
            }
            Err(e) => warn!("evolution {name} failed: {e}"),
        }
    }
    Ok(())
}
