//! HTTP delivery for outbound webhooks. DNS resolution and SSRF validation
//! happen on every hop, including redirects: each hop gets a freshly built
//! `reqwest::Client` pinned to the IP this module itself resolved and
//! checked, so a second DNS lookup inside `reqwest` can never substitute a
//! different (and unvalidated) address for the one that passed the guard.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use breeze_domain_models::webhook::{classify_status, DeliveryOutcome, Webhook};
use breeze_domain_webhook::ssrf::{self, MAX_REDIRECT_HOPS};
use reqwest::{redirect::Policy, Url};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::errors::QueueError;

pub struct DeliveryResult {
    pub outcome: DeliveryOutcome,
    pub response_status: Option<u16>,
    pub response_body: Option<String>,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

async fn resolve_one(host: &str, port: u16) -> Result<SocketAddr, QueueError> {
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|source| QueueError::Dns { host: host.to_string(), source })?;
    addrs.next().ok_or_else(|| QueueError::NoAddress(host.to_string()))
}

fn client_pinned_to(host: &str, addr: SocketAddr) -> Result<reqwest::Client, QueueError> {
    Ok(reqwest::Client::builder()
        .redirect(Policy::none())
        .resolve(host, addr)
        .timeout(Duration::from_secs(30))
        .build()?)
}

/// Sends the signed envelope, re-validating the SSRF guard on every redirect
/// hop, and classifies the terminal response into a retry decision. Never
/// returns `Err` for an ordinary HTTP failure response — only for transport,
/// DNS, or guard failures, which the caller treats as a permanent failure
/// for this attempt (the job retry loop still schedules a retry).
///
/// `event_type`/`delivery_id` are stamped onto every hop as `X-Breeze-Event`
/// and `X-Breeze-Delivery` so a receiver can dedup/route without parsing the
/// body first; `extra_headers` layers the caller's own configured headers
/// on top, last, so a webhook config can't clobber these two.
#[instrument(skip(webhook, raw_body), fields(webhook_id = %webhook.id))]
pub async fn deliver(webhook: &Webhook, event_type: &str, delivery_id: Uuid, raw_body: &[u8], extra_headers: &[(String, String)]) -> Result<DeliveryResult, QueueError> {
    let started = Instant::now();
    let signature = breeze_domain_webhook::sign(&webhook.secret, raw_body);

    let mut current_url = webhook.url.clone();
    let mut hop: u8 = 0;

    loop {
        ssrf::validate_scheme(&current_url)?;
        let parsed = Url::parse(&current_url).map_err(|_| QueueError::InvalidUrl(current_url.clone()))?;
        let host = parsed.host_str().ok_or_else(|| QueueError::InvalidUrl(current_url.clone()))?.to_string();
        let port = parsed.port_or_known_default().unwrap_or(443);

        let addr = resolve_one(&host, port).await?;
        ssrf::validate_redirect_hop(&current_url, addr.ip(), hop)?;

        let client = client_pinned_to(&host, addr)?;
        let mut request = client
            .post(&current_url)
            .header("X-Breeze-Signature", signature.as_str())
            .header("X-Breeze-Event", event_type)
            .header("X-Breeze-Delivery", delivery_id.to_string())
            .header("Content-Type", "application/json");
        for (name, value) in extra_headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request.body(raw_body.to_vec()).send().await?;

        let status = response.status();
        if status.is_redirection() {
            hop += 1;
            if hop > MAX_REDIRECT_HOPS {
                return Err(ssrf::SsrfViolation::TooManyRedirects.into());
            }
            let Some(location) = response.headers().get(reqwest::header::LOCATION).and_then(|v| v.to_str().ok()) else {
                return Ok(terminal(status.as_u16(), None, started));
            };
            let next = parsed.join(location).map_err(|_| QueueError::InvalidUrl(location.to_string()))?;
            current_url = next.to_string();
            continue;
        }

        let response_time_ms = started.elapsed().as_millis() as u64;
        let response_status = status.as_u16();
        let body_text = response.text().await.ok();
        let outcome = classify_status(response_status);
        if matches!(outcome, DeliveryOutcome::RetryableFailure | DeliveryOutcome::PermanentFailure) {
            warn!(response_status, "webhook delivery did not succeed");
        }
        return Ok(DeliveryResult {
            outcome,
            response_status: Some(response_status),
            response_body: body_text.map(|b| b.chars().take(4096).collect()),
            response_time_ms,
            error: None,
        });
    }
}

fn terminal(status: u16, body: Option<String>, started: Instant) -> DeliveryResult {
    DeliveryResult {
        outcome: classify_status(status),
        response_status: Some(status),
        response_body: body,
        response_time_ms: started.elapsed().as_millis() as u64,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ip_safety_matches_guard() {
        assert!(ssrf::is_forbidden_ip("127.0.0.1".parse().unwrap()));
        assert!(!ssrf::is_forbidden_ip("93.184.216.34".parse().unwrap()));
    }
}
