//! Lead-capture webhook client.
//!
//! Delivery is best effort. Nothing here can fail a call: `push` reports success
//! as a boolean and `push_detached` does not report at all.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable holding the webhook URL.
pub const LEAD_WEBHOOK_ENV: &str = "ARIA_LEAD_WEBHOOK_URL";

/// Contact details submitted from a lead form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadPayload {
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// Contact email.
    pub email: String,
    /// Contact phone number.
    pub phone: String,
    /// Kind of business the lead runs.
    pub business_type: String,
    /// Page the form was submitted from.
    pub source_page: String,
    /// Submission time.
    pub timestamp: DateTime<Utc>,
    /// Opted in to email follow-up.
    pub consent_email: bool,
    /// Opted in to SMS follow-up.
    #[serde(rename = "consentSMS")]
    pub consent_sms: bool,
    /// CRM tags.
    pub tags: Vec<String>,
    /// Plan picked on the form, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_plan: Option<String>,
}

impl LeadPayload {
    /// Create a payload stamped with the current time.
    pub fn new(
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        email: impl Into<String>,
        phone: impl Into<String>,
    ) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            email: email.into(),
            phone: phone.into(),
            business_type: String::new(),
            source_page: String::new(),
            timestamp: Utc::now(),
            consent_email: false,
            consent_sms: false,
            tags: Vec::new(),
            selected_plan: None,
        }
    }

    /// Set the business type.
    pub fn with_business_type(mut self, business_type: impl Into<String>) -> Self {
        self.business_type = business_type.into();
        self
    }

    /// Set the source page.
    pub fn with_source_page(mut self, page: impl Into<String>) -> Self {
        self.source_page = page.into();
        self
    }

    /// Record marketing consent.
    pub fn with_consent(mut self, email: bool, sms: bool) -> Self {
        self.consent_email = email;
        self.consent_sms = sms;
        self
    }

    /// Add a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Set the selected plan.
    pub fn with_selected_plan(mut self, plan: impl Into<String>) -> Self {
        self.selected_plan = Some(plan.into());
        self
    }
}

/// Posts leads to a CRM webhook.
#[derive(Debug, Clone)]
pub struct LeadWebhook {
    url: Option<String>,
    client: reqwest::Client,
}

impl LeadWebhook {
    /// Create a client. With no URL the client runs in simulation mode.
    pub fn new(url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { url: url.filter(|u| !u.trim().is_empty()), client }
    }

    /// Read the URL from `ARIA_LEAD_WEBHOOK_URL`.
    pub fn from_env() -> Self {
        Self::new(std::env::var(LEAD_WEBHOOK_ENV).ok())
    }

    /// Whether leads are only logged, not sent.
    pub fn is_simulated(&self) -> bool {
        self.url.is_none()
    }

    /// Deliver a lead. Returns whether the webhook accepted it.
    pub async fn push(&self, lead: &LeadPayload) -> bool {
        let Some(url) = &self.url else {
            tracing::info!(email = %lead.email, source_page = %lead.source_page, "no lead webhook configured, simulating delivery");
            return true;
        };

        match self.client.post(url).json(lead).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::info!(email = %lead.email, "lead delivered");
                true
            }
            Ok(response) => {
                tracing::warn!(status = %response.status(), "lead webhook rejected payload");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "lead webhook unreachable");
                false
            }
        }
    }

    /// Deliver a lead in the background.
    pub fn push_detached(&self, lead: LeadPayload) -> tokio::task::JoinHandle<bool> {
        let webhook = self.clone();
        tokio::spawn(async move { webhook.push(&lead).await })
    }
}
