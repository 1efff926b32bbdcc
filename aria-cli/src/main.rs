//! `aria` - terminal launcher for ARIA live voice calls.
//!
//! ```bash
//! # Call the agent named in .env / ARIA_AGENT_ID
//! aria call
//!
//! # Pick devices and boost a quiet microphone
//! aria call --input-device "USB" --gain 2.0
//!
//! # List audio devices
//! aria devices
//! ```

mod cli;
mod config;
mod console;
mod telemetry;

use anyhow::Result;
use aria_voice::device::list_devices;
use aria_voice::{LeadPayload, LeadWebhook};
use clap::Parser;
use cli::{Cli, Commands, LeadArgs};

#[tokio::main]
async fn main() -> Result<()> {
    if let Ok(path) = dotenvy::dotenv() {
        eprintln!("Loaded config from: {}", path.display());
    }

    let cli = Cli::parse();
    telemetry::init(cli.log.as_deref());

    match cli.command {
        Commands::Call(args) => console::run_call(args).await,
        Commands::Devices { json } => print_devices(json),
        Commands::Lead(args) => submit_lead(args).await,
    }
}

fn print_devices(json: bool) -> Result<()> {
    let devices = list_devices()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    for (title, input) in [("Input devices", true), ("Output devices", false)] {
        println!("{}:", title);
        for device in devices.iter().filter(|d| d.is_input == input) {
            let rate = device.sample_rate.map(|r| format!("{} Hz", r)).unwrap_or_else(|| "?".into());
            let channels = device.channels.map(|c| c.to_string()).unwrap_or_else(|| "?".into());
            let marker = if device.is_default { "*" } else { " " };
            println!("  {} {} ({}, {} ch)", marker, device.name, rate, channels);
        }
    }
    Ok(())
}

async fn submit_lead(args: LeadArgs) -> Result<()> {
    let webhook = match args.webhook {
        Some(url) => LeadWebhook::new(Some(url)),
        None => LeadWebhook::from_env(),
    };

    let mut lead = LeadPayload::new(args.first_name, args.last_name, args.email, args.phone)
        .with_business_type(args.business_type)
        .with_source_page(args.source_page)
        .with_consent(args.consent_email, args.consent_sms);
    for tag in args.tags {
        lead = lead.with_tag(tag);
    }
    if let Some(plan) = args.plan {
        lead = lead.with_selected_plan(plan);
    }

    if webhook.is_simulated() {
        println!("No webhook configured; simulating submission:");
        println!("{}", serde_json::to_string_pretty(&lead)?);
    }

    if !webhook.push(&lead).await {
        anyhow::bail!("lead submission failed");
    }
    println!("Lead submitted.");
    Ok(())
}
