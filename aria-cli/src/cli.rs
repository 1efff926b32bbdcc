use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "aria")]
#[command(author, version, about = "ARIA live voice-call launcher", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log filter (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    pub log: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a live voice call with the agent
    Call(CallArgs),

    /// List audio input and output devices
    Devices {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Submit a lead to the configured webhook
    Lead(LeadArgs),
}

#[derive(Args, Debug, Default)]
pub struct CallArgs {
    /// Agent identifier (overrides ARIA_AGENT_ID)
    #[arg(short, long)]
    pub agent_id: Option<String>,

    /// Agent WebSocket URL (overrides ARIA_AGENT_URL)
    #[arg(long)]
    pub url: Option<String>,

    /// Microphone gain, 1.0 to 8.0 (overrides ARIA_INPUT_GAIN)
    #[arg(short, long)]
    pub gain: Option<f32>,

    /// Uplink sample rate in Hz, or 0 to send at the device rate
    #[arg(long)]
    pub wire_rate: Option<u32>,

    /// Capture strategy
    #[arg(long, value_enum)]
    pub strategy: Option<CliStrategy>,

    /// Input device (partial name match)
    #[arg(long)]
    pub input_device: Option<String>,

    /// Output device (partial name match)
    #[arg(long)]
    pub output_device: Option<String>,

    /// Start with the microphone muted
    #[arg(long)]
    pub muted: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliStrategy {
    /// Real-time tap when available, else re-blocking
    Auto,
    /// Forward device blocks as delivered
    Tap,
    /// Re-block to fixed-size frames
    Block,
}

impl From<CliStrategy> for aria_voice::StrategyPreference {
    fn from(cli: CliStrategy) -> Self {
        match cli {
            CliStrategy::Auto => Self::Auto,
            CliStrategy::Tap => Self::RealtimeTap,
            CliStrategy::Block => Self::BlockProcessor,
        }
    }
}

#[derive(Args, Debug)]
pub struct LeadArgs {
    #[arg(long)]
    pub first_name: String,

    #[arg(long)]
    pub last_name: String,

    #[arg(long)]
    pub email: String,

    #[arg(long)]
    pub phone: String,

    #[arg(long, default_value = "")]
    pub business_type: String,

    /// Page the lead came from
    #[arg(long, default_value = "cli")]
    pub source_page: String,

    /// Plan the lead selected, if any
    #[arg(long)]
    pub plan: Option<String>,

    /// Extra CRM tags (repeatable)
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    #[arg(long)]
    pub consent_email: bool,

    #[arg(long)]
    pub consent_sms: bool,

    /// Webhook URL (overrides ARIA_LEAD_WEBHOOK_URL)
    #[arg(long)]
    pub webhook: Option<String>,
}
