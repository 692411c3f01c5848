// Copyright 2026 PubCrawl Contributors
// SPDX-License-Identifier: MIT

mod output;

use anyhow::{bail, Result};
use clap::{CommandFactory, Parser};
use clap_complete::Shell;
use output::OutputFormat;
use pubcrawl::driver::chromium::ChromiumLauncher;
use pubcrawl::{
    CaptureSession, LaunchOptions, NavigationOptions, ScreenSize, SessionConfig, SessionError,
    WaitUntil,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"Example url-patterns:
  "api/v1"                 - Matches any URL containing this substring
  "\.json$"                - Matches URLs ending with .json
  "^https://api\."         - Matches URLs starting with https://api.
  "api/(v1|v2)/data"       - Matches api/v1/data or api/v2/data
  "users/\d+"              - Matches 'users' followed by one or more digits

Example usage:
  pubcrawl https://example.com "api/v1" --debug
  pubcrawl https://example.com ".*" --include-binary --content-limit 50000
  pubcrawl https://example.com "api/v1" --output-file data.csv --output-format csv
  pubcrawl https://example.com ".*" | jq -c '.responses[] | {url: .matched_url, status: .status, ip: .server_ip}'"#;

#[derive(Parser, Debug)]
#[command(
    name = "pubcrawl",
    about = "PubCrawl: capture the network responses of a JavaScript-driven page",
    version,
    after_help = AFTER_HELP
)]
struct Cli {
    /// Entry URL to scrape
    url: Option<String>,

    /// Regular expression matched against response URLs
    url_pattern: Option<String>,

    // ── Browser ──
    /// User agent string (default: the browser's own)
    #[arg(long, help_heading = "Browser Configuration")]
    user_agent: Option<String>,

    /// Screen size as WIDTHxHEIGHT
    #[arg(long, default_value = "1440x900", help_heading = "Browser Configuration")]
    screen_size: String,

    /// Proxy server (e.g. socks5://127.0.0.1:9150)
    #[arg(long, help_heading = "Browser Configuration")]
    proxy: Option<String>,

    /// Path to the Chrome/Chromium binary (also PUBCRAWL_CHROMIUM_PATH)
    #[arg(long, help_heading = "Browser Configuration")]
    chromium_path: Option<PathBuf>,

    // ── Scraping ──
    /// Page load timeout in milliseconds
    #[arg(long, default_value = "20000", help_heading = "Scraping Behavior")]
    timeout: u64,

    /// Maximum navigation attempts
    #[arg(long, default_value = "3", value_parser = clap::value_parser!(u32).range(1..), help_heading = "Scraping Behavior")]
    retries: u32,

    /// Comma-separated wait conditions: domcontentloaded, load, networkidle, commit
    #[arg(long, default_value = "networkidle", help_heading = "Scraping Behavior")]
    wait_until: String,

    /// Seconds to wait after page load (default: random 0.7-1.3)
    #[arg(long, help_heading = "Scraping Behavior")]
    post_response_wait: Option<f64>,

    /// Maximum bytes kept per response; 0 keeps the full body
    #[arg(long, default_value = "256", help_heading = "Scraping Behavior")]
    content_limit: usize,

    /// Include binary content (images, fonts, etc.)
    #[arg(long, help_heading = "Scraping Behavior")]
    include_binary: bool,

    // ── Output ──
    /// Write the report here instead of stdout
    #[arg(long, help_heading = "Output Options")]
    output_file: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Json, help_heading = "Output Options")]
    output_format: OutputFormat,

    /// Include HTTP response headers
    #[arg(long, help_heading = "Output Options")]
    include_headers: bool,

    /// Include TLS security details
    #[arg(long, help_heading = "Output Options")]
    include_tls: bool,

    // ── Misc ──
    /// Headful browser with devtools, debug logging
    #[arg(long, help_heading = "Miscellaneous")]
    debug: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", help_heading = "Miscellaneous")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, help_heading = "Miscellaneous")]
    log_json: bool,

    /// Print shell completions and exit
    #[arg(long, value_name = "SHELL", help_heading = "Miscellaneous")]
    completions: Option<Shell>,
}

impl Cli {
    fn session_config(&self, url: &str, pattern: &str) -> Result<SessionConfig> {
        let screen_size: ScreenSize = self.screen_size.parse()?;
        let post_load_delay = match self.post_response_wait {
            Some(secs) if secs.is_finite() && secs >= 0.0 => Some(Duration::from_secs_f64(secs)),
            Some(secs) => bail!("invalid --post-response-wait: {secs}"),
            None => None,
        };

        Ok(SessionConfig {
            url: url.to_string(),
            url_pattern: pattern.to_string(),
            navigation: NavigationOptions {
                timeout: Duration::from_millis(self.timeout),
                max_retries: self.retries,
                wait_until: WaitUntil::parse_list(&self.wait_until),
                post_load_delay,
            },
            content_limit: self.content_limit,
            include_binary: self.include_binary,
            include_headers: self.include_headers,
            include_tls: self.include_tls,
            launch: LaunchOptions {
                user_agent: self.user_agent.clone(),
                screen_size,
                proxy: self.proxy.clone(),
                debug: self.debug,
                chromium_path: self.chromium_path.clone(),
            },
        })
    }
}

fn init_tracing(cli: &Cli) {
    let level = if cli.debug { "debug" } else { cli.log_level.as_str() };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,pubcrawl={level}")));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cli.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: Cli) -> Result<()> {
    let (Some(url), Some(pattern)) = (cli.url.as_deref(), cli.url_pattern.as_deref()) else {
        bail!("URL and URL pattern are required. Use --help for usage information.");
    };
    let config = cli.session_config(url, pattern)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nProcess interrupted by user. Cleaning up...");
            on_interrupt.cancel();
        }
    });

    let mut session = CaptureSession::new(config)?;
    let report = session.run(&ChromiumLauncher, cancel).await?;

    output::emit(&report, cli.output_format, cli.output_file.as_deref())?;
    eprintln!("{}", output::error_summary(&report.metadata.error_summary));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(shell) = cli.completions {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "pubcrawl", &mut std::io::stdout());
        return Ok(());
    }

    init_tracing(&cli);

    // Consistent exit codes: 0=success, 1=error, 130=interrupted
    if let Err(e) = run(cli).await {
        let interrupted = matches!(
            e.downcast_ref::<SessionError>(),
            Some(SessionError::Interrupted)
        );
        if interrupted {
            std::process::exit(130);
        }
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
