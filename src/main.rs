use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use fleet_intake::channels::{MailboxAdapter, MockAdapter, VendorApiAdapter};
use fleet_intake::config::IntakeConfig;
use fleet_intake::extract::extract_text;
use fleet_intake::fleet::{Company, CompanySelector, FleetDirectory};
use fleet_intake::parsers::Dialect;
use fleet_intake::pipeline::{ChannelSource, IntakeScheduler, Reconciler};
use fleet_intake::store::{AttachmentStore, LibSqlBackend};

const USAGE: &str = "usage: fleet-intake [once | parse <file> [generic|vendor]]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None | Some("run") => run_daemon().await,
        Some("once") => run_once().await,
        Some("parse") => {
            let file = args.get(1).context(USAGE)?;
            let dialect = match args.get(2) {
                Some(name) => name.parse::<Dialect>()?,
                None => Dialect::default(),
            };
            parse_file(Path::new(file), dialect).await
        }
        Some("-h" | "--help" | "help") => {
            println!("{USAGE}");
            Ok(())
        }
        Some(other) => bail!("unknown command '{other}'\n{USAGE}"),
    }
}

async fn run_daemon() -> anyhow::Result<()> {
    let config = IntakeConfig::from_env()?;
    let scheduler = build_scheduler(&config).await?;

    let handle = scheduler.start();
    eprintln!("   Press Ctrl-C to stop.\n");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    eprintln!("Shutting down, waiting for running sweeps...");
    handle.shutdown();
    handle.join().await;
    Ok(())
}

async fn run_once() -> anyhow::Result<()> {
    let config = IntakeConfig::from_env()?;
    let scheduler = build_scheduler(&config).await?;

    for report in scheduler.run_once().await {
        match &report.aborted {
            None => println!(
                "{}: created={} skipped={} failed={}",
                report.channel, report.created, report.skipped, report.failed
            ),
            Some(reason) => println!(
                "{}: created={} skipped={} failed={} aborted: {reason}",
                report.channel, report.created, report.skipped, report.failed
            ),
        }
    }
    Ok(())
}

async fn parse_file(path: &Path, dialect: Dialect) -> anyhow::Result<()> {
    let is_pdf = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

    let text = if is_pdf {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        extract_text(&bytes)
    } else {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?
    };
    if text.trim().is_empty() {
        bail!("No text could be extracted from {}", path.display());
    }

    let parsed = dialect.parse(&text);
    println!("{}", serde_json::to_string_pretty(&parsed.to_json())?);
    Ok(())
}

async fn build_scheduler(config: &IntakeConfig) -> anyhow::Result<IntakeScheduler> {
    eprintln!("Fleet Intake v{}", env!("CARGO_PKG_VERSION"));

    let backend = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?,
    );
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   Documents: {}", config.storage_root.display());

    let mut sources = Vec::new();

    if let Some(mailbox) = &config.mailbox {
        let company = find_company(backend.as_ref(), &mailbox.company).await?;
        eprintln!(
            "   Mailbox: {}@{}/{} -> {}",
            mailbox.imap.username, mailbox.imap.host, mailbox.imap.folder, company.name
        );
        sources.push(
            ChannelSource::new(
                Arc::new(MailboxAdapter::new(mailbox.imap.clone())),
                company,
                mailbox.dialect,
            )
            .with_filter(mailbox.filter.clone()),
        );
    }

    if let Some(vendor) = &config.vendor_api {
        let company = find_company(backend.as_ref(), &vendor.company).await?;
        eprintln!("   Vendor API: {} -> {}", vendor.api.base_url, company.name);
        sources.push(
            ChannelSource::new(
                Arc::new(VendorApiAdapter::new(vendor.api.clone())?),
                company,
                vendor.dialect,
            )
            .with_filter(vendor.filter.clone()),
        );
    }

    if let Some(mock) = &config.mock {
        let company = find_company(backend.as_ref(), &mock.company).await?;
        eprintln!("   Mock inbox: {} -> {}", mock.dir.display(), company.name);
        sources.push(ChannelSource::new(
            Arc::new(MockAdapter::new(mock.dir.clone())),
            company,
            mock.dialect,
        ));
    }

    if sources.is_empty() {
        bail!("No intake channel configured. Set MAILBOX_IMAP_HOST, VENDOR_API_BASE_URL or MOCK_DIR.");
    }
    eprintln!("   Channels: {}", config.enabled_channels().join(", "));
    eprintln!(
        "   Vehicle fallback: {}",
        if config.resolve.allow_single_available_fallback {
            "single available vehicle"
        } else {
            "disabled"
        }
    );

    let reconciler = Arc::new(Reconciler::new(
        backend.clone(),
        backend,
        AttachmentStore::new(config.storage_root.clone()),
        config.resolve.clone(),
    ));
    Ok(IntakeScheduler::new(
        reconciler,
        sources,
        config.schedule.clone(),
    ))
}

async fn find_company(
    fleet: &dyn FleetDirectory,
    selector: &CompanySelector,
) -> anyhow::Result<Company> {
    fleet
        .get_company(selector)
        .await?
        .with_context(|| format!("Company '{selector}' not found"))
}
