use std::fs;
use std::io::{self, Read};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use page_dom::Document;
use podlabel::runtime::{BackgroundService, ServiceHandle};
use podlabel::{
    Cli, Command, Matcher, PageAgent, RuntimeMessage, Services, Settings, StartOutcome,
    TriggerPanel,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    podlabel::telemetry::init();
    let cli = Cli::parse();
    let settings = cli.settings().context("invalid configuration")?;

    match cli.command {
        Command::Refresh => refresh(&settings).await,
        Command::Status => status(&settings).await,
        Command::Check { urls } => check(&settings, &urls).await,
        Command::Annotate { url, input } => annotate(&settings, &url, input.as_deref()).await,
        Command::Serve { duration_secs } => podlabel::run_service(
            &settings,
            duration_secs.map(Duration::from_secs),
        )
        .await
        .context("background service failed"),
    }
}

/// Background service running on the current task set for one command.
struct Background {
    handle: ServiceHandle,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Background {
    fn spawn(services: &Services, settings: &Settings) -> Self {
        let (service, handle) =
            BackgroundService::new(services.fetcher.clone(), settings.refresh_interval());
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(service.serve_until(async {
            let _ = stopped.await;
        }));
        Self { handle, stop, task }
    }

    async fn shutdown(self) {
        let _ = self.stop.send(());
        if let Err(err) = self.task.await {
            warn!(error = %err, "background service task ended abnormally");
        }
    }
}

async fn refresh(settings: &Settings) -> Result<()> {
    let services = Services::from_settings(settings).context("failed to build HTTP client")?;
    let mut panel = TriggerPanel::open(&services.cache)
        .await
        .context("failed to read cache")?;
    let background = Background::spawn(&services, settings);

    panel.begin_refresh();
    let result = background.handle.send(RuntimeMessage::UpdateList).await;
    let succeeded = matches!(&result, Ok(response) if response.success);
    panel.finish_refresh(result, &services.cache).await;
    background.shutdown().await;

    print!("{}", panel.render());
    if !succeeded {
        bail!("{}", panel.status());
    }
    Ok(())
}

async fn status(settings: &Settings) -> Result<()> {
    let services = Services::from_settings(settings).context("failed to build HTTP client")?;
    let panel = TriggerPanel::open(&services.cache)
        .await
        .context("failed to read cache")?;
    let entries = services
        .cache
        .load_entries()
        .await
        .context("failed to read cache")?
        .unwrap_or_default();
    print!("{}", panel.render());
    println!("Cached entries: {}", entries.len());
    Ok(())
}

async fn check(settings: &Settings, urls: &[String]) -> Result<()> {
    let services = Services::from_settings(settings).context("failed to build HTTP client")?;
    let entries = services
        .cache
        .load_entries()
        .await
        .context("failed to read cache")?;
    let Some(entries) = entries else {
        bail!("no cached list; run `podlabel refresh` first");
    };
    let matcher = Matcher::new(&entries);
    for url in urls {
        match matcher.matching_entry(url) {
            Some(entry) => println!("{url}\tlisted\t{entry}"),
            None => println!("{url}\tnot listed"),
        }
    }
    Ok(())
}

async fn annotate(settings: &Settings, url: &str, input: Option<&str>) -> Result<()> {
    let html = match input {
        None | Some("-") => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read stdin")?;
            buf
        }
        Some(path) => fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?,
    };

    if !settings.page_pattern().matches(url) {
        warn!(
            url,
            pattern = %settings.page_pattern(),
            "page outside the match pattern, leaving it unchanged"
        );
        print!("{html}");
        return Ok(());
    }

    let services = Services::from_settings(settings).context("failed to build HTTP client")?;
    let background = Background::spawn(&services, settings);
    let document = Document::parse(&html).with_location(url);
    let Some(mut agent) = PageAgent::attach(
        document,
        settings.page_pattern(),
        services.cache.clone(),
        background.handle.clone(),
        &services.bus,
    ) else {
        bail!("page agent refused to attach to {url}");
    };

    let outcome = agent.start().await.context("failed to read cache")?;
    if outcome == StartOutcome::UpdateRequested {
        let wait = settings.request_timeout() + Duration::from_secs(1);
        match tokio::time::timeout(wait, agent.next_message()).await {
            Ok(result) => {
                result.context("failed to reload the list")?;
            }
            Err(_) => warn!("no list arrived in time, page left unlabeled"),
        }
    }
    while agent.flush().is_some() {}
    background.shutdown().await;

    let labels = podlabel::badge_count(agent.document());
    info!(labels, "annotated page");
    println!("{}", agent.document().html());
    Ok(())
}
