use std::{collections::HashMap, fs, path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use commit::{CommitClient, CommitOptions, EnvToken, StaticToken, TokenChain};
use search::SearchController;
use shared::protocol::CommitRequest;
use store::HttpRecordStore;
use wizard::{catalog_steps, ClientCommitSink, NextOutcome, WizardOrchestrator};

mod config;

#[derive(Parser, Debug)]
#[command(name = "catalog", about = "Catalog flow engine driver")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// One-shot incremental search against the options collection.
    Search {
        filter: String,
        /// Number of additional pages to fetch after the first.
        #[arg(long, default_value_t = 0)]
        more: u32,
    },
    /// Commit a stanza file to the external system directly.
    Commit {
        stanza_file: PathBuf,
        #[arg(long)]
        index_name: String,
        #[arg(long)]
        author: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        branch: String,
    },
    /// Run the full wizard pipeline from a toml file of field values.
    Submit { fields_file: PathBuf },
}

fn commit_client(settings: &config::Settings) -> CommitClient {
    let mut chain = TokenChain::new();
    if let Some(form_key) = &settings.form_key {
        chain = chain.with(StaticToken::new(form_key.clone()));
    }
    chain = chain.with(EnvToken::new("CATALOG_FORM_KEY"));
    CommitClient::new(settings.base_url.clone(), Arc::new(chain))
}

fn commit_options(settings: &config::Settings) -> CommitOptions {
    CommitOptions {
        timeout: settings.commit_timeout,
        max_retries: settings.commit_max_retries,
        initial_backoff: settings.commit_initial_backoff,
        observer: Some(Box::new(|event| {
            tracing::debug!(?event, "commit attempt event");
        })),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let cli = Cli::parse();
    let settings = config::load_settings();

    match cli.command {
        Command::Search { filter, more } => {
            let mut store =
                HttpRecordStore::new(settings.base_url.clone(), settings.app.clone());
            if let Some(form_key) = &settings.form_key {
                store = store.with_form_key(form_key.clone());
            }
            let controller =
                SearchController::new(Arc::new(store), settings.search_collection.clone());

            let mut options = controller.fetch(&filter).await?;
            for _ in 0..more {
                options = controller.fetch_more().await?;
            }
            for option in &options {
                println!("{}\t{}", option.id.0, option.title);
            }
            println!(
                "showing {} of {} matching records",
                controller.get_current_count().await,
                controller.get_full_count().await
            );
        }
        Command::Commit {
            stanza_file,
            index_name,
            author,
            email,
            branch,
        } => {
            let stanza = fs::read_to_string(&stanza_file)
                .with_context(|| format!("failed to read {}", stanza_file.display()))?;
            let request = CommitRequest {
                index_name,
                stanza_content: stanza,
                author_name: author,
                author_email: email,
                branch,
                labels: vec!["index".into(), "catalog".into()],
            };

            let outcome = commit_client(&settings)
                .commit(&request, &commit_options(&settings))
                .await?;
            match outcome.reference {
                Some(reference) => println!(
                    "committed in {} attempt(s); merge request: {}",
                    outcome.attempts, reference.url
                ),
                None => println!(
                    "committed in {} attempt(s); no merge request URL returned",
                    outcome.attempts
                ),
            }
        }
        Command::Submit { fields_file } => {
            let raw = fs::read_to_string(&fields_file)
                .with_context(|| format!("failed to read {}", fields_file.display()))?;
            let field_values: HashMap<String, String> =
                toml::from_str(&raw).context("fields file must be key = \"value\" toml")?;

            let mut store =
                HttpRecordStore::new(settings.base_url.clone(), settings.app.clone());
            if let Some(form_key) = &settings.form_key {
                store = store.with_form_key(form_key.clone());
            }
            let sink = ClientCommitSink::new(commit_client(&settings), commit_options(&settings));
            let orchestrator = WizardOrchestrator::new(
                catalog_steps(),
                Arc::new(store),
                Arc::new(sink),
                settings.request_collection.clone(),
            );
            orchestrator.set_fields(field_values).await;

            loop {
                match orchestrator.next().await {
                    NextOutcome::Advanced(step) => {
                        tracing::info!(step, name = orchestrator.step_name().await, "step passed");
                    }
                    NextOutcome::Blocked(errors) => {
                        for (field, message) in &errors {
                            eprintln!("{field}: {message}");
                        }
                        bail!(
                            "step '{}' blocked submission",
                            orchestrator.step_name().await
                        );
                    }
                    NextOutcome::Submitted(outcome) => {
                        println!("{:?}: {}", outcome.status, outcome.message);
                        if let Some(reference) = outcome.reference {
                            println!("merge request: {}", reference.url);
                        }
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}
