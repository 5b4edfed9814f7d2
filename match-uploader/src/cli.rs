use std::path::PathBuf;

use anyhow::{Context, Error};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use match_common::identifier::IdentifierBuilder;
use match_common::normalize::parse_region;
use tracing::info;

use crate::brands::BrandRegistry;
use crate::config::{non_blank, Config};
use crate::error::ConfigError;
use crate::run::{MonitorSettings, RunOptions, UploadRun};
use crate::service::google_ads::{GoogleAdsClient, GoogleAdsSettings};
use crate::service::{NewUserList, UserListService};
use crate::source::file::CsvSource;
use crate::source::postgres::PostgresSource;
use crate::source::{CustomerSource, UploadMode};
use crate::tracking::{NoopRunRecorder, PostgresRunRecorder, RunRecorder};

#[derive(Parser, Debug)]
#[command(version, about = "Upload hashed customer data to Customer Match user lists", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Upload customers to the user list of a brand
    Upload(UploadArgs),
    /// List configured brands and their user lists
    ListBrands,
    /// List the CRM based user lists of the account
    ListUserLists,
    /// Create a contact info user list for a brand
    CreateBrandList {
        brand: String,
        #[arg(long)]
        description: Option<String>,
    },
}

#[derive(Args, Debug)]
pub struct UploadArgs {
    #[arg(long, value_enum, default_value_t = UploadMode::Delta)]
    pub mode: UploadMode,

    /// Only upload customers of this brand, to the brand's user list
    #[arg(long)]
    pub brand: Option<String>,

    /// Read customers from a CSV file instead of the database
    #[arg(long)]
    pub csv_file: Option<PathBuf>,

    /// Wait for the job to finish processing
    #[arg(long)]
    pub wait: bool,
}

impl Cli {
    /// Returns whether the command succeeded.
    pub async fn run(self, config: &Config) -> Result<bool, Error> {
        match self.command {
            Commands::Upload(args) => upload(config, args).await,
            Commands::ListBrands => {
                list_brands(config)?;
                Ok(true)
            }
            Commands::ListUserLists => {
                list_user_lists(config).await?;
                Ok(true)
            }
            Commands::CreateBrandList { brand, description } => {
                create_brand_list(config, &brand, description).await?;
                Ok(true)
            }
        }
    }
}

async fn connect(config: &Config) -> Result<GoogleAdsClient, Error> {
    let settings = GoogleAdsSettings::from_config(&config.google_ads)?;
    let client = GoogleAdsClient::connect(settings, config.request_timeout.0)
        .await
        .context("failed to connect to Google Ads")?;
    Ok(client)
}

async fn upload(config: &Config, args: UploadArgs) -> Result<bool, Error> {
    let registry = BrandRegistry::from_config(config)?;
    let target = registry.resolve(args.brand.as_deref())?;
    let region = parse_region(&config.default_region).map_err(ConfigError::Region)?;
    let client = connect(config).await?;

    let mut source: Box<dyn CustomerSource>;
    let recorder: Box<dyn RunRecorder>;
    match &args.csv_file {
        Some(path) => {
            source = Box::new(CsvSource::open(path, config.fetch_page_size)?);
            recorder = Box::new(NoopRunRecorder);
        }
        None => {
            let url =
                non_blank(&config.database_url).ok_or(ConfigError::Missing("DATABASE_URL"))?;
            let postgres = PostgresSource::connect(
                url,
                config.max_pg_connections,
                args.mode,
                target.brand_filter.clone(),
                config.fetch_page_size,
            )
            .await?;
            recorder = Box::new(PostgresRunRecorder::new(postgres.pool().clone()));
            source = Box::new(postgres);
        }
    }

    let run = UploadRun::new(&client, recorder.as_ref())
        .identifier_builder(IdentifierBuilder::new(region))
        .retry_policy(config.retry_policy())
        .upload_settings(config.upload_settings())
        .monitor_settings(MonitorSettings {
            poll_interval: config.job_poll_interval.0,
            timeout: config.job_timeout.0,
        });

    let options = RunOptions {
        mode: args.mode,
        wait: args.wait,
    };
    let report = run.execute(&target, options, source.as_mut()).await?;

    info!(
        run_id = %report.run_id,
        job = ?report.upload.job.as_ref().map(ToString::to_string),
        batches = report.upload.batches.len(),
        batches_succeeded = report.upload.batches_succeeded(),
        monitor = ?report.monitor,
        success = report.success,
        "upload finished"
    );

    Ok(report.success)
}

fn list_brands(config: &Config) -> Result<(), Error> {
    let registry = BrandRegistry::from_config(config)?;

    if let Some(default) = registry.default_user_list_id() {
        println!("default: user list {default}");
    }
    for (brand, brand_config) in registry.brands() {
        match &brand_config.description {
            Some(description) => println!(
                "{brand}: user list {} ({description})",
                brand_config.user_list_id
            ),
            None => println!("{brand}: user list {}", brand_config.user_list_id),
        }
    }

    Ok(())
}

fn display_size(size: Option<u64>) -> String {
    size.map(|size| size.to_string())
        .unwrap_or_else(|| "unknown".to_owned())
}

async fn list_user_lists(config: &Config) -> Result<(), Error> {
    let client = connect(config).await?;
    let lists = client
        .list_user_lists()
        .await
        .context("failed to list user lists")?;

    for list in lists {
        println!("{} (ID: {})", list.name, list.id);
        if let Some(description) = &list.description {
            println!("    Description: {description}");
        }
        println!(
            "    Size: {} (display), {} (search)",
            display_size(list.size_for_display),
            display_size(list.size_for_search)
        );
        println!(
            "    Membership life span: {} days",
            display_size(list.membership_life_span)
        );
        println!("    Read-only: {}", list.read_only);
    }

    Ok(())
}

async fn create_brand_list(
    config: &Config,
    brand: &str,
    description: Option<String>,
) -> Result<(), Error> {
    let client = connect(config).await?;
    let list = NewUserList::for_brand(brand, description, Utc::now().date_naive());

    let id = client
        .create_user_list(&list)
        .await
        .with_context(|| format!("failed to create user list for brand {brand}"))?;

    info!(brand, %id, name = %list.name, "created user list");
    println!("{id}");
    println!(
        "Set {}_USER_LIST={id} to upload {brand} customers to it",
        brand.trim().to_uppercase()
    );

    Ok(())
}
