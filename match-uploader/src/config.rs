use std::str::FromStr;
use std::time;

use envconfig::Envconfig;
use match_common::retry::RetryPolicy;

use crate::uploader::UploadSettings;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(nested = true)]
    pub google_ads: GoogleAdsConfig,

    #[envconfig(from = "DEFAULT_USER_LIST_ID")]
    pub default_user_list_id: Option<String>,

    #[envconfig(from = "API_BATCH_SIZE", default = "2500")]
    pub batch_size: usize,

    #[envconfig(from = "FETCH_PAGE_SIZE", default = "10000")]
    pub fetch_page_size: usize,

    #[envconfig(from = "API_RATE_LIMIT_DELAY", default = "500")]
    pub rate_limit_delay: EnvMsDuration,

    #[envconfig(nested = true)]
    pub retry_policy: RetryPolicyConfig,

    #[envconfig(default = "US")]
    pub default_region: String,

    #[envconfig(default = "true")]
    pub partial_failure_enabled: bool,

    #[envconfig(default = "10000")]
    pub job_poll_interval: EnvMsDuration,

    #[envconfig(default = "300000")]
    pub job_timeout: EnvMsDuration,

    pub database_url: Option<String>,

    #[envconfig(default = "5")]
    pub max_pg_connections: u32,

    pub brands_file: Option<String>,

    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    pub metrics_port: Option<u16>,

    #[envconfig(default = "30000")]
    pub request_timeout: EnvMsDuration,
}

impl Config {
    /// Produce a host:port address for the metrics endpoint, if one is configured.
    pub fn metrics_bind(&self) -> Option<String> {
        self.metrics_port
            .map(|port| format!("{}:{}", self.host, port))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::build(
            self.retry_policy.backoff_coefficient,
            self.retry_policy.initial_interval.0,
        )
        .max_attempts(self.retry_policy.max_attempts)
        .maximum_interval(self.retry_policy.maximum_interval.0)
        .jitter(self.retry_policy.jitter.0)
        .provide()
    }

    pub fn upload_settings(&self) -> UploadSettings {
        UploadSettings {
            batch_size: self.batch_size,
            rate_limit_delay: self.rate_limit_delay.0,
            partial_failure_enabled: self.partial_failure_enabled,
        }
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct GoogleAdsConfig {
    #[envconfig(from = "GOOGLE_ADS_API_URL", default = "https://googleads.googleapis.com")]
    pub api_url: String,

    #[envconfig(from = "GOOGLE_ADS_API_VERSION", default = "v17")]
    pub api_version: String,

    #[envconfig(from = "GOOGLE_ADS_CUSTOMER_ID")]
    pub customer_id: Option<String>,

    #[envconfig(from = "GOOGLE_ADS_LOGIN_CUSTOMER_ID")]
    pub login_customer_id: Option<String>,

    #[envconfig(from = "GOOGLE_ADS_DEVELOPER_TOKEN")]
    pub developer_token: Option<String>,

    #[envconfig(from = "GOOGLE_ADS_ACCESS_TOKEN")]
    pub access_token: Option<String>,

    #[envconfig(from = "GOOGLE_ADS_CLIENT_ID")]
    pub client_id: Option<String>,

    #[envconfig(from = "GOOGLE_ADS_CLIENT_SECRET")]
    pub client_secret: Option<String>,

    #[envconfig(from = "GOOGLE_ADS_REFRESH_TOKEN")]
    pub refresh_token: Option<String>,

    #[envconfig(
        from = "GOOGLE_OAUTH_TOKEN_URL",
        default = "https://oauth2.googleapis.com/token"
    )]
    pub token_url: String,
}

#[derive(Envconfig, Clone, Debug)]
pub struct RetryPolicyConfig {
    #[envconfig(from = "API_RETRY_COUNT", default = "3")]
    pub max_attempts: u32,

    #[envconfig(from = "API_RETRY_BACKOFF_COEFFICIENT", default = "2")]
    pub backoff_coefficient: u32,

    #[envconfig(from = "API_RETRY_INITIAL_INTERVAL", default = "1000")]
    pub initial_interval: EnvMsDuration,

    #[envconfig(from = "API_RETRY_MAXIMUM_INTERVAL", default = "60000")]
    pub maximum_interval: EnvMsDuration,

    #[envconfig(from = "API_RETRY_JITTER", default = "1000")]
    pub jitter: EnvMsDuration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

/// A variable that is set but blank counts as unset.
pub fn non_blank(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}
