//! # Google Ads
//!
//! `MatchingService` and `UserListService` backed by the Google Ads REST API.
//! Jobs are `OfflineUserDataJob`s of type `CUSTOMER_MATCH_USER_LIST`; status and user lists
//! are read through `googleAds:search` queries.
use std::time;

use async_trait::async_trait;
use match_common::identifier::Identifier;
use match_common::record::MatchRecord;
use reqwest::StatusCode;
use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{
    AddOperationsResponse, JobHandle, JobStatus, MatchingService, NewUserList, PartialFailure,
    UserListService, UserListSummary,
};
use crate::config::{non_blank, GoogleAdsConfig};
use crate::error::{ConfigError, ServiceError};

const CONCURRENT_MODIFICATION: &str = "CONCURRENT_MODIFICATION";
const JOB_TYPE: &str = "CUSTOMER_MATCH_USER_LIST";
const UPLOAD_KEY_TYPE: &str = "CONTACT_INFO";

/// OAuth client able to exchange its refresh token for a new access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    pub token_url: String,
}

impl OAuthClient {
    pub async fn exchange(&self, client: &reqwest::Client) -> Result<String, ServiceError> {
        refresh_access_token(
            client,
            &self.token_url,
            &self.client_id,
            &self.client_secret,
            &self.refresh_token,
        )
        .await
    }
}

/// At least one of the two is set. Without `oauth` an expired token cannot be renewed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: Option<String>,
    pub oauth: Option<OAuthClient>,
}

/// Validated connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleAdsSettings {
    pub api_url: String,
    pub api_version: String,
    pub customer_id: String,
    pub login_customer_id: Option<String>,
    pub developer_token: String,
    pub credentials: Credentials,
}

/// Customer ids are often written as `123-456-7890`. The API only takes digits.
fn customer_id_digits(id: &str) -> String {
    id.chars().filter(char::is_ascii_digit).collect()
}

impl GoogleAdsSettings {
    pub fn from_config(config: &GoogleAdsConfig) -> Result<Self, ConfigError> {
        let customer_id = non_blank(&config.customer_id)
            .ok_or(ConfigError::Missing("GOOGLE_ADS_CUSTOMER_ID"))?;
        let developer_token = non_blank(&config.developer_token)
            .ok_or(ConfigError::Missing("GOOGLE_ADS_DEVELOPER_TOKEN"))?;

        let oauth = match (
            non_blank(&config.client_id),
            non_blank(&config.client_secret),
            non_blank(&config.refresh_token),
        ) {
            (Some(client_id), Some(client_secret), Some(refresh_token)) => Some(OAuthClient {
                client_id: client_id.to_owned(),
                client_secret: client_secret.to_owned(),
                refresh_token: refresh_token.to_owned(),
                token_url: config.token_url.clone(),
            }),
            _ => None,
        };
        let access_token = non_blank(&config.access_token).map(str::to_owned);

        if access_token.is_none() && oauth.is_none() {
            return Err(ConfigError::Missing(
                "GOOGLE_ADS_ACCESS_TOKEN or GOOGLE_ADS_CLIENT_ID, GOOGLE_ADS_CLIENT_SECRET and GOOGLE_ADS_REFRESH_TOKEN",
            ));
        }

        Ok(Self {
            api_url: config.api_url.trim_end_matches('/').to_owned(),
            api_version: config.api_version.clone(),
            customer_id: customer_id_digits(customer_id),
            login_customer_id: non_blank(&config.login_customer_id).map(customer_id_digits),
            developer_token: developer_token.to_owned(),
            credentials: Credentials {
                access_token,
                oauth,
            },
        })
    }
}

pub struct GoogleAdsClient {
    client: reqwest::Client,
    base_url: String,
    customer_id: String,
    login_customer_id: Option<String>,
    developer_token: String,
    access_token: RwLock<String>,
    oauth: Option<OAuthClient>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateJobRequest {
    job: OfflineUserDataJob,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OfflineUserDataJob {
    #[serde(rename = "type")]
    job_type: &'static str,
    customer_match_user_list_metadata: CustomerMatchUserListMetadata,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CustomerMatchUserListMetadata {
    user_list: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceResponse {
    resource_name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AddOperationsRequest<'a> {
    enable_partial_failure: bool,
    operations: Vec<UserDataOperation<'a>>,
}

#[derive(Serialize)]
struct UserDataOperation<'a> {
    create: UserData<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UserData<'a> {
    user_identifiers: &'a [Identifier],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddOperationsResponseBody {
    #[serde(default)]
    partial_failure_error: Option<StatusBody>,
}

#[derive(Deserialize)]
struct StatusBody {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: StatusBody,
}

#[derive(Serialize)]
struct SearchRequest {
    query: String,
}

#[derive(Deserialize)]
struct SearchResponse<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobRow {
    offline_user_data_job: JobStatusBody,
}

#[derive(Deserialize)]
struct JobStatusBody {
    #[serde(default)]
    status: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserListRow {
    user_list: UserListBody,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserListBody {
    #[serde(deserialize_with = "int64_string")]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, deserialize_with = "int64")]
    size_for_display: Option<u64>,
    #[serde(default, deserialize_with = "int64")]
    size_for_search: Option<u64>,
    #[serde(default, deserialize_with = "int64")]
    membership_life_span: Option<u64>,
    #[serde(default)]
    read_only: bool,
}

#[derive(Serialize)]
struct MutateUserListsRequest {
    operations: Vec<UserListOperation>,
}

#[derive(Serialize)]
struct UserListOperation {
    create: UserListCreate,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UserListCreate {
    name: String,
    description: String,
    membership_life_span: String,
    crm_based_user_list: CrmBasedUserList,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CrmBasedUserList {
    upload_key_type: &'static str,
}

#[derive(Deserialize)]
struct MutateResponse {
    #[serde(default = "Vec::new")]
    results: Vec<ResourceResponse>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// int64 fields travel as JSON strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum Int64 {
    Number(u64),
    Text(String),
}

fn int64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Int64>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Int64::Number(value)) => Ok(Some(value)),
        Some(Int64::Text(value)) => value.parse().map(Some).map_err(de::Error::custom),
    }
}

fn int64_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Int64::deserialize(deserializer)? {
        Int64::Number(value) => Ok(value.to_string()),
        Int64::Text(value) => Ok(value),
    }
}

fn parse_status(status: &str) -> JobStatus {
    match status {
        "PENDING" => JobStatus::Pending,
        "RUNNING" => JobStatus::Running,
        "SUCCESS" => JobStatus::Success,
        "FAILED" => JobStatus::Failed,
        "CANCELLED" | "CANCELED" => JobStatus::Cancelled,
        _ => JobStatus::Unknown,
    }
}

/// Map a non-2xx response to a `ServiceError`. Concurrent modification is recognized
/// anywhere in the body since it shows up as a nested error code.
fn api_error(status: u16, body: &str) -> ServiceError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .map(|response| response.error.message)
        .unwrap_or_else(|_| body.to_owned());

    if body.contains(CONCURRENT_MODIFICATION) {
        ServiceError::ConcurrentModification(message)
    } else if status == 401 {
        ServiceError::Auth(message)
    } else {
        ServiceError::Api { status, message }
    }
}

/// Exchange a refresh token for an access token.
pub async fn refresh_access_token(
    client: &reqwest::Client,
    token_url: &str,
    client_id: &str,
    client_secret: &str,
    refresh_token: &str,
) -> Result<String, ServiceError> {
    let response = client
        .post(token_url)
        .form(&[
            ("grant_type", "refresh_token"),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("refresh_token", refresh_token),
        ])
        .send()
        .await?;

    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ServiceError::Auth(format!(
            "token refresh failed with status {}: {}",
            status.as_u16(),
            body
        )));
    }

    let token: TokenResponse = serde_json::from_str(&body)
        .map_err(|error| ServiceError::UnexpectedResponse(error.to_string()))?;
    Ok(token.access_token)
}

impl GoogleAdsClient {
    /// Build the HTTP client and obtain an access token.
    pub async fn connect(
        settings: GoogleAdsSettings,
        timeout: time::Duration,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        let Credentials {
            access_token,
            oauth,
        } = settings.credentials;

        let access_token = match (access_token, &oauth) {
            (Some(token), _) => token,
            (None, Some(oauth)) => {
                let token = oauth.exchange(&client).await?;
                info!("obtained Google Ads access token from refresh token");
                token
            }
            (None, None) => {
                return Err(ServiceError::Auth("no access token or refresh token".to_owned()))
            }
        };

        Ok(Self {
            client,
            base_url: format!("{}/{}", settings.api_url, settings.api_version),
            customer_id: settings.customer_id,
            login_customer_id: settings.login_customer_id,
            developer_token: settings.developer_token,
            access_token: RwLock::new(access_token),
            oauth,
        })
    }

    fn user_list_resource(&self, user_list_id: &str) -> String {
        format!("customers/{}/userLists/{}", self.customer_id, user_list_id)
    }

    async fn send<B>(
        &self,
        url: &str,
        body: &B,
        access_token: &str,
    ) -> Result<(StatusCode, String), ServiceError>
    where
        B: Serialize + ?Sized,
    {
        let mut request = self
            .client
            .post(url)
            .bearer_auth(access_token)
            .header("developer-token", &self.developer_token)
            .json(body);
        if let Some(login_customer_id) = &self.login_customer_id {
            request = request.header("login-customer-id", login_customer_id);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        debug!(%url, status = status.as_u16(), "Google Ads response");

        Ok((status, text))
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ServiceError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, path);
        let token = self.access_token.read().await.clone();
        let (mut status, mut text) = self.send(&url, body, &token).await?;

        // Tokens expire after about an hour. Exchange once and repeat the request.
        if status == StatusCode::UNAUTHORIZED {
            if let Some(oauth) = &self.oauth {
                info!("access token was rejected, refreshing it");
                let token = oauth.exchange(&self.client).await?;
                *self.access_token.write().await = token.clone();
                (status, text) = self.send(&url, body, &token).await?;
            }
        }

        if !status.is_success() {
            return Err(api_error(status.as_u16(), &text));
        }

        let text = if text.trim().is_empty() { "null" } else { text.as_str() };
        serde_json::from_str(text).map_err(|error| ServiceError::UnexpectedResponse(error.to_string()))
    }

    async fn search<T: DeserializeOwned>(&self, query: String) -> Result<Vec<T>, ServiceError> {
        let path = format!("customers/{}/googleAds:search", self.customer_id);
        let response: SearchResponse<T> = self.post(&path, &SearchRequest { query }).await?;
        Ok(response.results)
    }
}

#[async_trait]
impl MatchingService for GoogleAdsClient {
    async fn create_job(&self, user_list_id: &str) -> Result<JobHandle, ServiceError> {
        let path = format!("customers/{}/offlineUserDataJobs:create", self.customer_id);
        let request = CreateJobRequest {
            job: OfflineUserDataJob {
                job_type: JOB_TYPE,
                customer_match_user_list_metadata: CustomerMatchUserListMetadata {
                    user_list: self.user_list_resource(user_list_id),
                },
            },
        };

        let response: ResourceResponse = self.post(&path, &request).await?;
        Ok(JobHandle::new(response.resource_name))
    }

    async fn add_operations(
        &self,
        job: &JobHandle,
        batch: &[MatchRecord],
        partial_failure_enabled: bool,
    ) -> Result<AddOperationsResponse, ServiceError> {
        let path = format!("{}:addOperations", job.resource_name());
        let request = AddOperationsRequest {
            enable_partial_failure: partial_failure_enabled,
            operations: batch
                .iter()
                .map(|record| UserDataOperation {
                    create: UserData {
                        user_identifiers: record.identifiers(),
                    },
                })
                .collect(),
        };

        let response: Option<AddOperationsResponseBody> = self.post(&path, &request).await?;
        let partial_failure = response
            .and_then(|body| body.partial_failure_error)
            .filter(|status| status.code != 0)
            .map(|status| PartialFailure {
                code: status.code,
                message: status.message,
            });

        Ok(AddOperationsResponse { partial_failure })
    }

    async fn run_job(&self, job: &JobHandle) -> Result<(), ServiceError> {
        let path = format!("{}:run", job.resource_name());
        let operation: serde_json::Value = self.post(&path, &serde_json::json!({})).await?;
        debug!(job = %job, ?operation, "job run requested");
        Ok(())
    }

    async fn get_job_status(&self, job: &JobHandle) -> Result<JobStatus, ServiceError> {
        let query = format!(
            "SELECT offline_user_data_job.resource_name, offline_user_data_job.status \
             FROM offline_user_data_job \
             WHERE offline_user_data_job.resource_name = '{}'",
            job.resource_name()
        );

        let rows: Vec<JobRow> = self.search(query).await?;
        let row = rows.into_iter().next().ok_or_else(|| {
            ServiceError::UnexpectedResponse(format!("job {} not found", job.resource_name()))
        })?;

        Ok(parse_status(&row.offline_user_data_job.status))
    }
}

#[async_trait]
impl UserListService for GoogleAdsClient {
    async fn list_user_lists(&self) -> Result<Vec<UserListSummary>, ServiceError> {
        let query = "SELECT user_list.id, user_list.name, user_list.description, \
                     user_list.size_for_display, user_list.size_for_search, \
                     user_list.membership_life_span, user_list.read_only \
                     FROM user_list \
                     WHERE user_list.type = 'CRM_BASED'"
            .to_owned();

        let rows: Vec<UserListRow> = self.search(query).await?;
        Ok(rows
            .into_iter()
            .map(|row| UserListSummary {
                id: row.user_list.id,
                name: row.user_list.name,
                description: row.user_list.description,
                size_for_display: row.user_list.size_for_display,
                size_for_search: row.user_list.size_for_search,
                membership_life_span: row.user_list.membership_life_span,
                read_only: row.user_list.read_only,
            })
            .collect())
    }

    async fn create_user_list(&self, list: &NewUserList) -> Result<String, ServiceError> {
        let path = format!("customers/{}/userLists:mutate", self.customer_id);
        let request = MutateUserListsRequest {
            operations: vec![UserListOperation {
                create: UserListCreate {
                    name: list.name.clone(),
                    description: list.description.clone(),
                    membership_life_span: list.membership_life_span_days.to_string(),
                    crm_based_user_list: CrmBasedUserList {
                        upload_key_type: UPLOAD_KEY_TYPE,
                    },
                },
            }],
        };

        let response: MutateResponse = self.post(&path, &request).await?;
        let resource_name = response
            .results
            .into_iter()
            .next()
            .map(|result| result.resource_name)
            .ok_or_else(|| ServiceError::UnexpectedResponse("no user list created".to_owned()))?;

        resource_name
            .rsplit('/')
            .next()
            .filter(|id| !id.is_empty())
            .map(str::to_owned)
            .ok_or(ServiceError::UnexpectedResponse(resource_name.clone()))
    }
}
