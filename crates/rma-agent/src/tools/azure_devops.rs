//! Azure DevOps REST functions for `AZURE_DEVOPS_AGENT`: project listing and
//! WIQL work-item queries.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

use super::{check_status, http_client, optional_u64, required_str, ToolProvider, ToolSpec};
use crate::{AgentError, Result};

pub const DEFAULT_BASE_URL: &str = "https://dev.azure.com";
const API_VERSION: &str = "7.1";
const DEFAULT_TOP: u64 = 50;
// the work items batch endpoint accepts at most 200 ids
const MAX_TOP: u64 = 200;
const WORK_ITEM_FIELDS: &str = "System.Id,System.Title,System.State,System.WorkItemType,\
System.AssignedTo,System.IterationPath,System.ChangedDate";

#[derive(Debug, Clone, PartialEq)]
pub struct AzureDevOpsSettings {
    /// Service root, normally [`DEFAULT_BASE_URL`].
    pub base_url: String,
    pub organization: String,
    /// Project WIQL queries are scoped to when the model does not name one.
    pub project: Option<String>,
    /// Personal access token.
    pub pat: String,
}

impl AzureDevOpsSettings {
    pub fn org_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(&self.organization)
        )
    }
}

pub struct AzureDevOpsTools {
    client: reqwest::Client,
    settings: AzureDevOpsSettings,
}

impl AzureDevOpsTools {
    pub fn new(settings: AzureDevOpsSettings, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            settings,
        })
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        // PATs authenticate as basic auth with an empty user name
        self.client
            .request(method, url)
            .basic_auth("", Some(&self.settings.pat))
    }

    async fn list_projects(&self) -> Result<Value> {
        let url = format!(
            "{}/_apis/projects?api-version={API_VERSION}",
            self.settings.org_url()
        );
        let resp = self.request(reqwest::Method::GET, url).send().await?;
        let found: Value = check_status(resp).await?.json().await?;
        let projects: Vec<Value> = found["value"]
            .as_array()
            .into_iter()
            .flatten()
            .map(|p| json!({ "id": p["id"], "name": p["name"], "state": p["state"] }))
            .collect();
        Ok(json!({ "projects": projects }))
    }

    async fn query_work_items(&self, args: &Value) -> Result<Value> {
        let wiql = required_str(args, "wiql")?;
        let top = optional_u64(args, "top", DEFAULT_TOP, MAX_TOP);
        let project = args
            .get("project")
            .and_then(Value::as_str)
            .filter(|p| !p.trim().is_empty())
            .or(self.settings.project.as_deref());

        let scope = match project {
            Some(p) => format!("{}/{}", self.settings.org_url(), urlencoding::encode(p)),
            None => self.settings.org_url(),
        };
        let url = format!("{scope}/_apis/wit/wiql?$top={top}&api-version={API_VERSION}");
        let resp = self
            .request(reqwest::Method::POST, url)
            .json(&json!({ "query": wiql }))
            .send()
            .await?;
        let matched: Value = check_status(resp).await?.json().await?;
        let ids: Vec<String> = matched["workItems"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|w| w["id"].as_u64())
            .take(top as usize)
            .map(|id| id.to_string())
            .collect();
        info!(project = project.unwrap_or("-"), count = ids.len(), "wiql query");
        if ids.is_empty() {
            return Ok(json!({ "count": 0, "work_items": [] }));
        }

        let url = format!(
            "{}/_apis/wit/workitems?ids={}&fields={WORK_ITEM_FIELDS}&api-version={API_VERSION}",
            self.settings.org_url(),
            ids.join(",")
        );
        let resp = self.request(reqwest::Method::GET, url).send().await?;
        let items: Value = check_status(resp).await?.json().await?;
        let work_items: Vec<Value> = items["value"]
            .as_array()
            .into_iter()
            .flatten()
            .map(summarize_work_item)
            .collect();
        Ok(json!({ "count": work_items.len(), "work_items": work_items }))
    }
}

fn summarize_work_item(item: &Value) -> Value {
    let fields = &item["fields"];
    let assigned_to = match &fields["System.AssignedTo"] {
        Value::Object(identity) => identity.get("displayName").cloned().unwrap_or(Value::Null),
        other => other.clone(),
    };
    json!({
        "id": item["id"],
        "title": fields["System.Title"],
        "state": fields["System.State"],
        "type": fields["System.WorkItemType"],
        "assigned_to": assigned_to,
        "iteration": fields["System.IterationPath"],
        "changed": fields["System.ChangedDate"],
    })
}

#[async_trait]
impl ToolProvider for AzureDevOpsTools {
    fn specs(&self) -> Vec<ToolSpec> {
        vec![
            ToolSpec {
                name: "list_projects",
                description: "List the Azure DevOps projects in the organization.",
                parameters: json!({ "type": "object", "properties": {} }),
            },
            ToolSpec {
                name: "query_work_items",
                description: "Run a WIQL query and return the matching work items.",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "wiql": {
                            "type": "string",
                            "description": "WIQL, e.g. SELECT [System.Id] FROM WorkItems WHERE [System.State] = 'Active'",
                        },
                        "project": { "type": "string", "description": "Project name; defaults to the configured project" },
                        "top": { "type": "integer", "description": "Result cap, default 50, at most 200" },
                    },
                    "required": ["wiql"],
                }),
            },
        ]
    }

    async fn call(&self, name: &str, args: &Value) -> Result<Value> {
        match name {
            "list_projects" => self.list_projects().await,
            "query_work_items" => self.query_work_items(args).await,
            other => Err(AgentError::UnknownTool(other.to_string())),
        }
    }
}
