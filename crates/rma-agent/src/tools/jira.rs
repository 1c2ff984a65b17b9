//! Jira REST v2 functions for `JIRA_AGENT`.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

use super::{check_status, http_client, optional_u64, required_str, ToolProvider, ToolSpec};
use crate::{AgentError, Result};

const SEARCH_FIELDS: &str = "summary,status,issuetype,priority,assignee,fixVersions,updated";
const DEFAULT_MAX_RESULTS: u64 = 50;
const MAX_RESULTS_LIMIT: u64 = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct JiraSettings {
    /// Server base URL, e.g. `https://jira.example.com`.
    pub endpoint: String,
    pub username: String,
    pub password: String,
}

pub struct JiraTools {
    client: reqwest::Client,
    settings: JiraSettings,
}

impl JiraTools {
    pub fn new(settings: JiraSettings, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            settings,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/rest/api/2/{path}", self.settings.endpoint.trim_end_matches('/'))
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(path))
            .basic_auth(&self.settings.username, Some(&self.settings.password))
    }

    async fn search_issues(&self, args: &Value) -> Result<Value> {
        let jql = required_str(args, "jql")?;
        let max_results = optional_u64(args, "max_results", DEFAULT_MAX_RESULTS, MAX_RESULTS_LIMIT);
        let body = json!({
            "jql": jql,
            "maxResults": max_results,
            "fields": SEARCH_FIELDS.split(',').collect::<Vec<_>>(),
        });
        let resp = self.request(reqwest::Method::POST, "search").json(&body).send().await?;
        let found: Value = check_status(resp).await?.json().await?;
        let issues: Vec<Value> = found["issues"]
            .as_array()
            .map(|issues| issues.iter().map(summarize_issue).collect())
            .unwrap_or_default();
        info!(jql, count = issues.len(), "jira search");
        Ok(json!({ "total": found["total"], "issues": issues }))
    }

    async fn create_issue(&self, args: &Value) -> Result<Value> {
        let body = json!({
            "fields": {
                "project": { "key": required_str(args, "project_key")? },
                "summary": required_str(args, "summary")?,
                "description": args.get("description").and_then(Value::as_str).unwrap_or(""),
                "issuetype": { "name": required_str(args, "issuetype")? },
            }
        });
        let resp = self.request(reqwest::Method::POST, "issue").json(&body).send().await?;
        let created: Value = check_status(resp).await?.json().await?;
        info!(key = %created["key"], "jira issue created");
        Ok(json!({ "key": created["key"] }))
    }

    async fn update_issue(&self, args: &Value) -> Result<Value> {
        let key = required_str(args, "issue_key")?;
        let field = required_str(args, "field")?;
        let value = args
            .get("value")
            .cloned()
            .ok_or_else(|| AgentError::ToolArguments("'value' is required".into()))?;
        let path = format!("issue/{}", urlencoding::encode(key));
        let resp = self
            .request(reqwest::Method::PUT, &path)
            .json(&json!({ "fields": { field: value } }))
            .send()
            .await?;
        check_status(resp).await?;
        info!(key, field, "jira issue updated");
        Ok(json!({ "key": key, "updated": field }))
    }

    /// Custom fields with their ids, so JQL can reference them.
    async fn field_info(&self) -> Result<Value> {
        let resp = self.request(reqwest::Method::GET, "field").send().await?;
        let fields: Value = check_status(resp).await?.json().await?;
        let custom: Vec<Value> = fields
            .as_array()
            .into_iter()
            .flatten()
            .filter(|f| f["custom"].as_bool().unwrap_or(false))
            .map(|f| {
                json!({
                    "id": f["id"],
                    "name": f["name"],
                    "type": f["schema"]["type"].as_str().unwrap_or("unknown"),
                })
            })
            .collect();
        Ok(json!({ "fields": custom }))
    }
}

fn summarize_issue(issue: &Value) -> Value {
    let fields = &issue["fields"];
    let fix_versions: Vec<Value> = fields["fixVersions"]
        .as_array()
        .into_iter()
        .flatten()
        .map(|v| v["name"].clone())
        .collect();
    json!({
        "key": issue["key"],
        "summary": fields["summary"],
        "status": fields["status"]["name"],
        "type": fields["issuetype"]["name"],
        "priority": fields["priority"]["name"],
        "assignee": fields["assignee"]["displayName"],
        "fix_versions": fix_versions,
        "updated": fields["updated"],
    })
}

#[async_trait]
impl ToolProvider for JiraTools {
    fn specs(&self) -> Vec<ToolSpec> {
        vec![
            ToolSpec {
                name: "search_issues",
                description: "Search Jira issues with a JQL query.",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "jql": { "type": "string", "description": "JQL query" },
                        "max_results": { "type": "integer", "description": "Result cap, default 50" },
                    },
                    "required": ["jql"],
                }),
            },
            ToolSpec {
                name: "create_issue",
                description: "Create a Jira issue and return its key.",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "project_key": { "type": "string" },
                        "summary": { "type": "string" },
                        "description": { "type": "string" },
                        "issuetype": { "type": "string", "description": "e.g. Task, Bug, Story" },
                    },
                    "required": ["project_key", "summary", "issuetype"],
                }),
            },
            ToolSpec {
                name: "update_issue",
                description: "Set one field on an existing Jira issue.",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "issue_key": { "type": "string" },
                        "field": { "type": "string", "description": "Field id, e.g. summary or customfield_10010" },
                        "value": { "description": "New field value" },
                    },
                    "required": ["issue_key", "field", "value"],
                }),
            },
            ToolSpec {
                name: "get_jira_field_info",
                description: "List custom Jira fields with their ids and types.",
                parameters: json!({ "type": "object", "properties": {} }),
            },
        ]
    }

    async fn call(&self, name: &str, args: &Value) -> Result<Value> {
        match name {
            "search_issues" => self.search_issues(args).await,
            "create_issue" => self.create_issue(args).await,
            "update_issue" => self.update_issue(args).await,
            "get_jira_field_info" => self.field_info().await,
            other => Err(AgentError::UnknownTool(other.to_string())),
        }
    }
}
