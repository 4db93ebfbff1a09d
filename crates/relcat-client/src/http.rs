//! HTTP client for the catalog service
//!
//! Most endpoints live under `/dmadminweb/API`; graph and task editing goes
//! through the older `/dmadminweb` servlets, which answer with bodies nobody
//! reads. Authentication is a session token returned by `login` and replayed
//! as a cookie.

use crate::api::{CatalogApi, ComponentParent, Lookup};
use crate::error::{CatalogError, Result};
use async_trait::async_trait;
use relcat_types::{
    ApplicationDetail, ApplicationId, ApplicationSummary, ComponentId, ComponentItem,
    ComponentKind, ComponentSummary, DeploymentId, DeploymentLog, DeploymentProgress,
    DeploymentReceipt, DeploymentRecord, DomainId, ItemId, Position, TaskId, TaskRef,
};
use reqwest::header::COOKIE;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Request timeout used by [`HttpCatalog::new`]
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

const API: &[&str] = &["dmadminweb", "API"];
const API2: &[&str] = &["dmadminweb", "API2"];
const ADMIN: &[&str] = &["dmadminweb"];

/// Response wrapper shared by the `/API` endpoints
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: Option<bool>,
    error: Option<String>,
    result: Option<T>,
}

impl<T> Envelope<T> {
    /// Lookup semantics: a failed or empty answer means "no such object"
    fn found(self, what: impl Into<String>) -> Result<T> {
        let what = what.into();
        if self.success == Some(false) {
            return Err(CatalogError::NotFound(match self.error {
                Some(error) if !error.is_empty() => format!("{what} ({error})"),
                _ => what,
            }));
        }
        self.result.ok_or(CatalogError::NotFound(what))
    }

    /// Mutation semantics: a failed answer is a rejection
    fn accepted(self, operation: &str) -> Result<Option<T>> {
        let error = self.error.filter(|e| !e.is_empty());
        if self.success == Some(false) || error.is_some() {
            return Err(CatalogError::Rejected(format!(
                "{operation}: {}",
                error.unwrap_or_else(|| "no reason given".to_string())
            )));
        }
        Ok(self.result)
    }
}

#[derive(Debug, Deserialize)]
struct IdOnly<Id> {
    id: Id,
}

#[derive(Debug, Deserialize)]
struct LoginReply {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    token: String,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeployReply {
    #[serde(default)]
    success: bool,
    #[serde(rename = "deploymentid")]
    deployment: Option<DeploymentId>,
    #[serde(default)]
    error: Option<String>,
}

/// `getvar` answers with a list of single-entry objects
#[derive(Debug, Deserialize)]
struct AttributeList {
    #[serde(default)]
    attributes: Vec<BTreeMap<String, serde_json::Value>>,
}

impl AttributeList {
    fn into_map(self) -> BTreeMap<String, String> {
        self.attributes
            .into_iter()
            .flatten()
            .map(|(key, value)| match value {
                serde_json::Value::String(s) => (key, s),
                other => (key, other.to_string()),
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct TaskList {
    #[serde(default)]
    tasks: Vec<TaskRef>,
}

/// HTTP implementation of [`CatalogApi`]
pub struct HttpCatalog {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpCatalog {
    /// Create a client for the catalog at `endpoint`
    pub fn new(endpoint: &str) -> Result<Self> {
        Self::with_timeout(endpoint, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(endpoint: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(endpoint.trim_end_matches('/'))
            .map_err(|e| CatalogError::InvalidUrl(format!("{endpoint}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(CatalogError::InvalidUrl(endpoint.to_string()));
        }

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url,
            token: None,
        })
    }

    /// Use an existing session token instead of logging in
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    /// Log in and keep the session token for later requests
    pub async fn login(&mut self, user: &str, password: &str) -> Result<()> {
        let url = self.url(API, &["login"])?;
        debug!(%url, user, "POST login");

        let response = self
            .client
            .post(url)
            .form(&[("user", user), ("pass", password)])
            .send()
            .await?;
        let reply: LoginReply = decode(response).await?;

        if !reply.success {
            return Err(CatalogError::Unauthorized(
                reply.error.unwrap_or_else(|| format!("login failed for {user}")),
            ));
        }

        self.token = Some(reply.token);
        Ok(())
    }

    // ========== Plumbing ==========

    fn url(&self, prefix: &[&str], segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| CatalogError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(prefix)
            .extend(segments);
        Ok(url)
    }

    fn with_query(mut url: Url, query: &[(&str, &str)]) -> Url {
        url.query_pairs_mut().extend_pairs(query);
        url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.header(COOKIE, format!("token={token}")),
            None => request,
        }
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        debug!(%url, "GET");
        let response = self.authorize(self.client.get(url)).send().await?;
        decode(response).await
    }

    async fn post<B, T>(&self, url: Url, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!(%url, "POST");
        let response = self.authorize(self.client.post(url).json(body)).send().await?;
        decode(response).await
    }

    /// Send a request whose answer carries nothing but its status
    async fn fire(&self, url: Url) -> Result<()> {
        debug!(%url, "GET");
        let response = self.authorize(self.client.get(url)).send().await?;
        check_status(response).await.map(|_| ())
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(CatalogError::Unauthorized(body)),
        StatusCode::NOT_FOUND => Err(CatalogError::NotFound(body)),
        _ => Err(CatalogError::Status {
            status: status.as_u16(),
            body,
        }),
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let bytes = check_status(response).await?.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| CatalogError::Decode(e.to_string()))
}

fn lookup_query<'a>(name: &'a str, lookup: Lookup) -> Vec<(&'a str, &'a str)> {
    let mut query = vec![("name", name)];
    if lookup.id_only {
        query.push(("idonly", "Y"));
    }
    if lookup.latest {
        query.push(("latest", "Y"));
    }
    query
}

#[async_trait]
impl CatalogApi for HttpCatalog {
    // ========== Components ==========

    async fn find_component(&self, name: &str, lookup: Lookup) -> Result<ComponentSummary> {
        let url = Self::with_query(self.url(API, &["component", ""])?, &lookup_query(name, lookup));
        self.get::<Envelope<ComponentSummary>>(url)
            .await?
            .found(format!("component {name}"))
    }

    async fn get_component(&self, id: ComponentId) -> Result<ComponentSummary> {
        let url = self.url(API, &["component", id.value().to_string().as_str()])?;
        self.get::<Envelope<ComponentSummary>>(url).await?.found(id.to_string())
    }

    async fn create_component(&self, parent: ComponentParent<'_>) -> Result<ComponentId> {
        let url = match parent {
            ComponentParent::Root(name) => {
                Self::with_query(self.url(API, &["new", "compver", ""])?, &[("name", name)])
            }
            ComponentParent::Child(parent) => {
                self.url(API, &["new", "compver", parent.value().to_string().as_str()])?
            }
        };
        self.get::<Envelope<IdOnly<ComponentId>>>(url)
            .await?
            .accepted("create component")?
            .map(|r| r.id)
            .ok_or_else(|| CatalogError::Decode("component creation returned no id".into()))
    }

    async fn rename_component(&self, id: ComponentId, short_name: &str) -> Result<()> {
        let id = id.value().to_string();
        let url = Self::with_query(
            self.url(ADMIN, &["UpdateSummaryData"])?,
            &[("objtype", "23"), ("id", id.as_str()), ("change_1", short_name)],
        );
        self.fire(url).await
    }

    async fn reset_items(&self, id: ComponentId, kind: ComponentKind) -> Result<()> {
        let id = id.value().to_string();
        let url = Self::with_query(
            self.url(ADMIN, &["UpdateAttrs"])?,
            &[
                ("f", "inv"),
                ("c", id.as_str()),
                ("xpos", "100"),
                ("ypos", "100"),
                ("kind", kind.as_str()),
                ("removeall", "Y"),
            ],
        );
        self.fire(url).await
    }

    async fn add_file_item(
        &self,
        id: ComponentId,
        item: &ComponentItem,
        position: Position,
        remove_existing: bool,
    ) -> Result<ItemId> {
        let component = id.value().to_string();
        let xpos = position.x.to_string();
        let ypos = position.y.to_string();
        let mut query = vec![
            ("component", component.as_str()),
            ("xpos", xpos.as_str()),
            ("ypos", ypos.as_str()),
            ("kind", "file"),
        ];
        query.extend(item.properties.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        if remove_existing {
            query.push(("removeall", "Y"));
        }

        let url = Self::with_query(self.url(API, &["new", "compitem", item.name.as_str()])?, &query);
        self.get::<Envelope<IdOnly<ItemId>>>(url)
            .await?
            .accepted("add component item")?
            .map(|r| r.id)
            .ok_or_else(|| CatalogError::Decode(format!("item {} returned no id", item.name)))
    }

    async fn link_items(&self, id: ComponentId, from: ItemId, to: ItemId) -> Result<()> {
        let (id, from, to) = (
            id.value().to_string(),
            from.value().to_string(),
            to.value().to_string(),
        );
        let url = Self::with_query(
            self.url(ADMIN, &["UpdateAttrs"])?,
            &[("f", "iad"), ("c", id.as_str()), ("fn", from.as_str()), ("tn", to.as_str())],
        );
        self.fire(url).await
    }

    async fn get_component_attributes(&self, id: ComponentId) -> Result<BTreeMap<String, String>> {
        let url = self.url(API, &["getvar", "component", id.value().to_string().as_str()])?;
        Ok(self.get::<AttributeList>(url).await?.into_map())
    }

    async fn set_component_attributes(
        &self,
        id: ComponentId,
        attributes: &BTreeMap<String, String>,
    ) -> Result<()> {
        let url = Self::with_query(
            self.url(API, &["setvar", "component", id.value().to_string().as_str()])?,
            &[("delattrs", "y")],
        );
        self.post::<_, Envelope<IgnoredAny>>(url, attributes)
            .await?
            .accepted("update attributes")
            .map(|_| ())
    }

    async fn assign_change_request(
        &self,
        id: ComponentId,
        data_source: &str,
        change_request: &str,
    ) -> Result<()> {
        let url = Self::with_query(
            self.url(API2, &["assign", "defect", id.value().to_string().as_str()])?,
            &[("ds", data_source), ("bugid", change_request)],
        );
        self.fire(url).await
    }

    async fn base_component(&self, id: ComponentId) -> Result<ComponentId> {
        let url = self.url(API, &["basecomponent", id.value().to_string().as_str()])?;
        self.get::<Envelope<IdOnly<ComponentId>>>(url)
            .await?
            .found(format!("base of {id}"))
            .map(|r| r.id)
    }

    // ========== Applications ==========

    async fn find_application(&self, name: &str, lookup: Lookup) -> Result<ApplicationSummary> {
        let url = Self::with_query(
            self.url(API, &["application", ""])?,
            &lookup_query(name, lookup),
        );
        self.get::<Envelope<ApplicationSummary>>(url)
            .await?
            .found(format!("application {name}"))
    }

    async fn get_application(&self, id: ApplicationId) -> Result<ApplicationDetail> {
        let url = self.url(API, &["application", id.value().to_string().as_str()])?;
        self.get::<Envelope<ApplicationDetail>>(url).await?.found(id.to_string())
    }

    async fn create_application(&self, name: &str, domain: Option<&str>) -> Result<()> {
        let url = Self::with_query(
            self.url(API, &["new", "application", ""])?,
            &[("name", name), ("domain", domain.unwrap_or_default())],
        );
        self.get::<Envelope<IgnoredAny>>(url)
            .await?
            .accepted("create application")
            .map(|_| ())
    }

    async fn create_application_version(
        &self,
        parent: ApplicationId,
        name: &str,
        domain: Option<&str>,
    ) -> Result<ApplicationId> {
        let url = Self::with_query(
            self.url(API, &["newappver", parent.value().to_string().as_str(), ""])?,
            &[("name", name), ("domain", domain.unwrap_or_default())],
        );
        self.get::<Envelope<IdOnly<ApplicationId>>>(url)
            .await?
            .accepted("create application version")?
            .map(|r| r.id)
            .ok_or_else(|| CatalogError::Decode(format!("application {name} returned no id")))
    }

    async fn assign_environment(&self, name: &str, domain: Option<&str>, env: &str) -> Result<()> {
        let url = Self::with_query(
            self.url(API, &["assign", "application", ""])?,
            &[("name", name), ("env", env), ("domain", domain.unwrap_or_default())],
        );
        self.get::<Envelope<IgnoredAny>>(url)
            .await?
            .accepted("assign environment")
            .map(|_| ())
    }

    async fn is_component_assigned(
        &self,
        app: ApplicationId,
        component: ComponentId,
    ) -> Result<bool> {
        let url = self.url(
            API,
            &[
                "compassigned2app",
                app.value().to_string().as_str(),
                component.value().to_string().as_str(),
            ],
        )?;
        Ok(self
            .get::<Envelope<bool>>(url)
            .await?
            .accepted("check assignment")?
            .unwrap_or(false))
    }

    async fn add_component(
        &self,
        app: ApplicationId,
        component: ComponentId,
        position: Position,
        after: Option<ComponentId>,
    ) -> Result<()> {
        let (a, c) = (app.value().to_string(), component.value().to_string());
        let (xpos, ypos) = (position.x.to_string(), position.y.to_string());
        let servlet = self.url(ADMIN, &["UpdateAttrs"])?;

        self.fire(Self::with_query(servlet.clone(), &[("f", "acd"), ("a", a.as_str()), ("c", c.as_str())]))
            .await?;
        self.fire(Self::with_query(
            servlet.clone(),
            &[
                ("f", "acvm"),
                ("a", a.as_str()),
                ("c", c.as_str()),
                ("xpos", xpos.as_str()),
                ("ypos", ypos.as_str()),
            ],
        ))
        .await?;

        if let Some(parent) = after {
            let from = parent.value().to_string();
            self.fire(Self::with_query(
                servlet,
                &[("f", "cal"), ("a", a.as_str()), ("fn", from.as_str()), ("tn", c.as_str())],
            ))
            .await?;
        }
        Ok(())
    }

    async fn replace_component(
        &self,
        app: ApplicationId,
        old: ComponentId,
        new: ComponentId,
    ) -> Result<()> {
        let url = self.url(
            API,
            &[
                "replace",
                app.value().to_string().as_str(),
                old.value().to_string().as_str(),
                new.value().to_string().as_str(),
            ],
        )?;
        self.fire(url).await
    }

    async fn remove_component(&self, app: ApplicationId, component: ComponentId) -> Result<()> {
        let (a, c) = (app.value().to_string(), component.value().to_string());
        let url = Self::with_query(
            self.url(ADMIN, &["UpdateAttrs"])?,
            &[("f", "cd"), ("a", a.as_str()), ("c", c.as_str())],
        );
        self.fire(url).await
    }

    async fn approve_application(&self, app: ApplicationId) -> Result<()> {
        let url = self.url(API, &["approve", app.value().to_string().as_str()])?;
        self.get::<Envelope<IgnoredAny>>(url)
            .await?
            .accepted("approve")
            .map(|_| ())
    }

    // ========== Domains ==========

    async fn find_domain(&self, name: &str) -> Result<DomainId> {
        let url = self.url(API, &["domain", name])?;
        self.get::<Envelope<IdOnly<DomainId>>>(url)
            .await?
            .found(format!("domain {name}"))
            .map(|r| r.id)
    }

    async fn list_tasks(&self, domain: DomainId) -> Result<Vec<TaskRef>> {
        let url = Self::with_query(
            self.url(ADMIN, &["GetTasks"])?,
            &[("domainid", domain.value().to_string().as_str())],
        );
        Ok(self.get::<TaskList>(url).await?.tasks)
    }

    async fn run_task(
        &self,
        task: TaskId,
        app: ApplicationId,
        domain: DomainId,
        notes: &str,
    ) -> Result<()> {
        let (tid, id, pid) = (
            task.value().to_string(),
            app.value().to_string(),
            domain.value().to_string(),
        );
        let url = Self::with_query(
            self.url(ADMIN, &["RunTask"])?,
            &[
                ("f", "run"),
                ("tid", tid.as_str()),
                ("notes", notes),
                ("id", id.as_str()),
                ("pid", pid.as_str()),
            ],
        );
        self.get::<Envelope<IgnoredAny>>(url)
            .await?
            .accepted("run task")
            .map(|_| ())
    }

    // ========== Deployments ==========

    async fn deploy(&self, app: ApplicationId, env: &str) -> Result<DeploymentId> {
        let url = Self::with_query(
            self.url(API, &["deploy"])?,
            &[
                ("app", app.value().to_string().as_str()),
                ("env", env),
                ("wait", "N"),
            ],
        );
        let reply: DeployReply = self.get(url).await?;
        match reply.deployment {
            Some(id) if reply.success => Ok(id),
            _ => Err(CatalogError::Rejected(
                reply
                    .error
                    .unwrap_or_else(|| format!("deployment of {app} to {env} failed")),
            )),
        }
    }

    async fn deployment_progress(&self, id: DeploymentId) -> Result<DeploymentProgress> {
        let url = Self::with_query(
            self.url(API, &["log", id.value().to_string().as_str()])?,
            &[("checkcomplete", "Y")],
        );
        self.get(url).await
    }

    async fn deployment_log(&self, id: DeploymentId) -> Result<DeploymentLog> {
        let url = self.url(API, &["log", id.value().to_string().as_str()])?;
        self.get(url).await
    }

    async fn record_deployment(&self, record: &DeploymentRecord) -> Result<DeploymentReceipt> {
        let url = self.url(API, &["deploy"])?;
        let receipt: DeploymentReceipt = self.post(url, record).await?;
        match receipt.error.as_deref() {
            Some(error) if !error.is_empty() => Err(CatalogError::Rejected(error.to_string())),
            _ => Ok(receipt),
        }
    }
}
