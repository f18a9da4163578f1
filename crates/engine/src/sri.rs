//! SOAP client for the SRI offline web services.
//!
//! Two calls make up a submission:
//!
//! 1. `validarComprobante` on the reception service, carrying the signed
//!    document in base64. The answer is `RECIBIDA` or `DEVUELTA` with messages.
//! 2. `autorizacionComprobante` on the authorization service, polled by access
//!    key until the document is `AUTORIZADO` / `NO AUTORIZADO` or the polling
//!    budget runs out.
//!
//! Responses are read by tag name without a full XML parser; namespace
//! prefixes are ignored.

use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use tracing::{debug, info, instrument, warn};

use crate::{
    AccessKey, Authorization, AuthorityOutcome, AuthorizationClient, EngineError, Environment,
    ResultEngine,
};

const TEST_HOST: &str = "https://celcer.sri.gob.ec";
const PRODUCTION_HOST: &str = "https://cel.sri.gob.ec";
const RECEPTION_PATH: &str = "/comprobantes-electronicos-ws/RecepcionComprobantesOffline";
const AUTHORIZATION_PATH: &str = "/comprobantes-electronicos-ws/AutorizacionComprobantesOffline";

/// Reception errors for a key the SRI already holds: `43` registered,
/// `70` still being processed. Either way the result is read from the
/// authorization service.
const KEY_ALREADY_RECEIVED: [&str; 2] = ["43", "70"];

/// Ecuador mainland offset, used for authorization dates given without one.
const ECUADOR_OFFSET_SECS: i32 = -5 * 3600;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SriEndpoints {
    pub reception_url: String,
    pub authorization_url: String,
}

impl SriEndpoints {
    pub fn for_environment(environment: Environment) -> Self {
        let host = match environment {
            Environment::Test => TEST_HOST,
            Environment::Production => PRODUCTION_HOST,
        };
        Self {
            reception_url: format!("{host}{RECEPTION_PATH}"),
            authorization_url: format!("{host}{AUTHORIZATION_PATH}"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SriClientConfig {
    pub endpoints: SriEndpoints,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Authorization queries made by `submit` before giving up.
    pub authorization_attempts: u32,
    /// Pause between two authorization queries.
    pub authorization_delay: Duration,
}

impl SriClientConfig {
    pub fn new(environment: Environment) -> Self {
        Self {
            endpoints: SriEndpoints::for_environment(environment),
            timeout: Duration::from_secs(30),
            authorization_attempts: 5,
            authorization_delay: Duration::from_secs(3),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SriSoapClient {
    http: reqwest::Client,
    config: SriClientConfig,
}

impl SriSoapClient {
    pub fn new(config: SriClientConfig) -> ResultEngine<Self> {
        if config.timeout.is_zero() {
            return Err(EngineError::InvalidConfig(
                "SRI request timeout must be > 0".to_string(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| EngineError::InvalidConfig(format!("http client: {e}")))?;
        Ok(Self { http, config })
    }

    async fn post(&self, url: &str, envelope: String) -> Result<String, String> {
        let response = self
            .http
            .post(url)
            .header("Content-Type", "text/xml; charset=utf-8")
            .body(envelope)
            .send()
            .await
            .map_err(|e| format!("request to {url} failed: {e}"))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| format!("reading response from {url} failed: {e}"))?;
        debug!(%url, %status, bytes = body.len(), "SRI response");
        if status.is_server_error() && extract_tag(&body, "estado").is_none() {
            return Err(format!("{url} answered {status}"));
        }
        Ok(body)
    }

    async fn authorize_once(&self, access_key: &AccessKey) -> Result<Option<AuthorityOutcome>, String> {
        let body = self
            .post(
                &self.config.endpoints.authorization_url,
                authorization_envelope(access_key),
            )
            .await?;
        Ok(parse_authorization(&body))
    }

    async fn poll_authorization(&self, access_key: &AccessKey, attempts: u32) -> AuthorityOutcome {
        let attempts = attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(self.config.authorization_delay).await;
            }
            match self.authorize_once(access_key).await {
                Ok(Some(outcome)) => return outcome,
                Ok(None) => {
                    debug!(attempt, attempts, "document still in process");
                    last_error = None;
                }
                Err(err) => {
                    warn!(attempt, attempts, error = %err, "authorization query failed");
                    last_error = Some(err);
                }
            }
        }
        AuthorityOutcome::Unavailable {
            reason: last_error.unwrap_or_else(|| {
                format!("document {access_key} still in process after {attempts} queries")
            }),
        }
    }
}

#[async_trait]
impl AuthorizationClient for SriSoapClient {
    #[instrument(skip_all, fields(access_key = %access_key))]
    async fn submit(&self, access_key: &AccessKey, signed_xml: &str) -> AuthorityOutcome {
        let body = match self
            .post(
                &self.config.endpoints.reception_url,
                reception_envelope(signed_xml),
            )
            .await
        {
            Ok(body) => body,
            Err(reason) => {
                warn!(%reason, "reception unavailable");
                return AuthorityOutcome::Unavailable { reason };
            }
        };

        match parse_reception(&body) {
            Reception::Received => info!("document received"),
            Reception::AlreadyInProcess => info!("key already received, polling authorization"),
            Reception::Returned { errors } => {
                info!(count = errors.len(), "document returned by reception");
                return AuthorityOutcome::Rejected { errors };
            }
            Reception::Unreadable => {
                return AuthorityOutcome::Unavailable {
                    reason: "unreadable reception response".to_string(),
                };
            }
        }

        self.poll_authorization(access_key, self.config.authorization_attempts)
            .await
    }

    #[instrument(skip_all, fields(access_key = %access_key))]
    async fn query(&self, access_key: &AccessKey) -> AuthorityOutcome {
        self.poll_authorization(access_key, 1).await
    }
}

fn reception_envelope(signed_xml: &str) -> String {
    format!(
        concat!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>",
            "<soapenv:Envelope xmlns:soapenv=\"http://schemas.xmlsoap.org/soap/envelope/\" ",
            "xmlns:ec=\"http://ec.gob.sri.ws.recepcion\">",
            "<soapenv:Header></soapenv:Header><soapenv:Body><ec:validarComprobante>",
            "<xml>{}</xml>",
            "</ec:validarComprobante></soapenv:Body></soapenv:Envelope>"
        ),
        BASE64.encode(signed_xml.as_bytes())
    )
}

fn authorization_envelope(access_key: &AccessKey) -> String {
    format!(
        concat!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>",
            "<soapenv:Envelope xmlns:soapenv=\"http://schemas.xmlsoap.org/soap/envelope/\" ",
            "xmlns:ec=\"http://ec.gob.sri.ws.autorizacion\">",
            "<soapenv:Header></soapenv:Header><soapenv:Body><ec:autorizacionComprobante>",
            "<claveAccesoComprobante>{}</claveAccesoComprobante>",
            "</ec:autorizacionComprobante></soapenv:Body></soapenv:Envelope>"
        ),
        access_key
    )
}

/// Answer of the reception service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reception {
    Received,
    AlreadyInProcess,
    Returned { errors: Vec<String> },
    Unreadable,
}

pub fn parse_reception(body: &str) -> Reception {
    let Some(state) = extract_tag(body, "estado") else {
        return Reception::Unreadable;
    };
    if state.eq_ignore_ascii_case("RECIBIDA") {
        return Reception::Received;
    }

    let messages = parse_messages(body);
    if messages
        .iter()
        .any(|m| KEY_ALREADY_RECEIVED.contains(&m.identifier.as_str()))
    {
        return Reception::AlreadyInProcess;
    }
    let mut errors: Vec<String> = messages.iter().map(AuthorityMessage::render).collect();
    if errors.is_empty() {
        errors.push(format!("reception state {state}"));
    }
    Reception::Returned { errors }
}

/// `None` while the document is still being processed.
pub fn parse_authorization(body: &str) -> Option<AuthorityOutcome> {
    let state = extract_tag(body, "estado")?;
    match state.to_ascii_uppercase().as_str() {
        "AUTORIZADO" => {
            let number = extract_tag(body, "numeroAutorizacion")
                .map(str::to_string)
                .or_else(|| extract_tag(body, "claveAcceso").map(str::to_string))
                .unwrap_or_default();
            let authorized_at = extract_tag(body, "fechaAutorizacion")
                .and_then(parse_authority_date)
                .unwrap_or_else(|| {
                    warn!("authorization date missing or unreadable, using now");
                    Utc::now()
                });
            let authorized_xml = extract_tag(body, "comprobante").map(unwrap_cdata);
            Some(AuthorityOutcome::Authorized(Authorization {
                number,
                authorized_at,
                authorized_xml,
            }))
        }
        "NO AUTORIZADO" | "RECHAZADO" | "RECHAZADA" => {
            let mut errors: Vec<String> = parse_messages(body)
                .iter()
                .map(AuthorityMessage::render)
                .collect();
            if errors.is_empty() {
                errors.push(format!("authorization state {state}"));
            }
            Some(AuthorityOutcome::Rejected { errors })
        }
        _ => None,
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct AuthorityMessage {
    identifier: String,
    message: String,
    additional: Option<String>,
}

impl AuthorityMessage {
    fn render(&self) -> String {
        match &self.additional {
            Some(extra) => format!("{}: {} ({extra})", self.identifier, self.message),
            None => format!("{}: {}", self.identifier, self.message),
        }
    }
}

/// Message blocks start at each `identificador`; `mensaje` is used both as
/// the block container and as its text, so blocks are cut on the identifier.
fn parse_messages(body: &str) -> Vec<AuthorityMessage> {
    let mut starts = Vec::new();
    let mut from = 0;
    while let Some((open_start, _)) = find_open(body, "identificador", from) {
        starts.push(open_start);
        from = open_start + 1;
    }

    starts
        .iter()
        .enumerate()
        .filter_map(|(i, &start)| {
            let end = starts.get(i + 1).copied().unwrap_or(body.len());
            let block = &body[start..end];
            let identifier = extract_tag(block, "identificador")?.to_string();
            let (_, content_start) = find_open(block, "identificador", 0)?;
            let close = block[content_start..].find("identificador>")?;
            let after_id = &block[content_start + close + "identificador>".len()..];
            let message = extract_tag(after_id, "mensaje")
                .map(unwrap_cdata)
                .unwrap_or_default();
            let additional = extract_tag(after_id, "informacionAdicional")
                .map(unwrap_cdata)
                .filter(|s| !s.is_empty());
            Some(AuthorityMessage {
                identifier,
                message,
                additional,
            })
        })
        .collect()
}

/// Finds `<tag ...>` or `<prefix:tag ...>` at or after `from`; returns the
/// byte offsets of `<` and of the first byte after `>`.
fn find_open(xml: &str, tag: &str, from: usize) -> Option<(usize, usize)> {
    let mut pos = from;
    while pos < xml.len() {
        let lt = pos + xml.get(pos..)?.find('<')?;
        let rest = &xml[lt + 1..];
        let name_len = rest
            .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
            .unwrap_or(rest.len());
        let name = &rest[..name_len];
        let local = name.rsplit(':').next().unwrap_or(name);
        if local == tag && !name.starts_with(['/', '?', '!']) {
            let gt = lt + 1 + rest.find('>')?;
            return Some((lt, gt + 1));
        }
        pos = lt + 1;
    }
    None
}

/// Trimmed text of the first `tag` element, whatever its namespace prefix.
pub fn extract_tag<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let (open_start, content_start) = find_open(xml, tag, 0)?;
    let rest = &xml[open_start + 1..];
    let name_len = rest
        .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .unwrap_or(rest.len());
    let close = format!("</{}>", &rest[..name_len]);
    let end = xml[content_start..].find(&close)?;
    Some(xml[content_start..content_start + end].trim())
}

fn unwrap_cdata(value: &str) -> String {
    let trimmed = value.trim();
    trimmed
        .strip_prefix("<![CDATA[")
        .and_then(|s| s.strip_suffix("]]>"))
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

fn parse_authority_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(value, "%d/%m/%Y %H:%M:%S").ok()?;
    let offset = FixedOffset::east_opt(ECUADOR_OFFSET_SECS)?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}
