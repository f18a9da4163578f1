//! Seams towards the tax authority and the document signer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccessKey, ResultEngine};

/// Proof that the authority accepted a document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    pub number: String,
    pub authorized_at: DateTime<Utc>,
    pub authorized_xml: Option<String>,
}

/// What the authority answered for one document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthorityOutcome {
    Authorized(Authorization),
    /// Definitive refusal; messages are kept verbatim.
    Rejected { errors: Vec<String> },
    /// Transport failure, timeout or a document still in process. The
    /// document may or may not have been received.
    Unavailable { reason: String },
}

#[async_trait]
pub trait AuthorizationClient: Send + Sync {
    /// Sends a signed document and waits for its authorization.
    async fn submit(&self, access_key: &AccessKey, signed_xml: &str) -> AuthorityOutcome;

    /// Asks for the authorization of a document already sent.
    async fn query(&self, access_key: &AccessKey) -> AuthorityOutcome;
}

#[async_trait]
pub trait DocumentSigner: Send + Sync {
    /// Returns the signed form of `xml`.
    async fn sign(&self, xml: &str) -> ResultEngine<String>;
}
