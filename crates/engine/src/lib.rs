//! Electronic invoice sequencing and lifecycle against the SRI.
//!
//! [`Engine`] issues one [`ElectronicInvoice`] per [`Sale`], allocating its
//! sequential per establishment and emission point, deriving the 49-digit
//! [`AccessKey`] and assembling the `factura` document. It then drives the
//! document through signing, submission, authorization and annulment.

pub use access_key::{
    ACCESS_KEY_LEN, AccessKey, AccessKeyFields, INVOICE_DOCUMENT_TYPE, MAX_SEQUENTIAL,
    modulo11_check_digit,
};
pub use authority::{AuthorityOutcome, Authorization, AuthorizationClient, DocumentSigner};
pub use error::EngineError;
pub use invoice::{ElectronicInvoice, InvoiceState};
pub use issuance::{EmissionType, Environment, IssuanceSettings};
pub use money::MoneyCents;
pub use ops::{
    BatchItemError, BatchReport, DEFAULT_LIST_LIMIT, Engine, EngineBuilder, InvoiceListFilter,
};
pub use sale::{
    BuyerInfo, FINAL_CONSUMER_ID, IdentificationType, IssuerInfo, LineItem, LineSource, Payment,
    PaymentMethod, Sale, TaxRate,
};
pub use signer::CommandSigner;
pub use sri::{Reception, SriClientConfig, SriEndpoints, SriSoapClient, parse_authorization, parse_reception};
pub use xml::{InvoiceHeader, build_invoice_xml};

mod access_key;
mod authority;
mod error;
mod invoice;
mod issuance;
mod money;
mod ops;
mod sale;
mod sequence;
mod signer;
mod sri;
mod xml;

type ResultEngine<T> = Result<T, EngineError>;
