//! # Gatehouse Handler
//!
//! The access-control handler: finds who is calling, loads their session,
//! applies the vhost's location rules and forges the headers the protected
//! application receives.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        AccessHandler                         │
//! │                                                              │
//! │  ArcSwap<HandlerSnapshot> ◀── reload(HandlerConf)            │
//! │     │                                                        │
//! │     ├── VirtualHost (rules, forge, kind) per host + aliases  │
//! │     ├── ExtractorSet (cookie, basic, bearer, service token)  │
//! │     ├── SessionRetriever (timeouts, touch)                   │
//! │     └── RemotePolicyRefresher (DevOps vhosts)                │
//! │                                                              │
//! │  Collaborators: SessionStore, PortalClient, Cipher,          │
//! │                 TokenResolver, PolicySource, Clock           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use gatehouse_config::HandlerConf;
//! use gatehouse_handler::{AccessHandler, AccessRequest, Collaborators};
//! use gatehouse_rules::FunctionLibrary;
//! use http::Method;
//!
//! # async fn example() -> Result<(), gatehouse_handler::HandlerError> {
//! let conf = HandlerConf::default();
//! let collaborators = Collaborators::from_conf(&conf, FunctionLibrary::new())?;
//! let handler = AccessHandler::new(conf, collaborators)?;
//!
//! let request = AccessRequest::new(Method::GET, "/admin")
//!     .with_header("host", "app.example.com")
//!     .with_header("cookie", "lemonldap=0123abcd");
//! let decision = handler.handle(&request).await;
//! println!("{}", decision.kind());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

use std::future::Future;
use std::pin::Pin;

pub mod clock;
pub mod collaborators;
pub mod crypto;
pub mod decision;
pub mod error;
pub mod extract;
pub mod pipeline;
pub mod portal;
pub mod remote;
pub mod request;
pub mod session;
pub mod snapshot;
pub mod tokens;

pub use clock::{Clock, ManualClock, SystemClock};
pub use collaborators::Collaborators;
pub use crypto::{AesGcmCipher, Cipher};
pub use decision::{portal_redirect_url, Decision, Grant, Hidden, REMOTE_USER_HEADER};
pub use error::{HandlerError, HandlerResult};
pub use extract::{ExtractedIdentity, IdentityExtractor, IdentitySource, SERVICE_TOKEN_HEADER};
pub use pipeline::AccessHandler;
pub use portal::{HttpPortalClient, PortalClient, SessionCreation};
pub use remote::{HttpPolicySource, PolicyDocument, PolicySource};
pub use request::AccessRequest;
pub use session::{MemorySessionStore, RestSessionStore, Session, SessionStore};
pub use snapshot::{HandlerSnapshot, VirtualHost};
pub use tokens::TokenResolver;

/// Boxed future returned by collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
