//! Networking support for the krait crates: client construction, the retry
//! policy used for package downloads, and the process wide interrupt flag
//! used for cooperative cancellation.

#![deny(missing_docs)]

pub mod interrupt;
pub mod retry_policies;

pub use interrupt::{InterruptFlag, Interrupted};

/// Constructs the http client used throughout krait. The client follows
/// redirects and advertises a stable user agent; everything else is left at
/// reqwest's defaults so middleware can be layered on top.
pub fn default_client() -> reqwest_middleware::ClientWithMiddleware {
    let client = reqwest::Client::builder()
        .user_agent(concat!("krait/", env!("CARGO_PKG_VERSION")))
        .build()
        .expect("the default client configuration is valid");
    reqwest_middleware::ClientBuilder::new(client).build()
}
