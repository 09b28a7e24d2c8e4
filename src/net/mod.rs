//! Socket transport and TLS negotiation.
mod socket;
mod tls;

pub use socket::Socket;

pub(crate) use socket::dial;
pub(crate) use tls::establish;
