//! Remote content store for keyledger blobs, backed by Pinata's IPFS pinning
//! service. Uploads go through the Files API with a legacy-endpoint fallback;
//! reads go through the public gateway.

mod pinata;

pub use pinata::{PinataConfig, PinataStore};
