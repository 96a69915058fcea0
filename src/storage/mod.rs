pub mod digest_store;

pub use digest_store::{compute_digests, digest_file, digest_of, DigestStore};
