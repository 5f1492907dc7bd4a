#[cfg(feature = "etcd")]
pub mod etcd;
pub mod memory;
