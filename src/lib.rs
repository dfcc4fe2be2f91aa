use std::sync::Arc;

pub type ArMu<T> = Arc<parking_lot::Mutex<T>>;

#[macro_export]
macro_rules! ArMu_new {
    ($wrapped:expr) => {
        ::std::sync::Arc::new(::parking_lot::Mutex::new($wrapped))
    };
}

pub mod chord_node;
pub mod chord_util;
pub mod client;
pub mod config;
pub mod endpoints;
pub mod gval;
pub mod job_store;
pub mod local_net;
pub mod logging;
pub mod mlp;
pub mod node_info;
pub mod router;
pub mod rpc;
pub mod stabilizer;
pub mod supernode;
pub mod supernode_endpoints;
pub mod training;
