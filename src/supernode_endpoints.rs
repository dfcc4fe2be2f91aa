use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use rocket::serde::json::Json;
use rocket::{get, post, routes, Build, Rocket, State};

use crate::chord_util::{self, GeneralError};
use crate::config::RpcConfig;
use crate::endpoints::{self, http_get_request, http_post_request, HttpClientSource};
use crate::rpc::{DirectoryRpc, JoinRejected, JoinRequest, JoinResponse, NodeAddress};
use crate::supernode::Directory;

#[post("/request_join", data = "<req>")]
fn request_join(directory: &State<Arc<Directory>>, req: Json<JoinRequest>) -> Json<Result<JoinResponse, JoinRejected>> {
    Json(directory.request_join(req.port))
}

#[post("/confirm_join", data = "<node_id>")]
fn confirm_join(directory: &State<Arc<Directory>>, node_id: Json<u32>) -> Json<bool> {
    Json(directory.confirm_join(node_id.into_inner()))
}

#[post("/cancel_join", data = "<node_id>")]
fn cancel_join(directory: &State<Arc<Directory>>, node_id: Json<u32>) -> Json<bool> {
    Json(directory.cancel_join(node_id.into_inner()))
}

// "id:host:port"
#[get("/get_node")]
fn get_node(directory: &State<Arc<Directory>>) -> Json<Result<String, GeneralError>> {
    Json(directory.get_random_node().map(|addr| addr.to_string()))
}

// "host:port"
#[get("/get_compute_node_address/<node_id>")]
fn get_compute_node_address(directory: &State<Arc<Directory>>, node_id: u32) -> Json<Result<String, GeneralError>> {
    Json(directory.get_node_address(node_id).map(|(host, port)| format!("{}:{}", host, port)))
}

pub fn build_rocket(directory: Arc<Directory>, bind: IpAddr, port: u16) -> Rocket<Build> {
    rocket::custom(endpoints::server_config(bind, port))
        .manage(directory)
        .mount("/", routes![request_join, confirm_join, cancel_join, get_node, get_compute_node_address])
}

pub fn parse_host_port(addr: &str) -> Result<(String, u16), GeneralError> {
    let malformed = || GeneralError::new(format!("malformed address: {}", addr), chord_util::ERR_CODE_ADDRESS_NOT_FOUND);
    let (host, port) = addr.rsplit_once(':').ok_or_else(malformed)?;
    let port = port.parse().map_err(|_| malformed())?;
    if host.is_empty() {
        return Err(malformed());
    }
    Ok((host.to_string(), port))
}

pub struct HttpDirectoryRpc {
    base_url: String,
    clients: HttpClientSource,
}

impl HttpDirectoryRpc {
    pub fn new(host: &str, port: u16, conf: &RpcConfig) -> Result<HttpDirectoryRpc, GeneralError> {
        Ok(HttpDirectoryRpc {
            base_url: format!("http://{}:{}", host, port),
            clients: HttpClientSource::new(*conf)?,
        })
    }

    pub fn is_pooled(&self) -> bool {
        self.clients.is_pooled()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

#[async_trait]
impl DirectoryRpc for HttpDirectoryRpc {
    async fn request_join(&self, port: u16) -> Result<Result<JoinResponse, JoinRejected>, GeneralError> {
        http_post_request(&self.clients.client()?, &self.url("request_join"), &JoinRequest { port }).await
    }

    async fn confirm_join(&self, node_id: u32) -> Result<bool, GeneralError> {
        http_post_request(&self.clients.client()?, &self.url("confirm_join"), &node_id).await
    }

    async fn cancel_join(&self, node_id: u32) -> Result<bool, GeneralError> {
        http_post_request(&self.clients.client()?, &self.url("cancel_join"), &node_id).await
    }

    async fn get_node(&self) -> Result<NodeAddress, GeneralError> {
        let text: String = http_get_request::<Result<String, GeneralError>>(&self.clients.client()?, &self.url("get_node")).await??;
        text.parse()
    }

    async fn get_node_address(&self, node_id: u32) -> Result<(String, u16), GeneralError> {
        let path = format!("get_compute_node_address/{}", node_id);
        let text = http_get_request::<Result<String, GeneralError>>(&self.clients.client()?, &self.url(&path)).await??;
        parse_host_port(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_port_parsing() {
        assert_eq!(parse_host_port("10.0.0.1:5001").unwrap(), ("10.0.0.1".to_string(), 5001));
        assert!(parse_host_port("10.0.0.1").is_err());
        assert!(parse_host_port(":5001").is_err());
        assert!(parse_host_port("host:99999").is_err());
    }

    #[test]
    fn directory_client_honours_reuse_flag() {
        let per_call = RpcConfig { reuse_connections: false, ..RpcConfig::default() };
        assert!(!HttpDirectoryRpc::new("127.0.0.1", 9091, &per_call).unwrap().is_pooled());

        let pooled = RpcConfig { reuse_connections: true, ..RpcConfig::default() };
        assert!(HttpDirectoryRpc::new("127.0.0.1", 9091, &pooled).unwrap().is_pooled());
    }
}
