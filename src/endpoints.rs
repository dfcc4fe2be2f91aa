use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use rocket::serde::json::Json;
use rocket::{get, post, routes, Build, Rocket, State};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::chord_node::{self, ChordNode};
use crate::chord_util::{self, GeneralError};
use crate::config::RpcConfig;
use crate::node_info::NodeInfo;
use crate::router;
use crate::rpc::{DirectoryRpc, JobRequest, ModelReply, NodeRpc, PutDataReply, UpdateFingerTable};
use crate::stabilizer;

// ---- server side ----

#[post("/find_successor", data = "<id>")]
async fn rrpc_find_successor(node: &State<Arc<ChordNode>>, id: Json<u32>) -> Json<Result<u32, GeneralError>> {
    Json(router::find_successor(node, id.into_inner()).await)
}

#[post("/closest_preceding_node", data = "<id>")]
fn rrpc_closest_preceding_node(node: &State<Arc<ChordNode>>, id: Json<u32>) -> Json<u32> {
    Json(node.closest_preceding_node(id.into_inner()))
}

#[get("/get_predecessor")]
fn rrpc_get_predecessor(node: &State<Arc<ChordNode>>) -> Json<Option<u32>> {
    Json(node.get_predecessor())
}

#[get("/get_successor")]
fn rrpc_get_successor(node: &State<Arc<ChordNode>>) -> Json<u32> {
    Json(node.get_successor())
}

#[post("/set_predecessor", data = "<node_id>")]
fn rrpc_set_predecessor(node: &State<Arc<ChordNode>>, node_id: Json<u32>) -> Json<bool> {
    Json(node.set_predecessor(node_id.into_inner()))
}

#[post("/set_successor", data = "<node_id>")]
fn rrpc_set_successor(node: &State<Arc<ChordNode>>, node_id: Json<u32>) -> Json<bool> {
    Json(node.set_successor(node_id.into_inner()))
}

#[post("/update_finger_table", data = "<req>")]
async fn rrpc_update_finger_table(node: &State<Arc<ChordNode>>, req: Json<UpdateFingerTable>) -> Json<Result<bool, GeneralError>> {
    let req = req.into_inner();
    Json(stabilizer::update_finger_table(node, req.node_id, req.index).await)
}

#[post("/put_data", data = "<req>")]
async fn rrpc_put_data(node: &State<Arc<ChordNode>>, req: Json<JobRequest>) -> Json<Result<PutDataReply, GeneralError>> {
    let req = req.into_inner();
    Json(chord_node::put_data(node, &req.key, req.ttl).await)
}

#[post("/get_model", data = "<req>")]
async fn rrpc_get_model(node: &State<Arc<ChordNode>>, req: Json<JobRequest>) -> Json<Result<ModelReply, GeneralError>> {
    let req = req.into_inner();
    Json(chord_node::get_model(node, &req.key, req.ttl).await)
}

#[get("/get_node_info")]
fn rrpc_get_node_info(node: &State<Arc<ChordNode>>) -> Json<NodeInfo> {
    Json(node.get_node_info())
}

// ログは tracing 側で出すので Rocket 自身のログは止める
pub fn server_config(bind: IpAddr, port: u16) -> rocket::Config {
    rocket::Config {
        address: bind,
        port,
        log_level: rocket::config::LogLevel::Off,
        ..rocket::Config::default()
    }
}

pub fn build_rocket(node: Arc<ChordNode>, bind: IpAddr, port: u16) -> Rocket<Build> {
    rocket::custom(server_config(bind, port)).manage(node).mount(
        "/",
        routes![
            rrpc_find_successor,
            rrpc_closest_preceding_node,
            rrpc_get_predecessor,
            rrpc_get_successor,
            rrpc_set_predecessor,
            rrpc_set_successor,
            rrpc_update_finger_table,
            rrpc_put_data,
            rrpc_get_model,
            rrpc_get_node_info,
        ],
    )
}

// ---- client side ----

fn http_err(err: reqwest::Error) -> GeneralError {
    GeneralError::new(err.to_string(), chord_util::ERR_CODE_HTTP_REQUEST_ERR)
}

// reuse が偽の場合はアイドル接続を保持せず、呼び出しごとに接続を閉じる
pub fn build_http_client(conf: &RpcConfig, reuse: bool) -> Result<reqwest::Client, GeneralError> {
    let mut builder = reqwest::Client::builder();
    if !reuse {
        builder = builder.pool_max_idle_per_host(0);
    }
    if let Some(timeout) = conf.timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().map_err(http_err)
}

pub async fn http_get_request<R: DeserializeOwned>(client: &reqwest::Client, url_str: &str) -> Result<R, GeneralError> {
    let resp = client.get(url_str).send().await.map_err(http_err)?;
    resp.error_for_status().map_err(http_err)?.json::<R>().await.map_err(http_err)
}

pub async fn http_post_request<B: Serialize + ?Sized, R: DeserializeOwned>(
    client: &reqwest::Client,
    url_str: &str,
    body: &B,
) -> Result<R, GeneralError> {
    let resp = client.post(url_str).json(body).send().await.map_err(http_err)?;
    resp.error_for_status().map_err(http_err)?.json::<R>().await.map_err(http_err)
}

// reuse_connections が真なら共有クライアントを、偽なら呼び出しごとに新しいクライアントを返す
pub struct HttpClientSource {
    conf: RpcConfig,
    shared: Option<reqwest::Client>,
}

impl HttpClientSource {
    pub fn new(conf: RpcConfig) -> Result<HttpClientSource, GeneralError> {
        let shared = if conf.reuse_connections {
            Some(build_http_client(&conf, true)?)
        } else {
            None
        };
        Ok(HttpClientSource { conf, shared })
    }

    pub fn is_pooled(&self) -> bool {
        self.shared.is_some()
    }

    pub fn client(&self) -> Result<reqwest::Client, GeneralError> {
        match &self.shared {
            Some(client) => Ok(client.clone()),
            None => build_http_client(&self.conf, false),
        }
    }
}

// 宛先ノードのアドレスを supernode に問い合わせてから HTTP で呼び出す
pub struct HttpNodeRpc {
    directory: Arc<dyn DirectoryRpc>,
    clients: HttpClientSource,
}

impl HttpNodeRpc {
    pub fn new(directory: Arc<dyn DirectoryRpc>, conf: RpcConfig) -> Result<HttpNodeRpc, GeneralError> {
        Ok(HttpNodeRpc {
            directory,
            clients: HttpClientSource::new(conf)?,
        })
    }

    async fn url_of(&self, target: u32, path: &str) -> Result<String, GeneralError> {
        let (host, port) = self.directory.get_node_address(target).await?;
        Ok(format!("http://{}:{}/{}", host, port, path))
    }

    async fn get<R: DeserializeOwned>(&self, target: u32, path: &str) -> Result<R, GeneralError> {
        let url = self.url_of(target, path).await?;
        debug!(node = target, url = %url, "rrpc get");
        http_get_request(&self.clients.client()?, &url).await
    }

    async fn post<B: Serialize + Sync + ?Sized, R: DeserializeOwned>(&self, target: u32, path: &str, body: &B) -> Result<R, GeneralError> {
        let url = self.url_of(target, path).await?;
        debug!(node = target, url = %url, "rrpc post");
        http_post_request(&self.clients.client()?, &url, body).await
    }
}

#[async_trait]
impl NodeRpc for HttpNodeRpc {
    async fn find_successor(&self, target: u32, id: u32) -> Result<u32, GeneralError> {
        self.post::<_, Result<u32, GeneralError>>(target, "find_successor", &id).await?
    }

    async fn closest_preceding_node(&self, target: u32, id: u32) -> Result<u32, GeneralError> {
        self.post(target, "closest_preceding_node", &id).await
    }

    async fn get_predecessor(&self, target: u32) -> Result<Option<u32>, GeneralError> {
        self.get(target, "get_predecessor").await
    }

    async fn get_successor(&self, target: u32) -> Result<u32, GeneralError> {
        self.get(target, "get_successor").await
    }

    async fn set_predecessor(&self, target: u32, node_id: u32) -> Result<bool, GeneralError> {
        self.post(target, "set_predecessor", &node_id).await
    }

    async fn set_successor(&self, target: u32, node_id: u32) -> Result<bool, GeneralError> {
        self.post(target, "set_successor", &node_id).await
    }

    async fn update_finger_table(&self, target: u32, node_id: u32, index: u32) -> Result<bool, GeneralError> {
        let req = UpdateFingerTable { node_id, index };
        self.post::<_, Result<bool, GeneralError>>(target, "update_finger_table", &req).await?
    }

    async fn put_data(&self, target: u32, key: &str, ttl: u32) -> Result<PutDataReply, GeneralError> {
        let req = JobRequest { key: key.to_string(), ttl };
        self.post::<_, Result<PutDataReply, GeneralError>>(target, "put_data", &req).await?
    }

    async fn get_model(&self, target: u32, key: &str, ttl: u32) -> Result<ModelReply, GeneralError> {
        let req = JobRequest { key: key.to_string(), ttl };
        self.post::<_, Result<ModelReply, GeneralError>>(target, "get_model", &req).await?
    }

    async fn get_node_info(&self, target: u32) -> Result<NodeInfo, GeneralError> {
        self.get(target, "get_node_info").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn client_source_follows_reuse_flag() {
        let fresh = HttpClientSource::new(RpcConfig::default()).unwrap();
        assert!(!fresh.is_pooled());
        assert!(fresh.client().is_ok());

        let conf = RpcConfig { timeout: Some(Duration::from_secs(1)), reuse_connections: true };
        assert!(HttpClientSource::new(conf).unwrap().is_pooled());
    }
}
