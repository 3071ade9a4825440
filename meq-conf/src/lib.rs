#![deny(unsafe_code)]

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use config::{Config, File, FileFormat};
use once_cell::sync::OnceCell;
use serde::de::{self, Deserializer};
use serde::Deserialize;

use meq_utils::*;

use self::logging::Log;

pub mod logging;

/// Message type tag carried in byte 4 of every subscription-sync payload.
pub const CLUSTER_SUBS_SYNC_RESP: u8 = 8;

static SETTINGS: OnceCell<Settings> = OnceCell::new();

#[derive(Clone)]
pub struct Settings(Arc<Inner>);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Inner {
    #[serde(default)]
    pub node: Node,
    #[serde(default)]
    pub cluster: Cluster,
    #[serde(default)]
    pub log: Log,
    #[serde(default, skip)]
    pub opts: Options,
}

impl Deref for Settings {
    type Target = Inner;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self(Arc::new(Inner::default()))
    }
}

impl Settings {
    fn new(opts: Options) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::with_name("/etc/meq/meq").required(false))
            .add_source(File::with_name("meq").required(false))
            .add_source(
                config::Environment::with_prefix("meq")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(" ")
                    .with_list_parse_key("cluster.peers"),
            );

        if let Some(cfg) = opts.cfg_name.as_ref() {
            builder = builder.add_source(File::with_name(cfg).required(false));
        }

        let inner: Inner = builder.build()?.try_deserialize()?;
        Ok(Self::with_options(inner, opts))
    }

    /// Builds settings from an in-memory TOML document, without touching files or the environment.
    pub fn from_toml(content: &str, opts: Options) -> Result<Self> {
        let inner: Inner =
            Config::builder().add_source(File::from_str(content, FileFormat::Toml)).build()?.try_deserialize()?;
        Ok(Self::with_options(inner, opts))
    }

    fn with_options(mut inner: Inner, opts: Options) -> Self {
        //Command line configuration overriding file configuration
        if let Some(id) = opts.node_id {
            inner.node.id = id;
        }
        inner.opts = opts;
        Self(Arc::new(inner))
    }

    #[inline]
    pub fn instance() -> Result<&'static Self> {
        SETTINGS.get().ok_or_else(|| anyhow!("Settings not initialized"))
    }

    #[inline]
    pub fn init(opts: Options) -> Result<&'static Self> {
        SETTINGS.set(Settings::new(opts)?).map_err(|_| anyhow!("Settings init failed"))?;
        SETTINGS.get().ok_or_else(|| anyhow!("Settings init failed"))
    }

    #[inline]
    pub fn logs(&self) {
        log::debug!("Config info is {:?}", self.0);
        log::info!("node_id is {}", self.node.id);
        log::info!("node.max_topic_levels is {}", self.node.max_topic_levels);
        log::info!("cluster.message_type is {}", self.cluster.message_type);
        log::info!("cluster.sync_interval is {:?}", self.cluster.sync_interval);
        if !self.cluster.peers.is_empty() {
            log::info!("cluster.peers is {:?}", self.cluster.peers);
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Settings ...")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Extra configuration file, layered on top of the default locations
    pub cfg_name: Option<String>,
    /// Overrides `node.id`
    pub node_id: Option<NodeId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Node {
    #[serde(default)]
    pub id: NodeId,
    //Topics with more levels are rejected by subscribe, lookup and sync
    #[serde(default = "Node::max_topic_levels_default")]
    pub max_topic_levels: usize,
}

impl Default for Node {
    #[inline]
    fn default() -> Self {
        Self { id: NodeId::default(), max_topic_levels: Self::max_topic_levels_default() }
    }
}

impl Node {
    fn max_topic_levels_default() -> usize {
        128
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Cluster {
    #[serde(default = "Cluster::message_type_default")]
    pub message_type: u8,
    //Interval between full subscription-state broadcasts
    #[serde(default = "Cluster::sync_interval_default", deserialize_with = "deserialize_sync_interval")]
    pub sync_interval: Duration,
    #[serde(default)]
    pub peers: Vec<NodeAddr>,
}

impl Default for Cluster {
    #[inline]
    fn default() -> Self {
        Self {
            message_type: Self::message_type_default(),
            sync_interval: Self::sync_interval_default(),
            peers: Vec::new(),
        }
    }
}

impl Cluster {
    fn message_type_default() -> u8 {
        CLUSTER_SUBS_SYNC_RESP
    }
    fn sync_interval_default() -> Duration {
        Duration::from_secs(5)
    }
}

fn deserialize_sync_interval<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let interval = deserialize_duration(deserializer)?;
    if interval.is_zero() {
        return Err(de::Error::custom("cluster.sync_interval must be a nonzero duration"));
    }
    Ok(interval)
}
