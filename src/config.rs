//! Process-wide tunables for communicator management and collectives.
//!
//! Defaults match the usual optimisation switches of an SPMD run: groups
//! smaller than 16 ranks use the linear star, larger ones the binary tree.
//! Values can be overridden from the environment with
//! [`PstreamConfig::from_env`] or deserialized from any serde format.

use crate::pstream_error::PstreamError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Environment variable overriding [`PstreamConfig::n_procs_simple_sum`].
pub const ENV_NPROCS_SIMPLE_SUM: &str = "PSTREAM_NPROCS_SIMPLE_SUM";
/// Environment variable overriding [`PstreamConfig::comms_type`].
pub const ENV_COMMS_TYPE: &str = "PSTREAM_COMMS_TYPE";
/// Environment variable overriding [`PstreamConfig::debug`].
pub const ENV_DEBUG: &str = "PSTREAM_DEBUG";
/// Environment variable overriding [`PstreamConfig::warn_comm`].
pub const ENV_WARN_COMM: &str = "PSTREAM_WARN_COMM";

/// How point-to-point traffic inside a collective is organised.
///
/// `Blocking` drives every collective through the linear star; the other two
/// follow the threshold-selected schedule.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommsType {
    Blocking,
    Scheduled,
    #[default]
    NonBlocking,
}

impl CommsType {
    pub const ALL: [CommsType; 3] = [
        CommsType::Blocking,
        CommsType::Scheduled,
        CommsType::NonBlocking,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CommsType::Blocking => "blocking",
            CommsType::Scheduled => "scheduled",
            CommsType::NonBlocking => "nonBlocking",
        }
    }
}

impl fmt::Display for CommsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CommsType {
    type Err = PstreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CommsType::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| PstreamError::UnknownCommsType(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PstreamConfig {
    /// Communicators with fewer ranks than this use the linear schedule.
    pub n_procs_simple_sum: usize,
    pub comms_type: CommsType,
    /// Verbose allocate/free/schedule logging.
    pub debug: bool,
    /// Warn when a collective runs on any other communicator.
    pub warn_comm: Option<usize>,
    /// Initial message tag.
    pub msg_type: i32,
}

impl Default for PstreamConfig {
    fn default() -> Self {
        Self {
            n_procs_simple_sum: 16,
            comms_type: CommsType::NonBlocking,
            debug: false,
            warn_comm: None,
            msg_type: 1,
        }
    }
}

impl PstreamConfig {
    /// Defaults overridden by any `PSTREAM_*` variables that are set.
    pub fn from_env() -> Result<Self, PstreamError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) but reading through `lookup`, which
    /// keeps tests independent of the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, PstreamError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(v) = lookup(ENV_NPROCS_SIMPLE_SUM) {
            cfg.n_procs_simple_sum = parse_usize(ENV_NPROCS_SIMPLE_SUM, &v)?;
        }
        if let Some(v) = lookup(ENV_COMMS_TYPE) {
            cfg.comms_type = v.trim().parse()?;
        }
        if let Some(v) = lookup(ENV_DEBUG) {
            cfg.debug = parse_switch(ENV_DEBUG, &v)?;
        }
        if let Some(v) = lookup(ENV_WARN_COMM) {
            let v = v.trim();
            cfg.warn_comm = if v == "-1" || v.is_empty() {
                None
            } else {
                Some(parse_usize(ENV_WARN_COMM, v)?)
            };
        }
        Ok(cfg)
    }
}

fn parse_usize(key: &str, value: &str) -> Result<usize, PstreamError> {
    value
        .trim()
        .parse()
        .map_err(|_| PstreamError::InvalidConfig(format!("{key}={value:?} is not a count")))
}

fn parse_switch(key: &str, value: &str) -> Result<bool, PstreamError> {
    match value.trim() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => Err(PstreamError::InvalidConfig(format!(
            "{key}={other:?} is not a switch"
        ))),
    }
}
