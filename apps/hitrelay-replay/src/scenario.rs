use std::collections::HashSet;
use std::path::Path;

use hitrelay_core::{Step, TransportOptions};
use serde::Deserialize;

use crate::error::ReplayError;

/// A scripted run: senders with their transport options and hits, plus
/// standalone pings.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Scenario {
    #[serde(default)]
    pub senders: Vec<SenderPlan>,
    #[serde(default)]
    pub pings: Vec<PingPlan>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SenderPlan {
    pub name: String,
    #[serde(default)]
    pub options: TransportOptions,
    #[serde(default)]
    pub hits: Vec<HitPlan>,
    /// Step at which the sender is done with its channel. Unset keeps the
    /// channel until the run drains.
    #[serde(default)]
    pub release_at: Option<Step>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct HitPlan {
    #[serde(default)]
    pub at: Step,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PingPlan {
    #[serde(default)]
    pub at: Step,
    pub url: String,
}

/// One scheduled action, in firing order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduledEvent {
    Hit { sender: usize, url: String },
    Ping { url: String },
    Release { sender: usize },
}

impl Scenario {
    pub fn from_toml_str(raw: &str) -> Result<Self, ReplayError> {
        let scenario: Scenario = toml::from_str(raw)?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn load(path: &Path) -> Result<Self, ReplayError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ReplayError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    fn validate(&self) -> Result<(), ReplayError> {
        let mut names = HashSet::new();
        for sender in &self.senders {
            if !names.insert(sender.name.as_str()) {
                return Err(ReplayError::InvalidScenario(format!(
                    "duplicate sender name {}",
                    sender.name
                )));
            }
            if sender.hits.iter().any(|hit| hit.url.trim().is_empty()) {
                return Err(ReplayError::InvalidScenario(format!(
                    "sender {} has a hit without url",
                    sender.name
                )));
            }
            if let Some(release_at) = sender.release_at {
                if sender.options.channel.is_none() {
                    return Err(ReplayError::InvalidScenario(format!(
                        "sender {} releases a channel it never names",
                        sender.name
                    )));
                }
                if sender.hits.iter().any(|hit| hit.at > release_at) {
                    return Err(ReplayError::InvalidScenario(format!(
                        "sender {} sends hits after releasing its channel",
                        sender.name
                    )));
                }
            }
        }
        if self.pings.iter().any(|ping| ping.url.trim().is_empty()) {
            return Err(ReplayError::InvalidScenario(
                "ping without url".to_string(),
            ));
        }
        Ok(())
    }

    /// Every hit, ping and release ordered by step.
    ///
    /// Within one step hits fire before pings and pings before releases, so
    /// a release never discards a hit scheduled for the same step.
    pub fn timeline(&self) -> Vec<(Step, ScheduledEvent)> {
        let mut events = Vec::new();
        for (idx, sender) in self.senders.iter().enumerate() {
            for hit in &sender.hits {
                events.push((
                    hit.at,
                    ScheduledEvent::Hit {
                        sender: idx,
                        url: hit.url.clone(),
                    },
                ));
            }
            if let Some(at) = sender.release_at {
                events.push((at, ScheduledEvent::Release { sender: idx }));
            }
        }
        for ping in &self.pings {
            events.push((
                ping.at,
                ScheduledEvent::Ping {
                    url: ping.url.clone(),
                },
            ));
        }
        events.sort_by_key(|(at, event)| (*at, event_rank(event)));
        events
    }

    /// Human-readable plan, one line per action.
    pub fn describe(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for sender in &self.senders {
            match &sender.options.channel {
                Some(destination) => lines.push(format!(
                    "sender {} uses channel {destination}",
                    sender.name
                )),
                None if sender.options.requests_nothing() => {
                    lines.push(format!("sender {} requests no strategy", sender.name))
                }
                None => lines.push(format!("sender {} uses direct strategies", sender.name)),
            }
        }
        for (at, event) in self.timeline() {
            let line = match event {
                ScheduledEvent::Hit { sender, url } => {
                    format!("@{at} hit from {}: {url}", self.senders[sender].name)
                }
                ScheduledEvent::Ping { url } => format!("@{at} ping {url}"),
                ScheduledEvent::Release { sender } => {
                    format!("@{at} release by {}", self.senders[sender].name)
                }
            };
            lines.push(line);
        }
        lines
    }

    pub fn last_event_step(&self) -> Step {
        self.timeline().last().map(|(at, _)| *at).unwrap_or(0)
    }
}

fn event_rank(event: &ScheduledEvent) -> u8 {
    match event {
        ScheduledEvent::Hit { .. } => 0,
        ScheduledEvent::Ping { .. } => 1,
        ScheduledEvent::Release { .. } => 2,
    }
}
