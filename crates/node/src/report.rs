//! Text and JSON views over a loaded registry snapshot.

use std::collections::BTreeMap;

use hodld_consensus::Network;
use hodld_masternode::{Masternode, RegistryState};
use hodld_primitives::hash::bytes_to_hex;
use serde::Serialize;

use crate::config::Command;

#[derive(Debug, Serialize)]
pub struct MasternodeView {
    pub outpoint: String,
    pub address: String,
    pub status: &'static str,
    pub protocol_version: i32,
    pub sig_time: i64,
    pub last_ping: i64,
    pub payee: String,
    pub last_dsq: i64,
    pub scanning_errors: i32,
}

impl MasternodeView {
    pub fn from_record(record: &Masternode) -> Self {
        Self {
            outpoint: record.outpoint().to_string(),
            address: record.identity.addr.to_string(),
            status: record.status(),
            protocol_version: record.identity.protocol_version,
            sig_time: record.sig_time(),
            last_ping: record.last_ping.sig_time,
            payee: bytes_to_hex(&record.identity.payee_script()),
            last_dsq: record.last_dsq,
            scanning_errors: record.scanning_error_count,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SummaryView {
    pub network: &'static str,
    pub masternodes: usize,
    /// Record count per stored status.
    pub states: BTreeMap<&'static str, usize>,
    pub ipv4: usize,
    pub ipv6: usize,
    pub seen_broadcasts: usize,
    pub seen_pings: usize,
    pub peers_asked_us: usize,
    pub peers_we_asked: usize,
    pub entries_we_asked: usize,
    pub dsq_count: i64,
}

impl SummaryView {
    pub fn from_state(network: Network, state: &RegistryState) -> Self {
        let mut states = BTreeMap::new();
        let mut ipv4 = 0;
        for record in state.records.values() {
            *states.entry(record.status()).or_insert(0) += 1;
            if record.identity.addr.is_ipv4() {
                ipv4 += 1;
            }
        }
        Self {
            network: network.as_str(),
            masternodes: state.records.len(),
            states,
            ipv4,
            ipv6: state.records.len() - ipv4,
            seen_broadcasts: state.seen_broadcasts.len(),
            seen_pings: state.seen_pings.len(),
            peers_asked_us: state.asked_us.len(),
            peers_we_asked: state.we_asked.len(),
            entries_we_asked: state.we_asked_entry.len(),
            dsq_count: state.dsq_count,
        }
    }

    pub fn to_text(&self) -> String {
        let mut lines = vec![
            format!("network: {}", self.network),
            format!(
                "masternodes: {} (ipv4 {}, ipv6 {})",
                self.masternodes, self.ipv4, self.ipv6
            ),
        ];
        for (status, count) in &self.states {
            lines.push(format!("  {status}: {count}"));
        }
        lines.push(format!(
            "seen: {} broadcasts, {} pings",
            self.seen_broadcasts, self.seen_pings
        ));
        lines.push(format!(
            "list requests: {} peers asked us, {} peers we asked, {} entries we asked for",
            self.peers_asked_us, self.peers_we_asked, self.entries_we_asked
        ));
        lines.push(format!("dsq count: {}", self.dsq_count));
        lines.join("\n")
    }
}

pub fn list_views(state: &RegistryState) -> Vec<MasternodeView> {
    state
        .records
        .values()
        .map(MasternodeView::from_record)
        .collect()
}

pub fn list_text(views: &[MasternodeView]) -> String {
    views
        .iter()
        .map(|view| {
            format!(
                "{:<18} {:<70} {:<24} proto={} lastping={}",
                view.status, view.outpoint, view.address, view.protocol_version, view.last_ping
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render(
    command: Command,
    json: bool,
    network: Network,
    state: &RegistryState,
) -> Result<String, String> {
    match (command, json) {
        (Command::List, true) => {
            serde_json::to_string_pretty(&list_views(state)).map_err(|err| err.to_string())
        }
        (Command::List, false) => Ok(list_text(&list_views(state))),
        (_, true) => serde_json::to_string_pretty(&SummaryView::from_state(network, state))
            .map_err(|err| err.to_string()),
        (_, false) => Ok(SummaryView::from_state(network, state).to_text()),
    }
}
