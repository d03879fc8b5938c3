use hodld::config::Command;
use hodld::report::{render, SummaryView};
use hodld_consensus::constants::PROTOCOL_VERSION;
use hodld_consensus::{chain_params, Network};
use hodld_masternode::{save_snapshot, Broadcast, Masternode, MasternodeState, RegistryState};
use hodld_primitives::{NetAddress, OutPoint};
use hodld_script::keys::SigningKey;

const NOW: i64 = 1_700_000_000;

fn record(seed: u8, addr: &str, state: MasternodeState) -> Masternode {
    let collateral = SigningKey::from_secret([seed; 32], true).expect("key");
    let operator = SigningKey::from_secret([seed + 1; 32], true).expect("key");
    let broadcast = Broadcast::create(
        OutPoint::new([seed; 32], 0),
        NetAddress::parse(addr, 8801).expect("addr"),
        &collateral,
        &operator,
        PROTOCOL_VERSION,
        [0x42; 32],
        NOW,
    );
    let mut record = Masternode::from_broadcast(&broadcast);
    record.state = state;
    record
}

fn sample_state() -> RegistryState {
    let mut state = RegistryState::default();
    for record in [
        record(1, "5.1.0.1:8801", MasternodeState::Enabled),
        record(3, "5.3.0.1:8801", MasternodeState::Enabled),
        record(5, "[2a01:4f8::5]:8801", MasternodeState::Expired),
    ] {
        state.records.insert(record.outpoint().clone(), record);
    }
    state.dsq_count = 7;
    state
}

#[test]
fn summary_counts_states_and_families() {
    let view = SummaryView::from_state(Network::Mainnet, &sample_state());
    assert_eq!(view.masternodes, 3);
    assert_eq!(view.ipv4, 2);
    assert_eq!(view.ipv6, 1);
    assert_eq!(view.states.get("ENABLED"), Some(&2));
    assert_eq!(view.states.get("EXPIRED"), Some(&1));

    let text = view.to_text();
    assert!(text.contains("network: mainnet"));
    assert!(text.contains("dsq count: 7"));
}

#[test]
fn json_outputs_parse_back() {
    let state = sample_state();
    let summary = render(Command::Summary, true, Network::Mainnet, &state).expect("render");
    let value: serde_json::Value = serde_json::from_str(&summary).expect("json");
    assert_eq!(value["masternodes"], 3);
    assert_eq!(value["states"]["ENABLED"], 2);

    let list = render(Command::List, true, Network::Mainnet, &state).expect("render");
    let value: serde_json::Value = serde_json::from_str(&list).expect("json");
    let entries = value.as_array().expect("array");
    assert_eq!(entries.len(), 3);
    assert!(entries
        .iter()
        .all(|entry| entry["protocol_version"] == PROTOCOL_VERSION));

    let text = render(Command::List, false, Network::Mainnet, &state).expect("render");
    assert_eq!(text.lines().count(), 3);
}

#[test]
fn tool_reads_snapshot_from_datadir() {
    let dir = tempfile::tempdir().expect("tempdir");
    let params = chain_params(Network::Testnet);
    save_snapshot(&dir.path().join("mncache.dat"), &params, &sample_state()).expect("save");
    let datadir = dir.path().to_string_lossy().to_string();

    let ok = hodld::run_with_args(
        ["summary", "--datadir", &datadir, "--network", "testnet"]
            .iter()
            .map(|value| value.to_string()),
    );
    assert!(ok.is_ok());

    let wrong = hodld::run_with_args(
        ["summary", "--datadir", &datadir]
            .iter()
            .map(|value| value.to_string()),
    );
    assert!(wrong.expect_err("mainnet magic").contains("different network"));
}
