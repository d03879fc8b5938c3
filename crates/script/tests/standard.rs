use hodld_primitives::hash::hash160;
use hodld_script::keys::SigningKey;
use hodld_script::standard::{is_p2pkh, p2pkh_key_hash, p2pkh_script, p2pkh_script_for_pubkey};

#[test]
fn p2pkh_layout() {
    let script = p2pkh_script(&[0x11; 20]);
    assert_eq!(script.len(), 25);
    assert_eq!(&script[..3], &[0x76, 0xa9, 0x14]);
    assert_eq!(&script[23..], &[0x88, 0xac]);
    assert!(is_p2pkh(&script));
}

#[test]
fn pubkey_script_commits_to_hash160() {
    let key = SigningKey::from_secret([9u8; 32], true).expect("key");
    let script = p2pkh_script_for_pubkey(key.pubkey_bytes());
    assert_eq!(p2pkh_key_hash(&script), Some(hash160(key.pubkey_bytes())));
    assert_eq!(p2pkh_key_hash(&script), Some(key.key_id()));
}

#[test]
fn rejects_other_script_shapes() {
    let mut p2sh = vec![0xa9, 0x14];
    p2sh.extend_from_slice(&[0x22; 20]);
    p2sh.push(0x87);
    assert!(!is_p2pkh(&p2sh));
    assert_eq!(p2pkh_key_hash(&p2sh), None);
    assert!(!is_p2pkh(&[]));
}
