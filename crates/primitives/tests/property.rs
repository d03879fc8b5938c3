use hodld_primitives::encoding::{decode, encode, DecodeError, Decoder, Encoder};
use hodld_primitives::{NetAddress, OutPoint};
use std::net::{IpAddr, Ipv4Addr};

struct Lcg {
    state: u64,
}

impl Lcg {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
        self.state
    }

    fn next_u8(&mut self) -> u8 {
        (self.next_u64() >> 32) as u8
    }

    fn gen_range(&mut self, max: usize) -> usize {
        if max == 0 {
            0
        } else {
            ((self.next_u64() >> 16) % max as u64) as usize
        }
    }
}

fn random_vec(rng: &mut Lcg, max_len: usize) -> Vec<u8> {
    let len = rng.gen_range(max_len + 1);
    (0..len).map(|_| rng.next_u8()).collect()
}

#[test]
fn random_bytes_never_panic_the_decoders() {
    let mut rng = Lcg::new(0x1234_5678);
    for _ in 0..2_000 {
        let bytes = random_vec(&mut rng, 64);
        let _ = decode::<OutPoint>(&bytes);
        let _ = decode::<NetAddress>(&bytes);
        let mut decoder = Decoder::new(&bytes);
        let _ = decoder.read_var_bytes();
    }
}

#[test]
fn truncated_outpoints_fail_with_eof() {
    let mut rng = Lcg::new(42);
    for _ in 0..200 {
        let mut hash = [0u8; 32];
        hash.iter_mut().for_each(|byte| *byte = rng.next_u8());
        let bytes = encode(&OutPoint::new(hash, rng.next_u64() as u32));
        let cut = rng.gen_range(bytes.len());
        assert_eq!(
            decode::<OutPoint>(&bytes[..cut]),
            Err(DecodeError::UnexpectedEof)
        );
    }
}

#[test]
fn varints_use_the_shortest_form() {
    let mut rng = Lcg::new(7);
    for _ in 0..500 {
        let value = rng.next_u64() >> rng.gen_range(64);
        let value = value % 0x0200_0001;
        let mut encoder = Encoder::new();
        encoder.write_varint(value);
        let expected_len = match value {
            0..=0xfc => 1,
            0xfd..=0xffff => 3,
            _ => 5,
        };
        assert_eq!(encoder.len(), expected_len, "value {value}");
        let mut decoder = Decoder::new(encoder.as_slice());
        assert_eq!(decoder.read_varint(), Ok(value));
    }
}

#[test]
fn ipv4_addresses_survive_the_mapped_encoding() {
    let mut rng = Lcg::new(99);
    for _ in 0..200 {
        let ip = Ipv4Addr::from(rng.next_u64() as u32);
        let addr = NetAddress::new(IpAddr::V4(ip), rng.next_u64() as u16);
        let decoded: NetAddress = decode(&encode(&addr)).expect("decode");
        assert!(decoded.is_ipv4());
        assert_eq!(decoded.ip(), IpAddr::V4(ip));
    }
}
