use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use unisock::codec::{encode, Decoder};
use unisock::packet::{Packet, DEFAULT_NAMESPACE};
use unisock::Value;

pub use criterion_wrappers::*;
pub use tests::*;

pub mod tests {
    use super::*;

    pub fn socket_io_event() -> Packet {
        Packet::Event {
            nsp: DEFAULT_NAMESPACE.to_owned(),
            event: "update".to_owned(),
            args: vec![
                Value::from("hello"),
                Value::from(json!({"id": 1, "tags": ["a", "b"], "nested": {"ok": true}})),
            ],
            id: Some(12),
        }
    }

    pub fn socket_io_binary_event() -> Packet {
        Packet::Event {
            nsp: DEFAULT_NAMESPACE.to_owned(),
            event: "upload".to_owned(),
            args: vec![
                Value::from("file.bin"),
                Value::Binary(Bytes::from(vec![0xAAu8; 1024])),
                Value::Binary(Bytes::from(vec![0x55u8; 1024])),
            ],
            id: None,
        }
    }
}

mod criterion_wrappers {
    use super::*;

    pub fn criterion_socket_io_event_encode(c: &mut Criterion) {
        c.bench_function("socket io event encode", |b| {
            b.iter(|| encode(black_box(socket_io_event())))
        });
    }

    pub fn criterion_socket_io_event_decode(c: &mut Criterion) {
        let encoded = encode(socket_io_event());
        c.bench_function("socket io event decode", |b| {
            b.iter(|| {
                let mut decoder = Decoder::new();
                black_box(encoded.clone())
                    .into_iter()
                    .flat_map(|packet| decoder.decode(packet))
                    .count()
            })
        });
    }

    pub fn criterion_socket_io_binary_roundtrip(c: &mut Criterion) {
        c.bench_function("socket io binary event roundtrip", |b| {
            b.iter(|| {
                let mut decoder = Decoder::new();
                encode(black_box(socket_io_binary_event()))
                    .into_iter()
                    .flat_map(|packet| decoder.decode(packet))
                    .count()
            })
        });
    }
}

criterion_group!(
    benches,
    criterion_socket_io_event_encode,
    criterion_socket_io_event_decode,
    criterion_socket_io_binary_roundtrip
);
criterion_main!(benches);
