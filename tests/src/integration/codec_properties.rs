//! # Codec Properties
//!
//! Round-trip and header-peek equivalence over randomized envelopes, and
//! behavior on hostile input.

#[cfg(test)]
mod tests {
    use crate::integration::fixtures::{
        registry, InventoryItem, InventorySnapshot, OrderPlaced, ShipOrder,
    };
    use mesh_bus::{
        CompressionConfig, EnvelopeCodec, MessageEnvelope, MessageHeader, PayloadType,
    };
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::BTreeMap;

    // =============================================================================
    // GENERATORS
    // =============================================================================

    fn random_string(rng: &mut StdRng, max_len: usize) -> String {
        let len = rng.gen_range(0..=max_len);
        (0..len)
            .map(|_| {
                // Mix ASCII with multi-byte characters
                match rng.gen_range(0..10) {
                    0 => 'ü',
                    1 => '航',
                    _ => rng.gen_range(b'a'..=b'z') as char,
                }
            })
            .collect()
    }

    fn random_header(rng: &mut StdRng, message_type: &str) -> MessageHeader {
        let mut header = MessageHeader::new(message_type, format!("svc-{}", rng.gen::<u16>()))
            .with_timestamp_unix_ms(rng.gen_range(0..4_102_444_800_000))
            .with_schema_version(rng.gen_range(1..5));
        if rng.gen_bool(0.5) {
            header = header.with_causation_id(Some(uuid::Uuid::new_v4().to_string()));
        }
        if rng.gen_bool(0.5) {
            let metadata: BTreeMap<String, String> = (0..rng.gen_range(1..4))
                .map(|i| (format!("key-{i}"), random_string(rng, 12)))
                .collect();
            header = header.with_metadata(metadata);
        }
        header
    }

    fn random_snapshot(rng: &mut StdRng) -> InventorySnapshot {
        InventorySnapshot {
            warehouse: random_string(rng, 16),
            items: (0..rng.gen_range(0..200))
                .map(|_| InventoryItem {
                    sku: random_string(rng, 10),
                    quantity: rng.gen(),
                    unit_price: rng.gen_range(-1e6..1e6),
                    reserved: rng.gen(),
                })
                .collect(),
            tags: (0..rng.gen_range(0..5))
                .map(|_| (random_string(rng, 6), random_string(rng, 6)))
                .collect(),
            note: rng.gen_bool(0.3).then(|| random_string(rng, 64)),
        }
    }

    // =============================================================================
    // ROUND-TRIP AND PEEK EQUIVALENCE
    // =============================================================================

    #[test]
    fn test_random_envelopes_round_trip_and_peek_matches_decode() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let codecs = [
            EnvelopeCodec::with_defaults(registry()),
            EnvelopeCodec::new(registry(), CompressionConfig::disabled()),
        ];

        for _ in 0..250 {
            let envelope = MessageEnvelope::new(
                random_header(&mut rng, "InventorySnapshot"),
                random_snapshot(&mut rng),
            );

            for codec in &codecs {
                let bytes = codec.encode(&envelope).unwrap();
                let decoded = codec.decode::<InventorySnapshot>(&bytes).unwrap();
                assert_eq!(decoded.header, envelope.header);
                assert_eq!(decoded.payload, envelope.payload);

                let peeked = codec.peek_header(&bytes).unwrap();
                assert_eq!(peeked.header, decoded.header);
                assert_eq!(
                    peeked.payload_type,
                    Some(PayloadType::of::<InventorySnapshot>())
                );
            }
        }
    }

    #[test]
    fn test_compressed_and_plain_decode_identically() {
        let compressed = EnvelopeCodec::with_defaults(registry());
        let plain = EnvelopeCodec::new(registry(), CompressionConfig::disabled());
        let envelope = MessageEnvelope::new(
            MessageHeader::new("InventorySnapshot", "inventory"),
            InventorySnapshot::with_items(500),
        );

        let small = compressed.encode(&envelope).unwrap();
        let large = plain.encode(&envelope).unwrap();
        assert!(small.len() < large.len());

        // Either codec reads either form
        assert_eq!(
            plain.decode::<InventorySnapshot>(&small).unwrap().payload,
            compressed.decode::<InventorySnapshot>(&large).unwrap().payload
        );
    }

    #[test]
    fn test_peek_resolves_each_registered_type() {
        let codec = EnvelopeCodec::with_defaults(registry());
        let order = codec
            .encode(&MessageEnvelope::new(
                MessageHeader::new("OrderPlaced", "orders-api"),
                OrderPlaced {
                    order_id: "abc".into(),
                },
            ))
            .unwrap();
        let ship = codec
            .encode(&MessageEnvelope::new(
                MessageHeader::new("ShipOrder", "orders-api"),
                ShipOrder {
                    order_id: "abc".into(),
                    warehouse: "north".into(),
                },
            ))
            .unwrap();

        assert_eq!(
            codec.peek_header(&order).unwrap().payload_type,
            Some(PayloadType::of::<OrderPlaced>())
        );
        assert_eq!(
            codec.peek_header(&ship).unwrap().payload_type,
            Some(PayloadType::of::<ShipOrder>())
        );
    }

    // =============================================================================
    // HOSTILE INPUT
    // =============================================================================

    #[test]
    fn test_truncations_never_panic() {
        let codec = EnvelopeCodec::with_defaults(registry());
        let bytes = codec
            .encode(&MessageEnvelope::new(
                MessageHeader::new("InventorySnapshot", "inventory"),
                InventorySnapshot::with_items(50),
            ))
            .unwrap();

        for cut in 0..bytes.len() {
            let truncated = &bytes[..cut];
            assert!(codec.decode::<InventorySnapshot>(truncated).is_err());
            // A cut inside the payload still leaves a readable header
            let _ = codec.peek_header(truncated);
        }
    }

    #[test]
    fn test_random_garbage_is_rejected() {
        let codec = EnvelopeCodec::with_defaults(registry());
        let mut rng = StdRng::seed_from_u64(99);
        for _ in 0..500 {
            let garbage: Vec<u8> = (0..rng.gen_range(0..256)).map(|_| rng.gen()).collect();
            assert!(codec.peek_header(&garbage).is_none());
            assert!(codec.decode::<OrderPlaced>(&garbage).is_err());
        }
    }
}
