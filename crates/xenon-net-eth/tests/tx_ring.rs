mod common;

use common::{harness, harness_with, read_tx_desc, write_tx_desc};
use proptest::prelude::*;
use xenon_memory::GuestMemory;
use xenon_net_eth::desc::{TX_STATUS_DONE, TX_STATUS_ERROR};
use xenon_net_eth::regs::{REG_INT_STATUS, REG_TX_CONFIG, REG_TX_DESC_BASE};
use xenon_net_eth::{EthernetConfig, Ring, ETH_MAX_FRAME_SIZE};

const TX0_BASE: u64 = 0x0001_0000;
const BUF_BASE: u64 = 0x0010_0000;
const BUF_STRIDE: u64 = 0x800;

const TX_RING0_ON: u32 = 0x11;

/// Reference walk over a 32-slot ring: consume owned slots from `head`, following WRAP, at most
/// one lap. Returns the consumed slots and the final cursor.
fn model_tx0_pass(
    owned: &mut [bool; 32],
    wrap: &[bool; 32],
    mut head: usize,
) -> (Vec<usize>, u32) {
    let mut consumed = Vec::new();
    for _ in 0..32 {
        if !owned[head] {
            break;
        }
        owned[head] = false;
        consumed.push(head);
        head = if wrap[head] { 0 } else { (head + 1) % 32 };
    }
    (consumed, head as u32)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn tx0_drain_clears_own_and_follows_wrap(
        initial in 0usize..32,
        lens in proptest::collection::vec(1u32..=ETH_MAX_FRAME_SIZE as u32, 0..=32usize),
        wrap_at in proptest::option::of(0usize..32),
    ) {
        let h = harness();
        h.dev.mmio_write_u32(REG_TX_DESC_BASE, TX0_BASE as u32);
        h.dev.mmio_write_u32(REG_TX_CONFIG, TX_RING0_ON);

        // Walk the cursor to `initial` with throwaway frames.
        for slot in 0..initial as u64 {
            write_tx_desc(&*h.mem, TX0_BASE + slot * 16, BUF_BASE as u32, 60, false);
        }
        h.dev.poll();
        prop_assert_eq!(h.dev.ring_head(Ring::Tx0), initial as u32);
        while h.dev.take_tx_frame().is_some() {}
        h.dev.mmio_write_u32(REG_INT_STATUS, u32::MAX);
        let before = h.dev.stats().tx_packets;

        let mut owned = [false; 32];
        let mut wrap = [false; 32];
        for (i, &len) in lens.iter().enumerate() {
            let slot = (initial + i) % 32;
            let buffer = BUF_BASE + slot as u64 * BUF_STRIDE;
            h.mem.write_from(buffer, &vec![slot as u8; len as usize]).unwrap();
            let addr = TX0_BASE + slot as u64 * 16;
            write_tx_desc(&*h.mem, addr, buffer as u32, len, wrap_at == Some(i));
            owned[slot] = true;
            wrap[slot] = wrap_at == Some(i);
        }
        let mut remaining = owned;
        let (consumed, head) = model_tx0_pass(&mut remaining, &wrap, initial);

        h.dev.poll();

        for slot in 0..32 {
            let desc = read_tx_desc(&*h.mem, TX0_BASE + slot as u64 * 16);
            if consumed.contains(&slot) {
                prop_assert!(!desc.is_owned(), "slot {} still owned", slot);
                prop_assert_eq!(desc.status & TX_STATUS_ERROR, 0);
                prop_assert_eq!(desc.status & TX_STATUS_DONE, TX_STATUS_DONE);
            } else if owned[slot] {
                prop_assert!(desc.is_owned(), "slot {} consumed out of order", slot);
            }
        }
        prop_assert_eq!(h.dev.ring_head(Ring::Tx0), head);
        prop_assert_eq!(h.dev.stats().tx_packets - before, consumed.len() as u64);
        for &slot in &consumed {
            let frame = h.dev.take_tx_frame().unwrap();
            prop_assert_eq!(frame.as_slice()[0], slot as u8);
        }
        prop_assert!(h.dev.take_tx_frame().is_none());

        let status = h.dev.mmio_read_u32(REG_INT_STATUS);
        prop_assert_eq!(status & 0x4 != 0, !consumed.is_empty());
    }
}

#[test]
fn cursor_crosses_the_ring_end_without_a_wrap_bit() {
    let h = harness();
    h.dev.mmio_write_u32(REG_TX_DESC_BASE, TX0_BASE as u32);
    h.dev.mmio_write_u32(REG_TX_CONFIG, TX_RING0_ON);
    for slot in 0..30u64 {
        write_tx_desc(&*h.mem, TX0_BASE + slot * 16, BUF_BASE as u32, 60, false);
    }
    h.dev.poll();
    assert_eq!(h.dev.ring_head(Ring::Tx0), 30);

    for slot in [30u64, 31, 0, 1] {
        write_tx_desc(&*h.mem, TX0_BASE + slot * 16, BUF_BASE as u32, 60, false);
    }
    h.dev.poll();
    assert_eq!(h.dev.stats().tx_packets, 34);
    assert_eq!(h.dev.ring_head(Ring::Tx0), 2);
}

#[test]
fn frames_are_queued_in_ring_order() {
    let h = harness();
    for i in 0..3u64 {
        let buffer = BUF_BASE + i * BUF_STRIDE;
        h.mem.write_from(buffer, &[i as u8 + 1; 60]).unwrap();
        write_tx_desc(&*h.mem, TX0_BASE + i * 16, buffer as u32, 60, false);
    }
    h.dev.mmio_write_u32(REG_TX_DESC_BASE, TX0_BASE as u32);
    h.dev.mmio_write_u32(REG_TX_CONFIG, TX_RING0_ON);
    h.dev.poll();

    for expected in 1..=3u8 {
        let frame = h.dev.take_tx_frame().unwrap();
        assert_eq!(frame.as_slice(), &[expected; 60][..]);
    }
    assert!(h.dev.take_tx_frame().is_none());
    assert_eq!(h.dev.stats().tx_bytes, 180);
}

#[test]
fn unreachable_buffer_is_an_error_and_the_ring_advances() {
    let h = harness();
    write_tx_desc(&*h.mem, TX0_BASE, 0xFFFF_F000, 64, false);
    write_tx_desc(&*h.mem, TX0_BASE + 16, BUF_BASE as u32, 64, false);
    h.dev.mmio_write_u32(REG_TX_DESC_BASE, TX0_BASE as u32);
    h.dev.mmio_write_u32(REG_TX_CONFIG, TX_RING0_ON);
    h.dev.poll();

    let first = read_tx_desc(&*h.mem, TX0_BASE);
    assert!(!first.is_owned());
    assert_eq!(
        first.status & (TX_STATUS_DONE | TX_STATUS_ERROR),
        TX_STATUS_DONE | TX_STATUS_ERROR
    );
    assert!(!read_tx_desc(&*h.mem, TX0_BASE + 16).is_owned());

    let stats = h.dev.stats();
    assert_eq!(stats.tx_errors, 1);
    assert_eq!(stats.tx_packets, 1);
    assert_eq!(h.dev.ring_head(Ring::Tx0), 2);
}

#[test]
fn zero_length_descriptor_is_rejected() {
    let h = harness();
    write_tx_desc(&*h.mem, TX0_BASE, BUF_BASE as u32, 0, false);
    h.dev.mmio_write_u32(REG_TX_DESC_BASE, TX0_BASE as u32);
    h.dev.mmio_write_u32(REG_TX_CONFIG, TX_RING0_ON);
    h.dev.poll();

    assert_eq!(h.dev.stats().tx_errors, 1);
    assert_eq!(h.dev.tx_queue_len(), 0);
    assert_eq!(h.dev.ring_head(Ring::Tx0), 1);
}

#[test]
fn tx1_is_independent_of_tx0() {
    let h = harness();
    let tx1_base = 0x0002_0000u64;
    write_tx_desc(&*h.mem, tx1_base, BUF_BASE as u32, 42, false);
    // TX0 has an owned descriptor too, but ring 0 stays disarmed.
    write_tx_desc(&*h.mem, TX0_BASE, BUF_BASE as u32, 42, false);

    h.dev.mmio_write_u32(REG_TX_CONFIG, 0x0001_0000);
    h.dev.mmio_write_u32(REG_TX_DESC_BASE, tx1_base as u32);
    h.dev.mmio_write_u32(REG_TX_CONFIG, 0x0001_0021);
    h.dev.poll();

    assert!(!h.mem.was_read(TX0_BASE, 16));
    assert!(!read_tx_desc(&*h.mem, tx1_base).is_owned());
    assert!(read_tx_desc(&*h.mem, TX0_BASE).is_owned());
    assert_eq!(h.dev.ring_head(Ring::Tx1), 1);
    assert_eq!(h.dev.mmio_read_u32(REG_INT_STATUS), 0x8);
}

#[test]
fn tx1_cursor_wraps_at_eight() {
    let h = harness();
    let tx1_base = 0x0002_0000u64;
    for i in 0..8u64 {
        write_tx_desc(&*h.mem, tx1_base + i * 16, BUF_BASE as u32, 60, false);
    }
    h.dev.mmio_write_u32(REG_TX_CONFIG, 0x0001_0000);
    h.dev.mmio_write_u32(REG_TX_DESC_BASE, tx1_base as u32);
    h.dev.mmio_write_u32(REG_TX_CONFIG, 0x0001_0021);
    h.dev.poll();

    assert_eq!(h.dev.stats().tx_packets, 8);
    assert_eq!(h.dev.ring_head(Ring::Tx1), 0);
}

#[test]
fn frames_dropped_by_a_full_queue_are_not_counted_as_sent() {
    let config = EthernetConfig {
        queue_capacity: 2,
        ..EthernetConfig::default()
    };
    let h = harness_with(config, None);
    for slot in 0..3u64 {
        write_tx_desc(&*h.mem, TX0_BASE + slot * 16, BUF_BASE as u32, 60, false);
    }
    h.dev.mmio_write_u32(REG_TX_DESC_BASE, TX0_BASE as u32);
    h.dev.mmio_write_u32(REG_TX_CONFIG, TX_RING0_ON);
    h.dev.poll();

    let stats = h.dev.stats();
    assert_eq!(stats.tx_packets, 2);
    assert_eq!(stats.tx_bytes, 120);
    assert_eq!(stats.tx_dropped, 1);
    assert_eq!(h.dev.ring_head(Ring::Tx0), 3);
}
